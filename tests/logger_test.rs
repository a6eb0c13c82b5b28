//! Batched log persistence tests.
//!
//! Tests:
//! - Nothing is persisted while retention is disabled
//! - Size-triggered and timer-triggered flushes
//! - Level enablement follows saved settings, with the dev-mode step
//! - Buffered records survive a failed flush and a reset
//! - A size flush waits for a writer briefly held by another thread

mod common;

use common::{log_count, wait_for, TestApp};
use dualite::logger::{Attrs, Level};
use dualite::logs::LogFilter;
use dualite::App;
use serde_json::json;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn set_max_days(app: &App, days: u32) {
    let mut settings = app.settings();
    settings.logs.max_days = days;
    app.save_settings(settings).unwrap();
}

fn set_min_level(app: &App, level: Level) {
    let mut settings = app.settings();
    settings.logs.min_level = level;
    app.save_settings(settings).unwrap();
}

#[test]
fn test_disabled_retention_persists_nothing() {
    let fixture = TestApp::bootstrapped();
    let app = &fixture.app;
    set_max_days(app, 0);

    for i in 0..201 {
        app.logger().error(format!("message {i}"));
    }

    assert_eq!(app.logger().sink().pending(), 0);
    app.logger().sink().flush().unwrap();
    assert_eq!(log_count(app), 0);
}

#[tokio::test]
async fn test_size_and_timer_flushes() {
    let fixture = TestApp::bootstrapped();
    let app = &fixture.app;
    set_max_days(app, 1);

    for i in 0..199 {
        app.logger().error(format!("message {i}"));
    }
    assert_eq!(log_count(app), 0, "199 writes should stay buffered");

    app.logger().error("message 199");
    assert_eq!(log_count(app), 200, "the 200th write flushes synchronously");

    app.logger().error("message 200");
    assert_eq!(log_count(app), 200, "the 201st write waits for the timer");

    let flushed = wait_for(Duration::from_millis(3200), || log_count(app) == 201).await;
    assert!(flushed, "timer flush did not persist the 201st record");
}

#[test]
fn test_level_enablement_follows_settings() {
    // (configured minimum, level, expected) for non-dev mode.
    let cases = [
        (Level::INFO, Level::DEBUG, false),
        (Level::INFO, Level::INFO, true),
        (Level::INFO, Level::WARN, true),
        (Level::INFO, Level::ERROR, true),
        (Level::WARN, Level::DEBUG, false),
        (Level::WARN, Level::INFO, false),
        (Level::WARN, Level::WARN, true),
        (Level::WARN, Level::ERROR, true),
        (Level::ERROR, Level::WARN, false),
        (Level::ERROR, Level::ERROR, true),
        (Level::DEBUG, Level::DEBUG, true),
    ];

    let fixture = TestApp::bootstrapped();
    let app = &fixture.app;
    for (min, level, expected) in cases {
        set_min_level(app, min);
        assert_eq!(
            app.logger().enabled(level),
            expected,
            "min {min}, level {level}"
        );
    }
}

#[test]
fn test_dev_mode_enables_one_step_lower() {
    let cases = [
        (Level::INFO, Level(-5), false),
        (Level::INFO, Level::DEBUG, true),
        (Level::INFO, Level::INFO, true),
        (Level::WARN, Level::DEBUG, false),
        (Level::WARN, Level(-1), false),
        (Level::WARN, Level::INFO, true),
        (Level::WARN, Level::WARN, true),
        (Level::ERROR, Level::INFO, false),
        (Level::ERROR, Level::WARN, true),
        (Level::ERROR, Level::ERROR, true),
    ];

    let fixture = TestApp::bootstrapped_dev();
    let app = &fixture.app;
    for (min, level, expected) in cases {
        set_min_level(app, min);
        assert_eq!(
            app.logger().enabled(level),
            expected,
            "dev: min {min}, level {level}"
        );
    }
}

#[test]
fn test_rows_carry_level_and_attributes() {
    let fixture = TestApp::bootstrapped();
    let app = &fixture.app;

    let mut attrs = Attrs::new();
    attrs.insert("request".into(), json!("GET /"));
    let logger = app.logger().with(attrs);

    let mut data = Attrs::new();
    data.insert("status".into(), json!(500));
    logger.log(Level::ERROR, "request failed", data);
    logger.debug("filtered out");
    app.logger().sink().flush().unwrap();

    let rows = app
        .log_query()
        .unwrap()
        .list(&LogFilter::default())
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].level, Level::ERROR);
    assert_eq!(rows[0].message, "request failed");
    assert_eq!(rows[0].data.get("request"), Some(&json!("GET /")));
    assert_eq!(rows[0].data.get("status"), Some(&json!(500)));
}

#[test]
fn test_records_buffered_while_unbootstrapped_are_kept() {
    let fixture = TestApp::bootstrapped();
    let app = &fixture.app;

    app.reset_bootstrap_state().unwrap();
    app.logger().warn("logged while down");
    assert!(app.logger().sink().flush().is_err());
    assert_eq!(app.logger().sink().pending(), 1);

    app.bootstrap().unwrap();
    app.logger().sink().flush().unwrap();
    assert_eq!(log_count(app), 1);
}

#[test]
fn test_reset_flushes_pending_records() {
    let fixture = TestApp::bootstrapped();
    let app = &fixture.app;

    app.logger().info("pending at reset");
    assert_eq!(app.logger().sink().pending(), 1);

    app.reset_bootstrap_state().unwrap();
    assert_eq!(app.logger().sink().pending(), 0);

    app.bootstrap().unwrap();
    assert_eq!(log_count(app), 1);
}

#[test]
fn test_flush_inside_aux_transaction_is_deferred() {
    let fixture = TestApp::with_config(|mut config| {
        config.log_batch_size = 3;
        config.log_flush_interval = Duration::from_secs(3600);
        config
    });
    let app = &fixture.app;
    app.bootstrap().unwrap();

    app.aux_run_in_transaction(|_view| {
        for i in 0..3 {
            app.logger().info(format!("inside {i}"));
        }
        Ok::<_, dualite::Error>(())
    })
    .unwrap();

    // The size flush could not take the writer held by the transaction.
    assert_eq!(app.logger().sink().pending(), 3);
    assert_eq!(app.logger().sink().flush().unwrap(), 3);
    assert_eq!(log_count(app), 3);
}

#[test]
fn test_size_flush_waits_for_writer_held_by_other_thread() {
    let fixture = TestApp::with_config(|mut config| {
        config.log_flush_interval = Duration::from_secs(3600);
        config
    });
    let app = &fixture.app;
    app.bootstrap().unwrap();

    let (held_tx, held_rx) = mpsc::channel();
    let holder = {
        let app = app.clone();
        thread::spawn(move || {
            app.aux_run_in_transaction(|_view| {
                held_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(200));
                Ok::<_, dualite::Error>(())
            })
            .unwrap();
        })
    };
    held_rx.recv().unwrap();

    for i in 0..200 {
        app.logger().error(format!("while held {i}"));
    }
    assert_eq!(log_count(app), 200, "the 200th write waits for the writer");
    assert_eq!(app.logger().sink().pending(), 0);
    holder.join().unwrap();

    for i in 0..200 {
        app.logger().error(format!("while free {i}"));
    }
    assert_eq!(log_count(app), 400);
    assert_eq!(app.logger().sink().pending(), 0);
}
