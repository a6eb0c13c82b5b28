//! Dualite: dual-pool SQLite application core.
//!
//! # Usage
//!
//! ```bash
//! dualite --data-dir ./dl_data run
//! dualite logs --limit 20 --min-level warn
//! dualite prune-logs --days 7
//! dualite settings set-log-level debug
//! ```
//!
//! Environment variables can also be used:
//! - `DUALITE_DATA_DIR`: Data directory for the SQLite stores
//! - `DUALITE_DEV`: Development mode
//! - `DUALITE_ENCRYPTION_ENV`: Name of the env variable holding the encryption key
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::{anyhow, Context};
use dualite::config::{Cli, Command, SettingsAction};
use dualite::logger::Level;
use dualite::logs::LogFilter;
use dualite::observability::tracing::init_tracing;
use dualite::App;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Print startup banner with version and configuration.
fn print_banner(app: &App) {
    let version = env!("CARGO_PKG_VERSION");
    let settings = app.settings();
    eprintln!(
        r#"
  Dualite v{}

  Configuration:
    App:        {}
    Data Dir:   {}
    Dev Mode:   {}
    Log Level:  {} (kept {} days)

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        settings.meta.app_name,
        app.data_dir().display(),
        app.is_dev(),
        settings.logs.min_level,
        settings.logs.max_days
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let cli = Cli::parse_args();

    init_tracing(&cli.log_level, cli.log_json);

    let app = App::new(cli.app_config());
    app.bootstrap().context("failed to bootstrap application")?;

    let result = match &cli.command {
        Command::Run => run(&app).await,
        Command::Logs { limit, min_level } => print_logs(&app, *limit, min_level.as_deref()),
        Command::PruneLogs { days } => prune_logs(&app, *days),
        Command::Settings { action } => update_settings(&app, action),
    };

    // Flushes buffered logs before the pools close.
    app.reset_bootstrap_state()?;
    result
}

async fn run(app: &App) -> anyhow::Result<()> {
    print_banner(app);
    app.logger().info("Application started");

    wait_for_shutdown().await?;

    app.logger().info("Application stopping");
    tracing::info!("Dualite shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn wait_for_shutdown() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

        tokio::select! {
            result = ctrl_c => {
                result.context("failed to listen for ctrl+c")?;
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("failed to listen for ctrl+c")?;
        tracing::info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}

fn parse_level(raw: &str) -> anyhow::Result<Level> {
    Level::parse(raw).ok_or_else(|| anyhow!("invalid log level {raw:?}"))
}

fn print_logs(app: &App, limit: u32, min_level: Option<&str>) -> anyhow::Result<()> {
    let filter = LogFilter {
        min_level: min_level.map(parse_level).transpose()?,
        limit: Some(limit),
        ..LogFilter::default()
    };

    for row in app.log_query()?.list(&filter)? {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

fn prune_logs(app: &App, days: u32) -> anyhow::Result<()> {
    let age = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
    let before = SystemTime::now().checked_sub(age).unwrap_or(UNIX_EPOCH);

    let deleted = app.delete_old_logs(before)?;
    println!("Deleted {deleted} log rows older than {days} days");
    Ok(())
}

fn update_settings(app: &App, action: &SettingsAction) -> anyhow::Result<()> {
    let mut settings = app.settings();
    match action {
        SettingsAction::Show => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            return Ok(());
        }
        SettingsAction::SetLogLevel { level } => settings.logs.min_level = parse_level(level)?,
        SettingsAction::SetMaxDays { days } => settings.logs.max_days = *days,
    }

    app.save_settings(settings)?;
    println!("Settings saved");
    Ok(())
}
