//! The application instance.
//!
//! Provides:
//! - [`App`]: bootstrap/reset lifecycle over the primary and auxiliary stores
//! - Database accessors that follow the active transaction of a view
//! - Reentrant [`App::run_in_transaction`] and [`App::aux_run_in_transaction`]
//! - Transactional settings saves, log queries and transport selection
//!
//! An `App` is a cheap handle over shared state. The handle passed to a
//! transaction callback is a transactional view: it carries the active
//! [`TxInfo`] of its store, so accessors and nested transaction calls made
//! through it run on the transaction's connection.

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use crate::broker::SubscriptionsBroker;
use crate::config::AppConfig;
use crate::cron::Cron;
use crate::error::{Error, Result};
use crate::logger::{BatchLogSink, FlushTrigger, LogRecord, LogWriter, Logger, SinkConfig};
use crate::logs::{self, LogQuery};
use crate::settings::Settings;
use crate::storage::db::{Db, PoolPair};
use crate::storage::pool::{DbPool, PoolOptions, PoolRole, StoreKind};
use crate::storage::schema;
use crate::store::Store;
use crate::transport::{Filesystem, MailClient};
use crate::tx::{self, TxInfo};

/// Store key of the cached primary-store table names.
pub const STORE_KEY_CACHED_TABLES: &str = "cached_tables";

/// Cron id of the log retention job.
pub const LOGS_CLEANUP_JOB: &str = "__logs_cleanup__";

/// Broker topic notified after settings are applied.
pub const SETTINGS_TOPIC: &str = "settings";

const LOGS_CLEANUP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

struct Pools {
    primary: PoolPair,
    aux: PoolPair,
}

impl Pools {
    fn pair(&self, store: StoreKind) -> &PoolPair {
        match store {
            StoreKind::Primary => &self.primary,
            StoreKind::Aux => &self.aux,
        }
    }

    fn close(&self) {
        self.primary.close();
        self.aux.close();
    }
}

struct AppInner {
    config: AppConfig,
    pools: RwLock<Option<Pools>>,
    settings: RwLock<Settings>,
    logger: Logger,
    store: Store<String, Value>,
    cron: Cron,
    broker: SubscriptionsBroker,
    /// Serializes bootstrap and reset.
    lifecycle: Mutex<()>,
}

/// Handle to an application instance.
///
/// Cloning is cheap; clones share pools, settings, logger and subsystems.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
    primary_tx: Option<Arc<TxInfo>>,
    aux_tx: Option<Arc<TxInfo>>,
}

impl App {
    /// Create an unbootstrapped instance.
    ///
    /// Settings start at their defaults and the logger already exists, but
    /// nothing is persisted until [`bootstrap`](Self::bootstrap).
    pub fn new(config: AppConfig) -> Self {
        let settings = Settings::default();
        let min_level = settings.logs.min_level;
        let sink_config = SinkConfig::from_config(
            config.log_batch_size,
            config.log_flush_interval,
            config.is_dev,
        );

        let inner = Arc::new_cyclic(|app: &Weak<AppInner>| {
            let writer = Arc::new(AppLogWriter { app: app.clone() });
            AppInner {
                config,
                pools: RwLock::new(None),
                settings: RwLock::new(settings),
                logger: Logger::new(BatchLogSink::new(sink_config, min_level, writer)),
                store: Store::new(),
                cron: Cron::default(),
                broker: SubscriptionsBroker::new(),
                lifecycle: Mutex::new(()),
            }
        });

        Self::from_inner(inner)
    }

    fn from_inner(inner: Arc<AppInner>) -> Self {
        Self {
            inner,
            primary_tx: None,
            aux_tx: None,
        }
    }

    /// Open both stores and start the background subsystems.
    ///
    /// An already bootstrapped instance is reset first. On failure the
    /// instance is left unbootstrapped.
    pub fn bootstrap(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock();

        self.inner.reset()?;
        if let Err(e) = self.inner.bootstrap() {
            tracing::error!(error = %e, "Bootstrap failed");
            self.inner.reset()?;
            return Err(e);
        }
        Ok(())
    }

    /// Flush pending logs, stop background jobs and close every pool.
    ///
    /// Settings, the logger and the key/value store are kept. Calling this
    /// on an unbootstrapped instance is a no-op.
    pub fn reset_bootstrap_state(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock();
        self.inner.reset()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.inner.pools.read().is_some()
    }

    /// Primary store executor routing each statement by its class.
    ///
    /// Inside a primary transaction every statement runs on the transaction.
    pub fn db(&self) -> Option<Db> {
        self.handle(StoreKind::Primary, None)
    }

    pub fn concurrent_db(&self) -> Option<Db> {
        self.handle(StoreKind::Primary, Some(PoolRole::Concurrent))
    }

    pub fn nonconcurrent_db(&self) -> Option<Db> {
        self.handle(StoreKind::Primary, Some(PoolRole::Nonconcurrent))
    }

    /// Auxiliary store executor routing each statement by its class.
    pub fn aux_db(&self) -> Option<Db> {
        self.handle(StoreKind::Aux, None)
    }

    pub fn aux_concurrent_db(&self) -> Option<Db> {
        self.handle(StoreKind::Aux, Some(PoolRole::Concurrent))
    }

    pub fn aux_nonconcurrent_db(&self) -> Option<Db> {
        self.handle(StoreKind::Aux, Some(PoolRole::Nonconcurrent))
    }

    fn handle(&self, store: StoreKind, role: Option<PoolRole>) -> Option<Db> {
        let pools = self.inner.pools.read();
        let pair = pools.as_ref()?.pair(store);

        if let Some(tx) = self.active_tx(store) {
            return Some(Db::Tx(tx.clone()));
        }

        Some(match role {
            None => Db::Dual(pair.clone()),
            Some(PoolRole::Concurrent) => Db::Pool(pair.concurrent.clone()),
            Some(PoolRole::Nonconcurrent) => Db::Pool(pair.nonconcurrent.clone()),
        })
    }

    fn writer(&self, store: StoreKind) -> Result<Arc<DbPool>> {
        self.inner
            .pools
            .read()
            .as_ref()
            .map(|pools| pools.pair(store).nonconcurrent.clone())
            .ok_or(Error::NotBootstrapped)
    }

    /// Run `f` inside a primary store transaction.
    ///
    /// `f` receives a transactional view of this app. Called on a view that
    /// already has an active primary transaction, `f` joins it instead of
    /// opening a new one and only the outermost call commits. An error from
    /// any nesting level rolls the whole transaction back; the callback's
    /// error is returned unchanged.
    pub fn run_in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&App) -> Result<T, E>,
        E: From<Error> + fmt::Display,
    {
        self.run_in_store_transaction(StoreKind::Primary, f)
    }

    /// Run `f` inside an auxiliary store transaction.
    ///
    /// Same semantics as [`run_in_transaction`](Self::run_in_transaction),
    /// independent of any primary transaction.
    pub fn aux_run_in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&App) -> Result<T, E>,
        E: From<Error> + fmt::Display,
    {
        self.run_in_store_transaction(StoreKind::Aux, f)
    }

    fn run_in_store_transaction<T, E, F>(&self, store: StoreKind, f: F) -> Result<T, E>
    where
        F: FnOnce(&App) -> Result<T, E>,
        E: From<Error> + fmt::Display,
    {
        if let Some(tx) = self.active_tx(store) {
            return tx::run_nested(tx, || f(self));
        }

        let tx = TxInfo::begin(self.writer(store)?)?;
        let view = self.with_tx(tx.clone());
        let result = f(&view);
        drop(view);

        tx::settle(&tx, result)
    }

    fn active_tx(&self, store: StoreKind) -> Option<&Arc<TxInfo>> {
        let tx = match store {
            StoreKind::Primary => self.primary_tx.as_ref(),
            StoreKind::Aux => self.aux_tx.as_ref(),
        };
        tx.filter(|tx| tx.is_active())
    }

    fn with_tx(&self, tx: Arc<TxInfo>) -> Self {
        let mut view = self.clone();
        match tx.store() {
            StoreKind::Primary => view.primary_tx = Some(tx),
            StoreKind::Aux => view.aux_tx = Some(tx),
        }
        view
    }

    /// Whether this view is inside an active transaction on either store.
    pub fn is_transactional(&self) -> bool {
        self.tx_info().is_some()
    }

    /// The active transaction of this view, primary store first.
    pub fn tx_info(&self) -> Option<Arc<TxInfo>> {
        self.active_tx(StoreKind::Primary)
            .or_else(|| self.active_tx(StoreKind::Aux))
            .cloned()
    }

    /// Snapshot of the live settings.
    pub fn settings(&self) -> Settings {
        self.inner.settings.read().clone()
    }

    /// Validate and persist `settings`.
    ///
    /// The in-memory settings and the logger level change when the
    /// enclosing primary transaction commits: before this returns when the
    /// call is outermost, or at the outer commit when made from a
    /// transactional view. Nothing changes if the transaction rolls back.
    pub fn save_settings(&self, settings: Settings) -> Result<()> {
        settings.validate()?;

        self.run_in_transaction(|view| {
            let db = view.nonconcurrent_db().ok_or(Error::NotBootstrapped)?;
            settings.persist(&db)?;

            let tx = view.tx_info().ok_or(Error::NotBootstrapped)?;
            let app = Arc::downgrade(&self.inner);
            tx.on_commit(move || {
                if let Some(inner) = app.upgrade() {
                    inner.apply_settings(settings);
                }
            });
            Ok(())
        })
    }

    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    /// Read access to persisted logs.
    pub fn log_query(&self) -> Result<LogQuery> {
        self.aux_db().map(LogQuery::new).ok_or(Error::NotBootstrapped)
    }

    /// Delete persisted logs created at or before `before`.
    ///
    /// Returns the number of deleted rows.
    pub fn delete_old_logs(&self, before: SystemTime) -> Result<usize> {
        self.delete_logs_before(crate::millis_since_epoch(before))
    }

    fn delete_logs_before(&self, before_millis: i64) -> Result<usize> {
        let db = self.aux_db().ok_or(Error::NotBootstrapped)?;
        let deleted = logs::delete_before(&db, before_millis)?;
        tracing::debug!(deleted, before_millis, "Deleted old logs");
        Ok(deleted)
    }

    /// Mail transport for the current settings.
    pub fn new_mail_client(&self) -> MailClient {
        let settings = self.inner.settings.read();
        MailClient::select(&settings.meta, &settings.smtp)
    }

    /// File storage backend for uploaded files.
    pub fn new_filesystem(&self) -> Result<Filesystem> {
        let s3 = self.inner.settings.read().s3.clone();
        Filesystem::select(&s3, self.data_dir().join("storage"))
    }

    /// File storage backend for backups.
    pub fn new_backups_filesystem(&self) -> Result<Filesystem> {
        let s3 = self.inner.settings.read().backups.s3.clone();
        Filesystem::select(&s3, self.data_dir().join("backups"))
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Name of the environment variable holding the encryption key.
    pub fn encryption_env(&self) -> &str {
        &self.inner.config.encryption_env
    }

    pub fn is_dev(&self) -> bool {
        self.inner.config.is_dev
    }

    /// Application-wide key/value store. Survives reset.
    pub fn store(&self) -> &Store<String, Value> {
        &self.inner.store
    }

    pub fn cron(&self) -> &Cron {
        &self.inner.cron
    }

    pub fn subscriptions_broker(&self) -> &SubscriptionsBroker {
        &self.inner.broker
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("data_dir", &self.inner.config.data_dir)
            .field("is_dev", &self.inner.config.is_dev)
            .field("bootstrapped", &self.is_bootstrapped())
            .field("primary_tx", &self.primary_tx)
            .field("aux_tx", &self.aux_tx)
            .finish()
    }
}

impl AppInner {
    fn pool_options(&self, max_size: u32) -> PoolOptions {
        PoolOptions {
            max_size,
            busy_timeout: self.config.busy_timeout,
            acquire_timeout: self.config.acquire_timeout,
        }
    }

    /// Build everything in locals and publish the pools last, so a failure
    /// part way leaves nothing behind.
    fn bootstrap(self: &Arc<Self>) -> Result<()> {
        self.config.validate()?;

        let data_dir = &self.config.data_dir;
        fs::create_dir_all(data_dir).map_err(|source| Error::DataDir {
            path: data_dir.clone(),
            source,
        })?;

        let pools = Pools {
            primary: PoolPair::open(
                data_dir,
                StoreKind::Primary,
                self.pool_options(self.config.data_max_open_conns),
            )?,
            aux: PoolPair::open(
                data_dir,
                StoreKind::Aux,
                self.pool_options(self.config.aux_max_open_conns),
            )?,
        };

        {
            let conn = pools.primary.nonconcurrent.get()?;
            schema::initialize_primary_schema(&conn)?;
        }
        {
            let conn = pools.aux.nonconcurrent.get()?;
            schema::initialize_aux_schema(&conn)?;
        }

        let settings = match Settings::load(&Db::Dual(pools.primary.clone()))? {
            Some(settings) => settings,
            None => {
                let settings = Settings::default();
                settings.persist(&Db::Pool(pools.primary.nonconcurrent.clone()))?;
                settings
            }
        };

        let tables = {
            let conn = pools.primary.concurrent.get()?;
            schema::list_tables(&conn)?
        };

        self.register_jobs()?;

        *self.pools.write() = Some(pools);
        *self.settings.write() = settings.clone();
        self.logger.set_level(settings.logs.min_level);
        self.store
            .set(STORE_KEY_CACHED_TABLES.to_string(), json!(tables));

        self.cron.start()?;
        self.logger.sink().start()?;

        tracing::info!(
            data_dir = %data_dir.display(),
            is_dev = self.config.is_dev,
            tables = tables.len(),
            "Application bootstrapped"
        );
        Ok(())
    }

    fn register_jobs(self: &Arc<Self>) -> Result<()> {
        let app = Arc::downgrade(self);
        self.cron.add(LOGS_CLEANUP_JOB, LOGS_CLEANUP_INTERVAL, move || {
            let Some(inner) = app.upgrade() else {
                return Ok(());
            };

            let max_days = inner.settings.read().logs.max_days;
            if max_days == 0 {
                return Ok(());
            }

            let before = crate::now_millis() - i64::from(max_days) * DAY_MILLIS;
            App::from_inner(inner).delete_logs_before(before)?;
            Ok(())
        })
    }

    /// Stop the cron, flush the log sink while the pools are still open, then
    /// close the pools. No-op when not bootstrapped.
    fn reset(&self) -> Result<()> {
        if self.pools.read().is_none() {
            return Ok(());
        }

        self.cron.stop();

        if let Err(e) = self.logger.sink().stop() {
            tracing::warn!(
                error = %e,
                pending = self.logger.sink().pending(),
                "Final log flush failed, records stay buffered"
            );
        }

        if let Some(pools) = self.pools.write().take() {
            pools.close();
        }

        tracing::info!("Application bootstrap state reset");
        Ok(())
    }

    fn apply_settings(&self, settings: Settings) {
        self.logger.set_level(settings.logs.min_level);
        let meta = settings.meta.clone();
        *self.settings.write() = settings;

        let notified = self.broker.broadcast(
            SETTINGS_TOPIC,
            json!({ "action": "update", "meta": meta }),
        );
        tracing::debug!(notified, "Settings applied");
    }
}

impl Drop for AppInner {
    fn drop(&mut self) {
        self.cron.stop();

        let pending = self.logger.sink().halt();
        let Some(pools) = self.pools.get_mut().take() else {
            return;
        };

        if !pending.is_empty() && self.settings.get_mut().logs.max_days > 0 {
            let writer = pools.aux.nonconcurrent.clone();
            if let Err(e) = write_logs(writer, &pending) {
                tracing::warn!(error = %e, lost = pending.len(), "Dropping unflushed logs");
            }
        }
        pools.close();
    }
}

/// Insert a batch in one auxiliary transaction, waiting for the writer.
fn write_logs(writer: Arc<DbPool>, records: &[LogRecord]) -> Result<()> {
    let tx = TxInfo::begin(writer)?;
    let result = logs::insert_batch(&Db::Tx(tx.clone()), records);
    tx::settle(&tx, result)
}

/// Persists app logs into the auxiliary store.
struct AppLogWriter {
    app: Weak<AppInner>,
}

impl LogWriter for AppLogWriter {
    fn accepts(&self) -> bool {
        self.app
            .upgrade()
            .is_some_and(|inner| inner.settings.read().logs.max_days > 0)
    }

    fn write_batch(&self, records: &[LogRecord], trigger: FlushTrigger) -> Result<()> {
        let inner = self.app.upgrade().ok_or(Error::NotBootstrapped)?;

        // Retention may have been disabled after the records were buffered.
        if inner.settings.read().logs.max_days == 0 {
            return Ok(());
        }

        let writer = App::from_inner(inner).writer(StoreKind::Aux)?;

        // A size flush runs in the logging thread. If that thread is inside
        // its own aux transaction, waiting for the writer would never end.
        if trigger == FlushTrigger::Size && writer.is_held_by_current_thread() {
            return Err(Error::WriterBusy(StoreKind::Aux.as_str()));
        }
        write_logs(writer, records)
    }
}
