//! Batched log persistence.
//!
//! Records accumulate in memory and are written in one transaction when
//! either:
//! - an append brings the buffer to the batch size (flushed synchronously in
//!   the appending thread)
//! - the periodic flusher ticks (every flush interval, any nonempty buffer)
//!
//! A failed write puts the drained records back at the front of the buffer;
//! the size trigger is then suspended so the retry happens on the next tick.
//! A writer that is only busy ([`Error::WriterBusy`]) requeues the records
//! without suspending anything.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Level, LogRecord};
use crate::error::{Error, Result};
use crate::task::PeriodicTask;

/// Configuration for batch flushes.
#[derive(Debug, Clone, Copy)]
pub struct SinkConfig {
    /// Number of buffered records that triggers an immediate flush.
    pub batch_size: usize,
    /// Period of the background flusher.
    pub flush_interval: Duration,
    /// Hard cap on buffered records while writes keep failing.
    pub max_pending: usize,
    /// Dev mode keeps one extra severity step enabled.
    pub dev: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            flush_interval: Duration::from_secs(3),
            max_pending: 2000,
            dev: false,
        }
    }
}

impl SinkConfig {
    /// Create a SinkConfig from application config values.
    pub fn from_config(batch_size: usize, flush_interval: Duration, dev: bool) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            flush_interval,
            max_pending: batch_size.saturating_mul(10),
            dev,
        }
    }
}

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// An append filled the buffer. Runs in the logging thread, which may
    /// itself hold the destination's writer connection; writers report that
    /// case as [`Error::WriterBusy`] instead of waiting.
    Size,
    /// The periodic flusher ticked.
    Timer,
    /// An explicit flush or the final flush on stop.
    Manual,
}

/// Destination of flushed batches.
pub trait LogWriter: Send + Sync {
    /// Whether new records should be kept at all.
    ///
    /// Consulted on every append, so a configuration change takes effect on
    /// the next record.
    fn accepts(&self) -> bool;

    /// Persist a batch atomically.
    fn write_batch(&self, records: &[LogRecord], trigger: FlushTrigger) -> Result<()>;
}

#[derive(Debug, Default)]
struct Buffer {
    records: Vec<LogRecord>,
    /// Set after a failed write; cleared by the next successful one.
    retrying: bool,
}

struct SinkInner {
    config: SinkConfig,
    min_level: AtomicI32,
    buffer: Mutex<Buffer>,
    writer: Arc<dyn LogWriter>,
    flusher: Mutex<Option<PeriodicTask>>,
}

/// In-memory batch buffer in front of a [`LogWriter`].
#[derive(Clone)]
pub struct BatchLogSink {
    inner: Arc<SinkInner>,
}

impl BatchLogSink {
    /// Create a sink. The periodic flusher is not running until [`start`](Self::start).
    pub fn new(config: SinkConfig, min_level: Level, writer: Arc<dyn LogWriter>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                config,
                min_level: AtomicI32::new(min_level.as_i32()),
                buffer: Mutex::new(Buffer {
                    records: Vec::with_capacity(config.batch_size),
                    retrying: false,
                }),
                writer,
                flusher: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> SinkConfig {
        self.inner.config
    }

    /// Configured minimum level (before the dev-mode adjustment).
    pub fn level(&self) -> Level {
        Level(self.inner.min_level.load(Ordering::SeqCst))
    }

    pub fn set_level(&self, level: Level) {
        self.inner.min_level.store(level.as_i32(), Ordering::SeqCst);
    }

    /// Lowest level that is currently let through.
    pub fn effective_level(&self) -> Level {
        let configured = self.level().as_i32();
        if self.inner.config.dev {
            Level(configured.saturating_sub(Level::STEP))
        } else {
            Level(configured)
        }
    }

    pub fn enabled(&self, level: Level) -> bool {
        level >= self.effective_level()
    }

    /// Number of records waiting for a flush.
    pub fn pending(&self) -> usize {
        self.inner.buffer.lock().records.len()
    }

    /// Append a record. Never fails from the caller's point of view.
    ///
    /// Returns `true` if the record was kept.
    pub fn push(&self, record: LogRecord) -> bool {
        if !self.inner.writer.accepts() {
            return false;
        }

        let ready = {
            let mut buffer = self.inner.buffer.lock();
            buffer.records.push(record);
            if !buffer.retrying && buffer.records.len() >= self.inner.config.batch_size {
                Some(std::mem::take(&mut buffer.records))
            } else {
                None
            }
        };

        if let Some(batch) = ready {
            let _ = self.inner.write(batch, FlushTrigger::Size);
        }
        true
    }

    /// Write everything currently buffered.
    ///
    /// Returns the number of records written. On error the records remain
    /// buffered.
    pub fn flush(&self) -> Result<usize> {
        self.inner.flush(FlushTrigger::Manual)
    }

    /// Start the periodic flusher. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut flusher = self.inner.flusher.lock();
        if flusher.is_some() {
            return Ok(());
        }

        let inner = self.inner.clone();
        let task = PeriodicTask::spawn(
            "log-flusher",
            self.inner.config.flush_interval,
            move || {
                let _ = inner.flush(FlushTrigger::Timer);
            },
        )?;
        *flusher = Some(task);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.flusher.lock().is_some()
    }

    /// Stop the periodic flusher, then flush whatever is left.
    ///
    /// Any in-flight timer flush completes before the final flush starts.
    pub fn stop(&self) -> Result<usize> {
        self.halt_flusher();
        self.inner.flush(FlushTrigger::Manual)
    }

    /// Stop the periodic flusher and hand back everything still buffered,
    /// for owners that persist the remainder themselves.
    pub fn halt(&self) -> Vec<LogRecord> {
        self.halt_flusher();
        std::mem::take(&mut self.inner.buffer.lock().records)
    }

    fn halt_flusher(&self) {
        let task = self.inner.flusher.lock().take();
        if let Some(task) = task {
            task.stop();
        }
    }
}

impl SinkInner {
    fn flush(&self, trigger: FlushTrigger) -> Result<usize> {
        let batch = std::mem::take(&mut self.buffer.lock().records);
        if batch.is_empty() {
            return Ok(0);
        }
        self.write(batch, trigger)
    }

    fn write(&self, batch: Vec<LogRecord>, trigger: FlushTrigger) -> Result<usize> {
        let count = batch.len();
        match self.writer.write_batch(&batch, trigger) {
            Ok(()) => {
                self.buffer.lock().retrying = false;
                tracing::trace!(count, ?trigger, "Flushed log batch");
                Ok(count)
            }
            Err(e @ Error::WriterBusy(_)) => {
                tracing::debug!(count, ?trigger, "Log writer busy, batch stays buffered");
                self.requeue(batch, false);
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, count, ?trigger, "Log batch write failed, will retry");
                self.requeue(batch, true);
                Err(e)
            }
        }
    }

    fn requeue(&self, mut batch: Vec<LogRecord>, failed: bool) {
        let mut buffer = self.buffer.lock();
        batch.append(&mut buffer.records);

        if batch.len() > self.config.max_pending {
            let dropped = batch.len() - self.config.max_pending;
            batch.drain(..dropped);
            tracing::warn!(dropped, "Log buffer over capacity, dropped oldest records");
        }

        buffer.records = batch;
        buffer.retrying |= failed;
    }
}
