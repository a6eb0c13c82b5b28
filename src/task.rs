//! Cancellable periodic background task.
//!
//! A dedicated thread runs a tick callback at a fixed period until it is
//! stopped. [`PeriodicTask::stop`] signals the thread and joins it, so once it
//! returns no tick is running or will run again.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::Result;

/// Handle to a running periodic task.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn a thread calling `tick` every `period`.
    ///
    /// The first tick happens one full period after spawning. Every tick is
    /// attempted regardless of how the previous one went.
    pub fn spawn<F>(name: impl Into<String>, period: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                tracing::debug!(task = %thread_name, period_ms = period.as_millis() as u64, "Periodic task started");
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => tick(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!(task = %thread_name, "Periodic task stopped");
            })?;

        Ok(Self {
            name,
            stop_tx,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the task to stop and wait for the in-flight tick to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());

        let Some(handle) = self.handle.take() else {
            return;
        };

        // Stopping from inside a tick cannot join our own thread; the loop
        // exits after the current tick returns.
        if handle.thread().id() == thread::current().id() {
            return;
        }

        if handle.join().is_err() {
            tracing::error!(task = %self.name, "Periodic task panicked");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}
