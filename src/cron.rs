//! Interval job scheduler.
//!
//! Jobs are registered by id with a run interval. A single
//! [`PeriodicTask`] ticks at the scheduler resolution and runs every job
//! whose next run time has passed. Job failures are logged and do not
//! affect the schedule.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::task::PeriodicTask;

type JobFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

struct Job {
    every: Duration,
    next_run: Instant,
    run: JobFn,
}

struct CronInner {
    resolution: Duration,
    jobs: Mutex<HashMap<String, Job>>,
    ticker: Mutex<Option<PeriodicTask>>,
}

/// Scheduler of recurring jobs.
#[derive(Clone)]
pub struct Cron {
    inner: Arc<CronInner>,
}

impl Default for Cron {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Cron {
    /// Create a stopped scheduler that checks for due jobs every `resolution`.
    pub fn new(resolution: Duration) -> Self {
        Self {
            inner: Arc::new(CronInner {
                resolution,
                jobs: Mutex::new(HashMap::new()),
                ticker: Mutex::new(None),
            }),
        }
    }

    /// Register (or replace) a job running every `every`.
    ///
    /// The first run happens one interval after registration.
    pub fn add<F>(&self, id: impl Into<String>, every: Duration, run: F) -> Result<()>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::validation("cron job id cannot be empty"));
        }
        if every.is_zero() {
            return Err(Error::validation(format!(
                "cron job {id:?} needs a nonzero interval"
            )));
        }

        self.inner.jobs.lock().insert(
            id,
            Job {
                every,
                next_run: Instant::now() + every,
                run: Arc::new(run),
            },
        );
        Ok(())
    }

    pub fn remove(&self, id: &str) -> bool {
        self.inner.jobs.lock().remove(id).is_some()
    }

    pub fn remove_all(&self) {
        self.inner.jobs.lock().clear();
    }

    pub fn has_job(&self, id: &str) -> bool {
        self.inner.jobs.lock().contains_key(id)
    }

    /// Number of registered jobs.
    pub fn total(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    pub fn has_started(&self) -> bool {
        self.inner.ticker.lock().is_some()
    }

    /// Start ticking. No-op if already started.
    pub fn start(&self) -> Result<()> {
        let mut ticker = self.inner.ticker.lock();
        if ticker.is_some() {
            return Ok(());
        }

        let inner = self.inner.clone();
        *ticker = Some(PeriodicTask::spawn("cron", self.inner.resolution, move || {
            inner.run_due(Instant::now());
        })?);
        Ok(())
    }

    /// Stop ticking and wait for running jobs to return.
    pub fn stop(&self) {
        let ticker = self.inner.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.stop();
        }
    }

    /// Run every job due at `now` in the calling thread.
    pub fn run_due(&self, now: Instant) -> usize {
        self.inner.run_due(now)
    }
}

impl CronInner {
    fn run_due(&self, now: Instant) -> usize {
        let due: Vec<(String, JobFn)> = {
            let mut jobs = self.jobs.lock();
            jobs.iter_mut()
                .filter(|(_, job)| job.next_run <= now)
                .map(|(id, job)| {
                    job.next_run = now + job.every;
                    (id.clone(), job.run.clone())
                })
                .collect()
        };

        for (id, run) in &due {
            if let Err(e) = run() {
                tracing::warn!(job = %id, error = %e, "Cron job failed");
            }
        }
        due.len()
    }
}

impl fmt::Debug for Cron {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cron")
            .field("jobs", &self.total())
            .field("started", &self.has_started())
            .finish()
    }
}
