//! Periodic trigger registry, one abortable tokio task per scheduled job.
//!
//! The scheduler knows nothing about host records; it holds only the job id,
//! the interval and the tick callback supplied by the monitoring service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

/// Callback invoked on every tick, with the job id it fires for.
pub type TickFn = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("job {0} is already scheduled")]
    DuplicateJob(String),
    #[error("job {0} is not scheduled")]
    NotScheduled(String),
}

struct ScheduledJob {
    handle: JoinHandle<()>,
    interval: Duration,
    callback: TickFn,
    /// Set while a tick callback is running; overlapping fires are skipped.
    in_flight: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct JobScheduler {
    jobs: DashMap<String, ScheduledJob>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    /// Registers a repeating trigger. The first fire happens after
    /// `first_delay`, then every `interval`.
    pub fn schedule(
        &self,
        job_id: &str,
        interval: Duration,
        callback: TickFn,
        first_delay: Duration,
    ) -> Result<(), SchedulerError> {
        match self.jobs.entry(job_id.to_string()) {
            Entry::Occupied(_) => Err(SchedulerError::DuplicateJob(job_id.to_string())),
            Entry::Vacant(slot) => {
                let in_flight = Arc::new(AtomicBool::new(false));
                let handle = spawn_trigger_loop(
                    job_id.to_string(),
                    interval,
                    first_delay,
                    callback.clone(),
                    Arc::clone(&in_flight),
                );
                slot.insert(ScheduledJob {
                    handle,
                    interval,
                    callback,
                    in_flight,
                });
                Ok(())
            }
        }
    }

    /// Removes a trigger. Absent ids are a no-op so deletes stay idempotent.
    /// Returns whether a trigger was actually removed.
    pub fn unschedule(&self, job_id: &str) -> bool {
        match self.jobs.remove(job_id) {
            Some((_, job)) => {
                job.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Swaps the interval of an existing trigger under its registry entry,
    /// so no duplicate fires can happen during the transition. The next fire
    /// is one full new interval away.
    pub fn reschedule(&self, job_id: &str, new_interval: Duration) -> Result<(), SchedulerError> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::NotScheduled(job_id.to_string()))?;

        entry.handle.abort();
        entry.interval = new_interval;
        entry.handle = spawn_trigger_loop(
            job_id.to_string(),
            new_interval,
            new_interval,
            entry.callback.clone(),
            Arc::clone(&entry.in_flight),
        );
        Ok(())
    }

    pub fn list_scheduled(&self) -> Vec<String> {
        self.jobs.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn interval_of(&self, job_id: &str) -> Option<Duration> {
        self.jobs.get(job_id).map(|e| e.interval)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        for entry in self.jobs.iter() {
            entry.handle.abort();
        }
    }
}

/// Clears the in-flight flag when the tick task ends, panics included.
struct ClearOnDrop(Arc<AtomicBool>);

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn spawn_trigger_loop(
    job_id: String,
    interval: Duration,
    first_delay: Duration,
    callback: TickFn,
    in_flight: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(first_delay).await;
        loop {
            if in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // Dispatch the callback onto its own task so a slow tick
                // never delays this trigger loop.
                let cb = Arc::clone(&callback);
                let id = job_id.clone();
                let flag = Arc::clone(&in_flight);
                tokio::spawn(async move {
                    let _clear = ClearOnDrop(flag);
                    cb(id).await;
                });
            } else {
                warn!(job_id = %job_id, "previous tick still running, skipping this fire");
            }
            tokio::time::sleep(interval).await;
        }
    })
}
