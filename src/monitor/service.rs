//! Orchestration layer binding user commands, the job store, the scheduler
//! and the notification sink.
//!
//! All mutation of [`HostJob`] state happens here; the scheduler only holds
//! job ids and calls back into [`MonitoringService::tick`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::MonitorLimits;
use crate::monitor::model::{HostConfig, HostJob};
use crate::notifications::NotificationSink;
use crate::probe::{HostProbe, ProbeOutcome};
use crate::scheduler::{JobScheduler, SchedulerError, TickFn};
use crate::secrets::{CredentialVault, VaultError};
use crate::store::{JobStore, StoreError};

/// Delay before a freshly added host gets its first check.
const FIRST_TICK_DELAY: Duration = Duration::from_secs(2);

/// Upper bound of the randomized first delay applied during startup
/// reconciliation, so restored jobs do not all fire at once.
const RECONCILE_JITTER_SECS: u64 = 30;

pub const MAX_HOST_ADDRESS_LEN: usize = 253;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("host {host} is already being monitored")]
    DuplicateHost { host: String },
    #[error("host limit reached ({limit} monitored hosts)")]
    QuotaExceeded { limit: usize },
    #[error("no monitored host matches '{0}'")]
    NotFound(String),
    #[error("storage error: {0}")]
    Persistence(#[from] StoreError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("credential error: {0}")]
    Credential(#[from] VaultError),
}

pub struct MonitoringService {
    store: Arc<dyn JobStore>,
    scheduler: Arc<JobScheduler>,
    probe: Arc<dyn HostProbe>,
    sink: Arc<dyn NotificationSink>,
    vault: Option<Arc<CredentialVault>>,
    limits: MonitorLimits,
    /// Per-job mutual exclusion between user mutations and in-flight ticks.
    job_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Serializes the duplicate/quota checks of concurrent `add_host` calls.
    admission: Mutex<()>,
}

impl MonitoringService {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: Arc<JobScheduler>,
        probe: Arc<dyn HostProbe>,
        sink: Arc<dyn NotificationSink>,
        vault: Option<Arc<CredentialVault>>,
        limits: MonitorLimits,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            scheduler,
            probe,
            sink,
            vault,
            limits,
            job_locks: DashMap::new(),
            admission: Mutex::new(()),
        })
    }

    pub fn limits(&self) -> &MonitorLimits {
        &self.limits
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.limits.admin_user_ids.contains(&user_id)
    }

    /// Starts monitoring a new host for a user.
    pub async fn add_host(
        self: &Arc<Self>,
        owner_user_id: i64,
        host_address: &str,
        interval_seconds: u64,
        port: Option<u16>,
    ) -> Result<HostJob, MonitorError> {
        let host_address = host_address.trim();
        self.validate_host_address(host_address)?;
        self.validate_interval(interval_seconds)?;
        let port = port.unwrap_or(self.limits.default_port);
        validate_port(port)?;

        let _admit = self.admission.lock().await;

        if self
            .store
            .find_active(owner_user_id, host_address)
            .await?
            .is_some()
        {
            return Err(MonitorError::DuplicateHost {
                host: host_address.to_string(),
            });
        }
        if self.store.count_active_for_owner(owner_user_id).await? >= self.limits.max_hosts_per_user
        {
            return Err(MonitorError::QuotaExceeded {
                limit: self.limits.max_hosts_per_user,
            });
        }

        let job = HostJob::new(
            owner_user_id,
            HostConfig {
                host_address: host_address.to_string(),
                interval_seconds,
                port,
                ssh_port: None,
                ssh_username: None,
                encrypted_ssh_password: None,
            },
        );
        self.store.upsert(&job).await?;

        if let Err(e) = self.scheduler.schedule(
            &job.job_id,
            Duration::from_secs(interval_seconds),
            self.tick_callback(),
            FIRST_TICK_DELAY,
        ) {
            // Compensate so the store never keeps a job that will never run.
            if let Err(del_err) = self.store.soft_delete(&job.job_id).await {
                warn!(job_id = %job.job_id, error = %del_err, "failed to roll back job after scheduling error");
            }
            return Err(e.into());
        }

        info!(
            job_id = %job.job_id,
            owner_user_id,
            host = host_address,
            interval_seconds,
            port,
            "host added"
        );
        Ok(job)
    }

    /// Stops monitoring a host. Returns false when there was nothing to do,
    /// which is benign; calling twice is safe.
    ///
    /// The trigger is removed before the record is touched, so after this
    /// returns no further ticks fire for the job.
    pub async fn remove_host(&self, job_id: &str) -> Result<bool, MonitorError> {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let job = match self.store.get(job_id).await? {
            Some(job) if job.is_active => job,
            _ => {
                // Stale trigger cleanup for records that are gone already.
                self.scheduler.unschedule(job_id);
                return Ok(false);
            }
        };

        self.scheduler.unschedule(job_id);
        let removed = self.store.soft_delete(job_id).await?;
        self.job_locks.remove(job_id);
        info!(job_id, owner_user_id = job.owner_user_id, "host removed");
        Ok(removed)
    }

    /// Changes the check interval of an active job and reschedules it.
    pub async fn update_interval(
        &self,
        job_id: &str,
        new_interval_seconds: u64,
    ) -> Result<HostJob, MonitorError> {
        self.validate_interval(new_interval_seconds)?;

        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self.active_job(job_id).await?;
        self.scheduler
            .reschedule(job_id, Duration::from_secs(new_interval_seconds))?;
        job.config.interval_seconds = new_interval_seconds;
        job.touch();
        self.store.upsert(&job).await?;
        Ok(job)
    }

    /// Changes the monitored TCP port of an active job. Takes effect on the
    /// next tick; no rescheduling is needed.
    pub async fn set_port(&self, job_id: &str, port: u16) -> Result<HostJob, MonitorError> {
        validate_port(port)?;

        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self.active_job(job_id).await?;
        job.config.port = port;
        job.touch();
        self.store.upsert(&job).await?;
        Ok(job)
    }

    /// Attaches remote-exec credentials to a job. The password is sealed by
    /// the credential vault before it reaches the store.
    pub async fn set_ssh_credentials(
        &self,
        job_id: &str,
        ssh_port: Option<u16>,
        username: &str,
        password: &str,
    ) -> Result<HostJob, MonitorError> {
        let vault = self.vault.as_ref().ok_or_else(|| {
            MonitorError::Validation("credential encryption is not configured".to_string())
        })?;
        let sealed = vault.seal(password)?;

        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self.active_job(job_id).await?;
        job.config.ssh_port = Some(ssh_port.unwrap_or(self.limits.default_ssh_port));
        job.config.ssh_username = Some(username.to_string());
        job.config.encrypted_ssh_password = Some(sealed);
        job.touch();
        self.store.upsert(&job).await?;
        Ok(job)
    }

    /// Active jobs visible to a caller. `include_all` is honored only for
    /// configured admins; everyone else always sees their own jobs.
    pub async fn list_jobs(
        &self,
        caller_user_id: i64,
        include_all: bool,
    ) -> Result<Vec<HostJob>, MonitorError> {
        let mut jobs = if include_all && self.is_admin(caller_user_id) {
            self.store.list_active().await?
        } else {
            self.store
                .list_by_owner(caller_user_id)
                .await?
                .into_iter()
                .filter(|j| j.is_active)
                .collect()
        };
        jobs.truncate(self.limits.max_hosts_per_listing);
        Ok(jobs)
    }

    /// The caller's active jobs that have a failure on record, including
    /// hosts that have since recovered.
    pub async fn list_failures(&self, owner_user_id: i64) -> Result<Vec<HostJob>, MonitorError> {
        let mut jobs: Vec<HostJob> = self
            .store
            .list_by_owner(owner_user_id)
            .await?
            .into_iter()
            .filter(|j| j.is_active && j.status.last_failure.is_some())
            .collect();
        jobs.truncate(self.limits.max_hosts_per_listing);
        Ok(jobs)
    }

    /// The active job for an `(owner, host)` pair, used by the command
    /// surface to resolve host names to job ids.
    pub async fn find_host(
        &self,
        owner_user_id: i64,
        host_address: &str,
    ) -> Result<Option<HostJob>, MonitorError> {
        Ok(self.store.find_active(owner_user_id, host_address.trim()).await?)
    }

    /// Per-user opt-in for success notifications. Persisted, so the choice
    /// survives restarts alongside the jobs it applies to.
    pub async fn set_notify_on_success(
        &self,
        user_id: i64,
        enabled: bool,
    ) -> Result<(), MonitorError> {
        self.store.set_notify_on_success(user_id, enabled).await?;
        Ok(())
    }

    /// Startup reconciliation: re-registers every persisted active job with
    /// its stored interval. First delays are jittered so a restart does not
    /// fire every check simultaneously. Returns the number of jobs restored.
    pub async fn load_all_jobs(self: &Arc<Self>) -> Result<usize, MonitorError> {
        let jobs = self.store.list_active().await?;
        let mut restored = 0;

        for job in jobs {
            let first_delay =
                Duration::from_secs(1 + rand::random::<u64>() % RECONCILE_JITTER_SECS);
            match self.scheduler.schedule(
                &job.job_id,
                Duration::from_secs(job.config.interval_seconds),
                self.tick_callback(),
                first_delay,
            ) {
                Ok(()) => restored += 1,
                Err(SchedulerError::DuplicateJob(_)) => {
                    // Already registered; reconciliation is idempotent.
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(restored, "reconciled persisted jobs with scheduler");
        Ok(restored)
    }

    /// One monitoring tick for one job, invoked by the scheduler.
    ///
    /// Absorbs every failure mode: probe errors become a failing status,
    /// persistence errors are logged while the fresh in-memory status wins.
    async fn tick(&self, job_id: &str) {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = match self.store.get(job_id).await {
            Ok(Some(job)) if job.is_active => job,
            Ok(_) => {
                // The record is gone or soft-deleted; drop our trigger.
                self.scheduler.unschedule(job_id);
                return;
            }
            Err(e) => {
                warn!(job_id, error = %e, "tick: failed to load job, skipping check");
                return;
            }
        };

        let outcome = self
            .probe
            .check_comprehensive(&job.config.host_address, job.config.port)
            .await;

        let was_healthy = job.status.is_healthy();
        let had_checks = job.status.last_check.is_some();
        job.status.apply(&outcome, chrono::Utc::now());
        job.touch();

        if let Err(e) = self.store.upsert(&job).await {
            // Keep monitoring with the fresh in-memory status; durability of
            // a single tick is not worth stopping checks over.
            warn!(job_id, error = %e, "tick: failed to persist status update");
        }

        let wants_success = if outcome.is_healthy() {
            self.store
                .notify_on_success(job.owner_user_id)
                .await
                .unwrap_or_else(|e| {
                    warn!(job_id, error = %e, "tick: failed to read notification preference");
                    false
                })
        } else {
            false
        };

        if let Some(text) =
            render_notification(&job, &outcome, was_healthy, had_checks, wants_success)
        {
            self.sink.deliver(job.owner_user_id, text);
        }
    }

    fn tick_callback(self: &Arc<Self>) -> TickFn {
        let weak: Weak<MonitoringService> = Arc::downgrade(self);
        Arc::new(move |job_id: String| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(service) = weak.upgrade() {
                    service.tick(&job_id).await;
                }
            })
        })
    }

    async fn active_job(&self, job_id: &str) -> Result<HostJob, MonitorError> {
        match self.store.get(job_id).await? {
            Some(job) if job.is_active => Ok(job),
            _ => Err(MonitorError::NotFound(job_id.to_string())),
        }
    }

    fn job_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        self.job_locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn validate_host_address(&self, host: &str) -> Result<(), MonitorError> {
        if host.is_empty() {
            return Err(MonitorError::Validation(
                "host address must not be empty".to_string(),
            ));
        }
        if host.len() > MAX_HOST_ADDRESS_LEN {
            return Err(MonitorError::Validation(format!(
                "host address exceeds {MAX_HOST_ADDRESS_LEN} characters"
            )));
        }
        if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(MonitorError::Validation(
                "host address must not contain whitespace".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_interval(&self, interval_seconds: u64) -> Result<(), MonitorError> {
        let (min, max) = (
            self.limits.min_interval_seconds,
            self.limits.max_interval_seconds,
        );
        if interval_seconds < min || interval_seconds > max {
            return Err(MonitorError::Validation(format!(
                "interval must be between {min} and {max} seconds"
            )));
        }
        Ok(())
    }
}

/// Notification policy: every failing tick notifies (the transition into
/// failure and each continuation); successful ticks notify only when the
/// owner opted in. Never more than one message per tick.
fn render_notification(
    job: &HostJob,
    outcome: &ProbeOutcome,
    was_healthy: bool,
    had_checks: bool,
    wants_success: bool,
) -> Option<String> {
    let host = &job.config.host_address;
    let port = job.config.port;

    if !outcome.is_healthy() {
        let reason = if !outcome.is_online {
            "unreachable"
        } else {
            "port closed"
        };
        let prefix = if was_healthy || !had_checks {
            "ALERT"
        } else {
            "STILL DOWN"
        };
        Some(format!(
            "{prefix}: {host}:{port} is {reason} ({} consecutive failures)",
            job.status.consecutive_failures
        ))
    } else if wants_success {
        let rtt = outcome
            .response_time_ms
            .map(|ms| format!("{ms} ms"))
            .unwrap_or_else(|| "n/a".to_string());
        Some(format!("OK: {host}:{port} is up ({rtt})"))
    } else {
        None
    }
}

fn validate_port(port: u16) -> Result<(), MonitorError> {
    if port == 0 {
        return Err(MonitorError::Validation(
            "port must be between 1 and 65535".to_string(),
        ));
    }
    Ok(())
}
