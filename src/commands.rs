//! User-facing command surface.
//!
//! Maps the abstract commands (add/remove/list/set-interval/set-port/
//! list-failures) onto the monitoring service and renders replies. Every
//! command either confirms the resulting state or gives a specific reason
//! for rejection; internal errors are masked for non-admin callers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::error;

use crate::monitor::model::HostJob;
use crate::monitor::service::{MonitorError, MonitoringService};

pub struct CommandHandler {
    service: Arc<MonitoringService>,
}

impl CommandHandler {
    pub fn new(service: Arc<MonitoringService>) -> Self {
        Self { service }
    }

    pub async fn add_host(
        &self,
        user_id: i64,
        host: &str,
        interval_seconds: u64,
        port: Option<u16>,
    ) -> String {
        match self
            .service
            .add_host(user_id, host, interval_seconds, port)
            .await
        {
            Ok(job) => format!(
                "Monitoring {}:{} every {}s.",
                job.config.host_address, job.config.port, job.config.interval_seconds
            ),
            Err(e) => self.render_error(user_id, e),
        }
    }

    pub async fn remove_host(&self, user_id: i64, host: &str) -> String {
        let job = match self.service.find_host(user_id, host).await {
            Ok(Some(job)) => job,
            Ok(None) => return format!("You are not monitoring '{host}'."),
            Err(e) => return self.render_error(user_id, e),
        };
        match self.service.remove_host(&job.job_id).await {
            Ok(true) => format!("Stopped monitoring {host}."),
            Ok(false) => format!("You are not monitoring '{host}'."),
            Err(e) => self.render_error(user_id, e),
        }
    }

    pub async fn list_hosts(&self, user_id: i64, all: bool) -> String {
        match self.service.list_jobs(user_id, all).await {
            Ok(jobs) if jobs.is_empty() => "No hosts are being monitored.".to_string(),
            Ok(jobs) => jobs.iter().map(describe_job).collect::<Vec<_>>().join("\n"),
            Err(e) => self.render_error(user_id, e),
        }
    }

    pub async fn set_interval(&self, user_id: i64, host: &str, interval_seconds: u64) -> String {
        let job = match self.service.find_host(user_id, host).await {
            Ok(Some(job)) => job,
            Ok(None) => return format!("You are not monitoring '{host}'."),
            Err(e) => return self.render_error(user_id, e),
        };
        match self
            .service
            .update_interval(&job.job_id, interval_seconds)
            .await
        {
            Ok(job) => format!(
                "{} is now checked every {}s.",
                job.config.host_address, job.config.interval_seconds
            ),
            Err(e) => self.render_error(user_id, e),
        }
    }

    pub async fn set_port(&self, user_id: i64, host: &str, port: u16) -> String {
        let job = match self.service.find_host(user_id, host).await {
            Ok(Some(job)) => job,
            Ok(None) => return format!("You are not monitoring '{host}'."),
            Err(e) => return self.render_error(user_id, e),
        };
        match self.service.set_port(&job.job_id, port).await {
            Ok(job) => format!(
                "{} is now checked on port {}.",
                job.config.host_address, job.config.port
            ),
            Err(e) => self.render_error(user_id, e),
        }
    }

    pub async fn list_failures(&self, user_id: i64) -> String {
        match self.service.list_failures(user_id).await {
            Ok(jobs) if jobs.is_empty() => "No failures on record.".to_string(),
            Ok(jobs) => jobs
                .iter()
                .map(|job| {
                    format!(
                        "{}:{} — last failure {}, {} consecutive",
                        job.config.host_address,
                        job.config.port,
                        job.status
                            .last_failure
                            .map(format_time)
                            .unwrap_or_else(|| "unknown".to_string()),
                        job.status.consecutive_failures
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => self.render_error(user_id, e),
        }
    }

    fn render_error(&self, user_id: i64, err: MonitorError) -> String {
        match &err {
            MonitorError::Validation(_)
            | MonitorError::DuplicateHost { .. }
            | MonitorError::QuotaExceeded { .. }
            | MonitorError::NotFound(_) => err.to_string(),
            // Internal failures are never shown verbatim to ordinary users.
            _ => {
                error!(user_id, error = %err, "command failed");
                if self.service.is_admin(user_id) {
                    format!("internal error: {err}")
                } else {
                    "Something went wrong on our side, please try again later.".to_string()
                }
            }
        }
    }
}

fn describe_job(job: &HostJob) -> String {
    let state = if job.status.last_check.is_none() {
        "PENDING".to_string()
    } else if job.status.is_healthy() {
        match job.status.response_time_ms {
            Some(ms) => format!("UP ({ms} ms)"),
            None => "UP".to_string(),
        }
    } else {
        format!("DOWN ({} consecutive failures)", job.status.consecutive_failures)
    };
    format!(
        "{}:{} every {}s — {}",
        job.config.host_address, job.config.port, job.config.interval_seconds, state
    )
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorLimits;
    use crate::notifications::NotificationSink;
    use crate::probe::{HostProbe, ProbeOutcome};
    use crate::scheduler::JobScheduler;
    use crate::store::{JobStore, MemoryJobStore, StoreError};
    use async_trait::async_trait;
    use crate::monitor::model::HostJob as Job;

    struct HealthyProbe;

    #[async_trait]
    impl HostProbe for HealthyProbe {
        async fn check_comprehensive(&self, _host: &str, _port: u16) -> ProbeOutcome {
            ProbeOutcome {
                is_online: true,
                port_open: true,
                response_time_ms: Some(5),
            }
        }
    }

    struct NullSink;

    impl NotificationSink for NullSink {
        fn deliver(&self, _recipient_id: i64, _text: String) {}
    }

    /// Store whose every operation fails, for exercising error masking.
    struct BrokenStore;

    #[async_trait]
    impl JobStore for BrokenStore {
        async fn get(&self, _job_id: &str) -> Result<Option<Job>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
        async fn upsert(&self, _job: &Job) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
        async fn soft_delete(&self, _job_id: &str) -> Result<bool, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
        async fn list_by_owner(&self, _owner: i64) -> Result<Vec<Job>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
        async fn list_active(&self) -> Result<Vec<Job>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
        async fn find_active(&self, _owner: i64, _host: &str) -> Result<Option<Job>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
        async fn count_active_for_owner(&self, _owner: i64) -> Result<usize, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
        async fn notify_on_success(&self, _owner: i64) -> Result<bool, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
        async fn set_notify_on_success(&self, _owner: i64, _enabled: bool) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
    }

    fn handler_with_store(store: Arc<dyn JobStore>, limits: MonitorLimits) -> CommandHandler {
        let service = MonitoringService::new(
            store,
            Arc::new(JobScheduler::new()),
            Arc::new(HealthyProbe),
            Arc::new(NullSink),
            None,
            limits,
        );
        CommandHandler::new(service)
    }

    fn handler() -> CommandHandler {
        handler_with_store(Arc::new(MemoryJobStore::new()), MonitorLimits::default())
    }

    #[tokio::test]
    async fn add_then_list_round_trip() {
        let handler = handler();

        let reply = handler.add_host(1, "example.org", 300, Some(443)).await;
        assert_eq!(reply, "Monitoring example.org:443 every 300s.");

        let listing = handler.list_hosts(1, false).await;
        assert!(listing.contains("example.org:443"));
        assert!(listing.contains("PENDING"));
    }

    #[tokio::test]
    async fn rejections_carry_specific_reasons() {
        let handler = handler();
        handler.add_host(1, "example.org", 300, None).await;

        let reply = handler.add_host(1, "example.org", 300, None).await;
        assert!(reply.contains("already being monitored"));

        let reply = handler.add_host(1, "example.org", 10, None).await;
        assert!(reply.contains("interval must be between"));

        let reply = handler.remove_host(1, "unknown.example").await;
        assert_eq!(reply, "You are not monitoring 'unknown.example'.");

        let reply = handler.set_interval(1, "unknown.example", 300).await;
        assert_eq!(reply, "You are not monitoring 'unknown.example'.");
    }

    #[tokio::test]
    async fn remove_and_set_commands_resolve_hosts_by_name() {
        let handler = handler();
        handler.add_host(1, "example.org", 300, None).await;

        let reply = handler.set_interval(1, "example.org", 600).await;
        assert_eq!(reply, "example.org is now checked every 600s.");

        let reply = handler.set_port(1, "example.org", 8080).await;
        assert_eq!(reply, "example.org is now checked on port 8080.");

        let reply = handler.remove_host(1, "example.org").await;
        assert_eq!(reply, "Stopped monitoring example.org.");
        assert_eq!(handler.list_hosts(1, false).await, "No hosts are being monitored.");
    }

    #[tokio::test]
    async fn empty_failure_listing_reads_cleanly() {
        let handler = handler();
        assert_eq!(handler.list_failures(1).await, "No failures on record.");
    }

    #[tokio::test]
    async fn internal_errors_are_masked_for_ordinary_users() {
        let mut limits = MonitorLimits::default();
        limits.admin_user_ids = vec![99];
        let handler = handler_with_store(Arc::new(BrokenStore), limits);

        let reply = handler.add_host(1, "example.org", 300, None).await;
        assert_eq!(
            reply,
            "Something went wrong on our side, please try again later."
        );
        assert!(!reply.contains("pool"));

        // Admins get the diagnostic detail.
        let reply = handler.add_host(99, "example.org", 300, None).await;
        assert!(reply.starts_with("internal error:"));
    }
}
