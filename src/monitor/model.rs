//! Persistent data model for monitored hosts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::probe::ProbeOutcome;

/// Configuration for one monitored target. Mutated only through the
/// monitoring service, which enforces the bounds from [`crate::config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub host_address: String,
    pub interval_seconds: u64,
    pub port: u16,
    pub ssh_port: Option<u16>,
    pub ssh_username: Option<String>,
    /// Sealed by the credential vault; plaintext is never persisted.
    pub encrypted_ssh_password: Option<String>,
}

/// Latest observed state of a monitored host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostStatus {
    pub is_online: bool,
    pub port_open: bool,
    pub last_check: Option<DateTime<Utc>>,
    /// Timestamp of the most recent failing check. Deliberately retained
    /// after recovery so the failure history stays visible in listings.
    pub last_failure: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u32>,
    pub consecutive_failures: u32,
}

impl HostStatus {
    pub fn is_healthy(&self) -> bool {
        self.is_online && self.port_open
    }

    /// Folds one probe outcome into the status.
    ///
    /// A fully successful check resets `consecutive_failures` to zero and
    /// leaves `last_failure` untouched; any failing check increments the
    /// counter and stamps `last_failure` with the tick's timestamp.
    pub fn apply(&mut self, outcome: &ProbeOutcome, now: DateTime<Utc>) {
        self.is_online = outcome.is_online;
        self.port_open = outcome.port_open;
        self.last_check = Some(now);
        self.response_time_ms = outcome.response_time_ms;

        if outcome.is_healthy() {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.last_failure = Some(now);
        }
    }
}

/// One monitored host owned by one user. At most one active job exists per
/// `(owner_user_id, host_address)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostJob {
    pub job_id: String,
    pub owner_user_id: i64,
    pub config: HostConfig,
    pub status: HostStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// False means soft-deleted: excluded from scheduling and listings but
    /// retained for history.
    pub is_active: bool,
}

impl HostJob {
    pub fn new(owner_user_id: i64, config: HostConfig) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            owner_user_id,
            config,
            status: HostStatus::default(),
            created_at: now,
            updated_at: now,
            is_active: true,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn failing_outcome() -> ProbeOutcome {
        ProbeOutcome {
            is_online: false,
            port_open: false,
            response_time_ms: None,
        }
    }

    fn healthy_outcome() -> ProbeOutcome {
        ProbeOutcome {
            is_online: true,
            port_open: true,
            response_time_ms: Some(12),
        }
    }

    #[test]
    fn new_job_starts_inert_and_active() {
        let job = HostJob::new(
            1,
            HostConfig {
                host_address: "10.0.0.5".to_string(),
                interval_seconds: 120,
                port: 443,
                ssh_port: None,
                ssh_username: None,
                encrypted_ssh_password: None,
            },
        );

        assert!(job.is_active);
        assert!(!job.status.is_online);
        assert_eq!(job.status.consecutive_failures, 0);
        assert_eq!(job.status.last_failure, None);
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn failures_increment_and_stamp_last_failure() {
        let mut status = HostStatus::default();
        let t1 = Utc::now();
        let t2 = t1 + ChronoDuration::seconds(120);
        let t3 = t2 + ChronoDuration::seconds(120);

        status.apply(&failing_outcome(), t1);
        status.apply(&failing_outcome(), t2);
        status.apply(&failing_outcome(), t3);

        assert_eq!(status.consecutive_failures, 3);
        // last_failure tracks the latest failing tick, not the first.
        assert_eq!(status.last_failure, Some(t3));
        assert_eq!(status.last_check, Some(t3));
    }

    #[test]
    fn success_resets_counter_but_keeps_last_failure() {
        let mut status = HostStatus::default();
        let t1 = Utc::now();
        let t2 = t1 + ChronoDuration::seconds(120);
        let t3 = t2 + ChronoDuration::seconds(120);

        status.apply(&healthy_outcome(), t1);
        status.apply(&failing_outcome(), t2);
        status.apply(&healthy_outcome(), t3);

        assert_eq!(status.consecutive_failures, 0);
        assert!(status.is_healthy());
        // The failure at t2 stays on record after recovery.
        assert_eq!(status.last_failure, Some(t2));
        assert_eq!(status.response_time_ms, Some(12));
    }

    #[test]
    fn open_port_alone_is_not_healthy() {
        let mut status = HostStatus::default();
        let now = Utc::now();
        status.apply(
            &ProbeOutcome {
                is_online: false,
                port_open: true,
                response_time_ms: None,
            },
            now,
        );

        assert!(!status.is_healthy());
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.last_failure, Some(now));
    }
}
