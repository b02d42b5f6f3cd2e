//! Typed repository interface over the job records.
//!
//! The monitoring service depends only on [`JobStore`]; the SQLite and
//! in-memory backends implement it once each.

use async_trait::async_trait;
use thiserror::Error;

use crate::monitor::model::HostJob;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record for job {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, job_id: &str) -> Result<Option<HostJob>, StoreError>;

    /// Inserts or fully replaces the record keyed by `job.job_id`.
    async fn upsert(&self, job: &HostJob) -> Result<(), StoreError>;

    /// Marks a job inactive, keeping the record for history. Returns true
    /// only when an active job transitioned to inactive.
    async fn soft_delete(&self, job_id: &str) -> Result<bool, StoreError>;

    /// All records for an owner, active and soft-deleted alike.
    async fn list_by_owner(&self, owner_user_id: i64) -> Result<Vec<HostJob>, StoreError>;

    async fn list_active(&self) -> Result<Vec<HostJob>, StoreError>;

    /// The active job for an `(owner, host)` pair, if one exists.
    async fn find_active(
        &self,
        owner_user_id: i64,
        host_address: &str,
    ) -> Result<Option<HostJob>, StoreError>;

    async fn count_active_for_owner(&self, owner_user_id: i64) -> Result<usize, StoreError>;

    /// Whether an owner opted into success notifications. Unset reads false.
    async fn notify_on_success(&self, owner_user_id: i64) -> Result<bool, StoreError>;

    async fn set_notify_on_success(
        &self,
        owner_user_id: i64,
        enabled: bool,
    ) -> Result<(), StoreError>;
}
