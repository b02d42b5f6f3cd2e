//! In-memory store, used by the test suite and as the daemon's fallback
//! when no database is configured.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{JobStore, StoreError};
use crate::monitor::model::HostJob;

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, HostJob>,
    notify_on_success: DashMap<i64, bool>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<HostJob>, StoreError> {
        Ok(self.jobs.get(job_id).map(|e| e.value().clone()))
    }

    async fn upsert(&self, job: &HostJob) -> Result<(), StoreError> {
        self.jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn soft_delete(&self, job_id: &str) -> Result<bool, StoreError> {
        match self.jobs.get_mut(job_id) {
            Some(mut entry) if entry.is_active => {
                entry.is_active = false;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_owner(&self, owner_user_id: i64) -> Result<Vec<HostJob>, StoreError> {
        let mut jobs: Vec<HostJob> = self
            .jobs
            .iter()
            .filter(|e| e.owner_user_id == owner_user_id)
            .map(|e| e.value().clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn list_active(&self) -> Result<Vec<HostJob>, StoreError> {
        let mut jobs: Vec<HostJob> = self
            .jobs
            .iter()
            .filter(|e| e.is_active)
            .map(|e| e.value().clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn find_active(
        &self,
        owner_user_id: i64,
        host_address: &str,
    ) -> Result<Option<HostJob>, StoreError> {
        Ok(self
            .jobs
            .iter()
            .find(|e| {
                e.is_active
                    && e.owner_user_id == owner_user_id
                    && e.config.host_address == host_address
            })
            .map(|e| e.value().clone()))
    }

    async fn count_active_for_owner(&self, owner_user_id: i64) -> Result<usize, StoreError> {
        Ok(self
            .jobs
            .iter()
            .filter(|e| e.is_active && e.owner_user_id == owner_user_id)
            .count())
    }

    async fn notify_on_success(&self, owner_user_id: i64) -> Result<bool, StoreError> {
        Ok(self
            .notify_on_success
            .get(&owner_user_id)
            .map(|e| *e)
            .unwrap_or(false))
    }

    async fn set_notify_on_success(
        &self,
        owner_user_id: i64,
        enabled: bool,
    ) -> Result<(), StoreError> {
        self.notify_on_success.insert(owner_user_id, enabled);
        Ok(())
    }
}
