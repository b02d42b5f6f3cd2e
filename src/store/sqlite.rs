//! SQLite-backed job store.
//!
//! One `host_jobs` table keyed by `job_id`, with an index covering the
//! per-owner queries. Schema is created on connect.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{JobStore, StoreError};
use crate::monitor::model::{HostConfig, HostJob, HostStatus};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS host_jobs (
    job_id TEXT PRIMARY KEY,
    owner_user_id INTEGER NOT NULL,
    host_address TEXT NOT NULL,
    interval_seconds INTEGER NOT NULL,
    port INTEGER NOT NULL,
    ssh_port INTEGER,
    ssh_username TEXT,
    encrypted_ssh_password TEXT,
    is_online INTEGER NOT NULL,
    port_open INTEGER NOT NULL,
    last_check TEXT,
    last_failure TEXT,
    response_time_ms INTEGER,
    consecutive_failures INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    is_active INTEGER NOT NULL
)
"#;

const CREATE_OWNER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_host_jobs_owner ON host_jobs (owner_user_id, is_active)";

const CREATE_PREFS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_prefs (
    user_id INTEGER PRIMARY KEY,
    notify_on_success INTEGER NOT NULL
)
"#;

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(StoreError::Database)?
            .create_if_missing(true);

        // A `:memory:` database exists per connection, so it must not be
        // spread across a pool.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_OWNER_INDEX).execute(&pool).await?;
        sqlx::query(CREATE_PREFS_TABLE).execute(&pool).await?;

        Ok(Self { pool })
    }
}

fn job_from_row(row: &SqliteRow) -> Result<HostJob, StoreError> {
    let job_id: String = row.try_get("job_id")?;
    let corrupt = |reason: &str| StoreError::Corrupt {
        job_id: job_id.clone(),
        reason: reason.to_string(),
    };

    let port: i64 = row.try_get("port")?;
    let port = u16::try_from(port).map_err(|_| corrupt("port out of range"))?;
    let ssh_port: Option<i64> = row.try_get("ssh_port")?;
    let ssh_port = ssh_port
        .map(u16::try_from)
        .transpose()
        .map_err(|_| corrupt("ssh_port out of range"))?;
    let interval_seconds: i64 = row.try_get("interval_seconds")?;
    let interval_seconds =
        u64::try_from(interval_seconds).map_err(|_| corrupt("negative interval"))?;
    let consecutive_failures: i64 = row.try_get("consecutive_failures")?;
    let consecutive_failures =
        u32::try_from(consecutive_failures).map_err(|_| corrupt("negative failure count"))?;
    let response_time_ms: Option<i64> = row.try_get("response_time_ms")?;
    let response_time_ms = response_time_ms
        .map(u32::try_from)
        .transpose()
        .map_err(|_| corrupt("response_time_ms out of range"))?;

    Ok(HostJob {
        owner_user_id: row.try_get("owner_user_id")?,
        config: HostConfig {
            host_address: row.try_get("host_address")?,
            interval_seconds,
            port,
            ssh_port,
            ssh_username: row.try_get("ssh_username")?,
            encrypted_ssh_password: row.try_get("encrypted_ssh_password")?,
        },
        status: HostStatus {
            is_online: row.try_get("is_online")?,
            port_open: row.try_get("port_open")?,
            last_check: row.try_get::<Option<DateTime<Utc>>, _>("last_check")?,
            last_failure: row.try_get::<Option<DateTime<Utc>>, _>("last_failure")?,
            response_time_ms,
            consecutive_failures,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_active: row.try_get("is_active")?,
        job_id,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<HostJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM host_jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn upsert(&self, job: &HostJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO host_jobs (
                job_id, owner_user_id, host_address, interval_seconds, port,
                ssh_port, ssh_username, encrypted_ssh_password,
                is_online, port_open, last_check, last_failure,
                response_time_ms, consecutive_failures,
                created_at, updated_at, is_active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                owner_user_id = excluded.owner_user_id,
                host_address = excluded.host_address,
                interval_seconds = excluded.interval_seconds,
                port = excluded.port,
                ssh_port = excluded.ssh_port,
                ssh_username = excluded.ssh_username,
                encrypted_ssh_password = excluded.encrypted_ssh_password,
                is_online = excluded.is_online,
                port_open = excluded.port_open,
                last_check = excluded.last_check,
                last_failure = excluded.last_failure,
                response_time_ms = excluded.response_time_ms,
                consecutive_failures = excluded.consecutive_failures,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                is_active = excluded.is_active
            "#,
        )
        .bind(&job.job_id)
        .bind(job.owner_user_id)
        .bind(&job.config.host_address)
        .bind(job.config.interval_seconds as i64)
        .bind(i64::from(job.config.port))
        .bind(job.config.ssh_port.map(i64::from))
        .bind(&job.config.ssh_username)
        .bind(&job.config.encrypted_ssh_password)
        .bind(job.status.is_online)
        .bind(job.status.port_open)
        .bind(job.status.last_check)
        .bind(job.status.last_failure)
        .bind(job.status.response_time_ms.map(i64::from))
        .bind(i64::from(job.status.consecutive_failures))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn soft_delete(&self, job_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE host_jobs SET is_active = 0, updated_at = ? WHERE job_id = ? AND is_active = 1",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_by_owner(&self, owner_user_id: i64) -> Result<Vec<HostJob>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM host_jobs WHERE owner_user_id = ? ORDER BY created_at")
                .bind(owner_user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn list_active(&self) -> Result<Vec<HostJob>, StoreError> {
        let rows = sqlx::query("SELECT * FROM host_jobs WHERE is_active = 1 ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn find_active(
        &self,
        owner_user_id: i64,
        host_address: &str,
    ) -> Result<Option<HostJob>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM host_jobs WHERE owner_user_id = ? AND host_address = ? AND is_active = 1",
        )
        .bind(owner_user_id)
        .bind(host_address)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn count_active_for_owner(&self, owner_user_id: i64) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM host_jobs WHERE owner_user_id = ? AND is_active = 1",
        )
        .bind(owner_user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn notify_on_success(&self, owner_user_id: i64) -> Result<bool, StoreError> {
        let enabled: Option<bool> =
            sqlx::query_scalar("SELECT notify_on_success FROM user_prefs WHERE user_id = ?")
                .bind(owner_user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(enabled.unwrap_or(false))
    }

    async fn set_notify_on_success(
        &self,
        owner_user_id: i64,
        enabled: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_prefs (user_id, notify_on_success) VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET notify_on_success = excluded.notify_on_success
            "#,
        )
        .bind(owner_user_id)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeOutcome;

    async fn store() -> SqliteJobStore {
        SqliteJobStore::connect("sqlite::memory:").await.unwrap()
    }

    fn job_for(owner: i64, host: &str) -> HostJob {
        HostJob::new(
            owner,
            HostConfig {
                host_address: host.to_string(),
                interval_seconds: 600,
                port: 443,
                ssh_port: Some(22),
                ssh_username: Some("deploy".to_string()),
                encrypted_ssh_password: Some("aabbcc".to_string()),
            },
        )
    }

    #[tokio::test]
    async fn upsert_and_get_round_trip() {
        let store = store().await;
        let mut job = job_for(7, "example.org");
        job.status.apply(
            &ProbeOutcome {
                is_online: false,
                port_open: false,
                response_time_ms: None,
            },
            Utc::now(),
        );
        store.upsert(&job).await.unwrap();

        let fetched = store.get(&job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.config, job.config);
        assert_eq!(fetched.status.consecutive_failures, 1);
        assert_eq!(fetched.status.last_failure, job.status.last_failure);
        assert_eq!(fetched.owner_user_id, 7);
        assert!(fetched.is_active);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_record() {
        let store = store().await;
        let mut job = job_for(1, "example.org");
        store.upsert(&job).await.unwrap();

        job.config.interval_seconds = 1200;
        job.touch();
        store.upsert(&job).await.unwrap();

        let fetched = store.get(&job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.config.interval_seconds, 1200);
        assert_eq!(store.list_by_owner(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn soft_delete_transitions_exactly_once() {
        let store = store().await;
        let job = job_for(1, "example.org");
        store.upsert(&job).await.unwrap();

        assert!(store.soft_delete(&job.job_id).await.unwrap());
        assert!(!store.soft_delete(&job.job_id).await.unwrap());
        assert!(!store.soft_delete("missing").await.unwrap());

        // Record survives for history but leaves every active view.
        assert!(!store.get(&job.job_id).await.unwrap().unwrap().is_active);
        assert!(store.list_active().await.unwrap().is_empty());
        assert_eq!(store.find_active(1, "example.org").await.unwrap(), None);
        assert_eq!(store.count_active_for_owner(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn active_queries_are_scoped() {
        let store = store().await;
        store.upsert(&job_for(1, "a.example")).await.unwrap();
        store.upsert(&job_for(1, "b.example")).await.unwrap();
        store.upsert(&job_for(2, "a.example")).await.unwrap();

        assert_eq!(store.count_active_for_owner(1).await.unwrap(), 2);
        assert_eq!(store.list_active().await.unwrap().len(), 3);

        let found = store.find_active(2, "a.example").await.unwrap().unwrap();
        assert_eq!(found.owner_user_id, 2);
    }

    #[tokio::test]
    async fn notify_preference_is_stored_per_user() {
        let store = store().await;
        assert!(!store.notify_on_success(7).await.unwrap());

        store.set_notify_on_success(7, true).await.unwrap();
        assert!(store.notify_on_success(7).await.unwrap());
        assert!(!store.notify_on_success(8).await.unwrap());

        store.set_notify_on_success(7, false).await.unwrap();
        assert!(!store.notify_on_success(7).await.unwrap());
    }
}
