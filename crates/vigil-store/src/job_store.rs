//! SurrealDB-backed [`JobStore`] implementation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;
use uuid::Uuid;

use crate::connect;
use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::model::{JobStatus, ScanJob};
use crate::schema::JobRow;
use crate::traits::JobStore;

/// Projection row for cleanup id collection.
#[derive(Debug, serde::Deserialize)]
struct JobIdRow {
    job_id: String,
}

/// SurrealDB-backed implementation of [`JobStore`].
pub struct SurrealJobStore {
    db: Surreal<Any>,
}

impl SurrealJobStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StoreResult<Self> {
        let db = connect::connect_memory().await?;
        migrations::init_jobs_table(&db).await?;
        Ok(Self { db })
    }

    /// Open (or create) a durable store rooted at `dir`.
    pub async fn open(dir: &Path) -> StoreResult<Self> {
        let db = connect::connect_dir(dir).await?;
        migrations::init_jobs_table(&db).await?;
        Ok(Self { db })
    }

    async fn fetch(&self, id: &str) -> StoreResult<Option<JobRow>> {
        let id_owned = id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM jobs WHERE job_id = $id")
            .bind(("id", id_owned))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let rows: Vec<JobRow> = res
            .take(0)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl JobStore for SurrealJobStore {
    async fn create(&self, job: &ScanJob) -> StoreResult<()> {
        let row = JobRow::from_job(job);
        debug!(job_id = %job.id, "creating job");

        let _created: Option<JobRow> = self
            .db
            .create("jobs")
            .content(row)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn update(&self, job: &ScanJob) -> StoreResult<()> {
        if self.fetch(&job.id.to_string()).await?.is_none() {
            return Err(StoreError::JobNotFound(job.id));
        }

        let row = JobRow::from_job(job);
        let id_owned = job.id.to_string();

        self.db
            .query("UPDATE jobs CONTENT $row WHERE job_id = $id")
            .bind(("row", row))
            .bind(("id", id_owned))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<ScanJob>> {
        Ok(self.fetch(&id.to_string()).await?.map(|r| r.job))
    }

    async fn get_by_file_hash(&self, sha256: &str) -> StoreResult<Option<ScanJob>> {
        let hash_owned = sha256.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM jobs WHERE file_hash = $hash ORDER BY created_at DESC LIMIT 1")
            .bind(("hash", hash_owned))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let rows: Vec<JobRow> = res
            .take(0)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.into_iter().next().map(|r| r.job))
    }

    async fn list(&self, statuses: &[JobStatus]) -> StoreResult<Vec<ScanJob>> {
        let rows: Vec<JobRow> = if statuses.is_empty() {
            let mut res = self
                .db
                .query("SELECT * FROM jobs ORDER BY created_at DESC")
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            res.take(0)
                .map_err(|e| StoreError::Backend(e.to_string()))?
        } else {
            let wanted: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            let mut res = self
                .db
                .query("SELECT * FROM jobs WHERE status IN $statuses ORDER BY created_at DESC")
                .bind(("statuses", wanted))
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            res.take(0)
                .map_err(|e| StoreError::Backend(e.to_string()))?
        };

        Ok(rows.into_iter().map(|r| r.job).collect())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let id_owned = id.to_string();
        self.db
            .query("DELETE jobs WHERE job_id = $id")
            .bind(("id", id_owned))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn cleanup(&self, max_age: Duration) -> StoreResult<usize> {
        let age = chrono::Duration::from_std(max_age)
            .map_err(|e| StoreError::Backend(format!("max_age out of range: {e}")))?;
        let cutoff = surrealdb::sql::Datetime::from(Utc::now() - age);

        // Collect eligible ids first, then delete, so the count reported
        // matches what was actually removed.
        let terminal = vec![
            JobStatus::Completed.as_str().to_string(),
            JobStatus::Failed.as_str().to_string(),
        ];
        let mut res = self
            .db
            .query(
                "SELECT job_id FROM jobs \
                 WHERE status IN $statuses AND completed_at != NONE AND completed_at < $cutoff",
            )
            .bind(("statuses", terminal))
            .bind(("cutoff", cutoff))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let rows: Vec<JobIdRow> = res
            .take(0)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if rows.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = rows.into_iter().map(|r| r.job_id).collect();
        let count = ids.len();

        self.db
            .query("DELETE jobs WHERE job_id IN $ids")
            .bind(("ids", ids))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        debug!(deleted = count, "job cleanup");
        Ok(count)
    }
}
