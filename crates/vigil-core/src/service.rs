//! Transport-facing scan service facade.
//!
//! The HTTP/MQ layers talk to the core exclusively through this type:
//! hash lookups, upload submissions, and job polling.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_store::{FileHash, JobStore, ScanJob, ScanResult, ScanResultCache};

use crate::engine::{LookupEngine, LookupOutcome};
use crate::error::Result;
use crate::worker::ScanWorkerPool;

/// What the service knows about a content hash when polled.
#[derive(Debug, Clone)]
pub enum ScanRecord {
    /// A terminal result is cached for this hash.
    Cached(ScanResult),
    /// A job (possibly still in flight) exists for this hash.
    Job(ScanJob),
    /// Nothing known.
    Unknown,
}

/// The core's front door for transports.
pub struct ScanService {
    engine: Arc<LookupEngine>,
    jobs: Arc<dyn JobStore>,
    cache: Arc<dyn ScanResultCache>,
    pool: Arc<ScanWorkerPool>,
}

impl ScanService {
    pub fn new(
        engine: Arc<LookupEngine>,
        jobs: Arc<dyn JobStore>,
        cache: Arc<dyn ScanResultCache>,
        pool: Arc<ScanWorkerPool>,
    ) -> Self {
        ScanService {
            engine,
            jobs,
            cache,
            pool,
        }
    }

    /// Look a hash string up in the signature engine.
    ///
    /// Malformed strings fail with a structured error; an unknown hash is a
    /// verdict, not an error.
    pub async fn lookup_by_hash(&self, value: &str) -> Result<LookupOutcome> {
        let hash = FileHash::parse(value)?;
        self.engine.lookup(&hash).await
    }

    /// Accept an upload for asynchronous scanning.
    ///
    /// Deduplicates against in-flight jobs and cached results before
    /// enqueuing. When the queue is full the submission is rejected with
    /// [`crate::VigilError::QueueFull`] and the caller keeps ownership of
    /// the upload path.
    pub async fn submit_scan(
        &self,
        upload_path: PathBuf,
        file_name: &str,
        file_size: u64,
        sha256: &str,
    ) -> Result<ScanJob> {
        // An active job for this content already covers the request.
        if let Some(existing) = self.jobs.get_by_file_hash(sha256).await? {
            if !existing.status.is_terminal() {
                debug!(job_id = %existing.id, "submission joined active job");
                remove_upload_quietly(&upload_path).await;
                return Ok(existing);
            }
        }

        // A cached terminal result turns the submission into an
        // already-completed job.
        if let Some(cached) = self.cache.get(sha256).await? {
            let mut job = ScanJob::new(Some(sha256.to_string()), file_name, file_size);
            job.start()?;
            job.complete(cached)?;
            self.jobs.create(&job).await?;
            debug!(job_id = %job.id, "submission satisfied from cache");
            remove_upload_quietly(&upload_path).await;
            return Ok(job);
        }

        let job = ScanJob::new(Some(sha256.to_string()), file_name, file_size);
        self.jobs.create(&job).await?;

        if let Err(err) = self.pool.submit(job.id, upload_path) {
            // Undo the record so a retry is not mistaken for an active job.
            // The queue verdict must reach the caller even if the
            // compensating delete fails.
            if let Err(delete_err) = self.jobs.delete(job.id).await {
                warn!(job_id = %job.id, %delete_err, "rollback delete failed");
            }
            return Err(err);
        }

        info!(job_id = %job.id, file_name, "scan job enqueued");
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<ScanJob>> {
        Ok(self.jobs.get(id).await?)
    }

    /// Polling helper: prefer the cache, fall back to the job record.
    pub async fn get_cache_or_job(&self, sha256: &str) -> Result<ScanRecord> {
        if let Some(cached) = self.cache.get(sha256).await? {
            return Ok(ScanRecord::Cached(cached));
        }
        if let Some(job) = self.jobs.get_by_file_hash(sha256).await? {
            return Ok(ScanRecord::Job(job));
        }
        Ok(ScanRecord::Unknown)
    }

    pub fn queue_len(&self) -> usize {
        self.pool.queue_len()
    }
}

async fn remove_upload_quietly(path: &PathBuf) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), %err, "cannot remove upload file"),
    }
}
