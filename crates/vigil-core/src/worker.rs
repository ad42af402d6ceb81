//! Scan worker pool.
//!
//! A bounded FIFO queue of `(job id, upload path)` pairs serviced by a
//! fixed set of workers. Submission is non-blocking; a saturated buffer is
//! the caller's signal to reject the upload. Workers operate on cloned Arc
//! dependencies and never reach back into the pool's own state.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_store::{JobStore, ScanJob, ScanResult, ScanResultCache, Signature};

use crate::coordinator::ScanUpdateCoordinator;
use crate::engine::LookupEngine;
use crate::error::{Result, VigilError};
use crate::scanner::Scanner;

/// Source label for signatures minted from worker scan detections.
const SCAN_SOURCE: &str = "clamav-scan";

/// One queued scan request.
#[derive(Debug, Clone)]
pub struct QueuedScan {
    pub job_id: Uuid,
    pub upload_path: PathBuf,
}

/// Dependencies each worker task operates on.
///
/// Cloned Arcs only; the worker has no access to the pool's queue state.
#[derive(Clone)]
pub struct WorkerDeps {
    pub jobs: Arc<dyn JobStore>,
    pub cache: Arc<dyn ScanResultCache>,
    pub engine: Arc<LookupEngine>,
    /// Absent scanner: cache hits still complete; misses fail the job.
    pub scanner: Option<Arc<dyn Scanner>>,
    pub coordinator: ScanUpdateCoordinator,
}

/// Pool sizing and behavior.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// TTL applied to cache entries written by workers (zero = no expiry).
    pub cache_ttl: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig {
            workers: 4,
            queue_capacity: 64,
            cache_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// The scan worker pool.
pub struct ScanWorkerPool {
    config: WorkerPoolConfig,
    deps: WorkerDeps,
    tx: Mutex<Option<mpsc::Sender<QueuedScan>>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedScan>>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ScanWorkerPool {
    pub fn new(config: WorkerPoolConfig, deps: WorkerDeps) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        ScanWorkerPool {
            config,
            deps,
            tx: Mutex::new(Some(tx)),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the configured number of worker tasks.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap();
        if !handles.is_empty() {
            return;
        }
        for n in 0..self.config.workers.max(1) {
            let rx = Arc::clone(&self.rx);
            let deps = self.deps.clone();
            let cancel = self.cancel.clone();
            let cache_ttl = self.config.cache_ttl;
            handles.push(tokio::spawn(async move {
                worker_loop(n, rx, deps, cache_ttl, cancel).await;
            }));
        }
        info!(workers = self.config.workers, "scan worker pool started");
    }

    /// Enqueue a scan without blocking.
    ///
    /// Fails with [`VigilError::QueueFull`] when the buffer is saturated;
    /// the caller keeps ownership of the upload file in that case.
    pub fn submit(&self, job_id: Uuid, upload_path: PathBuf) -> Result<()> {
        let tx = self.tx.lock().unwrap();
        let Some(tx) = tx.as_ref() else {
            return Err(VigilError::QueueClosed);
        };
        match tx.try_send(QueuedScan {
            job_id,
            upload_path,
        }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(VigilError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(VigilError::QueueClosed),
        }
    }

    /// Current number of queued items.
    pub fn queue_len(&self) -> usize {
        let tx = self.tx.lock().unwrap();
        match tx.as_ref() {
            Some(tx) => tx.max_capacity() - tx.capacity(),
            None => 0,
        }
    }

    /// Signal cancellation, join workers, then close the queue.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().unwrap();
            handles.drain(..).collect()
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(%err, "scan worker panicked");
            }
        }

        self.tx.lock().unwrap().take();
        info!("scan worker pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedScan>>>,
    deps: WorkerDeps,
    cache_ttl: Duration,
    cancel: CancellationToken,
) {
    debug!(worker, "scan worker running");
    loop {
        let item = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                item = rx.recv() => item,
            }
        };
        let Some(item) = item else {
            break;
        };
        process_scan(&deps, cache_ttl, &cancel, item).await;
    }
    debug!(worker, "scan worker exited");
}

/// Run one queued scan to completion.
///
/// Ordering within a job: start → cache probe → (permit → scan → release)
/// → cache put → optional signature fold-in → complete.
async fn process_scan(
    deps: &WorkerDeps,
    cache_ttl: Duration,
    cancel: &CancellationToken,
    item: QueuedScan,
) {
    let mut job = match deps.jobs.get(item.job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!(job_id = %item.job_id, "queued job vanished from the store");
            return;
        }
        Err(err) => {
            warn!(job_id = %item.job_id, %err, "cannot load queued job");
            return;
        }
    };

    if let Err(err) = job.start() {
        warn!(job_id = %job.id, %err, "job not startable");
        return;
    }
    if let Err(err) = deps.jobs.update(&job).await {
        warn!(job_id = %job.id, %err, "cannot persist running job");
        return;
    }

    // Cache probe by content hash: a terminal result short-circuits the
    // scanner entirely.
    if let Some(hash) = job.file_hash.clone() {
        match deps.cache.get(&hash).await {
            Ok(Some(cached)) => {
                debug!(job_id = %job.id, hash = %&hash[..12.min(hash.len())], "cache hit");
                finish_job(deps, job, cached, &item.upload_path).await;
                return;
            }
            Ok(None) => {}
            Err(err) => warn!(job_id = %job.id, %err, "cache probe failed"),
        }
    }

    let Some(scanner) = deps.scanner.as_ref() else {
        fail_job(deps, job, "no scanner configured and no cached result").await;
        return;
    };

    // Scans and database updates exclude each other via the coordinator.
    let permit = match deps.coordinator.acquire_scan(cancel).await {
        Ok(permit) => permit,
        Err(err) => {
            fail_job(deps, job, format!("scan permission refused: {err}")).await;
            return;
        }
    };
    let result = scanner.scan_file(&item.upload_path, cancel).await;
    permit.release();

    if let Err(err) = deps.cache.put(&result, cache_ttl).await {
        warn!(job_id = %job.id, %err, "cannot cache scan result");
    }

    if result.is_infected() {
        fold_detection_into_engine(deps, &result).await;
    }

    finish_job(deps, job, result, &item.upload_path).await;
}

/// Record an infected result as a signature. Failures are logged and never
/// fail the scan job that produced the detection.
async fn fold_detection_into_engine(deps: &WorkerDeps, result: &ScanResult) {
    if result.sha256.is_empty() {
        return;
    }
    let mut signature = Signature::new(
        result.sha256.clone(),
        result.detection.clone(),
        SCAN_SOURCE,
    );
    signature.kind = result.kind;
    signature.severity = result.severity;

    match deps
        .engine
        .batch_add_signatures(std::slice::from_ref(&signature))
        .await
    {
        Ok(()) => debug!(detection = %signature.detection, "detection recorded as signature"),
        Err(err) => warn!(%err, "cannot record detection as signature"),
    }
}

async fn finish_job(deps: &WorkerDeps, mut job: ScanJob, result: ScanResult, upload: &PathBuf) {
    if let Err(err) = job.complete(result) {
        warn!(job_id = %job.id, %err, "cannot complete job");
        return;
    }
    if let Err(err) = deps.jobs.update(&job).await {
        warn!(job_id = %job.id, %err, "cannot persist completed job");
        return;
    }
    remove_upload(upload).await;
    debug!(job_id = %job.id, "job completed");
}

async fn fail_job(deps: &WorkerDeps, mut job: ScanJob, reason: impl Into<String>) {
    let reason = reason.into();
    if let Err(err) = job.fail(&reason) {
        warn!(job_id = %job.id, %err, "cannot fail job");
        return;
    }
    if let Err(err) = deps.jobs.update(&job).await {
        warn!(job_id = %job.id, %err, "cannot persist failed job");
    }
    debug!(job_id = %job.id, %reason, "job failed");
}

async fn remove_upload(path: &PathBuf) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), %err, "cannot remove upload file"),
    }
}
