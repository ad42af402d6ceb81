//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemorySignatureStore`, `MemoryJobStore`, and `MemoryScanCache`
//! that satisfy the trait contracts without any external dependencies.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::model::{FileHash, HashAlgorithm, JobStatus, ScanJob, ScanResult, Signature};
use crate::traits::{HashVisitor, JobStore, ScanResultCache, SignatureStore, StoreStats};

// ---------------------------------------------------------------------------
// MemorySignatureStore
// ---------------------------------------------------------------------------

/// In-memory signature store backed by an ordered `BTreeMap<key, record>`.
#[derive(Debug, Default)]
pub struct MemorySignatureStore {
    rows: Mutex<BTreeMap<String, Signature>>,
}

impl MemorySignatureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignatureStore for MemorySignatureStore {
    async fn put(&self, signature: &Signature) -> StoreResult<()> {
        self.batch_put(std::slice::from_ref(signature)).await
    }

    async fn get(&self, hash: &FileHash) -> StoreResult<Option<Signature>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&hash.storage_key()).cloned())
    }

    async fn batch_put(&self, signatures: &[Signature]) -> StoreResult<()> {
        // Validate every record before touching the map so a bad entry
        // cannot leave a half-written batch behind.
        let mut staged = Vec::new();
        for signature in signatures {
            for hash in signature.hashes()? {
                staged.push((hash.storage_key(), signature.clone()));
            }
        }
        let mut rows = self.rows.lock().unwrap();
        for (key, record) in staged {
            rows.insert(key, record);
        }
        Ok(())
    }

    async fn delete(&self, hash: &FileHash) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        rows.remove(&hash.storage_key());
        Ok(())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let rows = self.rows.lock().unwrap();
        let prefix = HashAlgorithm::Sha256.key_prefix();
        let signature_count = rows.keys().filter(|k| k.starts_with(&prefix)).count() as u64;
        Ok(StoreStats {
            signature_count,
            disk_bytes: 0,
        })
    }

    async fn for_each_hash(
        &self,
        algorithm: HashAlgorithm,
        visit: &mut HashVisitor<'_>,
    ) -> StoreResult<()> {
        let prefix = algorithm.key_prefix();
        let keys: Vec<String> = {
            let rows = self.rows.lock().unwrap();
            rows.range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in keys {
            visit(&key[prefix.len()..])?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

/// In-memory job store with a content-hash secondary index.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<JobStoreState>,
    fail_next_delete: AtomicBool,
}

#[derive(Debug, Default)]
struct JobStoreState {
    jobs: HashMap<Uuid, ScanJob>,
    by_hash: HashMap<String, Uuid>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot backend failure for the next `delete` call, so tests
    /// can exercise compensation paths around a failing delete.
    pub fn inject_delete_failure(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &ScanJob) -> StoreResult<()> {
        let mut state = self.inner.lock().unwrap();
        state.jobs.insert(job.id, job.clone());
        if let Some(hash) = &job.file_hash {
            state.by_hash.insert(hash.clone(), job.id);
        }
        Ok(())
    }

    async fn update(&self, job: &ScanJob) -> StoreResult<()> {
        let mut state = self.inner.lock().unwrap();
        if !state.jobs.contains_key(&job.id) {
            return Err(StoreError::JobNotFound(job.id));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<ScanJob>> {
        let state = self.inner.lock().unwrap();
        Ok(state.jobs.get(&id).cloned())
    }

    async fn get_by_file_hash(&self, sha256: &str) -> StoreResult<Option<ScanJob>> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .by_hash
            .get(sha256)
            .and_then(|id| state.jobs.get(id))
            .cloned())
    }

    async fn list(&self, statuses: &[JobStatus]) -> StoreResult<Vec<ScanJob>> {
        let state = self.inner.lock().unwrap();
        let mut jobs: Vec<ScanJob> = state
            .jobs
            .values()
            .filter(|j| statuses.is_empty() || statuses.contains(&j.status))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected delete failure".to_string()));
        }
        let mut state = self.inner.lock().unwrap();
        if let Some(job) = state.jobs.remove(&id) {
            // The index may already point at a newer job for this hash.
            if let Some(hash) = &job.file_hash {
                if state.by_hash.get(hash) == Some(&id) {
                    state.by_hash.remove(hash);
                }
            }
        }
        Ok(())
    }

    async fn cleanup(&self, max_age: Duration) -> StoreResult<usize> {
        let age = chrono::Duration::from_std(max_age)
            .map_err(|e| StoreError::Backend(format!("max_age out of range: {e}")))?;
        let cutoff = Utc::now() - age;

        let eligible: Vec<Uuid> = {
            let state = self.inner.lock().unwrap();
            state
                .jobs
                .values()
                .filter(|j| j.status.is_terminal())
                .filter(|j| j.completed_at.map(|t| t < cutoff).unwrap_or(false))
                .map(|j| j.id)
                .collect()
        };

        for id in &eligible {
            self.delete(*id).await?;
        }
        Ok(eligible.len())
    }
}

// ---------------------------------------------------------------------------
// MemoryScanCache
// ---------------------------------------------------------------------------

/// In-memory scan-result cache with per-entry expiry.
#[derive(Debug, Default)]
pub struct MemoryScanCache {
    rows: Mutex<HashMap<String, CacheEntry>>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ScanResult,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn live(&self) -> bool {
        self.expires_at.map(|t| t > Utc::now()).unwrap_or(true)
    }
}

impl MemoryScanCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanResultCache for MemoryScanCache {
    async fn put(&self, result: &ScanResult, ttl: Duration) -> StoreResult<()> {
        if result.sha256.is_empty() {
            return Err(StoreError::InvalidHash {
                value: String::new(),
                reason: "cache entries require a content hash".to_string(),
            });
        }
        let expires_at = if ttl.is_zero() {
            None
        } else {
            let ttl = chrono::Duration::from_std(ttl)
                .map_err(|e| StoreError::Backend(format!("ttl out of range: {e}")))?;
            Some(Utc::now() + ttl)
        };
        let mut rows = self.rows.lock().unwrap();
        rows.insert(
            result.sha256.clone(),
            CacheEntry {
                result: result.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, sha256: &str) -> StoreResult<Option<ScanResult>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(sha256)
            .filter(|e| e.live())
            .map(|e| e.result.clone()))
    }

    async fn delete(&self, sha256: &str) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        rows.remove(sha256);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        rows.clear();
        Ok(())
    }

    async fn count(&self) -> StoreResult<u64> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.values().filter(|e| e.live()).count() as u64)
    }
}
