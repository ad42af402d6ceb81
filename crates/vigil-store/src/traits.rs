//! Storage trait definitions for Vigil.
//!
//! These traits define the durable-state abstractions:
//! - `SignatureStore`: hash-keyed signature records with alias fan-out
//! - `JobStore`: scan job lifecycle records with a content-hash index
//! - `ScanResultCache`: TTL'd cache of terminal scan results
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::model::{FileHash, HashAlgorithm, JobStatus, ScanJob, ScanResult, Signature};

/// Size and cardinality snapshot of a signature store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Count of primary (sha256-keyed) records.
    pub signature_count: u64,
    /// Bytes on disk, 0 for in-memory backends.
    pub disk_bytes: u64,
}

/// Callback used to walk one algorithm's keyspace.
///
/// Receives the bare hex string (prefix stripped). Returning an error
/// aborts the walk and surfaces the error to the caller.
pub type HashVisitor<'a> = dyn FnMut(&str) -> StoreResult<()> + Send + 'a;

/// Durable signature storage.
///
/// Guarantees:
/// - `put` persists the identical record under every populated hash key
///   in one transaction; lookup by any alias yields the same record.
/// - Absence is `Ok(None)`, never an error.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Persist one signature under all of its hash keys.
    async fn put(&self, signature: &Signature) -> StoreResult<()>;

    /// Fetch a signature by any of its hash keys.
    async fn get(&self, hash: &FileHash) -> StoreResult<Option<Signature>>;

    /// Persist many signatures in a single write batch.
    async fn batch_put(&self, signatures: &[Signature]) -> StoreResult<()>;

    /// Remove the record stored under exactly this key. Alias keys of the
    /// same logical record are left in place (deletion is a test-only
    /// affordance).
    async fn delete(&self, hash: &FileHash) -> StoreResult<()>;

    /// Count of primary records plus on-disk footprint.
    async fn stats(&self) -> StoreResult<StoreStats>;

    /// Walk every stored hex string of one algorithm's keyspace.
    async fn for_each_hash(
        &self,
        algorithm: HashAlgorithm,
        visit: &mut HashVisitor<'_>,
    ) -> StoreResult<()>;
}

/// Durable scan job storage with a content-hash secondary index.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job; the content-hash index entry is written in the
    /// same transaction when the job carries a hash.
    async fn create(&self, job: &ScanJob) -> StoreResult<()>;

    /// Rewrite an existing job record. The content hash is immutable after
    /// creation, so the index needs no maintenance here.
    async fn update(&self, job: &ScanJob) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<ScanJob>>;

    /// Most recent job for a content hash, if any.
    async fn get_by_file_hash(&self, sha256: &str) -> StoreResult<Option<ScanJob>>;

    /// List jobs, optionally filtered to a set of statuses (empty = all).
    async fn list(&self, statuses: &[JobStatus]) -> StoreResult<Vec<ScanJob>>;

    async fn delete(&self, id: Uuid) -> StoreResult<()>;

    /// Delete terminal jobs whose completion is older than `max_age`.
    /// Returns the number deleted.
    async fn cleanup(&self, max_age: Duration) -> StoreResult<usize>;
}

/// Content-hash-keyed cache of terminal scan results.
#[async_trait]
pub trait ScanResultCache: Send + Sync {
    /// Insert or replace the entry for the result's content hash.
    /// A zero `ttl` disables expiry for this entry.
    async fn put(&self, result: &ScanResult, ttl: Duration) -> StoreResult<()>;

    /// Fetch by content hash. Expired entries are never returned.
    async fn get(&self, sha256: &str) -> StoreResult<Option<ScanResult>>;

    async fn delete(&self, sha256: &str) -> StoreResult<()>;

    async fn clear(&self) -> StoreResult<()>;

    /// Number of live (non-expired) entries.
    async fn count(&self) -> StoreResult<u64>;
}
