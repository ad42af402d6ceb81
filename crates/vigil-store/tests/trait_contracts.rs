//! Trait contract tests for SignatureStore, JobStore, and ScanResultCache.
//!
//! The same behavioral suite runs against the in-memory fakes and the
//! embedded SurrealDB backends; any conforming implementation must pass.

use std::time::Duration;

use vigil_store::fakes::{MemoryJobStore, MemoryScanCache, MemorySignatureStore};
use vigil_store::model::{
    FileHash, HashAlgorithm, JobStatus, ScanJob, ScanResult, Severity, Signature, ThreatKind,
};
use vigil_store::traits::{JobStore, ScanResultCache, SignatureStore};
use vigil_store::{SurrealJobStore, SurrealScanCache, SurrealSignatureStore};

const EICAR_SHA256: &str = "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f";
const EICAR_SHA1: &str = "3395856ce81f2b7382dee72602f798b642f14140";
const EICAR_MD5: &str = "44d88612fea8a8f36de82e1278abb02f";

fn eicar_signature() -> Signature {
    let mut sig = Signature::new(EICAR_SHA256, "EICAR-Test-File", "unit-test");
    sig.sha1 = Some(EICAR_SHA1.to_string());
    sig.md5 = Some(EICAR_MD5.to_string());
    sig.kind = ThreatKind::TestFile;
    sig.severity = Severity::Low;
    sig
}

fn other_signature(n: u8) -> Signature {
    let mut sig = Signature::new(
        format!("{:02x}", n).repeat(32),
        format!("Win.Trojan.Agent-{n}"),
        "unit-test",
    );
    sig.kind = ThreatKind::Trojan;
    sig.severity = Severity::Critical;
    sig
}

fn result_for(sha256: &str) -> ScanResult {
    let mut r = ScanResult::clean("clamav", "/tmp/upload.bin");
    r.sha256 = sha256.to_string();
    r.size_bytes = 68;
    r
}

// ===========================================================================
// SignatureStore contract
// ===========================================================================

async fn signature_store_contract(store: &dyn SignatureStore) {
    let sig = eicar_signature();
    store.put(&sig).await.unwrap();

    // Every populated hash resolves to the identical record.
    for hex in [EICAR_SHA256, EICAR_SHA1, EICAR_MD5] {
        let hash = FileHash::parse(hex).unwrap();
        let found = store.get(&hash).await.unwrap().expect("record present");
        assert_eq!(found, sig, "lookup by {hex} must yield the same record");
    }

    // Absence is Ok(None), not an error.
    let absent = FileHash::parse(&"0".repeat(64)).unwrap();
    assert!(store.get(&absent).await.unwrap().is_none());

    // Stats count primary records only, not alias rows.
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.signature_count, 1);

    // Batch insert fans out every record.
    let batch: Vec<Signature> = (1..=3).map(other_signature).collect();
    store.batch_put(&batch).await.unwrap();
    assert_eq!(store.stats().await.unwrap().signature_count, 4);

    // Keyspace walk visits each sha256 exactly once.
    let mut seen = Vec::new();
    store
        .for_each_hash(HashAlgorithm::Sha256, &mut |hex| {
            seen.push(hex.to_string());
            Ok(())
        })
        .await
        .unwrap();
    seen.sort();
    assert_eq!(seen.len(), 4);
    assert!(seen.contains(&EICAR_SHA256.to_string()));

    // Only one md5 alias exists.
    let mut md5s = 0;
    store
        .for_each_hash(HashAlgorithm::Md5, &mut |_| {
            md5s += 1;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(md5s, 1);

    // A visitor error aborts the walk and surfaces.
    let mut visited = 0;
    let err = store
        .for_each_hash(HashAlgorithm::Sha256, &mut |_| {
            visited += 1;
            Err(vigil_store::StoreError::Aborted("enough".to_string()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, vigil_store::StoreError::Aborted(_)));
    assert_eq!(visited, 1);

    // Delete removes only the passed key; aliases stay resolvable.
    store
        .delete(&FileHash::parse(EICAR_SHA256).unwrap())
        .await
        .unwrap();
    assert!(store
        .get(&FileHash::parse(EICAR_SHA256).unwrap())
        .await
        .unwrap()
        .is_none());
    assert!(store
        .get(&FileHash::parse(EICAR_SHA1).unwrap())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn signature_store_contract_memory() {
    signature_store_contract(&MemorySignatureStore::new()).await;
}

#[tokio::test]
async fn signature_store_contract_surreal() {
    let store = SurrealSignatureStore::in_memory().await.unwrap();
    signature_store_contract(&store).await;
}

#[tokio::test]
async fn signature_put_replaces_existing() {
    let store = MemorySignatureStore::new();
    let mut sig = eicar_signature();
    store.put(&sig).await.unwrap();

    sig.detection = "EICAR-Test-File (renamed)".to_string();
    store.put(&sig).await.unwrap();

    let found = store
        .get(&FileHash::parse(EICAR_SHA256).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.detection, "EICAR-Test-File (renamed)");
    assert_eq!(store.stats().await.unwrap().signature_count, 1);
}

#[tokio::test]
async fn signature_put_replaces_existing_surreal() {
    let store = SurrealSignatureStore::in_memory().await.unwrap();
    let mut sig = eicar_signature();
    store.put(&sig).await.unwrap();

    sig.detection = "EICAR-Test-File (renamed)".to_string();
    store.put(&sig).await.unwrap();

    let found = store
        .get(&FileHash::parse(EICAR_SHA256).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.detection, "EICAR-Test-File (renamed)");
    assert_eq!(store.stats().await.unwrap().signature_count, 1);
}

#[tokio::test]
async fn signature_batch_rejects_invalid_record() {
    let store = MemorySignatureStore::new();
    let mut bad = eicar_signature();
    bad.sha256 = String::new();
    assert!(store.batch_put(&[bad]).await.is_err());
    assert_eq!(store.stats().await.unwrap().signature_count, 0);
}

// ===========================================================================
// JobStore contract
// ===========================================================================

async fn job_store_contract(store: &dyn JobStore) {
    let hash = "ab".repeat(32);
    let mut job = ScanJob::new(Some(hash.clone()), "upload.bin", 68);
    store.create(&job).await.unwrap();

    // Primary and secondary lookups agree.
    let by_id = store.get(job.id).await.unwrap().expect("job by id");
    assert_eq!(by_id.status, JobStatus::Pending);
    let by_hash = store
        .get_by_file_hash(&hash)
        .await
        .unwrap()
        .expect("job by hash");
    assert_eq!(by_hash.id, job.id);

    // Update rewrites the primary record.
    job.start().unwrap();
    store.update(&job).await.unwrap();
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Running
    );

    // Status filtering.
    let running = store.list(&[JobStatus::Running]).await.unwrap();
    assert_eq!(running.len(), 1);
    let pending = store.list(&[JobStatus::Pending]).await.unwrap();
    assert!(pending.is_empty());
    let all = store.list(&[]).await.unwrap();
    assert_eq!(all.len(), 1);

    // Unknown job: get is None, update is an error.
    let ghost = ScanJob::new(None, "ghost.bin", 1);
    assert!(store.get(ghost.id).await.unwrap().is_none());
    assert!(store.update(&ghost).await.is_err());

    // Delete drops both keyspaces.
    store.delete(job.id).await.unwrap();
    assert!(store.get(job.id).await.unwrap().is_none());
    assert!(store.get_by_file_hash(&hash).await.unwrap().is_none());
}

#[tokio::test]
async fn job_store_contract_memory() {
    job_store_contract(&MemoryJobStore::new()).await;
}

#[tokio::test]
async fn job_store_contract_surreal() {
    let store = SurrealJobStore::in_memory().await.unwrap();
    job_store_contract(&store).await;
}

async fn job_cleanup_contract(store: &dyn JobStore) {
    // Terminal and old: eligible.
    let mut old_done = ScanJob::new(Some("aa".repeat(32)), "old.bin", 1);
    old_done.start().unwrap();
    old_done
        .complete(result_for(&"aa".repeat(32)))
        .unwrap();
    old_done.completed_at = Some(chrono::Utc::now() - chrono::Duration::hours(48));
    store.create(&old_done).await.unwrap();

    // Terminal but fresh: kept.
    let mut fresh_done = ScanJob::new(Some("bb".repeat(32)), "fresh.bin", 1);
    fresh_done.start().unwrap();
    fresh_done
        .complete(result_for(&"bb".repeat(32)))
        .unwrap();
    store.create(&fresh_done).await.unwrap();

    // Non-terminal: kept regardless of age.
    let mut stuck = ScanJob::new(Some("cc".repeat(32)), "stuck.bin", 1);
    stuck.created_at = chrono::Utc::now() - chrono::Duration::hours(48);
    store.create(&stuck).await.unwrap();

    let deleted = store.cleanup(Duration::from_secs(24 * 3600)).await.unwrap();
    assert_eq!(deleted, 1);

    assert!(store.get(old_done.id).await.unwrap().is_none());
    assert!(store.get(fresh_done.id).await.unwrap().is_some());
    assert!(store.get(stuck.id).await.unwrap().is_some());
}

#[tokio::test]
async fn job_cleanup_contract_memory() {
    job_cleanup_contract(&MemoryJobStore::new()).await;
}

#[tokio::test]
async fn job_cleanup_contract_surreal() {
    let store = SurrealJobStore::in_memory().await.unwrap();
    job_cleanup_contract(&store).await;
}

// ===========================================================================
// ScanResultCache contract
// ===========================================================================

async fn cache_contract(cache: &dyn ScanResultCache) {
    let hash = "cd".repeat(32);
    let result = result_for(&hash);

    // Zero TTL disables expiry.
    cache.put(&result, Duration::ZERO).await.unwrap();
    let found = cache.get(&hash).await.unwrap().expect("entry present");
    assert_eq!(found.sha256, hash);
    assert_eq!(cache.count().await.unwrap(), 1);

    // Replacement keeps a single entry.
    cache.put(&result, Duration::from_secs(3600)).await.unwrap();
    assert_eq!(cache.count().await.unwrap(), 1);

    // Absence is Ok(None).
    assert!(cache.get(&"ef".repeat(32)).await.unwrap().is_none());

    // Delete then clear.
    cache.delete(&hash).await.unwrap();
    assert!(cache.get(&hash).await.unwrap().is_none());

    cache.put(&result, Duration::ZERO).await.unwrap();
    cache.clear().await.unwrap();
    assert_eq!(cache.count().await.unwrap(), 0);

    // A result without a content hash is rejected.
    let unhashed = ScanResult::clean("clamav", "/tmp/x");
    assert!(cache.put(&unhashed, Duration::ZERO).await.is_err());
}

#[tokio::test]
async fn cache_contract_memory() {
    cache_contract(&MemoryScanCache::new()).await;
}

#[tokio::test]
async fn cache_contract_surreal() {
    let cache = SurrealScanCache::in_memory().await.unwrap();
    cache_contract(&cache).await;
}

#[tokio::test]
async fn cache_expired_entries_are_invisible() {
    let cache = MemoryScanCache::new();
    let hash = "12".repeat(32);
    cache
        .put(&result_for(&hash), Duration::from_millis(20))
        .await
        .unwrap();
    assert!(cache.get(&hash).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(cache.get(&hash).await.unwrap().is_none());
    assert_eq!(cache.count().await.unwrap(), 0);
}

#[tokio::test]
async fn cache_expired_entries_are_invisible_surreal() {
    let cache = SurrealScanCache::in_memory().await.unwrap();
    let hash = "34".repeat(32);
    cache
        .put(&result_for(&hash), Duration::from_millis(20))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(cache.get(&hash).await.unwrap().is_none());

    let purged = cache.purge_expired().await.unwrap();
    assert_eq!(purged, 1);
}
