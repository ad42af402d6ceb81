//! SurrealDB-backed [`ScanResultCache`] implementation.
//!
//! Entries carry an optional `expires_at`; every read filters expired rows
//! in the query itself, so a reader can never observe a stale entry even
//! before the purge pass removes it.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::connect;
use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::model::ScanResult;
use crate::schema::{CacheRow, CountRow};
use crate::traits::ScanResultCache;

const LIVE_FILTER: &str = "(expires_at = NONE OR expires_at > time::now())";

/// SurrealDB-backed implementation of [`ScanResultCache`].
pub struct SurrealScanCache {
    db: Surreal<Any>,
}

impl SurrealScanCache {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StoreResult<Self> {
        let db = connect::connect_memory().await?;
        migrations::init_scan_cache_table(&db).await?;
        Ok(Self { db })
    }

    /// Open (or create) a durable cache rooted at `dir`.
    pub async fn open(dir: &Path) -> StoreResult<Self> {
        let db = connect::connect_dir(dir).await?;
        migrations::init_scan_cache_table(&db).await?;
        Ok(Self { db })
    }

    /// Drop expired rows. Called opportunistically by owners; reads do not
    /// depend on it.
    pub async fn purge_expired(&self) -> StoreResult<usize> {
        let mut res = self
            .db
            .query("DELETE scan_cache WHERE expires_at != NONE AND expires_at <= time::now() RETURN BEFORE")
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let purged: Vec<CacheRow> = res
            .take(0)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if !purged.is_empty() {
            debug!(purged = purged.len(), "cache purge");
        }
        Ok(purged.len())
    }
}

#[async_trait]
impl ScanResultCache for SurrealScanCache {
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

        let row = CacheRow::new(result.sha256.clone(), expires_at, result.clone());
        let hash = result.sha256.clone();

        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                DELETE scan_cache WHERE file_hash = $hash;
                CREATE scan_cache CONTENT $row;
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("hash", hash))
            .bind(("row", row))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .check()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, sha256: &str) -> StoreResult<Option<ScanResult>> {
        let hash = sha256.to_string();
        let mut res = self
            .db
            .query(format!(
                "SELECT * FROM scan_cache WHERE file_hash = $hash AND {LIVE_FILTER}"
            ))
            .bind(("hash", hash))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let rows: Vec<CacheRow> = res
            .take(0)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.into_iter().next().map(|r| r.result))
    }

    async fn delete(&self, sha256: &str) -> StoreResult<()> {
        let hash = sha256.to_string();
        self.db
            .query("DELETE scan_cache WHERE file_hash = $hash")
            .bind(("hash", hash))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.db
            .query("DELETE scan_cache")
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn count(&self) -> StoreResult<u64> {
        let mut res = self
            .db
            .query(format!(
                "SELECT count() FROM scan_cache WHERE {LIVE_FILTER} GROUP ALL"
            ))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let rows: Vec<CountRow> = res
            .take(0)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }
}
