//! SurrealDB-backed [`SignatureStore`] implementation.
//!
//! Uses `schema::SignatureRow` for persistence: one row per populated hash
//! key, each carrying the full record, written inside a single transaction
//! so a record is never observable under only some of its keys.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::connect;
use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::model::{FileHash, HashAlgorithm, Signature};
use crate::schema::{CountRow, KeyRow, SignatureRow};
use crate::traits::{HashVisitor, SignatureStore, StoreStats};

/// SurrealDB-backed implementation of [`SignatureStore`].
pub struct SurrealSignatureStore {
    db: Surreal<Any>,
    dir: Option<PathBuf>,
}

impl SurrealSignatureStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StoreResult<Self> {
        let db = connect::connect_memory().await?;
        migrations::init_signatures_table(&db).await?;
        Ok(Self { db, dir: None })
    }

    /// Open (or create) a durable store rooted at `dir`.
    pub async fn open(dir: &Path) -> StoreResult<Self> {
        let db = connect::connect_dir(dir).await?;
        migrations::init_signatures_table(&db).await?;
        Ok(Self {
            db,
            dir: Some(dir.to_path_buf()),
        })
    }

    /// Fan a signature out into one row per populated hash key.
    fn rows_for(signature: &Signature) -> StoreResult<Vec<SignatureRow>> {
        Ok(signature
            .hashes()?
            .into_iter()
            .map(|h| SignatureRow::new(h.storage_key(), signature.clone()))
            .collect())
    }
}

#[async_trait]
impl SignatureStore for SurrealSignatureStore {
    async fn put(&self, signature: &Signature) -> StoreResult<()> {
        self.batch_put(std::slice::from_ref(signature)).await
    }

    async fn get(&self, hash: &FileHash) -> StoreResult<Option<Signature>> {
        let key = hash.storage_key();
        let mut res = self
            .db
            .query("SELECT * FROM signatures WHERE key = $key")
            .bind(("key", key))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let rows: Vec<SignatureRow> = res
            .take(0)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.into_iter().next().map(|r| r.record))
    }

    async fn batch_put(&self, signatures: &[Signature]) -> StoreResult<()> {
        if signatures.is_empty() {
            return Ok(());
        }

        let mut rows = Vec::new();
        for signature in signatures {
            rows.extend(Self::rows_for(signature)?);
        }

        debug!(signatures = signatures.len(), rows = rows.len(), "batch put");

        // Replace-by-key inside one transaction: either every key of every
        // record lands, or none do.
        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                FOR $row IN $rows {
                    DELETE signatures WHERE key = $row.key;
                    CREATE signatures CONTENT $row;
                };
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("rows", rows))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .check()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, hash: &FileHash) -> StoreResult<()> {
        let key = hash.storage_key();
        self.db
            .query("DELETE signatures WHERE key = $key")
            .bind(("key", key))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let prefix = HashAlgorithm::Sha256.key_prefix();
        let mut res = self
            .db
            .query("SELECT count() FROM signatures WHERE string::starts_with(key, $prefix) GROUP ALL")
            .bind(("prefix", prefix))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let rows: Vec<CountRow> = res
            .take(0)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let signature_count = rows.first().map(|r| r.count).unwrap_or(0);
        let disk_bytes = self
            .dir
            .as_deref()
            .map(connect::dir_size_bytes)
            .unwrap_or(0);

        Ok(StoreStats {
            signature_count,
            disk_bytes,
        })
    }

    async fn for_each_hash(
        &self,
        algorithm: HashAlgorithm,
        visit: &mut HashVisitor<'_>,
    ) -> StoreResult<()> {
        let prefix = algorithm.key_prefix();
        let mut res = self
            .db
            .query("SELECT key FROM signatures WHERE string::starts_with(key, $prefix)")
            .bind(("prefix", prefix.clone()))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let rows: Vec<KeyRow> = res
            .take(0)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        for row in rows {
            visit(&row.key[prefix.len()..])?;
        }
        Ok(())
    }
}
