//! Embedded SurrealDB connection helpers.
//!
//! Every store owns its own connection and directory; tests use `mem://`.

use std::path::Path;

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::info;

use crate::error::{StoreError, StoreResult};

const NAMESPACE: &str = "vigil";
const DATABASE: &str = "main";

/// Connect to a fresh in-memory instance (testing).
pub(crate) async fn connect_memory() -> StoreResult<Surreal<Any>> {
    let db = surrealdb::engine::any::connect("mem://")
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    db.use_ns(NAMESPACE)
        .use_db(DATABASE)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    Ok(db)
}

/// Connect to a durable surrealkv instance rooted at `dir`, creating the
/// directory if needed.
pub(crate) async fn connect_dir(dir: &Path) -> StoreResult<Surreal<Any>> {
    std::fs::create_dir_all(dir).map_err(|e| {
        StoreError::Connection(format!(
            "failed to create database directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let url = format!("surrealkv://{}", dir.display());
    let db = surrealdb::engine::any::connect(&url)
        .await
        .map_err(|e| StoreError::Connection(format!("failed to connect to {url}: {e}")))?;

    db.use_ns(NAMESPACE)
        .use_db(DATABASE)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    info!("store connected ({url})");
    Ok(db)
}

/// Recursive byte size of a store directory, 0 when it does not exist.
pub(crate) fn dir_size_bytes(dir: &Path) -> u64 {
    fn walk(path: &Path) -> u64 {
        let Ok(entries) = std::fs::read_dir(path) else {
            return 0;
        };
        entries
            .flatten()
            .map(|entry| {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path)
                } else {
                    entry.metadata().map(|m| m.len()).unwrap_or(0)
                }
            })
            .sum()
    }
    walk(dir)
}
