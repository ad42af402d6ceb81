//! SurrealDB schema initialization.
//!
//! Each store runs its own table setup at connect time. Safe to call more
//! than once (idempotent).

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::error::StoreResult;

/// Initialize the `signatures` table.
///
/// One row per populated hash key; `key` is unique so alias rows of the
/// same record never collide with each other.
pub(crate) async fn init_signatures_table(db: &Surreal<Any>) -> StoreResult<()> {
    debug!("initializing signatures table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS signatures SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS key ON signatures TYPE string;
        DEFINE FIELD IF NOT EXISTS record ON signatures FLEXIBLE TYPE object;

        DEFINE INDEX IF NOT EXISTS idx_signature_key ON signatures FIELDS key UNIQUE;
    "#;

    db.query(sql).await?;
    Ok(())
}

/// Initialize the `jobs` table.
///
/// `job_id` is unique; `file_hash` is the content-hash secondary index;
/// `status` and `completed_at` support list filters and TTL cleanup.
pub(crate) async fn init_jobs_table(db: &Surreal<Any>) -> StoreResult<()> {
    debug!("initializing jobs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS jobs SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS job_id ON jobs TYPE string;
        DEFINE FIELD IF NOT EXISTS file_hash ON jobs TYPE option<string>;
        DEFINE FIELD IF NOT EXISTS status ON jobs TYPE string;
        DEFINE FIELD IF NOT EXISTS completed_at ON jobs TYPE option<datetime>;
        DEFINE FIELD IF NOT EXISTS created_at ON jobs TYPE datetime;
        DEFINE FIELD IF NOT EXISTS job ON jobs FLEXIBLE TYPE object;

        DEFINE INDEX IF NOT EXISTS idx_job_id ON jobs FIELDS job_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_job_file_hash ON jobs FIELDS file_hash;
        DEFINE INDEX IF NOT EXISTS idx_job_status ON jobs FIELDS status;
    "#;

    db.query(sql).await?;
    Ok(())
}

/// Initialize the `scan_cache` table.
pub(crate) async fn init_scan_cache_table(db: &Surreal<Any>) -> StoreResult<()> {
    debug!("initializing scan_cache table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS scan_cache SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS file_hash ON scan_cache TYPE string;
        DEFINE FIELD IF NOT EXISTS expires_at ON scan_cache TYPE option<datetime>;
        DEFINE FIELD IF NOT EXISTS result ON scan_cache FLEXIBLE TYPE object;

        DEFINE INDEX IF NOT EXISTS idx_cache_file_hash ON scan_cache FIELDS file_hash UNIQUE;
    "#;

    db.query(sql).await?;
    Ok(())
}
