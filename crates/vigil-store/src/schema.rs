//! Row definitions for Vigil SurrealDB tables.
//!
//! Tables:
//! - signatures: one row per populated hash key, each carrying the record
//! - jobs: scan job lifecycle rows, indexed by job id and content hash
//! - scan_cache: terminal scan results with optional expiry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ScanJob, ScanResult, Signature};

/// Module for serializing chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// One `signatures` row: a composite hash key plus the full record.
///
/// A signature with aliases produces one row per populated hash, all
/// carrying the identical record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRow {
    /// `"<algorithm>:<hex>"`, unique per row.
    pub key: String,
    /// The full signature record (timestamps as RFC 3339 strings).
    pub record: Signature,
}

impl SignatureRow {
    pub fn new(key: String, record: Signature) -> Self {
        SignatureRow { key, record }
    }
}

/// Projection row used when walking a keyspace prefix.
#[derive(Debug, Deserialize)]
pub struct KeyRow {
    pub key: String,
}

/// Projection row for `count() GROUP ALL` queries.
#[derive(Debug, Deserialize)]
pub struct CountRow {
    pub count: u64,
}

/// One `jobs` row. Query-relevant fields are flattened beside the full
/// record so status filters and cleanup cutoffs run on native datetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    pub status: String,
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    pub job: ScanJob,
}

impl JobRow {
    pub fn from_job(job: &ScanJob) -> Self {
        JobRow {
            job_id: job.id.to_string(),
            file_hash: job.file_hash.clone(),
            status: job.status.as_str().to_string(),
            completed_at: job.completed_at,
            created_at: job.created_at,
            job: job.clone(),
        }
    }
}

/// One `scan_cache` row. `expires_at = NONE` means the entry never expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRow {
    pub file_hash: String,
    #[serde(default, with = "surreal_datetime_opt")]
    pub expires_at: Option<DateTime<Utc>>,
    pub result: ScanResult,
}

impl CacheRow {
    pub fn new(file_hash: String, expires_at: Option<DateTime<Utc>>, result: ScanResult) -> Self {
        CacheRow {
            file_hash,
            expires_at,
            result,
        }
    }
}
