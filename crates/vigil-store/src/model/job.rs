//! Durable scan job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::model::scan::ScanResult;

/// Lifecycle state of an asynchronous scan request.
///
/// Transitions: `Pending → Running → {Completed, Failed}`, with `Failed`
/// reachable from any non-terminal state. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The durable record of one asynchronous scan request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    /// SHA-256 of the uploaded content (lowercase hex). Immutable once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    pub file_name: String,
    pub file_size: u64,
    pub status: JobStatus,
    /// Populated iff the job completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ScanResult>,
    /// Failure reason; empty unless the job failed.
    #[serde(default)]
    pub error: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    pub fn new(file_hash: Option<String>, file_name: impl Into<String>, file_size: u64) -> Self {
        ScanJob {
            id: Uuid::new_v4(),
            file_hash,
            file_name: file_name.into(),
            file_size,
            status: JobStatus::Pending,
            result: None,
            error: String::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Pending → Running.
    pub fn start(&mut self) -> StoreResult<()> {
        if self.status != JobStatus::Pending {
            return Err(self.bad_state("pending"));
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running → Completed, attaching the scan result.
    pub fn complete(&mut self, result: ScanResult) -> StoreResult<()> {
        if self.status != JobStatus::Running {
            return Err(self.bad_state("running"));
        }
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Any non-terminal state → Failed.
    pub fn fail(&mut self, reason: impl Into<String>) -> StoreResult<()> {
        if self.status.is_terminal() {
            return Err(self.bad_state("pending or running"));
        }
        self.status = JobStatus::Failed;
        self.error = reason.into();
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn bad_state(&self, expected: &str) -> StoreError {
        StoreError::InvalidJobState {
            id: self.id,
            status: self.status.to_string(),
            expected: expected.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scan::ScanResult;

    fn job() -> ScanJob {
        ScanJob::new(Some("ab".repeat(32)), "sample.bin", 42)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut j = job();
        assert_eq!(j.status, JobStatus::Pending);
        assert!(j.started_at.is_none());

        j.start().unwrap();
        assert_eq!(j.status, JobStatus::Running);
        assert!(j.started_at.is_some());
        assert!(j.completed_at.is_none());

        j.complete(ScanResult::clean("clamav", "/tmp/x")).unwrap();
        assert_eq!(j.status, JobStatus::Completed);
        assert!(j.result.is_some());
        assert!(j.completed_at.is_some());
    }

    #[test]
    fn test_fail_from_pending_skips_started_at() {
        let mut j = job();
        j.fail("queue shut down").unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert!(j.started_at.is_none());
        assert!(j.completed_at.is_some());
        assert_eq!(j.error, "queue shut down");
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut j = job();
        j.start().unwrap();
        j.complete(ScanResult::clean("clamav", "/tmp/x")).unwrap();

        assert!(j.start().is_err());
        assert!(j.fail("late").is_err());
        assert!(j.complete(ScanResult::clean("clamav", "/tmp/x")).is_err());
        assert_eq!(j.status, JobStatus::Completed);
    }

    #[test]
    fn test_complete_requires_running() {
        let mut j = job();
        let err = j.complete(ScanResult::clean("clamav", "/tmp/x")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidJobState { .. }));
    }

    #[test]
    fn test_result_only_on_completed() {
        let mut j = job();
        j.start().unwrap();
        j.fail("scanner unavailable").unwrap();
        assert!(j.result.is_none());
        assert!(!j.error.is_empty());
    }
}
