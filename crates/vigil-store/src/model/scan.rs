//! Scan result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::signature::{Severity, ThreatKind};

/// Terminal outcome of scanning one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Clean,
    Infected,
    Error,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanStatus::Clean => "clean",
            ScanStatus::Infected => "infected",
            ScanStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The record produced for one scanned file.
///
/// Constructors enforce the field invariants: infected results carry a
/// detection, clean results carry none, error results carry a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub status: ScanStatus,
    /// Detection label; empty unless infected.
    #[serde(default)]
    pub detection: String,
    pub kind: ThreatKind,
    pub severity: Severity,
    /// Engine that produced the verdict (e.g. "clamav").
    pub engine: String,
    #[serde(default)]
    pub engine_version: String,
    /// Path of the scanned file as given to the scanner.
    pub path: String,
    /// SHA-256 of the file content (lowercase hex); may be empty when the
    /// file could not be read.
    #[serde(default)]
    pub sha256: String,
    pub size_bytes: u64,
    pub duration_ms: u64,
    pub scanned_at: DateTime<Utc>,
    /// Failure cause; empty unless status is error.
    #[serde(default)]
    pub error: String,
}

impl ScanResult {
    pub fn clean(engine: impl Into<String>, path: impl Into<String>) -> Self {
        ScanResult {
            status: ScanStatus::Clean,
            detection: String::new(),
            kind: ThreatKind::Unknown,
            severity: Severity::Unknown,
            engine: engine.into(),
            engine_version: String::new(),
            path: path.into(),
            sha256: String::new(),
            size_bytes: 0,
            duration_ms: 0,
            scanned_at: Utc::now(),
            error: String::new(),
        }
    }

    pub fn infected(
        engine: impl Into<String>,
        path: impl Into<String>,
        detection: impl Into<String>,
        kind: ThreatKind,
        severity: Severity,
    ) -> Self {
        let detection = detection.into();
        debug_assert!(!detection.is_empty());
        ScanResult {
            status: ScanStatus::Infected,
            detection,
            kind,
            severity,
            ..ScanResult::clean(engine, path)
        }
    }

    pub fn failed(
        engine: impl Into<String>,
        path: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        debug_assert!(!error.is_empty());
        ScanResult {
            status: ScanStatus::Error,
            error,
            ..ScanResult::clean(engine, path)
        }
    }

    pub fn is_infected(&self) -> bool {
        self.status == ScanStatus::Infected
    }

    pub fn is_error(&self) -> bool {
        self.status == ScanStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_has_no_detection() {
        let r = ScanResult::clean("clamav", "/tmp/a");
        assert_eq!(r.status, ScanStatus::Clean);
        assert!(r.detection.is_empty());
        assert!(r.error.is_empty());
    }

    #[test]
    fn test_infected_carries_detection() {
        let r = ScanResult::infected(
            "clamav",
            "/tmp/a",
            "Win.Trojan.Agent-123",
            ThreatKind::Trojan,
            Severity::Critical,
        );
        assert!(r.is_infected());
        assert_eq!(r.detection, "Win.Trojan.Agent-123");
        assert_eq!(r.severity, Severity::Critical);
    }

    #[test]
    fn test_failed_carries_error() {
        let r = ScanResult::failed("clamav", "/tmp/a", "file too large");
        assert!(r.is_error());
        assert_eq!(r.error, "file too large");
        assert!(r.detection.is_empty());
    }
}
