//! Malware signature records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::model::hash::{FileHash, HashAlgorithm};

/// Broad threat category carried by a signature or scan detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreatKind {
    Trojan,
    Virus,
    Worm,
    Ransomware,
    Adware,
    Spyware,
    Pup,
    TestFile,
    Malware,
    Unknown,
}

impl std::fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreatKind::Trojan => "trojan",
            ThreatKind::Virus => "virus",
            ThreatKind::Worm => "worm",
            ThreatKind::Ransomware => "ransomware",
            ThreatKind::Adware => "adware",
            ThreatKind::Spyware => "spyware",
            ThreatKind::Pup => "pup",
            ThreatKind::TestFile => "test-file",
            ThreatKind::Malware => "malware",
            ThreatKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Severity ladder for detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Unknown => "unknown",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A record of a known-malicious file.
///
/// Identified by its SHA-256; optional SHA-1 and MD5 act as alternate lookup
/// keys for the same logical record. When persisted, the identical record is
/// stored under every populated hash key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Mandatory primary identity (lowercase hex).
    pub sha256: String,
    /// Alternate lookup key (lowercase hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    /// Alternate lookup key (lowercase hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    /// Label the detecting tool assigns (e.g. "Win.Trojan.Agent-123").
    pub detection: String,
    pub kind: ThreatKind,
    pub severity: Severity,
    /// Which feed or scanner produced this record.
    pub source: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Signature {
    /// Minimal constructor; timestamps default to now.
    pub fn new(sha256: impl Into<String>, detection: impl Into<String>, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Signature {
            sha256: sha256.into(),
            sha1: None,
            md5: None,
            detection: detection.into(),
            kind: ThreatKind::Unknown,
            severity: Severity::Unknown,
            source: source.into(),
            first_seen: now,
            last_seen: now,
            description: String::new(),
            references: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Every populated hash as a validated [`FileHash`].
    ///
    /// Fails if the mandatory sha256 is missing or any populated field is
    /// not valid hex of the right length.
    pub fn hashes(&self) -> StoreResult<Vec<FileHash>> {
        if self.sha256.is_empty() {
            return Err(StoreError::InvalidSignature(format!(
                "signature '{}' has no sha256",
                self.detection
            )));
        }
        let mut out = vec![FileHash::new(HashAlgorithm::Sha256, &self.sha256)?];
        if let Some(sha1) = &self.sha1 {
            out.push(FileHash::new(HashAlgorithm::Sha1, sha1)?);
        }
        if let Some(md5) = &self.md5 {
            out.push(FileHash::new(HashAlgorithm::Md5, md5)?);
        }
        Ok(out)
    }
}
