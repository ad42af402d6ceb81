//! File scanning drivers.
//!
//! [`Scanner`] is the seam the worker pool talks through; [`ClamAvScanner`]
//! drives the external ClamAV binary. Scan failures are never raised as
//! `Err` — they come back as error-status results so a broken file or a
//! missing binary is a recorded verdict, not a crashed job.

mod clamav;

pub use clamav::{ClamAvConfig, ClamAvScanner};

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use vigil_store::{ScanResult, Severity, ThreatKind};

use crate::error::Result;

/// A driver capable of scanning files for threats.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Engine label stamped into results (e.g. "clamav").
    fn name(&self) -> &str;

    /// Scan one file. Never fails outwardly: problems produce an
    /// error-status [`ScanResult`].
    async fn scan_file(&self, path: &Path, cancel: &CancellationToken) -> ScanResult;

    /// Scan every regular file under `path`, descending into
    /// subdirectories only when `recursive` is set. Cancellation is
    /// honored between files.
    async fn scan_dir(
        &self,
        path: &Path,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> Vec<ScanResult>;

    /// Probe the engine's version string.
    async fn engine_version(&self) -> Result<String>;
}

/// Derive a threat kind and severity from a detection label.
///
/// Case-insensitive substring rules; unrecognized labels land on generic
/// malware at medium severity.
pub fn classify_detection(detection: &str) -> (ThreatKind, Severity) {
    let upper = detection.to_ascii_uppercase();

    if upper.contains("RANSOM") {
        (ThreatKind::Ransomware, Severity::Critical)
    } else if upper.contains("TROJAN") {
        (ThreatKind::Trojan, Severity::Critical)
    } else if upper.contains("WORM") {
        (ThreatKind::Worm, Severity::High)
    } else if upper.contains("VIRUS") {
        (ThreatKind::Virus, Severity::High)
    } else if upper.contains("SPYWARE") {
        (ThreatKind::Spyware, Severity::Medium)
    } else if upper.contains("ADWARE") {
        (ThreatKind::Adware, Severity::Medium)
    } else if upper.contains("PUA") || upper.contains("PUP") {
        (ThreatKind::Pup, Severity::Medium)
    } else if upper.contains("EICAR") || upper.contains("TEST") {
        (ThreatKind::TestFile, Severity::Low)
    } else if upper.contains("HEURISTIC") {
        (ThreatKind::Malware, Severity::Low)
    } else {
        (ThreatKind::Malware, Severity::Medium)
    }
}
