//! Threat-database update orchestration.
//!
//! Every body of threat data (signature feeds, on-disk ClamAV databases,
//! the binary-managed vulnerability DB) implements the same [`Updater`]
//! contract; [`UpdateService`] schedules them and the [`StatusTracker`]
//! exposes their state to operators.

mod external;
mod feeds;
mod mirror;
mod service;
mod status;

pub use external::{ExternalDbConfig, ExternalDbUpdater};
pub use feeds::{SignatureFeed, SignatureFeedUpdater};
pub use mirror::{MirrorDbConfig, MirrorDbUpdater};
pub use service::{UpdateService, UpdateServiceConfig};
pub use status::{StatusTracker, UpdaterState, UpdaterStatus};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Version snapshot of one managed artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Primary version number (meaning is per-updater; monotone).
    pub version: u64,
    /// Per-file versions where the artifact is a set of files.
    #[serde(default)]
    pub file_versions: HashMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_time: Option<DateTime<Utc>>,
}

/// Outcome of one update run.
#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
    pub success: bool,
    /// Artifacts fetched and applied.
    pub downloaded: u32,
    /// Artifacts already current.
    pub skipped: u32,
    /// Artifacts that could not be refreshed.
    pub failed: u32,
    pub duration: Duration,
    /// Failure or annotation detail (reload problems land here too).
    pub error: Option<String>,
    pub file_versions: HashMap<String, u64>,
}

/// Outcome of a read-only update check.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    pub update_available: bool,
    pub current_version: u64,
    pub available_version: u64,
    pub details: HashMap<String, String>,
}

/// A strategy for refreshing one body of threat data.
#[async_trait]
pub trait Updater: Send + Sync {
    /// Stable identifier used in status tracking and logs.
    fn name(&self) -> &str;

    /// Refresh the managed artifact. Surfaces cancellation as an error
    /// without side effects where possible.
    async fn update(&self, cancel: &CancellationToken) -> Result<UpdateResult>;

    /// Read-only check for pending updates; must not mutate state.
    async fn check_for_updates(&self, cancel: &CancellationToken) -> Result<CheckResult>;

    /// Snapshot of the artifact's current version.
    async fn version_info(&self) -> VersionInfo;

    /// Whether the managed artifact is usable by scanners right now.
    async fn is_ready(&self) -> bool;
}
