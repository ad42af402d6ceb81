//! Binary-driven vulnerability database updater.
//!
//! Some databases are managed entirely by an external tool (grype-style):
//! the tool downloads into a cache directory and leaves a JSON metadata
//! sidecar describing what it fetched. This driver shells out for the
//! refresh and reads the sidecar for version bookkeeping.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, VigilError};
use crate::update::{CheckResult, UpdateResult, Updater, VersionInfo};

const METADATA_FILE: &str = "metadata.json";

/// Sidecar layout written by the external tool.
#[derive(Debug, Clone, Deserialize)]
struct DbMetadata {
    #[serde(rename = "Version")]
    version: u64,
    #[serde(rename = "NextUpdate")]
    next_update: DateTime<Utc>,
    #[serde(rename = "UpdatedAt")]
    updated_at: DateTime<Utc>,
}

/// Configuration for [`ExternalDbUpdater`].
#[derive(Debug, Clone)]
pub struct ExternalDbConfig {
    /// Tool binary name or path.
    pub binary: String,
    /// Arguments producing a download-only database refresh.
    pub args: Vec<String>,
    /// Cache directory the tool downloads into; the metadata sidecar is
    /// expected directly beneath it.
    pub cache_dir: PathBuf,
    /// Deadline applied when the caller's context carries none.
    pub timeout: Duration,
}

impl Default for ExternalDbConfig {
    fn default() -> Self {
        ExternalDbConfig {
            binary: "grype".to_string(),
            args: vec!["db".to_string(), "update".to_string()],
            cache_dir: PathBuf::from("/var/cache/vigil/vulndb"),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Updater delegating database management to an external binary.
pub struct ExternalDbUpdater {
    config: ExternalDbConfig,
}

impl ExternalDbUpdater {
    pub const NAME: &'static str = "vulnerability-db";

    pub fn new(config: ExternalDbConfig) -> Self {
        ExternalDbUpdater { config }
    }

    fn metadata_path(&self) -> PathBuf {
        self.config.cache_dir.join(METADATA_FILE)
    }

    fn read_metadata(&self) -> Option<DbMetadata> {
        let bytes = std::fs::read(self.metadata_path()).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(metadata) => Some(metadata),
            Err(err) => {
                warn!(%err, "vulnerability DB metadata unreadable");
                None
            }
        }
    }
}

#[async_trait]
impl Updater for ExternalDbUpdater {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn update(&self, cancel: &CancellationToken) -> Result<UpdateResult> {
        if cancel.is_cancelled() {
            return Err(VigilError::Cancelled);
        }
        let started = Instant::now();
        tokio::fs::create_dir_all(&self.config.cache_dir).await?;

        let mut cmd = tokio::process::Command::new(&self.config.binary);
        cmd.args(&self.config.args);
        cmd.env("GRYPE_DB_CACHE_DIR", &self.config.cache_dir);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                return Ok(UpdateResult {
                    failed: 1,
                    duration: started.elapsed(),
                    error: Some(format!("cannot launch '{}': {err}", self.config.binary)),
                    ..UpdateResult::default()
                })
            }
        };

        let waited = tokio::select! {
            _ = cancel.cancelled() => return Err(VigilError::Cancelled),
            waited = tokio::time::timeout(self.config.timeout, child.wait_with_output()) => waited,
        };

        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Ok(UpdateResult {
                    failed: 1,
                    duration: started.elapsed(),
                    error: Some(format!("tool failed: {err}")),
                    ..UpdateResult::default()
                })
            }
            Err(_) => {
                return Ok(UpdateResult {
                    failed: 1,
                    duration: started.elapsed(),
                    error: Some(format!(
                        "tool timed out after {}s",
                        self.config.timeout.as_secs()
                    )),
                    ..UpdateResult::default()
                })
            }
        };

        if !output.status.success() {
            let tail: String = String::from_utf8_lossy(&output.stderr)
                .chars()
                .take(512)
                .collect();
            return Ok(UpdateResult {
                failed: 1,
                duration: started.elapsed(),
                error: Some(format!(
                    "tool exited with {:?}: {tail}",
                    output.status.code()
                )),
                ..UpdateResult::default()
            });
        }

        let mut result = UpdateResult {
            success: true,
            downloaded: 1,
            duration: started.elapsed(),
            ..UpdateResult::default()
        };
        if let Some(metadata) = self.read_metadata() {
            result
                .file_versions
                .insert("vulnerability-db".to_string(), metadata.version);
            info!(version = metadata.version, "vulnerability DB updated");
        } else {
            debug!("vulnerability DB updated without readable metadata");
        }
        Ok(result)
    }

    /// Compares the sidecar's `NextUpdate` with the clock; a missing or
    /// unreadable sidecar means an update is due.
    async fn check_for_updates(&self, _cancel: &CancellationToken) -> Result<CheckResult> {
        let mut check = CheckResult::default();
        match self.read_metadata() {
            Some(metadata) => {
                check.current_version = metadata.version;
                check.available_version = metadata.version;
                check.update_available = Utc::now() >= metadata.next_update;
                check.details.insert(
                    "next_update".to_string(),
                    metadata.next_update.to_rfc3339(),
                );
                check
                    .details
                    .insert("updated_at".to_string(), metadata.updated_at.to_rfc3339());
            }
            None => {
                check.update_available = true;
                check
                    .details
                    .insert("metadata".to_string(), "missing".to_string());
            }
        }
        Ok(check)
    }

    async fn version_info(&self) -> VersionInfo {
        match self.read_metadata() {
            Some(metadata) => {
                let mut info = VersionInfo {
                    version: metadata.version,
                    build_time: Some(metadata.updated_at),
                    ..VersionInfo::default()
                };
                info.file_versions
                    .insert("vulnerability-db".to_string(), metadata.version);
                info
            }
            None => VersionInfo::default(),
        }
    }

    async fn is_ready(&self) -> bool {
        self.read_metadata().is_some()
    }
}
