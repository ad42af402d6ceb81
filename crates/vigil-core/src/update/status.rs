//! Thread-safe snapshot view of updater state.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::update::VersionInfo;

/// Operational state of one updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdaterState {
    /// Registered, never run.
    Pending,
    /// Last run succeeded; waiting for the next trigger.
    Idle,
    /// A run is in flight.
    Updating,
    /// The retry budget was exhausted.
    Failed,
}

/// One updater's tracked state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterStatus {
    pub name: String,
    pub state: UpdaterState,
    pub last_update: Option<DateTime<Utc>>,
    pub next_scheduled: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub version: VersionInfo,
    pub ready: bool,
}

impl UpdaterStatus {
    fn new(name: String) -> Self {
        UpdaterStatus {
            name,
            state: UpdaterState::Pending,
            last_update: None,
            next_scheduled: None,
            last_error: None,
            version: VersionInfo::default(),
            ready: false,
        }
    }
}

/// Tracker over every registered updater.
///
/// Reads hand out clones; callers never share interior maps with the
/// tracker's own state.
#[derive(Default)]
pub struct StatusTracker {
    inner: RwLock<HashMap<String, UpdaterStatus>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an updater with its initial version/readiness snapshot.
    pub fn register(&self, name: &str, version: VersionInfo, ready: bool) {
        let mut inner = self.inner.write().unwrap();
        let status = inner
            .entry(name.to_string())
            .or_insert_with(|| UpdaterStatus::new(name.to_string()));
        status.version = version;
        status.ready = ready;
    }

    pub fn set_state(&self, name: &str, state: UpdaterState) {
        let mut inner = self.inner.write().unwrap();
        if let Some(status) = inner.get_mut(name) {
            status.state = state;
        }
    }

    pub fn set_next_scheduled(&self, name: &str, at: DateTime<Utc>) {
        let mut inner = self.inner.write().unwrap();
        if let Some(status) = inner.get_mut(name) {
            status.next_scheduled = Some(at);
        }
    }

    /// Record a successful run: idle, last-update stamped, error cleared,
    /// version and readiness refreshed.
    pub fn record_success(&self, name: &str, version: VersionInfo, ready: bool) {
        let mut inner = self.inner.write().unwrap();
        if let Some(status) = inner.get_mut(name) {
            status.state = UpdaterState::Idle;
            status.last_update = Some(Utc::now());
            status.last_error = None;
            status.version = version;
            status.ready = ready;
        }
    }

    pub fn record_error(&self, name: &str, error: impl Into<String>) {
        let mut inner = self.inner.write().unwrap();
        if let Some(status) = inner.get_mut(name) {
            status.last_error = Some(error.into());
        }
    }

    /// Deep copy of one updater's status.
    pub fn get(&self, name: &str) -> Option<UpdaterStatus> {
        self.inner.read().unwrap().get(name).cloned()
    }

    /// Deep copy of every updater's status.
    pub fn snapshot(&self) -> HashMap<String, UpdaterStatus> {
        self.inner.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_snapshot() {
        let tracker = StatusTracker::new();
        tracker.register(
            "clamav-mirror",
            VersionInfo {
                version: 100,
                ..VersionInfo::default()
            },
            true,
        );

        let status = tracker.get("clamav-mirror").unwrap();
        assert_eq!(status.state, UpdaterState::Pending);
        assert_eq!(status.version.version, 100);
        assert!(status.ready);
        assert!(status.last_update.is_none());
    }

    #[test]
    fn test_success_clears_error() {
        let tracker = StatusTracker::new();
        tracker.register("feeds", VersionInfo::default(), false);
        tracker.record_error("feeds", "network down");
        assert_eq!(
            tracker.get("feeds").unwrap().last_error.as_deref(),
            Some("network down")
        );

        tracker.record_success("feeds", VersionInfo::default(), true);
        let status = tracker.get("feeds").unwrap();
        assert_eq!(status.state, UpdaterState::Idle);
        assert!(status.last_error.is_none());
        assert!(status.last_update.is_some());
        assert!(status.ready);
    }

    #[test]
    fn test_snapshots_are_deep_copies() {
        let tracker = StatusTracker::new();
        let mut version = VersionInfo::default();
        version.file_versions.insert("daily.cvd".to_string(), 100);
        tracker.register("clamav-mirror", version, true);

        let mut snapshot = tracker.snapshot();
        snapshot
            .get_mut("clamav-mirror")
            .unwrap()
            .version
            .file_versions
            .insert("daily.cvd".to_string(), 999);

        // Mutating the snapshot must not leak into the tracker.
        assert_eq!(
            tracker.get("clamav-mirror").unwrap().version.file_versions["daily.cvd"],
            100
        );
    }

    #[test]
    fn test_unknown_name_is_none() {
        let tracker = StatusTracker::new();
        assert!(tracker.get("ghost").is_none());
    }
}
