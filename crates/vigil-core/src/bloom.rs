//! Probabilistic pre-filter over signature hash keys.
//!
//! Keyed by the composite storage string (`"sha256:<hex>"` etc.), sized by
//! an expected item count and target false-positive rate. A negative answer
//! is definitive; a positive answer sends the caller to the store.
//!
//! Concurrency: `insert` mutates in place under the write lock, `contains`
//! takes the read lock only, and `swap` replaces the whole backing filter in
//! one exclusive section so a query never observes a half-populated filter.

use std::path::Path;
use std::sync::RwLock;

use bloomfilter::Bloom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vigil_store::FileHash;

use crate::error::{Result, VigilError};

const SNAPSHOT_MAGIC: &str = "vigil-prefilter";
const SNAPSHOT_VERSION: u32 = 1;

/// Sizing parameters for the pre-filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PreFilterConfig {
    /// Expected number of distinct hash keys.
    pub expected_items: usize,
    /// Target false-positive rate, e.g. 0.001.
    pub false_positive_rate: f64,
}

impl Default for PreFilterConfig {
    fn default() -> Self {
        PreFilterConfig {
            expected_items: 1_000_000,
            false_positive_rate: 0.001,
        }
    }
}

impl PreFilterConfig {
    fn clamped(&self) -> (usize, f64) {
        let items = self.expected_items.max(1);
        let rate = if self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0 {
            self.false_positive_rate
        } else {
            0.001
        };
        (items, rate)
    }
}

#[derive(Serialize, Deserialize)]
struct FilterCore {
    bloom: Bloom<String>,
    items: u64,
}

/// On-disk envelope, self-describing so a stale or foreign file is rejected
/// instead of silently misread.
#[derive(Deserialize)]
struct FilterSnapshot {
    magic: String,
    version: u32,
    config: PreFilterConfig,
    core: FilterCore,
}

/// Borrowing twin of [`FilterSnapshot`] so saving never copies the bitmap.
/// Field order must match for the bincode framing to line up.
#[derive(Serialize)]
struct FilterSnapshotRef<'a> {
    magic: &'a str,
    version: u32,
    config: PreFilterConfig,
    core: &'a FilterCore,
}

/// Thread-safe Bloom pre-filter with atomic full-swap rebuilds.
pub struct BloomPreFilter {
    config: PreFilterConfig,
    inner: RwLock<FilterCore>,
}

impl BloomPreFilter {
    /// Build an empty filter sized for the given configuration.
    pub fn new(config: PreFilterConfig) -> Self {
        let (items, rate) = config.clamped();
        BloomPreFilter {
            config,
            inner: RwLock::new(FilterCore {
                bloom: Bloom::new_for_fp_rate(items, rate),
                items: 0,
            }),
        }
    }

    /// Record a hash as present.
    pub fn insert(&self, hash: &FileHash) {
        self.insert_key(&hash.storage_key());
    }

    /// Record a raw composite key as present. Used by rebuilds, which walk
    /// keys the store already validated.
    pub fn insert_key(&self, key: &str) {
        let mut core = self.inner.write().unwrap();
        core.bloom.set(&key.to_string());
        core.items += 1;
    }

    /// Membership test: `false` means definitely absent, `true` means
    /// possibly present.
    pub fn contains(&self, hash: &FileHash) -> bool {
        self.contains_key(&hash.storage_key())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let core = self.inner.read().unwrap();
        core.bloom.check(&key.to_string())
    }

    /// Reset to a freshly sized empty filter.
    pub fn clear(&self) {
        let (items, rate) = self.config.clamped();
        let mut core = self.inner.write().unwrap();
        core.bloom = Bloom::new_for_fp_rate(items, rate);
        core.items = 0;
    }

    /// Adopt another filter's backing state in one publishing step.
    ///
    /// The staged filter is typically built off to the side (a rebuild from
    /// the store) and handed over here; queries either see the old filter
    /// or the complete new one.
    pub fn swap(&self, staged: BloomPreFilter) {
        let staged_core = staged
            .inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut core = self.inner.write().unwrap();
        *core = staged_core;
        debug!(items = core.items, "pre-filter swapped");
    }

    /// Number of keys inserted since construction or the last clear/swap.
    pub fn items(&self) -> u64 {
        self.inner.read().unwrap().items
    }

    pub fn config(&self) -> PreFilterConfig {
        self.config
    }

    /// Persist a binary snapshot of the filter.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let core = self.inner.read().unwrap();
        let snapshot = FilterSnapshotRef {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            config: self.config,
            core: &*core,
        };

        let bytes =
            bincode::serialize(&snapshot).map_err(|e| VigilError::Serialization(e.to_string()))?;
        drop(core);
        std::fs::write(path, &bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "pre-filter snapshot written");
        Ok(())
    }

    /// Load a snapshot written by [`save_to_file`](Self::save_to_file).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let snapshot: FilterSnapshot =
            bincode::deserialize(&bytes).map_err(|e| VigilError::Serialization(e.to_string()))?;

        if snapshot.magic != SNAPSHOT_MAGIC {
            return Err(VigilError::Serialization(format!(
                "not a pre-filter snapshot: {}",
                path.display()
            )));
        }
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(VigilError::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        info!(path = %path.display(), items = snapshot.core.items, "pre-filter snapshot loaded");
        Ok(BloomPreFilter {
            config: snapshot.config,
            inner: RwLock::new(snapshot.core),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_store::FileHash;

    fn hash(n: u8) -> FileHash {
        FileHash::parse(&format!("{:02x}", n).repeat(32)).unwrap()
    }

    fn small() -> BloomPreFilter {
        BloomPreFilter::new(PreFilterConfig {
            expected_items: 1000,
            false_positive_rate: 0.001,
        })
    }

    #[test]
    fn test_insert_then_contains() {
        let filter = small();
        assert!(!filter.contains(&hash(1)));
        filter.insert(&hash(1));
        assert!(filter.contains(&hash(1)));
        assert_eq!(filter.items(), 1);
    }

    #[test]
    fn test_clear_resets() {
        let filter = small();
        filter.insert(&hash(1));
        filter.clear();
        assert!(!filter.contains(&hash(1)));
        assert_eq!(filter.items(), 0);
    }

    #[test]
    fn test_swap_adopts_staged_state() {
        let live = small();
        live.insert(&hash(1));

        let staged = small();
        staged.insert(&hash(2));
        staged.insert(&hash(3));

        live.swap(staged);
        assert!(!live.contains(&hash(1)));
        assert!(live.contains(&hash(2)));
        assert!(live.contains(&hash(3)));
        assert_eq!(live.items(), 2);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefilter.bin");

        let filter = small();
        for n in 0..32 {
            filter.insert(&hash(n));
        }
        filter.save_to_file(&path).unwrap();

        let loaded = BloomPreFilter::load_from_file(&path).unwrap();
        assert_eq!(loaded.items(), 32);
        for n in 0..32 {
            assert!(loaded.contains(&hash(n)), "hash {n} must survive reload");
        }
        assert!(!loaded.contains(&hash(200)));
    }

    #[test]
    fn test_load_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"definitely not a snapshot").unwrap();
        assert!(BloomPreFilter::load_from_file(&path).is_err());
    }

    #[test]
    fn test_zero_config_is_clamped() {
        let filter = BloomPreFilter::new(PreFilterConfig {
            expected_items: 0,
            false_positive_rate: 0.0,
        });
        filter.insert(&hash(1));
        assert!(filter.contains(&hash(1)));
    }
}
