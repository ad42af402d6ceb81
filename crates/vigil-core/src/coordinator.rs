//! Scan/update coordination gate.
//!
//! Many concurrent scans may hold the gate together; an update holds it
//! exclusively. Waiters park on a watch-channel rendezvous that every
//! release fires, and subscribe to it while still holding the state lock,
//! so a release between "condition checked" and "parked" cannot be missed.
//!
//! Cancellation is storm-safe: a cancelled waiter drops its receiver and
//! returns, leaving nothing behind.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, VigilError};

#[derive(Debug, Default)]
struct GateState {
    active_scans: usize,
    updating: bool,
}

struct GateInner {
    state: Mutex<GateState>,
    // Generation counter; the value is irrelevant, only the version bump.
    rendezvous: watch::Sender<u64>,
}

impl GateInner {
    fn fire(&self) {
        self.rendezvous.send_modify(|generation| *generation += 1);
    }
}

/// Reader/writer gate between scan workers and database updates.
///
/// Invariant: an update never overlaps any scan; scans overlap each other
/// freely.
#[derive(Clone)]
pub struct ScanUpdateCoordinator {
    inner: Arc<GateInner>,
}

impl Default for ScanUpdateCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanUpdateCoordinator {
    pub fn new() -> Self {
        let (rendezvous, _) = watch::channel(0);
        ScanUpdateCoordinator {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::default()),
                rendezvous,
            }),
        }
    }

    /// Wait until no update holds the gate, then register a scan.
    ///
    /// Fails with [`VigilError::Cancelled`] if the token is cancelled
    /// before or while waiting.
    pub async fn acquire_scan(&self, cancel: &CancellationToken) -> Result<ScanPermit> {
        loop {
            if cancel.is_cancelled() {
                return Err(VigilError::Cancelled);
            }

            let mut rendezvous = {
                let mut state = self.inner.state.lock().unwrap();
                if !state.updating {
                    state.active_scans += 1;
                    return Ok(ScanPermit {
                        inner: Arc::clone(&self.inner),
                        released: false,
                    });
                }
                // Subscribe while holding the lock: any release after this
                // point bumps the generation we are about to await.
                self.inner.rendezvous.subscribe()
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(VigilError::Cancelled),
                _ = rendezvous.changed() => {}
            }
        }
    }

    /// Wait until neither scans nor another update hold the gate, then
    /// claim exclusive access.
    pub async fn acquire_update(&self, cancel: &CancellationToken) -> Result<UpdatePermit> {
        loop {
            if cancel.is_cancelled() {
                return Err(VigilError::Cancelled);
            }

            let mut rendezvous = {
                let mut state = self.inner.state.lock().unwrap();
                if !state.updating && state.active_scans == 0 {
                    state.updating = true;
                    return Ok(UpdatePermit {
                        inner: Arc::clone(&self.inner),
                        released: false,
                    });
                }
                self.inner.rendezvous.subscribe()
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(VigilError::Cancelled),
                _ = rendezvous.changed() => {}
            }
        }
    }

    /// Number of scans currently holding the gate.
    pub fn active_scans(&self) -> usize {
        self.inner.state.lock().unwrap().active_scans
    }

    /// Whether an update currently holds the gate.
    pub fn is_updating(&self) -> bool {
        self.inner.state.lock().unwrap().updating
    }
}

/// Held by a scan for the duration of its critical section.
///
/// Released on drop; an explicit [`release`](Self::release) is equivalent
/// and safe to combine with drop (release happens exactly once).
pub struct ScanPermit {
    inner: Arc<GateInner>,
    released: bool,
}

impl ScanPermit {
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.inner.state.lock().unwrap();
        state.active_scans = state.active_scans.saturating_sub(1);
        if state.active_scans == 0 {
            self.inner.fire();
        }
    }
}

impl Drop for ScanPermit {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// Held by an update for the duration of its exclusive section.
pub struct UpdatePermit {
    inner: Arc<GateInner>,
    released: bool,
}

impl UpdatePermit {
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.inner.state.lock().unwrap();
        state.updating = false;
        self.inner.fire();
    }
}

impl Drop for UpdatePermit {
    fn drop(&mut self) {
        self.release_once();
    }
}
