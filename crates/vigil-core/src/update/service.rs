//! Per-updater scheduling service.
//!
//! One worker task per registered updater: a periodic tick, an optional
//! immediate initial run, and a capacity-1 manual trigger channel whose
//! overflow is dropped (a pending trigger already satisfies the request).
//! Every run holds the coordinator's update permit for its whole retry
//! loop, so scans never interleave with a half-applied database.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::ScanUpdateCoordinator;
use crate::error::{Result, VigilError};
use crate::retry::{Backoff, BackoffConfig};
use crate::update::{StatusTracker, Updater, UpdaterState};

/// Service-wide configuration.
#[derive(Debug, Clone)]
pub struct UpdateServiceConfig {
    pub backoff: BackoffConfig,
    /// Run every updater once at startup.
    pub initial_update: bool,
}

impl Default for UpdateServiceConfig {
    fn default() -> Self {
        UpdateServiceConfig {
            backoff: BackoffConfig::default(),
            initial_update: false,
        }
    }
}

struct Registration {
    updater: Arc<dyn Updater>,
    interval: Duration,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Option<mpsc::Receiver<()>>,
}

/// Scheduler over every registered [`Updater`].
pub struct UpdateService {
    coordinator: ScanUpdateCoordinator,
    config: UpdateServiceConfig,
    status: Arc<StatusTracker>,
    registrations: Mutex<Vec<Registration>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl UpdateService {
    pub fn new(coordinator: ScanUpdateCoordinator, config: UpdateServiceConfig) -> Self {
        UpdateService {
            coordinator,
            config,
            status: Arc::new(StatusTracker::new()),
            registrations: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register an updater to run every `interval`, snapshotting its
    /// version and readiness into the status tracker.
    pub async fn register(&self, updater: Arc<dyn Updater>, interval: Duration) {
        let version = updater.version_info().await;
        let ready = updater.is_ready().await;
        self.status.register(updater.name(), version, ready);

        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let mut registrations = self.registrations.lock().unwrap();
        info!(updater = updater.name(), interval_secs = interval.as_secs(), "updater registered");
        registrations.push(Registration {
            updater,
            interval,
            trigger_tx,
            trigger_rx: Some(trigger_rx),
        });
    }

    /// Request an immediate run of one updater.
    ///
    /// Non-blocking and idempotent: when a trigger is already pending, the
    /// new one is dropped.
    pub fn trigger(&self, name: &str) -> Result<()> {
        let registrations = self.registrations.lock().unwrap();
        let registration = registrations
            .iter()
            .find(|r| r.updater.name() == name)
            .ok_or_else(|| VigilError::UnknownUpdater(name.to_string()))?;
        match registration.trigger_tx.try_send(()) {
            Ok(()) => debug!(updater = name, "manual update triggered"),
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!(updater = name, "manual trigger already pending")
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                return Err(VigilError::UnknownUpdater(name.to_string()))
            }
        }
        Ok(())
    }

    /// Spawn one worker per registered updater.
    pub fn start(&self) {
        let mut registrations = self.registrations.lock().unwrap();
        let mut handles = self.handles.lock().unwrap();

        for registration in registrations.iter_mut() {
            let Some(trigger_rx) = registration.trigger_rx.take() else {
                continue; // already started
            };
            let worker = UpdateWorker {
                updater: Arc::clone(&registration.updater),
                interval: registration.interval,
                coordinator: self.coordinator.clone(),
                status: Arc::clone(&self.status),
                backoff: self.config.backoff,
                initial_update: self.config.initial_update,
                cancel: self.cancel.clone(),
            };
            handles.push(tokio::spawn(worker.run(trigger_rx)));
        }
        info!(workers = handles.len(), "update service started");
    }

    /// Cancel and join every worker.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().unwrap();
            handles.drain(..).collect()
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(%err, "update worker panicked");
            }
        }
        info!("update service stopped");
    }

    pub fn status(&self) -> Arc<StatusTracker> {
        Arc::clone(&self.status)
    }
}

/// Everything one updater's worker task needs, detached from the service.
struct UpdateWorker {
    updater: Arc<dyn Updater>,
    interval: Duration,
    coordinator: ScanUpdateCoordinator,
    status: Arc<StatusTracker>,
    backoff: BackoffConfig,
    initial_update: bool,
    cancel: CancellationToken,
}

impl UpdateWorker {
    async fn run(self, mut trigger_rx: mpsc::Receiver<()>) {
        let name = self.updater.name().to_string();
        debug!(updater = %name, "update worker running");

        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // consume the immediate first tick
        self.status
            .set_next_scheduled(&name, Utc::now() + chrono::Duration::from_std(self.interval).unwrap_or_else(|_| chrono::Duration::zero()));

        if self.initial_update {
            self.run_update(&name).await;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {
                    self.run_update(&name).await;
                    self.status.set_next_scheduled(
                        &name,
                        Utc::now() + chrono::Duration::from_std(self.interval).unwrap_or_else(|_| chrono::Duration::zero()),
                    );
                }
                Some(()) = trigger_rx.recv() => {
                    self.run_update(&name).await;
                }
            }
        }
        debug!(updater = %name, "update worker exited");
    }

    /// One scheduled run: exclusive permit, then update-with-backoff.
    async fn run_update(&self, name: &str) {
        let permit = match self.coordinator.acquire_update(&self.cancel).await {
            Ok(permit) => permit,
            Err(err) => {
                debug!(updater = %name, %err, "update permit not acquired");
                return;
            }
        };

        self.status.set_state(name, UpdaterState::Updating);
        let mut backoff = Backoff::new(self.backoff);

        loop {
            if self.cancel.is_cancelled() {
                self.status.set_state(name, UpdaterState::Idle);
                break;
            }

            // The result's error field is informational (e.g. a reload
            // annotation); only the success flag and a hard Err decide
            // whether to retry.
            let failure = match self.updater.update(&self.cancel).await {
                Ok(result) if result.success => {
                    info!(
                        updater = %name,
                        downloaded = result.downloaded,
                        skipped = result.skipped,
                        "update succeeded"
                    );
                    let version = self.updater.version_info().await;
                    let ready = self.updater.is_ready().await;
                    self.status.record_success(name, version, ready);
                    if let Some(annotation) = result.error {
                        // e.g. a failed daemon reload on an otherwise good run
                        self.status.record_error(name, annotation);
                    }
                    break;
                }
                Ok(result) => result
                    .error
                    .unwrap_or_else(|| format!("update reported {} failures", result.failed)),
                Err(err) => err.to_string(),
            };

            warn!(updater = %name, error = %failure, "update attempt failed");
            self.status.record_error(name, &failure);

            match backoff.next_delay() {
                Some(delay) => {
                    debug!(updater = %name, delay_ms = delay.as_millis() as u64, "retrying update");
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.status.set_state(name, UpdaterState::Idle);
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    warn!(updater = %name, "update retries exhausted");
                    self.status.set_state(name, UpdaterState::Failed);
                    break;
                }
            }
        }

        permit.release();
    }
}
