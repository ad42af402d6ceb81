//! Periodic liveness probing of named components.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, VigilError};

/// A registered probe: an async check returning `Err(cause)` on failure.
pub type ProbeFn = Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<(), String>> + Send + Sync>;

/// Health checker tuning.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheckerConfig {
    /// Deadline applied to each probe invocation.
    pub check_timeout: Duration,
    /// Consecutive failures before a component is marked unhealthy.
    pub unhealthy_threshold: u32,
    /// Cadence of the background check-all loop.
    pub interval: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        HealthCheckerConfig {
            check_timeout: Duration::from_secs(10),
            unhealthy_threshold: 3,
            interval: Duration::from_secs(30),
        }
    }
}

/// Per-component probe bookkeeping. Snapshots are cloned out.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub total_checks: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    /// Running mean of probe wall time.
    pub avg_response_ms: f64,
    pub last_error: Option<String>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus {
            healthy: true,
            last_check: None,
            total_checks: 0,
            total_failures: 0,
            consecutive_failures: 0,
            avg_response_ms: 0.0,
            last_error: None,
        }
    }
}

/// Runs named async probes on a schedule and keeps per-probe statistics.
pub struct HealthChecker {
    config: HealthCheckerConfig,
    probes: RwLock<HashMap<String, ProbeFn>>,
    status: Arc<RwLock<HashMap<String, HealthStatus>>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckerConfig) -> Self {
        HealthChecker {
            config,
            probes: RwLock::new(HashMap::new()),
            status: Arc::new(RwLock::new(HashMap::new())),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Register (or replace) a named probe.
    pub fn register(&self, name: impl Into<String>, probe: ProbeFn) {
        let name = name.into();
        self.probes.write().unwrap().insert(name.clone(), probe);
        self.status
            .write()
            .unwrap()
            .entry(name)
            .or_insert_with(HealthStatus::default);
    }

    /// Run one probe now and fold the outcome into its statistics.
    ///
    /// Returns the probe's health after this check.
    pub async fn check(&self, name: &str) -> Result<bool> {
        let probe = {
            let probes = self.probes.read().unwrap();
            probes
                .get(name)
                .cloned()
                .ok_or_else(|| VigilError::UnknownProbe(name.to_string()))?
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.config.check_timeout, probe()).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "probe timed out after {}s",
                self.config.check_timeout.as_secs()
            )),
        };
        let elapsed_ms = started.elapsed().as_micros() as f64 / 1000.0;

        let mut statuses = self.status.write().unwrap();
        let status = statuses.entry(name.to_string()).or_default();
        status.last_check = Some(Utc::now());
        status.total_checks += 1;
        status.avg_response_ms +=
            (elapsed_ms - status.avg_response_ms) / status.total_checks as f64;

        match outcome {
            Ok(()) => {
                status.consecutive_failures = 0;
                status.healthy = true;
                status.last_error = None;
            }
            Err(cause) => {
                status.total_failures += 1;
                status.consecutive_failures += 1;
                status.last_error = Some(cause.clone());
                if status.consecutive_failures >= self.config.unhealthy_threshold {
                    if status.healthy {
                        warn!(probe = name, %cause, "component marked unhealthy");
                    }
                    status.healthy = false;
                }
            }
        }
        Ok(status.healthy)
    }

    /// Run every registered probe once.
    pub async fn check_all(&self) {
        let names: Vec<String> = {
            let probes = self.probes.read().unwrap();
            probes.keys().cloned().collect()
        };
        for name in names {
            if let Err(err) = self.check(&name).await {
                warn!(probe = %name, %err, "health check failed to run");
            }
        }
    }

    /// Start the background loop: one immediate sweep, then one per tick.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return;
        }

        let checker = Arc::clone(self);
        let cancel = self.cancel.clone();
        *handle = Some(tokio::spawn(async move {
            checker.check_all().await;
            let mut tick = tokio::time::interval(checker.config.interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => checker.check_all().await,
                }
            }
            debug!("health loop exited");
        }));
        info!("health checker started");
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Deep-copied status of one probe.
    pub fn status(&self, name: &str) -> Option<HealthStatus> {
        self.status.read().unwrap().get(name).cloned()
    }

    /// Deep-copied status of every probe.
    pub fn statuses(&self) -> HashMap<String, HealthStatus> {
        self.status.read().unwrap().clone()
    }
}
