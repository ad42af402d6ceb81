//! Vigil Core Library
//!
//! The concurrent lookup-and-update core of the Vigil scanning service:
//! a two-tier hash lookup engine (Bloom pre-filter + signature store), a
//! scan worker pool driving an external antivirus binary, and an update
//! orchestrator that refreshes threat databases while excluding
//! concurrent scans.

pub mod bloom;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod health;
pub mod retry;
pub mod scanner;
pub mod service;
pub mod telemetry;
pub mod update;
pub mod worker;

pub use bloom::{BloomPreFilter, PreFilterConfig};
pub use coordinator::{ScanPermit, ScanUpdateCoordinator, UpdatePermit};
pub use engine::{EngineCounters, LookupEngine, LookupOutcome, Verdict};
pub use error::{Result, VigilError};
pub use health::{HealthChecker, HealthCheckerConfig, HealthStatus, ProbeFn};
pub use retry::{Backoff, BackoffConfig, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use scanner::{classify_detection, ClamAvConfig, ClamAvScanner, Scanner};
pub use service::{ScanRecord, ScanService};
pub use telemetry::init_tracing;
pub use update::{
    CheckResult, ExternalDbConfig, ExternalDbUpdater, MirrorDbConfig, MirrorDbUpdater,
    SignatureFeed, SignatureFeedUpdater, StatusTracker, UpdateResult, UpdateService,
    UpdateServiceConfig, Updater, UpdaterState, UpdaterStatus, VersionInfo,
};
pub use worker::{QueuedScan, ScanWorkerPool, WorkerDeps, WorkerPoolConfig};

pub use vigil_store::{
    FileHash, HashAlgorithm, JobStatus, ScanJob, ScanResult, ScanStatus, Severity, Signature,
    StoreError, ThreatKind,
};

/// Vigil version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
