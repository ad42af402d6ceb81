//! Vigil daemon: wires the stores, lookup engine, worker pool, and update
//! service together and runs until interrupted.
//!
//! Transports (HTTP, message queue) attach to the [`ScanService`] handle;
//! this binary only owns component lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};

use vigil_core::{
    BloomPreFilter, ClamAvConfig, ClamAvScanner, ExternalDbConfig, ExternalDbUpdater,
    HealthChecker, HealthCheckerConfig, LookupEngine, MirrorDbConfig, MirrorDbUpdater,
    PreFilterConfig, ProbeFn, ScanService, ScanUpdateCoordinator, ScanWorkerPool, Scanner,
    SignatureFeedUpdater, UpdateService, UpdateServiceConfig, WorkerDeps, WorkerPoolConfig,
};
use vigil_store::{JobStore, SurrealJobStore, SurrealScanCache, SurrealSignatureStore};

#[derive(Debug, Parser)]
#[command(name = "vigild", version, about = "Vigil scanning daemon")]
struct Args {
    /// Root directory for all durable state.
    #[arg(long, env = "VIGIL_DATA_DIR", default_value = "/var/lib/vigil")]
    data_dir: PathBuf,

    /// Scanner binary name or path.
    #[arg(long, env = "VIGIL_SCANNER_BIN", default_value = "clamscan")]
    scanner_bin: String,

    /// Number of scan workers.
    #[arg(long, env = "VIGIL_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Scan queue capacity.
    #[arg(long, env = "VIGIL_QUEUE_CAPACITY", default_value_t = 64)]
    queue_capacity: usize,

    /// Seconds between signature database refreshes.
    #[arg(long, env = "VIGIL_UPDATE_INTERVAL_SECS", default_value_t = 3600)]
    update_interval_secs: u64,

    /// Run every updater once at startup.
    #[arg(long, env = "VIGIL_INITIAL_UPDATE", default_value_t = false)]
    initial_update: bool,

    /// Signature database mirror base URLs (comma separated).
    #[arg(long, env = "VIGIL_MIRRORS", value_delimiter = ',')]
    mirrors: Vec<String>,

    /// Expected signature count used to size the pre-filter.
    #[arg(long, env = "VIGIL_EXPECTED_SIGNATURES", default_value_t = 1_000_000)]
    expected_signatures: usize,

    /// Emit JSON log lines.
    #[arg(long, env = "VIGIL_LOG_JSON", default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    vigil_core::init_tracing(args.json_logs, Level::INFO);
    info!(version = vigil_core::VERSION, "vigild starting");

    // Stores, one directory each.
    let signatures = Arc::new(
        SurrealSignatureStore::open(&args.data_dir.join("signatures"))
            .await
            .context("open signature store")?,
    );
    let jobs = Arc::new(
        SurrealJobStore::open(&args.data_dir.join("jobs"))
            .await
            .context("open job store")?,
    );
    let cache = Arc::new(
        SurrealScanCache::open(&args.data_dir.join("cache"))
            .await
            .context("open scan cache")?,
    );

    // Lookup engine: warm-load the pre-filter snapshot when one exists,
    // rebuild from the store otherwise.
    let prefilter_path = args.data_dir.join("prefilter.bin");
    let prefilter_config = PreFilterConfig {
        expected_items: args.expected_signatures,
        false_positive_rate: 0.001,
    };
    let engine = match BloomPreFilter::load_from_file(&prefilter_path) {
        Ok(prefilter) => Arc::new(LookupEngine::with_prefilter(signatures.clone(), prefilter)),
        Err(err) => {
            info!(%err, "no usable pre-filter snapshot, rebuilding from store");
            let engine = Arc::new(LookupEngine::new(signatures.clone(), prefilter_config));
            engine.rebuild_prefilter().await.context("rebuild pre-filter")?;
            engine
        }
    };

    let coordinator = ScanUpdateCoordinator::new();

    let scanner: Arc<dyn Scanner> = Arc::new(ClamAvScanner::new(ClamAvConfig {
        binary: args.scanner_bin.clone(),
        database_dir: Some(args.data_dir.join("clamav-db")),
        ..ClamAvConfig::default()
    }));

    let pool = Arc::new(ScanWorkerPool::new(
        WorkerPoolConfig {
            workers: args.workers,
            queue_capacity: args.queue_capacity,
            ..WorkerPoolConfig::default()
        },
        WorkerDeps {
            jobs: jobs.clone(),
            cache: cache.clone(),
            engine: engine.clone(),
            scanner: Some(scanner.clone()),
            coordinator: coordinator.clone(),
        },
    ));
    pool.start();

    // Updaters: signature feeds (adapters attach at the transport layer),
    // the ClamAV mirror databases, and the binary-driven vulnerability DB.
    let updates = Arc::new(UpdateService::new(
        coordinator.clone(),
        UpdateServiceConfig {
            initial_update: args.initial_update,
            ..UpdateServiceConfig::default()
        },
    ));
    let interval = Duration::from_secs(args.update_interval_secs);

    updates
        .register(Arc::new(SignatureFeedUpdater::new(engine.clone())), interval)
        .await;

    let mirror_config = MirrorDbConfig {
        database_dir: args.data_dir.join("clamav-db"),
        mirrors: if args.mirrors.is_empty() {
            MirrorDbConfig::default().mirrors
        } else {
            args.mirrors.clone()
        },
        ..MirrorDbConfig::default()
    };
    match MirrorDbUpdater::new(mirror_config) {
        Ok(mirror) => updates.register(Arc::new(mirror), interval).await,
        Err(err) => warn!(%err, "mirror updater disabled"),
    }

    updates
        .register(
            Arc::new(ExternalDbUpdater::new(ExternalDbConfig {
                cache_dir: args.data_dir.join("vulndb"),
                ..ExternalDbConfig::default()
            })),
            interval,
        )
        .await;
    updates.start();

    // Liveness probes for the pieces operators page on.
    let health = Arc::new(HealthChecker::new(HealthCheckerConfig::default()));
    let store_probe: ProbeFn = {
        let engine = engine.clone();
        Arc::new(move || {
            let engine = engine.clone();
            Box::pin(async move {
                engine
                    .signature_count()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
        })
    };
    health.register("signature-store", store_probe);
    let scanner_probe: ProbeFn = {
        let scanner = scanner.clone();
        Arc::new(move || {
            let scanner = scanner.clone();
            Box::pin(async move {
                scanner
                    .engine_version()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
        })
    };
    health.register("scanner", scanner_probe);
    health.start();

    // Housekeeping: drop terminal jobs past their retention age and purge
    // expired cache rows.
    let maintenance_cancel = tokio_util::sync::CancellationToken::new();
    let maintenance = tokio::spawn({
        let jobs = jobs.clone();
        let cache = cache.clone();
        let cancel = maintenance_cancel.clone();
        async move {
            let retention = Duration::from_secs(7 * 24 * 3600);
            let mut tick = tokio::time::interval(Duration::from_secs(3600));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        match jobs.cleanup(retention).await {
                            Ok(0) => {}
                            Ok(deleted) => info!(deleted, "expired jobs removed"),
                            Err(err) => warn!(%err, "job cleanup failed"),
                        }
                        if let Err(err) = cache.purge_expired().await {
                            warn!(%err, "cache purge failed");
                        }
                    }
                }
            }
        }
    });

    let service = ScanService::new(engine.clone(), jobs.clone(), cache.clone(), pool.clone());
    info!(queue = service.queue_len(), "vigild ready");

    tokio::signal::ctrl_c().await.context("wait for shutdown signal")?;
    info!("shutdown signal received");

    // Stop intake first, then the background machinery.
    pool.stop().await;
    updates.stop().await;
    health.stop().await;
    maintenance_cancel.cancel();
    let _ = maintenance.await;

    if let Err(err) = engine.prefilter().save_to_file(&prefilter_path) {
        warn!(%err, "pre-filter snapshot not written");
    }

    info!("vigild stopped");
    Ok(())
}
