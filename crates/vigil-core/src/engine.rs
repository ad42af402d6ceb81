//! Two-tier hash lookup engine.
//!
//! Composes the signature store (source of truth) with the Bloom pre-filter
//! (cheap negative answers). Writes land in the store first and only then
//! touch the pre-filter, so a hash is never claimed present before its
//! record is durable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use vigil_store::{FileHash, HashAlgorithm, Signature, SignatureStore};

use crate::bloom::{BloomPreFilter, PreFilterConfig};
use crate::error::Result;

/// What a lookup concluded about a hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not a known threat (possibly a pre-filter miss, possibly a store miss).
    Unknown,
    /// A signature matched; the record is attached.
    Malware,
}

/// Outcome of one lookup.
#[derive(Debug, Clone)]
pub struct LookupOutcome {
    pub verdict: Verdict,
    /// Populated iff verdict is [`Verdict::Malware`].
    pub signature: Option<Signature>,
    /// Whether the pre-filter claimed the hash present. False means the
    /// store was never consulted.
    pub prefilter_hit: bool,
    /// Wall time of the lookup in milliseconds, sub-millisecond precision.
    pub latency_ms: f64,
}

/// Monotonic engine counters. Relaxed increments; exactness not required.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineCounters {
    pub lookups: u64,
    pub prefilter_rejections: u64,
}

/// The lookup engine: store + pre-filter + counters.
pub struct LookupEngine {
    store: Arc<dyn SignatureStore>,
    prefilter: BloomPreFilter,
    prefilter_config: PreFilterConfig,
    lookups: AtomicU64,
    rejections: AtomicU64,
}

impl LookupEngine {
    pub fn new(store: Arc<dyn SignatureStore>, config: PreFilterConfig) -> Self {
        LookupEngine {
            store,
            prefilter: BloomPreFilter::new(config),
            prefilter_config: config,
            lookups: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Build an engine around a pre-filter restored from a snapshot file.
    pub fn with_prefilter(store: Arc<dyn SignatureStore>, prefilter: BloomPreFilter) -> Self {
        let prefilter_config = prefilter.config();
        LookupEngine {
            store,
            prefilter,
            prefilter_config,
            lookups: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Answer whether a hash corresponds to a known threat.
    ///
    /// A pre-filter miss is definitive and skips the store read entirely.
    /// Store errors propagate; an absent record after a pre-filter hit is a
    /// false positive and reports [`Verdict::Unknown`].
    pub async fn lookup(&self, hash: &FileHash) -> Result<LookupOutcome> {
        let start = Instant::now();
        self.lookups.fetch_add(1, Ordering::Relaxed);

        if !self.prefilter.contains(hash) {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            return Ok(LookupOutcome {
                verdict: Verdict::Unknown,
                signature: None,
                prefilter_hit: false,
                latency_ms: elapsed_ms(start),
            });
        }

        let signature = self.store.get(hash).await?;
        let outcome = match signature {
            Some(signature) => {
                debug!(hash = %hash.short(), detection = %signature.detection, "lookup hit");
                LookupOutcome {
                    verdict: Verdict::Malware,
                    signature: Some(signature),
                    prefilter_hit: true,
                    latency_ms: elapsed_ms(start),
                }
            }
            None => LookupOutcome {
                verdict: Verdict::Unknown,
                signature: None,
                prefilter_hit: true,
                latency_ms: elapsed_ms(start),
            },
        };
        Ok(outcome)
    }

    /// Persist one signature, then publish its hashes to the pre-filter.
    pub async fn add_signature(&self, signature: &Signature) -> Result<()> {
        self.batch_add_signatures(std::slice::from_ref(signature))
            .await
    }

    /// Persist a batch, then publish every populated hash.
    ///
    /// If the store write fails the pre-filter is left untouched.
    pub async fn batch_add_signatures(&self, signatures: &[Signature]) -> Result<()> {
        if signatures.is_empty() {
            return Ok(());
        }

        self.store.batch_put(signatures).await?;

        for signature in signatures {
            // Validated during batch_put; a failure here would have aborted
            // the store write already.
            match signature.hashes() {
                Ok(hashes) => {
                    for hash in &hashes {
                        self.prefilter.insert(hash);
                    }
                }
                Err(err) => warn!(%err, "signature skipped by pre-filter publish"),
            }
        }
        Ok(())
    }

    /// Rebuild the pre-filter from the full store contents and swap it in.
    ///
    /// Readers keep hitting the old filter until the swap; they never see a
    /// partially populated one. Returns the number of keys indexed.
    pub async fn rebuild_prefilter(&self) -> Result<u64> {
        let staged = BloomPreFilter::new(self.prefilter_config);

        for algorithm in HashAlgorithm::all() {
            let prefix = algorithm.key_prefix();
            self.store
                .for_each_hash(algorithm, &mut |hex| {
                    staged.insert_key(&format!("{prefix}{hex}"));
                    Ok(())
                })
                .await?;
        }

        let indexed = staged.items();
        self.prefilter.swap(staged);
        info!(indexed, "pre-filter rebuilt");
        Ok(indexed)
    }

    /// Count of primary signature records in the store.
    pub async fn signature_count(&self) -> Result<u64> {
        Ok(self.store.stats().await?.signature_count)
    }

    pub fn counters(&self) -> EngineCounters {
        EngineCounters {
            lookups: self.lookups.load(Ordering::Relaxed),
            prefilter_rejections: self.rejections.load(Ordering::Relaxed),
        }
    }

    pub fn prefilter(&self) -> &BloomPreFilter {
        &self.prefilter
    }

    pub fn store(&self) -> &Arc<dyn SignatureStore> {
        &self.store
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_micros() as f64 / 1000.0
}
