//! Signature-feed updater.
//!
//! Aggregates external intelligence feeds into the lookup engine. Feed
//! adapters are pure data sources; this driver is the only writer to the
//! engine on their behalf.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_store::Signature;

use crate::engine::LookupEngine;
use crate::error::{Result, VigilError};
use crate::update::{CheckResult, UpdateResult, Updater, VersionInfo};

/// A source of signatures (abuse.ch style feed, internal list, ...).
///
/// Fetch-only: persistence is the updater's job.
#[async_trait]
pub trait SignatureFeed: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<Signature>>;
}

/// Updater that drains every registered feed into the engine.
pub struct SignatureFeedUpdater {
    feeds: Vec<Arc<dyn SignatureFeed>>,
    engine: Arc<LookupEngine>,
}

impl SignatureFeedUpdater {
    pub const NAME: &'static str = "signature-feeds";

    pub fn new(engine: Arc<LookupEngine>) -> Self {
        SignatureFeedUpdater {
            feeds: Vec::new(),
            engine,
        }
    }

    pub fn with_feed(mut self, feed: Arc<dyn SignatureFeed>) -> Self {
        self.feeds.push(feed);
        self
    }

    pub fn add_feed(&mut self, feed: Arc<dyn SignatureFeed>) {
        self.feeds.push(feed);
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }
}

#[async_trait]
impl Updater for SignatureFeedUpdater {
    fn name(&self) -> &str {
        Self::NAME
    }

    /// Fetch every feed, then batch the aggregate into the engine.
    ///
    /// A failing feed counts toward `failed` without aborting its peers;
    /// an engine write failure fails the whole update.
    async fn update(&self, cancel: &CancellationToken) -> Result<UpdateResult> {
        let started = Instant::now();
        let mut result = UpdateResult::default();
        let mut aggregated: Vec<Signature> = Vec::new();
        let mut feed_errors: Vec<String> = Vec::new();

        for feed in &self.feeds {
            if cancel.is_cancelled() {
                return Err(VigilError::Cancelled);
            }
            match feed.fetch(cancel).await {
                Ok(signatures) => {
                    info!(feed = feed.name(), count = signatures.len(), "feed fetched");
                    result.downloaded += signatures.len() as u32;
                    aggregated.extend(signatures);
                }
                Err(err) => {
                    warn!(feed = feed.name(), %err, "feed fetch failed");
                    result.failed += 1;
                    feed_errors.push(format!("{}: {err}", feed.name()));
                }
            }
        }

        self.engine.batch_add_signatures(&aggregated).await?;

        result.success = result.failed == 0;
        result.duration = started.elapsed();
        if !feed_errors.is_empty() {
            result.error = Some(feed_errors.join("; "));
        }
        result
            .file_versions
            .insert("signatures".to_string(), self.engine.signature_count().await?);
        Ok(result)
    }

    /// Feeds are dynamic with no remote version to compare: an update is
    /// available whenever any feed is registered.
    async fn check_for_updates(&self, _cancel: &CancellationToken) -> Result<CheckResult> {
        let current = self.engine.signature_count().await.unwrap_or(0);
        let mut details = HashMap::new();
        for feed in &self.feeds {
            details.insert(feed.name().to_string(), "registered".to_string());
        }
        Ok(CheckResult {
            update_available: !self.feeds.is_empty(),
            current_version: current,
            available_version: current,
            details,
        })
    }

    /// The signature count serves as a monotone version proxy.
    async fn version_info(&self) -> VersionInfo {
        let count = self.engine.signature_count().await.unwrap_or(0);
        VersionInfo {
            version: count,
            ..VersionInfo::default()
        }
    }

    async fn is_ready(&self) -> bool {
        self.engine.signature_count().await.is_ok()
    }
}
