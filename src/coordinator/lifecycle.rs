// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache startup and teardown.
//!
//! `init()` wires the tiers, the fetch orchestrator, the invalidation
//! channel and its consumer task. Backend tiers degrade independently: a
//! durable store that cannot open leaves the cache running on L1 (and L3
//! if configured) rather than failing construction.
//!
//! `dispose()` is the inverse and must be called when the owning view
//! goes away; it stops the invalidation channel, the signal consumer and
//! any queued prefetch so a remount cannot leak background loops.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::flush::TierSet;
use super::types::{CacheNotice, CacheState, FlushScope};
use super::CatalogCache;
use crate::config::CatalogCacheConfig;
use crate::fetch::FetchOrchestrator;
use crate::invalidation::{ChannelConfig, InvalidationChannel, InvalidationSignal};
use crate::key::CacheKey;
use crate::prefetch::{OptimisticQuality, PrefetchScheduler};
use crate::source::{CatalogSource, WATCHED_TABLES};
use crate::tier::durable::DurableTier;
use crate::tier::flat::FlatTier;
use crate::tier::memory::MemoryTier;

impl CatalogCache {
    /// Build the cache and start its background tasks.
    ///
    /// Never fails: the durable and flat tiers are optional and a tier
    /// that cannot open is logged and skipped.
    pub async fn init(config: CatalogCacheConfig, source: Arc<dyn CatalogSource>) -> Self {
        let l2 = match &config.durable_path {
            Some(path) => match DurableTier::new(path).await {
                Ok(tier) => {
                    let tier = Arc::new(tier);
                    // startup maintenance sweep, off the init path
                    let sweep = Arc::clone(&tier);
                    tokio::spawn(async move { sweep.clear_expired_data().await });
                    Some(tier)
                }
                Err(e) => {
                    warn!(error = %e, "Durable tier unavailable; continuing without L2");
                    crate::metrics::record_storage_degraded("L2");
                    None
                }
            },
            None => None,
        };
        let l3 = match &config.flat_dir {
            Some(dir) => Some(Arc::new(FlatTier::new(dir.clone()).await)),
            None => None,
        };

        let tiers = TierSet {
            l1_pages: Arc::new(MemoryTier::new()),
            l1_categories: Arc::new(MemoryTier::new()),
            l2,
            l3,
        };

        let (notices, _) = broadcast::channel(64);
        let orchestrator = Arc::new(FetchOrchestrator::new(
            Arc::clone(&source),
            config.clone(),
            Arc::clone(&tiers.l1_pages),
            Arc::clone(&tiers.l1_categories),
            tiers.l2.clone(),
            tiers.l3.clone(),
            notices.clone(),
        ));

        let (channel, signals) = InvalidationChannel::start(
            source,
            WATCHED_TABLES.to_vec(),
            ChannelConfig {
                subscribe_timeout: config.subscribe_timeout(),
                poll_interval: config.poll_interval(),
                resubscribe_after_polls: config.resubscribe_after_polls,
            },
        );

        let consumer = tokio::spawn(consume_signals(
            signals,
            tiers.clone(),
            Arc::clone(&orchestrator),
            notices.clone(),
        ));

        let prefetch = PrefetchScheduler::new(
            config.prefetch_enabled,
            config.prefetch_stagger(),
            Arc::new(OptimisticQuality),
        );

        let (state_tx, state_rx) = watch::channel(CacheState::Ready);
        info!(
            l2 = tiers.l2.is_some(),
            l3 = tiers.l3.is_some(),
            "Catalog cache initialized"
        );

        Self {
            config,
            tiers,
            orchestrator,
            channel,
            consumer: Some(consumer),
            prefetch,
            notices,
            state: state_tx,
            state_rx,
        }
    }

    /// Stop every background task. Idempotent; the cache is unusable for
    /// reads afterwards only in the sense that nothing refreshes it.
    pub async fn dispose(&mut self) {
        if *self.state_rx.borrow() == CacheState::Disposed {
            return;
        }
        self.channel.close().await;
        if let Some(task) = self.consumer.take() {
            task.abort();
        }
        self.prefetch.abort();
        let _ = self.state.send(CacheState::Disposed);
        info!("Catalog cache disposed");
    }
}

/// Turn invalidation signals into flushes, notices and refetches.
async fn consume_signals(
    mut signals: mpsc::Receiver<InvalidationSignal>,
    tiers: TierSet,
    orchestrator: Arc<FetchOrchestrator>,
    notices: broadcast::Sender<CacheNotice>,
) {
    while let Some(signal) = signals.recv().await {
        match signal {
            InvalidationSignal::Change(event) if event.table.is_engagement() => {
                debug!(table = event.table.as_str(), "Engagement change");
                tiers.flush(FlushScope::Engagement).await;
                let _ = notices.send(CacheNotice::EngagementChanged);
            }
            InvalidationSignal::Change(event) => {
                info!(table = event.table.as_str(), "Catalog change; flushing pages");
                tiers.flush(FlushScope::Catalog).await;
                let _ = notices.send(CacheNotice::Invalidated { scope: FlushScope::Catalog });
                refresh_first_page(&orchestrator, &notices).await;
            }
            // Polling cannot see which rows changed; refetch page 1 and
            // let last-writer-wins reconcile the tiers.
            InvalidationSignal::PollSweep => {
                refresh_first_page(&orchestrator, &notices).await;
            }
        }
    }
}

async fn refresh_first_page(
    orchestrator: &Arc<FetchOrchestrator>,
    notices: &broadcast::Sender<CacheNotice>,
) {
    let key = CacheKey::catalog(1);
    match orchestrator.fetch_page(key.clone(), true).await {
        Ok(_) => {
            let _ = notices.send(CacheNotice::Refreshed { key });
        }
        Err(e) => debug!(error = %e, "First-page refresh failed; keeping cached copy"),
    }
}
