// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public read and invalidation surface of [`CatalogCache`].

use std::sync::Arc;

use tracing::debug;

use super::types::{CacheNotice, CacheState, FlushScope, TierPresence};
use super::CatalogCache;
use crate::entry::Page;
use crate::invalidation::ChannelState;
use crate::key::{canonicalize_term, CacheKey};
use crate::model::{CatalogViewModel, Category};
use crate::source::FetchError;
use tokio::sync::{broadcast, watch};

impl CatalogCache {
    /// Load a catalog page (1-based).
    ///
    /// Serves from the fastest warm tier unless `force_refresh`; a
    /// successful load with more data behind it queues a prefetch of the
    /// next page.
    pub async fn get_page(
        &self,
        page: u32,
        force_refresh: bool,
    ) -> Result<Page<CatalogViewModel>, FetchError> {
        let key = CacheKey::catalog(page.max(1));
        let result = self.orchestrator.fetch_page(key.clone(), force_refresh).await;
        if let Ok(loaded) = &result {
            self.maybe_prefetch_next(&key, loaded);
        }
        result
    }

    /// Load a page of search results for a raw user-typed term.
    ///
    /// The term is canonicalized so equivalent queries share cache
    /// entries; a term that canonicalizes to empty is the plain catalog.
    pub async fn search(
        &self,
        term: &str,
        page: u32,
    ) -> Result<Page<CatalogViewModel>, FetchError> {
        if canonicalize_term(term).is_empty() {
            return self.get_page(page, false).await;
        }
        let key = CacheKey::search(term, page.max(1));
        let result = self.orchestrator.fetch_page(key.clone(), false).await;
        if let Ok(loaded) = &result {
            self.maybe_prefetch_next(&key, loaded);
        }
        result
    }

    fn maybe_prefetch_next(&self, key: &CacheKey, loaded: &Page<CatalogViewModel>) {
        if !loaded.has_more() {
            return;
        }
        let next = CacheKey { namespace: key.namespace.clone(), page: key.page + 1 };
        self.prefetch.schedule(next, Arc::clone(&self.orchestrator));
    }

    /// The category list, if any fetch has populated it and it is still
    /// valid. Falls back to the durable tier.
    pub async fn categories(&self) -> Option<Vec<Category>> {
        if let Some(categories) = self.orchestrator.cached_categories() {
            return Some(categories);
        }
        if let Some(l2) = &self.tiers.l2 {
            match l2.load_categories().await {
                Ok(found) => return found,
                Err(e) => debug!(error = %e, "Durable category read degraded to miss"),
            }
        }
        None
    }

    /// Drop everything from every tier. The next read goes to the network.
    pub async fn invalidate_all(&self) {
        self.tiers.flush(FlushScope::All).await;
        let _ = self.notices.send(CacheNotice::Invalidated { scope: FlushScope::All });
    }

    /// Error-recovery path: discard any cached copy of one page, then
    /// fetch it fresh.
    pub async fn retry_page(&self, page: u32) -> Result<Page<CatalogViewModel>, FetchError> {
        let key = CacheKey::catalog(page.max(1));
        self.tiers.clear_key(&key).await;
        self.orchestrator.fetch_page(key, true).await
    }

    /// Subscribe to cache-change notices (refreshes, invalidations).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheNotice> {
        self.notices.subscribe()
    }

    /// Current coordinator state.
    #[must_use]
    pub fn state(&self) -> CacheState {
        *self.state_rx.borrow()
    }

    /// Watch coordinator state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<CacheState> {
        self.state_rx.clone()
    }

    /// Current invalidation channel state (push vs polling).
    #[must_use]
    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Report which tiers currently hold a catalog page (diagnostics).
    pub async fn status(&self, page: u32) -> TierPresence {
        let key = CacheKey::catalog(page.max(1));
        let in_l1 = self.tiers.l1_pages.contains_valid(&key);
        let in_l2 = match &self.tiers.l2 {
            Some(l2) => l2
                .warm_pages(&key.namespace)
                .await
                .map(|pages| pages.contains(&key.page))
                .unwrap_or(false),
            None => false,
        };
        let in_l3 = match &self.tiers.l3 {
            Some(l3) => l3.has_page(&key).await,
            None => false,
        };
        TierPresence { in_l1, in_l2, in_l3 }
    }
}
