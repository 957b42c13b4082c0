// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Scoped invalidation flushes across the tier set.
//!
//! Flush scope depends on what changed:
//! - catalog rows changed: catalog and search pages are stale everywhere,
//!   so all three tiers are flushed (categories survive, they live in
//!   their own namespace and change through their own table)
//! - engagement counters changed: only ranking badges are stale, so only
//!   L1 is dropped and the durable tiers keep serving until their TTL
//! - explicit reset: everything goes, categories included
//!
//! Durable-tier errors are absorbed: a flush that cannot reach L2 still
//! clears L1, and the remaining stale rows age out by TTL.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::coordinator::types::FlushScope;
use crate::entry::Page;
use crate::key::{CacheKey, Namespace};
use crate::model::{CatalogViewModel, Category};
use crate::tier::durable::DurableTier;
use crate::tier::flat::FlatTier;
use crate::tier::memory::MemoryTier;

/// All tiers behind one handle, shared by the coordinator and its
/// background consumer task.
#[derive(Clone)]
pub(crate) struct TierSet {
    pub(crate) l1_pages: Arc<MemoryTier<Page<CatalogViewModel>>>,
    pub(crate) l1_categories: Arc<MemoryTier<Vec<Category>>>,
    pub(crate) l2: Option<Arc<DurableTier>>,
    pub(crate) l3: Option<Arc<FlatTier>>,
}

impl TierSet {
    pub(crate) async fn flush(&self, scope: FlushScope) {
        match scope {
            FlushScope::Catalog => self.flush_catalog().await,
            FlushScope::Engagement => self.flush_engagement(),
            FlushScope::All => self.flush_all().await,
        }
        crate::metrics::record_flush(scope.as_label());
    }

    /// Catalog rows changed: drop catalog and search pages from every
    /// tier. The category list is left alone.
    async fn flush_catalog(&self) {
        self.l1_pages
            .remove_if(|key| !matches!(key.namespace, Namespace::Categories));

        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.clear_catalog().await {
                warn!(error = %e, "Durable catalog flush failed; rows will expire by TTL");
                crate::metrics::record_storage_degraded("L2");
            }
            if let Err(e) = l2.clear_search_results().await {
                warn!(error = %e, "Durable search flush failed; rows will expire by TTL");
                crate::metrics::record_storage_degraded("L2");
            }
        }
        if let Some(l3) = &self.l3 {
            l3.clear_catalog_and_search().await;
        }
        info!("Flushed catalog and search pages from all tiers");
    }

    /// Engagement counters changed: stale badges are tolerable for the
    /// durable tiers, so only L1 is dropped.
    fn flush_engagement(&self) {
        self.l1_pages.clear();
        debug!("Flushed L1 pages after engagement change");
    }

    /// Full reset, categories included.
    async fn flush_all(&self) {
        self.l1_pages.clear();
        self.l1_categories.clear();

        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.clear_all().await {
                warn!(error = %e, "Durable full flush failed; rows will expire by TTL");
                crate::metrics::record_storage_degraded("L2");
            }
        }
        if let Some(l3) = &self.l3 {
            l3.clear_all().await;
        }
        info!("Flushed all tiers");
    }

    /// Remove a single page from every tier (retry path).
    pub(crate) async fn clear_key(&self, key: &CacheKey) {
        self.l1_pages.remove(key);
        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.clear_key(&key.namespace, key.page).await {
                debug!(key = %key, error = %e, "Durable single-key clear failed");
                crate::metrics::record_storage_degraded("L2");
            }
        }
        if let Some(l3) = &self.l3 {
            l3.remove_page(key).await;
        }
    }
}
