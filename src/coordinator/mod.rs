// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache coordinator.
//!
//! [`CatalogCache`] is the main entry point, tying together:
//! - L1 in-memory page cache (minutes-scale TTL)
//! - L2 durable SQLite store (hours-scale TTL, survives restarts)
//! - L3 flat-file spool (last-resort offline copy)
//! - the fetch orchestrator (network reads, request de-duplication)
//! - the invalidation channel (push subscription with polling fallback)
//! - the prefetch scheduler (speculative next-page loads)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use catalog_cache::{CatalogCache, CatalogCacheConfig, CatalogSource};
//!
//! # async fn example(source: Arc<dyn CatalogSource>) {
//! let config = CatalogCacheConfig {
//!     durable_path: Some("sqlite://catalog_cache.db?mode=rwc".into()),
//!     ..Default::default()
//! };
//! let mut cache = CatalogCache::init(config, source).await;
//!
//! let page = cache.get_page(1, false).await.expect("first page");
//! println!("{} of {} items", page.items.len(), page.total_count);
//!
//! cache.dispose().await;
//! # }
//! ```

mod types;
mod api;
mod lifecycle;
mod flush;

pub use types::{CacheNotice, CacheState, FlushScope, TierPresence};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use std::sync::Arc;

use crate::config::CatalogCacheConfig;
use crate::fetch::FetchOrchestrator;
use crate::invalidation::InvalidationChannel;
use crate::prefetch::PrefetchScheduler;
use flush::TierSet;

/// Client-resident tiered cache for a paginated catalog.
///
/// Create with [`init()`](Self::init), tear down with
/// [`dispose()`](Self::dispose). The cache is `Send + Sync`; reads may
/// come from any task.
pub struct CatalogCache {
    #[allow(dead_code)]
    pub(super) config: CatalogCacheConfig,

    /// All storage tiers behind one handle.
    pub(super) tiers: TierSet,

    /// Network read path, shared with background refetch tasks.
    pub(super) orchestrator: Arc<FetchOrchestrator>,

    /// Push/poll invalidation source.
    pub(super) channel: InvalidationChannel,

    /// Task draining invalidation signals into flushes and refetches.
    pub(super) consumer: Option<JoinHandle<()>>,

    pub(super) prefetch: PrefetchScheduler,

    /// Cache-change notices broadcast to subscribers.
    pub(super) notices: broadcast::Sender<CacheNotice>,

    pub(super) state: watch::Sender<CacheState>,
    pub(super) state_rx: watch::Receiver<CacheState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use crate::source::{
        CatalogSource, ChangeEvent, ChangeTable, FetchError, RowFilter, SubscribeError,
    };
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::mpsc;

    struct StaticSource {
        total: u64,
        fetches: AtomicU64,
    }

    impl StaticSource {
        fn new(total: u64) -> Self {
            Self { total, fetches: AtomicU64::new(0) }
        }
    }

    #[async_trait]
    impl CatalogSource for StaticSource {
        async fn count_rows(&self, _: &RowFilter) -> Result<u64, FetchError> {
            Ok(self.total)
        }
        async fn fetch_rows(
            &self,
            _: &RowFilter,
            offset: u64,
            limit: u32,
        ) -> Result<Vec<Value>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let remaining = self.total.saturating_sub(offset).min(u64::from(limit));
            Ok((0..remaining)
                .map(|i| json!({"id": format!("b{}", offset + i), "title": "T"}))
                .collect())
        }
        async fn fetch_categories(&self) -> Result<Vec<Category>, FetchError> {
            Ok(vec![Category { id: "c1".into(), name: "Science".into() }])
        }
        async fn subscribe_changes(
            &self,
            _: &[ChangeTable],
        ) -> Result<mpsc::Receiver<ChangeEvent>, SubscribeError> {
            Err(SubscribeError::Setup("not supported".into()))
        }
    }

    fn memory_only_config() -> CatalogCacheConfig {
        CatalogCacheConfig { prefetch_enabled: false, ..Default::default() }
    }

    #[tokio::test]
    async fn test_init_reaches_ready() {
        let mut cache =
            CatalogCache::init(memory_only_config(), Arc::new(StaticSource::new(5))).await;
        assert_eq!(cache.state(), CacheState::Ready);
        cache.dispose().await;
        assert_eq!(cache.state(), CacheState::Disposed);
    }

    #[tokio::test]
    async fn test_get_page_and_status() {
        let mut cache =
            CatalogCache::init(memory_only_config(), Arc::new(StaticSource::new(5))).await;

        let page = cache.get_page(1, false).await.unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.items.len(), 5);
        assert!(!page.has_more());

        let presence = cache.status(1).await;
        assert!(presence.in_l1);
        assert!(!presence.in_l2);
        assert!(presence.is_cached());

        cache.dispose().await;
    }

    #[tokio::test]
    async fn test_invalidate_all_forces_network_on_next_read() {
        let source = Arc::new(StaticSource::new(5));
        let mut cache = CatalogCache::init(
            memory_only_config(),
            Arc::clone(&source) as Arc<dyn CatalogSource>,
        )
        .await;

        cache.get_page(1, false).await.unwrap();
        cache.get_page(1, false).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        cache.invalidate_all().await;
        cache.get_page(1, false).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);

        cache.dispose().await;
    }

    #[tokio::test]
    async fn test_categories_come_from_page_fetch() {
        let mut cache =
            CatalogCache::init(memory_only_config(), Arc::new(StaticSource::new(5))).await;
        assert!(cache.categories().await.is_none());

        cache.get_page(1, false).await.unwrap();
        let categories = cache.categories().await.unwrap();
        assert_eq!(categories[0].name, "Science");

        cache.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let mut cache =
            CatalogCache::init(memory_only_config(), Arc::new(StaticSource::new(0))).await;
        cache.dispose().await;
        cache.dispose().await;
        assert_eq!(cache.state(), CacheState::Disposed);
    }
}
