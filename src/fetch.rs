// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fetch orchestrator: the layered read path.
//!
//! ```text
//! fetch_page(key)
//!       │
//!       ▼
//! ┌──────────────┐ hit ┌───────────────────────────────────────────┐
//! │ L1 memory    │────▶│ return                                    │
//! └──────────────┘     └───────────────────────────────────────────┘
//!       │ miss
//!       ▼
//! ┌──────────────┐ hit ┌───────────────────────────────────────────┐
//! │ L2 durable   │────▶│ promote to L1, background refetch, return │
//! └──────────────┘     └───────────────────────────────────────────┘
//!       │ miss
//!       ▼
//! ┌──────────────┐ hit ┌───────────────────────────────────────────┐
//! │ L3 flat      │────▶│ promote to L1+L2, background refetch,     │
//! └──────────────┘     │ return                                    │
//!       │ miss         └───────────────────────────────────────────┘
//!       ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ network: count + rows + categories (concurrent, all-or-nothing) │
//! │ → build view models → write L1+L2+L3                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concurrent fetches for the same key collapse onto one network round
//! trip via an in-flight map (leader/follower on a watch channel). Tier
//! writes only happen after all three queries succeed, so a partial
//! failure never leaves tiers partially written.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::config::CatalogCacheConfig;
use crate::coordinator::CacheNotice;
use crate::entry::{epoch_millis, CacheEntry, Page};
use crate::key::CacheKey;
use crate::model::{build_view_model, resolve_row, trending_threshold, CatalogViewModel, Category};
use crate::source::{CatalogSource, FetchError, RowFilter};
use crate::tier::durable::DurableTier;
use crate::tier::flat::FlatTier;
use crate::tier::memory::MemoryTier;

type FetchResult = Result<Page<CatalogViewModel>, FetchError>;
type InFlightRx = watch::Receiver<Option<FetchResult>>;

/// Issues the network queries needed to materialize a page and populates
/// all cache tiers. One instance per [`crate::CatalogCache`].
pub struct FetchOrchestrator {
    source: Arc<dyn CatalogSource>,
    config: CatalogCacheConfig,
    l1_pages: Arc<MemoryTier<Page<CatalogViewModel>>>,
    l1_categories: Arc<MemoryTier<Vec<Category>>>,
    l2: Option<Arc<DurableTier>>,
    l3: Option<Arc<FlatTier>>,
    /// In-flight request map: concurrent callers for the same key share
    /// one network round trip and one tier write.
    in_flight: DashMap<CacheKey, InFlightRx>,
    notices: broadcast::Sender<CacheNotice>,
}

impl FetchOrchestrator {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        config: CatalogCacheConfig,
        l1_pages: Arc<MemoryTier<Page<CatalogViewModel>>>,
        l1_categories: Arc<MemoryTier<Vec<Category>>>,
        l2: Option<Arc<DurableTier>>,
        l3: Option<Arc<FlatTier>>,
        notices: broadcast::Sender<CacheNotice>,
    ) -> Self {
        Self {
            source,
            config,
            l1_pages,
            l1_categories,
            l2,
            l3,
            in_flight: DashMap::new(),
            notices,
        }
    }

    /// Materialize a page for `key` (catalog or search namespace).
    ///
    /// Unless `force_refresh`, probes L1 → L2 → L3; an L2/L3 hit promotes
    /// the page into the faster tiers that missed and schedules a
    /// background self-heal refetch before returning. A full miss goes to
    /// the network.
    pub async fn fetch_page(self: &Arc<Self>, key: CacheKey, force_refresh: bool) -> FetchResult {
        if !force_refresh {
            if let Some(page) = self.probe_tiers(&key).await {
                return Ok(page);
            }
        }
        self.fetch_deduplicated(key, force_refresh).await
    }

    async fn probe_tiers(self: &Arc<Self>, key: &CacheKey) -> Option<Page<CatalogViewModel>> {
        if let Some(page) = self.l1_pages.get(key) {
            crate::metrics::record_tier_hit("L1");
            return Some(page);
        }
        crate::metrics::record_tier_miss("L1");

        if let Some(l2) = &self.l2 {
            match l2.load_page(&key.namespace, key.page).await {
                Ok(Some((page, written_at))) => {
                    crate::metrics::record_tier_hit("L2");
                    self.l1_pages.insert_entry(
                        key.clone(),
                        promoted_entry(page.clone(), written_at, self.config.l1_ttl()),
                    );
                    self.spawn_self_heal(key.clone());
                    return Some(page);
                }
                Ok(None) => crate::metrics::record_tier_miss("L2"),
                Err(e) => {
                    debug!(key = %key, error = %e, "Durable tier read degraded to miss");
                    crate::metrics::record_storage_degraded("L2");
                }
            }
        }

        if let Some(l3) = &self.l3 {
            if let Some((page, written_at)) = l3.get_page(key).await {
                crate::metrics::record_tier_hit("L3");
                self.l1_pages.insert_entry(
                    key.clone(),
                    promoted_entry(page.clone(), written_at, self.config.l1_ttl()),
                );
                if let Some(l2) = &self.l2 {
                    if let Err(e) = l2.save_page(&key.namespace, &page, self.config.l2_ttl()).await
                    {
                        debug!(key = %key, error = %e, "Durable tier backfill skipped");
                        crate::metrics::record_storage_degraded("L2");
                    }
                }
                self.spawn_self_heal(key.clone());
                return Some(page);
            }
            crate::metrics::record_tier_miss("L3");
        }

        None
    }

    /// Collapse concurrent callers onto one network round trip.
    async fn fetch_deduplicated(self: &Arc<Self>, key: CacheKey, force_refresh: bool) -> FetchResult {
        loop {
            let (tx, mut rx) = watch::channel::<Option<FetchResult>>(None);
            match self.in_flight.entry(key.clone()) {
                Entry::Occupied(occupied) => {
                    rx = occupied.get().clone();
                    drop(occupied);
                    crate::metrics::record_dedup_join();
                    loop {
                        if let Some(result) = rx.borrow().clone() {
                            return result;
                        }
                        if rx.changed().await.is_err() {
                            // Leader vanished without publishing; drop its
                            // dead entry and retry.
                            self.in_flight.remove(&key);
                            break;
                        }
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(rx);
                    let result = self.fetch_remote(&key, force_refresh).await;
                    let _ = tx.send(Some(result.clone()));
                    self.in_flight.remove(&key);
                    return result;
                }
            }
        }
    }

    /// The three-query network fetch plus the all-tiers write.
    async fn fetch_remote(&self, key: &CacheKey, force_refresh: bool) -> FetchResult {
        let filter = RowFilter {
            search: key.namespace.search_term().map(String::from),
        };
        let offset = Page::<CatalogViewModel>::offset(key.page, self.config.page_size);
        let started = Instant::now();

        // All three must land before any tier write; a single failure fails
        // the whole fetch and leaves every tier untouched.
        let joined = tokio::try_join!(
            self.source.count_rows(&filter),
            self.source.fetch_rows(&filter, offset, self.config.page_size),
            self.source.fetch_categories(),
        );
        let (count, raw_rows, categories) = match joined {
            Ok(parts) => parts,
            Err(e) => {
                crate::metrics::record_fetch("error");
                warn!(key = %key, error = %e, "Page fetch failed");
                return Err(e);
            }
        };

        let category_map: HashMap<String, String> = categories
            .iter()
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect();

        let resolved = raw_rows
            .iter()
            .map(resolve_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                crate::metrics::record_fetch("error");
                e
            })?;

        let scores: Vec<u64> = resolved.iter().map(|r| r.score()).collect();
        let threshold = trending_threshold(&scores);
        let now = epoch_millis();
        let items: Vec<CatalogViewModel> = resolved
            .into_iter()
            .map(|row| build_view_model(row, &category_map, threshold, now))
            .collect();

        let page = Page {
            page_index: key.page,
            page_size: self.config.page_size,
            total_count: self.monotonic_total(key, count, force_refresh),
            items,
        };

        self.write_all_tiers(key, &page, &categories).await;

        crate::metrics::record_fetch("success");
        crate::metrics::record_fetch_latency(started.elapsed());
        crate::metrics::set_l1_entries(self.l1_pages.len());
        Ok(page)
    }

    /// Total-count monotonicity: never roll back to a stale smaller value
    /// unless the fetch is invalidation-driven.
    fn monotonic_total(&self, key: &CacheKey, fetched: u64, force_refresh: bool) -> u64 {
        if force_refresh {
            return fetched;
        }
        match self.l1_pages.peek(key) {
            Some(existing) if existing.is_valid() && existing.payload.total_count > fetched => {
                existing.payload.total_count
            }
            _ => fetched,
        }
    }

    async fn write_all_tiers(
        &self,
        key: &CacheKey,
        page: &Page<CatalogViewModel>,
        categories: &[Category],
    ) {
        self.l1_pages.set(key.clone(), page.clone(), self.config.l1_ttl());
        self.l1_categories
            .set(CacheKey::categories(), categories.to_vec(), self.config.l1_ttl());

        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.save_page(&key.namespace, page, self.config.l2_ttl()).await {
                warn!(key = %key, error = %e, "Durable tier write skipped");
                crate::metrics::record_storage_degraded("L2");
            }
            if let Err(e) = l2.save_categories(categories, self.config.l2_ttl()).await {
                debug!(error = %e, "Durable category write skipped");
                crate::metrics::record_storage_degraded("L2");
            }
        }
        if let Some(l3) = &self.l3 {
            l3.set_page(key, page, self.config.l3_ttl()).await;
        }
    }

    /// Stale-serve self-heal: the caller got L2/L3 data; refresh it in the
    /// background so displayed data converges without blocking anyone.
    fn spawn_self_heal(self: &Arc<Self>, key: CacheKey) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.fetch_deduplicated(key.clone(), true).await {
                Ok(_) => {
                    let _ = this.notices.send(CacheNotice::Refreshed { key });
                }
                Err(e) => debug!(key = %key, error = %e, "Self-heal refetch failed"),
            }
        });
    }

    /// Whether a page is already warm in any tier (prefetch skip check).
    pub async fn is_warm(&self, key: &CacheKey) -> bool {
        if self.l1_pages.contains_valid(key) {
            return true;
        }
        if let Some(l2) = &self.l2 {
            if let Ok(pages) = l2.warm_pages(&key.namespace).await {
                if pages.contains(&key.page) {
                    return true;
                }
            }
        }
        if let Some(l3) = &self.l3 {
            if l3.has_page(key).await {
                return true;
            }
        }
        false
    }

    /// Most recent category list seen by any fetch, if still valid in L1.
    pub fn cached_categories(&self) -> Option<Vec<Category>> {
        self.l1_categories.get(&CacheKey::categories())
    }
}

/// L1 entry for a page promoted from a slower tier.
///
/// The origin timestamp is kept for last-writer-wins comparisons, but the
/// validity window starts at promotion time: an entry that sat in L2 for
/// longer than the L1 TTL would otherwise land in L1 already expired and
/// every read before the self-heal completes would re-probe L2 and spawn
/// another refetch.
fn promoted_entry<T>(payload: T, written_at: i64, l1_ttl: Duration) -> CacheEntry<T> {
    let age_ms = epoch_millis().saturating_sub(written_at).max(0) as u64;
    CacheEntry {
        payload,
        written_at,
        ttl_ms: l1_ttl.as_millis() as u64 + age_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChangeEvent, ChangeTable, SubscribeError};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::sync::mpsc;

    /// Scriptable backend: counts calls, can fail a single query kind.
    struct ScriptedSource {
        total: u64,
        rows_per_page: usize,
        count_calls: AtomicU64,
        rows_calls: AtomicU64,
        categories_calls: AtomicU64,
        fail_rows: AtomicBool,
        fail_categories: AtomicBool,
    }

    impl ScriptedSource {
        fn new(total: u64, rows_per_page: usize) -> Self {
            Self {
                total,
                rows_per_page,
                count_calls: AtomicU64::new(0),
                rows_calls: AtomicU64::new(0),
                categories_calls: AtomicU64::new(0),
                fail_rows: AtomicBool::new(false),
                fail_categories: AtomicBool::new(false),
            }
        }

        fn network_calls(&self) -> u64 {
            self.count_calls.load(Ordering::SeqCst)
                + self.rows_calls.load(Ordering::SeqCst)
                + self.categories_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogSource for ScriptedSource {
        async fn count_rows(&self, _filter: &RowFilter) -> Result<u64, FetchError> {
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.total)
        }

        async fn fetch_rows(
            &self,
            _filter: &RowFilter,
            offset: u64,
            _limit: u32,
        ) -> Result<Vec<Value>, FetchError> {
            self.rows_calls.fetch_add(1, Ordering::SeqCst);
            // yield so concurrent callers genuinely overlap
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            if self.fail_rows.load(Ordering::SeqCst) {
                return Err(FetchError::Network("rows query refused".into()));
            }
            Ok((0..self.rows_per_page)
                .map(|i| {
                    json!({
                        "id": format!("row-{}", offset + i as u64),
                        "title": format!("Item {}", offset + i as u64),
                        "views": 10 * i,
                        "downloads": i,
                        "category_id": "c1",
                    })
                })
                .collect())
        }

        async fn fetch_categories(&self) -> Result<Vec<Category>, FetchError> {
            self.categories_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_categories.load(Ordering::SeqCst) {
                return Err(FetchError::Network("categories query refused".into()));
            }
            Ok(vec![Category { id: "c1".into(), name: "Science".into() }])
        }

        async fn subscribe_changes(
            &self,
            _tables: &[ChangeTable],
        ) -> Result<mpsc::Receiver<ChangeEvent>, SubscribeError> {
            Err(SubscribeError::Setup("not supported".into()))
        }
    }

    fn orchestrator(source: Arc<ScriptedSource>) -> Arc<FetchOrchestrator> {
        let (notices, _) = broadcast::channel(16);
        Arc::new(FetchOrchestrator::new(
            source,
            CatalogCacheConfig::default(),
            Arc::new(MemoryTier::new()),
            Arc::new(MemoryTier::new()),
            None,
            None,
            notices,
        ))
    }

    #[tokio::test]
    async fn test_full_miss_issues_three_queries_and_populates_l1() {
        let source = Arc::new(ScriptedSource::new(45, 20));
        let orch = orchestrator(source.clone());

        let page = orch.fetch_page(CacheKey::catalog(1), false).await.unwrap();
        assert_eq!(page.items.len(), 20);
        assert_eq!(page.total_count, 45);
        assert!(page.has_more());
        assert_eq!(source.network_calls(), 3);

        // second call within TTL is served from L1, no new queries
        let again = orch.fetch_page(CacheKey::catalog(1), false).await.unwrap();
        assert_eq!(again, page);
        assert_eq!(source.network_calls(), 3);
    }

    #[tokio::test]
    async fn test_single_query_failure_fails_whole_fetch_and_writes_nothing() {
        let source = Arc::new(ScriptedSource::new(45, 20));
        source.fail_categories.store(true, Ordering::SeqCst);
        let orch = orchestrator(source.clone());

        let err = orch.fetch_page(CacheKey::catalog(1), false).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
        assert!(orch.l1_pages.is_empty());
    }

    #[tokio::test]
    async fn test_category_names_resolved_with_fallback() {
        let source = Arc::new(ScriptedSource::new(5, 5));
        let orch = orchestrator(source);

        let page = orch.fetch_page(CacheKey::catalog(1), false).await.unwrap();
        assert!(page.items.iter().all(|vm| vm.category_name == "Science"));
    }

    #[tokio::test]
    async fn test_idempotent_forced_refetch() {
        let source = Arc::new(ScriptedSource::new(45, 20));
        let orch = orchestrator(source);

        let first = orch.fetch_page(CacheKey::catalog(1), true).await.unwrap();
        let second = orch.fetch_page(CacheKey::catalog(1), true).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_round_trip() {
        let source = Arc::new(ScriptedSource::new(45, 20));
        let orch = orchestrator(source.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let orch = Arc::clone(&orch);
            handles.push(tokio::spawn(async move {
                orch.fetch_page(CacheKey::catalog(1), false).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        // 8 callers, one leader: exactly one count+rows+categories triple
        assert_eq!(source.network_calls(), 3);
    }

    #[tokio::test]
    async fn test_search_and_catalog_do_not_share_keys() {
        let source = Arc::new(ScriptedSource::new(45, 20));
        let orch = orchestrator(source.clone());

        orch.fetch_page(CacheKey::catalog(1), false).await.unwrap();
        orch.fetch_page(CacheKey::search("physics", 1), false).await.unwrap();

        // distinct keys, distinct fetches
        assert_eq!(source.network_calls(), 6);
    }

    #[tokio::test]
    async fn test_total_count_never_rolls_back_without_force() {
        let source = Arc::new(ScriptedSource::new(45, 20));
        let orch = orchestrator(source.clone());
        orch.fetch_page(CacheKey::catalog(1), false).await.unwrap();

        // backend shrinks; a plain refetch keeps the larger known total
        let shrunk = Arc::new(ScriptedSource::new(30, 20));
        let orch2 = Arc::new(FetchOrchestrator::new(
            shrunk,
            CatalogCacheConfig::default(),
            Arc::clone(&orch.l1_pages),
            Arc::new(MemoryTier::new()),
            None,
            None,
            broadcast::channel(16).0,
        ));
        let page = orch2.fetch_remote(&CacheKey::catalog(1), false).await.unwrap();
        assert_eq!(page.total_count, 45);

        // a forced (invalidation-driven) refetch may roll it back
        let page = orch2.fetch_remote(&CacheKey::catalog(1), true).await.unwrap();
        assert_eq!(page.total_count, 30);
    }

    #[test]
    fn test_promoted_entry_is_valid_even_when_the_origin_is_old() {
        // a durable-tier row written two hours ago, promoted under a
        // five-minute L1 TTL, must not arrive in L1 already expired
        let origin = epoch_millis() - 2 * 60 * 60 * 1000;
        let entry = promoted_entry((), origin, std::time::Duration::from_secs(300));

        assert!(entry.is_valid());
        // origin timestamp survives for last-writer-wins comparisons
        assert_eq!(entry.written_at, origin);
        // and the window still closes one L1 TTL after promotion
        assert!(!entry.is_valid_at(epoch_millis() + 301_000));
    }
}
