// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Catalog Cache
//!
//! A client-resident, tiered read cache for a paginated catalog backed by
//! a remote database.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CatalogCache API                       │
//! │  • get_page / search / retry_page / invalidate_all          │
//! │  • broadcast notices when cached data changes underneath    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    L1: In-Memory Cache                      │
//! │  • DashMap keyed by namespace + page                        │
//! │  • minutes-scale TTL, lazily evicted at read time           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ miss
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  L2: Durable SQLite Store                   │
//! │  • survives restarts, hours-scale TTL                       │
//! │  • one row per item, ordered by zero-padded entry key       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ miss
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   L3: Flat-File Spool                       │
//! │  • last-resort offline copy, fail-open on any error         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ miss
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Network: count + rows + categories (concurrent, atomic)    │
//! │  • concurrent callers collapse onto one round trip          │
//! │  • results written back to every tier, last writer wins     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Staying fresh: a push subscription on the backend's change feed
//! invalidates by scope (catalog changes flush pages everywhere,
//! engagement changes flush L1 only); when the subscription is
//! unavailable the cache degrades to interval polling.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use catalog_cache::{CatalogCache, CatalogCacheConfig, CatalogSource};
//!
//! # async fn run(source: Arc<dyn CatalogSource>) {
//! let config = CatalogCacheConfig {
//!     durable_path: Some("sqlite://catalog_cache.db?mode=rwc".into()),
//!     flat_dir: Some("./catalog_spool".into()),
//!     ..Default::default()
//! };
//!
//! let mut cache = CatalogCache::init(config, source).await;
//!
//! let page = cache.get_page(1, false).await.expect("first page");
//! for item in &page.items {
//!     println!("{} ({})", item.title, item.category_name);
//! }
//!
//! let results = cache.search("rust basics", 1).await.expect("search");
//! println!("{} matches", results.total_count);
//!
//! cache.dispose().await;
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`CatalogCache`] tying all components together
//! - [`tier`]: the three storage tiers
//! - [`fetch`]: network read path with request de-duplication
//! - [`invalidation`]: push subscription with polling fallback
//! - [`prefetch`]: speculative next-page loads
//! - [`source`]: the [`CatalogSource`] trait the backend implements
//! - [`resilience`]: retry with exponential backoff

pub mod config;
pub mod coordinator;
pub mod entry;
pub mod fetch;
pub mod invalidation;
pub mod key;
pub mod metrics;
pub mod model;
pub mod prefetch;
pub mod resilience;
pub mod source;
pub mod tier;

pub use config::CatalogCacheConfig;
pub use coordinator::{CacheNotice, CacheState, CatalogCache, FlushScope, TierPresence};
pub use entry::{CacheEntry, Page};
pub use fetch::FetchOrchestrator;
pub use invalidation::{ChannelConfig, ChannelState, InvalidationChannel, InvalidationSignal};
pub use key::{canonicalize_term, CacheKey, Namespace};
pub use model::{CatalogViewModel, Category};
pub use prefetch::{
    ConnectionQuality, NetworkQuality, OptimisticQuality, PrefetchDecision, PrefetchScheduler,
};
pub use resilience::retry::RetryConfig;
pub use source::{
    CatalogSource, ChangeEvent, ChangeTable, EventKind, FetchError, RowFilter, SubscribeError,
    WATCHED_TABLES,
};
pub use tier::durable::DurableTier;
pub use tier::flat::FlatTier;
pub use tier::memory::MemoryTier;
pub use tier::StorageError;
