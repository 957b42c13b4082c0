//! Public types for the cache coordinator.

use crate::key::CacheKey;

/// Coordinator lifecycle state.
///
/// Use [`super::CatalogCache::state()`] to check the current state or
/// [`super::CatalogCache::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Serving requests; background channel and prefetch running.
    Ready,
    /// Torn down; background tasks stopped, no further use is valid.
    Disposed,
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Disposed => write!(f, "Disposed"),
        }
    }
}

/// How much cached data an invalidation flush removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushScope {
    /// Catalog and search pages, every tier. Categories survive.
    Catalog,
    /// Pages in L1 only; durable tiers keep their copies.
    Engagement,
    /// Everything, every tier, categories included.
    All,
}

impl FlushScope {
    pub(crate) fn as_label(self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Engagement => "engagement",
            Self::All => "all",
        }
    }
}

/// Broadcast to subscribers when cached data changes underneath them.
///
/// Consumers re-render from cache on receipt; they never need to refetch
/// themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheNotice {
    /// A background refetch replaced the cached copy of `key`.
    Refreshed { key: CacheKey },
    /// An invalidation flushed cached data; the next read repopulates.
    Invalidated { scope: FlushScope },
    /// Engagement counters (views, likes, ratings) changed somewhere.
    EngagementChanged,
}

/// Where a page currently resides, per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPresence {
    pub in_l1: bool,
    pub in_l2: bool,
    pub in_l3: bool,
}

impl TierPresence {
    /// True if the page can be served from any tier without a network trip.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.in_l1 || self.in_l2 || self.in_l3
    }
}

impl std::fmt::Display for TierPresence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Presence(L1={}, L2={}, L3={})",
            self.in_l1, self.in_l2, self.in_l3
        )
    }
}
