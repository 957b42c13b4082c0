// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for catalog-cache.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the embedding
//! application chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `catalog_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: L1, L2, L3
//! - `status`: success, error
//! - `scope`: catalog, engagement, all

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a read hit on a cache tier.
pub fn record_tier_hit(tier: &str) {
    counter!("catalog_cache_tier_hits_total", "tier" => tier.to_string()).increment(1);
}

/// Record a read that missed every probed tier up to and including `tier`.
pub fn record_tier_miss(tier: &str) {
    counter!("catalog_cache_tier_misses_total", "tier" => tier.to_string()).increment(1);
}

/// Record a completed network fetch.
pub fn record_fetch(status: &str) {
    counter!("catalog_cache_fetches_total", "status" => status.to_string()).increment(1);
}

/// Record end-to-end network fetch latency.
pub fn record_fetch_latency(duration: Duration) {
    histogram!("catalog_cache_fetch_seconds").record(duration.as_secs_f64());
}

/// Record a de-duplicated fetch (follower collapsed onto an in-flight leader).
pub fn record_dedup_join() {
    counter!("catalog_cache_fetch_dedup_total").increment(1);
}

/// Record an invalidation flush by scope.
pub fn record_flush(scope: &str) {
    counter!("catalog_cache_flushes_total", "scope" => scope.to_string()).increment(1);
}

/// Record a prefetch decision outcome.
pub fn record_prefetch(outcome: &str) {
    counter!("catalog_cache_prefetch_total", "outcome" => outcome.to_string()).increment(1);
}

/// Set current L1 entry count.
pub fn set_l1_entries(count: usize) {
    gauge!("catalog_cache_l1_entries").set(count as f64);
}

/// Set invalidation channel state
/// (0 = Unsubscribed, 1 = Subscribing, 2 = Subscribed, 3 = Degraded).
pub fn set_channel_state(state: u8) {
    gauge!("catalog_cache_channel_state").set(f64::from(state));
}

/// Record a storage-tier degradation (tier absorbed an error).
pub fn record_storage_degraded(tier: &str) {
    counter!("catalog_cache_storage_degraded_total", "tier" => tier.to_string()).increment(1);
}
