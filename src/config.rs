//! Configuration for the catalog cache.
//!
//! # Example
//!
//! ```
//! use catalog_cache::CatalogCacheConfig;
//!
//! // Minimal config (uses defaults)
//! let config = CatalogCacheConfig::default();
//! assert_eq!(config.page_size, 20);
//!
//! // Full config
//! let config = CatalogCacheConfig {
//!     durable_path: Some("sqlite://catalog_cache.db?mode=rwc".into()),
//!     flat_dir: Some("./catalog_cache_spool".into()),
//!     l1_ttl_secs: 120,
//!     poll_interval_secs: 15,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the catalog cache.
///
/// All fields have sensible defaults. Instances serving different catalogs
/// (books vs past papers) must be given distinct `durable_path` and
/// `flat_dir` values so their keys cannot collide.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogCacheConfig {
    /// Durable tier connection string (e.g. "sqlite://catalog_cache.db?mode=rwc").
    /// `None` disables L2.
    #[serde(default)]
    pub durable_path: Option<String>,

    /// Flat tier spool directory. `None` disables L3.
    #[serde(default)]
    pub flat_dir: Option<String>,

    /// Rows per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// L1 TTL in seconds (minutes-scale by default).
    #[serde(default = "default_l1_ttl_secs")]
    pub l1_ttl_secs: u64,

    /// L2 TTL in hours.
    #[serde(default = "default_l2_ttl_hours")]
    pub l2_ttl_hours: u64,

    /// L3 TTL in hours.
    #[serde(default = "default_l3_ttl_hours")]
    pub l3_ttl_hours: u64,

    /// Polling interval when the push subscription is unavailable.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// How long to wait for subscription confirmation before degrading.
    #[serde(default = "default_subscribe_timeout_secs")]
    pub subscribe_timeout_secs: u64,

    /// Poll ticks between re-subscription attempts while degraded.
    #[serde(default = "default_resubscribe_after_polls")]
    pub resubscribe_after_polls: u32,

    /// Stagger delay before a queued prefetch executes.
    #[serde(default = "default_prefetch_stagger_ms")]
    pub prefetch_stagger_ms: u64,

    /// Whether background prefetch is enabled at all.
    #[serde(default = "default_prefetch_enabled")]
    pub prefetch_enabled: bool,
}

fn default_page_size() -> u32 { 20 }
fn default_l1_ttl_secs() -> u64 { 300 } // 5 minutes
fn default_l2_ttl_hours() -> u64 { 24 }
fn default_l3_ttl_hours() -> u64 { 24 }
fn default_poll_interval_secs() -> u64 { 30 }
fn default_subscribe_timeout_secs() -> u64 { 10 }
fn default_resubscribe_after_polls() -> u32 { 10 }
fn default_prefetch_stagger_ms() -> u64 { 500 }
fn default_prefetch_enabled() -> bool { true }

impl Default for CatalogCacheConfig {
    fn default() -> Self {
        Self {
            durable_path: None,
            flat_dir: None,
            page_size: default_page_size(),
            l1_ttl_secs: default_l1_ttl_secs(),
            l2_ttl_hours: default_l2_ttl_hours(),
            l3_ttl_hours: default_l3_ttl_hours(),
            poll_interval_secs: default_poll_interval_secs(),
            subscribe_timeout_secs: default_subscribe_timeout_secs(),
            resubscribe_after_polls: default_resubscribe_after_polls(),
            prefetch_stagger_ms: default_prefetch_stagger_ms(),
            prefetch_enabled: default_prefetch_enabled(),
        }
    }
}

impl CatalogCacheConfig {
    #[must_use]
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_secs)
    }

    #[must_use]
    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_hours * 3600)
    }

    #[must_use]
    pub fn l3_ttl(&self) -> Duration {
        Duration::from_secs(self.l3_ttl_hours * 3600)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_secs)
    }

    #[must_use]
    pub fn prefetch_stagger(&self) -> Duration {
        Duration::from_millis(self.prefetch_stagger_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CatalogCacheConfig::default();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.l1_ttl(), Duration::from_secs(300));
        assert_eq!(config.l2_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert!(config.prefetch_enabled);
        assert!(config.durable_path.is_none());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: CatalogCacheConfig =
            serde_json::from_str(r#"{"page_size": 10, "l1_ttl_secs": 60}"#).unwrap();
        assert_eq!(config.page_size, 10);
        assert_eq!(config.l1_ttl_secs, 60);
        // untouched fields fall back to defaults
        assert_eq!(config.poll_interval_secs, 30);
    }
}
