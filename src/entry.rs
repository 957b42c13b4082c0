//! Cache entry and page types.
//!
//! A [`CacheEntry`] pairs a payload with its write timestamp and TTL.
//! Validity is purely read-time: `now - written_at < ttl`. Expired entries
//! are treated as absent by every tier and lazily evicted on the next touch.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A single cached value plus its write timestamp and TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cached payload.
    pub payload: T,
    /// Write timestamp (epoch millis). Used for last-writer-wins checks.
    pub written_at: i64,
    /// Time-to-live in milliseconds.
    pub ttl_ms: u64,
}

impl<T> CacheEntry<T> {
    /// Create an entry stamped with the current time.
    pub fn new(payload: T, ttl: Duration) -> Self {
        Self {
            payload,
            written_at: epoch_millis(),
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    /// Whether the entry is still valid at the current time.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(epoch_millis())
    }

    /// Whether the entry is valid at an explicit timestamp (for tests).
    #[must_use]
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.written_at) < self.ttl_ms as i64
    }
}

/// An ordered, fixed-size slice of results plus the total count known at
/// fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// 1-based page index this slice represents.
    pub page_index: u32,
    /// Requested page size (the last page may hold fewer items).
    pub page_size: u32,
    /// Total row count reported by the backend at fetch time.
    pub total_count: u64,
    /// The page's items, in backend order.
    pub items: Vec<T>,
}

impl<T> Page<T> {
    /// Whether pages beyond this one exist.
    #[must_use]
    pub fn has_more(&self) -> bool {
        let consumed =
            u64::from(self.page_index.saturating_sub(1)) * u64::from(self.page_size)
                + self.items.len() as u64;
        consumed < self.total_count
    }

    /// Backend row offset for this page index.
    #[must_use]
    pub fn offset(page_index: u32, page_size: u32) -> u64 {
        u64::from(page_index.saturating_sub(1)) * u64::from(page_size)
    }
}
