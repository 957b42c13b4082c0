use std::time::Duration;

use dashmap::DashMap;

use crate::entry::CacheEntry;
use crate::key::CacheKey;

/// L1: process-local key → entry map with per-entry TTL.
///
/// `get` returns `None` both for unknown keys and for found-but-expired
/// entries; in the latter case the entry is deleted as a side effect (lazy
/// eviction), so expiry never reads differently from genuine absence.
///
/// No size bound is enforced: entries are small page view models and whole
/// namespaces are flushed on invalidation. A long-lived session holding
/// many distinct searches would want an LRU cap here.
pub struct MemoryTier<T> {
    data: DashMap<CacheKey, CacheEntry<T>>,
}

impl<T: Clone> MemoryTier<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { data: DashMap::new() }
    }

    /// Fetch a valid entry's payload; expired entries are evicted and read
    /// as absent.
    pub fn get(&self, key: &CacheKey) -> Option<T> {
        match self.data.get(key) {
            Some(entry) if entry.is_valid() => return Some(entry.payload.clone()),
            Some(entry) => drop(entry), // release the shard guard before removing
            None => return None,
        }
        self.data.remove(key);
        None
    }

    /// The full entry (payload + timestamps), without eviction. Used for
    /// total-count monotonicity checks.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.data.get(key).map(|e| e.clone())
    }

    /// Store a freshly-built payload with the given TTL.
    ///
    /// Returns `false` when an existing entry is strictly newer (a
    /// superseded background fetch must not overwrite a newer write).
    pub fn set(&self, key: CacheKey, payload: T, ttl: Duration) -> bool {
        self.insert_entry(key, CacheEntry::new(payload, ttl))
    }

    /// Store a pre-stamped entry (tier promotion keeps the original
    /// `written_at`). Same last-writer-wins rule as [`Self::set`].
    pub fn insert_entry(&self, key: CacheKey, entry: CacheEntry<T>) -> bool {
        if let Some(existing) = self.data.get(&key) {
            if existing.is_valid() && existing.written_at > entry.written_at {
                return false;
            }
        }
        self.data.insert(key, entry);
        true
    }

    pub fn remove(&self, key: &CacheKey) {
        self.data.remove(key);
    }

    /// Drop every entry whose key matches the predicate.
    pub fn remove_if(&self, pred: impl Fn(&CacheKey) -> bool) {
        self.data.retain(|key, _| !pred(key));
    }

    /// Sweep expired entries eagerly (maintenance; `get` already evicts
    /// lazily).
    pub fn clear_expired(&self) {
        self.data.retain(|_, entry| entry.is_valid());
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Whether a valid entry exists without cloning the payload.
    #[must_use]
    pub fn contains_valid(&self, key: &CacheKey) -> bool {
        self.data.get(key).map(|e| e.is_valid()).unwrap_or(false)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<T: Clone> Default for MemoryTier<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::epoch_millis;

    #[test]
    fn test_get_missing_returns_none() {
        let tier: MemoryTier<u32> = MemoryTier::new();
        assert!(tier.get(&CacheKey::catalog(1)).is_none());
    }

    #[test]
    fn test_set_and_get() {
        let tier = MemoryTier::new();
        tier.set(CacheKey::catalog(1), 7u32, Duration::from_secs(60));
        assert_eq!(tier.get(&CacheKey::catalog(1)), Some(7));
    }

    #[test]
    fn test_expired_entry_reads_absent_and_is_evicted() {
        let tier = MemoryTier::new();
        let key = CacheKey::catalog(1);
        let entry = CacheEntry {
            payload: 7u32,
            written_at: epoch_millis() - 10_000,
            ttl_ms: 1_000,
        };
        tier.insert_entry(key.clone(), entry);
        assert_eq!(tier.len(), 1);

        assert!(tier.get(&key).is_none());
        // lazy eviction happened as a side effect
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn test_last_writer_wins_rejects_stale_overwrite() {
        let tier = MemoryTier::new();
        let key = CacheKey::catalog(1);
        tier.set(key.clone(), 2u32, Duration::from_secs(60));

        let stale = CacheEntry {
            payload: 1u32,
            written_at: epoch_millis() - 60_000,
            ttl_ms: 120_000,
        };
        assert!(!tier.insert_entry(key.clone(), stale));
        assert_eq!(tier.get(&key), Some(2));
    }

    #[test]
    fn test_stale_overwrite_allowed_when_existing_expired() {
        let tier = MemoryTier::new();
        let key = CacheKey::catalog(1);
        let expired = CacheEntry {
            payload: 9u32,
            written_at: epoch_millis() - 10_000,
            ttl_ms: 1_000,
        };
        tier.insert_entry(key.clone(), expired);

        let older_but_valid = CacheEntry {
            payload: 3u32,
            written_at: epoch_millis() - 5_000,
            ttl_ms: 60_000,
        };
        assert!(tier.insert_entry(key.clone(), older_but_valid));
        assert_eq!(tier.get(&key), Some(3));
    }

    #[test]
    fn test_remove_if_scopes_by_namespace() {
        let tier = MemoryTier::new();
        tier.set(CacheKey::catalog(1), 1u32, Duration::from_secs(60));
        tier.set(CacheKey::catalog(2), 2u32, Duration::from_secs(60));
        tier.set(CacheKey::search("rust", 1), 3u32, Duration::from_secs(60));

        tier.remove_if(|k| matches!(k.namespace, crate::key::Namespace::Catalog));

        assert!(tier.get(&CacheKey::catalog(1)).is_none());
        assert!(tier.get(&CacheKey::catalog(2)).is_none());
        assert_eq!(tier.get(&CacheKey::search("rust", 1)), Some(3));
    }

    #[test]
    fn test_clear_expired_sweeps_only_expired() {
        let tier = MemoryTier::new();
        tier.set(CacheKey::catalog(1), 1u32, Duration::from_secs(60));
        tier.insert_entry(
            CacheKey::catalog(2),
            CacheEntry { payload: 2u32, written_at: epoch_millis() - 10_000, ttl_ms: 1 },
        );

        tier.clear_expired();
        assert_eq!(tier.len(), 1);
        assert!(tier.contains_valid(&CacheKey::catalog(1)));
    }
}
