// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! L3: flat key-value fallback, one JSON blob per page on disk.
//!
//! Last-resort tier for when the durable store is unavailable (quota
//! exhausted, unsupported platform). Layout under the spool directory:
//!
//! ```text
//! {dir}/pages.json              side index of loaded pages (existence
//!                               checks without deserializing payloads)
//! {dir}/catalog_1.json          {"written_at":…,"ttl_ms":…,"page":{…}}
//! {dir}/search-3f2a9c01_1.json  search namespaces carry a term hash
//! ```
//!
//! This tier is optimization-only: every read/write error is caught,
//! logged at debug level, and treated as a miss/no-op. Nothing here may
//! propagate an error to the caller.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::{epoch_millis, Page};
use crate::key::{CacheKey, Namespace};
use crate::model::CatalogViewModel;

const INDEX_FILE: &str = "pages.json";

#[derive(Debug, Serialize, Deserialize)]
struct FlatBlob {
    written_at: i64,
    ttl_ms: u64,
    page: Page<CatalogViewModel>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PageIndex {
    /// Rendered cache keys ("catalog:1", "search:rust basics:2") of pages
    /// believed present on disk.
    pages: Vec<String>,
}

pub struct FlatTier {
    dir: PathBuf,
}

impl FlatTier {
    /// Create the tier rooted at `dir`. Directory creation failure is
    /// absorbed; subsequent operations will simply miss.
    pub async fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            debug!(dir = %dir.display(), error = %e, "Flat tier directory unavailable");
        }
        Self { dir }
    }

    /// Load a page if present and unexpired; any I/O or parse error is a
    /// miss. Returns the payload with its original write timestamp.
    pub async fn get_page(&self, key: &CacheKey) -> Option<(Page<CatalogViewModel>, i64)> {
        let path = self.page_path(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(key = %key, error = %e, "Flat tier read miss");
                return None;
            }
        };
        let blob: FlatBlob = match serde_json::from_slice(&raw) {
            Ok(blob) => blob,
            Err(e) => {
                debug!(key = %key, error = %e, "Flat tier blob unreadable, discarding");
                self.remove_page(key).await;
                return None;
            }
        };

        if epoch_millis().saturating_sub(blob.written_at) >= blob.ttl_ms as i64 {
            self.remove_page(key).await;
            return None;
        }
        Some((blob.page, blob.written_at))
    }

    /// Persist a page. Last-writer-wins: if the existing blob is strictly
    /// newer, the write is dropped. All failures are no-ops.
    pub async fn set_page(&self, key: &CacheKey, page: &Page<CatalogViewModel>, ttl: Duration) {
        let written_at = epoch_millis();
        let path = self.page_path(key);

        if let Ok(raw) = tokio::fs::read(&path).await {
            if let Ok(existing) = serde_json::from_slice::<FlatBlob>(&raw) {
                if existing.written_at > written_at {
                    debug!(key = %key, "Skipping stale flat-tier write");
                    return;
                }
            }
        }

        let blob = FlatBlob { written_at, ttl_ms: ttl.as_millis() as u64, page: page.clone() };
        let encoded = match serde_json::to_vec(&blob) {
            Ok(encoded) => encoded,
            Err(e) => {
                debug!(key = %key, error = %e, "Flat tier encode failed");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&path, encoded).await {
            debug!(key = %key, error = %e, "Flat tier write failed");
            return;
        }

        let mut index = self.load_index().await;
        let rendered = key.to_string();
        if !index.pages.contains(&rendered) {
            index.pages.push(rendered);
            self.store_index(&index).await;
        }
    }

    /// Existence check from the side index only; no payload deserialization.
    pub async fn has_page(&self, key: &CacheKey) -> bool {
        self.load_index().await.pages.contains(&key.to_string())
    }

    pub async fn remove_page(&self, key: &CacheKey) {
        if let Err(e) = tokio::fs::remove_file(self.page_path(key)).await {
            debug!(key = %key, error = %e, "Flat tier remove skipped");
        }
        let mut index = self.load_index().await;
        let rendered = key.to_string();
        let before = index.pages.len();
        index.pages.retain(|p| p != &rendered);
        if index.pages.len() != before {
            self.store_index(&index).await;
        }
    }

    /// Drop every page whose namespace matches the predicate.
    pub async fn clear_matching(&self, pred: impl Fn(&str) -> bool) {
        let index = self.load_index().await;
        let (drop, keep): (Vec<_>, Vec<_>) = index.pages.into_iter().partition(|p| pred(p));
        for rendered in &drop {
            if let Some(path) = self.path_for_rendered(rendered) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!(key = %rendered, error = %e, "Flat tier clear skipped");
                }
            }
        }
        self.store_index(&PageIndex { pages: keep }).await;
    }

    /// Drop the plain catalog namespace and all search results.
    pub async fn clear_catalog_and_search(&self) {
        self.clear_matching(|rendered| {
            rendered.starts_with("catalog:") || rendered.starts_with("search:")
        })
        .await;
    }

    pub async fn clear_all(&self) {
        self.clear_matching(|_| true).await;
    }

    fn page_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}_{}.json", Self::file_stem(&key.namespace), key.page))
    }

    fn path_for_rendered(&self, rendered: &str) -> Option<PathBuf> {
        let (prefix, page) = rendered.rsplit_once(':')?;
        let namespace = if prefix == "catalog" {
            Namespace::Catalog
        } else if prefix == "categories" {
            Namespace::Categories
        } else {
            Namespace::Search(prefix.strip_prefix("search:")?.to_string())
        };
        let page: u32 = page.parse().ok()?;
        Some(self.page_path(&CacheKey { namespace, page }))
    }

    /// Filesystem-safe stem. Search terms are hashed so arbitrary input
    /// cannot collide with or escape the spool directory.
    fn file_stem(namespace: &Namespace) -> String {
        match namespace {
            Namespace::Catalog => "catalog".to_string(),
            Namespace::Categories => "categories".to_string(),
            Namespace::Search(term) => {
                let mut hasher = DefaultHasher::new();
                term.hash(&mut hasher);
                format!("search-{:016x}", hasher.finish())
            }
        }
    }

    async fn load_index(&self) -> PageIndex {
        match tokio::fs::read(self.index_path()).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => PageIndex::default(),
        }
    }

    async fn store_index(&self, index: &PageIndex) {
        match serde_json::to_vec(index) {
            Ok(encoded) => {
                if let Err(e) = tokio::fs::write(self.index_path(), encoded).await {
                    debug!(error = %e, "Flat tier index write failed");
                }
            }
            Err(e) => debug!(error = %e, "Flat tier index encode failed"),
        }
    }

    fn index_path(&self) -> PathBuf {
        Path::join(&self.dir, INDEX_FILE)
    }
}
