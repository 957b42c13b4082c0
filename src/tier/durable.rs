// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! L2: embedded SQLite store for pages, categories, and search results.
//!
//! Schema:
//! ```sql
//! CREATE TABLE catalog_pages (
//!   namespace   TEXT NOT NULL,   -- "catalog" | "search:<term>"
//!   entry_key   TEXT NOT NULL,   -- "{page}_{ordinal:04}" (sorts in insert order)
//!   page_index  INTEGER NOT NULL,
//!   page_size   INTEGER NOT NULL,
//!   total_count INTEGER NOT NULL,
//!   payload     TEXT NOT NULL,   -- one view model per row, JSON
//!   written_at  INTEGER NOT NULL,
//!   ttl_ms      INTEGER NOT NULL,
//!   PRIMARY KEY (namespace, entry_key)
//! )
//! ```
//!
//! Pages are stored one row per item under a `{page}_{ordinal}` composite
//! key so arbitrary page sizes reconstruct in original order; loads order
//! by `entry_key` (ordinals zero-padded so lexicographic order matches).
//! TTL is enforced at read time; `clear_expired_data` is a best-effort
//! maintenance sweep, not required for correctness.

use std::sync::Once;
use std::time::Duration;

use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use tracing::{debug, warn};

use super::StorageError;
use crate::entry::{epoch_millis, Page};
use crate::key::Namespace;
use crate::model::{CatalogViewModel, Category};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct DurableTier {
    pool: AnyPool,
}

impl DurableTier {
    /// Open (or create) the store with startup-mode retry. Failure here
    /// degrades the whole tier to always-miss; the caller logs and carries
    /// on without it.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let pool = retry("durable_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await?;

        let tier = Self { pool };
        tier.enable_wal_mode().await?;
        tier.init_schema().await?;
        Ok(tier)
    }

    /// WAL mode: concurrent reads during writes, single fsync per commit.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {e}")))?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {e}")))?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let pages_sql = r#"
            CREATE TABLE IF NOT EXISTS catalog_pages (
                namespace TEXT NOT NULL,
                entry_key TEXT NOT NULL,
                page_index INTEGER NOT NULL,
                page_size INTEGER NOT NULL,
                total_count INTEGER NOT NULL,
                payload TEXT NOT NULL,
                written_at INTEGER NOT NULL,
                ttl_ms INTEGER NOT NULL,
                PRIMARY KEY (namespace, entry_key)
            )
            "#;
        let pages_idx_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_catalog_pages_page
            ON catalog_pages (namespace, page_index)
            "#;
        let categories_sql = r#"
            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                written_at INTEGER NOT NULL,
                ttl_ms INTEGER NOT NULL
            )
            "#;

        retry("durable_init_schema", &RetryConfig::startup(), || async {
            for sql in [pages_sql, pages_idx_sql, categories_sql] {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
            }
            Ok(())
        })
        .await
    }

    /// Composite per-item key. Zero-padded ordinal so `ORDER BY entry_key`
    /// reconstructs insertion order for any page size up to 10k items.
    fn entry_key(page_index: u32, ordinal: usize) -> String {
        format!("{page_index}_{ordinal:04}")
    }

    /// Persist one page, one row per item, replacing any prior copy.
    ///
    /// Skips the write (Ok) when the stored copy is strictly newer, so a
    /// superseded background fetch cannot roll the page back.
    pub async fn save_page(
        &self,
        namespace: &Namespace,
        page: &Page<CatalogViewModel>,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let ns = namespace.prefix();
        let written_at = epoch_millis();

        if let Some(existing) = self.page_written_at(&ns, page.page_index).await? {
            if existing > written_at {
                debug!(namespace = %ns, page = page.page_index, "Skipping stale page write");
                return Ok(());
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        sqlx::query("DELETE FROM catalog_pages WHERE namespace = ? AND page_index = ?")
            .bind(&ns)
            .bind(i64::from(page.page_index))
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        for (ordinal, item) in page.items.iter().enumerate() {
            let payload = serde_json::to_string(item)
                .map_err(|e| StorageError::Backend(format!("serialize view model: {e}")))?;
            sqlx::query(
                "INSERT INTO catalog_pages \
                 (namespace, entry_key, page_index, page_size, total_count, payload, written_at, ttl_ms) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&ns)
            .bind(Self::entry_key(page.page_index, ordinal))
            .bind(i64::from(page.page_index))
            .bind(i64::from(page.page_size))
            .bind(page.total_count as i64)
            .bind(payload)
            .bind(written_at)
            .bind(ttl.as_millis() as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Load a page if present and unexpired. Rows are re-sorted by the
    /// composite entry key to restore original ordering.
    pub async fn load_page(
        &self,
        namespace: &Namespace,
        page_index: u32,
    ) -> Result<Option<(Page<CatalogViewModel>, i64)>, StorageError> {
        let ns = namespace.prefix();
        let rows = sqlx::query(
            "SELECT entry_key, page_size, total_count, payload, written_at, ttl_ms \
             FROM catalog_pages WHERE namespace = ? AND page_index = ? \
             ORDER BY entry_key",
        )
        .bind(&ns)
        .bind(i64::from(page_index))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if rows.is_empty() {
            return Ok(None);
        }

        let now = epoch_millis();
        let mut items = Vec::with_capacity(rows.len());
        let mut page_size: u32 = 0;
        let mut total_count: u64 = 0;
        let mut written_at: i64 = 0;

        for row in &rows {
            let row_written: i64 = row.try_get("written_at").unwrap_or(0);
            let ttl_ms: i64 = row.try_get("ttl_ms").unwrap_or(0);
            if now.saturating_sub(row_written) >= ttl_ms {
                // Expired: evict the whole page, report absent.
                self.clear_key(namespace, page_index).await.ok();
                return Ok(None);
            }
            written_at = row_written;
            page_size = row.try_get::<i64, _>("page_size").unwrap_or(0) as u32;
            total_count = row.try_get::<i64, _>("total_count").unwrap_or(0) as u64;

            let payload: String = row
                .try_get("payload")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let item: CatalogViewModel = serde_json::from_str(&payload)
                .map_err(|e| StorageError::Backend(format!("deserialize view model: {e}")))?;
            items.push(item);
        }

        Ok(Some((
            Page { page_index, page_size, total_count, items },
            written_at,
        )))
    }

    /// Replace the category set wholesale (clear-then-insert; categories
    /// are small and rarely diverge partially).
    pub async fn save_categories(
        &self,
        categories: &[Category],
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let written_at = epoch_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        sqlx::query("DELETE FROM categories")
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        for category in categories {
            sqlx::query("INSERT INTO categories (id, name, written_at, ttl_ms) VALUES (?, ?, ?, ?)")
                .bind(&category.id)
                .bind(&category.name)
                .bind(written_at)
                .bind(ttl.as_millis() as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn load_categories(&self) -> Result<Option<Vec<Category>>, StorageError> {
        let rows = sqlx::query("SELECT id, name, written_at, ttl_ms FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if rows.is_empty() {
            return Ok(None);
        }

        let now = epoch_millis();
        let mut categories = Vec::with_capacity(rows.len());
        for row in &rows {
            let written_at: i64 = row.try_get("written_at").unwrap_or(0);
            let ttl_ms: i64 = row.try_get("ttl_ms").unwrap_or(0);
            if now.saturating_sub(written_at) >= ttl_ms {
                return Ok(None);
            }
            categories.push(Category {
                id: row.try_get("id").map_err(|e| StorageError::Backend(e.to_string()))?,
                name: row.try_get("name").map_err(|e| StorageError::Backend(e.to_string()))?,
            });
        }
        Ok(Some(categories))
    }

    /// Store search results under their canonicalized-term namespace.
    pub async fn save_search_results(
        &self,
        term: &str,
        page: &Page<CatalogViewModel>,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        self.save_page(&Namespace::search(term), page, ttl).await
    }

    pub async fn load_search_results(
        &self,
        term: &str,
        page_index: u32,
    ) -> Result<Option<(Page<CatalogViewModel>, i64)>, StorageError> {
        self.load_page(&Namespace::search(term), page_index).await
    }

    /// Remove one cached page.
    pub async fn clear_key(
        &self,
        namespace: &Namespace,
        page_index: u32,
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM catalog_pages WHERE namespace = ? AND page_index = ?")
            .bind(namespace.prefix())
            .bind(i64::from(page_index))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Remove every page in the plain catalog namespace.
    pub async fn clear_catalog(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM catalog_pages WHERE namespace = ?")
            .bind(Namespace::Catalog.prefix())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Remove every cached search result (all terms).
    pub async fn clear_search_results(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM catalog_pages WHERE namespace LIKE 'search:%'")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn clear_categories(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM categories")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<(), StorageError> {
        self.clear_catalog().await?;
        self.clear_search_results().await?;
        self.clear_categories().await?;
        Ok(())
    }

    /// Best-effort maintenance sweep of expired rows. A failure on one
    /// entity type must not block sweeping the others.
    pub async fn clear_expired_data(&self) {
        let now = epoch_millis();
        if let Err(e) = sqlx::query("DELETE FROM catalog_pages WHERE written_at + ttl_ms <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
        {
            warn!(error = %e, "Expired-page sweep failed");
        }
        if let Err(e) = sqlx::query("DELETE FROM categories WHERE written_at + ttl_ms <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
        {
            warn!(error = %e, "Expired-category sweep failed");
        }
    }

    /// Page indexes with unexpired data in a namespace (prefetch warm check).
    pub async fn warm_pages(&self, namespace: &Namespace) -> Result<Vec<u32>, StorageError> {
        let rows = sqlx::query(
            "SELECT DISTINCT page_index FROM catalog_pages \
             WHERE namespace = ? AND written_at + ttl_ms > ?",
        )
        .bind(namespace.prefix())
        .bind(epoch_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<i64, _>("page_index").ok())
            .map(|v| v as u32)
            .collect())
    }

    async fn page_written_at(
        &self,
        ns: &str,
        page_index: u32,
    ) -> Result<Option<i64>, StorageError> {
        let row = sqlx::query(
            "SELECT MAX(written_at) AS written_at FROM catalog_pages \
             WHERE namespace = ? AND page_index = ?",
        )
        .bind(ns)
        .bind(i64::from(page_index))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(row.try_get::<i64, _>("written_at").ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CatalogViewModel;

    fn vm(id: &str) -> CatalogViewModel {
        CatalogViewModel {
            id: id.into(),
            title: format!("Title {id}"),
            author: None,
            description: None,
            category_id: None,
            category_name: "Uncategorized".into(),
            views: 0,
            downloads: 0,
            rating_avg: 0.0,
            rating_count: 0,
            created_at: 0,
            file_url: None,
            score: 0,
            is_new: false,
            is_trending: false,
        }
    }

    fn page(index: u32, ids: &[&str]) -> Page<CatalogViewModel> {
        Page {
            page_index: index,
            page_size: 20,
            total_count: 45,
            items: ids.iter().map(|id| vm(id)).collect(),
        }
    }

    async fn temp_tier() -> (DurableTier, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        (DurableTier::new(&url).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn test_save_and_load_preserves_order() {
        let (tier, _dir) = temp_tier().await;
        let saved = page(1, &["a", "b", "c"]);
        tier.save_page(&Namespace::Catalog, &saved, Duration::from_secs(3600))
            .await
            .unwrap();

        let (loaded, _) = tier.load_page(&Namespace::Catalog, 1).await.unwrap().unwrap();
        let ids: Vec<_> = loaded.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(loaded.total_count, 45);
        assert_eq!(loaded.page_size, 20);
    }

    #[tokio::test]
    async fn test_expired_page_reads_absent() {
        let (tier, _dir) = temp_tier().await;
        tier.save_page(&Namespace::Catalog, &page(1, &["a"]), Duration::ZERO)
            .await
            .unwrap();

        assert!(tier.load_page(&Namespace::Catalog, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_categories_clear_then_insert() {
        let (tier, _dir) = temp_tier().await;
        let first = vec![Category { id: "1".into(), name: "Maths".into() }];
        let second = vec![
            Category { id: "2".into(), name: "Physics".into() },
            Category { id: "3".into(), name: "Biology".into() },
        ];
        tier.save_categories(&first, Duration::from_secs(3600)).await.unwrap();
        tier.save_categories(&second, Duration::from_secs(3600)).await.unwrap();

        let loaded = tier.load_categories().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|c| c.id != "1"));
    }

    #[tokio::test]
    async fn test_search_namespace_is_isolated_from_catalog() {
        let (tier, _dir) = temp_tier().await;
        tier.save_page(&Namespace::Catalog, &page(1, &["cat"]), Duration::from_secs(3600))
            .await
            .unwrap();
        tier.save_search_results("Rust  Basics", &page(1, &["hit"]), Duration::from_secs(3600))
            .await
            .unwrap();

        tier.clear_catalog().await.unwrap();
        assert!(tier.load_page(&Namespace::Catalog, 1).await.unwrap().is_none());

        // canonicalized term still resolves
        let (results, _) = tier.load_search_results("rust basics", 1).await.unwrap().unwrap();
        assert_eq!(results.items[0].id, "hit");
    }

    #[tokio::test]
    async fn test_clear_expired_data_sweeps_pages() {
        let (tier, _dir) = temp_tier().await;
        tier.save_page(&Namespace::Catalog, &page(1, &["a"]), Duration::ZERO)
            .await
            .unwrap();
        tier.save_page(&Namespace::Catalog, &page(2, &["b"]), Duration::from_secs(3600))
            .await
            .unwrap();

        tier.clear_expired_data().await;

        assert_eq!(tier.warm_pages(&Namespace::Catalog).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_warm_pages_reports_unexpired_only() {
        let (tier, _dir) = temp_tier().await;
        tier.save_page(&Namespace::Catalog, &page(1, &["a"]), Duration::from_secs(3600))
            .await
            .unwrap();
        tier.save_page(&Namespace::Catalog, &page(3, &["c"]), Duration::from_secs(3600))
            .await
            .unwrap();
        tier.save_page(&Namespace::Catalog, &page(2, &["b"]), Duration::ZERO)
            .await
            .unwrap();

        let mut warm = tier.warm_pages(&Namespace::Catalog).await.unwrap();
        warm.sort_unstable();
        assert_eq!(warm, vec![1, 3]);
    }
}
