//! Backend data source boundary.
//!
//! The backend is an opaque paginated query service; this trait is the only
//! surface the cache touches. Implementations wrap whatever transport the
//! application uses. Tests provide an in-process mock.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::Category;

/// Failure of a required backend query.
///
/// The only error that crosses to the consuming UI layer; storage and
/// subscription failures are absorbed with degraded-mode fallbacks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("auth error: {0}")]
    Auth(String),
}

/// Failure to establish a push subscription. Triggers polling fallback,
/// never surfaced to the caller.
#[derive(Debug, Clone, Error)]
pub enum SubscribeError {
    #[error("subscription setup failed: {0}")]
    Setup(String),
    #[error("subscription confirmation timed out")]
    Timeout,
}

/// Row filter for count/fetch queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    /// Canonicalized search term; `None` for the plain catalog listing.
    pub search: Option<String>,
}

/// Tables the invalidation channel watches for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeTable {
    /// The catalog table itself: row content changed.
    Catalog,
    /// Engagement tables: only derived counts changed.
    Likes,
    Ratings,
    Comments,
}

impl ChangeTable {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Likes => "likes",
            Self::Ratings => "ratings",
            Self::Comments => "comments",
        }
    }

    /// Engagement tables affect derived counts, not page content.
    #[must_use]
    pub fn is_engagement(&self) -> bool {
        !matches!(self, Self::Catalog)
    }
}

/// All tables the invalidation channel subscribes to.
pub const WATCHED_TABLES: [ChangeTable; 4] = [
    ChangeTable::Catalog,
    ChangeTable::Likes,
    ChangeTable::Ratings,
    ChangeTable::Comments,
];

/// Kind of a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// A single change notification from the backend.
///
/// Transient: consumed once by the invalidation channel and translated into
/// flush/refetch commands, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: ChangeTable,
    pub kind: EventKind,
}

/// The backend paginated data source.
///
/// `count_rows` is head-only (no payload transfer). `fetch_rows` returns
/// raw JSON rows; field naming is deployment-specific and resolved by
/// [`crate::model::resolve_row`] at the orchestrator boundary.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Total row count matching the filter.
    async fn count_rows(&self, filter: &RowFilter) -> Result<u64, FetchError>;

    /// One page of raw rows, in backend order.
    async fn fetch_rows(
        &self,
        filter: &RowFilter,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<Value>, FetchError>;

    /// The full category list (small, rarely changes).
    async fn fetch_categories(&self) -> Result<Vec<Category>, FetchError>;

    /// Open a push subscription for change events on the given tables.
    ///
    /// Dropping the receiver unsubscribes. The sender side closing is how
    /// implementations signal a lost subscription.
    async fn subscribe_changes(
        &self,
        tables: &[ChangeTable],
    ) -> Result<mpsc::Receiver<ChangeEvent>, SubscribeError>;
}
