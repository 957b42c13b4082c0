//! Catalog view model and raw-row resolution.
//!
//! Backend rows arrive as loosely-shaped JSON (field naming differs between
//! deployments), so everything is mapped through one total resolution
//! function at the fetch boundary. Raw row shapes never leak past this
//! module.
//!
//! Computed badges:
//! - `is_new`: age-based with an engagement decay (see [`is_new`]).
//! - `is_trending`: score above the *current page's* trending threshold.
//!   The threshold is a per-page approximation, so trending status can
//!   differ for the same item when viewed on different pages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::source::FetchError;

/// Category name shown when a row's category id resolves to nothing.
pub const UNCATEGORIZED: &str = "Uncategorized";

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// A catalog category (id → display name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

/// Denormalized, display-ready catalog row.
///
/// Derived only: rebuilt wholesale on every fetch, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogViewModel {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<String>,
    /// Resolved category name; [`UNCATEGORIZED`] when unresolvable.
    pub category_name: String,
    pub views: u64,
    pub downloads: u64,
    pub rating_avg: f64,
    pub rating_count: u64,
    /// Creation timestamp (epoch millis).
    pub created_at: i64,
    pub file_url: Option<String>,
    /// Engagement score: `views + 2 × downloads`.
    pub score: u64,
    pub is_new: bool,
    pub is_trending: bool,
}

/// Canonical fields pulled out of a raw backend row.
#[derive(Debug, Clone)]
pub struct ResolvedRow {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<String>,
    pub views: u64,
    pub downloads: u64,
    pub rating_avg: f64,
    pub rating_count: u64,
    pub created_at: i64,
    pub file_url: Option<String>,
}

impl ResolvedRow {
    /// Engagement score used for trending: `views + 2 × downloads`.
    #[must_use]
    pub fn score(&self) -> u64 {
        self.views.saturating_add(self.downloads.saturating_mul(2))
    }
}

/// Total field resolution for duck-typed backend rows.
///
/// Accepts the field aliases seen across backend deployments; a row with
/// no usable id or title is a schema error. Missing numeric fields resolve
/// to zero rather than failing the row.
pub fn resolve_row(row: &Value) -> Result<ResolvedRow, FetchError> {
    let obj = row
        .as_object()
        .ok_or_else(|| FetchError::Schema("catalog row is not a JSON object".into()))?;

    let id = pick_string(obj, &["id", "uuid", "book_id", "paper_id"])
        .ok_or_else(|| FetchError::Schema("catalog row has no id field".into()))?;
    let title = pick_string(obj, &["title", "name"])
        .ok_or_else(|| FetchError::Schema(format!("row '{id}' has no title field")))?;

    Ok(ResolvedRow {
        id,
        title,
        author: pick_string(obj, &["author", "author_name", "writer"]),
        description: pick_string(obj, &["description", "summary", "abstract"]),
        category_id: pick_string(obj, &["category_id", "categoryId", "category"]),
        views: pick_u64(obj, &["views", "view_count", "views_count"]),
        downloads: pick_u64(obj, &["downloads", "download_count", "downloads_count"]),
        rating_avg: pick_f64(obj, &["rating_avg", "avg_rating", "rating"]),
        rating_count: pick_u64(obj, &["rating_count", "ratings_count", "num_ratings"]),
        created_at: pick_timestamp(obj, &["created_at", "createdAt", "inserted_at"]),
        file_url: pick_string(obj, &["file_url", "fileUrl", "url"]),
    })
}

/// Trending threshold for one page's score distribution.
///
/// Upper quartile of the page's scores, floored at 1 so an all-zero page
/// marks nothing as trending. Per-page approximation by design: computed
/// from the current page's rows only, never globally.
#[must_use]
pub fn trending_threshold(scores: &[u64]) -> u64 {
    if scores.is_empty() {
        return u64::MAX;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_unstable();
    let q3 = sorted[(sorted.len().saturating_sub(1)) * 3 / 4];
    q3.max(1)
}

/// Age-based "new" badge with engagement decay.
///
/// - ≤ 7 days old: always new.
/// - > 14 days old: never new.
/// - 7–14 days: new only while engagement stays low
///   (views ≤ 50 AND downloads ≤ 10 AND rating count ≤ 5).
#[must_use]
pub fn is_new(row: &ResolvedRow, now_ms: i64) -> bool {
    let age_ms = now_ms.saturating_sub(row.created_at);
    if age_ms <= 7 * DAY_MS {
        return true;
    }
    if age_ms > 14 * DAY_MS {
        return false;
    }
    row.views <= 50 && row.downloads <= 10 && row.rating_count <= 5
}

/// Join a resolved row with the category map and computed badges.
#[must_use]
pub fn build_view_model(
    row: ResolvedRow,
    categories: &HashMap<String, String>,
    threshold: u64,
    now_ms: i64,
) -> CatalogViewModel {
    let category_name = row
        .category_id
        .as_ref()
        .and_then(|id| categories.get(id).cloned())
        .unwrap_or_else(|| UNCATEGORIZED.to_string());
    let score = row.score();

    CatalogViewModel {
        is_new: is_new(&row, now_ms),
        is_trending: score >= threshold && score > 0,
        category_name,
        score,
        id: row.id,
        title: row.title,
        author: row.author,
        description: row.description,
        category_id: row.category_id,
        views: row.views,
        downloads: row.downloads,
        rating_avg: row.rating_avg,
        rating_count: row.rating_count,
        created_at: row.created_at,
        file_url: row.file_url,
    }
}

fn pick_string(obj: &serde_json::Map<String, Value>, names: &[&str]) -> Option<String> {
    for name in names {
        match obj.get(*name) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn pick_u64(obj: &serde_json::Map<String, Value>, names: &[&str]) -> u64 {
    for name in names {
        match obj.get(*name) {
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_u64() {
                    return v;
                }
                if let Some(v) = n.as_f64() {
                    return v.max(0.0) as u64;
                }
            }
            Some(Value::String(s)) => {
                if let Ok(v) = s.parse::<u64>() {
                    return v;
                }
            }
            _ => {}
        }
    }
    0
}

fn pick_f64(obj: &serde_json::Map<String, Value>, names: &[&str]) -> f64 {
    for name in names {
        match obj.get(*name) {
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_f64() {
                    return v;
                }
            }
            Some(Value::String(s)) => {
                if let Ok(v) = s.parse::<f64>() {
                    return v;
                }
            }
            _ => {}
        }
    }
    0.0
}

/// Timestamps arrive as epoch millis or epoch seconds; values below 10^12
/// are treated as seconds.
fn pick_timestamp(obj: &serde_json::Map<String, Value>, names: &[&str]) -> i64 {
    let raw = pick_u64(obj, names) as i64;
    if raw > 0 && raw < 1_000_000_000_000 {
        raw * 1000
    } else {
        raw
    }
}
