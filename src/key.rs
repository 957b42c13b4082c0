//! Cache key types.
//!
//! Every cached value is addressed by a [`CacheKey`]: a namespace plus a
//! page index. Search namespaces canonicalize the term (trim, lowercase,
//! collapse whitespace) so that equivalent queries land on the same entry.

use std::fmt;

/// Logical namespace of a cached value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Paginated catalog listing.
    Catalog,
    /// Paginated search results for a canonicalized term.
    Search(String),
    /// The category id → name list (page index is always 0).
    Categories,
}

impl Namespace {
    /// Build a search namespace from a raw user-typed term.
    #[must_use]
    pub fn search(term: &str) -> Self {
        Self::Search(canonicalize_term(term))
    }

    /// Stable string prefix used by the durable and flat tiers.
    #[must_use]
    pub fn prefix(&self) -> String {
        match self {
            Self::Catalog => "catalog".to_string(),
            Self::Search(term) => format!("search:{term}"),
            Self::Categories => "categories".to_string(),
        }
    }

    /// The canonical search term, if this is a search namespace.
    #[must_use]
    pub fn search_term(&self) -> Option<&str> {
        match self {
            Self::Search(term) => Some(term),
            _ => None,
        }
    }
}

/// Composite identifier for a cached page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: Namespace,
    /// 1-based page index (0 for the categories namespace).
    pub page: u32,
}

impl CacheKey {
    #[must_use]
    pub fn catalog(page: u32) -> Self {
        Self { namespace: Namespace::Catalog, page }
    }

    #[must_use]
    pub fn search(term: &str, page: u32) -> Self {
        Self { namespace: Namespace::search(term), page }
    }

    #[must_use]
    pub fn categories() -> Self {
        Self { namespace: Namespace::Categories, page: 0 }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace.prefix(), self.page)
    }
}

/// Canonicalize a search term: trim, lowercase, collapse inner whitespace.
#[must_use]
pub fn canonicalize_term(term: &str) -> String {
    term.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_search_terms_share_a_key() {
        let a = CacheKey::search("  Rust   Basics ", 1);
        let b = CacheKey::search("rust basics", 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_terms_do_not_collide() {
        let a = CacheKey::search("rust", 1);
        let b = CacheKey::search("ruts", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_rendering() {
        assert_eq!(CacheKey::catalog(3).to_string(), "catalog:3");
        assert_eq!(CacheKey::search("Old Papers", 2).to_string(), "search:old papers:2");
        assert_eq!(CacheKey::categories().to_string(), "categories:0");
    }

    #[test]
    fn test_canonicalize_collapses_whitespace() {
        assert_eq!(canonicalize_term("  A  \t B\nC "), "a b c");
        assert_eq!(canonicalize_term(""), "");
    }
}
