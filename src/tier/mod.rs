//! The cache tier hierarchy, fastest to slowest:
//!
//! - [`memory::MemoryTier`] (L1): process-local map, minutes-scale TTL.
//! - [`durable::DurableTier`] (L2): embedded SQLite store, hours-scale TTL.
//! - [`flat::FlatTier`] (L3): JSON blob per page on disk, last-resort
//!   fallback; fails open on every error.
//!
//! Tiers never share entries: each owns its own copy, replaced wholesale
//! on refetch. Writes are last-writer-wins by `written_at` so a superseded
//! background fetch cannot clobber newer data.

pub mod durable;
pub mod flat;
pub mod memory;

use thiserror::Error;

/// Tier I/O failure. Caught at the tier boundary and degraded to a
/// miss/no-op; never propagated to the consuming layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
