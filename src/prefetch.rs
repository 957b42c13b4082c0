// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background prefetch scheduling.
//!
//! Speculatively fetches the next page after a successful foreground load.
//! Guarantees:
//! - At most one queued prefetch at a time; a second call while one is
//!   pending is a no-op, not a queue-append (bounds background traffic).
//! - Executes after a stagger delay (~500 ms) so it never competes with
//!   the foreground request.
//! - Skipped entirely unless the estimated network speed is fast, and
//!   skipped for pages already warm in any tier.
//!
//! Speed estimation is deliberately optimistic: where no
//! connection-quality signal exists the default is `Fast`, so the feature
//! degrades to "prefetch anyway" rather than never prefetching. The
//! default is pinned by a test so it cannot change silently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::fetch::FetchOrchestrator;
use crate::key::CacheKey;

/// Coarse connection-quality estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    Fast,
    Slow,
    /// User has a data-saver preference; treat like slow.
    DataSaver,
}

/// Source of connection-quality signals (effective type, data-saver flag).
pub trait NetworkQuality: Send + Sync {
    fn estimate(&self) -> ConnectionQuality;
}

/// Default estimator: no signal available, assume fast.
pub struct OptimisticQuality;

impl NetworkQuality for OptimisticQuality {
    fn estimate(&self) -> ConnectionQuality {
        ConnectionQuality::Fast
    }
}

/// Outcome of a scheduling attempt (observable for tests and metrics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchDecision {
    Scheduled,
    AlreadyPending,
    NotFast,
    Disabled,
}

pub struct PrefetchScheduler {
    enabled: bool,
    stagger: Duration,
    quality: Arc<dyn NetworkQuality>,
    pending: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PrefetchScheduler {
    pub fn new(enabled: bool, stagger: Duration, quality: Arc<dyn NetworkQuality>) -> Self {
        Self {
            enabled,
            stagger,
            quality,
            pending: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Queue a background fetch of `key` through the orchestrator.
    pub fn schedule(&self, key: CacheKey, orchestrator: Arc<FetchOrchestrator>) -> PrefetchDecision {
        if !self.enabled {
            crate::metrics::record_prefetch("disabled");
            return PrefetchDecision::Disabled;
        }
        if self.quality.estimate() != ConnectionQuality::Fast {
            crate::metrics::record_prefetch("not_fast");
            debug!(key = %key, "Prefetch skipped: network not fast");
            return PrefetchDecision::NotFast;
        }
        if self.pending.swap(true, Ordering::SeqCst) {
            crate::metrics::record_prefetch("already_pending");
            return PrefetchDecision::AlreadyPending;
        }

        let pending = Arc::clone(&self.pending);
        let stagger = self.stagger;
        let task = tokio::spawn(async move {
            // stagger so the foreground request wins the network
            tokio::time::sleep(stagger).await;

            if orchestrator.is_warm(&key).await {
                crate::metrics::record_prefetch("already_warm");
                debug!(key = %key, "Prefetch skipped: page already warm");
            } else {
                match orchestrator.fetch_page(key.clone(), false).await {
                    Ok(_) => crate::metrics::record_prefetch("fetched"),
                    Err(e) => {
                        // best-effort: a failed prefetch is not an error state
                        crate::metrics::record_prefetch("failed");
                        debug!(key = %key, error = %e, "Prefetch fetch failed");
                    }
                }
            }
            pending.store(false, Ordering::SeqCst);
        });
        *self.handle.lock() = Some(task);

        crate::metrics::record_prefetch("scheduled");
        PrefetchDecision::Scheduled
    }

    /// Abandon any queued prefetch (teardown). Tier writes already use
    /// last-writer-wins, so an aborted task cannot leave stale data.
    pub fn abort(&self) {
        if let Some(task) = self.handle.lock().take() {
            task.abort();
        }
        self.pending.store(false, Ordering::SeqCst);
    }

    /// Whether a prefetch is queued or running.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}
