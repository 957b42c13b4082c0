// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Invalidation channel: push subscription with polling fallback.
//!
//! State machine:
//!
//! ```text
//! Unsubscribed → Subscribing → Subscribed          (happy path)
//!                     │
//!                     └──────→ Degraded (polling)  (error / timeout)
//! ```
//!
//! While `Subscribed`, change events from the backend are forwarded as
//! [`InvalidationSignal`]s and polling is disabled. On subscription error
//! or timeout the channel degrades to a fixed-interval poll; polling
//! cannot observe row-level changes, so each tick emits a
//! [`InvalidationSignal::PollSweep`] and the consumer refreshes page 1.
//! While degraded, the channel periodically re-attempts the subscription.
//!
//! The channel owns the subscription receiver and the poll task; both are
//! released by [`InvalidationChannel::close`], which the owning view must
//! call on teardown so a remount cannot leak a second poll loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::source::{CatalogSource, ChangeEvent, ChangeTable, SubscribeError};

/// Invalidation channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not yet started (or closed).
    Unsubscribed,
    /// Subscription handshake in progress.
    Subscribing,
    /// Push notifications active; polling disabled.
    Subscribed,
    /// Push unavailable; fixed-interval polling in effect.
    Degraded,
}

impl ChannelState {
    fn as_metric(self) -> u8 {
        match self {
            Self::Unsubscribed => 0,
            Self::Subscribing => 1,
            Self::Subscribed => 2,
            Self::Degraded => 3,
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsubscribed => write!(f, "Unsubscribed"),
            Self::Subscribing => write!(f, "Subscribing"),
            Self::Subscribed => write!(f, "Subscribed"),
            Self::Degraded => write!(f, "Degraded"),
        }
    }
}

/// A consumed-once invalidation trigger handed to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationSignal {
    /// A backend change notification.
    Change(ChangeEvent),
    /// A degraded-mode poll tick (no change detail available).
    PollSweep,
}

/// Tuning knobs for the channel, extracted from the cache config.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub subscribe_timeout: Duration,
    pub poll_interval: Duration,
    /// Poll ticks between re-subscription attempts while degraded.
    pub resubscribe_after_polls: u32,
}

/// Handle to the background subscribe/poll task.
pub struct InvalidationChannel {
    state_rx: watch::Receiver<ChannelState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl InvalidationChannel {
    /// Start the channel. Returns the handle plus the signal stream the
    /// coordinator consumes.
    pub fn start(
        source: Arc<dyn CatalogSource>,
        tables: Vec<ChangeTable>,
        config: ChannelConfig,
    ) -> (Self, mpsc::Receiver<InvalidationSignal>) {
        let (state_tx, state_rx) = watch::channel(ChannelState::Unsubscribed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (signal_tx, signal_rx) = mpsc::channel(32);

        let task = tokio::spawn(run(source, tables, config, state_tx, signal_tx, shutdown_rx));

        (
            Self { state_rx, shutdown: shutdown_tx, task: Some(task) },
            signal_rx,
        )
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Tear down the subscription and the poll timer. Must be called when
    /// the consuming view goes away; duplicate calls are harmless.
    pub async fn close(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if timeout(Duration::from_secs(2), task).await.is_err() {
                warn!("Invalidation channel did not stop in time");
            }
        }
    }
}

impl Drop for InvalidationChannel {
    fn drop(&mut self) {
        // close() is the polite path; abort covers a dropped-without-close
        // channel so the poll task cannot outlive its view.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn set_state(state_tx: &watch::Sender<ChannelState>, state: ChannelState) {
    crate::metrics::set_channel_state(state.as_metric());
    let _ = state_tx.send(state);
}

async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run(
    source: Arc<dyn CatalogSource>,
    tables: Vec<ChangeTable>,
    config: ChannelConfig,
    state_tx: watch::Sender<ChannelState>,
    signals: mpsc::Sender<InvalidationSignal>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        set_state(&state_tx, ChannelState::Subscribing);

        let attempt = tokio::select! {
            _ = wait_shutdown(&mut shutdown_rx) => break,
            res = timeout(config.subscribe_timeout, source.subscribe_changes(&tables)) => {
                res.map_err(|_| SubscribeError::Timeout).and_then(|inner| inner)
            }
        };

        match attempt {
            Ok(mut events) => {
                info!("Invalidation subscription confirmed");
                set_state(&state_tx, ChannelState::Subscribed);
                loop {
                    tokio::select! {
                        _ = wait_shutdown(&mut shutdown_rx) => {
                            set_state(&state_tx, ChannelState::Unsubscribed);
                            return;
                        }
                        event = events.recv() => match event {
                            Some(event) => {
                                debug!(table = event.table.as_str(), "Change event received");
                                if signals.send(InvalidationSignal::Change(event)).await.is_err() {
                                    return;
                                }
                            }
                            None => {
                                warn!("Push stream closed; re-attempting subscription");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, poll_secs = config.poll_interval.as_secs(),
                      "Subscription unavailable; degrading to polling");
                set_state(&state_tx, ChannelState::Degraded);

                let mut interval = tokio::time::interval(config.poll_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                interval.tick().await; // the first tick is immediate

                for _ in 0..config.resubscribe_after_polls.max(1) {
                    tokio::select! {
                        _ = wait_shutdown(&mut shutdown_rx) => {
                            set_state(&state_tx, ChannelState::Unsubscribed);
                            return;
                        }
                        _ = interval.tick() => {
                            if signals.send(InvalidationSignal::PollSweep).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                // fall through: re-attempt the subscription
            }
        }
    }
    set_state(&state_tx, ChannelState::Unsubscribed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use crate::source::{EventKind, FetchError, RowFilter, WATCHED_TABLES};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Mutex;

    enum SubscribeBehavior {
        FailImmediately,
        Hang,
        Succeed(mpsc::Receiver<ChangeEvent>),
    }

    struct SubSource {
        behavior: Mutex<Option<SubscribeBehavior>>,
        attempts: AtomicU64,
    }

    impl SubSource {
        fn new(behavior: SubscribeBehavior) -> Self {
            Self { behavior: Mutex::new(Some(behavior)), attempts: AtomicU64::new(0) }
        }
    }

    #[async_trait]
    impl CatalogSource for SubSource {
        async fn count_rows(&self, _: &RowFilter) -> Result<u64, FetchError> {
            Ok(0)
        }
        async fn fetch_rows(&self, _: &RowFilter, _: u64, _: u32) -> Result<Vec<Value>, FetchError> {
            Ok(vec![])
        }
        async fn fetch_categories(&self) -> Result<Vec<Category>, FetchError> {
            Ok(vec![])
        }
        async fn subscribe_changes(
            &self,
            _tables: &[ChangeTable],
        ) -> Result<mpsc::Receiver<ChangeEvent>, SubscribeError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.behavior.lock().await.take() {
                Some(SubscribeBehavior::Succeed(rx)) => Ok(rx),
                Some(SubscribeBehavior::Hang) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Some(SubscribeBehavior::FailImmediately) | None => {
                    Err(SubscribeError::Setup("refused".into()))
                }
            }
        }
    }

    fn fast_config() -> ChannelConfig {
        ChannelConfig {
            subscribe_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
            resubscribe_after_polls: 100,
        }
    }

    #[tokio::test]
    async fn test_happy_path_reaches_subscribed_and_forwards_events() {
        let (event_tx, event_rx) = mpsc::channel(4);
        let source = Arc::new(SubSource::new(SubscribeBehavior::Succeed(event_rx)));
        let (mut channel, mut signals) =
            InvalidationChannel::start(source, WATCHED_TABLES.to_vec(), fast_config());

        let mut state_rx = channel.state_receiver();
        while *state_rx.borrow() != ChannelState::Subscribed {
            state_rx.changed().await.unwrap();
        }

        event_tx
            .send(ChangeEvent { table: ChangeTable::Catalog, kind: EventKind::Update })
            .await
            .unwrap();

        let signal = signals.recv().await.unwrap();
        assert_eq!(
            signal,
            InvalidationSignal::Change(ChangeEvent {
                table: ChangeTable::Catalog,
                kind: EventKind::Update
            })
        );

        channel.close().await;
        assert_eq!(channel.state(), ChannelState::Unsubscribed);
    }

    #[tokio::test]
    async fn test_synchronous_failure_degrades_to_polling() {
        let source = Arc::new(SubSource::new(SubscribeBehavior::FailImmediately));
        let (mut channel, mut signals) =
            InvalidationChannel::start(source, WATCHED_TABLES.to_vec(), fast_config());

        // a poll sweep must arrive within roughly one polling interval
        let signal = timeout(Duration::from_millis(500), signals.recv())
            .await
            .expect("no poll sweep within interval")
            .unwrap();
        assert_eq!(signal, InvalidationSignal::PollSweep);
        assert_eq!(channel.state(), ChannelState::Degraded);

        channel.close().await;
    }

    #[tokio::test]
    async fn test_subscription_timeout_degrades_to_polling() {
        let source = Arc::new(SubSource::new(SubscribeBehavior::Hang));
        let (mut channel, mut signals) =
            InvalidationChannel::start(source, WATCHED_TABLES.to_vec(), fast_config());

        let signal = timeout(Duration::from_millis(500), signals.recv()).await.unwrap().unwrap();
        assert_eq!(signal, InvalidationSignal::PollSweep);
        assert_eq!(channel.state(), ChannelState::Degraded);

        channel.close().await;
    }

    #[tokio::test]
    async fn test_degraded_channel_retries_subscription() {
        let source = Arc::new(SubSource::new(SubscribeBehavior::FailImmediately));
        let config = ChannelConfig {
            subscribe_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            resubscribe_after_polls: 2,
        };
        let (mut channel, mut signals) =
            InvalidationChannel::start(source.clone(), WATCHED_TABLES.to_vec(), config);

        // drain sweeps until a second subscription attempt has happened
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while source.attempts.load(Ordering::SeqCst) < 2 {
            assert!(tokio::time::Instant::now() < deadline, "never re-attempted");
            let _ = timeout(Duration::from_millis(100), signals.recv()).await;
        }

        channel.close().await;
    }

    #[tokio::test]
    async fn test_close_stops_polling() {
        let source = Arc::new(SubSource::new(SubscribeBehavior::FailImmediately));
        let (mut channel, mut signals) =
            InvalidationChannel::start(source, WATCHED_TABLES.to_vec(), fast_config());

        let _ = timeout(Duration::from_millis(200), signals.recv()).await;
        channel.close().await;

        // the task is gone, so after draining queued sweeps the stream ends
        while let Some(signal) = signals.recv().await {
            assert_eq!(signal, InvalidationSignal::PollSweep);
        }
        assert_eq!(channel.state(), ChannelState::Unsubscribed);
    }
}
