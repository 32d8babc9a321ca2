//! Queue fixtures
//!
//! A [`Harness`] bundles a manual clock, an in-memory store and a network
//! monitor so tests can drive backoff and connectivity by hand.

use doublecheck_sync::offline::action::{ActionId, ActionKind};
use doublecheck_sync::offline::retry::{Jitter, RetryPolicy};
use doublecheck_sync::offline::store::{ActionStore, MemoryBackend};
use doublecheck_sync::shared::clock::ManualClock;
use doublecheck_sync::shared::config::SyncConfig;
use doublecheck_sync::shared::event::SyncEvent;
use doublecheck_sync::sync::{ActionExecutor, NetworkMonitor, NetworkStatus, SyncCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Attempts allowed in fixtures
pub const MAX_ATTEMPTS: u32 = 3;
/// Backoff base in fixtures
pub const BASE_DELAY: Duration = Duration::from_millis(1000);

/// Clock, store and network shared by one test
pub struct Harness {
    pub clock: ManualClock,
    pub store: Arc<ActionStore>,
    pub network: Arc<NetworkMonitor>,
}

impl Harness {
    /// Online harness over an unbounded in-memory store
    pub async fn new() -> Self {
        Self::with_backend(MemoryBackend::new(), NetworkStatus::Online).await
    }

    /// Harness that starts offline
    pub async fn offline() -> Self {
        Self::with_backend(MemoryBackend::new(), NetworkStatus::Offline).await
    }

    pub async fn with_backend(backend: MemoryBackend, status: NetworkStatus) -> Self {
        let clock = ManualClock::default();
        let store = ActionStore::open(Arc::new(backend), Arc::new(clock.clone()))
            .await
            .expect("open store");
        Self {
            clock,
            store: Arc::new(store),
            network: Arc::new(NetworkMonitor::with_status(status)),
        }
    }

    /// Coordinator with jitter-free backoff and no retry timers
    pub fn coordinator<E>(&self, kind: ActionKind, executor: E) -> SyncCoordinator
    where
        E: ActionExecutor + 'static,
    {
        SyncCoordinator::builder(Arc::clone(&self.store))
            .executor(kind, executor)
            .policy(exact_policy())
            .network(Arc::clone(&self.network))
            .config(test_config())
            .build()
    }

    /// Move the clock past the scheduled retry of `id`
    pub async fn advance_past_retry(&self, id: &ActionId) {
        let action = self
            .store
            .get(id)
            .await
            .expect("store read failed")
            .expect("action missing");
        if let Some(at) = action.next_attempt_at {
            let now = doublecheck_sync::shared::clock::Clock::now(&self.clock);
            let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
            self.clock.advance(wait + Duration::from_millis(1));
        }
    }
}

/// Backoff without jitter
pub fn exact_policy() -> RetryPolicy {
    RetryPolicy::new(MAX_ATTEMPTS, BASE_DELAY, Duration::from_secs(30)).with_jitter(0.0, Jitter::None)
}

/// Configuration with retry timers off and a short executor timeout
pub fn test_config() -> SyncConfig {
    SyncConfig::builder()
        .max_attempts(MAX_ATTEMPTS)
        .schedule_retries(false)
        .executor_timeout(Duration::from_secs(2))
        .drain_interval_secs(0)
        .build()
        .expect("valid test config")
}

/// Wait for the first event matching `predicate`
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<SyncEvent>, predicate: F) -> SyncEvent
where
    F: Fn(&SyncEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Events currently buffered, without waiting
pub fn drain_events(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}
