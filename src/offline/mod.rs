//! # Offline Action Queue
//!
//! Offline-first submission of inspection actions. A user action is tried
//! against the backend immediately; if that fails or the device is offline it
//! is persisted and replayed when connectivity returns.
//!
//! ## Architecture
//!
//! - **Action Store**: durable record of every action not yet confirmed
//! - **Retry Policy**: bounded attempts with exponential backoff
//! - **Sync Coordinator**: drains the store through per-kind executors
//! - **Network Monitor**: online transitions trigger a drain
//!
//! ## Key Components
//!
//! - `action.rs`: the persisted record and its patch type
//! - `store.rs`: the durable store and the persistence backend seam
//! - `retry.rs`: retry eligibility and backoff
//!
//! ## Usage
//!
//! ```rust,no_run
//! use doublecheck_sync::offline::{OfflineQueue, action::ActionKind};
//! use doublecheck_sync::offline::store::ActionStore;
//! use doublecheck_sync::shared::config::SyncConfig;
//! use doublecheck_sync::sync::ExecutorRegistry;
//! use std::sync::Arc;
//!
//! # async fn example(executors: ExecutorRegistry) -> doublecheck_sync::shared::error::Result<()> {
//! let store = Arc::new(ActionStore::in_memory().await?);
//! let queue = OfflineQueue::new(store, executors, SyncConfig::default());
//! queue.start(None).await?;
//!
//! queue
//!     .enqueue_or_execute(ActionKind::InspectionCreate, serde_json::json!({"property_id": "p1"}))
//!     .await?;
//! println!("{} actions waiting", queue.pending_count().await?);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod retry;
pub mod store;

pub use action::{ActionId, ActionKind, ActionPatch, ActionStatus, PendingAction};
pub use retry::{Jitter, RetryPolicy};
pub use store::{ActionStore, MemoryBackend, PersistenceBackend};

use crate::shared::config::SyncConfig;
use crate::shared::error::Result;
use crate::shared::event::SyncEvent;
use crate::sync::{
    ConnectivitySource, DrainReport, DrainScheduler, ExecutorRegistry, NetworkMonitor, Submission,
    SyncCoordinator, SyncMetrics,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Offline queue facade used by the UI
#[derive(Debug)]
pub struct OfflineQueue {
    coordinator: SyncCoordinator,
    network: Arc<NetworkMonitor>,
    scheduler: Option<DrainScheduler>,
    probe_interval: Duration,
    probe_task: Mutex<Option<JoinHandle<()>>>,
    /// Interrupted records are recovered on the first start only
    recovered: AtomicBool,
}

impl OfflineQueue {
    /// Create a queue with its own network monitor, assumed online
    pub fn new(store: Arc<ActionStore>, executors: ExecutorRegistry, config: SyncConfig) -> Self {
        Self::with_network(store, executors, Arc::new(NetworkMonitor::new()), config)
    }

    /// Create a queue observing an existing network monitor
    pub fn with_network(
        store: Arc<ActionStore>,
        executors: ExecutorRegistry,
        network: Arc<NetworkMonitor>,
        config: SyncConfig,
    ) -> Self {
        let scheduler_interval = config.drain_interval();
        let probe_interval = Duration::from_secs(config.probe_interval_secs.max(1));

        let coordinator = SyncCoordinator::builder(store)
            .executors(executors)
            .network(Arc::clone(&network))
            .config(config)
            .build();
        let scheduler =
            scheduler_interval.map(|interval| DrainScheduler::new(coordinator.clone(), interval));

        Self {
            coordinator,
            network,
            scheduler,
            probe_interval,
            probe_task: Mutex::new(None),
            recovered: AtomicBool::new(false),
        }
    }

    /// Take ownership of draining the store.
    ///
    /// On the first call, actions a previous session left `in_flight` go back
    /// to `pending`. Starts the periodic drain timer and optional
    /// connectivity probing, then drains once. Only one process should start
    /// a queue over a given store.
    pub async fn start(&self, probe: Option<Arc<dyn ConnectivitySource>>) -> Result<()> {
        if !self.recovered.load(Ordering::SeqCst) {
            self.coordinator.store().recover_interrupted().await?;
            self.recovered.store(true, Ordering::SeqCst);
        }

        if let Some(scheduler) = &self.scheduler {
            scheduler.start().await;
        }

        if let Some(source) = probe {
            let mut task = self.probe_task.lock().await;
            if task.is_none() {
                *task = Some(self.network.spawn_polling(source, self.probe_interval));
            }
        }

        self.coordinator.spawn_drain();
        Ok(())
    }

    /// Stop background timers. Queued actions stay in the store.
    pub async fn stop(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop().await;
        }
        if let Some(task) = self.probe_task.lock().await.take() {
            task.abort();
        }
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.network
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// Try the action now, or queue it for later
    pub async fn enqueue_or_execute(
        &self,
        kind: ActionKind,
        payload: serde_json::Value,
    ) -> Result<Submission> {
        self.coordinator.enqueue_or_execute(kind, payload).await
    }

    /// Actions still waiting to reach the backend
    pub async fn pending_count(&self) -> Result<usize> {
        self.coordinator.pending_count().await
    }

    /// Actions that need the user to retry or dismiss them
    pub async fn failed_actions(&self) -> Result<Vec<PendingAction>> {
        self.coordinator.failed_actions().await
    }

    pub async fn retry(&self, id: &ActionId) -> Result<bool> {
        self.coordinator.retry(id).await
    }

    pub async fn dismiss(&self, id: &ActionId) -> Result<()> {
        self.coordinator.dismiss(id).await
    }

    pub async fn drain(&self) -> Result<DrainReport> {
        self.coordinator.drain().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.coordinator.subscribe()
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.coordinator.metrics()
    }

    /// Get queue statistics
    pub async fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for action in self.coordinator.store().list(None).await? {
            match action.status {
                ActionStatus::Pending => stats.pending += 1,
                ActionStatus::InFlight => stats.in_flight += 1,
                ActionStatus::Failed => stats.failed += 1,
                ActionStatus::Done => {}
            }
        }
        Ok(stats)
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    /// Waiting for a drain, including scheduled retries
    pub pending: usize,
    /// Currently executing
    pub in_flight: usize,
    /// Waiting for the user
    pub failed: usize,
}
