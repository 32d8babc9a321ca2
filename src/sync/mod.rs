//! # Sync Coordinator
//!
//! Drains the durable action store against the real remote operations.
//!
//! ## Architecture
//!
//! - **Executors**: one [`ActionExecutor`] per action kind
//! - **Retry Policy**: bounded attempts with exponential backoff
//! - **Network Monitor**: a transition to online triggers a drain
//! - **Scheduler**: periodic drain timer
//! - **Metrics**: drain and execution counters
//!
//! ## Drain Semantics
//!
//! A drain claims every due `pending` action, oldest first, flipping it to
//! `in_flight` with a compare-and-set on the store, and runs its executor
//! under a timeout. Success removes the record; a transient failure schedules
//! a retry; exhausted retries and permanent failures mark it `failed`.
//! Actions whose kind has no registered executor are left `pending` for a
//! process that can run them.
//!
//! Only one dispatch pass runs at a time. A `drain()` that overlaps an active
//! pass asks it to run once more and returns immediately. Dispatched
//! executions settle outside the pass, so a stuck call does not block the
//! next drain from picking up other actions.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use doublecheck_sync::offline::action::ActionKind;
//! use doublecheck_sync::offline::store::ActionStore;
//! use doublecheck_sync::sync::{executor_fn, SyncCoordinator};
//! use std::sync::Arc;
//!
//! # async fn example() -> doublecheck_sync::shared::error::Result<()> {
//! let store = Arc::new(ActionStore::in_memory().await?);
//! let coordinator = SyncCoordinator::builder(store)
//!     .executor(ActionKind::PhotoUpload, executor_fn(|_action| async { Ok(()) }))
//!     .build();
//!
//! coordinator.enqueue_or_execute(ActionKind::PhotoUpload, serde_json::json!({})).await?;
//! let report = coordinator.drain().await?;
//! println!("{:?}", report);
//! # Ok(())
//! # }
//! ```

pub mod executor;
pub mod metrics;
pub mod network_monitor;
pub mod scheduler;

pub use executor::{executor_fn, ActionExecutor, ExecutorRegistry, FnExecutor};
pub use metrics::SyncMetrics;
pub use network_monitor::{ConnectivitySource, HttpProbe, NetworkMonitor, NetworkStatus};
pub use scheduler::DrainScheduler;

use crate::offline::action::{ActionId, ActionKind, ActionPatch, ActionStatus, PendingAction};
use crate::offline::retry::RetryPolicy;
use crate::offline::store::ActionStore;
use crate::shared::config::SyncConfig;
use crate::shared::error::{ExecutorError, QueueError, Result};
use crate::shared::event::SyncEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::Poll;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Semaphore};
use tokio::task::JoinSet;

/// Buffered events per subscriber before lagging
const EVENT_CAPACITY: usize = 256;

/// Summary of one `drain()` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Executions started by this call
    pub started: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
    /// Dismissed while in flight
    pub discarded: usize,
    /// Store updates that failed after execution
    pub storage_errors: usize,
    /// Another pass was active; this call only requested a re-run
    pub coalesced: bool,
    /// Skipped because the network monitor reports offline
    pub skipped_offline: bool,
    /// Due actions left pending because no executor handles their kind
    pub unregistered: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Discarded => self.discarded += 1,
            Outcome::StorageError => self.storage_errors += 1,
        }
    }
}

/// Result of `enqueue_or_execute`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Executed immediately; nothing was queued
    Completed { id: ActionId },
    /// Queued for a later drain
    Queued { id: ActionId },
    /// Permanently rejected on the first attempt; kept for the user
    Failed { id: ActionId, error: String },
}

impl Submission {
    pub fn id(&self) -> &ActionId {
        match self {
            Submission::Completed { id }
            | Submission::Queued { id }
            | Submission::Failed { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Retried,
    Failed,
    Discarded,
    StorageError,
}

/// Builder for [`SyncCoordinator`]
pub struct SyncCoordinatorBuilder {
    store: Arc<ActionStore>,
    executors: ExecutorRegistry,
    policy: Option<RetryPolicy>,
    network: Option<Arc<NetworkMonitor>>,
    config: SyncConfig,
}

impl SyncCoordinatorBuilder {
    /// Register the executor for `kind`
    pub fn executor<E>(mut self, kind: ActionKind, executor: E) -> Self
    where
        E: ActionExecutor + 'static,
    {
        self.executors.register(kind, Arc::new(executor));
        self
    }

    /// Use a prepared executor registry
    pub fn executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    /// Override the retry policy derived from the configuration
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Drain on every transition to online
    pub fn network(mut self, network: Arc<NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SyncCoordinator {
        let policy = self
            .policy
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(Inner {
            store: self.store,
            executors: self.executors,
            policy,
            network: self.network,
            events,
            drain_gate: tokio::sync::Mutex::new(()),
            rerun: AtomicBool::new(false),
            permits: Arc::new(Semaphore::new(self.config.max_concurrent)),
            timeout: self.config.executor_timeout(),
            schedule_retries: self.config.schedule_retries,
            metrics: Mutex::new(SyncMetrics::new()),
        });

        let coordinator = SyncCoordinator { inner };
        coordinator.wire_network();
        coordinator
    }
}

/// Orchestrates draining of the action store
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("executors", &self.inner.executors)
            .field("policy", &self.inner.policy)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

struct Inner {
    store: Arc<ActionStore>,
    executors: ExecutorRegistry,
    policy: RetryPolicy,
    network: Option<Arc<NetworkMonitor>>,
    events: broadcast::Sender<SyncEvent>,
    /// Held for the duration of a dispatch pass
    drain_gate: tokio::sync::Mutex<()>,
    /// Set by drains that found a pass already running
    rerun: AtomicBool,
    permits: Arc<Semaphore>,
    timeout: Duration,
    schedule_retries: bool,
    metrics: Mutex<SyncMetrics>,
}

impl SyncCoordinator {
    pub fn builder(store: Arc<ActionStore>) -> SyncCoordinatorBuilder {
        SyncCoordinatorBuilder {
            store,
            executors: ExecutorRegistry::new(),
            policy: None,
            network: None,
            config: SyncConfig::default(),
        }
    }

    pub fn store(&self) -> &Arc<ActionStore> {
        &self.inner.store
    }

    pub fn network(&self) -> Option<&Arc<NetworkMonitor>> {
        self.inner.network.as_ref()
    }

    /// Receive structured success and failure events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the drain counters
    pub fn metrics(&self) -> SyncMetrics {
        self.inner.metrics_guard().clone()
    }

    /// Try the remote call now; queue the action if that fails or we are offline.
    ///
    /// Only storage failures are returned as errors: without durable storage
    /// the action could not be saved for later.
    pub async fn enqueue_or_execute(
        &self,
        kind: ActionKind,
        payload: serde_json::Value,
    ) -> Result<Submission> {
        let inner = &self.inner;
        if !inner.executors.contains(&kind) {
            return Err(QueueError::UnknownKind {
                kind: kind.to_string(),
            });
        }

        let store = &inner.store;
        let mut action = PendingAction::new(kind, payload, store.clock().now());

        if !inner.is_online() {
            let stored = store.insert(action).await?;
            tracing::info!(action_id = %stored.id, kind = %stored.kind, "Offline, action queued");
            inner.emit(SyncEvent::Enqueued {
                id: stored.id.clone(),
                kind: stored.kind.clone(),
            });
            return Ok(Submission::Queued { id: stored.id });
        }

        inner.metrics_guard().record_execution();
        let error = match inner.invoke(&action).await {
            Ok(()) => {
                inner.metrics_guard().record_success();
                tracing::debug!(action_id = %action.id, kind = %action.kind, "Executed immediately");
                inner.emit(SyncEvent::Succeeded {
                    id: action.id.clone(),
                    kind: action.kind.clone(),
                });
                return Ok(Submission::Completed { id: action.id });
            }
            Err(error) => error,
        };

        action.attempts = 1;
        action.last_error = Some(error.to_string());

        if inner.policy.should_retry_after(&action, &error) {
            let delay = inner.policy.next_delay(&action);
            action.status = ActionStatus::Pending;
            action.next_attempt_at = Some(inner.due_after(delay));

            let stored = store.insert(action).await?;
            tracing::warn!(action_id = %stored.id, kind = %stored.kind, %error, "Immediate attempt failed, action queued");
            inner.metrics_guard().record_retry();
            inner.emit(SyncEvent::Enqueued {
                id: stored.id.clone(),
                kind: stored.kind.clone(),
            });
            inner.emit(SyncEvent::RetryScheduled {
                id: stored.id.clone(),
                attempts: stored.attempts,
                delay_ms: delay.as_millis() as u64,
            });
            inner.schedule_retry(delay);
            Ok(Submission::Queued { id: stored.id })
        } else {
            action.status = ActionStatus::Failed;

            let stored = store.insert(action).await?;
            tracing::warn!(action_id = %stored.id, kind = %stored.kind, %error, "Immediate attempt rejected");
            inner.metrics_guard().record_failure();
            inner.emit(SyncEvent::Failed {
                id: stored.id.clone(),
                kind: stored.kind.clone(),
                attempts: stored.attempts,
                error: error.to_string(),
            });
            Ok(Submission::Failed {
                id: stored.id,
                error: error.to_string(),
            })
        }
    }

    /// Process every due action in the store.
    pub async fn drain(&self) -> Result<DrainReport> {
        let inner = &self.inner;
        let mut report = DrainReport::default();

        if !inner.is_online() {
            tracing::debug!("Offline, drain skipped");
            report.skipped_offline = true;
            return Ok(report);
        }

        let mut tasks = JoinSet::new();
        let mut dispatch_error = None;
        let mut ran_pass = false;

        loop {
            let Ok(gate) = inner.drain_gate.try_lock() else {
                inner.rerun.store(true, Ordering::SeqCst);
                if !ran_pass {
                    inner.metrics_guard().record_coalesced();
                    tracing::debug!("Drain already running, re-run requested");
                    report.coalesced = true;
                }
                break;
            };
            ran_pass = true;

            inner.metrics_guard().record_drain_start();
            loop {
                inner.rerun.store(false, Ordering::SeqCst);
                if let Err(e) = self.dispatch_pass(&mut tasks, &mut report).await {
                    tracing::error!(error = %e, "Drain pass aborted");
                    dispatch_error = Some(e);
                    break;
                }
                if !inner.rerun.swap(false, Ordering::SeqCst) {
                    break;
                }
            }
            drop(gate);

            // A drain may have arrived between the last check and releasing the gate
            if dispatch_error.is_some() || !inner.rerun.load(Ordering::SeqCst) {
                break;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => tracing::error!(error = %e, "Execution task panicked"),
            }
        }
        if ran_pass {
            inner.metrics_guard().record_drain_end();
        }

        if report.started > 0 {
            tracing::info!(
                started = report.started,
                succeeded = report.succeeded,
                retried = report.retried,
                failed = report.failed,
                "Drain finished"
            );
        }

        match dispatch_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Claim due actions in creation order and start their executions
    async fn dispatch_pass(
        &self,
        tasks: &mut JoinSet<Outcome>,
        report: &mut DrainReport,
    ) -> Result<()> {
        let inner = &self.inner;
        let now = inner.store.clock().now();
        let due: Vec<PendingAction> = inner
            .store
            .list(Some(ActionStatus::Pending))
            .await?
            .into_iter()
            .filter(|action| action.is_due(now))
            .collect();

        // Each execution waits for its predecessor to start
        let mut previous_started: Option<oneshot::Receiver<()>> = None;

        for candidate in due {
            if !inner.executors.contains(&candidate.kind) {
                tracing::warn!(action_id = %candidate.id, kind = %candidate.kind, "No executor for kind, action left pending");
                report.unregistered += 1;
                continue;
            }
            let Some(action) = inner.store.claim(&candidate.id).await? else {
                continue;
            };
            report.started += 1;
            tracing::debug!(action_id = %action.id, kind = %action.kind, attempts = action.attempts, "Action claimed");

            let (started_tx, started_rx) = oneshot::channel();
            let turn = previous_started.replace(started_rx);
            let task_inner = Arc::clone(inner);
            let permits = Arc::clone(&inner.permits);

            tasks.spawn(async move {
                if let Some(turn) = turn {
                    let _ = turn.await;
                }
                let _permit = permits.acquire_owned().await.ok();

                // Release the successor only once the executor has been entered
                let mut execution = pin!(task_inner.execute_claimed(action));
                let first =
                    std::future::poll_fn(|cx| Poll::Ready(execution.as_mut().poll(cx))).await;
                let _ = started_tx.send(());
                match first {
                    Poll::Ready(outcome) => outcome,
                    Poll::Pending => execution.await,
                }
            });
        }
        Ok(())
    }

    /// Give a failed action a fresh attempt budget and drain in the background
    ///
    /// Returns `false` when the action is currently in flight.
    pub async fn retry(&self, id: &ActionId) -> Result<bool> {
        let requeued = self.requeue(id).await?;
        if requeued {
            self.spawn_drain();
        }
        Ok(requeued)
    }

    /// Reset a failed action to `pending` with a fresh attempt budget, due now,
    /// without starting a drain
    ///
    /// Returns `false` when the action is currently in flight.
    pub async fn requeue(&self, id: &ActionId) -> Result<bool> {
        let patch = ActionPatch::default()
            .status(ActionStatus::Pending)
            .reset_attempts()
            .next_attempt_at(None);
        let updated = self
            .inner
            .store
            .update_where(id, |action| action.status != ActionStatus::InFlight, patch)
            .await?;

        let Some(action) = updated else {
            tracing::debug!(action_id = %id, "Retry ignored, action in flight");
            return Ok(false);
        };
        tracing::info!(action_id = %action.id, kind = %action.kind, "Manual retry requested");
        Ok(true)
    }

    /// Discard an action. Unknown ids are ignored.
    pub async fn dismiss(&self, id: &ActionId) -> Result<()> {
        if self.inner.store.remove(id).await? {
            tracing::info!(action_id = %id, "Action dismissed");
            self.inner.emit(SyncEvent::Dismissed { id: id.clone() });
        }
        Ok(())
    }

    /// Actions not yet failed (pending or in flight)
    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self
            .inner
            .store
            .list(None)
            .await?
            .iter()
            .filter(|action| action.status != ActionStatus::Failed)
            .count())
    }

    /// Actions waiting for the user to retry or dismiss
    pub async fn failed_actions(&self) -> Result<Vec<PendingAction>> {
        self.inner.store.list(Some(ActionStatus::Failed)).await
    }

    /// Run a drain in the background
    pub fn spawn_drain(&self) {
        Inner::spawn_drain(Arc::downgrade(&self.inner), Duration::ZERO);
    }

    fn wire_network(&self) {
        let Some(network) = &self.inner.network else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::runtime::Handle::try_current().ok();

        network.on_change(move |status| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.emit(SyncEvent::ConnectivityChanged { status });
            if !status.is_online() {
                return;
            }

            let coordinator = SyncCoordinator { inner };
            let drain = async move {
                if let Err(e) = coordinator.drain().await {
                    tracing::error!(error = %e, "Reconnect drain failed");
                }
            };
            match tokio::runtime::Handle::try_current().ok().or_else(|| handle.clone()) {
                Some(runtime) => {
                    runtime.spawn(drain);
                }
                None => tracing::warn!("No async runtime, reconnect drain skipped"),
            }
        });
    }
}

impl Inner {
    fn metrics_guard(&self) -> std::sync::MutexGuard<'_, SyncMetrics> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn is_online(&self) -> bool {
        self.network.as_ref().map_or(true, |network| network.is_online())
    }

    fn due_after(&self, delay: Duration) -> chrono::DateTime<chrono::Utc> {
        self.store.clock().now()
            + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX)
    }

    /// Run the executor for `action` under the call timeout
    async fn invoke(&self, action: &PendingAction) -> std::result::Result<(), ExecutorError> {
        let Some(executor) = self.executors.get(&action.kind) else {
            return Err(ExecutorError::permanent(format!(
                "no executor registered for kind '{}'",
                action.kind
            )));
        };

        match tokio::time::timeout(self.timeout, executor.execute(action)).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics_guard().record_timeout();
                Err(ExecutorError::transient(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    async fn execute_claimed(self: Arc<Self>, action: PendingAction) -> Outcome {
        self.metrics_guard().record_execution();
        let result = self.invoke(&action).await;

        let error = match result {
            Ok(()) => {
                match self.store.remove(&action.id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(action_id = %action.id, "Action dismissed while in flight");
                        return Outcome::Discarded;
                    }
                    Err(e) => {
                        tracing::error!(action_id = %action.id, error = %e, "Failed to remove completed action");
                        return Outcome::StorageError;
                    }
                }
                self.metrics_guard().record_success();
                tracing::debug!(action_id = %action.id, kind = %action.kind, "Action succeeded");
                self.emit(SyncEvent::Succeeded {
                    id: action.id,
                    kind: action.kind,
                });
                return Outcome::Succeeded;
            }
            Err(error) => error,
        };

        let mut attempted = action.clone();
        attempted.attempts = attempted.attempts.saturating_add(1);
        let message = error.to_string();

        if self.policy.should_retry_after(&attempted, &error) {
            let delay = self.policy.next_delay(&attempted);
            let patch = ActionPatch::default()
                .status(ActionStatus::Pending)
                .increment_attempts()
                .last_error(Some(message))
                .next_attempt_at(Some(self.due_after(delay)));

            match self.store.update(&action.id, patch).await {
                Ok(updated) => {
                    tracing::warn!(
                        action_id = %updated.id,
                        attempts = updated.attempts,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "Action failed, retry scheduled"
                    );
                    self.metrics_guard().record_retry();
                    self.emit(SyncEvent::RetryScheduled {
                        id: updated.id,
                        attempts: updated.attempts,
                        delay_ms: delay.as_millis() as u64,
                    });
                    self.schedule_retry(delay);
                    Outcome::Retried
                }
                Err(e) => self.settle_error(&action.id, e),
            }
        } else {
            let patch = ActionPatch::default()
                .status(ActionStatus::Failed)
                .increment_attempts()
                .last_error(Some(message.clone()))
                .next_attempt_at(None);

            match self.store.update(&action.id, patch).await {
                Ok(updated) => {
                    tracing::warn!(
                        action_id = %updated.id,
                        attempts = updated.attempts,
                        %error,
                        "Action failed, user attention required"
                    );
                    self.metrics_guard().record_failure();
                    self.emit(SyncEvent::Failed {
                        id: updated.id,
                        kind: updated.kind,
                        attempts: updated.attempts,
                        error: message,
                    });
                    Outcome::Failed
                }
                Err(e) => self.settle_error(&action.id, e),
            }
        }
    }

    fn settle_error(&self, id: &ActionId, error: QueueError) -> Outcome {
        if error.is_not_found() {
            tracing::debug!(action_id = %id, "Action dismissed while in flight");
            Outcome::Discarded
        } else {
            tracing::error!(action_id = %id, %error, "Failed to record execution result");
            Outcome::StorageError
        }
    }

    fn schedule_retry(self: &Arc<Self>, delay: Duration) {
        if self.schedule_retries {
            Self::spawn_drain(Arc::downgrade(self), delay);
        }
    }

    fn spawn_drain(inner: Weak<Inner>, delay: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime, drain not scheduled");
            return;
        };
        runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if let Err(e) = (SyncCoordinator { inner }).drain().await {
                tracing::error!(error = %e, "Scheduled drain failed");
            }
        });
    }
}
