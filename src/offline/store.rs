//! # Durable Action Store
//!
//! Persists [`PendingAction`] records across restarts. Callers never touch
//! the persistence medium directly: every mutation goes through
//! [`ActionStore`], which serializes writers behind one async mutex so that
//! read-modify-write sequences (`update`, `claim`) are atomic even when the
//! backend only guarantees atomic single-record writes.
//!
//! ## Backends
//!
//! - [`MemoryBackend`]: process-local map, used by tests and ephemeral queues
//! - `SqliteBackend` (in `local_db`): on-disk queue surviving restarts
//!
//! ## Usage
//!
//! ```rust,no_run
//! use doublecheck_sync::offline::store::ActionStore;
//! use doublecheck_sync::offline::action::ActionKind;
//!
//! # async fn example() -> doublecheck_sync::shared::error::Result<()> {
//! let store = ActionStore::in_memory().await?;
//! let id = store.enqueue(ActionKind::PhotoUpload, serde_json::json!({"file": "a.jpg"})).await?;
//! assert_eq!(store.list(None).await?.len(), 1);
//! store.remove(&id).await?;
//! # Ok(())
//! # }
//! ```

use crate::offline::action::{ActionId, ActionKind, ActionPatch, ActionStatus, PendingAction};
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::error::{QueueError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Storage medium offering atomic single-record operations keyed by id
#[async_trait]
pub trait PersistenceBackend: Send + Sync + fmt::Debug {
    /// Every stored record, in any order
    async fn load_all(&self) -> Result<Vec<PendingAction>>;

    /// One record by id
    async fn get(&self, id: &ActionId) -> Result<Option<PendingAction>>;

    /// Insert or replace a record
    async fn put(&self, action: &PendingAction) -> Result<()>;

    /// Delete a record, returning whether it existed
    async fn delete(&self, id: &ActionId) -> Result<bool>;

    /// Set the status to `to` only if it is currently `from`.
    ///
    /// Returns whether this call made the change. Backends shared between
    /// processes must make the check and the write one atomic step.
    async fn compare_and_set_status(
        &self,
        id: &ActionId,
        from: ActionStatus,
        to: ActionStatus,
    ) -> Result<bool> {
        let Some(mut action) = self.get(id).await? else {
            return Ok(false);
        };
        if action.status != from {
            return Ok(false);
        }
        action.status = to;
        self.put(&action).await?;
        Ok(true)
    }
}

/// In-memory persistence backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<ActionId, PendingAction>>,
    /// Simulated quota, in records
    capacity: Option<usize>,
}

impl MemoryBackend {
    /// Create an unbounded backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that rejects inserts beyond `capacity` records
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn load_all(&self) -> Result<Vec<PendingAction>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &ActionId) -> Result<Option<PendingAction>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn put(&self, action: &PendingAction) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(capacity) = self.capacity {
            if !records.contains_key(&action.id) && records.len() >= capacity {
                return Err(QueueError::storage(format!(
                    "quota exceeded ({} records)",
                    capacity
                )));
            }
        }
        records.insert(action.id.clone(), action.clone());
        Ok(())
    }

    async fn delete(&self, id: &ActionId) -> Result<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn compare_and_set_status(
        &self,
        id: &ActionId,
        from: ActionStatus,
        to: ActionStatus,
    ) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(action) if action.status == from => {
                action.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Durable queue of pending actions
#[derive(Debug)]
pub struct ActionStore {
    backend: Arc<dyn PersistenceBackend>,
    clock: Arc<dyn Clock>,
    /// Writer lock; holds the next enqueue sequence number
    writer: Mutex<u64>,
}

impl ActionStore {
    /// Open a store over `backend`.
    ///
    /// Records are left as found. `in_flight` rows may belong to another
    /// process that is still executing them; only the owner that drains the
    /// queue calls [`ActionStore::recover_interrupted`].
    pub async fn open(backend: Arc<dyn PersistenceBackend>, clock: Arc<dyn Clock>) -> Result<Self> {
        let existing = backend.load_all().await?;
        let next_seq = existing.iter().map(|a| a.seq + 1).max().unwrap_or(0);
        tracing::info!(records = existing.len(), "Opened action store");

        Ok(Self {
            backend,
            clock,
            writer: Mutex::new(next_seq),
        })
    }

    /// Open an empty in-memory store on the system clock
    pub async fn in_memory() -> Result<Self> {
        Self::open(Arc::new(MemoryBackend::new()), Arc::new(SystemClock)).await
    }

    /// Clock used for timestamps and eligibility
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Persist a new `pending` action and return its id
    pub async fn enqueue(&self, kind: ActionKind, payload: serde_json::Value) -> Result<ActionId> {
        let action = PendingAction::new(kind, payload, self.clock.now());
        let stored = self.insert(action).await?;
        Ok(stored.id)
    }

    /// Persist a prepared record, assigning its sequence number
    pub async fn insert(&self, mut action: PendingAction) -> Result<PendingAction> {
        let mut next_seq = self.writer.lock().await;
        action.seq = *next_seq;

        if let Err(e) = self.backend.put(&action).await {
            tracing::error!(action_id = %action.id, kind = %action.kind, error = %e, "Failed to persist action");
            return Err(e);
        }

        *next_seq += 1;
        tracing::debug!(action_id = %action.id, kind = %action.kind, seq = action.seq, "Action persisted");
        Ok(action)
    }

    /// Actions matching `filter`, oldest first
    pub async fn list(&self, filter: Option<ActionStatus>) -> Result<Vec<PendingAction>> {
        let mut actions: Vec<PendingAction> = self
            .backend
            .load_all()
            .await?
            .into_iter()
            .filter(|a| filter.map_or(true, |status| a.status == status))
            .collect();
        actions.sort_by(|a, b| a.seq.cmp(&b.seq).then(a.created_at.cmp(&b.created_at)));
        Ok(actions)
    }

    /// One action by id
    pub async fn get(&self, id: &ActionId) -> Result<Option<PendingAction>> {
        self.backend.get(id).await
    }

    /// Count actions with `status`
    pub async fn count(&self, status: ActionStatus) -> Result<usize> {
        Ok(self.list(Some(status)).await?.len())
    }

    /// Apply a partial update. A `Done` status removes the record.
    pub async fn update(&self, id: &ActionId, patch: ActionPatch) -> Result<PendingAction> {
        let _writer = self.writer.lock().await;

        let mut action = self
            .backend
            .get(id)
            .await?
            .ok_or_else(|| QueueError::not_found(id))?;
        patch.apply(&mut action);

        if action.status == ActionStatus::Done {
            self.backend.delete(id).await?;
        } else {
            self.backend.put(&action).await?;
        }
        Ok(action)
    }

    /// Apply `patch` only if `condition` holds for the current record.
    ///
    /// Returns `Ok(None)` when the condition is false; `NotFound` when the
    /// record is missing.
    pub async fn update_where<P>(
        &self,
        id: &ActionId,
        condition: P,
        patch: ActionPatch,
    ) -> Result<Option<PendingAction>>
    where
        P: FnOnce(&PendingAction) -> bool + Send,
    {
        let _writer = self.writer.lock().await;

        let mut action = self
            .backend
            .get(id)
            .await?
            .ok_or_else(|| QueueError::not_found(id))?;
        if !condition(&action) {
            return Ok(None);
        }
        patch.apply(&mut action);
        self.backend.put(&action).await?;
        Ok(Some(action))
    }

    /// Delete an action. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: &ActionId) -> Result<bool> {
        let _writer = self.writer.lock().await;
        self.backend.delete(id).await
    }

    /// Compare-and-set `pending -> in_flight` for a due action.
    ///
    /// Returns `None` when the action is missing, already claimed, failed, or
    /// not yet due.
    pub async fn claim(&self, id: &ActionId) -> Result<Option<PendingAction>> {
        let _writer = self.writer.lock().await;

        let Some(mut action) = self.backend.get(id).await? else {
            return Ok(None);
        };
        if !action.is_due(self.clock.now()) {
            return Ok(None);
        }

        // Another process may have claimed it since the read
        let won = self
            .backend
            .compare_and_set_status(id, ActionStatus::Pending, ActionStatus::InFlight)
            .await?;
        if !won {
            return Ok(None);
        }
        action.status = ActionStatus::InFlight;
        Ok(Some(action))
    }

    /// Return records left `in_flight` by a crash to `pending`
    ///
    /// Only safe while no other process is draining the same backend.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let _writer = self.writer.lock().await;

        let mut recovered = 0;
        for mut action in self.backend.load_all().await? {
            if action.status == ActionStatus::InFlight {
                action.status = ActionStatus::Pending;
                self.backend.put(&action).await?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::warn!(recovered, "Recovered interrupted actions");
        }
        Ok(recovered)
    }
}
