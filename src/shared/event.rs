//! Sync Event System
//!
//! Structured events emitted by the sync coordinator. UI code (badges,
//! toasts, navigation) subscribes to these instead of being called from
//! inside retry logic.

use crate::offline::action::{ActionId, ActionKind};
use crate::sync::network_monitor::NetworkStatus;
use serde::{Deserialize, Serialize};

/// Event describing a change in queue or connectivity state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Action was written to the durable store
    Enqueued {
        /// Action id
        id: ActionId,
        /// Action kind
        kind: ActionKind,
    },
    /// Executor succeeded; the action is gone from the store
    Succeeded {
        /// Action id
        id: ActionId,
        /// Action kind
        kind: ActionKind,
    },
    /// Transient failure, a retry has been scheduled
    RetryScheduled {
        /// Action id
        id: ActionId,
        /// Attempts made so far
        attempts: u32,
        /// Delay before the action becomes eligible again
        delay_ms: u64,
    },
    /// Retries exhausted or permanent failure; the user must retry or dismiss
    Failed {
        /// Action id
        id: ActionId,
        /// Action kind
        kind: ActionKind,
        /// Attempts made so far
        attempts: u32,
        /// Last failure reason
        error: String,
    },
    /// User discarded the action
    Dismissed {
        /// Action id
        id: ActionId,
    },
    /// Connectivity transition observed
    ConnectivityChanged {
        /// New status
        status: NetworkStatus,
    },
}

impl SyncEvent {
    /// Id of the action this event concerns, if any
    pub fn action_id(&self) -> Option<&ActionId> {
        match self {
            SyncEvent::Enqueued { id, .. }
            | SyncEvent::Succeeded { id, .. }
            | SyncEvent::RetryScheduled { id, .. }
            | SyncEvent::Failed { id, .. }
            | SyncEvent::Dismissed { id } => Some(id),
            SyncEvent::ConnectivityChanged { .. } => None,
        }
    }

    /// Whether the UI should interrupt the user for this event
    pub fn needs_attention(&self) -> bool {
        matches!(self, SyncEvent::Failed { .. })
    }
}
