//! # Remote Operation Executors
//!
//! One executor per action kind performs the real network or database call.
//! The coordinator treats executors as opaque strategies: it knows nothing
//! about HTTP or the backend, only whether a call succeeded, failed
//! transiently, or failed permanently.

use crate::offline::action::{ActionKind, PendingAction};
use crate::shared::error::ExecutorError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Performs the remote operation behind an action kind
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Replay `action` against the remote system
    async fn execute(&self, action: &PendingAction) -> Result<(), ExecutorError>;
}

/// Executor backed by an async closure
pub struct FnExecutor<F> {
    f: F,
}

/// Wrap an async closure as an executor
pub fn executor_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(PendingAction) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ExecutorError>> + Send,
{
    FnExecutor { f }
}

#[async_trait]
impl<F, Fut> ActionExecutor for FnExecutor<F>
where
    F: Fn(PendingAction) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ExecutorError>> + Send,
{
    async fn execute(&self, action: &PendingAction) -> Result<(), ExecutorError> {
        (self.f)(action.clone()).await
    }
}

/// Executors keyed by action kind
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ActionKind, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `kind`, replacing any previous one
    pub fn register(&mut self, kind: ActionKind, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(kind, executor);
    }

    pub fn get(&self, kind: &ActionKind) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(kind).cloned()
    }

    pub fn contains(&self, kind: &ActionKind) -> bool {
        self.executors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &ActionKind> {
        self.executors.keys()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.executors.keys()).finish()
    }
}
