//! Scripted executors for coordinator tests
//!
//! A [`ScriptedExecutor`] replays a fixed sequence of results, then falls
//! back to a default. It records the order of calls and detects overlapping
//! executions of the same action.

use async_trait::async_trait;
use doublecheck_sync::offline::action::{ActionId, PendingAction};
use doublecheck_sync::shared::error::ExecutorError;
use doublecheck_sync::sync::ActionExecutor;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    script: VecDeque<Result<(), ExecutorError>>,
    calls: Vec<ActionId>,
    running: HashSet<ActionId>,
}

/// Executor with scripted outcomes
#[derive(Debug, Clone)]
pub struct ScriptedExecutor {
    state: Arc<Mutex<State>>,
    fallback: Arc<Mutex<Result<(), ExecutorError>>>,
    overlapped: Arc<AtomicBool>,
    delay: Duration,
}

impl ScriptedExecutor {
    /// Always succeeds
    pub fn succeeding() -> Self {
        Self::with_fallback(Ok(()))
    }

    /// Always fails transiently
    pub fn transient(message: &str) -> Self {
        Self::with_fallback(Err(ExecutorError::transient(message)))
    }

    /// Always fails permanently
    pub fn permanent(message: &str) -> Self {
        Self::with_fallback(Err(ExecutorError::permanent(message)))
    }

    fn with_fallback(fallback: Result<(), ExecutorError>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            fallback: Arc::new(Mutex::new(fallback)),
            overlapped: Arc::new(AtomicBool::new(false)),
            delay: Duration::ZERO,
        }
    }

    /// Results returned before the fallback applies
    pub fn then(self, results: impl IntoIterator<Item = Result<(), ExecutorError>>) -> Self {
        self.state.lock().unwrap().script.extend(results);
        self
    }

    /// Hold every call for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Change the fallback outcome, e.g. when the backend recovers
    pub fn set_fallback(&self, result: Result<(), ExecutorError>) {
        *self.fallback.lock().unwrap() = result;
    }

    /// Action ids in call order
    pub fn calls(&self) -> Vec<ActionId> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Whether two calls for one action ever overlapped
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn execute(&self, action: &PendingAction) -> Result<(), ExecutorError> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(action.id.clone());
            if !state.running.insert(action.id.clone()) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            state
                .script
                .pop_front()
                .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.state.lock().unwrap().running.remove(&action.id);
        result
    }
}
