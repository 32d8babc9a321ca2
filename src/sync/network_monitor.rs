//! # Network Monitor
//!
//! Tracks network reachability and notifies subscribers on transitions.
//!
//! ## Features
//!
//! - **Connectivity Detection**: synchronous online/offline status
//! - **Transition Callbacks**: fired exactly once per genuine change
//! - **Optimistic Default**: unknown connectivity counts as online, so remote
//!   calls are attempted and their own failures detect unreachability
//! - **Probing**: [`HttpProbe`] derives status from a reachability check

use crate::shared::config::ConfigError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Network reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn is_online(self) -> bool {
        self == NetworkStatus::Online
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkStatus::Online => f.write_str("online"),
            NetworkStatus::Offline => f.write_str("offline"),
        }
    }
}

type Callback = Arc<dyn Fn(NetworkStatus) + Send + Sync>;

/// Connectivity observer
pub struct NetworkMonitor {
    status: watch::Sender<NetworkStatus>,
    callbacks: Mutex<Vec<Callback>>,
    /// Held across a status change and its callbacks, so callbacks observe
    /// transitions in the order they were stored
    transition: Mutex<()>,
}

impl fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("status", &self.get_status())
            .finish_non_exhaustive()
    }
}

impl NetworkMonitor {
    /// Monitor starting online
    pub fn new() -> Self {
        Self::with_status(NetworkStatus::Online)
    }

    /// Monitor starting at `initial`
    pub fn with_status(initial: NetworkStatus) -> Self {
        let (status, _) = watch::channel(initial);
        Self {
            status,
            callbacks: Mutex::new(Vec::new()),
            transition: Mutex::new(()),
        }
    }

    /// Last known status
    pub fn get_status(&self) -> NetworkStatus {
        *self.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.get_status().is_online()
    }

    /// Register a transition callback
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(NetworkStatus) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(callback));
    }

    /// Watch channel of the status
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.status.subscribe()
    }

    /// Record an observed status. Returns whether it was a transition.
    ///
    /// Callbacks run on the calling thread and must not call `set_status`.
    pub fn set_status(&self, status: NetworkStatus) -> bool {
        let _transition = self
            .transition
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            tracing::info!(%status, "Connectivity changed");
            let callbacks: Vec<Callback> = self
                .callbacks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();
            for callback in callbacks {
                callback(status);
            }
        }
        changed
    }

    /// Record a platform report; `None` means the platform cannot tell
    pub fn report(&self, observed: Option<NetworkStatus>) -> bool {
        self.set_status(observed.unwrap_or(NetworkStatus::Online))
    }

    /// Probe `source` once and record the result
    pub async fn poll(&self, source: &dyn ConnectivitySource) -> NetworkStatus {
        let observed = source.probe().await;
        self.report(observed);
        self.get_status()
    }

    /// Probe `source` every `period` until the task is aborted
    pub fn spawn_polling(
        self: &Arc<Self>,
        source: Arc<dyn ConnectivitySource>,
        period: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                monitor.poll(source.as_ref()).await;
            }
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform connectivity report
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// Current status, or `None` if it cannot be determined
    async fn probe(&self) -> Option<NetworkStatus>;
}

/// Reachability check against an HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivitySource for HttpProbe {
    async fn probe(&self) -> Option<NetworkStatus> {
        match self.client.head(&self.url).send().await {
            // Any response at all means the network path works
            Ok(_) => Some(NetworkStatus::Online),
            Err(e) if e.is_connect() || e.is_timeout() => {
                tracing::debug!(url = %self.url, error = %e, "Probe unreachable");
                Some(NetworkStatus::Offline)
            }
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Probe inconclusive");
                None
            }
        }
    }
}
