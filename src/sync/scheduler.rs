//! # Drain Scheduler
//!
//! Periodic drain timer. Reconnect events already trigger a drain; the timer
//! covers retries whose backoff elapsed while no in-process timer was armed,
//! such as after a restart.
//!
//! ## Features
//!
//! - **Interval Drains**: one drain per tick while online
//! - **Offline Awareness**: ticks are skipped while the monitor reports offline
//! - **Start/Stop**: the background task is aborted on stop

use super::SyncCoordinator;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Periodic drain scheduler
#[derive(Debug)]
pub struct DrainScheduler {
    coordinator: SyncCoordinator,
    interval: Duration,
    last_drain: std::sync::Arc<RwLock<Option<Instant>>>,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl DrainScheduler {
    pub fn new(coordinator: SyncCoordinator, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
            last_drain: std::sync::Arc::new(RwLock::new(None)),
            task: RwLock::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the timer. Starting an active scheduler does nothing.
    pub async fn start(&self) {
        let mut task = self.task.write().await;
        if task.is_some() {
            return;
        }

        let coordinator = self.coordinator.clone();
        let last_drain = std::sync::Arc::clone(&self.last_drain);
        let period = self.interval;

        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if coordinator.network().is_some_and(|network| !network.is_online()) {
                    continue;
                }
                match coordinator.drain().await {
                    Ok(report) => {
                        if report.started > 0 {
                            tracing::debug!(started = report.started, "Scheduled drain");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Scheduled drain failed"),
                }
                *last_drain.write().await = Some(Instant::now());
            }
        }));
        tracing::info!(interval_secs = period.as_secs(), "Drain scheduler started");
    }

    /// Stop the timer
    pub async fn stop(&self) {
        if let Some(task) = self.task.write().await.take() {
            task.abort();
            tracing::info!("Drain scheduler stopped");
        }
    }

    pub async fn is_active(&self) -> bool {
        self.task.read().await.is_some()
    }

    /// When the last scheduled drain finished
    pub async fn last_drain(&self) -> Option<Instant> {
        *self.last_drain.read().await
    }

    /// Get time until next drain
    pub async fn time_until_next_drain(&self) -> Option<Duration> {
        if !self.is_active().await {
            return None;
        }
        let Some(last) = *self.last_drain.read().await else {
            return Some(Duration::ZERO);
        };
        Some(self.interval.saturating_sub(last.elapsed()))
    }
}

impl Drop for DrainScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
