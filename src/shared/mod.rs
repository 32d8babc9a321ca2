//! Shared Module
//!
//! Types used across the queue, the coordinator and the binary: errors,
//! events, configuration and the clock abstraction.

/// Queue lifecycle events
pub mod event;

/// Shared error types
pub mod error;

/// Sync configuration
pub mod config;

/// Wall-clock abstraction
pub mod clock;

/// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig, SyncConfigBuilder};
pub use error::{ExecutorError, QueueError, Result};
pub use event::SyncEvent;
