//! DoubleCheck Sync - Offline Action Queue
//!
//! Client-side durable queue for the DoubleCheck property-inspection app.
//! Inspectors capture photos and create inspections with poor or absent
//! connectivity; every such action is tried immediately, persisted when that
//! fails, and replayed once the device is back online.
//!
//! # Module Structure
//!
//! - **`shared`** - errors, events, configuration, clock
//! - **`offline`** - the persisted action record, the durable store, the
//!   retry policy, and the [`OfflineQueue`](offline::OfflineQueue) facade
//! - **`sync`** - the sync coordinator, executors, network monitor,
//!   drain scheduler and metrics
//! - **`local_db`** - SQLite persistence backend
//! - **`remote`** - Supabase executors for the built-in action kinds
//!
//! # Usage
//!
//! ```rust,no_run
//! use doublecheck_sync::local_db::SqliteBackend;
//! use doublecheck_sync::offline::{ActionKind, ActionStore, OfflineQueue};
//! use doublecheck_sync::remote::register_supabase_executors;
//! use doublecheck_sync::shared::{SyncConfig, SystemClock};
//! use doublecheck_sync::sync::ExecutorRegistry;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::load(None)?;
//! let backend = SqliteBackend::open(config.database_path()).await?;
//! let store = Arc::new(ActionStore::open(Arc::new(backend), Arc::new(SystemClock)).await?);
//!
//! let mut executors = ExecutorRegistry::new();
//! register_supabase_executors(&mut executors, &config)?;
//!
//! let queue = OfflineQueue::new(store, executors, config);
//! queue.start(None).await?;
//! queue
//!     .enqueue_or_execute(
//!         ActionKind::InspectionCreate,
//!         serde_json::json!({"property_id": "p1", "inspector_id": "u1"}),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! - The store serializes every mutation behind one async mutex
//! - The coordinator is `Clone` and shares its state through `Arc`
//! - Events are delivered over a `tokio::sync::broadcast` channel

/// Shared types and data structures
pub mod shared;

/// Durable offline action queue
pub mod offline;

/// Sync coordinator and connectivity
pub mod sync;

/// SQLite persistence
pub mod local_db;

/// Supabase executors
pub mod remote;
