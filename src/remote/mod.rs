//! # Remote Backend
//!
//! Executors that replay queued actions against the Supabase backend.
//!
//! ## Key Components
//!
//! - `supabase.rs`: REST client, status classification, per-kind executors

pub mod supabase;

pub use supabase::{InspectionCreateExecutor, PhotoUploadExecutor, SupabaseClient};

use crate::offline::action::ActionKind;
use crate::shared::config::{ConfigError, SyncConfig};
use crate::sync::ExecutorRegistry;
use std::sync::Arc;

/// Register the Supabase executors for the built-in kinds
///
/// Fails when the Supabase URL or key is not configured.
pub fn register_supabase_executors(
    registry: &mut ExecutorRegistry,
    config: &SyncConfig,
) -> Result<(), ConfigError> {
    let client = SupabaseClient::from_config(config)?;
    registry.register(
        ActionKind::PhotoUpload,
        Arc::new(PhotoUploadExecutor::new(client.clone(), &config.photo_bucket)),
    );
    registry.register(
        ActionKind::InspectionCreate,
        Arc::new(InspectionCreateExecutor::new(client)),
    );
    tracing::debug!(base_url = %config.supabase_url.as_deref().unwrap_or_default(), "Registered Supabase executors");
    Ok(())
}
