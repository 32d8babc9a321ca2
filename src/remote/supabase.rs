//! Supabase REST client and the executors for the built-in action kinds.
//!
//! - `photo_upload`: `POST /storage/v1/object/{bucket}/{object_path}` with the
//!   file body and `x-upsert: true`, so a replay after a lost response is harmless
//! - `inspection_create`: `POST /rest/v1/inspections` with the row as JSON,
//!   keyed by the action id. A replay whose first insert already committed
//!   hits the primary key and is treated as done.
//!
//! Status classification: 408, 429 and 5xx are transient, every other non-2xx
//! is permanent. Connection failures and timeouts are transient.

use crate::offline::action::{InspectionCreatePayload, PendingAction, PhotoUploadPayload};
use crate::shared::config::{ConfigError, SyncConfig};
use crate::shared::error::ExecutorError;
use crate::sync::ActionExecutor;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Table receiving queued inspections
pub const INSPECTIONS_TABLE: &str = "inspections";

/// Authenticated Supabase HTTP client
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Client for the project in `config`
    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        let url = config
            .supabase_url
            .as_deref()
            .ok_or(ConfigError::MissingValue("supabase_url"))?;
        let key = config
            .supabase_key
            .as_deref()
            .ok_or(ConfigError::MissingValue("supabase_key"))?;
        Self::new(url, key, config.executor_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Upload an object into a storage bucket, replacing any existing one
    pub async fn upload_object(
        &self,
        bucket: &str,
        object_path: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<(), ExecutorError> {
        let response = self
            .post(&format!("/storage/v1/object/{}/{}", bucket, object_path))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(body)
            .send()
            .await
            .map_err(classify_transport)?;
        check_status(response).await
    }

    /// Insert one row through PostgREST
    ///
    /// A row whose primary key already exists counts as inserted, so replaying
    /// an insert whose response was lost succeeds.
    pub async fn insert_row<T: serde::Serialize + ?Sized>(
        &self,
        table: &str,
        row: &T,
    ) -> Result<(), ExecutorError> {
        let response = self
            .post(&format!("/rest/v1/{}", table))
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(row)
            .send()
            .await
            .map_err(classify_transport)?;

        if response.status() == StatusCode::CONFLICT {
            let body = response.text().await.unwrap_or_default();
            if is_duplicate_key(&body) {
                tracing::debug!(table, "Row already exists, insert treated as applied");
                return Ok(());
            }
            return Err(status_error(StatusCode::CONFLICT, &body));
        }
        check_status(response).await
    }
}

/// Whether a failed response status may succeed on retry
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Whether a PostgREST conflict body reports a unique violation (SQLSTATE 23505)
fn is_duplicate_key(body: &str) -> bool {
    body.contains("23505") || body.contains("duplicate key")
}

async fn check_status(response: Response) -> Result<(), ExecutorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> ExecutorError {
    let message = if body.trim().is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), body.trim())
    };

    if is_transient_status(status) {
        ExecutorError::Transient(message)
    } else {
        ExecutorError::Permanent(message)
    }
}

fn classify_transport(err: reqwest::Error) -> ExecutorError {
    if err.is_builder() {
        ExecutorError::permanent(format!("invalid request: {}", err))
    } else {
        ExecutorError::transient(format!("network error: {}", err))
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    action: &PendingAction,
) -> Result<T, ExecutorError> {
    action
        .payload_as()
        .map_err(|e| ExecutorError::permanent(format!("invalid {} payload: {}", action.kind, e)))
}

/// Uploads captured inspection media
#[derive(Debug, Clone)]
pub struct PhotoUploadExecutor {
    client: SupabaseClient,
    bucket: String,
}

impl PhotoUploadExecutor {
    pub fn new(client: SupabaseClient, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ActionExecutor for PhotoUploadExecutor {
    async fn execute(&self, action: &PendingAction) -> Result<(), ExecutorError> {
        let payload: PhotoUploadPayload = decode_payload(action)?;

        // A missing capture cannot appear later
        let body = tokio::fs::read(&payload.file_path).await.map_err(|e| {
            ExecutorError::permanent(format!("cannot read {}: {}", payload.file_path, e))
        })?;

        let object_path = payload.object_path();
        tracing::debug!(
            action_id = %action.id,
            bucket = %self.bucket,
            object_path = %object_path,
            bytes = body.len(),
            "Uploading photo"
        );
        self.client
            .upload_object(&self.bucket, &object_path, &payload.content_type, body)
            .await
    }
}

/// Inserts inspections created offline
#[derive(Debug, Clone)]
pub struct InspectionCreateExecutor {
    client: SupabaseClient,
}

impl InspectionCreateExecutor {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionExecutor for InspectionCreateExecutor {
    async fn execute(&self, action: &PendingAction) -> Result<(), ExecutorError> {
        let payload: InspectionCreatePayload = decode_payload(action)?;
        let row = serde_json::json!({
            // Reusing the action id keeps a replayed insert from duplicating the row
            "id": action.id.as_str(),
            "property_id": payload.property_id,
            "inspector_id": payload.inspector_id,
            "status": payload.status,
            "notes": payload.notes,
        });

        tracing::debug!(action_id = %action.id, property_id = %row["property_id"], "Creating inspection");
        self.client.insert_row(INSPECTIONS_TABLE, &row).await
    }
}
