//! # Pending Actions
//!
//! The record type persisted by the durable store, plus the typed payloads
//! of the two built-in action kinds.
//!
//! ## Lifecycle
//!
//! ```text
//! pending -> in_flight -> done (removed)
//!                      -> pending (retry scheduled)
//!                      -> failed (until the user retries or dismisses)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Locally generated action identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ActionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ActionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Tag identifying how an action is replayed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ActionKind {
    /// Upload a captured inspection photo or video
    PhotoUpload,
    /// Insert a new inspection row
    InspectionCreate,
    /// Application-defined kind
    Custom(String),
}

impl ActionKind {
    /// Wire tag
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::PhotoUpload => "photo_upload",
            ActionKind::InspectionCreate => "inspection_create",
            ActionKind::Custom(tag) => tag,
        }
    }
}

impl From<String> for ActionKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "photo_upload" => ActionKind::PhotoUpload,
            "inspection_create" => ActionKind::InspectionCreate,
            _ => ActionKind::Custom(tag),
        }
    }
}

impl From<&str> for ActionKind {
    fn from(tag: &str) -> Self {
        ActionKind::from(tag.to_string())
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of a pending action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Waiting to be executed
    Pending,
    /// Currently being executed
    InFlight,
    /// Terminal until the user acts
    Failed,
    /// Succeeded; never retained in the store
    Done,
}

impl ActionStatus {
    /// Wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::InFlight => "in_flight",
            ActionStatus::Failed => "failed",
            ActionStatus::Done => "done",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "in_flight" => Ok(ActionStatus::InFlight),
            "failed" => Ok(ActionStatus::Failed),
            "done" => Ok(ActionStatus::Done),
            other => Err(format!("unknown action status '{}'", other)),
        }
    }
}

/// Persisted queue record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: ActionId,
    pub kind: ActionKind,
    /// Kind-specific data needed to replay the action
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Enqueue order, breaks `created_at` ties
    pub seq: u64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: ActionStatus,
    /// Not eligible for a drain before this time
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl PendingAction {
    /// Fresh `pending` record with zero attempts
    pub fn new(kind: ActionKind, payload: serde_json::Value, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ActionId::new(),
            kind,
            payload,
            created_at,
            seq: 0,
            attempts: 0,
            last_error: None,
            status: ActionStatus::Pending,
            next_attempt_at: None,
        }
    }

    /// Whether a drain at `now` may pick this action up
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ActionStatus::Pending
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Decode the payload into a typed struct
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Change to the attempt counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptsChange {
    /// One more attempt was made
    Increment,
    /// Explicit user-initiated reset
    Reset,
}

/// Partial update applied by `ActionStore::update`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionPatch {
    pub status: Option<ActionStatus>,
    pub attempts: Option<AttemptsChange>,
    pub last_error: Option<Option<String>>,
    pub next_attempt_at: Option<Option<DateTime<Utc>>>,
}

impl ActionPatch {
    pub fn status(mut self, status: ActionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn increment_attempts(mut self) -> Self {
        self.attempts = Some(AttemptsChange::Increment);
        self
    }

    pub fn reset_attempts(mut self) -> Self {
        self.attempts = Some(AttemptsChange::Reset);
        self
    }

    pub fn last_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }

    pub fn next_attempt_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.next_attempt_at = Some(at);
        self
    }

    /// Apply the patch to a record in place
    pub fn apply(&self, action: &mut PendingAction) {
        if let Some(status) = self.status {
            action.status = status;
        }
        match self.attempts {
            Some(AttemptsChange::Increment) => action.attempts = action.attempts.saturating_add(1),
            Some(AttemptsChange::Reset) => action.attempts = 0,
            None => {}
        }
        if let Some(error) = &self.last_error {
            action.last_error = error.clone();
        }
        if let Some(at) = self.next_attempt_at {
            action.next_attempt_at = at;
        }
    }
}

/// Payload of a `photo_upload` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoUploadPayload {
    pub inspection_id: String,
    pub checklist_item_id: String,
    /// Local file holding the captured media
    pub file_path: String,
    pub content_type: String,
}

impl PhotoUploadPayload {
    /// Object path inside the storage bucket
    pub fn object_path(&self) -> String {
        let file_name = std::path::Path::new(&self.file_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        format!(
            "{}/{}/{}",
            self.inspection_id, self.checklist_item_id, file_name
        )
    }
}

/// Payload of an `inspection_create` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionCreatePayload {
    pub property_id: String,
    pub inspector_id: String,
    #[serde(default = "default_inspection_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

fn default_inspection_status() -> String {
    "draft".to_string()
}
