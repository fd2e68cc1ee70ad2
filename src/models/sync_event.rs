use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// One retryable unit of work: "this inbound signal must result in a CRM
/// effect." Mutated exclusively by the sync state machine; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncEvent {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub event_type: String,
    pub status: String,
    pub source_payload: JsonValue,
    pub mapped_payload: Option<JsonValue>,
    pub call_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Processing => "processing",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Retrying => "retrying",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(SyncStatus::Pending),
            "processing" => Some(SyncStatus::Processing),
            "completed" => Some(SyncStatus::Completed),
            "failed" => Some(SyncStatus::Failed),
            "retrying" => Some(SyncStatus::Retrying),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventType {
    WebhookReceived,
    CallTriggered,
    SyncCompleted,
    SyncFailed,
}

impl SyncEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEventType::WebhookReceived => "webhook_received",
            SyncEventType::CallTriggered => "call_triggered",
            SyncEventType::SyncCompleted => "sync_completed",
            SyncEventType::SyncFailed => "sync_failed",
        }
    }
}

impl SyncEvent {
    pub fn status(&self) -> Option<SyncStatus> {
        SyncStatus::parse(&self.status)
    }
}
