use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// Immutable record of one inbound delivery. Only the `processed` flag is
/// ever mutated; rows are retained for audit and never deleted here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub provider: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub signature: Option<String>,
    pub priority: i32,
    pub processed: bool,
    pub created_at: Option<DateTime<Utc>>,
}
