//! Webhook intake: recording inbound deliveries and turning the ones that
//! pass the integration's trigger filters into sync events.
//!
//! Generic CRM webhooks are acknowledged immediately and picked up by the
//! webhook workers; voice-platform webhooks go through the same path but
//! are then processed synchronously in the request handler.

use crate::error::Result;
use crate::models::integration::Integration;
use crate::models::sync_event::{SyncEvent, SyncEventType};
use crate::models::webhook_event::WebhookEvent;
use crate::services::sync::SyncService;
use crate::services::trigger::evaluate_filters;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

const WEBHOOK_EVENT_COLUMNS: &str =
    "id, integration_id, provider, event_type, payload, signature, priority, processed, created_at";

#[derive(Clone)]
pub struct IntakeService {
    pool: PgPool,
    sync_service: SyncService,
}

impl IntakeService {
    pub fn new(pool: PgPool, sync_service: SyncService) -> Self {
        Self { pool, sync_service }
    }

    pub async fn load_active_integration(&self, id: Uuid) -> Result<Integration> {
        let row = sqlx::query_as::<_, Integration>(
            r#"
            SELECT id, user_id, name, crm_provider, crm_access_token, webhook_secret,
                   field_mappings, trigger_filters, workflows, crm_config, crm_schema,
                   notify_email, notify_on_success, notify_on_error, is_active,
                   created_at, updated_at
            FROM integrations
            WHERE id = $1 AND is_active = TRUE
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Persist the delivery as received. The row is immutable from here on
    /// apart from its `processed` flag. Deliveries handled synchronously in
    /// the request path are inserted pre-claimed (`processed = TRUE`) so the
    /// webhook workers never pick them up a second time.
    pub async fn record_event(
        &self,
        integration_id: Uuid,
        provider: &str,
        event_type: &str,
        payload: &JsonValue,
        signature: Option<&str>,
        priority: i32,
        processed: bool,
    ) -> Result<WebhookEvent> {
        let row = sqlx::query_as::<_, WebhookEvent>(&format!(
            r#"
            INSERT INTO webhook_events
                (id, integration_id, provider, event_type, payload, signature, priority, processed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            WEBHOOK_EVENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(integration_id)
        .bind(provider)
        .bind(event_type)
        .bind(payload)
        .bind(signature)
        .bind(priority)
        .bind(processed)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Evaluate the integration's trigger filters and, when they pass,
    /// create the sync event that will drive the CRM effect. A filtered-out
    /// delivery is a normal no-op, not an error.
    pub async fn process_webhook_event(&self, event: &WebhookEvent) -> Result<Option<SyncEvent>> {
        let integration = self.load_active_integration(event.integration_id).await?;

        if !evaluate_filters(&event.payload, &integration.trigger_filters()) {
            info!(
                "Webhook {} filtered out by integration {} triggers",
                event.id, integration.id
            );
            return Ok(None);
        }

        let call_id = event
            .payload
            .pointer("/call/call_id")
            .or_else(|| event.payload.pointer("/call_id"))
            .and_then(JsonValue::as_str)
            .map(str::to_string);

        let event_type = if event.provider == "retell" {
            SyncEventType::CallTriggered
        } else {
            SyncEventType::WebhookReceived
        };

        let sync_event = self
            .sync_service
            .create_event(integration.id, event_type, &event.payload, call_id.as_deref())
            .await?;
        Ok(Some(sync_event))
    }

    /// Claim and process one unprocessed delivery, highest priority first.
    /// The claim flips `processed` so each delivery is handled by exactly
    /// one worker.
    pub async fn run_once(&self) -> Result<bool> {
        let claimed = sqlx::query_as::<_, WebhookEvent>(&format!(
            r#"
            UPDATE webhook_events SET processed = TRUE
            WHERE id = (
                SELECT id FROM webhook_events
                WHERE processed = FALSE
                ORDER BY priority DESC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {}
            "#,
            WEBHOOK_EVENT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        let Some(event) = claimed else { return Ok(false) };

        if let Err(err) = self.process_webhook_event(&event).await {
            warn!("Failed to process webhook event {}: {}", event.id, err);
        }
        Ok(true)
    }
}
