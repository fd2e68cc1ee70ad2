//! Sync event state machine.
//!
//! Owns the lifecycle of one inbound event from receipt through terminal
//! completion or failure: `pending -> processing -> {completed | failed |
//! retrying}`, with `retrying` re-entering `processing` on the next due
//! claim. Transitions are computed by pure functions and persisted with
//! two atomic writes per attempt (the claim into `processing`, then the
//! terminal update), so the event row itself is the unit of isolation.

use crate::error::{Error, Result};
use crate::models::crm_schema::CrmSchema;
use crate::models::integration::Integration;
use crate::models::sync_event::{SyncEvent, SyncEventType, SyncStatus};
use crate::services::crm::CrmClient;
use crate::services::mapping;
use crate::services::notification::{Notification, NotificationTemplate, Notifier};
use crate::services::workflow::{WorkflowEngine, WorkflowRunResult};
use crate::utils::json_path::value_to_string;
use crate::utils::time;
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_RETRIES: i32 = 3;
const BASE_RETRY_DELAY_MS: u64 = 1_000;
const MAX_RETRY_DELAY_MS: u64 = 300_000;

const SYNC_EVENT_COLUMNS: &str = "id, integration_id, event_type, status, source_payload, \
     mapped_payload, call_id, error_message, retry_count, max_retries, next_attempt_at, \
     processed_at, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Retry { delay_ms: u64 },
    Terminal,
}

/// Backoff for the attempt numbered `retry_count`, doubling from one
/// second and capped at five minutes.
pub fn retry_delay_ms(retry_count: i32) -> u64 {
    let exponent = retry_count.clamp(0, 20) as u32;
    BASE_RETRY_DELAY_MS
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(MAX_RETRY_DELAY_MS)
}

pub fn begin_attempt(event: &mut SyncEvent) {
    event.status = SyncStatus::Processing.as_str().to_string();
}

pub fn record_success(event: &mut SyncEvent, output: JsonValue) {
    event.status = SyncStatus::Completed.as_str().to_string();
    event.mapped_payload = Some(output);
    event.error_message = None;
    event.processed_at = Some(time::now());
}

/// Record a failed attempt and decide what happens next. Retryable errors
/// re-schedule with capped exponential backoff until the retry budget is
/// spent; non-retryable ones go terminal at once since they would fail
/// identically on every attempt.
pub fn record_failure(event: &mut SyncEvent, error: &str, retryable: bool) -> FailureDisposition {
    event.retry_count += 1;
    event.error_message = Some(error.to_string());
    if retryable && event.retry_count <= event.max_retries {
        event.status = SyncStatus::Retrying.as_str().to_string();
        FailureDisposition::Retry {
            delay_ms: retry_delay_ms(event.retry_count),
        }
    } else {
        event.status = SyncStatus::Failed.as_str().to_string();
        FailureDisposition::Terminal
    }
}

/// Manual re-queue of a terminally failed event: the retry budget and
/// error are reset and the event re-enters `pending`.
pub fn reset_for_requeue(event: &mut SyncEvent) {
    event.status = SyncStatus::Pending.as_str().to_string();
    event.retry_count = 0;
    event.error_message = None;
    event.next_attempt_at = None;
    event.processed_at = None;
}

#[derive(Clone)]
pub struct SyncService {
    pool: PgPool,
    crm: Arc<dyn CrmClient>,
    notifier: Arc<dyn Notifier>,
}

impl SyncService {
    pub fn new(pool: PgPool, crm: Arc<dyn CrmClient>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pool,
            crm,
            notifier,
        }
    }

    pub async fn create_event(
        &self,
        integration_id: Uuid,
        event_type: SyncEventType,
        payload: &JsonValue,
        call_id: Option<&str>,
    ) -> Result<SyncEvent> {
        let row = sqlx::query_as::<_, SyncEvent>(&format!(
            r#"
            INSERT INTO sync_events
                (id, integration_id, event_type, status, source_payload, call_id,
                 retry_count, max_retries)
            VALUES ($1, $2, $3, 'pending', $4, $5, 0, $6)
            RETURNING {}
            "#,
            SYNC_EVENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(integration_id)
        .bind(event_type.as_str())
        .bind(payload)
        .bind(call_id)
        .bind(DEFAULT_MAX_RETRIES)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_event(&self, id: Uuid) -> Result<SyncEvent> {
        let row = sqlx::query_as::<_, SyncEvent>(&format!(
            "SELECT {} FROM sync_events WHERE id = $1",
            SYNC_EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Claim and process the next due event. Returns whether any work was
    /// found. The claim flips the row to `processing` under
    /// `FOR UPDATE SKIP LOCKED`, so no two workers ever hold the same id.
    pub async fn run_once(&self) -> Result<bool> {
        let claimed = sqlx::query_as::<_, SyncEvent>(&format!(
            r#"
            UPDATE sync_events SET status = 'processing', updated_at = NOW()
            WHERE id = (
                SELECT id FROM sync_events
                WHERE status IN ('pending', 'retrying')
                  AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {}
            "#,
            SYNC_EVENT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        let Some(event) = claimed else { return Ok(false) };
        self.attempt(event).await?;
        Ok(true)
    }

    /// Synchronous processing path for latency-sensitive webhooks: claim a
    /// specific event in the request path. A no-op when the event is
    /// already claimed or terminal.
    pub async fn process_now(&self, id: Uuid) -> Result<()> {
        let claimed = sqlx::query_as::<_, SyncEvent>(&format!(
            r#"
            UPDATE sync_events SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'retrying')
            RETURNING {}
            "#,
            SYNC_EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(event) = claimed {
            self.attempt(event).await?;
        }
        Ok(())
    }

    /// Manual retry of a terminally failed event.
    pub async fn retry_event(&self, id: Uuid) -> Result<SyncEvent> {
        let mut event = self.get_event(id).await?;
        if event.status() != Some(SyncStatus::Failed) {
            return Err(Error::BadRequest(format!(
                "Sync event {} is not in a failed state",
                id
            )));
        }
        reset_for_requeue(&mut event);
        let row = sqlx::query_as::<_, SyncEvent>(&format!(
            r#"
            UPDATE sync_events
            SET status = 'pending', retry_count = 0, error_message = NULL,
                next_attempt_at = NULL, processed_at = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SYNC_EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn attempt(&self, mut event: SyncEvent) -> Result<()> {
        let outcome = self.process_event(&event).await;
        match outcome {
            Ok(output) => {
                record_success(&mut event, output);
                sqlx::query(
                    r#"
                    UPDATE sync_events
                    SET status = 'completed', mapped_payload = $1, error_message = NULL,
                        processed_at = NOW(), updated_at = NOW()
                    WHERE id = $2
                    "#,
                )
                .bind(&event.mapped_payload)
                .bind(event.id)
                .execute(&self.pool)
                .await?;
                info!("Sync event {} completed", event.id);
                self.notify_outcome(&event, None).await;
            }
            Err(err) => {
                let message = err.to_string();
                warn!("Sync event {} attempt failed: {}", event.id, message);
                let disposition = record_failure(&mut event, &message, err.is_retryable());
                match disposition {
                    FailureDisposition::Retry { delay_ms } => {
                        sqlx::query(
                            r#"
                            UPDATE sync_events
                            SET status = 'retrying', retry_count = $1, error_message = $2,
                                next_attempt_at = NOW() + make_interval(secs => $3),
                                updated_at = NOW()
                            WHERE id = $4
                            "#,
                        )
                        .bind(event.retry_count)
                        .bind(&event.error_message)
                        .bind(delay_ms as f64 / 1000.0)
                        .bind(event.id)
                        .execute(&self.pool)
                        .await?;
                    }
                    FailureDisposition::Terminal => {
                        sqlx::query(
                            r#"
                            UPDATE sync_events
                            SET status = 'failed', retry_count = $1, error_message = $2,
                                next_attempt_at = NULL, updated_at = NOW()
                            WHERE id = $3
                            "#,
                        )
                        .bind(event.retry_count)
                        .bind(&event.error_message)
                        .bind(event.id)
                        .execute(&self.pool)
                        .await?;
                        self.notify_outcome(&event, Some(message)).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// One processing attempt: map the source payload, drive the mapped
    /// CRM writes, then run the integration's workflows. Any step error
    /// propagates so the retry machinery can take over.
    async fn process_event(&self, event: &SyncEvent) -> Result<JsonValue> {
        let integration = self.load_integration(event.integration_id).await?;
        let schema = CrmSchema::from_value(&integration.crm_schema);
        let payload = &event.source_payload;

        let mapped = mapping::transform(payload, &integration.field_mappings(), &schema)?;
        let records = self.execute_mapped(&integration, &mapped, payload).await?;

        let trigger_event = payload
            .get("event")
            .and_then(JsonValue::as_str)
            .unwrap_or(&event.event_type)
            .to_string();
        let workflow_results =
            WorkflowEngine::execute_for_event(self.crm.as_ref(), &integration, &trigger_event, payload)
                .await;
        if let Some(failed) = first_workflow_error(&workflow_results) {
            return Err(Error::Validation(failed));
        }

        Ok(json!({
            "mapped": mapped,
            "records": records,
            "workflows": workflow_results,
        }))
    }

    /// Drive the CRM writes described by the mapped payload buckets, in
    /// person -> deal -> activity order so later records can link the
    /// earlier ones.
    async fn execute_mapped(
        &self,
        integration: &Integration,
        mapped: &JsonValue,
        payload: &JsonValue,
    ) -> Result<JsonValue> {
        let token = &integration.crm_access_token;
        let mut records = serde_json::Map::new();

        let mut person_id: Option<JsonValue> = None;
        if let Some(person) = mapped.get("person") {
            let record =
                WorkflowEngine::create_or_reconcile_person(self.crm.as_ref(), token, person.clone())
                    .await?;
            person_id = record.get("id").cloned();
            records.insert("person".to_string(), record);
        }

        let mut deal_id: Option<JsonValue> = None;
        if let Some(deal) = mapped.get("deal") {
            let mut deal = deal.clone();
            if let Some(map) = deal.as_object_mut() {
                if let Some(pid) = &person_id {
                    map.entry("person_id".to_string()).or_insert(pid.clone());
                }
                for key in ["pipeline_id", "stage_id"] {
                    if !map.contains_key(key) {
                        if let Some(v) = integration.crm_config.get(key) {
                            map.insert(key.to_string(), v.clone());
                        }
                    }
                }
                if !map.contains_key("title") {
                    map.insert("title".to_string(), json!(default_deal_title(payload)));
                }
            }
            let record = self.crm.create_deal(token, &deal).await?;
            deal_id = record.get("id").cloned();
            records.insert("deal".to_string(), record);
        }

        if let Some(activity) = mapped.get("activity") {
            let mut activity = activity.clone();
            if let Some(map) = activity.as_object_mut() {
                if let Some(pid) = &person_id {
                    map.entry("person_id".to_string()).or_insert(pid.clone());
                }
                if let Some(did) = &deal_id {
                    map.entry("deal_id".to_string()).or_insert(did.clone());
                }
            }
            let record = self.crm.create_activity(token, &activity).await?;
            records.insert("activity".to_string(), record);
        }

        Ok(JsonValue::Object(records))
    }

    async fn load_integration(&self, id: Uuid) -> Result<Integration> {
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

    /// Dispatch the opt-in outcome notification; delivery problems are
    /// logged, never allowed to disturb the event's terminal state.
    async fn notify_outcome(&self, event: &SyncEvent, error: Option<String>) {
        let integration = match self.load_integration(event.integration_id).await {
            Ok(i) => i,
            Err(err) => {
                warn!(
                    "Skipping outcome notification for {}: {}",
                    event.id, err
                );
                return;
            }
        };
        let Some(to) = integration.notify_email.clone() else { return };

        let notification = match &error {
            None if integration.notify_on_success => Notification {
                to,
                subject: format!("CRM sync completed for {}", integration.name),
                template: NotificationTemplate::SyncSuccess,
                data: json!({
                    "integration": integration.name,
                    "sync_event_id": event.id,
                    "call_id": event.call_id,
                    "completed_at": event
                        .processed_at
                        .map(time::to_rfc3339),
                }),
            },
            Some(message) if integration.notify_on_error => Notification {
                to,
                subject: format!("CRM sync failed for {}", integration.name),
                template: NotificationTemplate::SyncError,
                data: json!({
                    "integration": integration.name,
                    "sync_event_id": event.id,
                    "call_id": event.call_id,
                    "error": message,
                    "retry_count": event.retry_count,
                    "failed_at": time::to_rfc3339(time::now()),
                }),
            },
            _ => return,
        };

        if let Err(err) = self.notifier.send(&notification).await {
            warn!("Failed to enqueue outcome notification: {}", err);
        }
    }
}

fn first_workflow_error(results: &[WorkflowRunResult]) -> Option<String> {
    results.iter().find_map(|run| {
        run.actions
            .iter()
            .find(|a| !a.success)
            .map(|a| {
                format!(
                    "Workflow {} action {} failed: {}",
                    run.workflow_name,
                    a.action_type,
                    a.error.as_deref().unwrap_or("unknown error")
                )
            })
    })
}

fn default_deal_title(payload: &JsonValue) -> String {
    let summary = payload
        .pointer("/call/call_analysis/call_summary")
        .or_else(|| payload.pointer("/call_analysis/call_summary"))
        .and_then(JsonValue::as_str);
    let dynamic_vars = payload
        .pointer("/call/retell_llm_dynamic_variables")
        .or_else(|| payload.pointer("/retell_llm_dynamic_variables"));
    let phone = payload
        .pointer("/call/from_number")
        .or_else(|| payload.pointer("/from_number"))
        .map(value_to_string);
    crate::utils::entity::generate_deal_title(summary, dynamic_vars, phone.as_deref())
}
