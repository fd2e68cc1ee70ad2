use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value as JsonValue};
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::webhook_dto::RetellWebhook,
    error::{Error, Result},
    utils::signature::verify_signature,
    AppState,
};

/// Signature header names used by the CRM providers we accept deliveries
/// from; first present wins.
const SIGNATURE_HEADERS: &[&str] = &[
    "x-signature",
    "x-hub-signature-256",
    "x-hub-signature",
    "x-pipedrive-signature",
    "x-hubspot-signature",
];

const RETELL_SIGNATURE_HEADER: &str = "x-retell-signature";

/// Generic CRM webhook intake. The delivery is verified, recorded and
/// acknowledged; the webhook workers take it from there. The `200` means
/// "received", never "synced".
pub async fn handle_crm_webhook(
    State(state): State<AppState>,
    Path((provider, integration_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JsonValue>> {
    let integration = state
        .intake_service
        .load_active_integration(integration_id)
        .await?;

    let signature = find_signature(&headers, SIGNATURE_HEADERS);
    if let Some(sig) = &signature {
        match integration.webhook_secret.as_deref() {
            Some(secret) => verify_signature(secret, &body, sig)?,
            None => warn!(
                "Integration {} received a signed webhook but has no secret configured",
                integration.id
            ),
        }
    }

    let payload: JsonValue = serde_json::from_slice(&body)
        .map_err(|err| Error::BadRequest(format!("Malformed webhook body: {}", err)))?;
    let event_type = classify_event_type(&headers, &payload);

    state
        .intake_service
        .record_event(
            integration.id,
            &provider,
            &event_type,
            &payload,
            signature.as_deref(),
            0,
            false,
        )
        .await?;

    Ok(Json(json!({ "success": true })))
}

/// Voice-platform status webhook: low volume and latency sensitive, so the
/// sync pipeline runs synchronously in the request path. The sender is
/// still acknowledged regardless of the downstream outcome.
pub async fn handle_retell_webhook(
    State(state): State<AppState>,
    Path(integration_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JsonValue>> {
    let integration = state
        .intake_service
        .load_active_integration(integration_id)
        .await?;

    if let Some(sig) = find_signature(&headers, &[RETELL_SIGNATURE_HEADER]) {
        match integration.webhook_secret.as_deref() {
            Some(secret) => verify_signature(secret, &body, &sig)?,
            None => warn!(
                "Integration {} received a signed call webhook but has no secret configured",
                integration.id
            ),
        }
    }

    // Keep the raw payload for storage; the typed envelope only validates
    // shape and pulls out routing metadata.
    let payload: JsonValue = serde_json::from_slice(&body)
        .map_err(|err| Error::BadRequest(format!("Malformed call webhook body: {}", err)))?;
    let webhook: RetellWebhook = serde_json::from_value(payload.clone())
        .map_err(|err| Error::BadRequest(format!("Malformed call webhook body: {}", err)))?;

    let event = state
        .intake_service
        .record_event(
            integration.id,
            "retell",
            &webhook.event,
            &payload,
            find_signature(&headers, &[RETELL_SIGNATURE_HEADER]).as_deref(),
            10,
            true,
        )
        .await?;

    match state.intake_service.process_webhook_event(&event).await {
        Ok(Some(sync_event)) => {
            if let Err(err) = state.sync_service.process_now(sync_event.id).await {
                warn!(
                    "Synchronous processing of call {} failed: {}",
                    webhook.call.call_id, err
                );
            }
        }
        Ok(None) => {}
        Err(err) => warn!(
            "Failed to create sync event for call {}: {}",
            webhook.call.call_id, err
        ),
    }

    Ok(Json(json!({ "success": true })))
}

fn find_signature(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
}

/// Providers disagree on where the event type lives; check the common
/// headers, then the common body fields.
fn classify_event_type(headers: &HeaderMap, payload: &JsonValue) -> String {
    for name in ["x-event-type", "x-webhook-event", "x-github-event"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            return value.to_string();
        }
    }
    for path in ["event", "event_type", "meta.action"] {
        if let Some(value) = crate::utils::json_path::resolve_path(payload, path)
            .and_then(JsonValue::as_str)
        {
            return value.to_string();
        }
    }
    "unknown".to_string()
}
