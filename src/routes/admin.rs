use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value as JsonValue};
use url::Url;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::admin_dto::{BaseUrlResponse, SuggestMappingsRequest, UpdateBaseUrlRequest},
    error::{Error, Result},
    models::crm_schema::CrmSchema,
    services::mapping::suggest_field_mappings,
    AppState,
};

/// Idempotent update of the effective webhook base URL; returns the value
/// now in effect.
pub async fn update_webhook_base_url(
    State(state): State<AppState>,
    Json(req): Json<UpdateBaseUrlRequest>,
) -> Result<Json<BaseUrlResponse>> {
    req.validate()?;
    let parsed = Url::parse(&req.base_url)
        .map_err(|err| Error::Validation(format!("Invalid base URL: {}", err)))?;
    let effective = parsed.as_str().trim_end_matches('/').to_string();

    *state
        .webhook_base_url
        .write()
        .expect("webhook base url lock poisoned") = effective.clone();

    Ok(Json(BaseUrlResponse {
        base_url: effective,
    }))
}

pub async fn get_webhook_base_url(State(state): State<AppState>) -> Json<BaseUrlResponse> {
    let base_url = state
        .webhook_base_url
        .read()
        .expect("webhook base url lock poisoned")
        .clone();
    Json(BaseUrlResponse { base_url })
}

/// Intake URLs a caller should configure at the providers for one
/// integration, derived from the effective base URL.
pub async fn get_integration_webhook_urls(
    State(state): State<AppState>,
    Path(integration_id): Path<Uuid>,
) -> Result<Json<JsonValue>> {
    let integration = state
        .intake_service
        .load_active_integration(integration_id)
        .await?;
    let base = state
        .webhook_base_url
        .read()
        .expect("webhook base url lock poisoned")
        .clone();
    Ok(Json(json!({
        "crm": format!("{}/webhooks/{}/{}", base, integration.crm_provider, integration.id),
        "retell": format!("{}/webhooks/retell/{}", base, integration.id),
    })))
}

pub async fn get_sync_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>> {
    let event = state.sync_service.get_event(id).await?;
    Ok(Json(serde_json::to_value(event)?))
}

/// Manual re-queue of a terminally failed sync event.
pub async fn retry_sync_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>> {
    let event = state.sync_service.retry_event(id).await?;
    Ok(Json(serde_json::to_value(event)?))
}

pub async fn suggest_mappings(
    State(state): State<AppState>,
    Json(req): Json<SuggestMappingsRequest>,
) -> Result<Json<JsonValue>> {
    req.validate()?;
    let integration = state
        .intake_service
        .load_active_integration(req.integration_id)
        .await?;
    let schema = CrmSchema::from_value(&integration.crm_schema);
    let suggestions = suggest_field_mappings(&req.source_fields, &schema);
    Ok(Json(json!({ "suggestions": suggestions })))
}
