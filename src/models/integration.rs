use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

/// An integration owns the active mapping rules, trigger filters and
/// workflows, plus the CRM account the pipeline writes through. The core
/// treats it as read-only configuration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Integration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub crm_provider: String,
    pub crm_access_token: String,
    pub webhook_secret: Option<String>,
    pub field_mappings: JsonValue,
    pub trigger_filters: JsonValue,
    pub workflows: JsonValue,
    pub crm_config: JsonValue,
    pub crm_schema: JsonValue,
    pub notify_email: Option<String>,
    pub notify_on_success: bool,
    pub notify_on_error: bool,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Integration {
    pub fn field_mappings(&self) -> Vec<FieldMapping> {
        parse_config_list(&self.field_mappings, "field_mappings")
    }

    pub fn trigger_filters(&self) -> Vec<TriggerFilter> {
        parse_config_list(&self.trigger_filters, "trigger_filters")
    }

    pub fn workflows(&self) -> Vec<BusinessWorkflow> {
        parse_config_list(&self.workflows, "workflows")
    }
}

/// Malformed stored configuration must not take the pipeline down; the
/// affected list degrades to empty with a warning.
fn parse_config_list<T: serde::de::DeserializeOwned>(raw: &JsonValue, what: &str) -> Vec<T> {
    if raw.is_null() {
        return Vec::new();
    }
    match serde_json::from_value(raw.clone()) {
        Ok(list) => list,
        Err(err) => {
            warn!("Ignoring malformed {} configuration: {}", what, err);
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldMapping {
    pub source_field: String,
    pub target_field: String,
    #[serde(default)]
    pub transform: Option<FieldTransform>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    Uppercase,
    Lowercase,
    Capitalize,
    #[serde(rename = "truncate_100")]
    Truncate100,
    PhoneFormat,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerFilter {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: JsonValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    Exists,
    NotExists,
    // Semantic detectors, meaningful only in workflow conditions.
    IndicatesSuccess,
    IndicatesBooking,
    IndicatesFailure,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessWorkflow {
    pub id: String,
    pub name: String,
    pub trigger: WorkflowTrigger,
    #[serde(default)]
    pub conditions: Vec<TriggerFilter>,
    #[serde(default)]
    pub actions: Vec<WorkflowAction>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    pub event: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub crm_object: Option<String>,
    #[serde(default)]
    pub fields: JsonValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreatePerson,
    UpdatePerson,
    CreateDeal,
    UpdateDeal,
    CreateActivity,
    UpdateActivity,
    #[serde(other)]
    Unknown,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::CreatePerson => "create_person",
            ActionType::UpdatePerson => "update_person",
            ActionType::CreateDeal => "create_deal",
            ActionType::UpdateDeal => "update_deal",
            ActionType::CreateActivity => "create_activity",
            ActionType::UpdateActivity => "update_activity",
            ActionType::Unknown => "unknown",
        }
    }
}
