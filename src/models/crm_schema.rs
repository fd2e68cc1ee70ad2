use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

/// Snapshot of the CRM account's schema, used to validate mapped payloads
/// before anything is written. Consumed read-only; fetched and refreshed
/// outside the core pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CrmSchema {
    pub stages: Vec<CrmStage>,
    pub pipelines: Vec<CrmPipeline>,
    pub deal_fields: Vec<CrmField>,
    pub person_fields: Vec<CrmField>,
    pub activity_types: Vec<CrmActivityType>,
    pub deal_labels: Vec<CrmLabel>,
    pub person_labels: Vec<CrmLabel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmStage {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub pipeline_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmPipeline {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmField {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub options: Vec<CrmFieldOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmFieldOption {
    pub id: i64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmActivityType {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmLabel {
    pub id: i64,
    pub label: String,
}

impl CrmSchema {
    /// Parse a stored schema snapshot, degrading to an empty schema (which
    /// validates nothing away) when the snapshot is missing or malformed.
    pub fn from_value(raw: &JsonValue) -> Self {
        if raw.is_null() {
            return Self::default();
        }
        match serde_json::from_value(raw.clone()) {
            Ok(schema) => schema,
            Err(err) => {
                warn!("Ignoring malformed CRM schema snapshot: {}", err);
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
            && self.pipelines.is_empty()
            && self.deal_fields.is_empty()
            && self.person_fields.is_empty()
            && self.activity_types.is_empty()
    }

    pub fn has_stage(&self, id: i64) -> bool {
        self.stages.iter().any(|s| s.id == id)
    }

    pub fn has_pipeline(&self, id: i64) -> bool {
        self.pipelines.iter().any(|p| p.id == id)
    }

    pub fn has_activity_type(&self, id: i64) -> bool {
        self.activity_types.iter().any(|t| t.id == id)
    }

    /// Whether `key` names a known custom field on the given object. The
    /// label lists count as known keys as well, since option-style fields
    /// surface there in some CRM exports.
    pub fn has_custom_field(&self, object: &str, key: &str) -> bool {
        match object {
            "deal" => {
                self.deal_fields.iter().any(|f| f.key == key)
                    || self.deal_labels.iter().any(|l| l.label == key)
            }
            "person" => {
                self.person_fields.iter().any(|f| f.key == key)
                    || self.person_labels.iter().any(|l| l.label == key)
            }
            _ => false,
        }
    }
}
