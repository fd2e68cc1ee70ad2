use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Voice-platform webhook envelope. Everything beyond the call id is
/// optional; payload shape varies by event (`call_started`, `call_ended`,
/// `call_analyzed`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetellWebhook {
    pub event: String,
    pub call: RetellCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetellCall {
    pub call_id: String,
    #[serde(default)]
    pub call_status: Option<String>,
    #[serde(default)]
    pub from_number: Option<String>,
    #[serde(default)]
    pub to_number: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub call_analysis: Option<RetellCallAnalysis>,
    #[serde(default)]
    pub retell_llm_dynamic_variables: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetellCallAnalysis {
    #[serde(default)]
    pub call_successful: Option<bool>,
    #[serde(default)]
    pub in_voicemail: Option<bool>,
    #[serde(default)]
    pub custom_analysis_data: Option<JsonValue>,
    #[serde(default)]
    pub call_summary: Option<String>,
}
