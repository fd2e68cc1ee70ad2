use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateBaseUrlRequest {
    #[validate(length(min = 1))]
    pub base_url: String,
}

#[derive(Debug, Serialize)]
pub struct BaseUrlResponse {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SuggestMappingsRequest {
    pub integration_id: Uuid,
    #[validate(length(min = 1))]
    pub source_fields: Vec<String>,
}
