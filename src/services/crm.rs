use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use tracing::debug;

/// Capability interface every CRM adapter provides. The pipeline only ever
/// talks to this trait; provider-specific API shapes stay behind it. All
/// operations must stay safe to call more than once for the same logical
/// retry — the pipeline is at-least-once and reconciles by searching
/// before creating.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn create_person(&self, access_token: &str, data: &JsonValue) -> Result<JsonValue>;
    async fn update_person(
        &self,
        access_token: &str,
        id: &str,
        data: &JsonValue,
    ) -> Result<JsonValue>;
    async fn create_deal(&self, access_token: &str, data: &JsonValue) -> Result<JsonValue>;
    async fn update_deal(
        &self,
        access_token: &str,
        id: &str,
        data: &JsonValue,
    ) -> Result<JsonValue>;
    async fn create_activity(&self, access_token: &str, data: &JsonValue) -> Result<JsonValue>;
    async fn update_activity(
        &self,
        access_token: &str,
        id: &str,
        data: &JsonValue,
    ) -> Result<JsonValue>;
    async fn get_persons(&self, access_token: &str, search: &str) -> Result<Vec<JsonValue>>;
    async fn get_deals(&self, access_token: &str, search: &str) -> Result<Vec<JsonValue>>;
    async fn get_activities(&self, access_token: &str, query: &JsonValue)
        -> Result<Vec<JsonValue>>;
}

/// Thin REST adapter speaking the normalized `/persons`, `/deals`,
/// `/activities` surface of the CRM gateway configured at startup.
#[derive(Clone)]
pub struct RestCrmClient {
    client: Client,
    base_url: String,
}

impl RestCrmClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client for CRM adapter");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, token: &str, path: &str, data: &JsonValue) -> Result<JsonValue> {
        let url = format!("{}{}", self.base_url, path);
        debug!("CRM POST {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(data)
            .send()
            .await?;
        Self::parse_record(response).await
    }

    async fn put(&self, token: &str, path: &str, data: &JsonValue) -> Result<JsonValue> {
        let url = format!("{}{}", self.base_url, path);
        debug!("CRM PUT {}", url);
        let response = self
            .client
            .put(&url)
            .bearer_auth(token)
            .json(data)
            .send()
            .await?;
        Self::parse_record(response).await
    }

    async fn search(&self, token: &str, path: &str, term: &str) -> Result<Vec<JsonValue>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("CRM GET {} term={}", url, term);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("term", term)])
            .send()
            .await?;
        let body = Self::parse_record(response).await?;
        Ok(body.as_array().cloned().unwrap_or_default())
    }

    async fn parse_record(response: reqwest::Response) -> Result<JsonValue> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "CRM request failed with status {}: {}",
                status, body
            )));
        }
        let body: JsonValue = response.json().await?;
        // Gateways wrap records in a `data` envelope; unwrap when present.
        Ok(body.get("data").cloned().unwrap_or(body))
    }
}

#[async_trait]
impl CrmClient for RestCrmClient {
    async fn create_person(&self, access_token: &str, data: &JsonValue) -> Result<JsonValue> {
        self.post(access_token, "/persons", data).await
    }

    async fn update_person(
        &self,
        access_token: &str,
        id: &str,
        data: &JsonValue,
    ) -> Result<JsonValue> {
        self.put(access_token, &format!("/persons/{}", id), data).await
    }

    async fn create_deal(&self, access_token: &str, data: &JsonValue) -> Result<JsonValue> {
        self.post(access_token, "/deals", data).await
    }

    async fn update_deal(
        &self,
        access_token: &str,
        id: &str,
        data: &JsonValue,
    ) -> Result<JsonValue> {
        self.put(access_token, &format!("/deals/{}", id), data).await
    }

    async fn create_activity(&self, access_token: &str, data: &JsonValue) -> Result<JsonValue> {
        self.post(access_token, "/activities", data).await
    }

    async fn update_activity(
        &self,
        access_token: &str,
        id: &str,
        data: &JsonValue,
    ) -> Result<JsonValue> {
        self.put(access_token, &format!("/activities/{}", id), data)
            .await
    }

    async fn get_persons(&self, access_token: &str, search: &str) -> Result<Vec<JsonValue>> {
        self.search(access_token, "/persons/search", search).await
    }

    async fn get_deals(&self, access_token: &str, search: &str) -> Result<Vec<JsonValue>> {
        self.search(access_token, "/deals/search", search).await
    }

    async fn get_activities(
        &self,
        access_token: &str,
        query: &JsonValue,
    ) -> Result<Vec<JsonValue>> {
        let term = query
            .get("term")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        self.search(access_token, "/activities/search", term).await
    }
}
