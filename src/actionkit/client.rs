//! reqwest-backed ActionKit client
//!
//! Credentials travel only in the `Authorization` header. They never appear in
//! logs or error messages, and error bodies are truncated before surfacing.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{ActionCatalog, ActionProvider};
use crate::config::ActionKitConfig;
use crate::signer::SignedAssertion;
use crate::{Error, Result};

/// Maximum number of characters of a provider error body that is surfaced
const ERROR_BODY_LIMIT: usize = 500;

/// HTTP client for the ActionKit API
#[derive(Debug, Clone)]
pub struct ActionKitClient {
    client: Client,
    base_url: String,
    project_id: String,
    integrations: Vec<String>,
}

impl ActionKitClient {
    /// Create a client from the ActionKit configuration section
    pub fn new(config: &ActionKitConfig) -> Result<Self> {
        let project_id = config.require_project_id()?.to_string();
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project_id,
            integrations: config.integrations.clone(),
        })
    }

    /// `{base}/projects/{project}/actions`
    fn actions_url(&self) -> String {
        format!("{}/projects/{}/actions", self.base_url, self.project_id)
    }

    async fn error_body(response: Response) -> String {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        truncate(&text)
    }
}

#[async_trait]
impl ActionProvider for ActionKitClient {
    async fn fetch_actions(&self, assertion: &SignedAssertion) -> Result<ActionCatalog> {
        let mut request = self
            .client
            .get(self.actions_url())
            .bearer_auth(assertion.token());
        if !self.integrations.is_empty() {
            request = request.query(&[("integrations", self.integrations.join(","))]);
        }

        debug!(user = %assertion.subject(), "Fetching ActionKit catalog");
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = Self::error_body(response).await;
            warn!(status = status.as_u16(), "ActionKit catalog request rejected");
            return Err(Error::CatalogFetch {
                status: Some(status.as_u16()),
                message: describe(status, body),
            });
        }

        let body: Value = response.json().await.map_err(|e| Error::CatalogFetch {
            status: Some(status.as_u16()),
            message: format!("response is not valid JSON: {e}"),
        })?;

        let catalog = ActionCatalog::from_response(body)?;
        debug!(
            user = %assertion.subject(),
            actions = catalog.len(),
            "Fetched ActionKit catalog"
        );
        Ok(catalog)
    }

    async fn invoke(
        &self,
        action: &str,
        parameters: Value,
        assertion: &SignedAssertion,
    ) -> Result<Value> {
        debug!(action = %action, user = %assertion.subject(), "Invoking ActionKit action");
        let response = self
            .client
            .post(self.actions_url())
            .bearer_auth(assertion.token())
            .json(&json!({ "action": action, "parameters": parameters }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = Self::error_body(response).await;
            warn!(action = %action, status = status.as_u16(), "ActionKit action failed");
            return Err(Error::Invocation {
                status: status.as_u16(),
                body: describe(status, body),
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::Protocol(format!("Failed to parse action response: {e}")))
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(ERROR_BODY_LIMIT).collect()
}

fn describe(status: StatusCode, body: String) -> String {
    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("empty response")
            .to_string()
    } else {
        body
    }
}
