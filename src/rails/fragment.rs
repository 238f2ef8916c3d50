use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{error_from_response, IssuanceClient, RailError};

/// Client for the external star issuance service.
#[derive(Clone)]
pub struct FragmentClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

impl FragmentClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl IssuanceClient for FragmentClient {
    async fn issue(&self, recipient: &str, quantity: i64) -> Result<(), RailError> {
        let response = self
            .http
            .post(format!("{}/api/v1/stars/issue", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({
                "recipient": recipient,
                "quantity": quantity,
            }))
            .send()
            .await?;

        if let Some(err) = error_from_response(&response) {
            return Err(err);
        }

        let body: IssueResponse = response.json().await?;
        if !body.success {
            return Err(RailError::Rejected(
                body.error
                    .unwrap_or_else(|| "issuance rejected without a reason".to_string()),
            ));
        }
        debug!(recipient = %recipient, quantity, "Stars issued");
        Ok(())
    }
}
