use async_trait::async_trait;
use reqwest::Client;

use crate::error::{DispatchError, Result};
use crate::mail::{Mailer, OutboundPayload, SendResponse};

const SEND_URL: &str = "https://send.api.mailtrap.io/api/send";

// Keep version in sync with Cargo.toml
const USER_AGENT: &str = "mailqueue-dispatcher/0.1.0";

/// Mailtrap transactional-email API client.
#[derive(Clone)]
pub struct MailtrapMailer {
    client: Client,
    api_token: String,
}

impl MailtrapMailer {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_token: api_token.into(),
        }
    }
}

#[async_trait]
impl Mailer for MailtrapMailer {
    async fn send(&self, payload: &OutboundPayload) -> Result<SendResponse> {
        let res = self
            .client
            .post(SEND_URL)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(payload)
            .send()
            .await
            .map_err(|e| DispatchError::Provider(format!("Mail send failed: {}", e)))?;

        if !res.status().is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(DispatchError::Provider(format!(
                "Mailtrap API error: {}",
                body
            )));
        }

        let response = res
            .json::<SendResponse>()
            .await
            .map_err(|e| DispatchError::Provider(format!("Invalid Mailtrap response: {}", e)))?;

        Ok(response)
    }
}
