pub mod codec;
pub mod mailtrap;
pub mod normalize;

pub use mailtrap::MailtrapMailer;
pub use normalize::{normalize, OutboundAttachment, OutboundPayload};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;

/// Provider acknowledgement for an accepted send.
#[derive(Debug, Clone, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message_ids: Vec<String>,
}

/// Transactional-email provider client.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, payload: &OutboundPayload) -> Result<SendResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_response() {
        let response: SendResponse = serde_json::from_str(
            r#"{"success": true, "message_ids": ["msg-1", "msg-2"]}"#,
        )
        .expect("Should parse send response");

        assert!(response.success);
        assert_eq!(response.message_ids, vec!["msg-1", "msg-2"]);
    }
}
