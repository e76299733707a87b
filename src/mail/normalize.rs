use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{DispatchError, Result};
use crate::mail::codec;
use crate::models::{Address, MailBody, MailRequest};

/// Provider-ready payload: structurally the mail request with `from`
/// resolved and attachment content decoded to binary.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundPayload {
    pub from: Address,
    pub to: Vec<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<Address>>,
    #[serde(flatten)]
    pub body: MailBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<OutboundAttachment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_variables: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Address>,
}

/// Attachment with decoded binary content. The provider wire format is
/// JSON, so `content` serializes back to base64 on the way out.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundAttachment {
    pub filename: String,
    #[serde(serialize_with = "as_base64")]
    pub content: Vec<u8>,
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

fn as_base64<S: serde::Serializer>(content: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(content))
}

/// Shape a mail request for the provider.
///
/// The document's `from` always wins over the configured default; there is
/// no merging of partial address fields. Attachments are decoded one by one
/// and any failure fails the whole normalization, so a partially valid
/// document never produces a partial send. No network or store access.
pub fn normalize(request: &MailRequest, default_from: &Address) -> Result<OutboundPayload> {
    if request.to.is_empty() {
        return Err(DispatchError::InvalidRequest(
            "at least one `to` recipient is required".to_string(),
        ));
    }

    let from = request.from.clone().unwrap_or_else(|| default_from.clone());

    let attachments = match &request.attachments {
        Some(list) => {
            let mut decoded = Vec::with_capacity(list.len());
            for (index, attachment) in list.iter().enumerate() {
                decoded.push(OutboundAttachment {
                    filename: attachment.filename.clone(),
                    content: codec::decode_attachment(index, attachment)?,
                    content_type: attachment.content_type.clone(),
                    disposition: attachment.disposition.clone(),
                    content_id: attachment.content_id.clone(),
                });
            }
            Some(decoded)
        }
        None => None,
    };

    Ok(OutboundPayload {
        from,
        to: request.to.clone(),
        cc: request.cc.clone(),
        bcc: request.bcc.clone(),
        body: request.body.clone(),
        attachments,
        headers: request.headers.clone(),
        custom_variables: request.custom_variables.clone(),
        reply_to: request.reply_to.clone(),
    })
}
