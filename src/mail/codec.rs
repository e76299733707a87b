use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{DispatchError, Result};
use crate::models::Attachment;

/// Decode base64 attachment content.
///
/// Validates by round-tripping: the decoded bytes must re-encode to exactly
/// the input string, which rejects line breaks, whitespace, and non-canonical
/// padding. Empty input is invalid. Deterministic, no side effects.
pub fn decode(content: &str) -> Option<Vec<u8>> {
    if content.is_empty() {
        return None;
    }
    let bytes = STANDARD.decode(content).ok()?;
    if STANDARD.encode(&bytes) == content {
        Some(bytes)
    } else {
        None
    }
}

/// Decode one attachment, naming its position and filename on failure so the
/// caller can store an actionable error message.
pub fn decode_attachment(index: usize, attachment: &Attachment) -> Result<Vec<u8>> {
    decode(&attachment.content).ok_or_else(|| DispatchError::InvalidEncoding {
        index,
        filename: attachment.filename.clone(),
    })
}
