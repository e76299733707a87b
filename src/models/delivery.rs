use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one mail document. The state only ever moves forward:
/// PENDING -> PROCESSING -> SUCCESS | ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    Pending,
    Processing,
    Success,
    Error,
}

impl DeliveryState {
    /// SUCCESS and ERROR accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryState::Success | DeliveryState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryState::Pending => "PENDING",
            DeliveryState::Processing => "PROCESSING",
            DeliveryState::Success => "SUCCESS",
            DeliveryState::Error => "ERROR",
        }
    }
}

/// Delivery outcome sub-record merged into the mail document after first
/// processing. Once present it is never removed; `startTime` and `endTime`
/// are set once, `attempts` never decreases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    pub state: DeliveryState,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
