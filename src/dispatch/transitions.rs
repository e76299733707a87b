//! Partial-merge field sets for each delivery state transition. Every
//! write targets only `delivery.*` paths, never the rest of the document.

use serde_json::{json, Value};

use crate::models::DeliveryState;
use crate::store::FieldValue;

pub const STATE: &str = "delivery.state";
pub const START_TIME: &str = "delivery.startTime";
pub const END_TIME: &str = "delivery.endTime";
pub const ATTEMPTS: &str = "delivery.attempts";
pub const MESSAGE_IDS: &str = "delivery.messageIds";
pub const ERROR: &str = "delivery.error";

fn state(value: DeliveryState) -> (String, FieldValue) {
    (
        STATE.to_string(),
        FieldValue::Value(Value::String(value.as_str().to_string())),
    )
}

/// ABSENT -> PENDING: first transition; stamps `startTime` and starts the
/// attempt counter at 1.
pub fn pending() -> Vec<(String, FieldValue)> {
    vec![
        state(DeliveryState::Pending),
        (START_TIME.to_string(), FieldValue::ServerTimestamp),
        (ATTEMPTS.to_string(), FieldValue::Value(json!(1))),
    ]
}

/// PENDING -> PROCESSING: marks that the provider call is about to be
/// issued, distinguishable from "decided to call" if the process dies in
/// between.
pub fn processing() -> Vec<(String, FieldValue)> {
    vec![state(DeliveryState::Processing)]
}

/// PROCESSING -> SUCCESS: terminal; records the provider's message ids.
pub fn success(message_ids: &[String]) -> Vec<(String, FieldValue)> {
    vec![
        state(DeliveryState::Success),
        (END_TIME.to_string(), FieldValue::ServerTimestamp),
        (MESSAGE_IDS.to_string(), FieldValue::Value(json!(message_ids))),
    ]
}

/// PROCESSING -> ERROR: terminal; records the failure message.
pub fn error(message: &str) -> Vec<(String, FieldValue)> {
    vec![
        state(DeliveryState::Error),
        (END_TIME.to_string(), FieldValue::ServerTimestamp),
        (
            ERROR.to_string(),
            FieldValue::Value(Value::String(message.to_string())),
        ),
    ]
}
