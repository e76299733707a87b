pub mod transitions;

use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::error::Result;
use crate::mail::{normalize, Mailer};
use crate::models::MailRequest;
use crate::store::MailStore;

/// Stored in `delivery.error` when a failure carries no message text.
const UNKNOWN_ERROR: &str = "Unknown error occurred";

/// Creation notification for one mail document: the document id plus its
/// content snapshot at creation time. A missing snapshot is a valid input
/// and handled as a no-op.
#[derive(Debug, Clone)]
pub struct CreatedEvent {
    pub doc_id: String,
    pub doc: Option<Value>,
}

/// What one invocation did to its document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The notification carried no content.
    NoDocument,
    /// The document already had a delivery state; nothing was written or sent.
    AlreadyProcessed,
    /// Terminal SUCCESS with the provider's message ids.
    Delivered(Vec<String>),
    /// Terminal ERROR with the message recorded on the document.
    Failed(String),
}

/// Processes document-creation events through the delivery lifecycle:
/// PENDING -> PROCESSING -> SUCCESS | ERROR, one strictly ordered sequence
/// of store merges per document.
pub struct Dispatcher {
    config: Arc<Config>,
    store: Arc<dyn MailStore>,
    mailer: Arc<dyn Mailer>,
}

impl Dispatcher {
    pub fn new(config: Arc<Config>, store: Arc<dyn MailStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            config,
            store,
            mailer,
        }
    }

    /// Fetch the current snapshot for a notified document id and run it
    /// through [`Dispatcher::handle_created`].
    pub async fn dispatch(&self, doc_id: &str) -> Result<DispatchOutcome> {
        let doc = self.store.fetch(doc_id).await?;
        self.handle_created(CreatedEvent {
            doc_id: doc_id.to_string(),
            doc,
        })
        .await
    }

    /// Handle one document-creation event.
    ///
    /// Every recoverable failure (malformed document, bad attachment
    /// encoding, provider rejection) ends as the document's ERROR state and
    /// never propagates. Only store failures return `Err`; those are fatal
    /// for the invocation and surface to the caller's logging.
    pub async fn handle_created(&self, event: CreatedEvent) -> Result<DispatchOutcome> {
        let CreatedEvent { doc_id, doc } = event;
        let doc_id = doc_id.as_str();

        let Some(doc) = doc else {
            tracing::warn!(doc_id = %doc_id, "No document data found");
            return Ok(DispatchOutcome::NoDocument);
        };

        // Idempotency check: skip if already processed
        if let Some(state) = delivery_state(&doc) {
            tracing::info!(doc_id = %doc_id, state = %state, "Document already processed, skipping");
            return Ok(DispatchOutcome::AlreadyProcessed);
        }

        tracing::info!(doc_id = %doc_id, "Processing email document");

        // Mark as PENDING. The state field doubles as the claim guard, so
        // two concurrent first invocations cannot both proceed.
        let claimed = self
            .store
            .merge_fields_if_absent(doc_id, transitions::STATE, &transitions::pending())
            .await?;
        if !claimed {
            tracing::info!(doc_id = %doc_id, "Document claimed by concurrent invocation, skipping");
            return Ok(DispatchOutcome::AlreadyProcessed);
        }

        // Mark as PROCESSING before the provider call
        self.store
            .merge_fields(doc_id, &transitions::processing())
            .await?;

        match self.send(&doc).await {
            Ok(message_ids) => {
                self.store
                    .merge_fields(doc_id, &transitions::success(&message_ids))
                    .await?;

                tracing::info!(doc_id = %doc_id, message_ids = ?message_ids, "Email sent successfully");
                Ok(DispatchOutcome::Delivered(message_ids))
            }
            Err(err) => {
                let message = match err.to_string() {
                    message if message.is_empty() => UNKNOWN_ERROR.to_string(),
                    message => message,
                };

                self.store
                    .merge_fields(doc_id, &transitions::error(&message))
                    .await?;

                tracing::error!(doc_id = %doc_id, error = %message, "Failed to send email");
                Ok(DispatchOutcome::Failed(message))
            }
        }
    }

    /// Normalization plus the provider call. Everything in here is
    /// recoverable: a failure becomes the document's ERROR state.
    async fn send(&self, doc: &Value) -> Result<Vec<String>> {
        let request: MailRequest = serde_json::from_value(doc.clone())?;
        let payload = normalize(&request, &self.config.default_from())?;
        let response = self.mailer.send(&payload).await?;
        Ok(response.message_ids)
    }
}

/// Non-empty `delivery.state` on a document snapshot.
fn delivery_state(doc: &Value) -> Option<&str> {
    doc.get("delivery")
        .and_then(|delivery| delivery.get("state"))
        .and_then(Value::as_str)
        .filter(|state| !state.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};

    use crate::error::DispatchError;
    use crate::mail::{OutboundPayload, SendResponse};
    use crate::store::FieldValue;

    // ==================== Test Doubles ====================

    #[derive(Default)]
    struct MemoryStore {
        docs: Mutex<HashMap<String, Value>>,
        write_count: Mutex<usize>,
    }

    impl MemoryStore {
        fn with_doc(doc_id: &str, doc: Value) -> Self {
            let store = Self::default();
            store
                .docs
                .lock()
                .unwrap()
                .insert(doc_id.to_string(), doc);
            store
        }

        fn doc(&self, doc_id: &str) -> Value {
            self.docs.lock().unwrap().get(doc_id).cloned().unwrap()
        }

        fn write_count(&self) -> usize {
            *self.write_count.lock().unwrap()
        }

        fn apply(doc: &mut Value, fields: &[(String, FieldValue)]) {
            for (path, value) in fields {
                let resolved = match value {
                    FieldValue::Value(value) => value.clone(),
                    FieldValue::ServerTimestamp => Value::String(Utc::now().to_rfc3339()),
                };
                set_path(doc, path, resolved);
            }
        }
    }

    fn set_path(doc: &mut Value, path: &str, value: Value) {
        let map = doc.as_object_mut().expect("document must be an object");
        match path.split_once('.') {
            Some((head, rest)) => {
                let child = map
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                set_path(child, rest, value);
            }
            None => {
                map.insert(path.to_string(), value);
            }
        }
    }

    fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
        match path.split_once('.') {
            Some((head, rest)) => get_path(doc.get(head)?, rest),
            None => doc.get(path),
        }
    }

    #[async_trait]
    impl MailStore for MemoryStore {
        async fn fetch(&self, doc_id: &str) -> Result<Option<Value>> {
            Ok(self.docs.lock().unwrap().get(doc_id).cloned())
        }

        async fn merge_fields(&self, doc_id: &str, fields: &[(String, FieldValue)]) -> Result<()> {
            let mut docs = self.docs.lock().unwrap();
            let doc = docs
                .entry(doc_id.to_string())
                .or_insert_with(|| json!({}));
            Self::apply(doc, fields);
            *self.write_count.lock().unwrap() += 1;
            Ok(())
        }

        async fn merge_fields_if_absent(
            &self,
            doc_id: &str,
            guard_field: &str,
            fields: &[(String, FieldValue)],
        ) -> Result<bool> {
            let mut docs = self.docs.lock().unwrap();
            let doc = docs
                .entry(doc_id.to_string())
                .or_insert_with(|| json!({}));
            if get_path(doc, guard_field).is_some() {
                return Ok(false);
            }
            Self::apply(doc, fields);
            *self.write_count.lock().unwrap() += 1;
            Ok(true)
        }
    }

    struct MockMailer {
        reply: std::result::Result<Vec<String>, String>,
        sent: Mutex<Vec<Value>>,
    }

    impl MockMailer {
        fn succeeding() -> Self {
            Self {
                reply: Ok(vec!["test-message-id-123".to_string()]),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<Value> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for MockMailer {
        async fn send(&self, payload: &OutboundPayload) -> Result<SendResponse> {
            self.sent
                .lock()
                .unwrap()
                .push(serde_json::to_value(payload).unwrap());
            match &self.reply {
                Ok(message_ids) => Ok(SendResponse {
                    success: true,
                    message_ids: message_ids.clone(),
                }),
                Err(message) => Err(DispatchError::Provider(message.clone())),
            }
        }
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            redis_url: "redis://localhost".to_string(),
            mail_collection: "mail".to_string(),
            default_from_email: "d@e.com".to_string(),
            default_from_name: None,
            mailtrap_api_token: "test-token".to_string(),
        })
    }

    fn dispatcher(store: Arc<MemoryStore>, mailer: Arc<MockMailer>) -> Dispatcher {
        Dispatcher::new(test_config(), store, mailer)
    }

    fn basic_doc() -> Value {
        json!({
            "to": [{"email": "a@b.com"}],
            "subject": "S",
            "text": "T"
        })
    }

    fn event(doc_id: &str, doc: Value) -> CreatedEvent {
        CreatedEvent {
            doc_id: doc_id.to_string(),
            doc: Some(doc),
        }
    }

    fn timestamp(doc: &Value, path: &str) -> DateTime<Utc> {
        get_path(doc, path)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(|| panic!("missing timestamp at {}", path))
    }

    // ==================== Scenarios ====================

    #[tokio::test]
    async fn test_successful_delivery_uses_default_sender() {
        let store = Arc::new(MemoryStore::with_doc("doc-1", basic_doc()));
        let mailer = Arc::new(MockMailer::succeeding());
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = dispatcher.dispatch("doc-1").await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Delivered(vec!["test-message-id-123".to_string()])
        );

        let doc = store.doc("doc-1");
        assert_eq!(doc["delivery"]["state"], json!("SUCCESS"));
        assert_eq!(doc["delivery"]["attempts"], json!(1));
        assert_eq!(doc["delivery"]["messageIds"], json!(["test-message-id-123"]));
        assert!(timestamp(&doc, "delivery.startTime") <= timestamp(&doc, "delivery.endTime"));

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["from"], json!({"email": "d@e.com"}));
        assert_eq!(sent[0]["subject"], json!("S"));
    }

    #[tokio::test]
    async fn test_document_sender_wins_over_default() {
        let mut doc = basic_doc();
        doc["from"] = json!({"email": "custom@example.com", "name": "Custom Sender"});
        let store = Arc::new(MemoryStore::with_doc("doc-1", doc));
        let mailer = Arc::new(MockMailer::succeeding());
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        dispatcher.dispatch("doc-1").await.unwrap();

        assert_eq!(
            mailer.sent()[0]["from"],
            json!({"email": "custom@example.com", "name": "Custom Sender"})
        );
    }

    #[tokio::test]
    async fn test_invalid_attachment_ends_in_error_without_send() {
        let mut doc = basic_doc();
        doc["attachments"] = json!([
            {"filename": "notes.txt", "content": "not-valid-base64!!!", "type": "text/plain"}
        ]);
        let store = Arc::new(MemoryStore::with_doc("doc-1", doc));
        let mailer = Arc::new(MockMailer::succeeding());
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = dispatcher.dispatch("doc-1").await.unwrap();

        let expected = "Invalid base64 content in attachment[0]: notes.txt";
        assert_eq!(outcome, DispatchOutcome::Failed(expected.to_string()));

        let doc = store.doc("doc-1");
        assert_eq!(doc["delivery"]["state"], json!("ERROR"));
        assert_eq!(doc["delivery"]["error"], json!(expected));
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_template_document_sends_template_fields_only() {
        let doc = json!({
            "to": [{"email": "a@b.com"}],
            "template_uuid": "t-1"
        });
        let store = Arc::new(MemoryStore::with_doc("doc-1", doc));
        let mailer = Arc::new(MockMailer::succeeding());
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = dispatcher.dispatch("doc-1").await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Delivered(_)));

        let sent = mailer.sent();
        assert_eq!(sent[0]["template_uuid"], json!("t-1"));
        assert!(sent[0].get("subject").is_none());
        assert!(sent[0].get("text").is_none());
        assert!(sent[0].get("html").is_none());
    }

    #[tokio::test]
    async fn test_provider_failure_recorded_verbatim() {
        let store = Arc::new(MemoryStore::with_doc("doc-1", basic_doc()));
        let mailer = Arc::new(MockMailer::failing("rate limit exceeded"));
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = dispatcher.dispatch("doc-1").await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Failed("rate limit exceeded".to_string())
        );

        let doc = store.doc("doc-1");
        assert_eq!(doc["delivery"]["state"], json!("ERROR"));
        assert_eq!(doc["delivery"]["error"], json!("rate limit exceeded"));
        // startTime survives from the PENDING step, endTime from the terminal one
        assert!(timestamp(&doc, "delivery.startTime") <= timestamp(&doc, "delivery.endTime"));
        assert_eq!(doc["delivery"]["attempts"], json!(1));
    }

    #[tokio::test]
    async fn test_empty_failure_message_falls_back() {
        let store = Arc::new(MemoryStore::with_doc("doc-1", basic_doc()));
        let mailer = Arc::new(MockMailer::failing(""));
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = dispatcher.dispatch("doc-1").await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Failed("Unknown error occurred".to_string())
        );
        assert_eq!(
            store.doc("doc-1")["delivery"]["error"],
            json!("Unknown error occurred")
        );
    }

    #[tokio::test]
    async fn test_malformed_document_ends_in_error() {
        let doc = json!({
            "to": [{"email": "a@b.com"}],
            "text": "body without subject or template"
        });
        let store = Arc::new(MemoryStore::with_doc("doc-1", doc));
        let mailer = Arc::new(MockMailer::succeeding());
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = dispatcher.dispatch("doc-1").await.unwrap();

        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
        assert_eq!(store.doc("doc-1")["delivery"]["state"], json!("ERROR"));
        assert!(mailer.sent().is_empty());
    }

    // ==================== Idempotency ====================

    #[tokio::test]
    async fn test_already_processed_document_is_untouched() {
        let mut doc = basic_doc();
        doc["delivery"] = json!({"state": "SUCCESS", "attempts": 1});
        let store = Arc::new(MemoryStore::with_doc("doc-1", doc));
        let mailer = Arc::new(MockMailer::succeeding());
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = dispatcher.dispatch("doc-1").await.unwrap();

        assert_eq!(outcome, DispatchOutcome::AlreadyProcessed);
        assert_eq!(store.write_count(), 0);
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_empty_state_does_not_short_circuit() {
        let mut doc = basic_doc();
        doc["delivery"] = json!({"state": ""});
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MockMailer::succeeding());
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = dispatcher.handle_created(event("doc-1", doc)).await.unwrap();

        assert!(matches!(outcome, DispatchOutcome::Delivered(_)));
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_a_no_op() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MockMailer::succeeding());
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = dispatcher
            .handle_created(CreatedEvent {
                doc_id: "doc-1".to_string(),
                doc: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::NoDocument);
        assert_eq!(store.write_count(), 0);
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_document_dispatch_is_a_no_op() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MockMailer::succeeding());
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = dispatcher.dispatch("ghost").await.unwrap();

        assert_eq!(outcome, DispatchOutcome::NoDocument);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_lost_claim_race_skips_without_sending() {
        // The snapshot shows no delivery state, but another invocation has
        // already claimed the document in the store.
        let mut stored = basic_doc();
        stored["delivery"] = json!({"state": "PENDING", "attempts": 1});
        let store = Arc::new(MemoryStore::with_doc("doc-1", stored));
        let mailer = Arc::new(MockMailer::succeeding());
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = dispatcher
            .handle_created(event("doc-1", basic_doc()))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::AlreadyProcessed);
        assert_eq!(store.write_count(), 0);
        assert!(mailer.sent().is_empty());
        // The winner's PENDING record is untouched
        assert_eq!(store.doc("doc-1")["delivery"]["state"], json!("PENDING"));
    }
}
