use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde_json::{Map, Value};

use crate::error::{DispatchError, Result};
use crate::models::MailRequest;
use crate::store::{FieldValue, MailStore};

/// Mail-collection repository for Redis operations.
///
/// Each mail document is a hash at `{collection}:{doc_id}` with one
/// JSON-encoded hash field per dotted field path, so a multi-field HSET is
/// an atomic partial merge. Creation notifications are a list at
/// `{collection}:created` holding document ids.
#[derive(Clone)]
pub struct MailRepository {
    pool: Pool,
    collection: String,
}

impl MailRepository {
    pub fn new(pool: Pool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    fn doc_key(&self, doc_id: &str) -> String {
        format!("{}:{}", self.collection, doc_id)
    }

    fn queue_key(&self) -> String {
        format!("{}:created", self.collection)
    }

    // ==================== Document Operations ====================

    /// Write a new mail document and enqueue its creation notification.
    /// This is the exogenous-writer path: any process may create requests.
    pub async fn create_mail(&self, doc_id: &str, request: &MailRequest) -> Result<()> {
        let value = serde_json::to_value(request)
            .map_err(|e| DispatchError::Store(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(DispatchError::Store(
                "mail request must serialize to an object".to_string(),
            ));
        };

        let fields: Vec<(String, String)> = map
            .into_iter()
            .map(|(field, value)| (field, value.to_string()))
            .collect();

        let mut conn = self.pool.get().await?;
        conn.hset_multiple::<_, _, _, ()>(&self.doc_key(doc_id), &fields)
            .await?;
        conn.rpush::<_, _, ()>(&self.queue_key(), doc_id).await?;

        tracing::info!(doc_id = %doc_id, "Mail document created");
        Ok(())
    }

    /// Block up to `timeout_secs` for the next creation notification.
    pub async fn pop_created(&self, timeout_secs: f64) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;

        let reply: Option<(String, String)> = conn.blpop(&self.queue_key(), timeout_secs).await?;
        Ok(reply.map(|(_, doc_id)| doc_id))
    }

    /// Store clock, used for server-assigned timestamps.
    async fn server_time(&self) -> Result<DateTime<Utc>> {
        let mut conn = self.pool.get().await?;

        let (secs, micros): (i64, i64) = redis::cmd("TIME").query_async(&mut *conn).await?;
        DateTime::from_timestamp(secs, (micros * 1000) as u32)
            .ok_or_else(|| DispatchError::Store("Redis TIME out of range".to_string()))
    }

    /// Render field values to JSON strings, resolving `ServerTimestamp`
    /// against the store clock (fetched at most once per batch).
    async fn resolve_fields(
        &self,
        fields: &[(String, FieldValue)],
    ) -> Result<Vec<(String, String)>> {
        let mut now: Option<DateTime<Utc>> = None;
        let mut resolved = Vec::with_capacity(fields.len());

        for (path, value) in fields {
            let raw = match value {
                FieldValue::Value(value) => value.to_string(),
                FieldValue::ServerTimestamp => {
                    let timestamp = match now {
                        Some(timestamp) => timestamp,
                        None => {
                            let timestamp = self.server_time().await?;
                            now = Some(timestamp);
                            timestamp
                        }
                    };
                    Value::String(timestamp.to_rfc3339()).to_string()
                }
            };
            resolved.push((path.clone(), raw));
        }

        Ok(resolved)
    }

    // ==================== Health Check ====================

    /// Check Redis connection health
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))?;

        Ok(pong == "PONG")
    }
}

#[async_trait]
impl MailStore for MailRepository {
    async fn fetch(&self, doc_id: &str) -> Result<Option<Value>> {
        let mut conn = self.pool.get().await?;

        let fields: Vec<(String, String)> = conn.hgetall(&self.doc_key(doc_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        Ok(Some(explode(fields)))
    }

    async fn merge_fields(&self, doc_id: &str, fields: &[(String, FieldValue)]) -> Result<()> {
        let resolved = self.resolve_fields(fields).await?;

        let mut conn = self.pool.get().await?;
        conn.hset_multiple::<_, _, _, ()>(&self.doc_key(doc_id), &resolved)
            .await?;

        Ok(())
    }

    async fn merge_fields_if_absent(
        &self,
        doc_id: &str,
        guard_field: &str,
        fields: &[(String, FieldValue)],
    ) -> Result<bool> {
        let resolved = self.resolve_fields(fields).await?;
        let Some((_, guard_value)) = resolved.iter().find(|(path, _)| path == guard_field) else {
            return Err(DispatchError::Store(format!(
                "guard field {} missing from merge",
                guard_field
            )));
        };

        let key = self.doc_key(doc_id);
        let mut conn = self.pool.get().await?;

        // HSETNX on the guard field decides the race; only the winner
        // writes the remaining fields.
        let claimed: bool = conn.hset_nx(&key, guard_field, guard_value).await?;
        if !claimed {
            return Ok(false);
        }

        let rest: Vec<(String, String)> = resolved
            .iter()
            .filter(|(path, _)| path != guard_field)
            .cloned()
            .collect();
        if !rest.is_empty() {
            conn.hset_multiple::<_, _, _, ()>(&key, &rest).await?;
        }

        Ok(true)
    }
}

/// Reassemble flat dotted-path hash fields into a nested JSON snapshot.
/// Hash values that are not valid JSON are kept as plain strings.
fn explode(fields: Vec<(String, String)>) -> Value {
    let mut root = Map::new();
    for (path, raw) in fields {
        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        insert_path(&mut root, &path, value);
    }
    Value::Object(root)
}

fn insert_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            // A scalar already stored at the parent path wins; dotted
            // writes never replace it.
            if let Value::Object(child) = entry {
                insert_path(child, rest, value);
            }
        }
        None => {
            map.insert(path.to_string(), value);
        }
    }
}
