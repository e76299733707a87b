pub mod mail_repository;

pub use mail_repository::MailRepository;

use async_trait::async_trait;
use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use serde_json::Value;

use crate::config::Config;
use crate::error::{DispatchError, Result};

/// Create a Redis connection pool
pub fn create_pool(config: &Config) -> Result<Pool> {
    let redis_config = RedisConfig::from_url(&config.redis_url);
    let pool = redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| DispatchError::Store(format!("Failed to create Redis pool: {}", e)))?;

    Ok(pool)
}

/// Value written into one document field. `ServerTimestamp` is resolved
/// against the store's own clock at write time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    ServerTimestamp,
}

/// Document store consumed by the dispatcher. Documents are identified by
/// key; updates are partial merges that never touch fields outside the
/// given dotted paths.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Current content snapshot of a document, if it exists.
    async fn fetch(&self, doc_id: &str) -> Result<Option<Value>>;

    /// Merge the given dotted-path fields into the document atomically.
    async fn merge_fields(&self, doc_id: &str, fields: &[(String, FieldValue)]) -> Result<()>;

    /// Merge `fields` only if `guard_field` is not yet present on the
    /// document; returns whether the merge was applied. The guard check and
    /// its write are a single atomic operation, so exactly one of several
    /// concurrent callers wins.
    async fn merge_fields_if_absent(
        &self,
        doc_id: &str,
        guard_field: &str,
        fields: &[(String, FieldValue)],
    ) -> Result<bool>;
}
