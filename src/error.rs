#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Attachment content that is not valid base64. The index and filename
    /// identify the offending attachment in the document.
    #[error("Invalid base64 content in attachment[{index}]: {filename}")]
    InvalidEncoding { index: usize, filename: String },

    #[error("Invalid mail request: {0}")]
    InvalidRequest(String),

    /// Provider rejection; the message is stored verbatim on the document.
    #[error("{0}")]
    Provider(String),

    /// The store itself cannot be read or written. Fatal for the invocation:
    /// there is no document field left to record it in.
    #[error("Store error: {0}")]
    Store(String),
}

impl From<redis::RedisError> for DispatchError {
    fn from(err: redis::RedisError) -> Self {
        DispatchError::Store(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for DispatchError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        DispatchError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
