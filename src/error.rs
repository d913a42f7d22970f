// for error definitions
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimiterError {
    /// Invalid construction or call arguments: conflicting backend sources,
    /// non-positive limit/window, unknown algorithm name, empty key
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection string names a scheme no backend understands
    #[error("Unsupported storage: {0}")]
    UnsupportedStorage(String),

    /// The storage operation could not complete
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(#[from] StorageError),

    /// Raised only by `RateLimitResult::check` when the caller opts in
    #[error("Rate limit exceeded: limit {limit}, retry after {retry_after:?}")]
    RateLimitExceeded { limit: u64, retry_after: Duration },
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// The backend did not answer in time
    #[error("Storage operation timed out: {0}")]
    Timeout(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// Local store is full and nothing could be evicted
    #[error("Maximum entries limit exceeded ({0})")]
    CapacityExceeded(usize),
}

impl RateLimiterError {
    /// True for failures of the storage layer, as opposed to caller mistakes.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, RateLimiterError::BackendUnavailable(_))
    }
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return StorageError::Timeout(err.to_string());
        }
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => StorageError::RedisAuth(err.to_string()),
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                StorageError::RedisConnection(err.to_string())
            }
            redis::ErrorKind::TypeError => StorageError::Serialization(err.to_string()),
            _ => StorageError::RedisCommand(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for RateLimiterError {
    fn from(err: redis::RedisError) -> Self {
        RateLimiterError::BackendUnavailable(err.into())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// implement conversions from serde_json::Error to RateLimiterError
impl From<serde_json::Error> for RateLimiterError {
    fn from(err: serde_json::Error) -> Self {
        RateLimiterError::BackendUnavailable(err.into())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, RateLimiterError>;
