// library entry
pub mod algorithms;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod rules;
pub mod storage;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use algorithms::{AlgorithmKind, RateLimitAlgorithm, RateLimitResult};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FailurePolicy, InMemoryConfig, RateLimiterConfig, RedisConfig};
pub use engine::{Engine, MAX_LIMIT, MAX_WINDOW};
pub use error::{RateLimiterError, Result, StorageError};
pub use limiter::{RateLimiter, RateLimiterBuilder};
pub use logging::init as init_logging;
pub use rules::{Quota, RuleRegistry};
pub use storage::{Backend, MemoryStorage, RedisStorage, StorageBackend};
