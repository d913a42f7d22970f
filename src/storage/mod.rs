// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::MemoryStorage;
pub use redis::RedisStorage;

use super::error::Result;
use ::redis::Script;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;

/// One read-modify-write step over the state of a single key.
///
/// The local backend runs `apply` while holding the key's shard lock. The
/// shared backend runs `script` inside Redis, which must compute exactly what
/// `apply` computes. Script calling convention:
///
/// * `KEYS[1]` is the storage key
/// * `ARGV[1]` is the TTL in milliseconds
/// * `ARGV[2..]` are the values from `script_args`, in order
///
/// The script returns the outcome encoded as JSON. [`SCRIPT_PRELUDE`] sets up
/// `state` (decoded current value or `nil`) and `store(new_state)`.
pub trait Transition: Send + Sync {
    /// Per-key state persisted by the backend
    type State: Serialize + DeserializeOwned + Send;

    /// What the caller learns from the step
    type Outcome: Serialize + DeserializeOwned + Send;

    /// Computes the next state from the current one (`None` when absent or expired)
    fn apply(&self, current: Option<Self::State>) -> (Self::State, Self::Outcome);

    /// Lua equivalent of `apply` for server-side execution
    fn script(&self) -> &'static Script;

    /// Arguments passed after the TTL
    fn script_args(&self) -> Vec<i64>;
}

/// Lua shared by every transition script: decodes the current state and
/// provides `store`, which writes the new state and its TTL in one command.
pub const SCRIPT_PRELUDE: &str = r#"
local ttl_ms = tonumber(ARGV[1])
local raw = redis.call('GET', KEYS[1])
local state = nil
if raw then
    state = cjson.decode(raw)
end
local function store(new_state)
    redis.call('SET', KEYS[1], cjson.encode(new_state), 'PX', ttl_ms)
end
"#;

/// Builds a transition script from the shared prelude and a body
pub fn transition_script(body: &str) -> Script {
    Script::new(&[SCRIPT_PRELUDE, body].concat())
}

/// Core trait that all storage backends must implement
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Reads the current state of a key, `None` if absent or expired
    async fn load<S>(&self, key: &str) -> Result<Option<S>>
    where
        S: DeserializeOwned + Send + 'static;

    /// Applies `transition` to the key's state and writes the result back
    /// with the given TTL as a single indivisible operation.
    ///
    /// Concurrent updates of the same key serialize. On error nothing is
    /// written.
    async fn atomic_update<T>(&self, key: &str, ttl: Duration, transition: &T) -> Result<T::Outcome>
    where
        T: Transition + 'static;

    /// Verifies the backend can serve requests
    async fn health_check(&self) -> Result<()>;

    /// Releases background tasks and connections
    async fn shutdown(&self) -> Result<()>;
}

/// The closed set of storage backends, chosen once at construction
#[derive(Debug, Clone)]
pub enum Backend {
    /// In-process, lock-guarded map
    Memory(MemoryStorage),
    /// Redis, shared by cooperating instances
    Redis(RedisStorage),
}

#[async_trait]
impl StorageBackend for Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::Memory(storage) => storage.name(),
            Backend::Redis(storage) => storage.name(),
        }
    }

    async fn load<S>(&self, key: &str) -> Result<Option<S>>
    where
        S: DeserializeOwned + Send + 'static,
    {
        match self {
            Backend::Memory(storage) => storage.load(key).await,
            Backend::Redis(storage) => storage.load(key).await,
        }
    }

    async fn atomic_update<T>(&self, key: &str, ttl: Duration, transition: &T) -> Result<T::Outcome>
    where
        T: Transition + 'static,
    {
        match self {
            Backend::Memory(storage) => storage.atomic_update(key, ttl, transition).await,
            Backend::Redis(storage) => storage.atomic_update(key, ttl, transition).await,
        }
    }

    async fn health_check(&self) -> Result<()> {
        match self {
            Backend::Memory(storage) => storage.health_check().await,
            Backend::Redis(storage) => storage.health_check().await,
        }
    }

    async fn shutdown(&self) -> Result<()> {
        match self {
            Backend::Memory(storage) => storage.shutdown().await,
            Backend::Redis(storage) => storage.shutdown().await,
        }
    }
}
