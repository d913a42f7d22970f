// src/storage/memory.rs

// In-memory storage (for single-process deployments and tests)
// State lives in a sharded map; each shard's lock is held for the whole
// read-modify-write of a key, so updates of one key serialize while
// unrelated keys in other shards proceed in parallel.
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::InMemoryConfig;
use crate::error::{Result, StorageError};
use crate::storage::{StorageBackend, Transition};
use crate::storage_op;

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at_ms: i64,
}

impl MemoryEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

type EntryMap = DashMap<String, MemoryEntry>;

/// In-memory storage backend implementation
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Arc<EntryMap>,
    /// Slots taken in `data`; a new key reserves one before it is inserted
    slots: Arc<AtomicUsize>,
    config: InMemoryConfig,
    clock: Arc<dyn Clock>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MemoryStorage {
    /// Creates a new in-memory storage with the given configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a storage whose TTLs are measured against `clock`
    pub fn with_clock(config: InMemoryConfig, clock: Arc<dyn Clock>) -> Self {
        let data = Arc::new(DashMap::with_capacity(config.max_entries.min(10_000)));
        let slots = Arc::new(AtomicUsize::new(0));

        let sweeper = if config.use_background_task {
            Self::spawn_sweeper(
                Arc::downgrade(&data),
                Arc::clone(&slots),
                Arc::clone(&clock),
                config.cleanup_interval,
            )
        } else {
            None
        };

        Self {
            data,
            slots,
            config,
            clock,
            sweeper: Arc::new(Mutex::new(sweeper)),
        }
    }

    /// Background task that evicts expired entries. It holds only a weak
    /// reference so it winds down once every storage handle is dropped.
    fn spawn_sweeper(
        data: Weak<EntryMap>,
        slots: Arc<AtomicUsize>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; in-memory expiry falls back to lazy checks only");
            return None;
        };

        Some(runtime.spawn(async move {
            let mut interval = time::interval(period);
            loop {
                interval.tick().await;
                let Some(data) = data.upgrade() else {
                    break;
                };
                let removed = Self::cleanup_expired_entries(&data, &slots, clock.now_millis());
                if removed > 0 {
                    debug!(removed, "Swept expired rate limit entries");
                }
            }
        }))
    }

    /// Clean up expired entries, returning how many were removed
    fn cleanup_expired_entries(data: &EntryMap, slots: &AtomicUsize, now_ms: i64) -> usize {
        let mut removed = 0;
        data.retain(|_, entry| {
            let keep = !entry.is_expired(now_ms);
            if !keep {
                removed += 1;
                slots.fetch_sub(1, Ordering::AcqRel);
            }
            keep
        });
        removed
    }

    /// Number of live (unexpired) keys
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.data.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts expired entries when the map looks full, so a new key can find
    /// a free slot. Must not be called while holding an entry guard.
    fn make_room(&self, key: &str, now_ms: i64) {
        if self.slots.load(Ordering::Acquire) >= self.config.max_entries
            && !self.data.contains_key(key)
        {
            Self::cleanup_expired_entries(&self.data, &self.slots, now_ms);
        }
    }

    /// Claims a slot for a new key; fails once `max_entries` slots are taken
    fn reserve_slot(&self) -> Result<()> {
        let max = self.config.max_entries;
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < max).then_some(taken + 1)
            })
            .map(|_| ())
            .map_err(|_| StorageError::CapacityExceeded(max).into())
    }

    /// The whole read-modify-write under the shard lock. No await points, so
    /// the guard can never be held across a suspension.
    fn update_entry<T>(&self, key: &str, ttl: Duration, transition: &T) -> Result<T::Outcome>
    where
        T: Transition,
    {
        let now = self.clock.now_millis();
        self.make_room(key, now);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = now.saturating_add(ttl_ms);

        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = if occupied.get().is_expired(now) {
                    None
                } else {
                    Some(serde_json::from_slice(&occupied.get().value)?)
                };
                let (state, outcome) = transition.apply(current);
                let value = serde_json::to_vec(&state)?;
                *occupied.get_mut() = MemoryEntry {
                    value,
                    expires_at_ms,
                };
                Ok(outcome)
            }
            Entry::Vacant(vacant) => {
                let (state, outcome) = transition.apply(None);
                let value = serde_json::to_vec(&state)?;
                self.reserve_slot()?;
                vacant.insert(MemoryEntry {
                    value,
                    expires_at_ms,
                });
                Ok(outcome)
            }
        }
    }

    fn clear_entries(data: &EntryMap, slots: &AtomicUsize) -> usize {
        let mut dropped = 0;
        data.retain(|_, _| {
            dropped += 1;
            slots.fetch_sub(1, Ordering::AcqRel);
            false
        });
        dropped
    }

    fn read_entry<S: DeserializeOwned>(&self, key: &str) -> Result<Option<S>> {
        let now = self.clock.now_millis();
        match self.data.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(serde_json::from_slice(&entry.value)?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load<S>(&self, key: &str) -> Result<Option<S>>
    where
        S: DeserializeOwned + Send + 'static,
    {
        self.read_entry(key)
    }

    async fn atomic_update<T>(&self, key: &str, ttl: Duration, transition: &T) -> Result<T::Outcome>
    where
        T: Transition + 'static,
    {
        let started = Instant::now();
        let result = self.update_entry(key, ttl, transition);
        storage_op!(
            "atomic_update",
            key,
            result,
            started.elapsed().as_millis() as u64
        );
        result
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let handle = match self.sweeper.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        let dropped = Self::clear_entries(&self.data, &self.slots);
        info!(dropped, "In-memory rate limit storage shut down");
        Ok(())
    }
}
