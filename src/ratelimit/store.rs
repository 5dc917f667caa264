//! Counter store trait and the in-memory implementation.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::clock::{Clock, Timestamp};
use super::counter::CounterEntry;
use super::key::CounterKey;
use crate::error::StoreError;

/// Storage of window counters.
///
/// This trait abstracts over in-process and remote stores so the rate
/// limiter can work with either. `increment` must be linearizable per key:
/// concurrent increments of one key never lose updates. Increments of
/// different keys may run fully in parallel.
///
/// A store that cannot create-if-absent atomically may admit at most one
/// extra request per key when several first arrivals race to open a new
/// window. [`MemoryCounterStore`] admits none.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one hit for `key`.
    ///
    /// Opens a fresh window `[now, now + window)` with a count of 1 when no
    /// live entry exists (absent, or `now >= window_end`), otherwise bumps
    /// the live entry. Returns the entry after the update.
    async fn increment(
        &self,
        key: &CounterKey,
        window: Duration,
        now: Timestamp,
    ) -> Result<CounterEntry, StoreError>;

    /// Read an entry without counting. May lag behind `increment`, and may
    /// return an entry whose window has already closed.
    async fn peek(&self, key: &CounterKey) -> Result<Option<CounterEntry>, StoreError>;

    /// Drop entries whose window has closed at `now`. Returns how many were
    /// removed.
    async fn purge_expired(&self, _now: Timestamp) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// In-process counter store.
///
/// Each increment runs under the map's per-shard entry lock, which makes
/// the read-check-write of one key a single atomic step.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<CounterKey, CounterEntry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored counters, live or not.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        key: &CounterKey,
        window: Duration,
        now: Timestamp,
    ) -> Result<CounterEntry, StoreError> {
        let entry = match self.counters.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get_mut();
                if current.is_live(now) {
                    current.count += 1;
                } else {
                    trace!(key = %key, "Window expired, opening a new one");
                    *current = CounterEntry::first_hit(now, window);
                }
                *current
            }
            Entry::Vacant(vacant) => {
                debug!(key = %key, window_secs = window.as_secs(), "Creating new counter");
                *vacant.insert(CounterEntry::first_hit(now, window))
            }
        };

        Ok(entry)
    }

    async fn peek(&self, key: &CounterKey) -> Result<Option<CounterEntry>, StoreError> {
        Ok(self.counters.get(key).map(|entry| *entry))
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.counters.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        Ok(removed)
    }
}

/// Periodically purge expired counters from `store`.
pub fn spawn_sweeper(
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.purge_expired(clock.now()).await {
                Ok(0) => {}
                Ok(removed) => debug!(removed = removed, "Purged expired counters"),
                Err(e) => warn!(error = %e, "Failed to purge expired counters"),
            }
        }
    })
}
