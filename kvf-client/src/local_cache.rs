//! Local read-side cache of GET replies.
//!
//! Entries live for `min(max_age, remaining server TTL)`. Writes through the
//! same client invalidate the key and bump an epoch; a GET that started before
//! the bump does not populate the cache, so a racing read cannot resurrect a
//! value the client itself just overwrote.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Local cache sizing and staleness bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCacheOptions {
    /// Longest time a cached reply may be served without asking the server.
    pub max_age: Duration,
    /// Maximum number of cached keys.
    pub capacity: usize,
}

impl Default for LocalCacheOptions {
    fn default() -> Self {
        LocalCacheOptions {
            max_age: Duration::from_secs(5),
            capacity: 10_000,
        }
    }
}

struct LocalEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

struct CacheState {
    entries: HashMap<Vec<u8>, LocalEntry>,
    epoch: u64,
}

pub(crate) struct LocalCache {
    options: LocalCacheOptions,
    state: Mutex<CacheState>,
}

impl LocalCache {
    pub(crate) fn new(options: LocalCacheOptions) -> Self {
        LocalCache {
            options,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                epoch: 0,
            }),
        }
    }

    pub(crate) fn get(&self, key: &[u8], now: Instant) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let fresh = state.entries.get(key).map(|entry| entry.expires_at > now)?;
        if fresh {
            return state.entries.get(key).map(|entry| entry.value.clone());
        }
        state.entries.remove(key);
        None
    }

    /// Epoch to pass to `insert_if_current` after the server round trip.
    pub(crate) fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub(crate) fn insert_if_current(
        &self,
        epoch: u64,
        key: &[u8],
        value: Vec<u8>,
        server_ttl: Option<Duration>,
        now: Instant,
    ) -> bool {
        let age = match server_ttl {
            Some(ttl) => ttl.min(self.options.max_age),
            None => self.options.max_age,
        };
        if age.is_zero() {
            return false;
        }

        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        if state.entries.len() >= self.options.capacity && !state.entries.contains_key(key) {
            state.entries.retain(|_, entry| entry.expires_at > now);
            if state.entries.len() >= self.options.capacity {
                return false;
            }
        }
        state.entries.insert(
            key.to_vec(),
            LocalEntry {
                value,
                expires_at: now + age,
            },
        );
        true
    }

    pub(crate) fn invalidate(&self, key: &[u8]) {
        let mut state = self.state.lock();
        state.entries.remove(key);
        state.epoch = state.epoch.wrapping_add(1);
    }

    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.epoch = state.epoch.wrapping_add(1);
    }
}
