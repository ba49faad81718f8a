//! # Test Store
//!
//! Per-database key/value map with TTL bookkeeping. Expiration is checked on
//! access, mirroring how the server answers GET/TTL for expired keys.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// TTL state for a key, mirroring Redis `PTTL` semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    Missing,
    NoExpiry,
    ExpiresIn(Duration),
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    // Absolute expiration timestamp.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

type StoreKey = (u32, Vec<u8>);

#[derive(Debug, Default)]
pub struct Store {
    entries: Mutex<HashMap<StoreKey, Entry>>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    pub fn get(&self, db: u32, key: &[u8], now: Instant) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock();
        let slot = (db, key.to_vec());
        match entries.get(&slot) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(&slot);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Inserts or replaces a value; a plain SET clears any previous TTL.
    pub fn set(&self, db: u32, key: Vec<u8>, value: Vec<u8>, ttl: Option<Duration>, now: Instant) {
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
        };
        self.entries.lock().insert((db, key), entry);
    }

    pub fn delete(&self, db: u32, key: &[u8], now: Instant) -> bool {
        match self.entries.lock().remove(&(db, key.to_vec())) {
            Some(entry) => !entry.is_expired(now),
            None => false,
        }
    }

    /// Attaches a TTL to a live key. Returns false when the key is missing.
    pub fn expire(&self, db: u32, key: &[u8], ttl: Duration, now: Instant) -> bool {
        let mut entries = self.entries.lock();
        let slot = (db, key.to_vec());
        match entries.get_mut(&slot) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(&slot);
                false
            }
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            None => false,
        }
    }

    pub fn ttl(&self, db: u32, key: &[u8], now: Instant) -> TtlStatus {
        let mut entries = self.entries.lock();
        let slot = (db, key.to_vec());
        let expires_at = match entries.get(&slot) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(&slot);
                return TtlStatus::Missing;
            }
            Some(entry) => entry.expires_at,
            None => return TtlStatus::Missing,
        };
        match expires_at {
            Some(deadline) => TtlStatus::ExpiresIn(deadline - now),
            None => TtlStatus::NoExpiry,
        }
    }

    /// Drops a key as if its TTL had elapsed.
    pub fn force_expire(&self, db: u32, key: &[u8]) -> bool {
        self.entries.lock().remove(&(db, key.to_vec())).is_some()
    }

    /// Number of live keys in `db`.
    pub fn len(&self, db: u32, now: Instant) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|((entry_db, _), entry)| *entry_db == db && !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self, db: u32, now: Instant) -> bool {
        self.len(db, now) == 0
    }

    pub fn flush(&self, db: u32) {
        self.entries.lock().retain(|(entry_db, _), _| *entry_db != db);
    }
}
