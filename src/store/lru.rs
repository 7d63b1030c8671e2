//! LRU entry table with byte accounting and per-entry expiry.
//!
//! The store pairs an `lru::LruCache` (which supplies the MRU to LRU
//! ordering and the key to slot mapping) with the bookkeeping the cache
//! engine needs on top of it: a tracked byte budget, per-entry deadlines,
//! and an eviction callback for values that stop being live.
//!
//! The store is NOT synchronized. The concurrent façade in `cache.rs` owns
//! the mutex; the expiry sweeper runs under that same mutex.

use crate::byteview::ByteView;
use lru::LruCache;
use std::time::{Duration, Instant};

/// Invoked whenever a value stops being live: capacity eviction, explicit
/// removal, expiry, or in-place replacement by a newer value for the same
/// key. Callbacks must not reenter the store.
pub type EvictionCallback = Box<dyn Fn(&str, &ByteView) + Send>;

struct Entry {
    value: ByteView,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }
}

/// An LRU table of cache entries bounded by a byte budget.
///
/// `capacity == 0` disables the bound. The tracked `used` counter always
/// equals the sum of `key.len() + value.len()` over live entries.
pub struct LruStore {
    capacity: u64,
    used: u64,
    entries: LruCache<String, Entry>,
    on_evicted: Option<EvictionCallback>,
}

impl LruStore {
    pub fn new(capacity: u64, on_evicted: Option<EvictionCallback>) -> Self {
        Self {
            capacity,
            used: 0,
            entries: LruCache::unbounded(),
            on_evicted,
        }
    }

    /// Inserts or replaces the value for `key` and promotes it to the MRU
    /// end. A zero `ttl` means the entry never expires. When the key is
    /// already present the old value is reported to the eviction callback
    /// before being replaced, since the caller may hold resources tied to
    /// it. Exceeding the byte budget evicts from the LRU end until the
    /// store fits again.
    pub fn add(&mut self, key: &str, value: ByteView, ttl: Duration) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        let new_len = value.len() as u64;

        let replaced_len = match self.entries.peek(key) {
            Some(old) => {
                if let Some(cb) = &self.on_evicted {
                    cb(key, &old.value);
                }
                Some(old.value.len() as u64)
            }
            None => None,
        };

        self.entries
            .put(key.to_string(), Entry { value, expires_at });

        match replaced_len {
            Some(old_len) => self.used = self.used + new_len - old_len,
            None => self.used += key.len() as u64 + new_len,
        }

        while self.capacity > 0 && self.used > self.capacity {
            if self.remove_oldest().is_none() {
                break;
            }
        }
    }

    /// Looks up `key`, promoting it to the MRU end on a hit. An entry whose
    /// deadline has passed is removed and reported as a miss.
    pub fn get(&mut self, key: &str) -> Option<ByteView> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        self.remove(key);
        None
    }

    /// Removes `key` from the store, firing the eviction callback.
    pub fn remove(&mut self, key: &str) -> Option<ByteView> {
        let entry = self.entries.pop(key)?;
        self.used -= key.len() as u64 + entry.value.len() as u64;
        if let Some(cb) = &self.on_evicted {
            cb(key, &entry.value);
        }
        Some(entry.value)
    }

    /// Pops the entry at the LRU end, firing the eviction callback.
    pub fn remove_oldest(&mut self) -> Option<(String, ByteView)> {
        let (key, entry) = self.entries.pop_lru()?;
        self.used -= key.len() as u64 + entry.value.len() as u64;
        if let Some(cb) = &self.on_evicted {
            cb(&key, &entry.value);
        }
        Some((key, entry.value))
    }

    /// Removes expired entries starting from the LRU end, stopping at the
    /// first live one. LRU order only approximates expiry order, so a tick
    /// may leave expired entries deeper in the list; those are reaped at
    /// `get` time instead. Returns how many entries were removed.
    pub fn sweep_expired(&mut self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        loop {
            let key = match self.entries.peek_lru() {
                Some((key, entry)) if entry.is_expired(now) => key.clone(),
                _ => break,
            };
            self.remove(&key);
            removed += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracked byte footprint of live entries.
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Drops every entry, firing the eviction callback for each.
    pub fn clear(&mut self) {
        while self.remove_oldest().is_some() {}
    }
}
