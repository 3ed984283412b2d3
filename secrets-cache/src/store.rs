//! Bounded, TTL-aware in-memory store for one node.
//!
//! Entries are charged `key.len() + value.len()` bytes against a fixed
//! budget. When an insert would exceed the budget the oldest-inserted entries
//! are evicted first; overwriting a key counts as a new insertion. Expired
//! entries are dropped lazily on read and in bulk by [`LocalStore::purge_expired`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use secrets_core::{expires_after, CacheResult, Loaded, StorageError, Timestamp};

#[derive(Debug)]
struct Entry {
    value: Loaded,
    seq: u64,
    charge: usize,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Insertion order: sequence number -> key.
    order: BTreeMap<u64, String>,
    next_seq: u64,
    bytes: usize,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        self.bytes -= entry.charge;
        Some(entry)
    }
}

/// Usage counters for a [`LocalStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub items: u64,
    pub bytes: u64,
    pub max_bytes: u64,
}

impl StoreStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Byte-bounded key/value store with per-entry expiry.
#[derive(Debug)]
pub struct LocalStore {
    inner: RwLock<Inner>,
    max_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl LocalStore {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn read(&self) -> CacheResult<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write(&self) -> CacheResult<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Look up a live entry.
    pub fn get(&self, key: &str) -> CacheResult<Option<Loaded>> {
        self.get_at(key, Utc::now())
    }

    /// Look up a live entry as of `now`, dropping it if it has expired.
    pub fn get_at(&self, key: &str, now: Timestamp) -> CacheResult<Option<Loaded>> {
        {
            let inner = self.read()?;
            match inner.entries.get(key) {
                Some(entry) if !entry.value.is_expired_at(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
            }
        }

        // Expired: re-check under the write lock, a concurrent set may have
        // refreshed it in between.
        let mut inner = self.write()?;
        let expired = inner
            .entries
            .get(key)
            .map(|entry| entry.value.is_expired_at(now))
            .unwrap_or(false);
        if expired {
            inner.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        } else if let Some(entry) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(entry.value.clone()));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Store `value` under `key` for `ttl` from now.
    pub fn set(&self, key: &str, value: impl Into<Vec<u8>>, ttl: Duration) -> CacheResult<()> {
        let value: Vec<u8> = value.into();
        self.insert(key, Loaded::new(value, expires_after(Utc::now(), ttl)))
    }

    /// Store an already-stamped value, evicting oldest entries to make room.
    ///
    /// A value that has already expired is silently dropped. A value larger
    /// than the whole budget is rejected with [`StorageError::EntryTooLarge`].
    pub fn insert(&self, key: &str, value: Loaded) -> CacheResult<()> {
        self.insert_at(key, value, Utc::now())
    }

    pub fn insert_at(&self, key: &str, value: Loaded, now: Timestamp) -> CacheResult<()> {
        if value.is_expired_at(now) {
            return Ok(());
        }
        let charge = key.len() + value.value().len();
        if charge > self.max_bytes {
            return Err(StorageError::EntryTooLarge {
                key: key.to_string(),
                size: charge,
                budget: self.max_bytes,
            }
            .into());
        }

        let mut inner = self.write()?;
        inner.remove(key);
        while inner.bytes + charge > self.max_bytes {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.bytes -= evicted.charge;
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.to_string());
        inner.bytes += charge;
        inner
            .entries
            .insert(key.to_string(), Entry { value, seq, charge });
        Ok(())
    }

    /// Drop `key` if present.
    pub fn remove(&self, key: &str) -> CacheResult<bool> {
        Ok(self.write()?.remove(key).is_some())
    }

    /// Drop every entry that has expired. Returns how many were dropped.
    pub fn purge_expired(&self) -> CacheResult<usize> {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: Timestamp) -> CacheResult<usize> {
        let mut inner = self.write()?;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.value.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        Ok(expired.len())
    }

    pub fn len(&self) -> CacheResult<usize> {
        Ok(self.read()?.entries.len())
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Bytes currently charged against the budget.
    pub fn bytes(&self) -> CacheResult<usize> {
        Ok(self.read()?.bytes)
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn stats(&self) -> CacheResult<StoreStats> {
        let inner = self.read()?;
        Ok(StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            items: inner.entries.len() as u64,
            bytes: inner.bytes as u64,
            max_bytes: self.max_bytes as u64,
        })
    }

    /// Keys in eviction order, oldest first.
    pub fn keys_oldest_first(&self) -> CacheResult<Vec<String>> {
        Ok(self.read()?.order.values().cloned().collect())
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let inner = self.inner.read().expect("store lock");
        assert_eq!(inner.entries.len(), inner.order.len());
        let mut charged = 0;
        for (seq, key) in &inner.order {
            let entry = inner.entries.get(key).expect("ordered key has an entry");
            assert_eq!(entry.seq, *seq);
            charged += entry.charge;
        }
        assert_eq!(charged, inner.bytes);
        assert!(inner.bytes <= self.max_bytes);
    }
}
