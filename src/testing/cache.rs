//! Position cache and string-keyed positions for tests.

use crate::{Resumable, logic::Cacheable, logic::Deserializable};

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

/// Cache keeping the most recently added entries, up to its capacity.
///
/// Adding an existing key replaces its value and makes it the newest entry.
/// A capacity of zero or less never evicts.
#[derive(Debug)]
pub struct MemoryCache<K, V> {
    capacity: i64,
    entries: Mutex<VecDeque<(K, V)>>,
}

impl<K: PartialEq + Clone, V: Clone> MemoryCache<K, V> {
    pub fn new(capacity: i64) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .lock()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Keys from oldest to newest.
    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<K, V> Cacheable<K, V> for MemoryCache<K, V>
where
    K: PartialEq + Send,
    V: Send,
{
    fn capacity(&self) -> i64 {
        self.capacity
    }

    fn add(&self, key: K, value: V) {
        let mut entries = self.entries.lock();
        entries.retain(|(k, _)| *k != key);
        entries.push_back((key, value));

        if self.capacity > 0 {
            while entries.len() as i64 > self.capacity {
                entries.pop_front();
            }
        }
    }
}

/// A named stream and how far it has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub key: String,
    pub offset: i64,
}

impl Position {
    pub fn new(key: impl Into<String>, offset: i64) -> Self {
        Self {
            key: key.into(),
            offset,
        }
    }
}

impl Resumable for Position {
    type Key = String;
    type Offset = i64;

    fn offset_key(&self) -> String {
        self.key.clone()
    }

    fn last_offset(&self) -> i64 {
        self.offset
    }
}

/// Reads back an offset written by the `i64` serializer.
pub fn decode_offset(bytes: &[u8]) -> Option<i64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(i64::from_be_bytes(raw))
}

/// Deserializer loading [`Position`] records into a [`MemoryCache`].
///
/// Can be told to ask for a stop after its n-th record. The record that
/// triggers the stop is still loaded.
#[derive(Debug, Clone)]
pub struct CacheLoader {
    cache: Arc<MemoryCache<String, i64>>,
    stop_at: Option<usize>,
    seen: Arc<AtomicUsize>,
}

impl CacheLoader {
    pub fn new(cache: Arc<MemoryCache<String, i64>>) -> Self {
        Self {
            cache,
            stop_at: None,
            seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns `false` on the n-th record seen (1-based), and only that one.
    pub fn stop_at(mut self, n: usize) -> Self {
        self.stop_at = Some(n);
        self
    }

    /// Shared count of records handed to this loader, readable after it was moved.
    pub fn seen(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.seen)
    }
}

impl Deserializable for CacheLoader {
    fn deserialize(&mut self, key: &[u8], value: &[u8]) -> bool {
        let seen = self.seen.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(offset) = decode_offset(value) {
            let key = String::from_utf8_lossy(key).into_owned();
            self.cache.add(key, offset);
        }

        self.stop_at != Some(seen)
    }
}
