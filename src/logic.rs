//! Adapter capabilities the resume strategy can use.
//!
//! An adapter may be able to mirror positions into a cache, to turn replayed
//! records back into positions, both, or neither. Each capability is an
//! optional field checked when it is needed.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

/// Capacity-bounded store for the latest known positions.
pub trait Cacheable<K, V>: Send + Sync {
    /// Maximum number of entries the cache holds. Zero or negative means no limit.
    ///
    /// Replay reads back at most this many records per partition.
    fn capacity(&self) -> i64;

    fn add(&self, key: K, value: V);
}

/// Turns replayed records back into positions.
pub trait Deserializable: Send {
    /// Handles a single record.
    ///
    /// Returns `true` to continue, or `false` to stop reading the current batch.
    fn deserialize(&mut self, key: &[u8], value: &[u8]) -> bool;
}

// Any closure with the right signature can act as a deserializer.
impl<T: FnMut(&[u8], &[u8]) -> bool + Send> Deserializable for T {
    fn deserialize(&mut self, key: &[u8], value: &[u8]) -> bool {
        self(key, value)
    }
}

/// Optional capabilities wired into a [`ResumeStrategy`](crate::strategy::ResumeStrategy).
pub struct ResumeAdapter<K, V> {
    cache: Option<Arc<dyn Cacheable<K, V>>>,
    // Locked so a replay can run while other threads publish through the same adapter.
    deserializer: Option<Mutex<Box<dyn Deserializable>>>,
}

impl<K, V> Default for ResumeAdapter<K, V> {
    fn default() -> Self {
        Self {
            cache: None,
            deserializer: None,
        }
    }
}

impl<K, V> ResumeAdapter<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cacheable<K, V>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_deserializer(mut self, deserializer: impl Deserializable + 'static) -> Self {
        self.deserializer = Some(Mutex::new(Box::new(deserializer)));
        self
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cacheable<K, V>>> {
        self.cache.as_ref()
    }

    pub fn is_cacheable(&self) -> bool {
        self.cache.is_some()
    }

    pub fn is_deserializable(&self) -> bool {
        self.deserializer.is_some()
    }

    pub(crate) fn deserializer(&self) -> Option<MutexGuard<'_, Box<dyn Deserializable>>> {
        self.deserializer.as_ref().map(|d| d.lock())
    }

    /// Number of trailing records per partition to replay, or 0 for all of them.
    pub fn replay_depth(&self) -> u64 {
        match &self.cache {
            Some(cache) if cache.capacity() >= 1 => cache.capacity() as u64,
            _ => 0,
        }
    }

    /// Adds a position to the cache, if there is one.
    pub fn mirror(&self, key: K, value: V) {
        if let Some(cache) = &self.cache {
            cache.add(key, value);
        }
    }
}

impl<K, V> std::fmt::Debug for ResumeAdapter<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeAdapter")
            .field("cacheable", &self.is_cacheable())
            .field("deserializable", &self.is_deserializable())
            .finish()
    }
}
