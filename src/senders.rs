//! Thread id to first-sender cache

use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use tracing::debug;

use crate::error::Result;
use crate::models::ThreadDetail;

enum Storage {
    Unbounded(HashMap<String, String>),
    Bounded(LruCache<String, String>),
}

/// Remembers the resolved first sender of every thread seen so far
///
/// A thread's sender is fetched at most once and never re-validated. By
/// default the cache never evicts; with a capacity it becomes an LRU and an
/// evicted thread is simply fetched again the next time it shows up.
pub struct SenderCache {
    storage: Storage,
    hits: u64,
    misses: u64,
}

impl SenderCache {
    pub fn unbounded() -> Self {
        Self {
            storage: Storage::Unbounded(HashMap::new()),
            hits: 0,
            misses: 0,
        }
    }

    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            storage: Storage::Bounded(LruCache::new(capacity)),
            hits: 0,
            misses: 0,
        }
    }

    /// Unbounded for `None` (or zero), LRU of that size otherwise
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    /// Cached sender for a thread, if any
    pub fn get(&mut self, thread_id: &str) -> Option<String> {
        match &mut self.storage {
            Storage::Unbounded(map) => map.get(thread_id).cloned(),
            Storage::Bounded(lru) => lru.get(thread_id).cloned(),
        }
    }

    fn insert(&mut self, thread_id: String, sender: String) {
        match &mut self.storage {
            Storage::Unbounded(map) => {
                map.insert(thread_id, sender);
            }
            Storage::Bounded(lru) => {
                lru.put(thread_id, sender);
            }
        }
    }

    /// Sender of `thread_id`, calling `fetch_thread` only on a cache miss
    ///
    /// A failed fetch caches nothing.
    pub async fn resolve_sender<F, Fut>(&mut self, thread_id: &str, fetch_thread: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ThreadDetail>>,
    {
        if let Some(sender) = self.get(thread_id) {
            self.hits += 1;
            return Ok(sender);
        }

        self.misses += 1;
        debug!("Fetching thread messages for {}", thread_id);
        let thread = fetch_thread().await?;
        let sender = thread.first_sender();

        self.insert(thread_id.to_string(), sender.clone());
        Ok(sender)
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Unbounded(map) => map.len(),
            Storage::Bounded(lru) => lru.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) since the cache was created
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

impl Default for SenderCache {
    fn default() -> Self {
        Self::unbounded()
    }
}
