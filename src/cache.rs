//! LRU cache of finished renders, keyed by source text

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::styled_text::StyledText;

pub const DEFAULT_CACHE_SIZE: usize = 50;

pub struct RenderCache {
    cache: LruCache<String, StyledText>,
}

impl RenderCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Get a frozen render, promoting it in the LRU order
    #[must_use]
    pub fn get(&mut self, key: &str) -> Option<StyledText> {
        self.cache.get(key).cloned()
    }

    pub fn put(&mut self, key: &str, value: StyledText) {
        self.cache.put(key.to_string(), value);
    }

    pub fn clear(&mut self, key: &str) -> bool {
        self.cache.pop(key).is_some()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains(key)
    }

    pub fn clear_all(&mut self) {
        self.cache.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}
