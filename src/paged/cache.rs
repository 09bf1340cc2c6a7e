//! Bounded cache of decoded page objects.
//!
//! Sits in front of the typed-accessor `get` to spare hot pages a decode
//! pass. Entries are immutable decoded values from the committed base
//! view; the transactional store removes entries whenever a commit or a
//! batch merge touches the same page numbers. Eviction is frequency-aware:
//! when the cache is full, the least-used entry goes first.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::paged::PageId;

/// Type-erased decoded value held by the cache.
pub type CachedObject = Arc<dyn Any + Send + Sync>;

struct Entry {
    value: CachedObject,
    uses: u64,
}

/// Frequency-aware decoded-object cache keyed by page number.
pub struct PageCache {
    inner: Mutex<HashMap<PageId, Entry>>,
    capacity: usize,
}

impl PageCache {
    /// Creates a cache holding at most `capacity` objects. A capacity of
    /// zero disables caching entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Looks up the object cached for `page`, bumping its use count.
    pub fn get(&self, page: PageId) -> Option<CachedObject> {
        let mut inner = self.inner.lock();
        let entry = inner.get_mut(&page)?;
        entry.uses = entry.uses.saturating_add(1);
        Some(entry.value.clone())
    }

    /// Caches `value` for `page`, evicting the least-used entry when full.
    pub fn put(&self, page: PageId, value: CachedObject) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if !inner.contains_key(&page) && inner.len() >= self.capacity {
            let victim = inner
                .iter()
                .min_by_key(|(_, entry)| entry.uses)
                .map(|(&page, _)| page);
            if let Some(victim) = victim {
                inner.remove(&victim);
            }
        }
        inner.insert(page, Entry { value, uses: 1 });
    }

    /// Drops the entry for `page`, if any.
    pub fn remove(&self, page: PageId) {
        self.inner.lock().remove(&page);
    }

    /// Drops the entries for every page in `pages`.
    pub fn remove_all<I: IntoIterator<Item = PageId>>(&self, pages: I) {
        let mut inner = self.inner.lock();
        for page in pages {
            inner.remove(&page);
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
