use std::{collections::HashMap, sync::Arc};

use log::debug;

use crate::{
    storage::page::Page,
    types::Pod,
    utils::HandyRwLock,
};

struct CacheEntry {
    page: Pod<Page>,
    last_access: u64,
}

/// Page cache keyed by page address, bounded by a byte budget with an
/// approximate-LRU eviction policy.
///
/// Dirty pages and pages still referenced outside the cache (an open
/// changeset holds such references) are never evicted. A clean page is
/// simply dropped; re-fetching it reads from the device again.
pub struct PageCache {
    entries: HashMap<u64, CacheEntry>,
    tick: u64,
    capacity_bytes: usize,
    page_size: usize,
}

impl PageCache {
    pub fn new(capacity_bytes: usize, page_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            tick: 0,
            capacity_bytes,
            page_size,
        }
    }

    pub fn get(&mut self, address: u64) -> Option<Pod<Page>> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(&address)?;
        entry.last_access = tick;
        Some(entry.page.clone())
    }

    pub fn insert(&mut self, page: Pod<Page>) {
        self.tick += 1;
        let address = page.rl().address();
        self.entries.insert(
            address,
            CacheEntry {
                page,
                last_access: self.tick,
            },
        );
        self.purge();
    }

    pub fn remove(&mut self, address: u64) {
        self.entries.remove(&address);
    }

    pub fn contains(&self, address: u64) -> bool {
        self.entries.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Addresses of all dirty pages, in ascending order.
    pub fn dirty_addresses(&self) -> Vec<u64> {
        let mut addresses: Vec<u64> = self
            .entries
            .values()
            .filter(|e| e.page.rl().is_dirty())
            .map(|e| e.page.rl().address())
            .collect();
        addresses.sort_unstable();
        addresses
    }

    pub fn over_budget(&self) -> bool {
        self.entries.len() * self.page_size > self.capacity_bytes
    }

    /// Drops clean, unreferenced pages until the byte budget is met.
    /// Pages that cannot be evicted (dirty, or pinned through an
    /// outstanding reference) are skipped; the budget is a target, not
    /// a hard limit.
    pub fn purge(&mut self) {
        while self.entries.len() * self.page_size > self.capacity_bytes {
            let victim = self
                .entries
                .iter()
                .filter(|(_, e)| {
                    Arc::strong_count(&e.page) == 1 && !e.page.rl().is_dirty()
                })
                .min_by_key(|(_, e)| e.last_access)
                .map(|(address, _)| *address);

            match victim {
                Some(address) => {
                    debug!("evicting clean page {:#x}", address);
                    self.entries.remove(&address);
                }
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageType;
    use crate::types::new_pod;

    fn page(address: u64) -> Pod<Page> {
        let mut p = Page::new_empty(address, 1024, PageType::BTreeLeaf);
        p.set_dirty(false);
        new_pod(p)
    }

    #[test]
    fn test_evicts_least_recently_used_clean_page() {
        let mut cache = PageCache::new(2 * 1024, 1024);
        cache.insert(page(0));
        cache.insert(page(1024));
        // touch page 0 so that 1024 is the eviction victim
        cache.get(0);
        cache.insert(page(2048));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(0));
        assert!(!cache.contains(1024));
    }

    #[test]
    fn test_dirty_and_pinned_pages_survive() {
        let mut cache = PageCache::new(1024, 1024);

        let dirty = page(0);
        dirty.wl().set_dirty(true);
        cache.insert(dirty);

        let pinned = page(1024);
        let _pin = pinned.clone();
        cache.insert(pinned);

        // the newcomer is the only evictable page and goes first
        cache.insert(page(2048));
        assert!(cache.contains(0));
        assert!(cache.contains(1024));
        assert!(!cache.contains(2048));
    }
}
