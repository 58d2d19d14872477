use std::sync::Arc;

use log::debug;

use crate::{
    error::OakError,
    storage::{
        cache::PageCache,
        device::Device,
        freelist::Freelist,
        page::{Page, PageType},
    },
    types::{new_pod, OakResult, Pod, ResultPod},
    utils::HandyRwLock,
};

/// plain cached fetch, the page may be modified
pub const FETCH_READ_ONLY: u32 = 0x1;

/// the caller overwrites the whole page, skip the device read
pub const FETCH_NO_READ: u32 = 0x2;

/// Hands out page handles backed by the device, caches them up to a
/// byte budget and owns the freelist.
pub struct PageManager {
    device: Arc<dyn Device>,
    cache: PageCache,
    freelist: Freelist,
    page_size: usize,
    /// blob id of the persisted freelist, 0 when not persisted
    freelist_blob_id: u64,
}

impl PageManager {
    pub fn new(device: Arc<dyn Device>, page_size: usize, cache_capacity_bytes: usize) -> Self {
        Self {
            device,
            cache: PageCache::new(cache_capacity_bytes, page_size),
            freelist: Freelist::new(),
            page_size,
            freelist_blob_id: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn device(&self) -> Arc<dyn Device> {
        self.device.clone()
    }

    pub fn freelist(&self) -> &Freelist {
        &self.freelist
    }

    pub fn set_freelist(&mut self, freelist: Freelist) {
        self.freelist = freelist;
    }

    pub fn freelist_blob_id(&self) -> u64 {
        self.freelist_blob_id
    }

    pub fn set_freelist_blob_id(&mut self, blob_id: u64) {
        self.freelist_blob_id = blob_id;
    }

    /// Returns the cached page, or reads it from the device.
    pub fn fetch(&mut self, address: u64, flags: u32) -> ResultPod<Page> {
        if let Some(page) = self.cache.get(address) {
            return Ok(page);
        }

        let page = if flags & FETCH_NO_READ != 0 {
            let mut page = Page::new_empty(address, self.page_size, PageType::Blob);
            page.set_dirty(false);
            page
        } else {
            let mut buf = vec![0u8; self.page_size];
            self.device.read(address, &mut buf)?;
            Page::from_bytes(address, buf)
        };

        let pod = new_pod(page);
        self.cache.insert(pod.clone());
        self.make_room()?;
        Ok(pod)
    }

    /// Batched fetch; the cache is filled for every address.
    pub fn fetch_multiple(&mut self, addresses: &[u64]) -> Result<Vec<Pod<Page>>, OakError> {
        let mut pages = Vec::with_capacity(addresses.len());
        for address in addresses {
            pages.push(self.fetch(*address, 0)?);
        }
        Ok(pages)
    }

    /// Returns a free page, zeroed and stamped with `ptype`. The
    /// freelist is consulted first, then the device is extended.
    pub fn alloc(&mut self, ptype: PageType) -> ResultPod<Page> {
        let address = match self.freelist.alloc(self.page_size as u64) {
            Some(address) => address,
            None => self.device.alloc(self.page_size as u64)?,
        };
        debug!("alloc page {:#x}, type {:?}", address, ptype);

        let page = new_pod(Page::new_empty(address, self.page_size, ptype));
        self.cache.insert(page.clone());
        self.make_room()?;
        Ok(page)
    }

    /// Allocates a contiguous page-aligned region of at least `bytes`
    /// bytes (used for blobs that span pages). The region is not
    /// cached.
    pub fn alloc_region(&mut self, bytes: u64) -> Result<u64, OakError> {
        let size = self.region_size(bytes);
        let address = match self.freelist.alloc(size) {
            Some(address) => address,
            None => self.device.alloc(size)?,
        };
        Ok(address)
    }

    /// Rounds a byte count up to a whole number of pages.
    pub fn region_size(&self, bytes: u64) -> u64 {
        let ps = self.page_size as u64;
        ((bytes + ps - 1) / ps) * ps
    }

    /// Returns the page's range to the freelist and forgets the cached
    /// copy.
    pub fn free_page(&mut self, page: &Pod<Page>) {
        let address = page.rl().address();
        debug!("free page {:#x}", address);
        self.cache.remove(address);
        self.freelist.free(address, self.page_size as u64);
    }

    pub fn free_region(&mut self, address: u64, bytes: u64) {
        let size = self.region_size(bytes);
        self.freelist.free(address, size);
    }

    /// Writes every dirty page to the device in ascending-address
    /// order and clears the dirty bits.
    pub fn flush_all(&mut self) -> OakResult {
        for address in self.cache.dirty_addresses() {
            let page = match self.cache.get(address) {
                Some(page) => page,
                None => continue,
            };
            let mut page = page.wl();
            debug!("flushing page {:#x}", address);
            self.device.write(address, page.raw_data())?;
            page.set_dirty(false);
        }
        Ok(())
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Hands an externally held page back to the cache; used after
    /// recovery rewrote page images on the device.
    pub fn put_page(&mut self, page: Pod<Page>) {
        self.cache.insert(page);
    }

    /// When the cache exceeds its budget and every page is dirty, the
    /// dirty set is flushed so that eviction candidates exist again.
    fn make_room(&mut self) -> OakResult {
        if !self.cache.over_budget() {
            return Ok(());
        }
        self.cache.purge();
        if self.cache.over_budget() {
            self.flush_all()?;
            self.cache.purge();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::device::MemDevice;

    fn manager() -> PageManager {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new());
        PageManager::new(device, 1024, 16 * 1024)
    }

    #[test]
    fn test_alloc_prefers_freelist() {
        let mut pm = manager();
        let _header = pm.alloc(PageType::Header).unwrap();
        let second = pm.alloc(PageType::BTreeLeaf).unwrap();
        let addr = second.rl().address();
        let _third = pm.alloc(PageType::BTreeLeaf).unwrap();

        pm.free_page(&second);
        drop(second);

        let reused = pm.alloc(PageType::BTreeInternal).unwrap();
        assert_eq!(reused.rl().address(), addr);
        assert_eq!(reused.rl().ptype(), Some(PageType::BTreeInternal));
    }

    #[test]
    fn test_fetch_round_trip() {
        let mut pm = manager();
        let page = pm.alloc(PageType::BTreeLeaf).unwrap();
        let addr = page.rl().address();
        page.wl().payload_mut()[0] = 0xAB;
        drop(page);

        pm.flush_all().unwrap();
        pm.clear_cache();

        let fetched = pm.fetch(addr, 0).unwrap();
        assert_eq!(fetched.rl().payload()[0], 0xAB);
        assert_eq!(fetched.rl().ptype(), Some(PageType::BTreeLeaf));
        assert!(!fetched.rl().is_dirty());
    }

    #[test]
    fn test_region_is_page_aligned() {
        let mut pm = manager();
        let region = pm.alloc_region(1500).unwrap();
        assert_eq!(region % 1024, 0);
        pm.free_region(region, 1500);
        assert_eq!(pm.freelist().ranges()[0].size, 2048);
    }
}
