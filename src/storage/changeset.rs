use crate::{
    storage::{
        page::{Page, PageType},
        page_manager::PageManager,
    },
    types::{Pod, ResultPod},
    utils::HandyRwLock,
};

/// The set of pages touched by one logical operation. Pages are lent
/// to the operation through this container; on success the changeset
/// is written to the journal as one physical entry, on failure it is
/// simply abandoned.
pub struct Changeset {
    pages: Vec<Pod<Page>>,
}

impl Changeset {
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[Pod<Page>] {
        &self.pages
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    pub fn contains(&self, address: u64) -> bool {
        self.pages.iter().any(|p| p.rl().address() == address)
    }

    pub fn put(&mut self, page: Pod<Page>) {
        let address = page.rl().address();
        if let Some(existing) = self
            .pages
            .iter_mut()
            .find(|p| p.rl().address() == address)
        {
            // a freed and re-allocated page produces a fresh handle
            // under an old address; the stale one must not win
            if !std::sync::Arc::ptr_eq(existing, &page) {
                *existing = page;
            }
            return;
        }
        self.pages.push(page);
    }

    /// Fetches through the page manager and tracks the page.
    pub fn fetch(&mut self, pm: &mut PageManager, address: u64, flags: u32) -> ResultPod<Page> {
        let page = pm.fetch(address, flags)?;
        self.put(page.clone());
        Ok(page)
    }

    /// Allocates through the page manager and tracks the page.
    pub fn alloc(&mut self, pm: &mut PageManager, ptype: PageType) -> ResultPod<Page> {
        let page = pm.alloc(ptype)?;
        self.put(page.clone());
        Ok(page)
    }
}
