use crate::buffer::buffer_pool::BufferPoolManager;
use derive_with::With;
use log::error;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

pub type PageId = u32;
pub type AtomicPageId = AtomicU32;

pub const INVALID_PAGE_ID: PageId = 0;
pub const PAGE_SIZE: usize = 4096;

/// One in-memory frame slot. The surrounding `RwLock` is the content latch
/// handed to callers; the pool itself only touches the metadata fields.
#[derive(Debug, With)]
pub struct Page {
    pub page_id: PageId,
    data: [u8; PAGE_SIZE],
    // reference count of outstanding pins
    pub pin_count: u32,
    // whether it has been written since load
    pub is_dirty: bool,
}

impl Page {
    pub fn empty() -> Self {
        Self::new(INVALID_PAGE_ID)
    }

    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: [0; PAGE_SIZE],
            pin_count: 0,
            is_dirty: false,
        }
    }

    pub fn destroy(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.data = [0; PAGE_SIZE];
        self.pin_count = 0;
        self.is_dirty = false;
    }

    pub fn set_data(&mut self, data: [u8; PAGE_SIZE]) {
        self.data = data;
        self.is_dirty = true;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn replace(&mut self, other: Page) {
        self.page_id = other.page_id;
        self.data = other.data;
        self.pin_count = other.pin_count;
        self.is_dirty = other.is_dirty;
    }
}

/// Scoped pin on a page. Dropping the guard unpins the page, carrying the
/// accumulated dirty intent back to the pool.
#[derive(Debug)]
pub struct PageGuard {
    pool: Arc<BufferPoolManager>,
    page: Arc<RwLock<Page>>,
    page_id: PageId,
    dirty: AtomicBool,
}

impl PageGuard {
    pub(crate) fn new(pool: Arc<BufferPoolManager>, page: Arc<RwLock<Page>>, page_id: PageId) -> Self {
        Self {
            pool,
            page,
            page_id,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Record that the caller modified the page body. Sticky until drop.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

impl Deref for PageGuard {
    type Target = Arc<RwLock<Page>>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let dirty = self.dirty.load(Ordering::Acquire);
        if !self.pool.unpin_page(self.page_id, dirty) {
            error!("failed to unpin page {} on guard drop", self.page_id);
        }
    }
}
