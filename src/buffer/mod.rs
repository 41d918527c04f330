mod buffer_pool;
mod lru_replacer;
mod page;
mod page_table;

pub use buffer_pool::{BufferPoolManager, FrameId};
pub use lru_replacer::LruReplacer;
pub use page::{
    AtomicPageId, Page, PageGuard, PageId, INVALID_PAGE_ID, PAGE_SIZE,
};
pub use page_table::ExtendibleHashTable;
