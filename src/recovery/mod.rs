use crate::buffer::PageId;
use crate::error::FerriteResult;

/// Log collaborator. The buffer pool invokes `flush_for_page` before a dirty
/// page body is written back, so that log records covering the page are
/// durable first. When no implementation is attached, logging is disabled.
pub trait LogManager: Send + Sync + std::fmt::Debug {
    fn flush_for_page(&self, page_id: PageId) -> FerriteResult<()>;
}
