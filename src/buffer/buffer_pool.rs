use crate::buffer::lru_replacer::LruReplacer;
use crate::buffer::page::{Page, PageGuard, PageId, INVALID_PAGE_ID};
use crate::buffer::page_table::ExtendibleHashTable;
use crate::config::BufferPoolConfig;
use crate::error::FerriteResult;
use crate::recovery::LogManager;
use crate::storage::DiskManager;
use log::debug;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

pub type FrameId = usize;

/// Page cache over a fixed array of frames. Every entry point holds `latch`
/// for the whole operation; the page-table and replacer mutexes are only
/// ever taken underneath it.
#[derive(Debug)]
pub struct BufferPoolManager {
    pool: Vec<Arc<RwLock<Page>>>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruReplacer,
    free_list: Mutex<VecDeque<FrameId>>,
    latch: Mutex<()>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<dyn LogManager>>,
}

impl BufferPoolManager {
    pub fn new(num_pages: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_config(
            BufferPoolConfig {
                pool_size: num_pages,
                ..Default::default()
            },
            disk_manager,
        )
    }

    pub fn with_config(config: BufferPoolConfig, disk_manager: Arc<DiskManager>) -> Self {
        let mut free_list = VecDeque::with_capacity(config.pool_size);
        let mut pool = Vec::with_capacity(config.pool_size);
        for frame_id in 0..config.pool_size {
            free_list.push_back(frame_id);
            pool.push(Arc::new(RwLock::new(Page::empty())));
        }
        Self {
            pool,
            page_table: ExtendibleHashTable::new(config.bucket_size),
            replacer: LruReplacer::new(),
            free_list: Mutex::new(free_list),
            latch: Mutex::new(()),
            disk_manager,
            log_manager: None,
        }
    }

    /// Attach the write-ahead-log collaborator. It is consulted before any
    /// dirty page body reaches disk.
    pub fn with_log_manager(mut self, log_manager: Arc<dyn LogManager>) -> Self {
        self.log_manager = Some(log_manager);
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Pin the page in memory, reading it from disk on a miss. `Ok(None)`
    /// when the id is the invalid sentinel or every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> FerriteResult<Option<Arc<RwLock<Page>>>> {
        if page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let _latch = self.latch.lock().unwrap();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = self.pool[frame_id].clone();
            frame.write().unwrap().pin_count += 1;
            // pinned frames are never eviction candidates
            self.replacer.erase(frame_id);
            return Ok(Some(frame));
        }

        let Some(frame_id) = self.take_frame()? else {
            return Ok(None);
        };
        self.page_table.insert(page_id, frame_id);
        {
            let mut page = self.pool[frame_id].write().unwrap();
            page.page_id = page_id;
            self.disk_manager.read_page(page_id, page.data_mut())?;
            page.is_dirty = false;
            page.pin_count = 1;
        }
        Ok(Some(self.pool[frame_id].clone()))
    }

    /// Drop one pin. The dirty flag is ORed in: a page marked dirty stays
    /// dirty until written back. False on a page-table miss or when the page
    /// is not pinned at all.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _latch = self.latch.lock().unwrap();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let mut page = self.pool[frame_id].write().unwrap();
        if page.pin_count == 0 {
            return false;
        }
        page.pin_count -= 1;
        page.is_dirty |= is_dirty;
        if page.pin_count == 0 {
            self.replacer.insert(frame_id);
        }
        true
    }

    /// Write a resident page to disk, dirty or not. The dirty bit is left
    /// untouched.
    pub fn flush_page(&self, page_id: PageId) -> FerriteResult<bool> {
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }
        let _latch = self.latch.lock().unwrap();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let page = self.pool[frame_id].read().unwrap();
        if page.is_dirty {
            if let Some(log_manager) = &self.log_manager {
                log_manager.flush_for_page(page_id)?;
            }
        }
        self.disk_manager.write_page(page_id, page.data())?;
        Ok(true)
    }

    pub fn flush_all_pages(&self) -> FerriteResult<()> {
        let _latch = self.latch.lock().unwrap();
        for frame in &self.pool {
            let page = frame.read().unwrap();
            if page.page_id != INVALID_PAGE_ID && page.is_dirty {
                if let Some(log_manager) = &self.log_manager {
                    log_manager.flush_for_page(page.page_id)?;
                }
                self.disk_manager.write_page(page.page_id, page.data())?;
            }
        }
        Ok(())
    }

    /// Evict the page from memory and deallocate it on disk. False when the
    /// page is resident and still pinned.
    pub fn delete_page(&self, page_id: PageId) -> FerriteResult<bool> {
        let _latch = self.latch.lock().unwrap();
        if let Some(frame_id) = self.page_table.find(&page_id) {
            {
                let mut page = self.pool[frame_id].write().unwrap();
                if page.pin_count > 0 {
                    return Ok(false);
                }
                page.destroy();
            }
            self.page_table.remove(&page_id);
            self.replacer.erase(frame_id);
            self.free_list.lock().unwrap().push_back(frame_id);
            debug!("deleted resident page {} from frame {}", page_id, frame_id);
        }
        self.disk_manager.deallocate_page(page_id);
        Ok(true)
    }

    /// Allocate a fresh page on disk and pin it into a zeroed frame.
    /// `Ok(None)` when every frame is pinned.
    pub fn new_page(&self) -> FerriteResult<Option<(PageId, Arc<RwLock<Page>>)>> {
        let _latch = self.latch.lock().unwrap();
        let Some(frame_id) = self.take_frame()? else {
            return Ok(None);
        };
        let page_id = self.disk_manager.allocate_page();
        self.page_table.insert(page_id, frame_id);
        self.pool[frame_id]
            .write()
            .unwrap()
            .replace(Page::new(page_id).with_pin_count(1u32));
        debug!("allocated page {} into frame {}", page_id, frame_id);
        Ok(Some((page_id, self.pool[frame_id].clone())))
    }

    /// `fetch_page` returning a scoped pin that unpins itself on drop.
    pub fn fetch_page_guard(self: &Arc<Self>, page_id: PageId) -> FerriteResult<Option<PageGuard>> {
        Ok(self
            .fetch_page(page_id)?
            .map(|page| PageGuard::new(self.clone(), page, page_id)))
    }

    /// `new_page` returning a scoped pin that unpins itself on drop.
    pub fn new_page_guard(self: &Arc<Self>) -> FerriteResult<Option<PageGuard>> {
        Ok(self
            .new_page()?
            .map(|(page_id, page)| PageGuard::new(self.clone(), page, page_id)))
    }

    /// Pick a reusable frame: free list first, then the replacer. A dirty
    /// victim is written back (behind the WAL hook) and its page-table entry
    /// removed before the frame is handed out.
    fn take_frame(&self) -> FerriteResult<Option<FrameId>> {
        if let Some(frame_id) = self.free_list.lock().unwrap().pop_front() {
            return Ok(Some(frame_id));
        }
        let Some(frame_id) = self.replacer.victim() else {
            return Ok(None);
        };
        let old_page_id;
        {
            let page = self.pool[frame_id].read().unwrap();
            old_page_id = page.page_id;
            if page.is_dirty {
                if let Some(log_manager) = &self.log_manager {
                    log_manager.flush_for_page(old_page_id)?;
                }
                self.disk_manager.write_page(old_page_id, page.data())?;
                debug!("wrote back dirty page {} from frame {}", old_page_id, frame_id);
            }
        }
        if old_page_id != INVALID_PAGE_ID {
            self.page_table.remove(&old_page_id);
        }
        Ok(Some(frame_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PAGE_SIZE;
    use crate::error::FerriteResult;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn setup_test_environment(num_pages: usize) -> (TempDir, Arc<BufferPoolManager>, Arc<DiskManager>) {
        let temp_dir = TempDir::new().unwrap();
        let temp_path = temp_dir.path().join("test.db");
        let disk_manager = Arc::new(DiskManager::try_new(temp_path).unwrap());
        let buffer_pool = Arc::new(BufferPoolManager::new(num_pages, disk_manager.clone()));
        (temp_dir, buffer_pool, disk_manager)
    }

    fn check_invariants(buffer_pool: &BufferPoolManager) {
        let free_list = buffer_pool.free_list.lock().unwrap();
        let mut unpinned_resident = 0;
        for (frame_id, frame) in buffer_pool.pool.iter().enumerate() {
            let page = frame.read().unwrap();
            if page.page_id != INVALID_PAGE_ID {
                assert_eq!(buffer_pool.page_table.find(&page.page_id), Some(frame_id));
                assert!(!free_list.contains(&frame_id));
                if page.pin_count == 0 {
                    unpinned_resident += 1;
                }
            } else {
                assert!(free_list.contains(&frame_id));
                assert_eq!(page.pin_count, 0);
                assert!(!page.is_dirty);
            }
        }
        assert_eq!(buffer_pool.replacer.size(), unpinned_resident);
    }

    #[test]
    fn new_page_until_exhaustion() {
        let (_temp_dir, buffer_pool, disk_manager) = setup_test_environment(10);

        let mut ids = Vec::new();
        let mut frames = Vec::new();
        for _ in 0..10 {
            let (page_id, frame) = buffer_pool.new_page().unwrap().unwrap();
            ids.push(page_id);
            frames.push(frame);
        }
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 10);
        assert!(buffer_pool.new_page().unwrap().is_none());
        check_invariants(&buffer_pool);

        // release the first page with modified contents
        frames[0].write().unwrap().set_data([7u8; PAGE_SIZE]);
        assert!(buffer_pool.unpin_page(ids[0], true));

        // the eleventh page reuses that exact frame
        let (new_id, new_frame) = buffer_pool.new_page().unwrap().unwrap();
        assert_ne!(new_id, ids[0]);
        assert!(Arc::ptr_eq(&new_frame, &frames[0]));
        assert!(buffer_pool.page_table.find(&ids[0]).is_none());

        // the evicted page was written back first
        let mut buf = [0u8; PAGE_SIZE];
        disk_manager.read_page(ids[0], &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 7));
        check_invariants(&buffer_pool);
    }

    #[test]
    fn fetch_pins_and_removes_from_victim_set() {
        let (_temp_dir, buffer_pool, _disk_manager) = setup_test_environment(3);

        let (page_id, _frame) = buffer_pool.new_page().unwrap().unwrap();
        assert!(buffer_pool.unpin_page(page_id, false));
        assert_eq!(buffer_pool.replacer.size(), 1);

        let frame = buffer_pool.fetch_page(page_id).unwrap().unwrap();
        let frame_again = buffer_pool.fetch_page(page_id).unwrap().unwrap();
        assert!(Arc::ptr_eq(&frame, &frame_again));
        assert_eq!(frame.read().unwrap().pin_count, 2);
        assert_eq!(buffer_pool.replacer.size(), 0);

        assert!(buffer_pool.unpin_page(page_id, false));
        // still pinned once, so still not evictable
        assert_eq!(frame.read().unwrap().pin_count, 1);
        assert_eq!(buffer_pool.replacer.size(), 0);
        check_invariants(&buffer_pool);

        assert!(buffer_pool.unpin_page(page_id, false));
        assert_eq!(buffer_pool.replacer.size(), 1);
        check_invariants(&buffer_pool);
    }

    #[test]
    fn unpin_miss_and_double_unpin_fail() {
        let (_temp_dir, buffer_pool, _disk_manager) = setup_test_environment(3);

        assert!(!buffer_pool.unpin_page(99, false));

        let (page_id, _frame) = buffer_pool.new_page().unwrap().unwrap();
        assert!(buffer_pool.unpin_page(page_id, false));
        assert!(!buffer_pool.unpin_page(page_id, false));
        check_invariants(&buffer_pool);
    }

    #[test]
    fn dirty_flag_is_sticky_across_unpins() {
        let (_temp_dir, buffer_pool, disk_manager) = setup_test_environment(1);

        let (page_id, frame) = buffer_pool.new_page().unwrap().unwrap();
        let second = buffer_pool.fetch_page(page_id).unwrap().unwrap();
        drop(second);
        frame.write().unwrap().set_data([9u8; PAGE_SIZE]);

        assert!(buffer_pool.unpin_page(page_id, true));
        // a later clean unpin must not clobber the dirty bit
        assert!(buffer_pool.unpin_page(page_id, false));
        assert!(frame.read().unwrap().is_dirty);

        // eviction therefore writes the page back
        let (_new_id, _new_frame) = buffer_pool.new_page().unwrap().unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        disk_manager.read_page(page_id, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 9));
    }

    #[test]
    fn flush_page_writes_regardless_of_dirty() {
        let (_temp_dir, buffer_pool, disk_manager) = setup_test_environment(3);

        assert!(!buffer_pool.flush_page(INVALID_PAGE_ID).unwrap());
        assert!(!buffer_pool.flush_page(12345).unwrap());

        let (page_id, frame) = buffer_pool.new_page().unwrap().unwrap();
        frame.write().unwrap().set_data([3u8; PAGE_SIZE]);
        assert!(buffer_pool.flush_page(page_id).unwrap());

        let mut buf = [0u8; PAGE_SIZE];
        disk_manager.read_page(page_id, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 3));
    }

    #[test]
    fn delete_page_refuses_pinned() {
        let (_temp_dir, buffer_pool, _disk_manager) = setup_test_environment(3);

        let (page_id, _frame) = buffer_pool.new_page().unwrap().unwrap();
        assert!(!buffer_pool.delete_page(page_id).unwrap());
        assert!(buffer_pool.page_table.find(&page_id).is_some());

        assert!(buffer_pool.unpin_page(page_id, false));
        assert!(buffer_pool.delete_page(page_id).unwrap());
        assert!(buffer_pool.page_table.find(&page_id).is_none());
        assert_eq!(buffer_pool.free_list.lock().unwrap().len(), 3);
        check_invariants(&buffer_pool);

        // deleting a non-resident page still succeeds
        assert!(buffer_pool.delete_page(page_id).unwrap());
    }

    #[test]
    fn fetch_round_trips_through_eviction() {
        let (_temp_dir, buffer_pool, _disk_manager) = setup_test_environment(2);

        let (first, frame) = buffer_pool.new_page().unwrap().unwrap();
        frame.write().unwrap().set_data([0xcd; PAGE_SIZE]);
        assert!(buffer_pool.unpin_page(first, true));

        // crowd the first page out of the pool
        for _ in 0..2 {
            let (page_id, _frame) = buffer_pool.new_page().unwrap().unwrap();
            assert!(buffer_pool.unpin_page(page_id, false));
        }
        assert!(buffer_pool.page_table.find(&first).is_none());

        let frame = buffer_pool.fetch_page(first).unwrap().unwrap();
        {
            let page = frame.read().unwrap();
            assert_eq!(page.page_id, first);
            assert_eq!(page.pin_count, 1);
            assert!(!page.is_dirty);
            assert!(page.data().iter().all(|&b| b == 0xcd));
        }
        assert!(buffer_pool.unpin_page(first, false));
        check_invariants(&buffer_pool);
    }

    #[test]
    fn fetch_invalid_page_id_is_rejected() {
        let (_temp_dir, buffer_pool, _disk_manager) = setup_test_environment(2);
        assert!(buffer_pool.fetch_page(INVALID_PAGE_ID).unwrap().is_none());
        check_invariants(&buffer_pool);
    }

    #[test]
    fn page_guard_unpins_on_drop() {
        let (_temp_dir, buffer_pool, _disk_manager) = setup_test_environment(2);

        let guard = buffer_pool.new_page_guard().unwrap().unwrap();
        let page_id = guard.page_id();
        guard.write().unwrap().set_data([0x5a; PAGE_SIZE]);
        guard.mark_dirty();
        assert_eq!(buffer_pool.replacer.size(), 0);
        drop(guard);
        assert_eq!(buffer_pool.replacer.size(), 1);

        let guard = buffer_pool.fetch_page_guard(page_id).unwrap().unwrap();
        assert_eq!(guard.read().unwrap().pin_count, 1);
        assert!(guard.read().unwrap().is_dirty);
        drop(guard);
        check_invariants(&buffer_pool);
    }

    #[derive(Debug, Default)]
    struct RecordingLog {
        flushed: Mutex<Vec<PageId>>,
    }

    impl LogManager for RecordingLog {
        fn flush_for_page(&self, page_id: PageId) -> FerriteResult<()> {
            self.flushed.lock().unwrap().push(page_id);
            Ok(())
        }
    }

    #[test]
    fn wal_hook_runs_before_dirty_write_back() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let log = Arc::new(RecordingLog::default());
        let buffer_pool =
            BufferPoolManager::new(1, disk_manager).with_log_manager(log.clone());

        let (page_id, frame) = buffer_pool.new_page().unwrap().unwrap();
        frame.write().unwrap().set_data([1u8; PAGE_SIZE]);
        assert!(buffer_pool.unpin_page(page_id, true));
        assert!(log.flushed.lock().unwrap().is_empty());

        // eviction of the dirty page must consult the log first
        let _ = buffer_pool.new_page().unwrap().unwrap();
        assert_eq!(log.flushed.lock().unwrap().as_slice(), &[page_id]);
    }
}
