use crate::buffer::{AtomicPageId, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::error::{FerriteError, FerriteResult};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

/// File-backed page store. Page `n` lives at byte offset `n * PAGE_SIZE`;
/// id 0 is the invalid sentinel and is never written.
#[derive(Debug)]
pub struct DiskManager {
    next_page_id: AtomicPageId,
    db_file: Mutex<File>,
}

impl DiskManager {
    pub fn try_new(db_path: impl AsRef<Path>) -> FerriteResult<Self> {
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path.as_ref())?;
        let allocated = (db_file.metadata()?.len() / PAGE_SIZE as u64) as PageId;
        Ok(Self {
            next_page_id: AtomicPageId::new(allocated.max(1)),
            db_file: Mutex::new(db_file),
        })
    }

    /// Fill `buf` with the page contents. Bytes past the end of the file
    /// read as zeroes, so freshly allocated pages come back blank.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> FerriteResult<()> {
        self.check_args(page_id, buf.len())?;
        let mut db_file = self.db_file.lock().unwrap();
        db_file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        let mut filled = 0;
        while filled < buf.len() {
            match db_file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> FerriteResult<()> {
        self.check_args(page_id, buf.len())?;
        let mut db_file = self.db_file.lock().unwrap();
        db_file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        db_file.write_all(buf)?;
        Ok(())
    }

    /// Reserve a fresh page id. Ids are handed out monotonically and are not
    /// recycled by `deallocate_page`.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn deallocate_page(&self, page_id: PageId) {
        // Ids are not reused; the slot simply becomes garbage until the file
        // is compacted offline.
        debug!("deallocated page {}", page_id);
    }

    fn check_args(&self, page_id: PageId, buf_len: usize) -> FerriteResult<()> {
        if page_id == INVALID_PAGE_ID {
            return Err(FerriteError::Storage(
                "I/O on the invalid page id".to_string(),
            ));
        }
        if buf_len != PAGE_SIZE {
            return Err(FerriteError::Storage(format!(
                "page buffer is {} bytes, expected {}",
                buf_len, PAGE_SIZE
            )));
        }
        Ok(())
    }
}
