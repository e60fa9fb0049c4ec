use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use silt_common::SiltResult;

use crate::page_id::{PageId, PAGE_SIZE};

/// Block I/O and page allocation over persistent storage.
///
/// Implementations include:
/// - `FileDiskManager`: single-file, filesystem-backed storage
/// - `MockDiskManager`: in-memory store for testing
pub trait DiskManager: Send + Sync {
    /// Allocate a fresh page id, extending the backing store if needed.
    /// Ids are dense and monotonic.
    fn allocate_page(&self) -> SiltResult<PageId>;

    /// Mark a page id reusable.
    fn deallocate_page(&self, page_id: PageId) -> SiltResult<()>;

    /// Read a page from storage into the given buffer.
    /// The buffer must be exactly PAGE_SIZE bytes.
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> SiltResult<()>;

    /// Write a page from the given buffer to storage.
    /// The buffer must be exactly PAGE_SIZE bytes.
    fn write_page(&self, page_id: PageId, buf: &[u8]) -> SiltResult<()>;

    /// Sync the backing store to durable storage.
    fn sync(&self) -> SiltResult<()>;
}

/// In-memory disk manager for testing. No disk I/O.
///
/// Records every `write_page` and `deallocate_page` call so tests can
/// observe eviction write-back and deallocation ordering.
pub struct MockDiskManager {
    pages: Mutex<HashMap<PageId, Vec<u8>>>,
    next_page_id: AtomicI64,
    writes: Mutex<Vec<PageId>>,
    deallocated: Mutex<Vec<PageId>>,
}

impl MockDiskManager {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            next_page_id: AtomicI64::new(0),
            writes: Mutex::new(Vec::new()),
            deallocated: Mutex::new(Vec::new()),
        }
    }

    /// Get the number of pages stored.
    pub fn page_count(&self) -> usize {
        self.pages.lock().unwrap().len()
    }

    /// Every page id passed to `write_page`, in call order.
    pub fn writes(&self) -> Vec<PageId> {
        self.writes.lock().unwrap().clone()
    }

    /// Number of `write_page` calls for one page id.
    pub fn write_count(&self, page_id: PageId) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|&&p| p == page_id)
            .count()
    }

    /// Every page id passed to `deallocate_page`, in call order.
    pub fn deallocated(&self) -> Vec<PageId> {
        self.deallocated.lock().unwrap().clone()
    }
}

impl Default for MockDiskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskManager for MockDiskManager {
    fn allocate_page(&self) -> SiltResult<PageId> {
        Ok(PageId::new(self.next_page_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn deallocate_page(&self, page_id: PageId) -> SiltResult<()> {
        self.deallocated.lock().unwrap().push(page_id);
        Ok(())
    }

    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> SiltResult<()> {
        assert_eq!(buf.len(), PAGE_SIZE);
        let pages = self.pages.lock().unwrap();
        if let Some(data) = pages.get(&page_id) {
            buf.copy_from_slice(data);
        } else {
            // Unwritten pages read as zeroes
            buf.fill(0);
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8]) -> SiltResult<()> {
        assert_eq!(buf.len(), PAGE_SIZE);
        self.writes.lock().unwrap().push(page_id);
        self.pages.lock().unwrap().insert(page_id, buf.to_vec());
        Ok(())
    }

    fn sync(&self) -> SiltResult<()> {
        // No-op for the in-memory store
        Ok(())
    }
}
