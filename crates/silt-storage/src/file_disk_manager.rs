use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;
use silt_common::{SiltError, SiltResult};

use crate::disk_manager::DiskManager;
use crate::page_id::{PageId, PAGE_SIZE};

/// Single-file, filesystem-backed disk manager.
///
/// Pages live at fixed offsets: `page_id * PAGE_SIZE`. Allocation extends
/// the file by one zero page, so ids are dense and monotonic. Deallocated
/// ids are recorded but not yet reused; reclamation belongs to a free-space
/// map above this layer.
pub struct FileDiskManager {
    path: PathBuf,
    file: Mutex<File>,
    deallocated: Mutex<Vec<PageId>>,
}

impl FileDiskManager {
    /// Open (or create) the backing file at the given path.
    pub fn new(path: impl AsRef<Path>) -> SiltResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                SiltError::Storage(format!("failed to open {}: {err}", path.display()))
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            deallocated: Mutex::new(Vec::new()),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages the backing file currently holds.
    pub fn page_capacity(&self) -> SiltResult<u64> {
        let mut file = self.file.lock().unwrap();
        let len = file
            .seek(SeekFrom::End(0))
            .map_err(|e| SiltError::Storage(format!("seek error: {e}")))?;
        Ok(len / PAGE_SIZE as u64)
    }

    /// Number of ids handed to `deallocate_page` so far.
    pub fn deallocated_count(&self) -> usize {
        self.deallocated.lock().unwrap().len()
    }
}

impl DiskManager for FileDiskManager {
    fn allocate_page(&self) -> SiltResult<PageId> {
        let mut file = self.file.lock().unwrap();
        let file_len = file
            .seek(SeekFrom::End(0))
            .map_err(|e| SiltError::Storage(format!("seek error: {e}")))?;

        // Next id is file_len / PAGE_SIZE (pages are appended)
        let page_id = PageId::new((file_len / PAGE_SIZE as u64) as i64);

        // Write a zero page to extend the file
        let zeros = vec![0u8; PAGE_SIZE];
        file.write_all(&zeros)
            .map_err(|e| SiltError::Storage(format!("write error: {e}")))?;

        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> SiltResult<()> {
        debug!("deallocating page {page_id}");
        self.deallocated.lock().unwrap().push(page_id);
        Ok(())
    }

    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> SiltResult<()> {
        assert_eq!(buf.len(), PAGE_SIZE);
        let mut file = self.file.lock().unwrap();
        let offset = page_id.0 as u64 * PAGE_SIZE as u64;

        let file_len = file
            .seek(SeekFrom::End(0))
            .map_err(|e| SiltError::Storage(format!("seek error: {e}")))?;

        // Reads past the end of the file yield zeroes
        if offset >= file_len {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))
            .map_err(|e| SiltError::Storage(format!("seek error: {e}")))?;

        let bytes_available = (file_len - offset) as usize;
        if bytes_available < PAGE_SIZE {
            // Partial page: read what is there, zero the rest
            buf.fill(0);
            file.read_exact(&mut buf[..bytes_available])
                .map_err(|e| SiltError::Storage(format!("read error: {e}")))?;
        } else {
            file.read_exact(buf)
                .map_err(|e| SiltError::Storage(format!("read error: {e}")))?;
        }

        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8]) -> SiltResult<()> {
        assert_eq!(buf.len(), PAGE_SIZE);
        let mut file = self.file.lock().unwrap();
        let offset = page_id.0 as u64 * PAGE_SIZE as u64;

        file.seek(SeekFrom::Start(offset))
            .map_err(|e| SiltError::Storage(format!("seek error: {e}")))?;
        file.write_all(buf)
            .map_err(|e| SiltError::Storage(format!("write error: {e}")))?;

        Ok(())
    }

    fn sync(&self) -> SiltResult<()> {
        let file = self.file.lock().unwrap();
        file.sync_all()
            .map_err(|e| SiltError::Storage(format!("sync error: {e}")))?;
        Ok(())
    }
}
