use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use log::{debug, warn};
use silt_common::{SiltError, SiltResult, StorageConfig};

use crate::disk_manager::DiskManager;
use crate::frame::{ExclusiveLatch, Frame, SharedLatch};
use crate::log_manager::LogManager;
use crate::page_id::{FrameId, PageId, PAGE_SIZE};
use crate::replacer::{ClockReplacer, Replacer};

/// Bookkeeping that must change together: which page lives in which frame,
/// which frames are unused, and which are eviction-eligible.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
    replacer: Box<dyn Replacer>,
}

/// Fixed-capacity page cache between the engine and a disk manager.
///
/// Frames are handed out as pinned `PageGuard`s. A page cannot be evicted
/// while any pin on it is outstanding; unpinned resident frames are offered
/// to the replacer for second-chance eviction. Dirty frames are written
/// back before eviction or on explicit flush; dropping the pool does not
/// flush (call `flush_all_pages` first if durability is required).
pub struct BufferPoolManager {
    frames: Box<[Frame]>,
    state: Mutex<PoolState>,
    disk: Arc<dyn DiskManager>,
    /// Reserved for write-ahead-log ordering during recovery integration.
    #[allow(dead_code)]
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    /// Create a pool with `pool_size` frames over the given disk manager,
    /// using the clock replacement policy.
    pub fn new(
        pool_size: usize,
        disk: Arc<dyn DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        Self::with_replacer(
            pool_size,
            disk,
            log_manager,
            Box::new(ClockReplacer::new(pool_size.max(1))),
        )
    }

    /// Create a pool with an explicit replacement policy.
    pub fn with_replacer(
        pool_size: usize,
        disk: Arc<dyn DiskManager>,
        log_manager: Option<Arc<LogManager>>,
        replacer: Box<dyn Replacer>,
    ) -> Self {
        assert!(pool_size > 0, "pool_size must be positive");
        let frames: Box<[Frame]> = (0..pool_size).map(|_| Frame::new()).collect();
        // Initially, every frame is in the free list; popping from the tail
        // hands out frame 0 last.
        let free_list: Vec<FrameId> = (0..pool_size as u32).map(FrameId).collect();
        Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer,
            }),
            disk,
            log_manager,
        }
    }

    /// Create a pool sized from configuration (`buffer_pool_size` bytes).
    pub fn with_config(
        config: &StorageConfig,
        disk: Arc<dyn DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let pool_size = (config.buffer_pool_size / PAGE_SIZE).max(1);
        Self::new(pool_size, disk, log_manager)
    }

    /// Number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    fn frame(&self, frame_id: FrameId) -> &Frame {
        &self.frames[frame_id.0 as usize]
    }

    /// Obtain a pinned guard for `page_id`, loading it from disk if not
    /// resident. Fails with `PoolExhausted` when every frame is pinned
    /// (no state is mutated in that case).
    pub fn fetch_page(&self, page_id: PageId) -> SiltResult<PageGuard<'_>> {
        let mut state = self.state.lock().unwrap();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            self.frame(frame_id).pin();
            state.replacer.pin(frame_id);
            return Ok(PageGuard {
                pool: self,
                frame_id,
                page_id,
            });
        }

        let frame_id = self.take_frame(&mut state)?;
        let frame = self.frame(frame_id);
        frame.reset(page_id);
        // SAFETY: the frame is unpinned and unmapped; the pool lock is held.
        if let Err(err) = self.disk.read_page(page_id, unsafe { frame.data_mut() }) {
            frame.reset(PageId::INVALID);
            state.free_list.push(frame_id);
            return Err(err);
        }
        state.page_table.insert(page_id, frame_id);

        frame.pin();
        state.replacer.pin(frame_id);
        Ok(PageGuard {
            pool: self,
            frame_id,
            page_id,
        })
    }

    /// Allocate a fresh on-disk page and return its id with a pinned guard
    /// over a zeroed buffer.
    pub fn new_page(&self) -> SiltResult<(PageId, PageGuard<'_>)> {
        let mut state = self.state.lock().unwrap();

        if state.free_list.is_empty() && state.replacer.size() == 0 {
            return Err(SiltError::PoolExhausted);
        }

        let frame_id = self.take_frame(&mut state)?;
        let frame = self.frame(frame_id);
        // The id is allocated only once a frame is secured; a failed
        // eviction write-back must not consume one.
        let page_id = match self.disk.allocate_page() {
            Ok(page_id) => page_id,
            Err(err) => {
                frame.reset(PageId::INVALID);
                state.free_list.push(frame_id);
                return Err(err);
            }
        };
        frame.reset(page_id);
        state.page_table.insert(page_id, frame_id);

        frame.pin();
        state.replacer.pin(frame_id);
        Ok((
            page_id,
            PageGuard {
                pool: self,
                frame_id,
                page_id,
            },
        ))
    }

    /// Pick a target frame: free list first, else an eviction victim.
    /// A dirty victim is written back and unmapped before being returned.
    fn take_frame(&self, state: &mut PoolState) -> SiltResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.victim().ok_or(SiltError::PoolExhausted)?;
        let frame = self.frame(frame_id);
        let old_page_id = frame.page_id();
        if frame.is_dirty() {
            debug!("evicting dirty page {old_page_id} from frame {frame_id}");
            // SAFETY: victims are unpinned and the pool lock is held.
            if let Err(err) = self.disk.write_page(old_page_id, unsafe { frame.data() }) {
                // The frame is still resident and unpinned; put it back.
                state.replacer.unpin(frame_id);
                return Err(err);
            }
        }
        state.page_table.remove(&old_page_id);
        Ok(frame_id)
    }

    /// Drop one pin on `page_id`, folding `is_dirty` into the frame's dirty
    /// flag. When the last pin is released the frame becomes
    /// eviction-eligible. Returns false if the page is not resident.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let frame = self.frame(frame_id);
        if frame.pin_count() == 0 {
            debug_assert!(false, "unpin of page {page_id} with zero pin count");
            warn!("unpin of page {page_id} with zero pin count");
            return false;
        }

        if is_dirty {
            frame.set_dirty();
        }
        if frame.unpin() == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    /// Write `page_id`'s bytes to disk and clear its dirty flag. Allowed on
    /// pinned frames. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> SiltResult<bool> {
        let state = self.state.lock().unwrap();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        self.write_frame(page_id, frame_id)?;
        Ok(true)
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> SiltResult<()> {
        let state = self.state.lock().unwrap();
        for (&page_id, &frame_id) in state.page_table.iter() {
            self.write_frame(page_id, frame_id)?;
        }
        Ok(())
    }

    fn write_frame(&self, page_id: PageId, frame_id: FrameId) -> SiltResult<()> {
        let frame = self.frame(frame_id);
        // The frame may be pinned; hold the shared latch so that
        // latch-disciplined writers are not torn mid-write.
        let latch = frame.latch_shared();
        // SAFETY: the shared latch is held and the frame cannot be evicted
        // while the pool lock is held.
        let result = self.disk.write_page(page_id, unsafe { frame.data() });
        drop(latch);
        result?;
        frame.clear_dirty();
        Ok(())
    }

    /// Delete `page_id`: deallocate it on disk and, if resident, return its
    /// frame to the free list. Returns false (and deallocates nothing) if
    /// the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> SiltResult<bool> {
        let mut state = self.state.lock().unwrap();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = self.frame(frame_id);
            if frame.is_pinned() {
                return Ok(false);
            }
            // Idempotent de-registration from the replacer.
            state.replacer.pin(frame_id);
            frame.reset(PageId::INVALID);
            state.page_table.remove(&page_id);
            state.free_list.push(frame_id);
        }
        self.disk.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Get a consistent snapshot of pool occupancy.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock().unwrap();
        let mut resident = 0;
        let mut pinned = 0;
        let mut dirty = 0;
        for frame in self.frames.iter() {
            if frame.is_resident() {
                resident += 1;
                if frame.is_pinned() {
                    pinned += 1;
                }
                if frame.is_dirty() {
                    dirty += 1;
                }
            }
        }
        BufferPoolStats {
            pool_size: self.frames.len(),
            resident,
            pinned,
            dirty,
            free: state.free_list.len(),
            evictable: state.replacer.size(),
        }
    }
}

/// Occupancy snapshot of a buffer pool.
#[derive(Clone, Debug)]
pub struct BufferPoolStats {
    pub pool_size: usize,
    /// Frames holding a page.
    pub resident: usize,
    /// Resident frames with at least one pin.
    pub pinned: usize,
    /// Resident frames whose bytes differ from disk.
    pub dirty: usize,
    /// Frames in the free list.
    pub free: usize,
    /// Frames registered with the replacer.
    pub evictable: usize,
}

/// RAII pin over a resident page.
///
/// Dropping the guard releases the pin; dirtiness is recorded on the frame
/// at mutation time, so a plain drop never loses it. `unpin` consumes the
/// guard for callers that track the dirty bit themselves.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id)
            .finish()
    }
}

impl PageGuard<'_> {
    /// Id of the pinned page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Shared (read-only) view of the page bytes.
    pub fn data(&self) -> &[u8] {
        // SAFETY: the page is pinned, so the frame cannot be evicted. The
        // shared reference is safe for reading.
        unsafe { self.frame().data() }
    }

    /// Exclusive (mutable) view of the page bytes. Marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let frame = self.frame();
        frame.set_dirty();
        // SAFETY: the page is pinned and we hold &mut self.
        unsafe { frame.data_mut() }
    }

    /// Current pin count of the underlying frame.
    pub fn pin_count(&self) -> u32 {
        self.frame().pin_count()
    }

    /// Whether the page has unwritten modifications.
    pub fn is_dirty(&self) -> bool {
        self.frame().is_dirty()
    }

    /// Mark the page dirty without mutating it through this guard.
    pub fn mark_dirty(&self) {
        self.frame().set_dirty();
    }

    /// Latch the page bytes in shared mode, for callers that share the page.
    pub fn latch_shared(&self) -> SharedLatch<'_> {
        self.frame().latch_shared()
    }

    /// Latch the page bytes exclusively, for callers that share the page.
    pub fn latch_exclusive(&self) -> ExclusiveLatch<'_> {
        self.frame().latch_exclusive()
    }

    /// Release the pin explicitly, folding `is_dirty` into the frame's
    /// dirty flag.
    pub fn unpin(self, is_dirty: bool) -> bool {
        let pool = self.pool;
        let page_id = self.page_id;
        std::mem::forget(self);
        pool.unpin_page(page_id, is_dirty)
    }

    fn frame(&self) -> &Frame {
        self.pool.frame(self.frame_id)
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}
