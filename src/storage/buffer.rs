pub mod lru;
pub mod replacer;

use crate::error::DbError;
use crate::storage::disk::{DiskManager, PAGE_SIZE};
use crate::storage::page::{PageId, INVALID_PAGE_ID};
use anyhow::{bail, Result};
use log::debug;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

pub type PageBuf = [u8; PAGE_SIZE];

/// A fixed slot of the pool. The byte buffer lives inside the page latch;
/// metadata is atomic and only transitions under the pool mutex.
struct Frame {
    data: Arc<RwLock<Box<PageBuf>>>,
    page_id: AtomicI32,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
            page_id: AtomicI32::new(INVALID_PAGE_ID.0),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    fn resident_page(&self) -> PageId {
        PageId(self.page_id.load(Ordering::SeqCst))
    }
}

/// Bound-memory page cache over a disk store.
///
/// Every state transition (page table, free list, replacer, pin counts)
/// happens under one pool-wide mutex; disk I/O is performed while it is held,
/// serializing disk access per pool. Page contents are guarded separately by
/// per-frame reader-writer latches so traversals can hold latches without
/// blocking the pool.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
    disk: DiskManager,
}

impl BufferPoolManager {
    pub fn new(disk: DiskManager, replacer: Box<dyn Replacer>, pool_size: usize) -> Self {
        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list = (0..pool_size).collect();
        Self {
            inner: Arc::new(PoolInner {
                frames,
                state: Mutex::new(PoolState {
                    page_table: HashMap::with_capacity(pool_size),
                    free_list,
                    replacer,
                    disk,
                }),
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.inner.frames.len()
    }

    /// Number of pages the disk store has allocated so far.
    pub fn num_disk_pages(&self) -> u32 {
        self.inner.state.lock().disk.num_pages()
    }

    /// Current pin count of a resident page; None if the page is not cached.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.inner.state.lock();
        let frame_id = *state.page_table.get(&page_id)?;
        Some(self.inner.frames[frame_id].pin_count.load(Ordering::SeqCst))
    }

    /// Pin a page and take its read latch.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame_id = self.pin_frame(page_id)?;
        let guard = self.inner.frames[frame_id].data.read_arc();
        Ok(ReadPageGuard {
            pool: self.inner.clone(),
            frame_id,
            page_id,
            guard: Some(guard),
        })
    }

    /// Pin a page and take its write latch. The page is marked dirty.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame_id = self.pin_frame(page_id)?;
        let frame = &self.inner.frames[frame_id];
        frame.is_dirty.store(true, Ordering::SeqCst);
        let guard = frame.data.write_arc();
        Ok(WritePageGuard {
            pool: self.inner.clone(),
            frame_id,
            page_id,
            guard: Some(guard),
        })
    }

    /// Allocate a fresh page, zero it, and persist the zeroed page so the id
    /// is backed on disk. Returns the page pinned under its write latch.
    pub fn new_page(&self) -> Result<(PageId, WritePageGuard)> {
        let (page_id, frame_id) = {
            let mut state = self.inner.state.lock();
            let frame_id = self.acquire_frame(&mut state)?;
            let page_id = state.disk.allocate_page()?;

            let frame = &self.inner.frames[frame_id];
            {
                let mut data = frame.data.write();
                data.fill(0);
                state.disk.write_page(page_id, &data[..])?;
            }
            frame.page_id.store(page_id.0, Ordering::SeqCst);
            frame.pin_count.store(1, Ordering::SeqCst);
            frame.is_dirty.store(true, Ordering::SeqCst);
            state.page_table.insert(page_id, frame_id);
            (page_id, frame_id)
        };

        let guard = self.inner.frames[frame_id].data.write_arc();
        Ok((
            page_id,
            WritePageGuard {
                pool: self.inner.clone(),
                frame_id,
                page_id,
                guard: Some(guard),
            },
        ))
    }

    /// Write a resident page back to disk, clearing its dirty flag.
    /// Returns false if the page is not resident or the id is invalid.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.inner.state.lock();
        if !page_id.is_valid() {
            return Ok(false);
        }
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = &self.inner.frames[frame_id];
        {
            let data = frame.data.read();
            state.disk.write_page(page_id, &data[..])?;
        }
        frame.is_dirty.store(false, Ordering::SeqCst);
        Ok(true)
    }

    /// Write every resident page back, clearing dirty flags. Clean pages are
    /// flushed too; the write is unconditional.
    pub fn flush_all(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        let resident: Vec<(PageId, FrameId)> =
            state.page_table.iter().map(|(&p, &f)| (p, f)).collect();
        for (page_id, frame_id) in resident {
            let frame = &self.inner.frames[frame_id];
            {
                let data = frame.data.read();
                state.disk.write_page(page_id, &data[..])?;
            }
            frame.is_dirty.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Drop a page from the pool and deallocate it on disk. Returns true when
    /// the page is gone (including when it was not resident), false while it
    /// is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.inner.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.inner.frames[frame_id];
        if frame.pin_count.load(Ordering::SeqCst) > 0 {
            return Ok(false);
        }

        state.page_table.remove(&page_id);
        state.replacer.pin(frame_id);
        frame.page_id.store(INVALID_PAGE_ID.0, Ordering::SeqCst);
        frame.is_dirty.store(false, Ordering::SeqCst);
        frame.data.write().fill(0);
        state.free_list.push_back(frame_id);
        state.disk.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Pin the frame holding `page_id`, loading the page from disk into a
    /// free or victim frame if it is not resident.
    fn pin_frame(&self, page_id: PageId) -> Result<FrameId> {
        if !page_id.is_valid() {
            bail!("cannot fetch invalid page id");
        }
        let mut state = self.inner.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.inner.frames[frame_id];
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            state.replacer.pin(frame_id);
            return Ok(frame_id);
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.inner.frames[frame_id];
        {
            let mut data = frame.data.write();
            if let Err(e) = state.disk.read_page(page_id, &mut data[..]) {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        }
        frame.page_id.store(page_id.0, Ordering::SeqCst);
        frame.pin_count.store(1, Ordering::SeqCst);
        frame.is_dirty.store(false, Ordering::SeqCst);
        state.page_table.insert(page_id, frame_id);
        Ok(frame_id)
    }

    /// Pick a frame for reuse: free list first, then the replacer. Writes a
    /// dirty victim back before handing the frame out.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        let (frame_id, evicted) = if let Some(frame_id) = state.free_list.pop_front() {
            (frame_id, false)
        } else if let Some(frame_id) = state.replacer.victim() {
            (frame_id, true)
        } else {
            return Err(DbError::OutOfMemory(
                "no free frame and no unpinned frame in the buffer pool".to_string(),
            )
            .into());
        };

        let frame = &self.inner.frames[frame_id];
        debug_assert_eq!(frame.pin_count.load(Ordering::SeqCst), 0);

        if evicted {
            let old_page = frame.resident_page();
            if frame.is_dirty.load(Ordering::SeqCst) {
                let data = frame.data.read();
                if let Err(e) = state.disk.write_page(old_page, &data[..]) {
                    drop(data);
                    state.replacer.unpin(frame_id);
                    return Err(e);
                }
            }
            debug!("evicting {} from frame {}", old_page, frame_id);
            state.page_table.remove(&old_page);
            frame.page_id.store(INVALID_PAGE_ID.0, Ordering::SeqCst);
            frame.is_dirty.store(false, Ordering::SeqCst);
        }
        Ok(frame_id)
    }
}

impl PoolInner {
    /// Drop one pin. At pin zero the frame becomes evictable.
    fn unpin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let frame = &self.frames[frame_id];
        let old = frame.pin_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(old > 0);
        if old == 1 {
            state.replacer.unpin(frame_id);
        }
    }
}

/// Shared view of a pinned page. Dropping releases the latch, then the pin.
pub struct ReadPageGuard {
    pool: Arc<PoolInner>,
    frame_id: FrameId,
    page_id: PageId,
    guard: Option<ArcRwLockReadGuard<RawRwLock, Box<PageBuf>>>,
}

impl ReadPageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for ReadPageGuard {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        self.guard.as_ref().unwrap()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // The latch must go before the pin: once the pin hits zero the frame
        // may be victimized, and the evictor takes the pool mutex first.
        self.guard.take();
        self.pool.unpin(self.frame_id);
    }
}

/// Exclusive view of a pinned page. Creation marks the page dirty.
pub struct WritePageGuard {
    pool: Arc<PoolInner>,
    frame_id: FrameId,
    page_id: PageId,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, Box<PageBuf>>>,
}

impl WritePageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for WritePageGuard {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        self.guard.as_ref().unwrap()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.as_mut().unwrap()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.pool.unpin(self.frame_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::lru::LruReplacer;
    use tempfile::tempdir;

    fn create_test_buffer_pool(pool_size: usize) -> Result<BufferPoolManager> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let disk = DiskManager::create(&file_path)?;
        let replacer = Box::new(LruReplacer::new(pool_size));
        Ok(BufferPoolManager::new(disk, replacer, pool_size))
    }

    #[test]
    fn test_new_page_then_fetch() -> Result<()> {
        let pool = create_test_buffer_pool(10)?;

        let (page_id, mut guard) = pool.new_page()?;
        assert_eq!(page_id, PageId(0));

        guard[0] = 42;
        guard[1] = 43;
        drop(guard);

        let guard = pool.fetch_page_read(page_id)?;
        assert_eq!(guard[0], 42);
        assert_eq!(guard[1], 43);

        Ok(())
    }

    #[test]
    fn test_pool_exhaustion_and_reuse() -> Result<()> {
        // Spec sample scenario: fill a 10-frame pool, fail the eleventh page,
        // unpin five, create four more, and still fetch page 0 back.
        let pool = create_test_buffer_pool(10)?;

        let mut guards = Vec::new();
        for i in 0..10 {
            let (page_id, mut guard) = pool.new_page()?;
            assert_eq!(page_id, PageId(i));
            guard[0] = i as u8;
            guards.push(guard);
        }

        assert!(pool.new_page().is_err());
        assert!(pool.fetch_page_read(PageId(99)).is_err());

        // Unpin pages 0..4.
        for guard in guards.drain(0..5) {
            drop(guard);
        }

        for _ in 0..4 {
            let (_, guard) = pool.new_page()?;
            guards.push(guard);
        }

        // One unpinned frame remains, so page 0 can come back in.
        let g0 = pool.fetch_page_read(PageId(0))?;
        assert_eq!(g0[0], 0);

        Ok(())
    }

    #[test]
    fn test_binary_data_survives_eviction() -> Result<()> {
        let pool = create_test_buffer_pool(2)?;

        let mut pattern = [0u8; PAGE_SIZE];
        for (i, b) in pattern.iter_mut().enumerate() {
            *b = (i * 31 % 251) as u8;
        }
        pattern[PAGE_SIZE / 2] = 0;
        pattern[PAGE_SIZE - 1] = 0;

        let (page_id, mut guard) = pool.new_page()?;
        guard.copy_from_slice(&pattern);
        drop(guard);

        // Force eviction of page 0.
        let (_, g1) = pool.new_page()?;
        drop(g1);
        let (_, g2) = pool.new_page()?;
        drop(g2);

        let guard = pool.fetch_page_read(page_id)?;
        assert_eq!(&guard[..], &pattern[..]);

        Ok(())
    }

    #[test]
    fn test_pin_count_tracking() -> Result<()> {
        let pool = create_test_buffer_pool(4)?;

        let (page_id, guard) = pool.new_page()?;
        assert_eq!(pool.pin_count(page_id), Some(1));

        let guard2 = pool.fetch_page_read(page_id)?;
        drop(guard);
        assert_eq!(pool.pin_count(page_id), Some(1));
        drop(guard2);
        assert_eq!(pool.pin_count(page_id), Some(0));

        Ok(())
    }

    #[test]
    fn test_delete_page() -> Result<()> {
        let pool = create_test_buffer_pool(4)?;

        let (page_id, guard) = pool.new_page()?;
        // Pinned pages cannot be deleted.
        assert!(!pool.delete_page(page_id)?);
        drop(guard);

        assert!(pool.delete_page(page_id)?);
        // Deleting a non-resident page is a no-op success.
        assert!(pool.delete_page(page_id)?);
        assert_eq!(pool.pin_count(page_id), None);

        Ok(())
    }

    #[test]
    fn test_flush_page() -> Result<()> {
        let pool = create_test_buffer_pool(4)?;

        let (page_id, mut guard) = pool.new_page()?;
        guard[0] = 99;
        drop(guard);

        assert!(pool.flush_page(page_id)?);
        assert!(!pool.flush_page(PageId(1234))?);
        assert!(!pool.flush_page(INVALID_PAGE_ID)?);

        pool.flush_all()?;

        Ok(())
    }

    #[test]
    fn test_unpinned_page_evicted_in_lru_order() -> Result<()> {
        let pool = create_test_buffer_pool(2)?;

        let (p0, mut g0) = pool.new_page()?;
        g0[0] = 1;
        drop(g0);

        let (_p1, g1) = pool.new_page()?;

        // Frame of p0 is the only unpinned one; a third page evicts it.
        let (_p2, g2) = pool.new_page()?;
        assert_eq!(pool.pin_count(p0), None);

        drop(g1);
        drop(g2);

        let g0 = pool.fetch_page_read(p0)?;
        assert_eq!(g0[0], 1);

        Ok(())
    }

    #[test]
    fn test_concurrent_fetch_and_unpin() -> Result<()> {
        use std::thread;

        let pool = create_test_buffer_pool(8)?;
        let mut ids = Vec::new();
        for _ in 0..8 {
            let (page_id, guard) = pool.new_page()?;
            ids.push(page_id);
            drop(guard);
        }

        let mut handles = Vec::new();
        for t in 0..4 {
            let pool = pool.clone();
            let ids = ids.clone();
            handles.push(thread::spawn(move || {
                for round in 0..50 {
                    let page_id = ids[(t + round) % ids.len()];
                    let guard = pool.fetch_page_read(page_id).unwrap();
                    let _ = guard[0];
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        for id in ids {
            assert_eq!(pool.pin_count(id), Some(0));
        }

        Ok(())
    }
}
