//! Fixed-size pinning buffer pool with clock-hand eviction over pages
//! managed by the [`FileManager`].
//!
//! `get_page`/`append_page` pin and return a slot index; callers read/write
//! through [`BufferPool::page_bytes`]/[`BufferPool::page_bytes_mut`] (the
//! latter marks the slot dirty) and must call [`BufferPool::unpin`] when
//! done. Pin/unpin and slot bookkeeping are serialized by a single mutex;
//! this module does not attempt to overlap disk I/O with other pins, which
//! is a deliberate simplification of the original's "I/O may proceed
//! unlocked after the slot is claimed" note — out of scope for a
//! single-threaded-per-query engine whose only concurrency is inter-query.

use std::collections::HashMap;

use log::{debug, error, trace, warn};
use parking_lot::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::storage::config::{EngineConfig, PAGE_SIZE};
use crate::storage::file_manager::{FileId, FileManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct PageId {
    file_id: FileId,
    page_number: u64,
}

struct Slot {
    page_id: PageId,
    bytes: Box<[u8; PAGE_SIZE]>,
    pins: u32,
    dirty: bool,
    referenced: bool,
}

struct Inner {
    file_manager: FileManager,
    slots: Vec<Option<Slot>>,
    index: HashMap<PageId, usize>,
    clock_hand: usize,
}

pub struct BufferPool {
    inner: Mutex<Inner>,
}

/// Opaque handle to a pinned page: the slot index plus enough identity to
/// make misuse (unpinning the wrong pool) a debug-time assertion failure.
#[derive(Debug, Clone, Copy)]
pub struct PageHandle {
    slot: usize,
}

impl BufferPool {
    pub fn new(file_manager: FileManager, config: &EngineConfig) -> Self {
        let mut slots = Vec::with_capacity(config.buffer_pool_size);
        slots.resize_with(config.buffer_pool_size, || None);
        BufferPool {
            inner: Mutex::new(Inner {
                file_manager,
                slots,
                index: HashMap::new(),
                clock_hand: 0,
            }),
        }
    }

    pub fn get_page(&self, file_id: FileId, page_number: u64) -> EngineResult<PageHandle> {
        let mut inner = self.inner.lock();
        let page_id = PageId { file_id, page_number };
        if let Some(&slot) = inner.index.get(&page_id) {
            let s = inner.slots[slot].as_mut().unwrap();
            s.pins += 1;
            s.referenced = true;
            trace!("buffer pool hit file={:?} page={}", file_id, page_number);
            return Ok(PageHandle { slot });
        }
        trace!("buffer pool miss file={:?} page={}", file_id, page_number);
        let slot = inner.claim_slot()?;
        let mut bytes = Box::new([0u8; PAGE_SIZE]);
        inner.file_manager.read_page(file_id, page_number, &mut bytes)?;
        inner.index.insert(page_id, slot);
        inner.slots[slot] = Some(Slot {
            page_id,
            bytes,
            pins: 1,
            dirty: false,
            referenced: true,
        });
        Ok(PageHandle { slot })
    }

    pub fn append_page(&self, file_id: FileId) -> EngineResult<PageHandle> {
        let mut inner = self.inner.lock();
        let page_number = inner.file_manager.append_page(file_id)?;
        let page_id = PageId { file_id, page_number };
        let slot = inner.claim_slot()?;
        inner.index.insert(page_id, slot);
        inner.slots[slot] = Some(Slot {
            page_id,
            bytes: Box::new([0u8; PAGE_SIZE]),
            pins: 1,
            dirty: false,
            referenced: true,
        });
        Ok(PageHandle { slot })
    }

    pub fn page_bytes(&self, handle: PageHandle) -> Box<[u8; PAGE_SIZE]> {
        let inner = self.inner.lock();
        let s = inner.slots[handle.slot].as_ref().expect("unpinned/evicted slot read");
        s.bytes.clone()
    }

    pub fn with_page<R>(&self, handle: PageHandle, f: impl FnOnce(&[u8; PAGE_SIZE]) -> R) -> R {
        let inner = self.inner.lock();
        let s = inner.slots[handle.slot].as_ref().expect("unpinned/evicted slot read");
        f(&s.bytes)
    }

    /// Mutate and mark dirty.
    pub fn with_page_mut<R>(&self, handle: PageHandle, f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R) -> R {
        let mut inner = self.inner.lock();
        let s = inner.slots[handle.slot].as_mut().expect("unpinned/evicted slot write");
        s.dirty = true;
        f(&mut s.bytes)
    }

    pub fn unpin(&self, handle: PageHandle) {
        let mut inner = self.inner.lock();
        if let Some(s) = inner.slots[handle.slot].as_mut() {
            debug_assert!(s.pins > 0, "unpin with pins == 0");
            s.pins = s.pins.saturating_sub(1);
        }
    }

    pub fn flush(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.flush_all()
    }

    /// Evict all pages belonging to `file_id` (dirty pages are discarded,
    /// matching the contract: `remove` deletes the file outright) and
    /// delete the backing file.
    pub fn remove_file(&self, file_id: FileId) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        let doomed: Vec<usize> = inner
            .index
            .iter()
            .filter(|(pid, _)| pid.file_id == file_id)
            .map(|(_, &slot)| slot)
            .collect();
        for slot in doomed {
            let page_id = inner.slots[slot].as_ref().unwrap().page_id;
            inner.index.remove(&page_id);
            inner.slots[slot] = None;
        }
        inner.file_manager.remove(file_id)
    }

    /// Resolve (creating on first use) the logical file id for `name`,
    /// delegating to the pool's file manager.
    pub fn get_file_id(&self, name: &str) -> EngineResult<FileId> {
        let mut inner = self.inner.lock();
        inner.file_manager.get_file_id(name)
    }

    pub fn count_pages(&self, file_id: FileId) -> EngineResult<u64> {
        let mut inner = self.inner.lock();
        inner.file_manager.count_pages(file_id)
    }
}

impl Drop for BufferPool {
    /// Best-effort flush on drop. A page still pinned at this point is a
    /// caller bug (a `PageHandle` outlived the query that took it) rather
    /// than something this destructor can fix; log it and flush anyway,
    /// matching the original's page destructor, which logs
    /// `"Destroying pinned page"` and proceeds rather than aborting.
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        for slot in inner.slots.iter().flatten() {
            if slot.pins > 0 {
                error!(
                    "destroying pinned page file={:?} page={} pins={}",
                    slot.page_id.file_id, slot.page_id.page_number, slot.pins
                );
            }
        }
        if let Err(e) = inner.flush_all() {
            error!("buffer pool flush on drop failed: {e}");
        }
    }
}

impl Inner {
    fn flush_all(&mut self) -> EngineResult<()> {
        for slot in self.slots.iter_mut().flatten() {
            if slot.dirty {
                self.file_manager
                    .write_page(slot.page_id.file_id, slot.page_id.page_number, &slot.bytes)?;
                slot.dirty = false;
            }
        }
        debug!("buffer pool flush complete");
        Ok(())
    }

    /// Find a free or evictable slot. Clock policy: advance the hand until
    /// a pin-count-0 slot with a clear reference bit is found; referenced
    /// slots have their bit cleared as the hand passes. A pin-count-0 dirty
    /// victim is flushed before reuse. No unpinned slot anywhere is fatal.
    fn claim_slot(&mut self) -> EngineResult<usize> {
        if let Some((i, slot)) = self.slots.iter().enumerate().find(|(_, s)| s.is_none()) {
            let _ = slot;
            return Ok(i);
        }

        let n = self.slots.len();
        let mut scanned = 0usize;
        loop {
            if scanned > 2 * n {
                warn!("buffer pool exhausted: no unpinned slot available");
                return Err(EngineError::logic("buffer pool exhausted: all pages pinned"));
            }
            let i = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % n;
            scanned += 1;

            let evict = {
                let s = self.slots[i].as_mut().unwrap();
                if s.pins > 0 {
                    false
                } else if s.referenced {
                    s.referenced = false;
                    false
                } else {
                    true
                }
            };

            if evict {
                let s = self.slots[i].take().unwrap();
                self.index.remove(&s.page_id);
                if s.dirty {
                    self.file_manager
                        .write_page(s.page_id.file_id, s.page_id.page_number, &s.bytes)?;
                }
                return Ok(i);
            }
        }
    }
}
