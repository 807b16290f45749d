//! # Buffer slots and hash buckets
//!
//! The buffer pool is an arena of [`Slot`]s. Each bucket threads a circular,
//! doubly linked list through the slots it owns, using slot indices as links:
//!
//! ```text
//!          head (MRU)                          head.prev (LRU)
//!             │                                      │
//!   ┌──────►[ 4 ]◄──►[ 0 ]◄──►[ 9 ]◄── .. ──►[ 2 ]◄──┘
//!   └──────────────────────────────────────────┘
//! ```
//!
//! A slot's identity, reference count and links are atomics so the arena can
//! be shared, but they are only ever changed by a holder of the lock of the
//! bucket whose list contains the slot. That lock makes `Relaxed` sufficient.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use kernel_info::memory::BSIZE;
use kernel_sync::{SleepLock, SpinLock, SpinLockGuard};
use log::error;

/// Device number of a slot that never held a block.
pub const NODEV: u32 = u32::MAX;

pub(crate) struct Slot {
    dev: AtomicU32,
    blockno: AtomicU32,
    refcnt: AtomicU32,
    prev: AtomicUsize,
    next: AtomicUsize,
    /// Payload mirrors the device. Read and written under `data`'s lock.
    pub(crate) valid: AtomicBool,
    pub(crate) data: SleepLock<[u8; BSIZE]>,
}

impl Slot {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            dev: AtomicU32::new(NODEV),
            blockno: AtomicU32::new(0),
            refcnt: AtomicU32::new(0),
            prev: AtomicUsize::new(index),
            next: AtomicUsize::new(index),
            valid: AtomicBool::new(false),
            data: SleepLock::new("buffer", [0; BSIZE]),
        }
    }

    fn holds(&self, dev: u32, blockno: u32) -> bool {
        self.dev.load(Ordering::Relaxed) == dev
            && dev != NODEV
            && self.blockno.load(Ordering::Relaxed) == blockno
    }

    fn prev(&self) -> usize {
        self.prev.load(Ordering::Relaxed)
    }

    fn next(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }
}

/// A locked bucket: its list, plus the metadata of every slot on it.
pub(crate) struct Ring {
    head: Option<usize>,
    len: usize,
}

impl Ring {
    const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Slot indices from MRU to LRU.
    fn mru<'s>(&self, slots: &'s [Slot]) -> impl Iterator<Item = usize> + 's {
        let mut cursor = self.head;
        (0..self.len).filter_map(move |_| {
            let i = cursor?;
            cursor = Some(slots[i].next());
            Some(i)
        })
    }

    /// Slot indices from LRU to MRU.
    fn lru<'s>(&self, slots: &'s [Slot]) -> impl Iterator<Item = usize> + 's {
        let mut cursor = self.head.map(|h| slots[h].prev());
        (0..self.len).filter_map(move |_| {
            let i = cursor?;
            cursor = Some(slots[i].prev());
            Some(i)
        })
    }

    fn owns(&self, slots: &[Slot], i: usize) -> bool {
        self.mru(slots).any(|j| j == i)
    }

    /// The slot bound to `(dev, blockno)`, if this bucket caches it.
    pub(crate) fn find(&self, slots: &[Slot], dev: u32, blockno: u32) -> Option<usize> {
        self.mru(slots).find(|&i| slots[i].holds(dev, blockno))
    }

    /// The least recently used slot nobody references.
    pub(crate) fn lru_unused(&self, slots: &[Slot]) -> Option<usize> {
        self.lru(slots)
            .find(|&i| slots[i].refcnt.load(Ordering::Relaxed) == 0)
    }

    /// Insert `i` at the MRU end. `i` must not be on any list.
    pub(crate) fn push_front(&mut self, slots: &[Slot], i: usize) {
        match self.head {
            None => {
                slots[i].prev.store(i, Ordering::Relaxed);
                slots[i].next.store(i, Ordering::Relaxed);
            }
            Some(h) => {
                let tail = slots[h].prev();
                slots[i].prev.store(tail, Ordering::Relaxed);
                slots[i].next.store(h, Ordering::Relaxed);
                slots[tail].next.store(i, Ordering::Relaxed);
                slots[h].prev.store(i, Ordering::Relaxed);
            }
        }
        self.head = Some(i);
        self.len += 1;
    }

    /// Take `i` off this list.
    pub(crate) fn unlink(&mut self, slots: &[Slot], i: usize) {
        let (prev, next) = (slots[i].prev(), slots[i].next());
        if next == i {
            self.head = None;
        } else {
            slots[prev].next.store(next, Ordering::Relaxed);
            slots[next].prev.store(prev, Ordering::Relaxed);
            if self.head == Some(i) {
                self.head = Some(next);
            }
        }
        self.len -= 1;
    }

    pub(crate) fn move_to_front(&mut self, slots: &[Slot], i: usize) {
        if self.head != Some(i) {
            self.unlink(slots, i);
            self.push_front(slots, i);
        }
    }

    /// Bind slot `i` to a new block: one reference, payload invalid.
    pub(crate) fn rebind(&mut self, slots: &[Slot], i: usize, dev: u32, blockno: u32) {
        debug_assert!(self.owns(slots, i), "buffer {i} is not on this bucket");
        let slot = &slots[i];
        slot.dev.store(dev, Ordering::Relaxed);
        slot.blockno.store(blockno, Ordering::Relaxed);
        slot.valid.store(false, Ordering::Relaxed);
        slot.refcnt.store(1, Ordering::Relaxed);
    }

    pub(crate) fn refcnt(&self, slots: &[Slot], i: usize) -> u32 {
        debug_assert!(self.owns(slots, i), "buffer {i} is not on this bucket");
        slots[i].refcnt.load(Ordering::Relaxed)
    }

    pub(crate) fn add_ref(&mut self, slots: &[Slot], i: usize) -> u32 {
        debug_assert!(self.owns(slots, i), "buffer {i} is not on this bucket");
        let rc = slots[i].refcnt.load(Ordering::Relaxed) + 1;
        slots[i].refcnt.store(rc, Ordering::Relaxed);
        rc
    }

    /// Drop one reference on behalf of `op`.
    ///
    /// # Panics
    /// If the slot has no references left.
    pub(crate) fn drop_ref(&mut self, slots: &[Slot], i: usize, op: &str) -> u32 {
        debug_assert!(self.owns(slots, i), "buffer {i} is not on this bucket");
        let rc = slots[i].refcnt.load(Ordering::Relaxed);
        if rc == 0 {
            error!("{op}: buffer {i} has no references");
            panic!("{op}: buffer {i} has no references");
        }
        slots[i].refcnt.store(rc - 1, Ordering::Relaxed);
        rc - 1
    }
}

/// One hash partition of the pool.
pub(crate) struct Bucket {
    ring: SpinLock<Ring>,
}

impl Bucket {
    pub(crate) const fn new() -> Self {
        Self {
            ring: SpinLock::with_name("bcache.bucket", Ring::new()),
        }
    }

    pub(crate) fn lock(&self) -> SpinLockGuard<'_, Ring> {
        self.ring.lock()
    }
}
