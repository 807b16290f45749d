use crate::bucket::{Bucket, NODEV, Slot};
use crate::device::{BlockDevice, Direction};
use crate::error::BufferError;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::Ordering;
use kernel_info::memory::BSIZE;
use kernel_info::param::{NBUCKET, NBUF};
use kernel_sync::{Scheduler, SleepLockGuard};
use log::{debug, error, info, trace};

/// Sizing of a [`BufferCache`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferCacheConfig {
    /// Buffers in the pool.
    pub buffers: usize,
    /// Hash buckets the pool is partitioned into.
    pub buckets: usize,
}

impl Default for BufferCacheConfig {
    fn default() -> Self {
        Self {
            buffers: NBUF,
            buckets: NBUCKET,
        }
    }
}

/// Cache of disk blocks in a fixed pool of buffers.
///
/// Each buffer has its own sleep lock, so at most one task uses a cached
/// block at a time. Lookups are partitioned into buckets by block number;
/// within a bucket, unused buffers are recycled least recently used first.
/// A bucket without an unused buffer takes one from another bucket.
///
/// ## Lock protocol
/// - A bucket lock is never held while waiting for a buffer's sleep lock.
/// - Two bucket locks are taken in ascending bucket order.
/// - Device transfers only happen under the buffer's sleep lock.
pub struct BufferCache {
    device: Arc<dyn BlockDevice>,
    sched: Arc<dyn Scheduler>,
    slots: Box<[Slot]>,
    buckets: Box<[Bucket]>,
}

impl BufferCache {
    /// All buffers start out unused, on bucket 0.
    ///
    /// # Panics
    /// If `config` asks for no buffers or no buckets.
    #[must_use]
    pub fn new(
        config: BufferCacheConfig,
        device: Arc<dyn BlockDevice>,
        sched: Arc<dyn Scheduler>,
    ) -> Self {
        assert!(
            config.buffers > 0 && config.buckets > 0,
            "binit: {} buffers in {} buckets",
            config.buffers,
            config.buckets
        );
        let slots: Box<[Slot]> = (0..config.buffers).map(Slot::new).collect();
        let buckets: Box<[Bucket]> = (0..config.buckets).map(|_| Bucket::new()).collect();
        {
            let mut first = buckets[0].lock();
            for i in 0..slots.len() {
                first.push_front(&slots, i);
            }
        }
        info!(
            "binit: {} buffers of {BSIZE} bytes in {} buckets",
            config.buffers, config.buckets
        );
        Self {
            device,
            sched,
            slots,
            buckets,
        }
    }

    #[inline]
    fn bucket_of(&self, blockno: u32) -> usize {
        blockno as usize % self.buckets.len()
    }

    /// The buffer for `(dev, blockno)`, locked by the calling task.
    ///
    /// The payload is only meaningful if [`LockedBuffer::is_valid`]; use
    /// [`read`](Self::read) to have it filled from the device.
    ///
    /// # Errors
    /// [`BufferError::Interrupted`] if the task was cancelled while another
    /// task held the buffer.
    ///
    /// # Panics
    /// - `bget: no buffers` if every buffer is referenced.
    /// - If `dev` is [`NODEV`].
    pub fn acquire(&self, dev: u32, blockno: u32) -> Result<LockedBuffer<'_>, BufferError> {
        assert_ne!(dev, NODEV, "bget: device {NODEV:#x} is reserved");
        let index = self.claim(dev, blockno);
        match self.slots[index].data.lock(self.sched.as_ref()) {
            Ok(guard) => Ok(LockedBuffer {
                cache: self,
                index,
                dev,
                blockno,
                guard: Some(guard),
            }),
            Err(_) => {
                self.put(index, blockno, "bget");
                trace!("bget: cancelled while waiting for block {blockno} of dev {dev}");
                Err(BufferError::Interrupted { dev, blockno })
            }
        }
    }

    /// Reserve a buffer for `(dev, blockno)` and return its slot, with the
    /// reference already counted.
    fn claim(&self, dev: u32, blockno: u32) -> usize {
        let t = self.bucket_of(blockno);
        {
            let mut ring = self.buckets[t].lock();
            if let Some(i) = ring.find(&self.slots, dev, blockno) {
                ring.add_ref(&self.slots, i);
                return i;
            }
            if let Some(i) = ring.lru_unused(&self.slots) {
                ring.rebind(&self.slots, i, dev, blockno);
                ring.move_to_front(&self.slots, i);
                trace!("bget: buffer {i} now holds block {blockno} of dev {dev}");
                return i;
            }
        }

        for victim in (0..self.buckets.len()).filter(|&b| b != t) {
            let (low, high) = if victim < t { (victim, t) } else { (t, victim) };
            let low = self.buckets[low].lock();
            let high = self.buckets[high].lock();
            let (mut target, mut other) = if victim < t { (high, low) } else { (low, high) };

            // Another core may have cached the block while no lock was held.
            if let Some(i) = target.find(&self.slots, dev, blockno) {
                target.add_ref(&self.slots, i);
                return i;
            }
            if let Some(i) = other.lru_unused(&self.slots) {
                other.unlink(&self.slots, i);
                target.push_front(&self.slots, i);
                target.rebind(&self.slots, i, dev, blockno);
                debug!("bget: block {blockno} of dev {dev} took buffer {i} from bucket {victim}");
                return i;
            }
        }

        error!("bget: no buffers for block {blockno} of dev {dev}");
        panic!("bget: no buffers");
    }

    /// Give back one reference to slot `index`, bound to `blockno`.
    fn put(&self, index: usize, blockno: u32, op: &str) {
        let mut ring = self.buckets[self.bucket_of(blockno)].lock();
        ring.drop_ref(&self.slots, index, op);
    }

    /// The buffer for `(dev, blockno)`, locked and holding the block's
    /// contents. The device is only read if the cached copy is not valid.
    ///
    /// # Errors
    /// [`BufferError::Interrupted`], see [`acquire`](Self::acquire).
    ///
    /// # Panics
    /// `bget: no buffers` if every buffer is referenced.
    pub fn read(&self, dev: u32, blockno: u32) -> Result<LockedBuffer<'_>, BufferError> {
        let mut buf = self.acquire(dev, blockno)?;
        let slot = &self.slots[buf.index];
        if !slot.valid.load(Ordering::Relaxed) {
            self.device.transfer(dev, blockno, &mut buf, Direction::Read);
            slot.valid.store(true, Ordering::Relaxed);
        }
        Ok(buf)
    }

    /// Write the payload of `buf` to the device.
    ///
    /// # Panics
    /// `bwrite: ...` if the calling task does not hold `buf`.
    pub fn write(&self, buf: &mut LockedBuffer<'_>) {
        buf.assert_holding("bwrite");
        let (dev, blockno) = (buf.dev, buf.blockno);
        self.device.transfer(dev, blockno, buf, Direction::Write);
    }

    /// Unlock `buf` and drop its reference. Same as dropping it, but checks
    /// that the calling task is the holder.
    ///
    /// # Panics
    /// `brelse: ...` if the calling task does not hold `buf`.
    pub fn release(&self, buf: LockedBuffer<'_>) {
        buf.assert_holding("brelse");
        drop(buf);
    }

    /// Keep the block of `buf` cached after `buf` is released, until the
    /// returned pin is given back with [`unpin`](Self::unpin).
    pub fn pin(&self, buf: &LockedBuffer<'_>) -> BufferPin {
        let mut ring = self.buckets[self.bucket_of(buf.blockno)].lock();
        let rc = ring.add_ref(&self.slots, buf.index);
        trace!("bpin: block {} of dev {} has {rc} references", buf.blockno, buf.dev);
        BufferPin {
            index: buf.index,
            dev: buf.dev,
            blockno: buf.blockno,
        }
    }

    /// # Panics
    /// `bunpin: ...` if the buffer has no references left.
    pub fn unpin(&self, pin: BufferPin) {
        self.put(pin.index, pin.blockno, "bunpin");
    }

    /// References to the buffer caching `(dev, blockno)`, or `None` if the
    /// block is not cached.
    #[must_use]
    pub fn ref_count(&self, dev: u32, blockno: u32) -> Option<u32> {
        let ring = self.buckets[self.bucket_of(blockno)].lock();
        let i = ring.find(&self.slots, dev, blockno)?;
        Some(ring.refcnt(&self.slots, i))
    }

    #[must_use]
    pub fn is_cached(&self, dev: u32, blockno: u32) -> bool {
        self.ref_count(dev, blockno).is_some()
    }

    /// Buffers currently on bucket `bucket`.
    ///
    /// # Panics
    /// If `bucket` is not a bucket index.
    #[must_use]
    pub fn bucket_len(&self, bucket: usize) -> usize {
        self.buckets[bucket].lock().len()
    }

    #[must_use]
    pub fn buffers(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }
}

impl fmt::Debug for BufferCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferCache")
            .field("buffers", &self.slots.len())
            .field("buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

/// A cached block, locked by the task that acquired it.
///
/// Dereferences to the block payload. Dropping it releases the buffer: the
/// sleep lock is unlocked first, then the reference is given back.
pub struct LockedBuffer<'a> {
    cache: &'a BufferCache,
    index: usize,
    dev: u32,
    blockno: u32,
    guard: Option<SleepLockGuard<'a, [u8; BSIZE]>>,
}

impl LockedBuffer<'_> {
    #[inline]
    #[must_use]
    pub const fn dev(&self) -> u32 {
        self.dev
    }

    #[inline]
    #[must_use]
    pub const fn blockno(&self) -> u32 {
        self.blockno
    }

    /// Whether the payload holds the block's contents.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cache.slots[self.index].valid.load(Ordering::Relaxed)
    }

    /// Whether the calling task holds this buffer.
    #[must_use]
    pub fn holding(&self) -> bool {
        self.guard.as_ref().is_some_and(SleepLockGuard::holding)
    }

    fn assert_holding(&self, op: &str) {
        if !self.holding() {
            error!("{op}: block {} of dev {} is not held by the caller", self.blockno, self.dev);
            panic!("{op}: block {} of dev {} is not held by the caller", self.blockno, self.dev);
        }
    }
}

impl Deref for LockedBuffer<'_> {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        match &self.guard {
            Some(guard) => &**guard,
            None => unreachable!("buffer used after release"),
        }
    }
}

impl DerefMut for LockedBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.guard {
            Some(guard) => &mut **guard,
            None => unreachable!("buffer used after release"),
        }
    }
}

impl Drop for LockedBuffer<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.cache.put(self.index, self.blockno, "brelse");
    }
}

impl fmt::Debug for LockedBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedBuffer")
            .field("dev", &self.dev)
            .field("blockno", &self.blockno)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

/// An extra reference that keeps a block cached while no task holds it,
/// e.g. for a block logged but not yet installed.
///
/// Must be handed back to [`BufferCache::unpin`].
#[must_use = "a pin keeps its buffer from being recycled until it is unpinned"]
#[derive(Debug)]
pub struct BufferPin {
    index: usize,
    dev: u32,
    blockno: u32,
}

impl BufferPin {
    #[must_use]
    pub const fn dev(&self) -> u32 {
        self.dev
    }

    #[must_use]
    pub const fn blockno(&self) -> u32 {
        self.blockno
    }
}
