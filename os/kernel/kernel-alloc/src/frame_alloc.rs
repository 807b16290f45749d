//! # Per-core physical frame allocator
//!
//! Free frames are kept on one [`FreeList`] per core, each behind its own
//! [`SpinLock`], so cores allocating in parallel do not contend. A core whose
//! list runs dry steals from the others.
//!
//! ```text
//!  managed range  [ core 0 slice | core 1 slice | ... | core n-1 slice ]
//!                        │               │                    │
//!  free lists      SpinLock<FreeList>  SpinLock<FreeList> ...  SpinLock<FreeList>
//!                        ▲
//!                 allocate() on core 0: pop here first, then visit 1, 2, ..
//! ```
//!
//! ## Lock protocol
//! - At most one free-list lock is held at any time; stealing visits the
//!   other lists one by one in ascending core order.
//! - The share-count table lock is never held together with a free-list lock.
//! - Allocation runs with preemption disabled ([`PreemptGuard`]), so the core
//!   index stays valid for the whole operation.

use crate::error::{AllocError, RangeError};
use crate::frame::{FrameRange, PageFrame};
use crate::free_list::FreeList;
use crate::phys_mapper::{DirectMapper, PhysMapper};
use crate::refcount::ReferenceTable;
use alloc::boxed::Box;
use alloc::sync::Arc;
use kernel_info::param::NCPU;
use kernel_sync::{Cpu, PreemptGuard, SpinLock};
use log::{debug, error, info, trace};

/// Byte pattern written over a frame handed out by `allocate`.
#[cfg(feature = "poison")]
pub const ALLOC_JUNK: u8 = 0x05;

/// Byte pattern written over a frame returned to a free list.
#[cfg(feature = "poison")]
pub const FREE_JUNK: u8 = 0x01;

/// Which free list a frame goes back to once its last owner frees it.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum FreePolicy {
    /// The core whose slice of the managed range contains the frame.
    #[default]
    HomeCore,
    /// The core that performs the free.
    CallingCore,
}

/// Construction parameters of a [`PhysicalAllocator`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub range: FrameRange,
    pub free_policy: FreePolicy,
}

impl AllocatorConfig {
    #[must_use]
    pub const fn new(range: FrameRange) -> Self {
        Self {
            range,
            free_policy: FreePolicy::HomeCore,
        }
    }

    /// Manage everything from the end of the kernel image up to `PHYS_TOP`.
    #[must_use]
    pub const fn after_kernel(kernel_end: u64) -> Self {
        Self::new(FrameRange::after_kernel(kernel_end))
    }

    #[must_use]
    pub const fn with_free_policy(mut self, free_policy: FreePolicy) -> Self {
        self.free_policy = free_policy;
        self
    }
}

/// Physical page allocator sharded per core, with page share counts for
/// copy-on-write.
///
/// A frame is either on exactly one free list (share count 0) or owned by at
/// least one caller (share count ≥ 1).
pub struct PhysicalAllocator<M: PhysMapper = DirectMapper> {
    range: FrameRange,
    mapper: M,
    cpu: Arc<dyn Cpu>,
    shards: Box<[SpinLock<FreeList>]>,
    refs: ReferenceTable,
    policy: FreePolicy,
}

impl<M: PhysMapper> PhysicalAllocator<M> {
    /// Take over `config.range` and put every frame in it on the free list of
    /// its home core.
    ///
    /// # Errors
    /// - [`RangeError::Empty`] if the range holds no whole frame.
    /// - [`RangeError::TooLarge`] if the range holds more frames than a share
    ///   table can index.
    /// - [`RangeError::NoCpus`] if `cpu` reports zero cores.
    /// - [`RangeError::TooManyCpus`] if `cpu` reports more than [`NCPU`].
    ///
    /// # Safety
    /// - `mapper` maps every frame of the range to writable memory.
    /// - Nothing else uses that memory for the lifetime of the allocator.
    pub unsafe fn new(
        config: AllocatorConfig,
        mapper: M,
        cpu: Arc<dyn Cpu>,
    ) -> Result<Self, RangeError> {
        let range = config.range;
        if range.is_empty() {
            return Err(RangeError::Empty {
                start: range.start(),
                end: range.end(),
            });
        }
        if u32::try_from(range.len()).is_err() {
            return Err(RangeError::TooLarge {
                frames: range.len(),
            });
        }
        let ncpu = cpu.count();
        if ncpu == 0 {
            return Err(RangeError::NoCpus);
        }
        if ncpu > NCPU {
            return Err(RangeError::TooManyCpus {
                cpus: ncpu,
                max: NCPU,
            });
        }

        let shards = (0..ncpu)
            .map(|_| SpinLock::with_name("kmem", FreeList::new()))
            .collect();
        let this = Self {
            range,
            mapper,
            cpu,
            shards,
            refs: ReferenceTable::new(range),
            policy: config.free_policy,
        };

        // Every count starts at 1; a single free per frame puts it on its list.
        for frame in range.frames() {
            this.free(frame);
        }

        info!(
            "kalloc: {} frames in {:#x}..{:#x} across {ncpu} cores ({} free policy)",
            range.len(),
            range.start(),
            range.end(),
            match this.policy {
                FreePolicy::HomeCore => "home-core",
                FreePolicy::CallingCore => "calling-core",
            }
        );
        Ok(this)
    }

    /// Allocate one frame with share count 1.
    ///
    /// Tries the calling core's list first, then the other cores' lists in
    /// ascending order.
    ///
    /// # Errors
    /// [`AllocError::Exhausted`] if every free list is empty.
    pub fn allocate(&self) -> Result<PageFrame, AllocError> {
        let pin = PreemptGuard::new(self.cpu.as_ref());
        let me = pin.cpu_id();

        let frame = match self.pop_from(me) {
            Some(frame) => frame,
            None => self.steal(me).ok_or(AllocError::Exhausted)?,
        };

        self.refs.reset(frame);
        #[cfg(feature = "poison")]
        unsafe {
            core::ptr::write_bytes(self.mapper.frame_ptr(frame), ALLOC_JUNK, PageFrame::SIZE);
        }
        trace!("kalloc: {frame} allocated on core {me}");
        drop(pin);
        Ok(frame)
    }

    fn pop_from(&self, shard: usize) -> Option<PageFrame> {
        let mut list = self.shards[shard].lock();
        unsafe { list.pop(&self.mapper) }
    }

    fn steal(&self, me: usize) -> Option<PageFrame> {
        (0..self.shards.len())
            .filter(|&victim| victim != me)
            .find_map(|victim| {
                let frame = self.pop_from(victim)?;
                debug!("kalloc: core {me} stole {frame} from core {victim}");
                Some(frame)
            })
    }

    /// Give up one share of `frame`. The frame returns to a free list when
    /// its last share is given up.
    ///
    /// # Panics
    /// - `kfree: ...` if `frame` is misaligned or outside the managed range.
    /// - `kfree: ...` if `frame` is already free.
    pub fn free(&self, frame: PageFrame) {
        if !frame.is_page_aligned() || !self.range.contains(frame) {
            error!(
                "kfree: {frame} is not a frame of {:#x}..{:#x}",
                self.range.start(),
                self.range.end()
            );
            panic!(
                "kfree: {frame} is not a frame of {:#x}..{:#x}",
                self.range.start(),
                self.range.end()
            );
        }

        let remaining = self.refs.decrease(frame);
        if remaining > 0 {
            trace!("kfree: {frame} still has {remaining} owners");
            return;
        }

        #[cfg(feature = "poison")]
        unsafe {
            core::ptr::write_bytes(self.mapper.frame_ptr(frame), FREE_JUNK, PageFrame::SIZE);
        }

        match self.policy {
            FreePolicy::HomeCore => self.push_to(self.home_cpu(frame), frame),
            FreePolicy::CallingCore => {
                let pin = PreemptGuard::new(self.cpu.as_ref());
                self.push_to(pin.cpu_id(), frame);
            }
        }
    }

    fn push_to(&self, shard: usize, frame: PageFrame) {
        let mut list = self.shards[shard].lock();
        unsafe { list.push(frame, &self.mapper) };
    }

    /// Add an owner to an allocated frame; returns the new share count.
    ///
    /// # Panics
    /// If `frame` is not a managed frame or is currently free.
    pub fn increase_share(&self, frame: PageFrame) -> u32 {
        let count = self.refs.increase(frame);
        trace!("kalloc: {frame} shared by {count} owners");
        count
    }

    /// Number of owners of `frame`; 0 when free.
    ///
    /// # Panics
    /// If `frame` is not a managed frame.
    #[must_use]
    pub fn share_count(&self, frame: PageFrame) -> u32 {
        self.refs.get(frame)
    }

    /// The core whose slice of the managed range contains `frame`.
    ///
    /// # Panics
    /// If `frame` is not a managed frame.
    #[must_use]
    pub fn home_cpu(&self, frame: PageFrame) -> usize {
        let Some(index) = self.range.index_of(frame) else {
            panic!("home_cpu: {frame} is not a managed frame");
        };
        index * self.shards.len() / self.range.len()
    }

    /// Frames currently on any free list.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        (0..self.shards.len()).map(|cpu| self.free_frames_on(cpu)).sum()
    }

    /// Frames currently on the free list of core `cpu`.
    ///
    /// # Panics
    /// If `cpu` is not a core index.
    #[must_use]
    pub fn free_frames_on(&self, cpu: usize) -> usize {
        self.shards[cpu].lock().len()
    }

    #[must_use]
    pub const fn range(&self) -> FrameRange {
        self.range
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    #[must_use]
    pub const fn free_policy(&self) -> FreePolicy {
        self.policy
    }
}

impl<M: PhysMapper> core::fmt::Debug for PhysicalAllocator<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PhysicalAllocator")
            .field("range", &self.range)
            .field("cores", &self.shards.len())
            .field("free_frames", &self.free_frames())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
