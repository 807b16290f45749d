//! # Page share counts
//!
//! One counter per managed frame, counting the logical owners of the frame.
//! Copy-on-write duplication adds an owner with
//! [`increase`](ReferenceTable::increase) instead of copying; every owner
//! gives its share back with the allocator's `free`, and only the last one
//! actually returns the frame to a free list.
//!
//! The table is a single structure for all cores behind one lock. Sharding
//! happens one level up, in the free lists.

use crate::frame::{FrameRange, PageFrame};
use alloc::boxed::Box;
use alloc::vec;
use kernel_sync::SpinLock;
use log::error;

pub struct ReferenceTable {
    range: FrameRange,
    counts: SpinLock<Box<[u32]>>,
}

impl ReferenceTable {
    /// Every frame starts with one owner: at boot all memory is considered
    /// in use until the boot sweep frees it.
    #[must_use]
    pub fn new(range: FrameRange) -> Self {
        Self {
            range,
            counts: SpinLock::with_name("ref", vec![1; range.len()].into_boxed_slice()),
        }
    }

    fn index(&self, frame: PageFrame, op: &str) -> usize {
        let Some(i) = self.range.index_of(frame) else {
            error!("{op}: {frame} is outside the share table");
            panic!("{op}: {frame} is outside the share table");
        };
        i
    }

    /// Current number of owners of `frame`.
    ///
    /// # Panics
    /// If `frame` is not a managed frame.
    pub fn get(&self, frame: PageFrame) -> u32 {
        let i = self.index(frame, "share_count");
        self.counts.lock()[i]
    }

    /// Give a freshly allocated frame its single owner.
    ///
    /// # Panics
    /// If `frame` is not a managed frame or is still owned.
    pub fn reset(&self, frame: PageFrame) {
        let i = self.index(frame, "kalloc");
        let mut counts = self.counts.lock();
        let previous = counts[i];
        counts[i] = 1;
        drop(counts);
        if previous != 0 {
            error!("kalloc: {frame} on a free list with {previous} owners");
            panic!("kalloc: {frame} on a free list with {previous} owners");
        }
    }

    /// Add an owner; returns the new count.
    ///
    /// # Panics
    /// If `frame` is not a managed frame or currently has no owner.
    pub fn increase(&self, frame: PageFrame) -> u32 {
        let i = self.index(frame, "increase_share");
        let mut counts = self.counts.lock();
        if counts[i] == 0 {
            drop(counts);
            error!("increase_share: {frame} is free");
            panic!("increase_share: {frame} is free");
        }
        let Some(count) = counts[i].checked_add(1) else {
            drop(counts);
            error!("increase_share: {frame} has too many owners");
            panic!("increase_share: {frame} has too many owners");
        };
        counts[i] = count;
        count
    }

    /// Remove an owner; returns the remaining count.
    ///
    /// # Panics
    /// If `frame` is not a managed frame or already has no owner (double free).
    pub fn decrease(&self, frame: PageFrame) -> u32 {
        let i = self.index(frame, "kfree");
        let mut counts = self.counts.lock();
        if counts[i] == 0 {
            drop(counts);
            error!("kfree: {frame} is already free");
            panic!("kfree: {frame} is already free");
        }
        counts[i] -= 1;
        counts[i]
    }
}
