//! # Page frames and managed ranges

use core::fmt;
use kernel_info::memory::{PAGE_SIZE, PHYS_TOP, page_round_down, page_round_up};

/// Physical page frame, identified by its base address.
///
/// Construction does not validate alignment; frames handed back to the
/// allocator are checked there, since a misaligned frame is a caller bug the
/// allocator must catch rather than silently round.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageFrame(u64);

impl PageFrame {
    /// Frame size in bytes.
    pub const SIZE: usize = PAGE_SIZE;

    #[inline]
    #[must_use]
    pub const fn from_addr(pa: u64) -> Self {
        Self(pa)
    }

    /// The frame containing `pa`.
    #[inline]
    #[must_use]
    pub const fn containing(pa: u64) -> Self {
        Self(page_round_down(pa))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0.is_multiple_of(PAGE_SIZE as u64)
    }
}

impl fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageFrame({:#010X})", self.0)
    }
}

impl fmt::Display for PageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Half-open, page-aligned range of physical memory handed to the allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameRange {
    start: u64,
    end: u64,
}

impl FrameRange {
    /// Covers every whole frame inside `[start, end)`.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        let start = page_round_up(start);
        let end = page_round_down(end);
        if end < start {
            Self { start, end: start }
        } else {
            Self { start, end }
        }
    }

    /// Everything between the end of the kernel image and [`PHYS_TOP`].
    #[must_use]
    pub const fn after_kernel(kernel_end: u64) -> Self {
        Self::new(kernel_end, PHYS_TOP)
    }

    #[inline]
    #[must_use]
    pub const fn start(self) -> u64 {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end(self) -> u64 {
        self.end
    }

    /// Number of frames.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn len(self) -> usize {
        ((self.end - self.start) / PAGE_SIZE as u64) as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.start == self.end
    }

    /// Whether `frame` is an aligned frame inside the range.
    #[inline]
    #[must_use]
    pub const fn contains(self, frame: PageFrame) -> bool {
        frame.is_page_aligned() && frame.0 >= self.start && frame.0 < self.end
    }

    /// Position of `frame` within the range.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(self, frame: PageFrame) -> Option<usize> {
        if self.contains(frame) {
            Some(((frame.0 - self.start) / PAGE_SIZE as u64) as usize)
        } else {
            None
        }
    }

    /// All frames in ascending address order.
    pub fn frames(self) -> impl DoubleEndedIterator<Item = PageFrame> + ExactSizeIterator {
        (0..self.len()).map(move |i| PageFrame(self.start + (i * PAGE_SIZE) as u64))
    }
}
