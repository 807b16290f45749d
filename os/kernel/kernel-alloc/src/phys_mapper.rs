//! # Access to physical frames
//!
//! Rust code can only dereference virtual addresses. The allocator needs to
//! touch the frames it manages (to link free frames together and to fill them
//! with junk), so it goes through a [`PhysMapper`] that turns a frame into a
//! pointer in the current address space.
//!
//! ## Mapping strategies
//! - **Identity**: early boot and kernels that keep physical memory
//!   identity-mapped (`virt == phys`).
//! - **Direct map**: every physical address is visible at a fixed offset
//!   (`virt == phys + offset`), e.g. a higher-half direct map.
//! - **Host region**: tests hand the allocator an ordinary heap buffer and
//!   pretend it sits at some physical base; see [`DirectMapper::for_region`].

use crate::frame::PageFrame;

/// Converts a physical frame into a pointer usable by the kernel.
pub trait PhysMapper: Send + Sync {
    /// Pointer to the first byte of `frame`.
    ///
    /// # Safety
    /// The frame must be mapped and the returned pointer may only be used for
    /// the [`PageFrame::SIZE`] bytes of that frame.
    unsafe fn frame_ptr(&self, frame: PageFrame) -> *mut u8;
}

/// [`PhysMapper`] for a linear mapping `virt = phys + offset` (wrapping).
///
/// # Example
/// ```rust
/// use kernel_alloc::{DirectMapper, PageFrame, PhysMapper};
///
/// let mapper = DirectMapper::identity();
/// let ptr = unsafe { mapper.frame_ptr(PageFrame::from_addr(0x8000_1000)) };
/// assert_eq!(ptr as usize, 0x8000_1000);
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DirectMapper {
    offset: u64,
}

impl DirectMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn identity() -> Self {
        Self::new(0)
    }

    /// Maps physical address `phys_base` onto `virt_base` (and everything after
    /// it linearly).
    #[must_use]
    pub fn for_region(phys_base: u64, virt_base: *mut u8) -> Self {
        Self::new((virt_base as u64).wrapping_sub(phys_base))
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl PhysMapper for DirectMapper {
    unsafe fn frame_ptr(&self, frame: PageFrame) -> *mut u8 {
        frame.base().wrapping_add(self.offset) as *mut u8
    }
}
