//! # Memory Layout

/// Size of a physical page frame in bytes.
pub const PAGE_SIZE: usize = 4096;

/// log2([`PAGE_SIZE`]).
pub const PAGE_SHIFT: u32 = 12;

/// Size of one storage block in bytes. A cached block occupies exactly one page.
pub const BSIZE: usize = PAGE_SIZE;

/// Physical address at which the kernel image is loaded.
///
/// # Kernel Build
/// The linker script places `.text` here; the first free address after the
/// image is exported as the `end` symbol and handed to the page allocator.
pub const KERNEL_PHYS_BASE: u64 = 0x8000_0000;

/// Amount of RAM the kernel manages, starting at [`KERNEL_PHYS_BASE`].
pub const PHYS_MEMORY_SIZE: u64 = 128 * 1024 * 1024; // 128 MiB

/// First physical address that is **not** RAM managed by the kernel.
pub const PHYS_TOP: u64 = KERNEL_PHYS_BASE + PHYS_MEMORY_SIZE;

/// Rounds `addr` up to the next page boundary.
#[must_use]
pub const fn page_round_up(addr: u64) -> u64 {
    (addr + (PAGE_SIZE as u64 - 1)) & !(PAGE_SIZE as u64 - 1)
}

/// Rounds `addr` down to the containing page boundary.
#[must_use]
pub const fn page_round_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(BSIZE == PAGE_SIZE);
    assert!(KERNEL_PHYS_BASE.is_multiple_of(PAGE_SIZE as u64));
    assert!(PHYS_TOP.is_multiple_of(PAGE_SIZE as u64));
    assert!(PHYS_TOP > KERNEL_PHYS_BASE);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_is_page_granular() {
        assert_eq!(page_round_up(0x8000_0001), 0x8000_1000);
        assert_eq!(page_round_up(0x8000_1000), 0x8000_1000);
        assert_eq!(page_round_down(0x8000_1fff), 0x8000_1000);
    }
}
