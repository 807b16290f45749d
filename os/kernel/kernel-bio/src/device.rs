use kernel_info::memory::BSIZE;

/// Direction of a block transfer, seen from the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Device to memory.
    Read,
    /// Memory to device.
    Write,
}

/// Synchronous block storage, the driver side of the buffer cache.
///
/// `transfer` returns once the block has been moved. The cache only calls it
/// while holding the buffer's sleep lock, so an implementation may suspend.
pub trait BlockDevice: Send + Sync {
    fn transfer(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE], direction: Direction);
}
