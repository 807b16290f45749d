//! # Pool Parameters

/// Maximum number of execution cores. Each core owns one free-list shard.
pub const NCPU: usize = 8;

/// Maximum number of blocks a single file-system operation writes.
pub const MAXOPBLOCKS: usize = 10;

/// Number of buffers in the block buffer cache.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Number of hash buckets partitioning the buffer cache.
///
/// A prime keeps `blockno % NBUCKET` evenly spread for strided access patterns.
pub const NBUCKET: usize = 13;

const _: () = {
    assert!(NCPU > 0);
    assert!(NBUCKET > 0);
    assert!(NBUF >= NBUCKET, "every bucket should be able to hold a buffer");
};
