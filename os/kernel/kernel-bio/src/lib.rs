//! # Block buffer cache
//!
//! Caches disk blocks in a fixed pool of buffers and gives every user a
//! locked, exclusive view of a block:
//!
//! ```text
//!   read(dev, blockno) ──► LockedBuffer ──► write(&mut buf) ──► drop / release
//!                               │
//!                               └── pin(&buf) ──► BufferPin ──► unpin(pin)
//! ```
//!
//! * [`BufferCache`] owns the pool, partitioned into hash buckets by block
//!   number, each with its own spin lock and recency-ordered list.
//! * [`LockedBuffer`] is the holder's handle. Its sleep lock is released when
//!   it is dropped.
//! * [`BlockDevice`] is the driver that moves blocks.
//!
//! Running out of unreferenced buffers is fatal (`bget: no buffers`), as is
//! writing a buffer the caller does not hold.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod bucket;
mod cache;
mod device;
mod error;

pub use bucket::NODEV;
pub use cache::{BufferCache, BufferCacheConfig, BufferPin, LockedBuffer};
pub use device::{BlockDevice, Direction};
pub use error::BufferError;
