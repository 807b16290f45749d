//! # Kernel physical page allocation
//!
//! Hands out 4 KiB physical page frames to the rest of the kernel and keeps
//! count of how many owners each allocated frame has, so copy-on-write
//! mappings can share a frame instead of copying it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               PhysicalAllocator                     │
//! │    • allocate / free / increase_share               │
//! │    • one free list per core, cross-core stealing    │
//! └───────────┬────────────────────────┬────────────────┘
//!             │                        │
//! ┌───────────▼──────────┐  ┌──────────▼────────────────┐
//! │   ReferenceTable     │  │   FreeList (per core)     │
//! │ share count / frame  │  │ intrusive, in free frames │
//! └──────────────────────┘  └──────────┬────────────────┘
//!                                      │
//!                           ┌──────────▼────────────────┐
//!                           │   PhysMapper              │
//!                           │ frame → usable pointer    │
//!                           └───────────────────────────┘
//! ```
//!
//! ## Core components
//!
//! * [`PhysicalAllocator`]: the allocator itself ([`frame_alloc`]).
//! * [`PageFrame`] / [`FrameRange`]: frame identity and the managed range.
//! * [`PhysMapper`] / [`DirectMapper`]: how the allocator reaches the bytes
//!   of a frame ([`phys_mapper`]).
//! * [`ReferenceTable`]: per-frame share counts.
//!
//! ## Failure model
//!
//! Running out of frames is an ordinary error ([`AllocError::Exhausted`]).
//! Freeing a frame the allocator does not manage, freeing a frame twice and
//! sharing a free frame are kernel bugs and panic.
//!
//! ## Features
//!
//! * `poison` (default): fill frames with `0x05` on allocation and `0x01` on
//!   free.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod error;
mod frame;
pub mod frame_alloc;
mod free_list;
pub mod phys_mapper;
mod refcount;

pub use error::{AllocError, RangeError};
pub use frame::{FrameRange, PageFrame};
pub use frame_alloc::{AllocatorConfig, FreePolicy, PhysicalAllocator};
pub use phys_mapper::{DirectMapper, PhysMapper};
pub use refcount::ReferenceTable;
