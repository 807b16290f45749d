//! # Kernel Platform Constants
//!
//! Compile-time configuration shared by the kernel's memory-resource layer:
//! the block buffer cache (`kernel-bio`) and the physical page allocator
//! (`kernel-alloc`). Keeping the numbers in one crate lets both subsystems,
//! the kernel binary and host-side tests agree on sizes without passing them
//! around at runtime.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! * **Page Size**: the allocator's unit of management
//! * **Physical Range**: where the kernel image is loaded and where RAM ends
//!
//! ### Pool Parameters ([`param`])
//! * **Cores**: upper bound on execution cores (one free-list shard each)
//! * **Buffers**: size of the block buffer pool and its bucket count
//!
//! ## Physical Memory Layout
//!
//! ```text
//! KERNEL_PHYS_BASE ┌─────────────────────────────────┐ 0x8000_0000
//!                  │       Kernel Image              │
//!                  │   (Text, Data, BSS)             │
//! kernel end       ├─────────────────────────────────┤ (linker symbol)
//!                  │    Available RAM                │
//!                  │  (Managed by the page allocator)│
//! PHYS_TOP         └─────────────────────────────────┘ 0x8800_0000
//! ```
//!
//! All values are `const` and validated by compile-time assertions, so an
//! inconsistent configuration fails the build instead of the boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod param;
