//! # Kernel memory resources
//!
//! [`KernelResources`] is the one value that owns the kernel's memory pools:
//! the physical page allocator and the block buffer cache. The kernel builds
//! it once at boot with [`KernelResources::boot`] and hands out clones; every
//! clone shares the same pools.
//!
//! ```text
//!   kmain ──► KernelResources::boot(config, platform)
//!                 ├── PhysicalAllocator  (pages)   ◄── vm, fork, exec
//!                 └── BufferCache        (blocks)  ◄── log, inode layer
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

use alloc::sync::Arc;
use kernel_alloc::{AllocatorConfig, DirectMapper, PhysMapper, PhysicalAllocator, RangeError};
use kernel_bio::{BlockDevice, BufferCache, BufferCacheConfig};
use kernel_sync::{Cpu, Scheduler};
use log::info;

/// Boot could not bring up the memory pools.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
    #[error("physical memory: {0}")]
    Memory(#[from] RangeError),
}

/// What to manage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootConfig {
    pub memory: AllocatorConfig,
    pub buffers: BufferCacheConfig,
}

impl BootConfig {
    /// All physical memory above the kernel image and a default-sized cache.
    #[must_use]
    pub fn after_kernel(kernel_end: u64) -> Self {
        Self {
            memory: AllocatorConfig::after_kernel(kernel_end),
            buffers: BufferCacheConfig::default(),
        }
    }
}

/// The collaborators the pools are built on.
pub struct Platform<M: PhysMapper = DirectMapper> {
    pub mapper: M,
    pub cpu: Arc<dyn Cpu>,
    pub scheduler: Arc<dyn Scheduler>,
    pub disk: Arc<dyn BlockDevice>,
}

/// Shared handle to the kernel's memory pools.
pub struct KernelResources<M: PhysMapper = DirectMapper> {
    pages: Arc<PhysicalAllocator<M>>,
    blocks: Arc<BufferCache>,
}

impl<M: PhysMapper> KernelResources<M> {
    /// Take over physical memory and set up the buffer cache.
    ///
    /// # Errors
    /// [`BootError::Memory`] if the configured range cannot be managed.
    ///
    /// # Safety
    /// Same contract as [`PhysicalAllocator::new`]: `platform.mapper` maps the
    /// whole range and nothing else uses that memory.
    pub unsafe fn boot(config: BootConfig, platform: Platform<M>) -> Result<Self, BootError> {
        let Platform {
            mapper,
            cpu,
            scheduler,
            disk,
        } = platform;
        let pages = unsafe { PhysicalAllocator::new(config.memory, mapper, cpu)? };
        let blocks = BufferCache::new(config.buffers, disk, scheduler);
        info!(
            "resources: {} free frames, {} block buffers",
            pages.free_frames(),
            blocks.buffers()
        );
        Ok(Self {
            pages: Arc::new(pages),
            blocks: Arc::new(blocks),
        })
    }

    #[must_use]
    pub const fn pages(&self) -> &Arc<PhysicalAllocator<M>> {
        &self.pages
    }

    #[must_use]
    pub const fn blocks(&self) -> &Arc<BufferCache> {
        &self.blocks
    }
}

impl<M: PhysMapper> Clone for KernelResources<M> {
    fn clone(&self) -> Self {
        Self {
            pages: Arc::clone(&self.pages),
            blocks: Arc::clone(&self.blocks),
        }
    }
}

impl<M: PhysMapper> core::fmt::Debug for KernelResources<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KernelResources")
            .field("pages", &self.pages)
            .field("blocks", &self.blocks)
            .finish()
    }
}
