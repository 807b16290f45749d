//! # Kernel synchronization primitives
//!
//! Two lock flavors with different contracts:
//!
//! * [`SpinLock`] is **non-suspending**. The holder keeps the critical section
//!   short and never blocks while holding it. Bucket locks, free-list locks and
//!   the page share-count table use it.
//! * [`SleepLock`] is **suspending**. A contended caller is parked with the
//!   [`Scheduler`] and handed the lock in FIFO order on release. A parked caller
//!   can be cancelled, in which case [`SleepLock::lock`] returns [`Cancelled`].
//!
//! A suspending wait must never start while a [`SpinLock`] is held.
//!
//! [`Cpu`] and [`PreemptGuard`] pin the caller to its current core for the
//! duration of per-core operations.
//!
//! With the `hosted` feature, [`hosted`] provides `std` implementations of
//! [`Cpu`] and [`Scheduler`] backed by OS threads.

#![cfg_attr(not(any(test, doctest, feature = "hosted")), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

#[cfg(feature = "hosted")]
pub mod hosted;
pub mod preempt;
mod sched;
mod sleep_lock;
mod spin_lock;

pub use preempt::{Cpu, PreemptGuard};
pub use sched::{Cancelled, Scheduler, TaskId};
pub use sleep_lock::{SleepLock, SleepLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
