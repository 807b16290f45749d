//! # Hosted `Cpu` and `Scheduler`
//!
//! `std`-backed implementations of the platform traits so the kernel's
//! concurrent data structures can run on OS threads: in unit and integration
//! tests, and in host-side tools.
//!
//! * [`HostCpu`] binds each thread to a simulated core with [`HostCpu::bind`]
//!   and counts `push_off` nesting per thread.
//! * [`ThreadScheduler`] maps every thread to a [`TaskId`] and implements
//!   parking with [`std::thread::park`]. [`ThreadScheduler::cancel`] plays the
//!   role of the kernel's `kill`.

use crate::{Cpu, Scheduler, TaskId};
use std::cell::{Cell, RefCell};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, Thread};

thread_local! {
    static CPU_ID: Cell<usize> = const { Cell::new(0) };
    static PREEMPT_DEPTH: Cell<usize> = const { Cell::new(0) };
    static TASK_ID: Cell<Option<TaskId>> = const { Cell::new(None) };
}

static NEXT_TASK: AtomicU64 = AtomicU64::new(1);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated cores for threads. Every thread starts on core 0.
#[derive(Debug, Clone, Copy)]
pub struct HostCpu {
    count: usize,
}

impl HostCpu {
    /// # Panics
    /// If `count` is zero.
    #[must_use]
    pub const fn new(count: usize) -> Self {
        assert!(count > 0, "at least one core is required");
        Self { count }
    }

    /// Run the calling thread on core `id` from now on.
    pub fn bind(id: usize) {
        CPU_ID.with(|c| c.set(id));
    }

    /// Current `push_off` nesting depth of the calling thread.
    #[must_use]
    pub fn preempt_depth() -> usize {
        PREEMPT_DEPTH.with(Cell::get)
    }
}

impl Cpu for HostCpu {
    fn id(&self) -> usize {
        let id = CPU_ID.with(Cell::get);
        assert!(id < self.count, "thread bound to core {id} of {}", self.count);
        id
    }

    fn count(&self) -> usize {
        self.count
    }

    fn push_off(&self) {
        PREEMPT_DEPTH.with(|d| d.set(d.get() + 1));
    }

    fn pop_off(&self) {
        PREEMPT_DEPTH.with(|d| {
            let depth = d.get();
            assert!(depth > 0, "pop_off without matching push_off");
            d.set(depth - 1);
        });
    }
}

#[derive(Debug, Default)]
struct Registry {
    threads: HashMap<TaskId, Thread>,
    cancelled: HashSet<TaskId>,
}

/// Forgets a thread's task in one scheduler when the thread exits.
struct Registration {
    registry: Weak<Mutex<Registry>>,
    task: TaskId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = lock(&registry);
            registry.threads.remove(&self.task);
            registry.cancelled.remove(&self.task);
        }
    }
}

thread_local! {
    static REGISTRATIONS: RefCell<Vec<Registration>> = const { RefCell::new(Vec::new()) };
}

/// One task per OS thread.
///
/// A thread is registered on its first [`current_task`](Scheduler::current_task)
/// and unregistered when it exits.
#[derive(Debug, Default)]
pub struct ThreadScheduler {
    registry: Arc<Mutex<Registry>>,
}

impl ThreadScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Task identity of the calling thread, allocated on first use.
    #[must_use]
    pub fn task_of_current_thread() -> TaskId {
        TASK_ID.with(|t| {
            if let Some(id) = t.get() {
                return id;
            }
            let id = TaskId::new(NEXT_TASK.fetch_add(1, Ordering::Relaxed));
            t.set(Some(id));
            id
        })
    }

    /// Cancel `task`: its current and future suspending waits fail.
    pub fn cancel(&self, task: TaskId) {
        lock(&self.registry).cancelled.insert(task);
        self.unpark(task);
    }

    /// Threads currently known to this scheduler.
    #[must_use]
    pub fn registered_tasks(&self) -> usize {
        lock(&self.registry).threads.len()
    }
}

impl Scheduler for ThreadScheduler {
    fn current_task(&self) -> TaskId {
        let id = Self::task_of_current_thread();
        let mut registry = lock(&self.registry);
        if let Entry::Vacant(slot) = registry.threads.entry(id) {
            slot.insert(thread::current());
            drop(registry);
            // Fails only while the thread is already tearing down its locals.
            let _ = REGISTRATIONS.try_with(|r| {
                r.borrow_mut().push(Registration {
                    registry: Arc::downgrade(&self.registry),
                    task: id,
                });
            });
        }
        id
    }

    fn park(&self) {
        thread::park();
    }

    fn unpark(&self, task: TaskId) {
        if let Some(t) = lock(&self.registry).threads.get(&task) {
            t.unpark();
        }
    }

    fn is_cancelled(&self, task: TaskId) -> bool {
        lock(&self.registry).cancelled.contains(&task)
    }
}
