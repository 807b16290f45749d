use crate::{Cancelled, Scheduler, SpinLock, TaskId};
use alloc::collections::VecDeque;
use core::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};
use log::trace;

/// Ownership record of a [`SleepLock`], guarded by its internal spin lock.
struct Ownership {
    /// Task currently holding the lock.
    owner: Option<TaskId>,
    /// Parked tasks in arrival order.
    waiters: VecDeque<TaskId>,
}

/// Suspending mutual exclusion lock.
///
/// A contended caller is queued and parked with the [`Scheduler`] instead of
/// spinning. Release hands ownership directly to the longest-waiting task and
/// unparks it, so waiters are served FIFO and a released lock cannot be barged
/// by a newcomer while a waiter exists.
///
/// # Cancellation
/// A parked caller whose task is cancelled leaves the queue and gets
/// [`Cancelled`] back. A hand-off that raced with the cancellation wins: the
/// caller then owns the lock and must release it as usual.
///
/// # Examples
///
/// ```
/// use kernel_sync::SleepLock;
/// use kernel_sync::hosted::ThreadScheduler;
///
/// let sched = ThreadScheduler::new();
/// let lock = SleepLock::new("block", [0u8; 16]);
/// {
///     let mut block = lock.lock(&sched).expect("not cancelled");
///     block[0] = 7;
///     assert!(block.holding());
/// }
/// assert!(!lock.is_locked());
/// ```
pub struct SleepLock<T> {
    name: &'static str,
    state: SpinLock<Ownership>,
    data: UnsafeCell<T>,
}

// Safety: the payload is only reachable through a guard, and at most one guard exists.
unsafe impl<T: Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            state: SpinLock::with_name(
                "sleeplock",
                Ownership {
                    owner: None,
                    waiters: VecDeque::new(),
                },
            ),
            data: UnsafeCell::new(value),
        }
    }

    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Acquire the lock, parking the current task while another task holds it.
    ///
    /// # Errors
    /// [`Cancelled`] if the current task was cancelled while waiting.
    ///
    /// # Panics
    /// If the current task already holds this lock.
    pub fn lock<'a>(
        &'a self,
        sched: &'a dyn Scheduler,
    ) -> Result<SleepLockGuard<'a, T>, Cancelled> {
        let me = sched.current_task();
        {
            let mut st = self.state.lock();
            match st.owner {
                None => {
                    st.owner = Some(me);
                    return Ok(SleepLockGuard::new(self, sched));
                }
                Some(owner) if owner == me => {
                    drop(st);
                    panic!("sleeplock {}: {me} acquired it twice", self.name);
                }
                Some(_) => st.waiters.push_back(me),
            }
        }

        loop {
            let cancelled = sched.is_cancelled(me);
            {
                let mut st = self.state.lock();
                if st.owner == Some(me) {
                    return Ok(SleepLockGuard::new(self, sched));
                }
                if cancelled {
                    st.waiters.retain(|&w| w != me);
                    drop(st);
                    trace!("sleeplock {}: {me} cancelled while waiting", self.name);
                    return Err(Cancelled);
                }
            }
            // Not handed over yet (or a spurious wake-up); keep waiting.
            sched.park();
        }
    }

    /// Acquire the lock only if it is free right now.
    pub fn try_lock<'a>(&'a self, sched: &'a dyn Scheduler) -> Option<SleepLockGuard<'a, T>> {
        let me = sched.current_task();
        let mut st = self.state.lock();
        if st.owner.is_none() {
            st.owner = Some(me);
            Some(SleepLockGuard::new(self, sched))
        } else {
            None
        }
    }

    /// Whether the calling task is the current holder.
    pub fn holding(&self, sched: &dyn Scheduler) -> bool {
        let me = sched.current_task();
        self.state.lock().owner == Some(me)
    }

    /// Whether any task holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Number of parked tasks.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock(&self, sched: &dyn Scheduler) {
        let next = {
            let mut st = self.state.lock();
            let next = st.waiters.pop_front();
            st.owner = next;
            next
        };
        if let Some(task) = next {
            sched.unpark(task);
        }
    }
}

impl<T> fmt::Debug for SleepLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("SleepLock")
            .field("name", &self.name)
            .field("owner", &st.owner)
            .field("waiters", &st.waiters.len())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to the payload of a [`SleepLock`]. Dropping it releases
/// the lock and wakes the next waiter.
///
/// Shares like a `&mut T`: a guard over a `!Sync` payload cannot be shared
/// between threads.
///
/// ```compile_fail
/// use core::cell::Cell;
/// use kernel_sync::SleepLock;
/// use kernel_sync::hosted::ThreadScheduler;
///
/// fn assert_sync<S: Sync>(_: &S) {}
///
/// let sched = ThreadScheduler::new();
/// let lock = SleepLock::new("cell", Cell::new(0_u64));
/// let guard = lock.lock(&sched).unwrap();
/// assert_sync(&guard);
/// ```
pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
    sched: &'a dyn Scheduler,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T> SleepLockGuard<'a, T> {
    #[inline]
    const fn new(lock: &'a SleepLock<T>, sched: &'a dyn Scheduler) -> Self {
        Self {
            lock,
            sched,
            _marker: PhantomData,
        }
    }
}

impl<T> SleepLockGuard<'_, T> {
    /// Whether the calling task is the holder of this guard's lock.
    ///
    /// A guard moved to another task reports `false` there.
    pub fn holding(&self) -> bool {
        self.lock.holding(self.sched)
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock(self.sched);
    }
}
