//! # Core identity and preemption pinning
//!
//! Per-core data structures (such as the page allocator's free-list shards)
//! need to know which core the caller runs on, and need that answer to stay
//! true until the operation finishes. [`Cpu`] answers the first question;
//! [`PreemptGuard`] keeps the answer stable by disabling preemption for its
//! lifetime.

/// The execution-core layer as seen by per-core data structures.
///
/// `push_off`/`pop_off` nest: preemption is re-enabled only when every
/// `push_off` has been matched by a `pop_off`.
pub trait Cpu: Send + Sync {
    /// Index of the core the caller is running on, in `0..count()`.
    fn id(&self) -> usize;

    /// Number of cores.
    fn count(&self) -> usize;

    /// Disable preemption (and local interrupts) on the current core.
    fn push_off(&self);

    /// Undo one [`push_off`](Self::push_off).
    fn pop_off(&self);
}

/// RAII guard that pins the caller to its current core.
///
/// `PreemptGuard::new` calls [`Cpu::push_off`] and then samples the core
/// index, which therefore stays valid until the guard is dropped. Dropping
/// calls [`Cpu::pop_off`], restoring the previous preemption state.
///
/// # Examples
///
/// ```
/// use kernel_sync::PreemptGuard;
/// use kernel_sync::hosted::HostCpu;
///
/// let cpu = HostCpu::new(4);
/// HostCpu::bind(2);
/// {
///     let pin = PreemptGuard::new(&cpu);
///     assert_eq!(pin.cpu_id(), 2);
///     assert_eq!(HostCpu::preempt_depth(), 1);
/// }
/// assert_eq!(HostCpu::preempt_depth(), 0);
/// ```
pub struct PreemptGuard<'a> {
    cpu: &'a dyn Cpu,
    id: usize,
}

impl<'a> PreemptGuard<'a> {
    #[inline]
    #[must_use]
    pub fn new(cpu: &'a dyn Cpu) -> Self {
        cpu.push_off();
        let id = cpu.id();
        Self { cpu, id }
    }

    /// The core the caller is pinned to.
    #[inline]
    #[must_use]
    pub const fn cpu_id(&self) -> usize {
        self.id
    }
}

impl Drop for PreemptGuard<'_> {
    fn drop(&mut self) {
        self.cpu.pop_off();
    }
}
