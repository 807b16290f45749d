/// A page-frame request that could not be satisfied.
///
/// Recoverable: the operation that asked for memory fails and reports it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("out of physical page frames")]
    Exhausted,
}

/// The allocator could not be set up over the given physical range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("managed range {start:#x}..{end:#x} holds no whole page frame")]
    Empty { start: u64, end: u64 },
    #[error("managed range holds {frames} frames, more than a share table can index")]
    TooLarge { frames: usize },
    #[error("no cores to shard the free lists across")]
    NoCpus,
    #[error("{cpus} cores, more than the {max} the kernel is built for")]
    TooManyCpus { cpus: usize, max: usize },
}
