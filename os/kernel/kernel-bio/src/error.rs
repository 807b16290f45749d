/// A buffer request that ended without handing out the buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The calling task was cancelled while waiting for another holder to
    /// release the buffer. Its reference has been given back.
    #[error("interrupted while waiting for block {blockno} of device {dev}")]
    Interrupted { dev: u32, blockno: u32 },
}
