use std::io;

/// Failures surfaced by the shared record and its backends.
///
/// Three families matter to callers:
/// - **transient**: [`ShmError::Contended`], only produced by single-attempt
///   reads; the blocking read path retries these internally.
/// - **backend unavailable**: the region cannot be mapped, is malformed, or an
///   access falls outside it. Retrying will not help.
/// - **cancelled**: a [`CancelToken`](crate::CancelToken) interrupted a wait.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("failed to map shared region '{path}'")]
    Map {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid shared region: {0}")]
    Layout(&'static str),

    #[error("access of {len} bytes at offset {offset} exceeds region of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("shared region is mapped read-only")]
    ReadOnly,

    #[error("shared region unavailable: {0}")]
    Unavailable(String),

    #[error("write in progress or raced the read (sequence {observed})")]
    Contended { observed: u64 },

    #[error("wait for a consistent read was cancelled")]
    Cancelled,
}

impl ShmError {
    /// True for errors a caller may simply retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ShmError::Contended { .. })
    }
}
