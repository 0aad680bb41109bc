//! Link-layer error types.
//!
//! Timeouts are retryable and leave the channel usable; protocol violations
//! fail the offending operation without closing the channel; transport
//! failures are surfaced to the caller unchanged.

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("key {0:?} is reserved for control messages")]
    InvalidKey(String),

    #[error("recv timed out after {timeout_ms} ms waiting for key {key:?}")]
    RecvTimeout { key: String, timeout_ms: u64 },

    #[error("throttle window wait timed out after {timeout_ms} ms")]
    ThrottleTimeout { timeout_ms: u64 },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("duplicate listener for rank {0}")]
    DuplicateListener(usize),

    #[error("no listener registered for rank {0}")]
    NoListener(usize),

    #[error("transport failure: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors raised by the collective algorithms layered on the channel surface.
#[derive(Debug, thiserror::Error)]
pub enum CollectiveError {
    #[error("invalid root rank {root} for world size {world_size}")]
    InvalidRoot { root: usize, world_size: usize },

    #[error("expected {expected} input buffers, got {actual}")]
    InputArity { expected: usize, actual: usize },

    #[error("link error: {0}")]
    Link(#[from] LinkError),
}
