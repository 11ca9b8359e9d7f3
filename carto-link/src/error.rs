//! Link error types.

use thiserror::Error;

/// Errors surfaced by the link to its callers.
///
/// Transport failures after setup never reach application code: the
/// manager's writes and the dispatcher's reads wrap them in `Transport`, log
/// them and start the reconnection cycle instead.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("setup failed: {0}")]
    Setup(#[source] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] carto_protocol::ProtocolError),

    #[error("command queue is full")]
    QueueFull,

    #[error("command queue is closed")]
    QueueClosed,

    #[error("link not started")]
    NotStarted,

    #[error("link already started")]
    AlreadyStarted,

    #[error("timed out waiting for the link")]
    Timeout,
}

impl LinkError {
    /// Returns whether the operation may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::QueueFull | LinkError::Transport(_) | LinkError::Timeout
        )
    }
}
