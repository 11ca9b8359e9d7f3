//! Protocol error types.

use crate::trajectory::TrajectoryError;
use thiserror::Error;

/// Errors that can occur while framing or interpreting messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("incomplete length prefix: {available} of 2 bytes available")]
    IncompleteLengthPrefix { available: usize },

    #[error("incomplete frame: declared size {declared}, {available} bytes available")]
    IncompleteFrame { declared: u16, available: usize },

    #[error("invalid frame size {0}: must cover the 2-byte type field")]
    InvalidSize(u16),

    #[error("frame too large: payload of {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unknown message type: {0:#06x}")]
    UnknownMessageType(u16),

    #[error("invalid payload for {msg_type}: expected {expected} bytes, got {actual}")]
    InvalidPayload {
        msg_type: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unknown command byte: {0}")]
    UnknownCommand(u8),

    #[error("unknown direction byte: {0}")]
    UnknownDirection(u8),

    #[error("trajectory error: {0}")]
    Trajectory(#[from] TrajectoryError),
}

impl ProtocolError {
    /// Returns whether this error means the bytes on the wire do not form a
    /// valid frame (as opposed to a valid frame with unusable contents).
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::IncompleteLengthPrefix { .. }
                | ProtocolError::IncompleteFrame { .. }
                | ProtocolError::InvalidSize(_)
        )
    }
}
