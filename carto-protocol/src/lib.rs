//! # carto-protocol
//!
//! Wire protocol shared by the robot controller and the operator console.
//!
//! This crate provides:
//! - Binary framing with a 16-bit length prefix and a 16-bit message type
//! - The closed message type table and typed message payloads
//! - Reassembly of trajectories sent one command per frame

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod trajectory;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{Frame, FRAME_HEADER_SIZE, SIZE_PREFIX_LEN};
pub use message::{Command, Direction, Message, MessageType, Position};
pub use trajectory::{TrajectoryAssembler, TrajectoryError, DEFAULT_TRAJECTORY_CAPACITY};

/// Default TCP port the robot controller listens on.
pub const DEFAULT_PORT: u16 = 12345;

/// Smallest legal value of the `size` field (type only, empty payload).
pub const MIN_FRAME_SIZE: u16 = 2;

/// Largest payload that still fits the 16-bit `size` field.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - MIN_FRAME_SIZE as usize;
