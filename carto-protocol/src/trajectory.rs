//! Reassembly of trajectories sent one command per frame.
//!
//! The console transmits a trajectory of `n` commands as `n` consecutive
//! `MovesTrajectory` frames, each carrying the total count `n` and one
//! command. The receiver buffers commands until `n` have arrived.

use crate::message::Command;
use thiserror::Error;

/// Default maximum number of commands in one trajectory.
pub const DEFAULT_TRAJECTORY_CAPACITY: usize = 50;

/// Errors raised while splitting or reassembling a trajectory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrajectoryError {
    #[error("trajectory has no commands")]
    Empty,

    #[error("trajectory of {0} commands does not fit the count byte")]
    TooLong(usize),

    #[error("trajectory of {count} commands exceeds capacity {capacity}")]
    Overflow { count: u8, capacity: usize },

    #[error("trajectory count changed mid-sequence: expected {expected}, got {actual}")]
    CountMismatch { expected: u8, actual: u8 },
}

/// Accumulates `MovesTrajectory` commands into complete trajectories.
#[derive(Debug)]
pub struct TrajectoryAssembler {
    capacity: usize,
    expected: Option<u8>,
    commands: Vec<Command>,
}

impl TrajectoryAssembler {
    /// Creates an assembler that accepts trajectories up to `capacity` commands.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            expected: None,
            commands: Vec::with_capacity(capacity),
        }
    }

    /// Feeds one received command.
    ///
    /// Returns the full trajectory once `count` commands have been received.
    /// Any error discards the trajectory in progress.
    pub fn push(
        &mut self,
        count: u8,
        command: Command,
    ) -> Result<Option<Vec<Command>>, TrajectoryError> {
        if count == 0 {
            self.reset();
            return Err(TrajectoryError::Empty);
        }
        if count as usize > self.capacity {
            self.reset();
            return Err(TrajectoryError::Overflow {
                count,
                capacity: self.capacity,
            });
        }
        if let Some(expected) = self.expected {
            if expected != count {
                self.reset();
                return Err(TrajectoryError::CountMismatch {
                    expected,
                    actual: count,
                });
            }
        }

        self.expected = Some(count);
        self.commands.push(command);

        if self.commands.len() == count as usize {
            self.expected = None;
            return Ok(Some(std::mem::take(&mut self.commands)));
        }
        Ok(None)
    }

    /// Number of commands buffered for the trajectory in progress.
    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discards the trajectory in progress.
    pub fn reset(&mut self) {
        self.expected = None;
        self.commands.clear();
    }
}

impl Default for TrajectoryAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_TRAJECTORY_CAPACITY)
    }
}
