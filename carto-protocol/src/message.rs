//! Message types and typed payloads.
//!
//! Every message kind has a fixed payload layout with no internal length
//! prefixes; the frame's `size` field alone determines how many bytes follow.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::trajectory::TrajectoryError;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed catalogue of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// Console sends one command of a trajectory (count + command).
    MovesTrajectory = 0x0100,
    /// Console sends a single cartography move.
    MoveCartography = 0x0200,
    /// Robot confirms a move has been performed.
    MoveDone = 0x0300,
    /// Robot reports an obstacle cell.
    SetObstaclePosition = 0x0400,
    /// Robot reports its new cell.
    SetRobotPosition = 0x0500,
    /// Console asks the robot to halt.
    StopRobot = 0x0600,
    /// Console sends the robot's pose.
    SendRobotPosition = 0x0700,
    /// Robot acknowledges the pose it was sent.
    RobotPositionReceived = 0x0800,
}

impl MessageType {
    /// All known message types, in wire-value order.
    pub const ALL: [MessageType; 8] = [
        MessageType::MovesTrajectory,
        MessageType::MoveCartography,
        MessageType::MoveDone,
        MessageType::SetObstaclePosition,
        MessageType::SetRobotPosition,
        MessageType::StopRobot,
        MessageType::SendRobotPosition,
        MessageType::RobotPositionReceived,
    ];

    /// Returns the wire value.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Fixed payload length for this message type.
    pub fn payload_len(self) -> usize {
        match self {
            MessageType::MovesTrajectory => 2,
            MessageType::MoveCartography => 1,
            MessageType::MoveDone => 0,
            MessageType::SetObstaclePosition => 2,
            MessageType::SetRobotPosition => 2,
            MessageType::StopRobot => 0,
            MessageType::SendRobotPosition => 3,
            MessageType::RobotPositionReceived => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::MovesTrajectory => "MovesTrajectory",
            MessageType::MoveCartography => "MoveCartography",
            MessageType::MoveDone => "MoveDone",
            MessageType::SetObstaclePosition => "SetObstaclePosition",
            MessageType::SetRobotPosition => "SetRobotPosition",
            MessageType::StopRobot => "StopRobot",
            MessageType::SendRobotPosition => "SendRobotPosition",
            MessageType::RobotPositionReceived => "RobotPositionReceived",
        }
    }
}

impl From<MessageType> for u16 {
    fn from(msg_type: MessageType) -> Self {
        msg_type.as_u16()
    }
}

impl TryFrom<u16> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_u16() == value)
            .ok_or(ProtocolError::UnknownMessageType(value))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Robot motion primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Command {
    Forward = 0,
    Right = 1,
    Left = 2,
    Stop = 3,
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Command::Forward),
            1 => Ok(Command::Right),
            2 => Ok(Command::Left),
            3 => Ok(Command::Stop),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forward" | "f" => Ok(Command::Forward),
            "right" | "r" => Ok(Command::Right),
            "left" | "l" => Ok(Command::Left),
            "stop" | "s" => Ok(Command::Stop),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Forward => write!(f, "forward"),
            Command::Right => write!(f, "right"),
            Command::Left => write!(f, "left"),
            Command::Stop => write!(f, "stop"),
        }
    }
}

/// Cardinal heading on the map grid.
///
/// South increases x, north decreases x, west decreases y, east increases y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Direction {
    #[default]
    South = 0,
    North = 1,
    West = 2,
    East = 3,
}

impl TryFrom<u8> for Direction {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Direction::South),
            1 => Ok(Direction::North),
            2 => Ok(Direction::West),
            3 => Ok(Direction::East),
            other => Err(ProtocolError::UnknownDirection(other)),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "south" | "s" => Ok(Direction::South),
            "north" | "n" => Ok(Direction::North),
            "west" | "w" => Ok(Direction::West),
            "east" | "e" => Ok(Direction::East),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::South => write!(f, "south"),
            Direction::North => write!(f, "north"),
            Direction::West => write!(f, "west"),
            Direction::East => write!(f, "east"),
        }
    }
}

/// Robot pose on the map grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: u8,
    pub y: u8,
    #[serde(default)]
    pub direction: Direction,
}

impl Position {
    pub fn new(x: u8, y: u8, direction: Direction) -> Self {
        Self { x, y, direction }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) facing {}", self.x, self.y, self.direction)
    }
}

/// A decoded message with its typed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// One command of a trajectory that is `count` commands long.
    MovesTrajectory { count: u8, command: Command },
    MoveCartography(Command),
    MoveDone,
    SetObstaclePosition { x: u8, y: u8 },
    SetRobotPosition { x: u8, y: u8 },
    StopRobot,
    SendRobotPosition(Position),
    RobotPositionReceived,
}

impl Message {
    /// Returns the message type.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::MovesTrajectory { .. } => MessageType::MovesTrajectory,
            Message::MoveCartography(_) => MessageType::MoveCartography,
            Message::MoveDone => MessageType::MoveDone,
            Message::SetObstaclePosition { .. } => MessageType::SetObstaclePosition,
            Message::SetRobotPosition { .. } => MessageType::SetRobotPosition,
            Message::StopRobot => MessageType::StopRobot,
            Message::SendRobotPosition(_) => MessageType::SendRobotPosition,
            Message::RobotPositionReceived => MessageType::RobotPositionReceived,
        }
    }

    /// Serializes the payload bytes.
    pub fn payload(&self) -> Bytes {
        let bytes: Vec<u8> = match *self {
            Message::MovesTrajectory { count, command } => vec![count, command as u8],
            Message::MoveCartography(command) => vec![command as u8],
            Message::SetObstaclePosition { x, y } | Message::SetRobotPosition { x, y } => {
                vec![x, y]
            }
            Message::SendRobotPosition(pos) => vec![pos.x, pos.y, pos.direction as u8],
            Message::MoveDone | Message::StopRobot | Message::RobotPositionReceived => {
                return Bytes::new()
            }
        };
        Bytes::from(bytes)
    }

    /// Builds the frame carrying this message.
    pub fn to_frame(&self) -> Frame {
        Frame::new(self.message_type(), self.payload())
    }

    /// Encodes this message into wire bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        self.to_frame().encode()
    }

    /// Interprets a decoded frame.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let msg_type = MessageType::try_from(frame.msg_type)?;
        Self::from_payload(msg_type, &frame.payload)
    }

    /// Interprets a payload for a known message type.
    pub fn from_payload(msg_type: MessageType, payload: &[u8]) -> Result<Self, ProtocolError> {
        let expected = msg_type.payload_len();
        if payload.len() != expected {
            return Err(ProtocolError::InvalidPayload {
                msg_type: msg_type.name(),
                expected,
                actual: payload.len(),
            });
        }

        let message = match msg_type {
            MessageType::MovesTrajectory => Message::MovesTrajectory {
                count: payload[0],
                command: Command::try_from(payload[1])?,
            },
            MessageType::MoveCartography => Message::MoveCartography(Command::try_from(payload[0])?),
            MessageType::MoveDone => Message::MoveDone,
            MessageType::SetObstaclePosition => Message::SetObstaclePosition {
                x: payload[0],
                y: payload[1],
            },
            MessageType::SetRobotPosition => Message::SetRobotPosition {
                x: payload[0],
                y: payload[1],
            },
            MessageType::StopRobot => Message::StopRobot,
            MessageType::SendRobotPosition => Message::SendRobotPosition(Position {
                x: payload[0],
                y: payload[1],
                direction: Direction::try_from(payload[2])?,
            }),
            MessageType::RobotPositionReceived => Message::RobotPositionReceived,
        };
        Ok(message)
    }

    /// Splits a command list into one `MovesTrajectory` message per command.
    pub fn trajectory(commands: &[Command]) -> Result<Vec<Message>, ProtocolError> {
        if commands.is_empty() {
            return Err(TrajectoryError::Empty.into());
        }
        let count = u8::try_from(commands.len())
            .map_err(|_| TrajectoryError::TooLong(commands.len()))?;

        Ok(commands
            .iter()
            .map(|&command| Message::MovesTrajectory { count, command })
            .collect())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::MovesTrajectory { count, command } => {
                write!(f, "MovesTrajectory({} of {})", command, count)
            }
            Message::MoveCartography(command) => write!(f, "MoveCartography({})", command),
            Message::SetObstaclePosition { x, y } => write!(f, "SetObstaclePosition({}, {})", x, y),
            Message::SetRobotPosition { x, y } => write!(f, "SetRobotPosition({}, {})", x, y),
            Message::SendRobotPosition(pos) => write!(f, "SendRobotPosition{}", pos),
            other => f.write_str(other.message_type().name()),
        }
    }
}
