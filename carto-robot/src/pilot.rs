//! Pilot: turns console commands into motor actions and reports back.
//!
//! The dispatcher hands messages to the pilot through a queue so that slow
//! moves never hold up frame reading. `StopRobot` is also recorded
//! immediately on the dispatcher task, which lets it cut a running
//! trajectory short.

use crate::config::{Cell, PilotConfig};
use carto_link::{Endpoint, LinkError, LinkHandle};
use carto_protocol::{Command, Direction, Message, MessageType, Position, TrajectoryAssembler};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Motor control.
pub trait Drive: Send {
    fn forward(&mut self);
    fn turn_left(&mut self);
    fn turn_right(&mut self);
    fn stop(&mut self);
}

/// Obstacle detection for the cell the robot faces.
pub trait ObstacleSensor: Send {
    fn obstacle_ahead(&mut self, pose: &Position, ahead: Cell) -> bool;
}

/// Drive that only logs what the motors would do.
#[derive(Debug, Default)]
pub struct LoggingDrive {
    commands: u64,
}

impl LoggingDrive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of motor commands issued so far.
    pub fn commands(&self) -> u64 {
        self.commands
    }

    fn log(&mut self, action: &str) {
        self.commands += 1;
        tracing::info!("Motor: {}", action);
    }
}

impl Drive for LoggingDrive {
    fn forward(&mut self) {
        self.log("forward");
    }

    fn turn_left(&mut self) {
        self.log("left");
    }

    fn turn_right(&mut self) {
        self.log("right");
    }

    fn stop(&mut self) {
        self.log("stop");
    }
}

/// Sensor backed by a fixed set of blocked cells and the grid bounds.
#[derive(Debug, Clone)]
pub struct GridSensor {
    width: u16,
    height: u16,
    obstacles: HashSet<Cell>,
}

impl GridSensor {
    pub fn new(width: u16, height: u16, obstacles: impl IntoIterator<Item = Cell>) -> Self {
        Self {
            width,
            height,
            obstacles: obstacles.into_iter().collect(),
        }
    }

    pub fn from_config(config: &PilotConfig) -> Self {
        Self::new(
            config.width,
            config.height,
            config.obstacles.iter().copied(),
        )
    }

    pub fn is_blocked(&self, cell: Cell) -> bool {
        u16::from(cell.x) >= self.width
            || u16::from(cell.y) >= self.height
            || self.obstacles.contains(&cell)
    }
}

impl ObstacleSensor for GridSensor {
    fn obstacle_ahead(&mut self, _pose: &Position, ahead: Cell) -> bool {
        self.is_blocked(ahead)
    }
}

/// Heading after a left turn.
pub fn turned_left(direction: Direction) -> Direction {
    match direction {
        Direction::South => Direction::East,
        Direction::East => Direction::North,
        Direction::North => Direction::West,
        Direction::West => Direction::South,
    }
}

/// Heading after a right turn.
pub fn turned_right(direction: Direction) -> Direction {
    match direction {
        Direction::South => Direction::West,
        Direction::West => Direction::North,
        Direction::North => Direction::East,
        Direction::East => Direction::South,
    }
}

/// The cell in front of `pose`, or `None` past the edge of the byte grid.
pub fn cell_ahead(pose: &Position) -> Option<Cell> {
    let (x, y) = match pose.direction {
        Direction::South => (pose.x.checked_add(1)?, pose.y),
        Direction::North => (pose.x.checked_sub(1)?, pose.y),
        Direction::West => (pose.x, pose.y.checked_sub(1)?),
        Direction::East => (pose.x, pose.y.checked_add(1)?),
    };
    Some(Cell::new(x, y))
}

/// Counts `StopRobot` requests as they arrive off the wire.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicU64>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a stop request and returns the new generation.
    pub fn raise(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn generation(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Whether a stop arrived after `generation` was observed.
    pub fn raised_since(&self, generation: u64) -> bool {
        self.generation() > generation
    }
}

/// A message queued for the pilot, stamped with the stop generation at the
/// moment it was received.
#[derive(Debug, Clone, Copy)]
pub struct Inbound {
    pub message: Message,
    pub stops: u64,
}

/// Outcome of a single motor command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Moved,
    Blocked(Cell),
    /// Facing the edge of the byte grid; the cell ahead has no coordinates.
    Stuck,
    Turned,
    Stopped,
}

/// Robot-side command executor.
pub struct Pilot<D, S> {
    pose: Position,
    drive: D,
    sensor: S,
    assembler: TrajectoryAssembler,
    stop: StopSignal,
    trajectory_stops: u64,
    move_delay: Duration,
}

impl<D: Drive, S: ObstacleSensor> Pilot<D, S> {
    pub fn new(config: &PilotConfig, drive: D, sensor: S) -> Self {
        Self {
            pose: config.start,
            drive,
            sensor,
            assembler: TrajectoryAssembler::new(config.trajectory_capacity),
            stop: StopSignal::new(),
            trajectory_stops: 0,
            move_delay: config.move_delay(),
        }
    }

    pub fn pose(&self) -> Position {
        self.pose
    }

    pub fn drive(&self) -> &D {
        &self.drive
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Handles one message and returns the replies for the console.
    pub async fn handle(&mut self, inbound: Inbound) -> Vec<Message> {
        match inbound.message {
            Message::SendRobotPosition(pose) => {
                tracing::info!("Robot position set to {}", pose);
                self.pose = pose;
                vec![Message::RobotPositionReceived]
            }
            Message::MoveCartography(command) => {
                let mut replies = Vec::with_capacity(2);
                let step = self.step(command).await;
                replies.extend(self.report(step));
                replies.push(Message::MoveDone);
                replies
            }
            Message::MovesTrajectory { count, command } => {
                if self.assembler.pending() == 0 {
                    self.trajectory_stops = inbound.stops;
                }
                match self.assembler.push(count, command) {
                    Ok(Some(commands)) => self.run_trajectory(commands).await,
                    Ok(None) => Vec::new(),
                    Err(e) => {
                        tracing::warn!("Discarding trajectory: {}", e);
                        Vec::new()
                    }
                }
            }
            Message::StopRobot => {
                tracing::info!("Stop requested");
                self.drive.stop();
                Vec::new()
            }
            other => {
                tracing::debug!("Pilot ignores {}", other);
                Vec::new()
            }
        }
    }

    async fn run_trajectory(&mut self, commands: Vec<Command>) -> Vec<Message> {
        tracing::info!("Running trajectory of {} commands", commands.len());
        let mut replies = Vec::new();

        for (i, command) in commands.iter().enumerate() {
            if self.stop.raised_since(self.trajectory_stops) {
                tracing::info!("Trajectory halted after {} of {} commands", i, commands.len());
                break;
            }
            match self.step(*command).await {
                Step::Blocked(cell) => {
                    replies.push(Message::SetObstaclePosition {
                        x: cell.x,
                        y: cell.y,
                    });
                    tracing::info!("Trajectory blocked at command {}", i + 1);
                    break;
                }
                Step::Stuck | Step::Stopped => break,
                Step::Moved | Step::Turned => {}
            }
        }

        replies.push(Message::SetRobotPosition {
            x: self.pose.x,
            y: self.pose.y,
        });
        replies.push(Message::MoveDone);
        replies
    }

    async fn step(&mut self, command: Command) -> Step {
        let step = match command {
            Command::Forward => match cell_ahead(&self.pose) {
                Some(ahead) if !self.sensor.obstacle_ahead(&self.pose, ahead) => {
                    self.drive.forward();
                    self.pose.x = ahead.x;
                    self.pose.y = ahead.y;
                    Step::Moved
                }
                Some(ahead) => Step::Blocked(ahead),
                None => {
                    tracing::debug!("Edge of the grid ahead of {}", self.pose);
                    Step::Stuck
                }
            },
            Command::Left => {
                self.drive.turn_left();
                self.pose.direction = turned_left(self.pose.direction);
                Step::Turned
            }
            Command::Right => {
                self.drive.turn_right();
                self.pose.direction = turned_right(self.pose.direction);
                Step::Turned
            }
            Command::Stop => {
                self.drive.stop();
                Step::Stopped
            }
        };

        if !self.move_delay.is_zero() && matches!(step, Step::Moved | Step::Turned) {
            tokio::time::sleep(self.move_delay).await;
        }
        step
    }

    fn report(&self, step: Step) -> Option<Message> {
        match step {
            Step::Blocked(cell) => Some(Message::SetObstaclePosition {
                x: cell.x,
                y: cell.y,
            }),
            Step::Moved | Step::Stuck => Some(Message::SetRobotPosition {
                x: self.pose.x,
                y: self.pose.y,
            }),
            Step::Turned | Step::Stopped => None,
        }
    }
}

impl<D, S> Pilot<D, S>
where
    D: Drive + 'static,
    S: ObstacleSensor + 'static,
{
    /// Registers the pilot's handlers on `endpoint` and spawns its task.
    pub fn install(self, endpoint: &Endpoint, inbox_capacity: usize) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel(inbox_capacity.max(1));
        let stop = self.stop.clone();

        for msg_type in [
            MessageType::SendRobotPosition,
            MessageType::MoveCartography,
            MessageType::MovesTrajectory,
            MessageType::StopRobot,
        ] {
            let tx = tx.clone();
            let stop = stop.clone();
            endpoint.register_message_handler(msg_type, move |message| {
                let stops = match message {
                    Message::StopRobot => stop.raise(),
                    _ => stop.generation(),
                };
                if let Err(e) = tx.try_send(Inbound { message, stops }) {
                    tracing::warn!("Pilot inbox full, dropping {}: {}", message, e);
                }
            });
        }

        tokio::spawn(self.run(rx, endpoint.handle()))
    }

    /// Processes queued messages until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Inbound>, link: LinkHandle) {
        while let Some(inbound) = rx.recv().await {
            for reply in self.handle(inbound).await {
                match link.send_message_async(&reply).await {
                    Ok(()) => {}
                    Err(LinkError::QueueClosed) => {
                        tracing::debug!("Link closed, pilot exiting");
                        return;
                    }
                    Err(e) => tracing::warn!("Failed to send {}: {}", reply, e),
                }
            }
        }
        tracing::debug!("Pilot inbox closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct RecordingDrive {
        actions: Vec<&'static str>,
    }

    impl Drive for RecordingDrive {
        fn forward(&mut self) {
            self.actions.push("forward");
        }

        fn turn_left(&mut self) {
            self.actions.push("left");
        }

        fn turn_right(&mut self) {
            self.actions.push("right");
        }

        fn stop(&mut self) {
            self.actions.push("stop");
        }
    }

    fn pilot(obstacles: &[Cell]) -> Pilot<RecordingDrive, GridSensor> {
        let config = PilotConfig {
            width: 10,
            height: 10,
            obstacles: obstacles.to_vec(),
            ..Default::default()
        };
        Pilot::new(
            &config,
            RecordingDrive::default(),
            GridSensor::from_config(&config),
        )
    }

    fn inbound(message: Message) -> Inbound {
        Inbound { message, stops: 0 }
    }

    #[test]
    fn test_turn_tables() {
        for direction in [
            Direction::South,
            Direction::North,
            Direction::West,
            Direction::East,
        ] {
            assert_eq!(turned_right(turned_left(direction)), direction);
        }
        assert_eq!(turned_left(Direction::South), Direction::East);
        assert_eq!(turned_left(Direction::North), Direction::West);
        assert_eq!(turned_right(Direction::South), Direction::West);
        assert_eq!(turned_right(Direction::East), Direction::South);
    }

    #[test]
    fn test_cell_ahead() {
        assert_eq!(
            cell_ahead(&Position::new(3, 3, Direction::South)),
            Some(Cell::new(4, 3))
        );
        assert_eq!(
            cell_ahead(&Position::new(3, 3, Direction::North)),
            Some(Cell::new(2, 3))
        );
        assert_eq!(
            cell_ahead(&Position::new(3, 3, Direction::West)),
            Some(Cell::new(3, 2))
        );
        assert_eq!(
            cell_ahead(&Position::new(3, 3, Direction::East)),
            Some(Cell::new(3, 4))
        );
        assert_eq!(cell_ahead(&Position::new(0, 5, Direction::North)), None);
        assert_eq!(cell_ahead(&Position::new(5, 255, Direction::East)), None);
    }

    #[test]
    fn test_grid_sensor_bounds() {
        let sensor = GridSensor::new(4, 4, [Cell::new(1, 1)]);
        assert!(sensor.is_blocked(Cell::new(1, 1)));
        assert!(sensor.is_blocked(Cell::new(4, 0)));
        assert!(!sensor.is_blocked(Cell::new(3, 3)));
    }

    #[tokio::test]
    async fn test_position_acknowledged() {
        let mut pilot = pilot(&[]);
        let pose = Position::new(2, 5, Direction::West);
        let replies = pilot.handle(inbound(Message::SendRobotPosition(pose))).await;
        assert_eq!(replies, vec![Message::RobotPositionReceived]);
        assert_eq!(pilot.pose(), pose);
    }

    #[tokio::test]
    async fn test_forward_moves_and_reports() {
        let mut pilot = pilot(&[]);
        let replies = pilot
            .handle(inbound(Message::MoveCartography(Command::Forward)))
            .await;
        assert_eq!(
            replies,
            vec![Message::SetRobotPosition { x: 1, y: 0 }, Message::MoveDone]
        );
        assert_eq!(pilot.pose(), Position::new(1, 0, Direction::South));
        assert_eq!(pilot.drive().actions, vec!["forward"]);
    }

    #[tokio::test]
    async fn test_forward_blocked_reports_obstacle() {
        let mut pilot = pilot(&[Cell::new(1, 0)]);
        let replies = pilot
            .handle(inbound(Message::MoveCartography(Command::Forward)))
            .await;
        assert_eq!(
            replies,
            vec![Message::SetObstaclePosition { x: 1, y: 0 }, Message::MoveDone]
        );
        assert_eq!(pilot.pose(), Position::new(0, 0, Direction::South));
        assert!(pilot.drive().actions.is_empty());
    }

    #[tokio::test]
    async fn test_grid_edge_reports_obstacle() {
        let mut pilot = pilot(&[]);
        pilot
            .handle(inbound(Message::SendRobotPosition(Position::new(
                9,
                0,
                Direction::South,
            ))))
            .await;
        let replies = pilot
            .handle(inbound(Message::MoveCartography(Command::Forward)))
            .await;
        assert_eq!(
            replies,
            vec![Message::SetObstaclePosition { x: 10, y: 0 }, Message::MoveDone]
        );
    }

    #[tokio::test]
    async fn test_byte_grid_edge_stays_put() {
        let mut pilot = pilot(&[]);
        pilot
            .handle(inbound(Message::MoveCartography(Command::Right)))
            .await;
        pilot
            .handle(inbound(Message::MoveCartography(Command::Right)))
            .await;
        assert_eq!(pilot.pose().direction, Direction::North);

        let replies = pilot
            .handle(inbound(Message::MoveCartography(Command::Forward)))
            .await;
        assert_eq!(
            replies,
            vec![Message::SetRobotPosition { x: 0, y: 0 }, Message::MoveDone]
        );
        assert_eq!(pilot.drive().actions, vec!["right", "right"]);
    }

    #[tokio::test]
    async fn test_turns_only_confirm() {
        let mut pilot = pilot(&[]);
        let replies = pilot
            .handle(inbound(Message::MoveCartography(Command::Left)))
            .await;
        assert_eq!(replies, vec![Message::MoveDone]);
        assert_eq!(pilot.pose().direction, Direction::East);

        pilot
            .handle(inbound(Message::MoveCartography(Command::Right)))
            .await;
        pilot
            .handle(inbound(Message::MoveCartography(Command::Right)))
            .await;
        assert_eq!(pilot.pose().direction, Direction::West);
        assert_eq!(pilot.drive().actions, vec!["left", "right", "right"]);
    }

    #[tokio::test]
    async fn test_trajectory_runs_when_complete() {
        let mut pilot = pilot(&[]);
        let frames = Message::trajectory(&[Command::Forward, Command::Left, Command::Forward])
            .unwrap();

        let mut replies = Vec::new();
        for frame in frames {
            replies = pilot.handle(inbound(frame)).await;
        }

        assert_eq!(
            replies,
            vec![Message::SetRobotPosition { x: 1, y: 1 }, Message::MoveDone]
        );
        assert_eq!(pilot.pose(), Position::new(1, 1, Direction::East));
        assert_eq!(pilot.drive().actions, vec!["forward", "left", "forward"]);
    }

    #[tokio::test]
    async fn test_trajectory_stops_at_obstacle() {
        let mut pilot = pilot(&[Cell::new(2, 0)]);
        let frames = Message::trajectory(&[Command::Forward; 4]).unwrap();

        let mut replies = Vec::new();
        for frame in frames {
            replies = pilot.handle(inbound(frame)).await;
        }

        assert_eq!(
            replies,
            vec![
                Message::SetObstaclePosition { x: 2, y: 0 },
                Message::SetRobotPosition { x: 1, y: 0 },
                Message::MoveDone
            ]
        );
        assert_eq!(pilot.drive().actions, vec!["forward"]);
    }

    #[tokio::test]
    async fn test_stop_during_trajectory_suppresses_commands() {
        let mut pilot = pilot(&[]);
        let stop = pilot.stop_signal();
        let frames = Message::trajectory(&[Command::Forward, Command::Forward]).unwrap();

        pilot.handle(inbound(frames[0])).await;
        // Stop arrives off the wire before the trajectory is complete.
        stop.raise();
        let replies = pilot.handle(inbound(frames[1])).await;

        assert_eq!(
            replies,
            vec![Message::SetRobotPosition { x: 0, y: 0 }, Message::MoveDone]
        );
        assert!(pilot.drive().actions.is_empty());

        // The next trajectory starts after the stop and runs normally.
        let frames = Message::trajectory(&[Command::Forward]).unwrap();
        let replies = pilot
            .handle(Inbound {
                message: frames[0],
                stops: stop.generation(),
            })
            .await;
        assert_eq!(replies[0], Message::SetRobotPosition { x: 1, y: 0 });
    }

    #[tokio::test]
    async fn test_invalid_trajectory_discarded() {
        let mut pilot = pilot(&[]);
        pilot
            .handle(inbound(Message::MovesTrajectory {
                count: 3,
                command: Command::Forward,
            }))
            .await;
        let replies = pilot
            .handle(inbound(Message::MovesTrajectory {
                count: 2,
                command: Command::Forward,
            }))
            .await;
        assert!(replies.is_empty());
        assert!(pilot.drive().actions.is_empty());
    }

    #[tokio::test]
    async fn test_stop_robot_halts_drive() {
        let mut pilot = pilot(&[]);
        let replies = pilot.handle(inbound(Message::StopRobot)).await;
        assert!(replies.is_empty());
        assert_eq!(pilot.drive().actions, vec!["stop"]);
    }

    #[tokio::test]
    async fn test_installed_pilot_answers_over_tcp() {
        use carto_link::LinkConfig;
        use carto_protocol::Decoder;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        let config = PilotConfig {
            width: 5,
            height: 5,
            obstacles: vec![Cell::new(2, 1)],
            ..Default::default()
        };
        let mut endpoint = Endpoint::new(
            LinkConfig::server("127.0.0.1:0".parse().unwrap())
                .with_poll_interval(Duration::from_millis(50)),
        );
        let task = Pilot::new(&config, LoggingDrive::new(), GridSensor::from_config(&config))
            .install(&endpoint, config.inbox_capacity);
        endpoint.start().await.unwrap();

        let mut console = TcpStream::connect(endpoint.local_addr().unwrap())
            .await
            .unwrap();
        let requests = [
            Message::SendRobotPosition(Position::new(1, 1, Direction::South)),
            Message::MoveCartography(Command::Forward),
            Message::MoveCartography(Command::Left),
            Message::MoveCartography(Command::Forward),
        ];
        for request in requests {
            console.write_all(&request.encode().unwrap()).await.unwrap();
        }

        let expected = vec![
            Message::RobotPositionReceived,
            Message::SetObstaclePosition { x: 2, y: 1 },
            Message::MoveDone,
            Message::MoveDone,
            Message::SetRobotPosition { x: 1, y: 2 },
            Message::MoveDone,
        ];
        let mut decoder = Decoder::new();
        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        while received.len() < expected.len() {
            let n = tokio::time::timeout(Duration::from_secs(5), console.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0);
            decoder.extend(&buf[..n]);
            while let Some(message) = decoder.decode_message().unwrap() {
                received.push(message);
            }
        }
        assert_eq!(received, expected);

        endpoint.stop().await;
        task.abort();
    }

    #[test]
    fn test_logging_drive_counts() {
        let mut drive = LoggingDrive::new();
        drive.forward();
        drive.turn_left();
        drive.stop();
        assert_eq!(drive.commands(), 3);
    }
}
