//! Command execution.

use crate::session::Session;
use crate::Commands;
use carto_protocol::{Command, Message, MessageType, Position, DEFAULT_TRAJECTORY_CAPACITY};
use colored::Colorize;

/// Executes a command and returns the formatted output.
pub async fn execute(
    session: &mut Session,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl | Commands::Watch => {
            Err("interactive commands cannot be executed one-shot".into())
        }

        Commands::Move { command } => {
            let reports = session
                .request(
                    &[Message::MoveCartography(command)],
                    Some(MessageType::MoveDone),
                )
                .await?;
            Ok(format_reports(&reports))
        }

        Commands::Trajectory { commands } => {
            let frames = trajectory_frames(&commands)?;
            let reports = session
                .request(&frames, Some(MessageType::MoveDone))
                .await?;
            Ok(format!(
                "{} {}\n{}",
                "Trajectory".bold(),
                format_commands(&commands),
                format_reports(&reports)
            ))
        }

        Commands::Stop => {
            let reports = session.request(&[Message::StopRobot], None).await?;
            let mut output = "Stop sent".yellow().to_string();
            if !reports.is_empty() {
                output.push('\n');
                output.push_str(&format_reports(&reports));
            }
            Ok(output)
        }

        Commands::Position { x, y, direction } => {
            let pose = Position::new(x, y, direction);
            session
                .request(
                    &[Message::SendRobotPosition(pose)],
                    Some(MessageType::RobotPositionReceived),
                )
                .await?;
            Ok(format!("{} {}", "Position set to".green(), pose))
        }
    }
}

/// Splits a trajectory into frames, refusing ones the robot would discard.
fn trajectory_frames(commands: &[Command]) -> Result<Vec<Message>, String> {
    if commands.len() > DEFAULT_TRAJECTORY_CAPACITY {
        return Err(format!(
            "trajectory of {} commands exceeds the robot's limit of {}",
            commands.len(),
            DEFAULT_TRAJECTORY_CAPACITY
        ));
    }
    Message::trajectory(commands).map_err(|e| e.to_string())
}

/// Renders one robot report.
pub fn format_report(message: &Message) -> String {
    match message {
        Message::MoveDone => "Move done".green().to_string(),
        Message::SetObstaclePosition { x, y } => {
            format!("{} at ({}, {})", "Obstacle".red(), x, y)
        }
        Message::SetRobotPosition { x, y } => {
            format!("{} at ({}, {})", "Robot".cyan(), x, y)
        }
        Message::RobotPositionReceived => "Position acknowledged".green().to_string(),
        other => other.to_string(),
    }
}

/// Renders a batch of reports, one per line.
pub fn format_reports(reports: &[Message]) -> String {
    if reports.is_empty() {
        return "No reports".yellow().to_string();
    }
    reports
        .iter()
        .map(|message| format!("  {}", format_report(message)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_commands(commands: &[Command]) -> String {
    commands
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" → ")
}
