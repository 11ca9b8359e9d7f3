//! Interactive REPL.

use crate::commands;
use crate::session::Session;
use crate::Commands;
use carto_protocol::{Command, Direction};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::net::SocketAddr;

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help

  forward, left, right          Run a single motion command
  move <command>                Same, with the command spelled out
  traj <cmd> [cmd...]           Run a trajectory (e.g. traj f f l f)
  stop                          Halt the robot
  pos <x> <y> [direction]       Tell the robot where it is

  reports                       Show reports received since the last command
  status                        Show link state

  quit, exit                    Exit the REPL
"#;

/// What a REPL line asks for.
#[derive(Debug, PartialEq)]
enum Line {
    Empty,
    Help,
    Quit,
    Reports,
    Status,
    Run(Commands),
}

pub async fn run(
    session: &mut Session,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "carto console".bold().cyan());
    println!("{} {}", "Connected to".green(), addr);

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".carto_history"))
        .unwrap_or_else(|_| ".carto_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "carto>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => match parse_line(&line) {
                Ok(Line::Empty) => continue,
                Ok(Line::Quit) => break,
                Ok(Line::Help) => println!("{}", HELP_TEXT),
                Ok(Line::Reports) => {
                    println!("{}\n", commands::format_reports(&session.drain()));
                }
                Ok(Line::Status) => println!(
                    "Link: {}  Reader: {}\n",
                    session.endpoint().connection_state().to_string().yellow(),
                    session.endpoint().dispatcher_state().to_string().yellow()
                ),
                Ok(Line::Run(cmd)) => match commands::execute(session, cmd).await {
                    Ok(output) => println!("{}\n", output),
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                },
                Err(usage) => println!("{}\n", usage),
            },
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    println!("{}", "Disconnected.".dimmed());
    Ok(())
}

fn parse_line(line: &str) -> Result<Line, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = parts.first() else {
        return Ok(Line::Empty);
    };

    let cmd = first.to_lowercase();
    let args = &parts[1..];

    match cmd.as_str() {
        "help" | "?" => Ok(Line::Help),
        "quit" | "exit" | "q" => Ok(Line::Quit),
        "reports" => Ok(Line::Reports),
        "status" => Ok(Line::Status),

        "forward" | "f" => Ok(Line::Run(Commands::Move {
            command: Command::Forward,
        })),
        "left" | "l" => Ok(Line::Run(Commands::Move {
            command: Command::Left,
        })),
        "right" | "r" => Ok(Line::Run(Commands::Move {
            command: Command::Right,
        })),

        "move" | "m" => {
            let [command] = args else {
                return Err("Usage: move <forward|left|right|stop>".to_string());
            };
            Ok(Line::Run(Commands::Move {
                command: command.parse()?,
            }))
        }

        "traj" | "trajectory" | "t" => {
            if args.is_empty() {
                return Err("Usage: traj <cmd> [cmd...]".to_string());
            }
            let commands = args
                .iter()
                .map(|s| s.parse::<Command>())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Line::Run(Commands::Trajectory { commands }))
        }

        "stop" | "halt" => Ok(Line::Run(Commands::Stop)),

        "pos" | "position" | "p" => {
            if args.len() < 2 || args.len() > 3 {
                return Err("Usage: pos <x> <y> [direction]".to_string());
            }
            let x = parse_coordinate(args[0])?;
            let y = parse_coordinate(args[1])?;
            let direction = match args.get(2) {
                Some(s) => s.parse::<Direction>()?,
                None => Direction::South,
            };
            Ok(Line::Run(Commands::Position { x, y, direction }))
        }

        _ => Err(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        )),
    }
}

fn parse_coordinate(s: &str) -> Result<u8, String> {
    s.parse()
        .map_err(|_| format!("invalid coordinate '{}': expected 0-255", s))
}
