//! carto-console - operator console for the carto robot controller
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;
mod session;

use carto_link::LinkConfig;
use carto_protocol::{Command, Direction};
use clap::{Parser, Subcommand};
use colored::Colorize;
use session::Session;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "carto-console")]
#[command(about = "Operator console for the carto robot controller")]
#[command(version)]
struct Cli {
    /// Robot address
    #[arg(short, long, env = "CARTO_ADDR", default_value = "127.0.0.1:12345")]
    addr: SocketAddr,

    /// Wait for the robot to connect instead of connecting to it
    #[arg(long)]
    listen: bool,

    /// Seconds to wait for the robot to connect or reply
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// Run a single motion command
    Move {
        /// forward, left, right or stop
        command: Command,
    },

    /// Run a sequence of motion commands as one trajectory
    Trajectory {
        /// Commands in execution order (at most 50)
        #[arg(required = true)]
        commands: Vec<Command>,
    },

    /// Halt the robot, interrupting any trajectory in progress
    Stop,

    /// Tell the robot where it is
    Position {
        x: u8,
        y: u8,
        /// south, north, west or east
        #[arg(default_value = "south")]
        direction: Direction,
    },

    /// Print robot reports until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = if cli.listen {
        LinkConfig::server(cli.addr)
    } else {
        LinkConfig::client(cli.addr)
    };
    let mut session = Session::new(config, Duration::from_secs(cli.timeout));

    if let Err(e) = session.connect().await {
        eprintln!("{}: {}", "Connection failed".red(), e);
        session.close().await;
        std::process::exit(1);
    }

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(&mut session, cli.addr).await?;
        }
        Some(Commands::Watch) => {
            eprintln!("{} {}", "Watching".green(), cli.addr.to_string().cyan());
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            let mut states = session.endpoint().subscribe_connection();
            loop {
                tokio::select! {
                    report = session.next_report(Duration::from_secs(1)) => {
                        if let Some(message) = report {
                            println!("{}", commands::format_report(&message));
                        }
                    }
                    changed = states.changed() => {
                        if changed.is_err() {
                            eprintln!("{}", "Link closed".red());
                            break;
                        }
                        eprintln!("{} {}", "Link".dimmed(), states.borrow().to_string().yellow());
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Stopping watch...".dimmed());
                        break;
                    }
                }
            }
        }
        Some(cmd) => match commands::execute(&mut session, cmd).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                session.close().await;
                std::process::exit(1);
            }
        },
    }

    session.close().await;
    Ok(())
}
