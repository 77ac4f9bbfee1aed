// ABOUTME: Command-line interface definition for the sleeptrack binary.
// ABOUTME: Each subcommand maps to one coordinator intent.

use clap::{Parser, Subcommand};

/// Track sleep sessions from the command line.
#[derive(Debug, Parser)]
#[command(name = "sleeptrack", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// The requested command, defaulting to `list`.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::List { json: false })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Start tracking a night of sleep.
    Start,
    /// Stop tracking the current night.
    Stop,
    /// Rate an ended session from 0 (very bad) to 5 (excellent).
    Rate {
        id: i64,
        #[arg(value_parser = clap::value_parser!(i32).range(0..=5))]
        quality: i32,
    },
    /// Delete every recorded session.
    Clear,
    /// Show recorded sessions, newest first.
    List {
        /// Print records as JSON.
        #[arg(long)]
        json: bool,
    },
}
