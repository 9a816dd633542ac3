//! CLI command definitions (SPEC_FULL §3.2): daemon lifecycle plus a couple
//! of direct inspection commands, mirroring the teacher's `clap`-derived
//! `Cli`/`Command` split.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "wordgated",
    about = "Automated task-acceptance gate for a translation management platform",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Daemon lifecycle management
    #[command(subcommand)]
    Daemon(DaemonCommand),

    /// Check whether a date is a business day under the current calendar
    Calendar {
        #[command(subcommand)]
        command: CalendarCommand,
    },

    /// Inspect or adjust the capacity store
    Capacity {
        #[command(subcommand)]
        command: CapacityCommand,
    },

    /// Internal: run as the daemon process itself (used by `daemon start`)
    #[command(hide = true)]
    RunDaemon,
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon in the background
    Start {
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status {
        #[arg(short, long)]
        detailed: bool,
    },
}

#[derive(Subcommand)]
pub enum CalendarCommand {
    /// Report whether `date` (YYYY-MM-DD) is a business day
    Check { date: String },
}

#[derive(Subcommand)]
pub enum CapacityCommand {
    /// Print the current capacity and override maps
    Show,
    /// Adjust one date's used-word count by a signed delta
    Adjust { date: String, delta: i64 },
}
