//! CLI argument definitions using clap
//!
//! Commands:
//! - kvtxn init --config <path>
//! - kvtxn serve --config <path> [--port N] [--memory]
//! - kvtxn run <scenario> --config <path> [--memory] [--mode M]

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// kvtxn - optimistic transactions over a remote key-value store
#[derive(Parser, Debug)]
#[command(name = "kvtxn")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default configuration file
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./kvtxn.json")]
        config: PathBuf,
    },

    /// Serve the scenarios over HTTP
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./kvtxn.json")]
        config: PathBuf,

        /// Override the configured HTTP port
        #[arg(long)]
        port: Option<u16>,

        /// Use the in-process store instead of connecting to a server
        #[arg(long)]
        memory: bool,
    },

    /// Run one scenario, print its result and exit
    Run {
        scenario: Scenario,

        /// Path to configuration file
        #[arg(long, default_value = "./kvtxn.json")]
        config: PathBuf,

        /// Use the in-process store instead of connecting to a server
        #[arg(long)]
        memory: bool,

        /// Race mode for watched-update: timed, mutator-first, session-first
        /// or unopposed
        #[arg(long, default_value = "timed")]
        mode: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    /// Watched read-modify-write racing a background writer
    WatchedUpdate,
    /// Batch aborted by a malformed command
    SyntaxFault,
    /// Batch where one command fails while the rest apply
    LogicFault,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
