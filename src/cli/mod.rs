//! CLI module for kvtxn
//!
//! Provides command-line interface for:
//! - init: Write a default config file
//! - serve: Serve the scenarios over HTTP
//! - run: Run one scenario and print its result

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, Scenario};
pub use commands::{init, run, run_command, run_scenario, serve};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
