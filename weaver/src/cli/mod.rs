//! CLI argument parsing and command execution.

mod args;
mod chat;
mod commands;

pub use args::Cli;
pub use commands::execute;
