//! CLI module for ralph - command-line interface and subcommands.
//!
//! Provides the runner entry point plus operator commands that act only
//! through the control directory, and a thin dashboard API client.

pub mod commands;

pub use commands::Cli;
