//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: start the iteration loop for a project
//! - status/stats/iterations/doctor: read the control directory
//! - pause/resume/inject/stop/notify: write control signals
//! - dashboard: talk to the dashboard REST API

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ralph - drive and control long-running iteration loops through a control directory
#[derive(Parser, Debug)]
#[command(name = "ralph")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project root containing the control directory
    #[arg(short, long, global = true, default_value = ".")]
    pub project: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the loop in the foreground until stopped
    Run,

    /// Show liveness, pause state and pending signals
    Status,

    /// Pause before the next iteration
    Pause,

    /// Remove the pause marker
    Resume,

    /// Queue an instruction for the next iteration
    Inject {
        /// Instruction text
        instruction: String,
    },

    /// Ask a live runner to stop at its next boundary
    Stop,

    /// Show recent iteration records
    Iterations {
        /// Number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Aggregate statistics over all iterations
    Stats,

    /// Show (or clear) the pending notification
    Notify {
        /// Clear after showing
        #[arg(long)]
        clear: bool,
    },

    /// Check the control directory for common problems
    Doctor,

    /// Print the telemetry record schema
    Schema,

    /// Dashboard API commands
    Dashboard {
        #[command(subcommand)]
        command: DashboardCommands,
    },
}

/// Dashboard API subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum DashboardCommands {
    /// Log in and print an access token
    Login {
        #[arg(short, long)]
        username: Option<String>,
        /// Password (falls back to RALPH_DASHBOARD_PASSWORD)
        #[arg(long, env = "RALPH_DASHBOARD_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// List projects
    Projects {
        #[command(flatten)]
        auth: TokenArg,
    },

    /// Show one project
    Project {
        id: String,
        #[command(flatten)]
        auth: TokenArg,
    },

    /// Show project statistics
    Stats {
        id: String,
        #[command(flatten)]
        auth: TokenArg,
    },

    /// List recent iterations
    Iterations {
        id: String,
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
        #[arg(long)]
        page: Option<u32>,
        #[command(flatten)]
        auth: TokenArg,
    },

    /// Show the implementation plan
    Plan {
        id: String,
        #[command(flatten)]
        auth: TokenArg,
    },

    /// Start a project's loop
    Start {
        id: String,
        #[command(flatten)]
        auth: TokenArg,
    },

    /// Stop a project's loop
    Stop {
        id: String,
        #[command(flatten)]
        auth: TokenArg,
    },

    /// Pause a project's loop
    Pause {
        id: String,
        #[command(flatten)]
        auth: TokenArg,
    },

    /// Resume a project's loop
    Resume {
        id: String,
        #[command(flatten)]
        auth: TokenArg,
    },

    /// Inject an instruction into a project's next iteration
    Inject {
        id: String,
        instruction: String,
        #[command(flatten)]
        auth: TokenArg,
    },
}

/// Bearer token for dashboard calls
#[derive(clap::Args, Debug, Clone)]
pub struct TokenArg {
    #[arg(long, env = "RALPH_DASHBOARD_TOKEN", hide_env_values = true)]
    pub token: String,
}
