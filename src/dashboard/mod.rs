//! Client for the Ralph Dashboard REST API.

pub mod client;
pub mod types;

pub use client::{DashboardClient, DashboardConfig, LoopCommand};
pub use types::{LoginResponse, Project, ProjectStats};
