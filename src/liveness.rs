//! Liveness record (`ralph.pid`).
//!
//! A PID file is only a claim. It counts as live when the file exists, holds a
//! positive process id, and a process with that id is running. Anything else,
//! including the literal `0` used to invalidate the file, is stale.

use std::fs;
use std::io::ErrorKind;

use log::{info, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::control::ControlDirectory;
use crate::error::{RalphError, Result};

/// What a reader can conclude from the PID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// No PID file
    Absent,
    /// PID file present but not a live claim
    Stale { reason: String },
    /// A running process holds the record
    Live { pid: i32 },
}

impl Liveness {
    pub fn is_live(&self) -> bool {
        matches!(self, Liveness::Live { .. })
    }
}

/// Parse PID file contents into a plausible process id.
pub fn parse_pid(raw: &str) -> Option<i32> {
    match raw.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Some(pid),
        _ => None,
    }
}

/// Signal-0 liveness check. EPERM means the process exists under another user.
pub fn is_pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Publishes and inspects the runner's liveness record.
pub struct LivenessManager {
    dir: ControlDirectory,
    pid: i32,
}

impl LivenessManager {
    /// Manager for the current process.
    pub fn new(dir: ControlDirectory) -> Self {
        Self::with_pid(dir, std::process::id() as i32)
    }

    pub fn with_pid(dir: ControlDirectory, pid: i32) -> Self {
        Self { dir, pid }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Inspect the PID file without trusting it.
    pub fn check(dir: &ControlDirectory) -> Liveness {
        let raw = match fs::read_to_string(dir.pid_path()) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Liveness::Absent,
            Err(e) => {
                warn!("Cannot read pid file: {}", e);
                return Liveness::Stale {
                    reason: format!("unreadable: {}", e),
                };
            }
        };

        let Some(pid) = parse_pid(&raw) else {
            return Liveness::Stale {
                reason: format!("invalid pid value {:?}", raw.trim()),
            };
        };

        if is_pid_alive(pid) {
            Liveness::Live { pid }
        } else {
            Liveness::Stale {
                reason: format!("pid {} is not running", pid),
            }
        }
    }

    /// Write our PID, replacing a stale record.
    ///
    /// Refuses only when a different, live process already holds the record.
    pub fn publish(&self) -> Result<()> {
        self.dir.ensure()?;

        match Self::check(&self.dir) {
            Liveness::Live { pid } if pid != self.pid => return Err(RalphError::AlreadyRunning(pid)),
            Liveness::Stale { reason } => warn!("Replacing stale pid record ({})", reason),
            Liveness::Live { .. } | Liveness::Absent => {}
        }

        self.dir
            .write_atomic(&self.dir.pid_path(), format!("{}\n", self.pid).as_bytes())?;
        info!("Published pid {} to {}", self.pid, self.dir.pid_path().display());
        Ok(())
    }

    /// Remove the record if it is still ours.
    pub fn release(&self) -> Result<()> {
        let path = self.dir.pid_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if parse_pid(&raw) == Some(self.pid) {
            fs::remove_file(&path)?;
            info!("Released pid record");
        } else {
            warn!("Pid record no longer ours ({:?}), leaving it", raw.trim());
        }
        Ok(())
    }

    /// Ask a live runner to stop at its next boundary.
    ///
    /// Returns the signalled pid, or `None` when nothing live holds the record.
    pub fn request_stop(dir: &ControlDirectory) -> Result<Option<i32>> {
        match Self::check(dir) {
            Liveness::Live { pid } => {
                signal::kill(Pid::from_raw(pid), Signal::SIGTERM)
                    .map_err(|e| RalphError::InvalidState(format!("cannot signal pid {}: {}", pid, e)))?;
                info!("Sent SIGTERM to runner pid {}", pid);
                Ok(Some(pid))
            }
            _ => Ok(None),
        }
    }
}
