//! Control signals polled by the runner at iteration boundaries.
//!
//! Pause is a marker file whose existence is the state. An injected
//! instruction is claimed by renaming `inject.md` away before reading it, so
//! an instruction written while the runner consumes the previous one lands in
//! a fresh `inject.md` and is delivered at the next boundary. Stop arrives as
//! a termination request (SIGINT/SIGTERM) and is only honored at a boundary.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use super::ControlDirectory;
use crate::error::Result;

const CLAIMED_INJECT_FILE: &str = ".inject.md.claimed";

/// What the runner should do at the boundary it is standing on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundarySignal {
    /// Pause marker present; do not start another iteration
    Paused,
    /// Stop requested
    Stop,
    /// Start the next iteration, with an instruction if one was queued
    Continue { instruction: Option<String> },
}

/// Cooperative stop flag shared between signal handlers and the runner.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Flip the flag on SIGINT or SIGTERM. Must be called inside a tokio runtime.
    pub fn listen_for_termination(&self) -> Result<()> {
        let handle = self.clone();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT, stopping at next boundary"),
                _ = sigterm.recv() => info!("Received SIGTERM, stopping at next boundary"),
            }
            handle.request();
        });
        Ok(())
    }
}

/// Runner-side reader of the control signals.
pub struct ControlSignals {
    dir: ControlDirectory,
    stop: StopHandle,
}

impl ControlSignals {
    pub fn new(dir: ControlDirectory, stop: StopHandle) -> Self {
        Self { dir, stop }
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    /// Pause marker exists. Contents are ignored.
    pub fn is_paused(&self) -> bool {
        match fs::symlink_metadata(self.dir.pause_path()) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Cannot stat pause marker, treating as absent: {}", e);
                false
            }
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_requested()
    }

    /// Check signals in priority order: pause, stop, inject.
    ///
    /// The instruction is only claimed when the runner is about to continue,
    /// so a pending instruction survives a pause untouched.
    pub fn poll(&self) -> BoundarySignal {
        if self.is_paused() {
            debug!("Pause marker present");
            return BoundarySignal::Paused;
        }
        if self.stop_requested() {
            return BoundarySignal::Stop;
        }
        BoundarySignal::Continue {
            instruction: self.take_instruction(),
        }
    }

    /// Claim and clear the pending instruction, if any.
    ///
    /// A claimed file left behind by a crash is delivered before a newer `inject.md`.
    pub fn take_instruction(&self) -> Option<String> {
        let claimed = self.claimed_path();

        if !claimed.exists() {
            match fs::rename(self.dir.inject_path(), &claimed) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => return None,
                Err(e) => {
                    warn!("Cannot claim injected instruction: {}", e);
                    return None;
                }
            }
        } else {
            info!("Recovering instruction claimed by a previous run");
        }

        let content = match fs::read(&claimed) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("Cannot read claimed instruction, will retry next boundary: {}", e);
                return None;
            }
        };

        if let Err(e) = fs::remove_file(&claimed) {
            warn!("Cannot clear claimed instruction: {}", e);
        }

        let trimmed = content.trim();
        if trimmed.is_empty() {
            debug!("Injected instruction was empty, ignoring");
            None
        } else {
            info!("Consumed injected instruction ({} bytes)", trimmed.len());
            Some(trimmed.to_string())
        }
    }

    fn claimed_path(&self) -> PathBuf {
        self.dir.root().join(CLAIMED_INJECT_FILE)
    }
}

/// Operator side: requests are expressed purely as file state.
impl ControlDirectory {
    pub fn request_pause(&self) -> Result<()> {
        self.ensure()?;
        self.write_atomic(&self.pause_path(), b"")
    }

    /// Remove the pause marker. Returns whether one was present.
    pub fn clear_pause(&self) -> Result<bool> {
        match fs::remove_file(self.pause_path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Queue an instruction for the next iteration, replacing any unconsumed one.
    pub fn inject(&self, instruction: &str) -> Result<()> {
        self.ensure()?;
        self.write_atomic(&self.inject_path(), instruction.as_bytes())
    }

    /// Instruction waiting to be consumed, if any.
    pub fn pending_instruction(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.inject_path()) {
            Ok(s) if s.trim().is_empty() => Ok(None),
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ControlDirectory, ControlSignals) {
        let temp = TempDir::new().unwrap();
        let dir = ControlDirectory::new(temp.path());
        let signals = ControlSignals::new(dir.clone(), StopHandle::new());
        (temp, dir, signals)
    }

    #[test]
    fn test_poll_with_nothing_pending() {
        let (_temp, _dir, signals) = setup();
        assert_eq!(signals.poll(), BoundarySignal::Continue { instruction: None });
    }

    #[test]
    fn test_pause_marker_round_trip() {
        let (_temp, dir, signals) = setup();
        dir.request_pause().unwrap();
        assert!(signals.is_paused());
        assert_eq!(signals.poll(), BoundarySignal::Paused);

        assert!(dir.clear_pause().unwrap());
        assert!(!signals.is_paused());
        assert!(!dir.clear_pause().unwrap());
    }

    #[test]
    fn test_pause_marker_contents_are_ignored() {
        let (_temp, dir, signals) = setup();
        fs::write(dir.pause_path(), "\0garbage\u{fffd}").unwrap();
        assert_eq!(signals.poll(), BoundarySignal::Paused);
    }

    #[test]
    fn test_stop_requested() {
        let (_temp, _dir, signals) = setup();
        signals.stop_handle().request();
        assert_eq!(signals.poll(), BoundarySignal::Stop);
    }

    #[test]
    fn test_pause_takes_precedence_over_stop() {
        let (_temp, dir, signals) = setup();
        dir.request_pause().unwrap();
        signals.stop_handle().request();
        assert_eq!(signals.poll(), BoundarySignal::Paused);
    }

    #[test]
    fn test_inject_delivered_once() {
        let (_temp, dir, signals) = setup();
        dir.inject("Focus on the parser tests").unwrap();

        assert_eq!(
            signals.poll(),
            BoundarySignal::Continue {
                instruction: Some("Focus on the parser tests".to_string())
            }
        );
        assert!(!dir.inject_path().exists());
        assert_eq!(signals.poll(), BoundarySignal::Continue { instruction: None });
    }

    #[test]
    fn test_inject_stays_queued_while_paused() {
        let (_temp, dir, signals) = setup();
        dir.inject("after resume").unwrap();
        dir.request_pause().unwrap();

        assert_eq!(signals.poll(), BoundarySignal::Paused);
        assert_eq!(dir.pending_instruction().unwrap(), Some("after resume".to_string()));

        dir.clear_pause().unwrap();
        assert_eq!(
            signals.poll(),
            BoundarySignal::Continue {
                instruction: Some("after resume".to_string())
            }
        );
    }

    #[test]
    fn test_empty_inject_is_cleared_and_ignored() {
        let (_temp, dir, signals) = setup();
        fs::write(dir.inject_path(), "   \n\n").unwrap();
        assert_eq!(signals.take_instruction(), None);
        assert!(!dir.inject_path().exists());
    }

    #[test]
    fn test_leftover_claim_is_recovered_before_new_inject() {
        let (_temp, dir, signals) = setup();
        fs::write(dir.root().join(CLAIMED_INJECT_FILE), "from crashed run").unwrap();
        dir.inject("newer").unwrap();

        assert_eq!(signals.take_instruction(), Some("from crashed run".to_string()));
        assert_eq!(signals.take_instruction(), Some("newer".to_string()));
        assert_eq!(signals.take_instruction(), None);
    }

    #[test]
    fn test_stop_handle_shared_between_clones() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_requested());
        clone.request();
        assert!(handle.is_requested());
    }
}
