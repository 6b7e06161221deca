//! The Control Directory: the only channel between a runner and its observers.
//!
//! Every component receives a `ControlDirectory` handle instead of resolving
//! paths on its own, so tests can point a whole runner at a temp dir.

pub mod notification;
pub mod signals;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use notification::NotificationFlag;
pub use signals::{BoundarySignal, ControlSignals, StopHandle};

/// Default control directory name inside a project root
pub const DEFAULT_DIR_NAME: &str = ".ralph";

pub const LOG_FILE: &str = "ralph.log";
pub const ITERATIONS_FILE: &str = "iterations.jsonl";
pub const PID_FILE: &str = "ralph.pid";
pub const PAUSE_FILE: &str = "pause";
pub const INJECT_FILE: &str = "inject.md";
pub const NOTIFICATION_FILE: &str = "pending-notification.txt";
pub const CONFIG_FILE: &str = "config.json";

/// Handle to one project's control directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDirectory {
    root: PathBuf,
}

impl ControlDirectory {
    /// Wrap an existing (or to-be-created) control directory path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Control directory `dir_name` under `project_root`.
    pub fn for_project(project_root: impl AsRef<Path>, dir_name: &str) -> Self {
        Self::new(project_root.as_ref().join(dir_name))
    }

    /// Create the directory if missing.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The project the control directory belongs to.
    pub fn project_root(&self) -> &Path {
        self.root.parent().unwrap_or(&self.root)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    pub fn iterations_path(&self) -> PathBuf {
        self.root.join(ITERATIONS_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join(PID_FILE)
    }

    pub fn pause_path(&self) -> PathBuf {
        self.root.join(PAUSE_FILE)
    }

    pub fn inject_path(&self) -> PathBuf {
        self.root.join(INJECT_FILE)
    }

    pub fn notification_path(&self) -> PathBuf {
        self.root.join(NOTIFICATION_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Replace `path` with `contents` via write-then-rename in the same directory.
    ///
    /// Readers observe either the old or the new file, never a partial write.
    pub fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "control".to_string());
        let tmp_path = self.root.join(format!(".{}.tmp-{}", name, std::process::id()));

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}
