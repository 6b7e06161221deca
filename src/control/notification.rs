//! Pending human-facing notification (`pending-notification.txt`).

use std::fs;
use std::io::ErrorKind;

use log::info;

use super::ControlDirectory;
use crate::error::Result;

/// Reader/writer for the pending notification flag.
pub struct NotificationFlag {
    dir: ControlDirectory,
}

impl NotificationFlag {
    pub fn new(dir: ControlDirectory) -> Self {
        Self { dir }
    }

    /// Set the pending notification, replacing any previous one.
    pub fn raise(&self, message: &str) -> Result<()> {
        self.dir.ensure()?;
        self.dir.write_atomic(&self.dir.notification_path(), message.as_bytes())?;
        info!("Raised notification: {}", message);
        Ok(())
    }

    /// Read the pending notification without clearing it.
    pub fn peek(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.dir.notification_path()) {
            Ok(s) if s.trim().is_empty() => Ok(None),
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read and clear the pending notification.
    pub fn take(&self) -> Result<Option<String>> {
        let message = self.peek()?;
        match fs::remove_file(self.dir.notification_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(message)
    }
}
