//! Append-only writer for `iterations.jsonl` and the narrative `ralph.log`.
//!
//! Each record is serialized to one line and written with a single append,
//! then synced. A trailing line without a newline can only come from an
//! interrupted write; it is truncated before the next append so the new
//! record never fuses with it. Only the runner holding the liveness record
//! may repair or append; opening the writer does not touch the file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use super::reader::TelemetryReader;
use super::record::{IterationRecord, Phase};
use crate::control::ControlDirectory;
use crate::error::{RalphError, Result};

const RETRY_DELAY: Duration = Duration::from_millis(200);
const TAIL_CHUNK: u64 = 4096;

pub struct TelemetryWriter {
    dir: ControlDirectory,
    retries: u32,
    retry_delay: Duration,
}

impl TelemetryWriter {
    /// Writer for `dir`. Nothing is read or written until the first call.
    pub fn open(dir: ControlDirectory, retries: u32) -> Self {
        Self {
            dir,
            retries,
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Highest iteration number already recorded, 0 when none.
    pub fn last_iteration(&self) -> Result<u64> {
        TelemetryReader::new(self.dir.clone()).last_iteration()
    }

    /// Append one record, retrying transient failures.
    pub async fn append(&self, record: &IterationRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut last_err = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }
            match self.try_append(&line) {
                Ok(()) => {
                    debug!("Appended iteration {} to telemetry", record.iteration);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Telemetry append for iteration {} failed (attempt {}/{}): {}",
                        record.iteration,
                        attempt + 1,
                        self.retries + 1,
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(RalphError::Telemetry(format!(
            "could not append iteration {}: {}",
            record.iteration,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn try_append(&self, line: &[u8]) -> Result<()> {
        self.dir.ensure()?;
        self.repair_tail()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.iterations_path())?;
        file.write_all(line)?;
        file.sync_data()?;
        Ok(())
    }

    /// Drop bytes after the last newline.
    pub fn repair_tail(&self) -> Result<()> {
        let path = self.dir.iterations_path();
        if !path.exists() {
            return Ok(());
        }
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(());
        }

        let keep = complete_prefix_len(&mut file, len)?;
        if keep < len {
            warn!(
                "Truncating {} bytes of incomplete trailing record in {}",
                len - keep,
                path.display()
            );
            file.set_len(keep)?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Header line opening an iteration in the narrative log.
    pub fn narrate_header(&self, iteration: u64, phase: Phase, started_at: DateTime<Utc>) {
        self.write_log(&format!(
            "\n======== ITERATION {} | {} | {} ========\n",
            iteration,
            phase,
            started_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        ));
    }

    pub fn narrate_phase(&self, phase: Phase) {
        self.write_log(&format!("--- {} ---\n", phase));
    }

    /// Free-form progress text, one timestamped line per input line.
    pub fn narrate(&self, text: &str) {
        let stamp = Utc::now().format("%H:%M:%S");
        let mut out = String::new();
        for line in text.lines() {
            out.push_str(&format!("[{}] {}\n", stamp, line));
        }
        if !out.is_empty() {
            self.write_log(&out);
        }
    }

    pub fn narrate_footer(&self, record: &IterationRecord) {
        let status = if record.is_success() { "success" } else { "failure" };
        self.write_log(&format!(
            "======== END ITERATION {} | {} | {:.1}s ========\n",
            record.iteration,
            status,
            record.duration_seconds()
        ));
    }

    /// Narrative is best-effort; losing a line never halts the loop.
    fn write_log(&self, text: &str) {
        if let Err(e) = append_text(&self.dir.log_path(), text) {
            warn!("Failed to write narrative log: {}", e);
        }
    }
}

fn append_text(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}

/// Length of the file up to and including its last newline.
fn complete_prefix_len(file: &mut File, len: u64) -> Result<u64> {
    let mut end = len;
    let mut buf = vec![0u8; TAIL_CHUNK as usize];
    while end > 0 {
        let start = end.saturating_sub(TAIL_CHUNK);
        let size = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..size])?;
        if let Some(pos) = buf[..size].iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}
