//! Offset-owned reader for `iterations.jsonl`.
//!
//! Only newline-terminated lines are consumed; an incomplete trailing line is
//! left for a later poll. Complete lines that fail to parse are skipped.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use log::warn;
use serde::Deserialize;

use super::record::IterationRecord;
use crate::control::ControlDirectory;
use crate::error::Result;

/// Records read since a given offset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TailBatch {
    pub records: Vec<IterationRecord>,
    /// Offset just past the last complete line consumed
    pub next_offset: u64,
    /// Complete lines that were not valid records
    pub skipped: usize,
}

/// Result of scanning the whole log for problems.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonlReport {
    pub valid: usize,
    /// 1-based line numbers that did not parse
    pub invalid_lines: Vec<usize>,
    pub incomplete_tail: bool,
}

impl JsonlReport {
    pub fn is_clean(&self) -> bool {
        self.invalid_lines.is_empty() && !self.incomplete_tail
    }
}

/// Just the number of a record, for lines that may not parse in full.
#[derive(Deserialize)]
struct IterationNumber {
    iteration: u64,
}

pub struct TelemetryReader {
    dir: ControlDirectory,
}

impl TelemetryReader {
    pub fn new(dir: ControlDirectory) -> Self {
        Self { dir }
    }

    /// Read complete records starting at `offset`.
    pub fn read_from(&self, offset: u64) -> Result<TailBatch> {
        let Some(bytes) = self.read_bytes_from(offset)? else {
            return Ok(TailBatch {
                next_offset: offset,
                ..Default::default()
            });
        };

        let consumed = complete_len(&bytes);
        let mut batch = TailBatch {
            next_offset: offset + consumed as u64,
            ..Default::default()
        };

        for line in String::from_utf8_lossy(&bytes[..consumed]).lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<IterationRecord>(trimmed) {
                Ok(record) => batch.records.push(record),
                Err(e) => {
                    warn!("Skipping invalid telemetry line: {}", e);
                    batch.skipped += 1;
                }
            }
        }
        Ok(batch)
    }

    /// Every complete record in the log.
    pub fn read_all(&self) -> Result<Vec<IterationRecord>> {
        Ok(self.read_from(0)?.records)
    }

    /// The most recent `limit` records, oldest first.
    pub fn read_recent(&self, limit: usize) -> Result<Vec<IterationRecord>> {
        let mut records = self.read_all()?;
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }

    /// Highest recorded iteration number, 0 when the log is empty.
    ///
    /// Counts every complete line carrying a numeric `iteration`, even one whose
    /// other fields would not parse, so resumed numbering never reuses a number.
    pub fn last_iteration(&self) -> Result<u64> {
        let Some(bytes) = self.read_bytes_from(0)? else {
            return Ok(0);
        };
        let last = String::from_utf8_lossy(&bytes[..complete_len(&bytes)])
            .lines()
            .filter_map(|line| serde_json::from_str::<IterationNumber>(line.trim()).ok())
            .map(|n| n.iteration)
            .max()
            .unwrap_or(0);
        Ok(last)
    }

    pub fn validate(&self) -> Result<JsonlReport> {
        let Some(bytes) = self.read_bytes_from(0)? else {
            return Ok(JsonlReport::default());
        };

        let mut report = JsonlReport {
            incomplete_tail: !bytes.is_empty() && bytes.last() != Some(&b'\n'),
            ..Default::default()
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut lines: Vec<&str> = text.split('\n').collect();
        // Either the empty string after the final newline or the incomplete tail
        lines.pop();

        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IterationRecord>(line.trim()) {
                Ok(_) => report.valid += 1,
                Err(_) => report.invalid_lines.push(idx + 1),
            }
        }
        Ok(report)
    }

    fn read_bytes_from(&self, offset: u64) -> Result<Option<Vec<u8>>> {
        let mut file = match File::open(self.dir.iterations_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        if offset > len {
            warn!("Telemetry offset {} beyond file length {}", offset, len);
            return Ok(None);
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = Vec::with_capacity((len - offset) as usize);
        file.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }
}

/// Bytes up to and including the last newline.
fn complete_len(bytes: &[u8]) -> usize {
    bytes.iter().rposition(|&b| b == b'\n').map_or(0, |pos| pos + 1)
}
