//! Aggregate statistics over the telemetry log, built incrementally.
//!
//! Records are never rewritten, so a tail can keep its offset and fold in
//! only what was appended since the last poll.

use serde::Serialize;

use super::reader::TelemetryReader;
use super::record::IterationRecord;
use crate::control::ControlDirectory;
use crate::error::Result;

/// Totals across all records. Counters stay `None` until some record reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IterationStats {
    pub iteration_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_iteration: Option<u64>,
    pub total_duration_seconds: f64,
    pub tokens_total: Option<u64>,
    pub cost_usd: Option<f64>,
    pub tasks_done: Option<u32>,
    pub tasks_total: Option<u32>,
    pub last_commit: Option<String>,
}

impl IterationStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a IterationRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.add(record);
        }
        stats
    }

    pub fn add(&mut self, record: &IterationRecord) {
        self.iteration_count += 1;
        if record.is_success() {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_iteration = Some(self.last_iteration.map_or(record.iteration, |l| l.max(record.iteration)));
        self.total_duration_seconds += record.duration_seconds();

        let m = &record.metrics;
        if let Some(tokens) = m.effective_tokens_total() {
            *self.tokens_total.get_or_insert(0) += tokens;
        }
        if let Some(cost) = m.cost_usd {
            *self.cost_usd.get_or_insert(0.0) += cost;
        }
        // Task progress is a snapshot, latest report wins
        if m.tasks_done.is_some() {
            self.tasks_done = m.tasks_done;
        }
        if m.tasks_total.is_some() {
            self.tasks_total = m.tasks_total;
        }
        if m.commit.is_some() {
            self.last_commit = m.commit.clone();
        }
    }

    /// Fraction of successful iterations, `None` with no iterations.
    pub fn success_rate(&self) -> Option<f64> {
        if self.iteration_count == 0 {
            None
        } else {
            Some(self.success_count as f64 / self.iteration_count as f64)
        }
    }
}

/// Stats kept current by reading only the appended tail.
pub struct TelemetryTail {
    reader: TelemetryReader,
    offset: u64,
    stats: IterationStats,
}

impl TelemetryTail {
    pub fn new(dir: ControlDirectory) -> Self {
        Self {
            reader: TelemetryReader::new(dir),
            offset: 0,
            stats: IterationStats::default(),
        }
    }

    /// Fold in newly appended records and return them.
    pub fn poll(&mut self) -> Result<Vec<IterationRecord>> {
        let batch = self.reader.read_from(self.offset)?;
        self.offset = batch.next_offset;
        for record in &batch.records {
            self.stats.add(record);
        }
        Ok(batch.records)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn stats(&self) -> &IterationStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::record::{IterationMetrics, IterationStatus, Phase};
    use chrono::{Duration, Utc};
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::TempDir;

    fn record(iteration: u64, status: IterationStatus, metrics: IterationMetrics) -> IterationRecord {
        let started_at = Utc::now();
        IterationRecord {
            iteration,
            phase: Phase::Committing,
            started_at,
            ended_at: started_at + Duration::seconds(10),
            status,
            instruction: None,
            metrics,
        }
    }

    #[test]
    fn test_empty_stats_are_unknown() {
        let stats = IterationStats::default();
        assert_eq!(stats.success_rate(), None);
        assert_eq!(stats.tokens_total, None);
        assert_eq!(stats.cost_usd, None);
    }

    #[test]
    fn test_aggregation() {
        let records = vec![
            record(
                1,
                IterationStatus::Success,
                IterationMetrics {
                    tokens_in: Some(100),
                    tokens_out: Some(50),
                    cost_usd: Some(0.5),
                    tasks_done: Some(1),
                    tasks_total: Some(4),
                    commit: Some("aaa111".to_string()),
                    ..Default::default()
                },
            ),
            record(2, IterationStatus::Failure, IterationMetrics::default()),
            record(
                3,
                IterationStatus::Success,
                IterationMetrics {
                    tokens_total: Some(200),
                    tasks_done: Some(2),
                    ..Default::default()
                },
            ),
        ];

        let stats = IterationStats::from_records(&records);
        assert_eq!(stats.iteration_count, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.last_iteration, Some(3));
        assert_eq!(stats.tokens_total, Some(350));
        assert_eq!(stats.cost_usd, Some(0.5));
        assert_eq!(stats.tasks_done, Some(2));
        assert_eq!(stats.tasks_total, Some(4));
        assert_eq!(stats.last_commit.as_deref(), Some("aaa111"));
        assert_eq!(stats.total_duration_seconds, 30.0);
        let rate = stats.success_rate().unwrap();
        assert!((rate - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tail_reads_only_new_records() {
        let temp = TempDir::new().unwrap();
        let dir = ControlDirectory::new(temp.path());
        let first = serde_json::to_string(&record(1, IterationStatus::Success, IterationMetrics::default())).unwrap();
        fs::write(dir.iterations_path(), format!("{}\n", first)).unwrap();

        let mut tail = TelemetryTail::new(dir.clone());
        assert_eq!(tail.poll().unwrap().len(), 1);
        assert!(tail.poll().unwrap().is_empty());

        let second = serde_json::to_string(&record(2, IterationStatus::Failure, IterationMetrics::default())).unwrap();
        let mut file = OpenOptions::new().append(true).open(dir.iterations_path()).unwrap();
        writeln!(file, "{}", second).unwrap();

        let new = tail.poll().unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].iteration, 2);
        assert_eq!(tail.stats().iteration_count, 2);
        assert_eq!(tail.stats().failure_count, 1);
        assert_eq!(tail.offset(), fs::metadata(dir.iterations_path()).unwrap().len());
    }
}
