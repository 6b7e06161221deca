//! One line of `iterations.jsonl`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Phases of one iteration, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Planning,
    Executing,
    Testing,
    Committing,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Planning, Phase::Executing, Phase::Testing, Phase::Committing];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "PLANNING",
            Phase::Executing => "EXECUTING",
            Phase::Testing => "TESTING",
            Phase::Committing => "COMMITTING",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationStatus {
    Success,
    Failure,
}

/// Optional per-iteration counters. `None` means unknown, never zero.
///
/// Producers do not agree on the shape of these fields, so a value of an
/// unexpected type reads as unknown rather than rejecting the whole record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationMetrics {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<u64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<u64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub tokens_total: Option<u64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub tasks_done: Option<u32>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub tasks_total: Option<u32>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub tests: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl IterationMetrics {
    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.get_or_insert_with(Vec::new).push(error.into());
    }

    /// Tokens in + out when the total was not reported directly.
    pub fn effective_tokens_total(&self) -> Option<u64> {
        self.tokens_total.or(match (self.tokens_in, self.tokens_out) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        })
    }
}

/// A completed iteration. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u64,
    /// Last phase reached
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: IterationStatus,
    /// Injected instruction delivered to this iteration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(flatten)]
    pub metrics: IterationMetrics,
}

impl IterationRecord {
    pub fn is_success(&self) -> bool {
        self.status == IterationStatus::Success
    }

    pub fn duration_seconds(&self) -> f64 {
        self.metrics.duration_seconds.unwrap_or_else(|| {
            (self.ended_at - self.started_at).num_milliseconds() as f64 / 1000.0
        })
    }
}

/// Example record carrying only the required fields.
pub fn minimum_record_example() -> IterationRecord {
    let started_at = DateTime::parse_from_rfc3339("2026-02-15T20:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default();
    let ended_at = DateTime::parse_from_rfc3339("2026-02-15T20:05:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default();
    IterationRecord {
        iteration: 1,
        phase: Phase::Planning,
        started_at,
        ended_at,
        status: IterationStatus::Success,
        instruction: None,
        metrics: IterationMetrics::default(),
    }
}

/// Optional fields a record should carry when known.
pub const RECOMMENDED_FIELDS: [&str; 10] = [
    "duration_seconds",
    "tokens_in",
    "tokens_out",
    "tokens_total",
    "cost_usd",
    "tasks_done",
    "tasks_total",
    "commit",
    "tests",
    "errors",
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimum_record_serializes_required_fields_only() {
        let value = serde_json::to_value(minimum_record_example()).unwrap();
        assert_eq!(
            value,
            json!({
                "iteration": 1,
                "phase": "PLANNING",
                "started_at": "2026-02-15T20:00:00Z",
                "ended_at": "2026-02-15T20:05:00Z",
                "status": "success"
            })
        );
    }

    #[test]
    fn test_parse_record_with_recommended_fields() {
        let line = r#"{"iteration":4,"phase":"COMMITTING","started_at":"2026-02-15T20:00:00Z","ended_at":"2026-02-15T20:01:30Z","status":"failure","tokens_in":1200,"tokens_out":300,"cost_usd":0.42,"tasks_done":3,"tasks_total":7,"commit":"abc1234","tests":"failed","errors":["2 tests failed"]}"#;
        let record: IterationRecord = serde_json::from_str(line).unwrap();

        assert_eq!(record.iteration, 4);
        assert_eq!(record.phase, Phase::Committing);
        assert!(!record.is_success());
        assert_eq!(record.metrics.effective_tokens_total(), Some(1500));
        assert_eq!(record.metrics.tasks_done, Some(3));
        assert_eq!(record.metrics.errors, Some(vec!["2 tests failed".to_string()]));
        assert_eq!(record.duration_seconds(), 90.0);
    }

    #[test]
    fn test_missing_optional_fields_are_unknown() {
        let line = r#"{"iteration":1,"phase":"EXECUTING","started_at":"2026-02-15T20:00:00Z","ended_at":"2026-02-15T20:00:00Z","status":"success"}"#;
        let record: IterationRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.metrics, IterationMetrics::default());
        assert_eq!(record.metrics.effective_tokens_total(), None);
        assert_eq!(record.metrics.cost_usd, None);
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let line = r#"{"iteration":2,"phase":"TESTING","started_at":"2026-02-15T20:00:00Z","ended_at":"2026-02-15T20:00:01Z","status":"success","model":"opus"}"#;
        let record: IterationRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.phase, Phase::Testing);
    }

    #[test]
    fn test_mistyped_optional_fields_are_unknown() {
        let line = r#"{"iteration":2,"phase":"TESTING","started_at":"2026-02-15T20:00:00Z","ended_at":"2026-02-15T20:00:01Z","status":"failure","tests":{"passed":10,"failed":0},"errors":0,"tokens_in":1200.5,"tokens_out":300,"commit":null}"#;
        let record: IterationRecord = serde_json::from_str(line).unwrap();

        assert_eq!(record.iteration, 2);
        assert_eq!(record.metrics.tests, None);
        assert_eq!(record.metrics.errors, None);
        assert_eq!(record.metrics.tokens_in, None);
        assert_eq!(record.metrics.tokens_out, Some(300));
        assert_eq!(record.metrics.commit, None);
    }

    #[test]
    fn test_push_error_creates_list() {
        let mut metrics = IterationMetrics::default();
        metrics.push_error("first");
        metrics.push_error("second");
        assert_eq!(metrics.errors.unwrap().len(), 2);
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(Phase::ALL[0], Phase::Planning);
        assert_eq!(Phase::ALL[3], Phase::Committing);
        assert_eq!(Phase::Testing.to_string(), "TESTING");
    }
}
