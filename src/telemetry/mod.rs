//! Telemetry: the append-only `iterations.jsonl` log and the narrative `ralph.log`.

pub mod reader;
pub mod record;
pub mod stats;
pub mod writer;

pub use reader::{JsonlReport, TailBatch, TelemetryReader};
pub use record::{IterationMetrics, IterationRecord, IterationStatus, Phase};
pub use stats::{IterationStats, TelemetryTail};
pub use writer::TelemetryWriter;
