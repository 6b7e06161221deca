//! What one iteration actually does, behind the `IterationWork` seam.
//!
//! The runner only sequences phases and records outcomes. `CommandWork` is
//! the default: feed a prompt to an agent command, run the configured tests,
//! and note the resulting commit.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::loop_config::LoopConfig;
use crate::telemetry::{IterationMetrics, Phase};

/// Lines of command output copied into the narrative log
const OUTPUT_TAIL_LINES: usize = 20;

/// How a phase can go wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    /// Recorded on the iteration; the loop continues
    #[error("{0}")]
    Failed(String),
    /// Recorded, then the runner halts in FAILED
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type PhaseResult = std::result::Result<(), PhaseError>;

/// Mutable state threaded through the phases of one iteration.
#[derive(Debug, Clone, Default)]
pub struct IterationContext {
    pub iteration: u64,
    /// Injected instruction for this iteration's PLANNING phase
    pub instruction: Option<String>,
    /// Prompt assembled during PLANNING
    pub prompt: String,
    pub metrics: IterationMetrics,
    notes: Vec<String>,
}

impl IterationContext {
    pub fn new(iteration: u64, instruction: Option<String>) -> Self {
        Self {
            iteration,
            instruction,
            ..Default::default()
        }
    }

    /// Queue narrative text for the log.
    pub fn note(&mut self, text: impl Into<String>) {
        self.notes.push(text.into());
    }

    pub fn take_notes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notes)
    }
}

#[async_trait]
pub trait IterationWork: Send + Sync {
    async fn run_phase(&self, phase: Phase, ctx: &mut IterationContext) -> PhaseResult;
}

/// Default work driven by `LoopConfig`.
pub struct CommandWork {
    config: LoopConfig,
    project_root: PathBuf,
}

impl CommandWork {
    pub fn new(config: LoopConfig, project_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            project_root: project_root.into(),
        }
    }

    async fn plan(&self, ctx: &mut IterationContext) -> PhaseResult {
        let mut prompt = String::new();
        if let Some(file) = &self.config.prompt_file {
            let path = self.project_root.join(file);
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => prompt.push_str(text.trim_end()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Prompt file {} not found", path.display());
                }
                Err(e) => return Err(PhaseError::Failed(format!("cannot read {}: {}", path.display(), e))),
            }
        }

        if let Some(instruction) = &ctx.instruction {
            if !prompt.is_empty() {
                prompt.push_str("\n\n");
            }
            prompt.push_str("## Injected Instruction\n");
            prompt.push_str(instruction);
        }

        if prompt.trim().is_empty() {
            return Err(PhaseError::Failed("no prompt: prompt file missing and nothing injected".to_string()));
        }

        ctx.note(format!("Prompt assembled ({} bytes)", prompt.len()));
        ctx.prompt = prompt;
        Ok(())
    }

    async fn execute(&self, ctx: &mut IterationContext) -> PhaseResult {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.flags)
            .current_dir(&self.project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PhaseError::Fatal(format!("cannot invoke {}: {}", self.config.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // The command may exit without reading its input
            if let Err(e) = stdin.write_all(ctx.prompt.as_bytes()).await {
                debug!("Writing prompt to {} failed: {}", self.config.command, e);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PhaseError::Failed(format!("waiting for {}: {}", self.config.command, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let tail = tail_lines(&stdout, OUTPUT_TAIL_LINES);
        if !tail.is_empty() {
            ctx.note(tail);
        }

        if output.status.success() {
            info!("Iteration {} command finished", ctx.iteration);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PhaseError::Failed(format!(
                "{} exited with {}: {}",
                self.config.command,
                output.status,
                tail_lines(&stderr, 5)
            )))
        }
    }

    async fn test(&self, ctx: &mut IterationContext) -> PhaseResult {
        let Some(test_command) = &self.config.test_command else {
            ctx.note("No test command configured");
            return Ok(());
        };

        let output = Command::new("sh")
            .arg("-c")
            .arg(test_command)
            .current_dir(&self.project_root)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PhaseError::Fatal(format!("cannot invoke test command: {}", e)))?;

        if output.status.success() {
            ctx.metrics.tests = Some("passed".to_string());
            ctx.note(format!("Tests passed: {}", test_command));
            Ok(())
        } else {
            ctx.metrics.tests = Some(format!("failed ({})", output.status));
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            ctx.note(tail_lines(&format!("{}{}", stdout, stderr), OUTPUT_TAIL_LINES));
            Err(PhaseError::Failed(format!("test command failed with {}", output.status)))
        }
    }

    async fn commit(&self, ctx: &mut IterationContext) -> PhaseResult {
        let output = Command::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .current_dir(&self.project_root)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                let commit = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if !commit.is_empty() {
                    ctx.note(format!("HEAD at {}", commit));
                    ctx.metrics.commit = Some(commit);
                }
            }
            _ => debug!("No git commit to record"),
        }
        Ok(())
    }
}

#[async_trait]
impl IterationWork for CommandWork {
    async fn run_phase(&self, phase: Phase, ctx: &mut IterationContext) -> PhaseResult {
        match phase {
            Phase::Planning => self.plan(ctx).await,
            Phase::Executing => self.execute(ctx).await,
            Phase::Testing => self.test(ctx).await,
            Phase::Committing => self.commit(ctx).await,
        }
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
