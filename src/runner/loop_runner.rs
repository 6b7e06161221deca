//! Loop runner - drives iterations one at a time against a Control Directory.
//!
//! Signals are only observed at iteration boundaries. Every started
//! iteration produces exactly one telemetry record, success or failure,
//! before the runner looks at signals again or halts.

use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info, warn};

use super::state::RunnerState;
use super::work::{IterationContext, IterationWork, PhaseError};
use crate::control::{BoundarySignal, ControlDirectory, ControlSignals, NotificationFlag, StopHandle};
use crate::error::{RalphError, Result};
use crate::liveness::LivenessManager;
use crate::loop_config::LoopConfig;
use crate::telemetry::{IterationRecord, IterationStatus, Phase, TelemetryWriter};

/// Why the runner stopped cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxIterations,
    Requested,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Stopped { reason: StopReason, iterations: u64 },
    Failed { iteration: u64, reason: String },
}

pub struct LoopRunner<W: IterationWork> {
    config: LoopConfig,
    work: W,
    signals: ControlSignals,
    telemetry: TelemetryWriter,
    liveness: LivenessManager,
    notifications: NotificationFlag,
    state: RunnerState,
    next_iteration: u64,
    completed: u64,
}

impl<W: IterationWork> LoopRunner<W> {
    /// Prepare a runner without modifying the control directory.
    ///
    /// Numbering resumes after the last recorded iteration; it is read again
    /// once `run` owns the liveness record.
    pub fn new(dir: ControlDirectory, config: LoopConfig, work: W, stop: StopHandle) -> Result<Self> {
        let telemetry = TelemetryWriter::open(dir.clone(), config.telemetry_retries);
        let last = telemetry.last_iteration()?;

        Ok(Self {
            signals: ControlSignals::new(dir.clone(), stop),
            liveness: LivenessManager::new(dir.clone()),
            notifications: NotificationFlag::new(dir),
            config,
            work,
            telemetry,
            state: RunnerState::Init,
            next_iteration: last + 1,
            completed: 0,
        })
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn next_iteration(&self) -> u64 {
        self.next_iteration
    }

    /// Publish liveness, loop until halted, then release liveness.
    ///
    /// The telemetry log is only repaired after the liveness record is ours, so
    /// a refused runner never touches a live runner's files.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        self.liveness.publish()?;

        let outcome = match self.take_ownership() {
            Ok(()) => {
                info!("Runner started, next iteration {}", self.next_iteration);
                self.drive().await
            }
            Err(e) => Err(e),
        };

        let message = match &outcome {
            Ok(RunOutcome::Stopped { reason, iterations }) => {
                format!("Ralph loop stopped ({:?}) after {} iterations this run", reason, iterations)
            }
            Ok(RunOutcome::Failed { iteration, reason }) => {
                format!("Ralph loop failed at iteration {}: {}", iteration, reason)
            }
            Err(e) => format!("Ralph loop failed: {}", e),
        };
        self.telemetry.narrate(&message);
        if let Err(e) = self.notifications.raise(&message) {
            warn!("Failed to raise notification: {}", e);
        }
        if let Err(e) = self.liveness.release() {
            warn!("Failed to release pid record: {}", e);
        }

        outcome
    }

    fn take_ownership(&mut self) -> Result<()> {
        let last = match self
            .telemetry
            .repair_tail()
            .and_then(|()| self.telemetry.last_iteration())
        {
            Ok(last) => last,
            Err(e) => {
                error!("Telemetry log unusable, halting: {}", e);
                self.state.transition(RunnerState::Failed)?;
                return Err(RalphError::Telemetry(format!("cannot prepare telemetry log: {}", e)));
            }
        };
        if last > 0 {
            info!("Resuming after iteration {}", last);
        }
        self.next_iteration = last + 1;
        Ok(())
    }

    async fn drive(&mut self) -> Result<RunOutcome> {
        loop {
            if self.config.is_exhausted(self.next_iteration - 1) {
                info!("Reached max_iterations {:?}", self.config.max_iterations);
                return self.stop(StopReason::MaxIterations);
            }

            match self.signals.poll() {
                BoundarySignal::Paused => {
                    if self.signals.stop_requested() {
                        return self.stop(StopReason::Requested);
                    }
                    if self.state != RunnerState::Paused {
                        self.state.transition(RunnerState::Paused)?;
                        info!("Paused before iteration {}", self.next_iteration);
                        self.telemetry.narrate("Paused: waiting for pause marker removal");
                    }
                    tokio::time::sleep(Duration::from_millis(self.config.pause_poll_ms)).await;
                }
                BoundarySignal::Stop => return self.stop(StopReason::Requested),
                BoundarySignal::Continue { instruction } => {
                    if self.state == RunnerState::Paused {
                        info!("Resumed");
                        self.telemetry.narrate("Resumed");
                    }

                    let (record, fatal) = self.run_iteration(instruction).await?;

                    if let Err(e) = self.telemetry.append(&record).await {
                        error!("Telemetry write failed, halting: {}", e);
                        self.state.transition(RunnerState::Failed)?;
                        return Err(e);
                    }
                    self.telemetry.narrate_footer(&record);
                    self.next_iteration += 1;
                    self.completed += 1;

                    let fatal = fatal.or_else(|| {
                        (self.config.fatal_on_failure && !record.is_success())
                            .then(|| "iteration failed and fatal_on_failure is set".to_string())
                    });
                    if let Some(reason) = fatal {
                        error!("Iteration {} hit a fatal condition: {}", record.iteration, reason);
                        self.state.transition(RunnerState::Failed)?;
                        return Ok(RunOutcome::Failed {
                            iteration: record.iteration,
                            reason,
                        });
                    }
                }
            }
        }
    }

    fn stop(&mut self, reason: StopReason) -> Result<RunOutcome> {
        self.state.transition(RunnerState::Stopped)?;
        info!("Stopped ({:?}) after {} iterations this run", reason, self.completed);
        Ok(RunOutcome::Stopped {
            reason,
            iterations: self.completed,
        })
    }

    /// Run all phases of one iteration; a failing phase ends it early.
    ///
    /// Returns the record to append and the reason if the failure was fatal.
    async fn run_iteration(&mut self, instruction: Option<String>) -> Result<(IterationRecord, Option<String>)> {
        let iteration = self.next_iteration;
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut ctx = IterationContext::new(iteration, instruction.clone());

        self.telemetry.narrate_header(iteration, Phase::Planning, started_at);
        if let Some(text) = &instruction {
            self.telemetry.narrate(&format!("Injected instruction: {}", text));
        }

        let mut reached = Phase::Planning;
        let mut status = IterationStatus::Success;
        let mut fatal = None;

        for phase in Phase::ALL {
            self.state.transition(phase.into())?;
            if phase != Phase::Planning {
                self.telemetry.narrate_phase(phase);
            }
            reached = phase;

            let result = self.work.run_phase(phase, &mut ctx).await;
            for note in ctx.take_notes() {
                self.telemetry.narrate(&note);
            }

            match result {
                Ok(()) => {}
                Err(PhaseError::Failed(msg)) => {
                    warn!("Iteration {} failed in {}: {}", iteration, phase, msg);
                    self.telemetry.narrate(&format!("{} failed: {}", phase, msg));
                    ctx.metrics.push_error(format!("{}: {}", phase, msg));
                    status = IterationStatus::Failure;
                    break;
                }
                Err(PhaseError::Fatal(msg)) => {
                    error!("Iteration {} fatal in {}: {}", iteration, phase, msg);
                    self.telemetry.narrate(&format!("{} fatal: {}", phase, msg));
                    ctx.metrics.push_error(format!("{}: {}", phase, msg));
                    status = IterationStatus::Failure;
                    fatal = Some(msg);
                    break;
                }
            }
        }

        let ended_at = Utc::now().max(started_at);
        if ctx.metrics.duration_seconds.is_none() {
            ctx.metrics.duration_seconds = Some(clock.elapsed().as_secs_f64());
        }

        let record = IterationRecord {
            iteration,
            phase: reached,
            started_at,
            ended_at,
            status,
            instruction,
            metrics: ctx.metrics,
        };
        Ok((record, fatal))
    }
}
