//! Sequential stage execution.
//!
//! A failed stage is recorded and the next stage still runs; only the final
//! aggregation decides the verdict.

use crate::command::{StageCommand, StageKind};
use crate::error::OrchestrationError;
use crate::exec::StageExecutor;
use crate::outcome::{Diagnostic, FailureKind, RunOutcome};
use crate::status::{StageStatus, StatusTracker};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Exit code recorded when the process could not be started at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Dry run: the command was logged, not executed.
    Skipped,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageState::Pending => "pending",
            StageState::Running => "running",
            StageState::Succeeded => "succeeded",
            StageState::Failed => "failed",
            StageState::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// One executed (or skipped) stage. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    pub stage_name: String,
    pub kind: StageKind,
    pub command_text: String,
    pub exit_code: i32,
    pub state: StageState,
    pub status: StageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Live,
    /// Record `exit_code` for every stage without running anything.
    DryRun { exit_code: i32 },
}

impl RunMode {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, RunMode::DryRun { .. })
    }
}

pub struct StageRunner<'a> {
    mode: RunMode,
    executor: &'a mut dyn StageExecutor,
    tracker: &'a mut StatusTracker,
    subjects_dir: PathBuf,
}

impl<'a> StageRunner<'a> {
    pub fn new(
        mode: RunMode,
        executor: &'a mut dyn StageExecutor,
        tracker: &'a mut StatusTracker,
        subjects_dir: &Path,
    ) -> Self {
        Self {
            mode,
            executor,
            tracker,
            subjects_dir: subjects_dir.to_path_buf(),
        }
    }

    /// Run every stage in order, appending one result per stage.
    pub fn run_all(&mut self, stages: &[StageCommand], outcome: &mut RunOutcome) -> Vec<StageResult> {
        let mut results = Vec::with_capacity(stages.len());
        for (index, stage) in stages.iter().enumerate() {
            info!(
                stage = %stage.name,
                position = index + 1,
                total = stages.len(),
                "Starting stage"
            );
            results.push(self.run(stage, outcome));
        }
        results
    }

    pub fn run(&mut self, stage: &StageCommand, outcome: &mut RunOutcome) -> StageResult {
        let mut state = StageState::Pending;
        debug!(stage = %stage.name, %state, "Stage queued");

        if let RunMode::DryRun { exit_code } = self.mode {
            info!("Not running: {}", stage.text);
            if exit_code != 0 {
                outcome.warn(Diagnostic::failure(
                    FailureKind::PostProcessing,
                    format!("dry run recorded exit code {} for {}", exit_code, stage.name),
                ));
            }
            return StageResult {
                stage_name: stage.name.clone(),
                kind: stage.kind,
                command_text: stage.text.clone(),
                exit_code,
                state: StageState::Skipped,
                status: StageStatus::Unavailable,
            };
        }

        state = StageState::Running;
        debug!(stage = %stage.name, %state, command = %stage.text, "Stage running");

        let mut line_count = 0usize;
        let mut started = true;
        let exit_code = match self.executor.execute(&stage.text, &mut |_: &str| line_count += 1) {
            Ok(result) => {
                if result.exit_code != 0 {
                    error!(
                        stage = %stage.name,
                        exit_code = result.exit_code,
                        "Stage failed; last output:\n{}",
                        result.tail.join("\n")
                    );
                }
                result.exit_code
            }
            Err(e) => {
                error!(stage = %stage.name, error = %e, "Stage could not be started");
                outcome.error(Diagnostic::failure(FailureKind::StageExecution, e.to_string()));
                started = false;
                SPAWN_FAILURE_EXIT_CODE
            }
        };

        state = if exit_code == 0 {
            StageState::Succeeded
        } else {
            StageState::Failed
        };
        if state == StageState::Failed && started {
            outcome.error(OrchestrationError::StageExecution {
                stage: stage.name.clone(),
                exit_code,
            });
        }
        info!(stage = %stage.name, exit_code, lines = line_count, %state, "Stage finished");

        let status = self
            .tracker
            .observe(&self.subjects_dir, &stage.name, stage.status_dir.as_deref());
        if stage.status_dir.is_some() && !status.is_available() {
            outcome.warn(Diagnostic::failure(
                FailureKind::PostProcessing,
                format!("no status artifact for {}", stage.name),
            ));
        }

        StageResult {
            stage_name: stage.name.clone(),
            kind: stage.kind,
            command_text: stage.text.clone(),
            exit_code,
            state,
            status,
        }
    }
}
