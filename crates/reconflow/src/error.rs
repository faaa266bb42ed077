//! Error taxonomy for an orchestration run.
//!
//! These errors are not propagated past the component that raises them.
//! The orchestrator converts each one into a [`Diagnostic`] and keeps going,
//! so a single report at the end shows every failure of a long run.

use crate::outcome::{Diagnostic, FailureKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Wrong run granularity or invalid configuration. Fatal before any stage.
    #[error("{0}")]
    Validation(String),

    /// Enumerating or fetching scans failed. Fatal before any stage.
    #[error("{0}")]
    Selection(String),

    /// The external tool returned a non-zero exit code or could not be spawned.
    #[error("stage {stage} failed with exit code {exit_code}")]
    StageExecution { stage: String, exit_code: i32 },
}

impl OrchestrationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            OrchestrationError::Validation(_) => FailureKind::Validation,
            OrchestrationError::Selection(_) => FailureKind::Selection,
            OrchestrationError::StageExecution { .. } => FailureKind::StageExecution,
        }
    }
}

impl From<OrchestrationError> for Diagnostic {
    fn from(err: OrchestrationError) -> Self {
        Diagnostic::Failure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
