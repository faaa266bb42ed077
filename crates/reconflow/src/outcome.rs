//! Diagnostics accumulated over a run and the final pass/fail verdict.

use serde::Serialize;
use std::fmt;

/// Category of a captured failure, rendered as its type name in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Selection,
    StageExecution,
    PostProcessing,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "ValidationError",
            FailureKind::Selection => "SelectionError",
            FailureKind::StageExecution => "StageExecutionError",
            FailureKind::PostProcessing => "PostProcessingWarning",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the error or warning list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Free-form text.
    Message { text: String },
    /// A failure captured from a component, with its category.
    Failure { kind: FailureKind, message: String },
}

impl Diagnostic {
    pub fn message(text: impl Into<String>) -> Self {
        Diagnostic::Message { text: text.into() }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Diagnostic::Failure {
            kind,
            message: message.into(),
        }
    }
}

impl From<&str> for Diagnostic {
    fn from(text: &str) -> Self {
        Diagnostic::message(text)
    }
}

impl From<String> for Diagnostic {
    fn from(text: String) -> Self {
        Diagnostic::Message { text }
    }
}

/// Errors and warnings collected across the whole run, in order of origin.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOutcome {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub return_code: i32,
}

impl RunOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, diagnostic: impl Into<Diagnostic>) {
        self.errors.push(diagnostic.into());
    }

    pub fn warn(&mut self, diagnostic: impl Into<Diagnostic>) {
        self.warnings.push(diagnostic.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Render warnings then errors as one block, the way they appear at the
    /// end of the log. Empty lists produce no section.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.warnings.is_empty() {
            out.push_str("Previous warnings:\n");
            for warning in &self.warnings {
                out.push_str(&render_line(warning, "Warning"));
            }
        }
        if !self.errors.is_empty() {
            out.push_str("Previous errors:\n");
            for error in &self.errors {
                out.push_str(&render_line(error, "Error msg"));
            }
        }
        out
    }
}

fn render_line(diagnostic: &Diagnostic, text_prefix: &str) -> String {
    match diagnostic {
        Diagnostic::Message { text } => format!("  {}: {}\n", text_prefix, text),
        Diagnostic::Failure { kind, message } => format!("  {}: {}\n", kind, message),
    }
}

/// Final decision for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub success: bool,
    pub return_code: i32,
}

/// Combine every recorded stage exit code with the diagnostics so far.
///
/// Any recorded error forces a return code of 1 regardless of the stage codes;
/// warnings never do.
pub fn aggregate(exit_codes: &[i32], outcome: &RunOutcome) -> Verdict {
    let all_zero = exit_codes.iter().all(|code| *code == 0);
    if all_zero && !outcome.has_errors() {
        Verdict {
            success: true,
            return_code: 0,
        }
    } else {
        Verdict {
            success: false,
            return_code: 1,
        }
    }
}
