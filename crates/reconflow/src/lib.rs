//! Reconflow: longitudinal reconstruction for one subject.
//!
//! Scans are selected from the subject's catalog through layered
//! include/exclude rules, given stable identifiers, and run through three
//! dependent phases of the reconstruction tool (cross-sectional, template,
//! longitudinal) followed by a table export. Failures are collected into a
//! [`RunOutcome`] and turned into a single verdict at the end.

pub mod catalog;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod filter;
pub mod license;
pub mod naming;
pub mod options;
pub mod orchestrator;
pub mod outcome;
pub mod prepare;
pub mod retention;
pub mod selection;
pub mod stage;
pub mod status;

pub use catalog::{ManifestCatalog, ScanCatalog};
pub use config::RunConfig;
pub use error::OrchestrationError;
pub use orchestrator::{Orchestrator, PlanReport, RunReport};
pub use outcome::{aggregate, Diagnostic, FailureKind, RunOutcome, Verdict};
pub use selection::ScanRecord;
