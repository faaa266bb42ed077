use crate::catalog::{ProjectRef, ScanCatalog, SubjectRef};
use crate::config::RunConfig;
use crate::naming::make_file_name_safe;
use crate::outcome::RunOutcome;
use crate::prepare::WorkLayout;
use crate::selection::ScanRecord;
use crate::stage::StageResult;
use tracing::warn;

pub const UNKNOWN_PROJECT: &str = "unknown_project";
pub const UNKNOWN_SUBJECT: &str = "unknown_subject";

/// Everything one run accumulates. Passed by `&mut` to each step; there is
/// no other shared state.
pub struct RunContext<'a> {
    pub config: RunConfig,
    pub catalog: &'a dyn ScanCatalog,
    pub layout: WorkLayout,
    pub project_label_safe: String,
    pub subject_code: String,
    pub subject_code_safe: String,
    pub outcome: RunOutcome,
    /// Index-aligned with the cross-sectional and longitudinal stages.
    pub records: Vec<ScanRecord>,
    pub stages: Vec<StageResult>,
}

impl<'a> RunContext<'a> {
    /// Relative paths in `config` are resolved against the current
    /// directory before the layout is derived.
    pub fn new(mut config: RunConfig, catalog: &'a dyn ScanCatalog) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => config.anchor(&cwd),
            Err(e) => warn!(error = %e, "Current directory unknown; paths stay relative"),
        }
        let project_label_safe = match catalog.project() {
            Some(ProjectRef { label, .. }) => make_file_name_safe(label, "_"),
            None => {
                warn!("Project label is {}", UNKNOWN_PROJECT);
                UNKNOWN_PROJECT.to_string()
            }
        };
        let (subject_code, subject_code_safe) = match catalog.subject() {
            Some(SubjectRef { code, .. }) => (code.clone(), make_file_name_safe(code, "_")),
            None => {
                warn!("Subject code is {}", UNKNOWN_SUBJECT);
                (UNKNOWN_SUBJECT.to_string(), UNKNOWN_SUBJECT.to_string())
            }
        };

        Self {
            layout: WorkLayout::from_config(&config),
            config,
            catalog,
            project_label_safe,
            subject_code,
            subject_code_safe,
            outcome: RunOutcome::new(),
            records: Vec::new(),
            stages: Vec::new(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.run.dry_run
    }

    pub fn exit_codes(&self) -> Vec<i32> {
        self.stages.iter().map(|s| s.exit_code).collect()
    }
}
