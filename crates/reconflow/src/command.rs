//! Command lines for the four stage kinds.
//!
//! Every command is rendered once, at plan time, into the exact text a
//! shell runs. The identifiers passed in are reused verbatim across the
//! cross-sectional, template and longitudinal phases.

use crate::naming::{ScanId, TEMPLATE_ID};
use crate::options::PipelineOptions;
use crate::selection::ScanRecord;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Summary tables land here, relative to the subjects directory.
pub const TABLES_DIR: &str = "tables";

const HEMISPHERES: [&str; 2] = ["lh", "rh"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    CrossSectional,
    Template,
    Longitudinal,
    TableExport,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::CrossSectional => "cross-sectional",
            StageKind::Template => "template",
            StageKind::Longitudinal => "longitudinal",
            StageKind::TableExport => "table-export",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A processing phase. A run may be limited to a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    CrossSectional,
    Template,
    Longitudinal,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::CrossSectional, Step::Template, Step::Longitudinal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::CrossSectional => "cross-sectional",
            Step::Template => "template",
            Step::Longitudinal => "longitudinal",
        }
    }

    pub fn parse(name: &str) -> Option<Step> {
        Step::ALL.into_iter().find(|step| step.as_str() == name)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing directives accepted by the reconstruction tool.
pub const VALID_DIRECTIVES: &[&str] = &[
    "autorecon1",
    "autorecon2",
    "autorecon2-cp",
    "autorecon2-wm",
    "autorecon-pial",
    "autorecon3",
    "autorecon-all",
    "all",
];

pub const DEFAULT_DIRECTIVE: &str = "all";

/// One planned invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageCommand {
    pub kind: StageKind,
    /// Unique stage name, e.g. `longitudinal sub_01-visit_1`.
    pub name: String,
    /// Directory under the subjects directory that holds this stage's
    /// status artifact. `None` when the stage writes none.
    pub status_dir: Option<String>,
    pub text: String,
}

/// Builds stage commands for one run.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: String,
    subjects_dir: PathBuf,
    options: PipelineOptions,
    steps: Vec<Step>,
    directives: Vec<String>,
}

impl CommandBuilder {
    pub fn new(program: impl Into<String>, subjects_dir: &Path, options: PipelineOptions) -> Self {
        Self {
            program: program.into(),
            subjects_dir: subjects_dir.to_path_buf(),
            options,
            steps: Step::ALL.to_vec(),
            directives: vec![DEFAULT_DIRECTIVE.to_string()],
        }
    }

    /// Limit [`plan`](Self::plan) to these phases.
    pub fn with_steps(mut self, steps: &[Step]) -> Self {
        self.steps = steps.to_vec();
        self
    }

    /// Replace the `-all` directive. An empty list keeps the default.
    pub fn with_directives(mut self, directives: &[String]) -> Self {
        if !directives.is_empty() {
            self.directives = directives.to_vec();
        }
        self
    }

    fn directive_args(&self) -> impl Iterator<Item = String> + '_ {
        self.directives.iter().map(|d| format!("-{}", d))
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    pub fn cross_sectional(&self, record: &ScanRecord) -> StageCommand {
        let mut args = vec![
            "-sd".to_string(),
            self.subjects_dir.display().to_string(),
            "-s".to_string(),
            record.stable_id.to_string(),
            "-i".to_string(),
            record.local_path.display().to_string(),
        ];
        args.extend(self.directive_args());
        args.push("-qcache".to_string());
        args.extend(self.options.to_args());

        StageCommand {
            kind: StageKind::CrossSectional,
            name: format!("{} {}", StageKind::CrossSectional, record.stable_id),
            status_dir: Some(record.stable_id.to_string()),
            text: self.render(&args),
        }
    }

    /// One template over every time point, in selection order.
    pub fn template(&self, ids: &[ScanId]) -> StageCommand {
        let mut args = vec!["-base".to_string(), TEMPLATE_ID.to_string()];
        for id in ids {
            args.push("-tp".to_string());
            args.push(id.to_string());
        }
        args.extend(self.directive_args());
        args.extend(self.options.to_args());

        StageCommand {
            kind: StageKind::Template,
            name: format!("{} {}", StageKind::Template, TEMPLATE_ID),
            status_dir: Some(TEMPLATE_ID.to_string()),
            text: self.render(&args),
        }
    }

    pub fn longitudinal(&self, id: &ScanId) -> StageCommand {
        let mut args = vec![
            "-long".to_string(),
            id.to_string(),
            TEMPLATE_ID.to_string(),
        ];
        args.extend(self.directive_args());
        args.push("-qcache".to_string());
        args.extend(self.options.to_args());

        StageCommand {
            kind: StageKind::Longitudinal,
            name: format!("{} {}", StageKind::Longitudinal, id),
            status_dir: Some(id.longitudinal_dir()),
            text: self.render(&args),
        }
    }

    /// Volume table over the longitudinal runs, then one surface table per
    /// hemisphere, parcellation and measurement.
    pub fn table_export(
        &self,
        ids: &[ScanId],
        parcellations: &[String],
        measurements: &[String],
    ) -> StageCommand {
        let subjects: Vec<String> = ids.iter().map(|id| shell_quote(&id.longitudinal_dir())).collect();
        let subjects = subjects.join(" ");

        let mut steps = vec![
            format!("mkdir -p {}", TABLES_DIR),
            format!(
                "asegstats2table --subjects {} --meas volume --tablefile {}/aseg_stats_vol.csv",
                subjects, TABLES_DIR
            ),
        ];
        for hemi in HEMISPHERES {
            for parc in parcellations {
                for meas in measurements {
                    steps.push(format!(
                        "aparcstats2table --hemi {hemi} --subjects {subjects} --parc {parc} \
                         --meas {meas} --tablefile {dir}/{hemi}_{parc}_stats_{meas}.csv",
                        hemi = hemi,
                        subjects = subjects,
                        parc = shell_quote(parc),
                        meas = shell_quote(meas),
                        dir = TABLES_DIR,
                    ));
                }
            }
        }

        StageCommand {
            kind: StageKind::TableExport,
            name: StageKind::TableExport.to_string(),
            status_dir: None,
            text: steps.join(" && "),
        }
    }

    /// Every stage of a run, in execution order:
    /// N cross-sectional, one template, N longitudinal, one table export.
    /// Phases left out of the configured steps are skipped; the table export
    /// reads the longitudinal runs and goes with them.
    pub fn plan(
        &self,
        records: &[ScanRecord],
        parcellations: &[String],
        measurements: &[String],
    ) -> Vec<StageCommand> {
        let ids: Vec<ScanId> = records.iter().map(|r| r.stable_id.clone()).collect();

        let mut stages = Vec::with_capacity(records.len() * 2 + 2);
        if self.steps.contains(&Step::CrossSectional) {
            stages.extend(records.iter().map(|r| self.cross_sectional(r)));
        }
        if self.steps.contains(&Step::Template) {
            stages.push(self.template(&ids));
        }
        if self.steps.contains(&Step::Longitudinal) {
            stages.extend(ids.iter().map(|id| self.longitudinal(id)));
            stages.push(self.table_export(&ids, parcellations, measurements));
        }
        stages
    }

    fn render(&self, args: &[String]) -> String {
        let mut parts = Vec::with_capacity(args.len() + 1);
        parts.push(shell_quote(&self.program));
        parts.extend(args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }
}

/// Quote a word for `sh` only when it needs it.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
