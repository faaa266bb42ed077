//! Run configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file is a
//! valid configuration.
//!
//! ```toml
//! analysis_id = "6123abcd"
//! output_dir = "output"
//!
//! [pipeline]
//! threads = 4
//! three_t = false
//! measurement_tags = ["T1"]
//! parcellations = ["aparc", "aparc.a2009s"]
//! measurements = ["thickness", "volume"]
//! steps = ["cross-sectional", "template", "longitudinal"]
//! stages = ["all"]
//!
//! [run]
//! dry_run = false
//! keep_output = false
//! zip_output = true
//!
//! [filters]
//! session_exclude = "pilot phantom"
//! ```

use crate::command::{Step, DEFAULT_DIRECTIVE, VALID_DIRECTIVES};
use crate::filter::{IncludeMode, RuleFragment};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const VALID_PARCELLATIONS: &[&str] = &["aparc", "aparc.a2009s"];
pub const VALID_MEASUREMENTS: &[&str] = &[
    "area",
    "volume",
    "thickness",
    "thicknessstd",
    "meancurv",
    "gauscurv",
    "foldind",
    "curvind",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Identifier of this analysis; names the working tree and the archive.
    pub analysis_id: String,
    pub output_dir: PathBuf,
    /// Where selected scans are downloaded.
    pub input_dir: PathBuf,
    /// Prefix of the result archive name.
    pub gear_name: String,
    pub pipeline: PipelineSection,
    pub run: RunSection,
    pub filters: RuleFragment,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            analysis_id: uuid::Uuid::new_v4().simple().to_string(),
            output_dir: PathBuf::from("output"),
            input_dir: PathBuf::from("input"),
            gear_name: "reconflow".to_string(),
            pipeline: PipelineSection::default(),
            run: RunSection::default(),
            filters: RuleFragment::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Reconstruction tool, invoked by name.
    pub command: String,
    pub threads: u32,
    /// Statically request high-field processing.
    pub three_t: bool,
    /// A file qualifies when its Measurement classification holds one of these.
    pub measurement_tags: Vec<String>,
    /// Expected file type of a volumetric image.
    pub file_type: String,
    pub include_mode: IncludeMode,
    pub parcellations: Vec<String>,
    pub measurements: Vec<String>,
    /// Phases to run, by name.
    pub steps: Vec<String>,
    /// Processing directives passed in place of `-all`.
    #[serde(alias = "stages")]
    pub directives: Vec<String>,
    pub freesurfer_home: PathBuf,
    /// JSON object of extra environment variables for the tool.
    pub environment_file: Option<PathBuf>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            command: "recon-all".to_string(),
            threads: 1,
            three_t: false,
            measurement_tags: vec!["T1".to_string()],
            file_type: "nifti".to_string(),
            include_mode: IncludeMode::All,
            parcellations: vec!["aparc".to_string()],
            measurements: vec!["thickness".to_string()],
            steps: Step::ALL.iter().map(|step| step.as_str().to_string()).collect(),
            directives: vec![DEFAULT_DIRECTIVE.to_string()],
            freesurfer_home: PathBuf::from("/opt/freesurfer"),
            environment_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Log the commands instead of running them.
    pub dry_run: bool,
    /// Exit code recorded for every skipped stage in a dry run.
    pub dry_run_exit_code: i32,
    /// Keep per-scan working directories after the run.
    pub keep_output: bool,
    /// Archive the working tree and remove it afterwards.
    pub zip_output: bool,
    /// License text, whitespace separated.
    pub license: Option<String>,
    /// License file supplied as an input.
    pub license_file: Option<PathBuf>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            dry_run: false,
            dry_run_exit_code: 0,
            keep_output: false,
            zip_output: false,
            license: None,
            license_file: None,
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Every problem with the configuration, one message each.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.pipeline.threads == 0 {
            problems.push("threads must be at least 1".to_string());
        }
        if self.pipeline.command.trim().is_empty() {
            problems.push("pipeline command must not be empty".to_string());
        }
        if self.pipeline.measurement_tags.is_empty() {
            problems.push("at least one measurement tag is required".to_string());
        }
        for parc in &self.pipeline.parcellations {
            if !VALID_PARCELLATIONS.contains(&parc.as_str()) {
                problems.push(format!("Invalid parc \"{}\"", parc));
            }
        }
        for measure in &self.pipeline.measurements {
            if !VALID_MEASUREMENTS.contains(&measure.as_str()) {
                problems.push(format!("Invalid measure \"{}\"", measure));
            }
        }
        if self.pipeline.steps.is_empty() {
            problems.push("at least one step is required".to_string());
        }
        for step in &self.pipeline.steps {
            if Step::parse(step).is_none() {
                problems.push(format!("Invalid step \"{}\"", step));
            }
        }
        for directive in &self.pipeline.directives {
            if !VALID_DIRECTIVES.contains(&directive.as_str()) {
                problems.push(format!("Invalid stage \"{}\"", directive));
            }
        }
        if self.analysis_id.trim().is_empty() {
            problems.push("analysis_id must not be empty".to_string());
        }

        problems
    }

    /// Resolve every relative path against `base`. Stage commands run
    /// inside the subjects directory, so paths handed to them must not
    /// depend on the working directory.
    pub fn anchor(&mut self, base: &Path) {
        for path in [
            &mut self.output_dir,
            &mut self.input_dir,
            &mut self.pipeline.freesurfer_home,
        ] {
            anchor_path(path, base);
        }
        let optional = [
            self.pipeline.environment_file.as_mut(),
            self.run.license_file.as_mut(),
        ];
        for path in optional.into_iter().flatten() {
            anchor_path(path, base);
        }
    }

    /// `<output_dir>/<analysis_id>`: the tree that gets archived.
    pub fn analysis_dir(&self) -> PathBuf {
        self.output_dir.join(&self.analysis_id)
    }

    /// Configured phases in execution order. Unknown names are dropped;
    /// [`validate`](Self::validate) reports them.
    pub fn steps(&self) -> Vec<Step> {
        Step::ALL
            .into_iter()
            .filter(|step| self.pipeline.steps.iter().any(|name| name == step.as_str()))
            .collect()
    }
}

fn anchor_path(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}
