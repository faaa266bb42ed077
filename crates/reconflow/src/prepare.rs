//! Working tree and child environment for a live run.

use crate::config::RunConfig;
use crate::command::TABLES_DIR;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Reference subjects linked into every working tree.
pub const AVERAGE_SUBJECTS: [&str; 3] = ["fsaverage", "lh.EC_average", "rh.EC_average"];

pub const SUBJECTS_DIR_VAR: &str = "SUBJECTS_DIR";
pub const FREESURFER_HOME_VAR: &str = "FREESURFER_HOME";

/// Directory layout of one run.
///
/// ```text
/// <output_dir>/
///   <analysis_id>/          archived when zip_output is set
///     subjects/             SUBJECTS_DIR for every stage
///       <scan id>/ BASE/ <scan id>.long.BASE/
///       tables/             summary tables
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkLayout {
    pub output_dir: PathBuf,
    pub analysis_dir: PathBuf,
    pub subjects_dir: PathBuf,
    pub input_dir: PathBuf,
}

impl WorkLayout {
    pub fn from_config(config: &RunConfig) -> Self {
        let analysis_dir = config.analysis_dir();
        Self {
            output_dir: config.output_dir.clone(),
            subjects_dir: analysis_dir.join("subjects"),
            analysis_dir,
            input_dir: config.input_dir.clone(),
        }
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.subjects_dir.join(TABLES_DIR)
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.subjects_dir)
            .with_context(|| format!("Failed to create {}", self.subjects_dir.display()))
    }
}

/// Link the reference subjects from `<freesurfer_home>/subjects`. Existing
/// entries are left alone.
pub fn link_averages(freesurfer_home: &Path, subjects_dir: &Path) -> Result<Vec<PathBuf>> {
    let source_root = freesurfer_home.join("subjects");
    let mut created = Vec::new();
    for name in AVERAGE_SUBJECTS {
        let target = source_root.join(name);
        let link = subjects_dir.join(name);
        if link.symlink_metadata().is_ok() {
            info!(link = %link.display(), "Link exists");
            continue;
        }
        info!(target = %target.display(), link = %link.display(), "Linking");
        symlink_dir(&target, &link)
            .with_context(|| format!("Failed to link {} -> {}", link.display(), target.display()))?;
        created.push(link);
    }
    Ok(created)
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

/// Variables handed to every stage: the optional environment file first,
/// then `FREESURFER_HOME` and `SUBJECTS_DIR`.
pub fn child_environment(config: &RunConfig, layout: &WorkLayout) -> Result<Vec<(String, String)>> {
    let mut vars = BTreeMap::new();
    if let Some(path) = &config.pipeline.environment_file {
        vars.extend(load_environment_file(path)?);
    }
    vars.insert(
        FREESURFER_HOME_VAR.to_string(),
        config.pipeline.freesurfer_home.display().to_string(),
    );
    vars.insert(
        SUBJECTS_DIR_VAR.to_string(),
        layout.subjects_dir.display().to_string(),
    );
    Ok(vars.into_iter().collect())
}

/// A JSON object of variable names to values. Non-string values are
/// rendered as JSON text.
pub fn load_environment_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read environment file {}", path.display()))?;
    let doc: serde_json::Map<String, Value> = serde_json::from_str(&text)
        .with_context(|| format!("Environment file {} is not a JSON object", path.display()))?;
    Ok(doc
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}
