//! Per-stage status: read back from the tool's status log and pushed to a
//! progress sink. Purely observational; nothing here changes control flow.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Reported when a stage left no readable status artifact.
pub const STATUS_UNAVAILABLE: &str = "status unavailable";

/// Status log path relative to a stage's directory.
pub const STATUS_ARTIFACT: &str = "scripts/recon-all-status.log";

pub const STAGE_KEY: &str = "stage";
pub const STATUS_KEY: &str = "status";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "state", content = "line", rename_all = "lowercase")]
pub enum StageStatus {
    /// Last line of the status artifact.
    Reported(String),
    Unavailable,
}

impl StageStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, StageStatus::Reported(_))
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Reported(line) => f.write_str(line),
            StageStatus::Unavailable => f.write_str(STATUS_UNAVAILABLE),
        }
    }
}

/// Last non-empty line of `<subjects_dir>/<stage_dir>/scripts/recon-all-status.log`.
pub fn read_status(subjects_dir: &Path, stage_dir: &str) -> StageStatus {
    let path = subjects_dir.join(stage_dir).join(STATUS_ARTIFACT);
    let Ok(text) = fs::read_to_string(&path) else {
        return StageStatus::Unavailable;
    };
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| StageStatus::Reported(line.to_string()))
        .unwrap_or(StageStatus::Unavailable)
}

/// Key/value upserts against the run's result metadata.
pub trait StatusSink {
    fn update_status(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Logs updates and stores nothing.
#[derive(Debug, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn update_status(&mut self, key: &str, value: &str) -> Result<()> {
        info!(key, value, "Status update");
        Ok(())
    }
}

/// Upserts into `analysis.info.<key>` of a JSON metadata file.
#[derive(Debug, Clone)]
pub struct MetadataFileSink {
    path: PathBuf,
}

/// File name of the metadata document inside the output directory.
pub const METADATA_FILE: &str = ".metadata.json";

impl MetadataFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_output_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(METADATA_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Value> {
        match fs::read_to_string(&self.path) {
            Ok(text) if !text.trim().is_empty() => serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse {}", self.path.display())),
            Ok(_) => Ok(Value::Object(Map::new())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Object(Map::new())),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }
}

impl StatusSink for MetadataFileSink {
    fn update_status(&mut self, key: &str, value: &str) -> Result<()> {
        let mut doc = self.load()?;
        let info = doc
            .as_object_mut()
            .and_then(|root| object_at(root, "analysis"))
            .and_then(|analysis| object_at(analysis, "info"))
            .with_context(|| format!("{} is not a JSON object tree", self.path.display()))?;
        info.insert(key.to_string(), Value::String(value.to_string()));

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&doc)?;
        fs::write(&self.path, text)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

fn object_at<'a>(map: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    map.entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
}

/// Reads each stage's status and forwards it to the sink. Sink failures are
/// logged and dropped.
pub struct StatusTracker {
    sink: Box<dyn StatusSink>,
}

impl StatusTracker {
    pub fn new(sink: Box<dyn StatusSink>) -> Self {
        Self { sink }
    }

    pub fn observe(&mut self, subjects_dir: &Path, stage_name: &str, stage_dir: Option<&str>) -> StageStatus {
        let status = match stage_dir {
            Some(dir) => read_status(subjects_dir, dir),
            None => StageStatus::Unavailable,
        };
        info!(stage = stage_name, status = %status, "Stage status");
        self.publish(STAGE_KEY, stage_name);
        self.publish(STATUS_KEY, &status.to_string());
        status
    }

    pub fn publish(&mut self, key: &str, value: &str) {
        if let Err(e) = self.sink.update_status(key, value) {
            warn!(key, error = %e, "Failed to publish status");
        }
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new(Box::new(LogSink))
    }
}
