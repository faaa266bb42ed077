//! Access to the subject's scan collection.
//!
//! The orchestrator only sees the [`ScanCatalog`] trait: listing sessions and
//! acquisitions, and fetching one file to a local path. [`ManifestCatalog`]
//! implements it over a JSON manifest and a directory of source files.

mod manifest;

pub use manifest::{CatalogManifest, ManifestCatalog};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Classification key holding the measurement tags (e.g. `T1`).
pub const MEASUREMENT_KEY: &str = "Measurement";
/// File metadata key holding the scanner field strength.
pub const FIELD_STRENGTH_KEY: &str = "MagneticFieldStrength";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog manifest {path}: {source}")]
    ReadManifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse catalog manifest {path}: {source}")]
    ParseManifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown session '{0}'")]
    UnknownSession(String),

    #[error("file '{file}' not found in acquisition '{acquisition}'")]
    UnknownFile { acquisition: String, file: String },

    #[error("failed to download '{file}' to {dest}: {source}")]
    Download {
        file: String,
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Container level the run was launched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunLevel {
    Project,
    Subject,
    Session,
    #[serde(other)]
    Other,
}

impl fmt::Display for RunLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunLevel::Project => "project",
            RunLevel::Subject => "subject",
            RunLevel::Session => "session",
            RunLevel::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectRef {
    #[serde(default)]
    pub id: String,
    pub label: String,
    /// Free-form project metadata (rule fields, license text).
    #[serde(default)]
    pub info: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectRef {
    #[serde(default)]
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub info: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRef {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionRef {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type", default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub classification: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub info: Map<String, Value>,
    /// Location of the source bytes, relative to the catalog root.
    /// Defaults to `name`.
    #[serde(default)]
    pub source: Option<PathBuf>,
}

impl FileEntry {
    pub fn measurements(&self) -> &[String] {
        self.classification
            .get(MEASUREMENT_KEY)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Raw field strength reading, Tesla or milli-Tesla.
    pub fn field_strength(&self) -> Option<f64> {
        match self.info.get(FIELD_STRENGTH_KEY)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Read access to one subject's scans plus the file-fetch service.
pub trait ScanCatalog {
    fn run_level(&self) -> RunLevel;

    fn project(&self) -> Option<&ProjectRef>;

    fn subject(&self) -> Option<&SubjectRef>;

    /// Sessions of the subject, in server order.
    fn sessions(&self) -> Result<Vec<SessionRef>, CatalogError>;

    /// Acquisitions of one session, in server order.
    fn acquisitions(&self, session: &SessionRef) -> Result<Vec<AcquisitionRef>, CatalogError>;

    /// Fetch `file_name` of `acquisition` to `dest`. Does nothing when `dest`
    /// already exists.
    fn download(
        &self,
        acquisition: &AcquisitionRef,
        file_name: &str,
        dest: &Path,
    ) -> Result<(), CatalogError>;
}
