//! Installs the reconstruction tool's license file.
//!
//! Sources, first match wins: a license file given as input, license text
//! in the run configuration, license text in the project metadata. Text is
//! whitespace separated and written one token per line.

use crate::catalog::ProjectRef;
use crate::config::RunConfig;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Project metadata key holding the license text.
pub const LICENSE_INFO_KEY: &str = "FREESURFER_LICENSE";
pub const LICENSE_FILE_NAME: &str = "license.txt";

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("Could not find FreeSurfer license in input, run configuration or project info.")]
    NotFound,

    #[error("failed to install license at {path}: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseSource {
    InputFile(PathBuf),
    RunConfig,
    ProjectInfo,
}

impl fmt::Display for LicenseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LicenseSource::InputFile(path) => write!(f, "input file {}", path.display()),
            LicenseSource::RunConfig => f.write_str("run configuration"),
            LicenseSource::ProjectInfo => f.write_str("project info"),
        }
    }
}

/// `<freesurfer_home>/license.txt`
pub fn license_path(freesurfer_home: &Path) -> PathBuf {
    freesurfer_home.join(LICENSE_FILE_NAME)
}

/// Whitespace-separated license text as one token per line.
pub fn license_lines(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join("\n")
}

fn non_blank(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Locate the license and write it to `dest`.
pub fn install_license(
    config: &RunConfig,
    project: Option<&ProjectRef>,
    dest: &Path,
) -> Result<LicenseSource, LicenseError> {
    let install_err = |source: io::Error| LicenseError::Install {
        path: dest.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent() {
        if !parent.exists() {
            warn!(path = %parent.display(), "Had to create license directory");
            fs::create_dir_all(parent).map_err(install_err)?;
        }
    }

    if let Some(input) = &config.run.license_file {
        if dest.file_name().and_then(|n| n.to_str()) != Some(LICENSE_FILE_NAME) {
            warn!(path = %dest.display(), "License file should be named {}", LICENSE_FILE_NAME);
        }
        fs::copy(input, dest).map_err(install_err)?;
        info!("Using license from input file");
        return Ok(LicenseSource::InputFile(input.clone()));
    }

    let (source, text) = if let Some(text) = config.run.license.as_deref().and_then(non_blank) {
        (LicenseSource::RunConfig, text.to_string())
    } else if let Some(text) = project
        .and_then(|p| p.info.get(LICENSE_INFO_KEY))
        .and_then(Value::as_str)
        .and_then(non_blank)
    {
        (LicenseSource::ProjectInfo, text.to_string())
    } else {
        return Err(LicenseError::NotFound);
    };

    fs::write(dest, license_lines(&text)).map_err(install_err)?;
    info!(source = %source, "Using license");
    Ok(source)
}
