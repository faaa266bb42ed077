use super::{
    AcquisitionRef, CatalogError, FileEntry, ProjectRef, RunLevel, ScanCatalog, SessionRef,
    SubjectRef,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk description of one subject's scan collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogManifest {
    pub run_level: RunLevel,
    #[serde(default)]
    pub project: Option<ProjectRef>,
    #[serde(default)]
    pub subject: Option<SubjectRef>,
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub acquisitions: Vec<AcquisitionRef>,
}

/// Catalog backed by a JSON manifest. Source files are resolved relative to
/// the manifest's directory and copied on download.
#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    root: PathBuf,
    manifest: CatalogManifest,
}

impl ManifestCatalog {
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path).map_err(|source| CatalogError::ReadManifest {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: CatalogManifest =
            serde_json::from_str(&text).map_err(|source| CatalogError::ParseManifest {
                path: path.to_path_buf(),
                source,
            })?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::from_manifest(root, manifest))
    }

    pub fn from_manifest(root: PathBuf, manifest: CatalogManifest) -> Self {
        Self { root, manifest }
    }

    fn find_file<'a>(&self, acquisition: &'a AcquisitionRef, name: &str) -> Option<&'a FileEntry> {
        acquisition.files.iter().find(|f| f.name == name)
    }
}

impl ScanCatalog for ManifestCatalog {
    fn run_level(&self) -> RunLevel {
        self.manifest.run_level
    }

    fn project(&self) -> Option<&ProjectRef> {
        self.manifest.project.as_ref()
    }

    fn subject(&self) -> Option<&SubjectRef> {
        self.manifest.subject.as_ref()
    }

    fn sessions(&self) -> Result<Vec<SessionRef>, CatalogError> {
        Ok(self
            .manifest
            .sessions
            .iter()
            .map(|s| SessionRef {
                id: s.id.clone(),
                label: s.label.clone(),
            })
            .collect())
    }

    fn acquisitions(&self, session: &SessionRef) -> Result<Vec<AcquisitionRef>, CatalogError> {
        self.manifest
            .sessions
            .iter()
            .find(|s| s.id == session.id)
            .map(|s| s.acquisitions.clone())
            .ok_or_else(|| CatalogError::UnknownSession(session.id.clone()))
    }

    fn download(
        &self,
        acquisition: &AcquisitionRef,
        file_name: &str,
        dest: &Path,
    ) -> Result<(), CatalogError> {
        if dest.exists() {
            return Ok(());
        }
        let entry = self
            .find_file(acquisition, file_name)
            .ok_or_else(|| CatalogError::UnknownFile {
                acquisition: acquisition.label.clone(),
                file: file_name.to_string(),
            })?;
        let source = self
            .root
            .join(entry.source.as_deref().unwrap_or_else(|| Path::new(&entry.name)));
        let io_err = |source: std::io::Error| CatalogError::Download {
            file: file_name.to_string(),
            dest: dest.to_path_buf(),
            source,
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        debug!(source = %source.display(), dest = %dest.display(), "Copying scan");
        fs::copy(&source, dest).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"{
        "run_level": "subject",
        "project": {"id": "p1", "label": "Study A", "info": {"session_exclude": "pilot"}},
        "subject": {"id": "s1", "code": "sub 01"},
        "sessions": [
            {"id": "ses1", "label": "baseline", "acquisitions": [
                {"id": "acq1", "label": "T1 MPRAGE", "files": [
                    {"name": "t1.nii.gz", "type": "nifti",
                     "created": "2020-01-02T03:04:05Z",
                     "classification": {"Measurement": ["T1"]},
                     "info": {"MagneticFieldStrength": 2900},
                     "source": "data/baseline_t1.nii.gz"}
                ]}
            ]}
        ]
    }"#;

    fn write_catalog(dir: &Path) -> PathBuf {
        let path = dir.join("catalog.json");
        fs::write(&path, MANIFEST).unwrap();
        fs::create_dir_all(dir.join("data")).unwrap();
        fs::write(dir.join("data/baseline_t1.nii.gz"), b"nifti-bytes").unwrap();
        path
    }

    #[test]
    fn parses_manifest() {
        let dir = TempDir::new().unwrap();
        let catalog = ManifestCatalog::open(&write_catalog(dir.path())).unwrap();

        assert_eq!(catalog.run_level(), RunLevel::Subject);
        assert_eq!(catalog.subject().unwrap().code, "sub 01");
        let sessions = catalog.sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        let acquisitions = catalog.acquisitions(&sessions[0]).unwrap();
        let file = &acquisitions[0].files[0];
        assert_eq!(file.measurements(), ["T1".to_string()]);
        assert_eq!(file.field_strength(), Some(2900.0));
    }

    #[test]
    fn unknown_run_level_maps_to_other() {
        let manifest: CatalogManifest =
            serde_json::from_str(r#"{"run_level": "acquisition"}"#).unwrap();
        assert_eq!(manifest.run_level, RunLevel::Other);
    }

    #[test]
    fn download_copies_once() {
        let dir = TempDir::new().unwrap();
        let catalog = ManifestCatalog::open(&write_catalog(dir.path())).unwrap();
        let sessions = catalog.sessions().unwrap();
        let acquisitions = catalog.acquisitions(&sessions[0]).unwrap();
        let acquisition = &acquisitions[0];
        let dest = dir.path().join("input/t1.nii.gz");

        catalog.download(acquisition, "t1.nii.gz", &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"nifti-bytes");

        // An existing destination is left untouched.
        fs::write(&dest, b"local").unwrap();
        catalog.download(acquisition, "t1.nii.gz", &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"local");
    }

    #[test]
    fn missing_source_is_a_download_error() {
        let dir = TempDir::new().unwrap();
        let path = write_catalog(dir.path());
        fs::remove_file(dir.path().join("data/baseline_t1.nii.gz")).unwrap();
        let catalog = ManifestCatalog::open(&path).unwrap();
        let sessions = catalog.sessions().unwrap();
        let acquisitions = catalog.acquisitions(&sessions[0]).unwrap();
        let acquisition = &acquisitions[0];

        let err = catalog
            .download(acquisition, "t1.nii.gz", &dir.path().join("input/t1.nii.gz"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::Download { .. }));
    }
}
