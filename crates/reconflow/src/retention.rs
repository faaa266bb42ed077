//! End-of-run artifact handling: summary tables, pruning, archive.

use crate::command::TABLES_DIR;
use crate::outcome::{Diagnostic, FailureKind, RunOutcome};
use crate::prepare::WorkLayout;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("nothing to archive: {0} does not exist")]
    MissingTree(PathBuf),

    #[error("archive I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk {0}")]
    Walk(#[from] walkdir::Error),

    #[error("zip: {0}")]
    Zip(#[from] zip::result::ZipError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep per-scan working directories.
    pub keep_output: bool,
    /// Archive the analysis tree, then remove it.
    pub zip_output: bool,
    pub archive_name: String,
}

/// `<gear_name>_<subject_code_safe>_<analysis_id>.zip`
pub fn archive_name(gear_name: &str, subject_code_safe: &str, analysis_id: &str) -> String {
    format!("{}_{}_{}.zip", gear_name, subject_code_safe, analysis_id)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub tables: Vec<PathBuf>,
    pub pruned: usize,
    pub archive: Option<PathBuf>,
}

/// Copy the summary tables into `output_dir`.
pub fn copy_tables(tables_dir: &Path, output_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut copied = Vec::new();
    if !tables_dir.is_dir() {
        return Ok(copied);
    }
    fs::create_dir_all(output_dir)?;
    let mut entries: Vec<_> = fs::read_dir(tables_dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        if !entry.file_type()?.is_file() {
            continue;
        }
        let dest = output_dir.join(entry.file_name());
        fs::copy(entry.path(), &dest)?;
        copied.push(dest);
    }
    Ok(copied)
}

/// Remove every entry of `subjects_dir` except `keep`. Links are removed,
/// never followed.
pub fn prune_intermediate(subjects_dir: &Path, keep: &str) -> io::Result<usize> {
    let mut removed = 0;
    if !subjects_dir.is_dir() {
        return Ok(removed);
    }
    for entry in fs::read_dir(subjects_dir)? {
        let entry = entry?;
        if entry.file_name() == keep {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        debug!(path = %path.display(), "Removed");
        removed += 1;
    }
    Ok(removed)
}

/// Zip `tree` into `dest`. Entry names are relative to the tree's parent,
/// so they start with the tree's own directory name. Links are skipped.
pub fn zip_tree(tree: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    if !tree.is_dir() {
        return Err(ArchiveError::MissingTree(tree.to_path_buf()));
    }
    let base = tree.parent().unwrap_or(tree);
    let file = File::create(dest).map_err(|source| ArchiveError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut count = 0;
    for entry in WalkDir::new(tree).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = path
            .strip_prefix(base)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let mut source_file = File::open(path).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        zip.start_file(name, options)?;
        io::copy(&mut source_file, &mut zip).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        count += 1;
    }
    zip.finish()?;
    Ok(count)
}

/// Apply the retention policy. Copy and prune failures are warnings; an
/// archive failure is an error and leaves the tree in place.
pub fn finalize(layout: &WorkLayout, policy: &RetentionPolicy, outcome: &mut RunOutcome) -> RetentionReport {
    let mut report = RetentionReport::default();

    match copy_tables(&layout.tables_dir(), &layout.output_dir) {
        Ok(tables) => {
            info!(count = tables.len(), dest = %layout.output_dir.display(), "Copied summary tables");
            report.tables = tables;
        }
        Err(e) => {
            warn!(error = %e, "Failed to copy summary tables");
            outcome.warn(Diagnostic::failure(
                FailureKind::PostProcessing,
                format!("copying summary tables: {}", e),
            ));
        }
    }

    if policy.keep_output {
        info!(dir = %layout.subjects_dir.display(), "Keeping intermediate output");
    } else {
        match prune_intermediate(&layout.subjects_dir, TABLES_DIR) {
            Ok(pruned) => {
                info!(pruned, "Removed intermediate output");
                report.pruned = pruned;
            }
            Err(e) => {
                warn!(error = %e, "Failed to remove intermediate output");
                outcome.warn(Diagnostic::failure(
                    FailureKind::PostProcessing,
                    format!("removing intermediate output: {}", e),
                ));
            }
        }
    }

    if policy.zip_output {
        let dest = layout.output_dir.join(&policy.archive_name);
        info!(tree = %layout.analysis_dir.display(), dest = %dest.display(), "Zipping output");
        match zip_tree(&layout.analysis_dir, &dest) {
            Ok(files) => {
                info!(files, "Archive written");
                if let Err(e) = fs::remove_dir_all(&layout.analysis_dir) {
                    outcome.warn(Diagnostic::failure(
                        FailureKind::PostProcessing,
                        format!("removing archived tree: {}", e),
                    ));
                }
                report.archive = Some(dest);
            }
            Err(e) => {
                error!(error = %e, "Failed to write archive");
                outcome.error(format!("archiving output: {}", e));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn layout(dir: &Path) -> WorkLayout {
        let output_dir = dir.join("output");
        let analysis_dir = output_dir.join("a1");
        WorkLayout {
            subjects_dir: analysis_dir.join("subjects"),
            analysis_dir,
            output_dir,
            input_dir: dir.join("input"),
        }
    }

    fn populate(layout: &WorkLayout) {
        let scan = layout.subjects_dir.join("sub-v1/mri");
        fs::create_dir_all(&scan).unwrap();
        fs::write(scan.join("aseg.mgz"), b"volume").unwrap();
        fs::create_dir_all(layout.tables_dir()).unwrap();
        fs::write(layout.tables_dir().join("aseg_stats_vol.csv"), "id,vol\n").unwrap();
        fs::write(layout.tables_dir().join("lh_aparc_stats_thickness.csv"), "id,th\n").unwrap();
    }

    fn policy(keep_output: bool, zip_output: bool) -> RetentionPolicy {
        RetentionPolicy {
            keep_output,
            zip_output,
            archive_name: archive_name("reconflow", "sub_01", "a1"),
        }
    }

    #[test]
    fn tables_copied_and_intermediates_pruned() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        populate(&layout);
        let mut outcome = RunOutcome::new();

        let report = finalize(&layout, &policy(false, false), &mut outcome);

        assert_eq!(report.tables.len(), 2);
        assert!(layout.output_dir.join("aseg_stats_vol.csv").is_file());
        assert_eq!(report.pruned, 1);
        assert!(!layout.subjects_dir.join("sub-v1").exists());
        assert!(layout.tables_dir().is_dir());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn keep_output_leaves_tree() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        populate(&layout);
        let report = finalize(&layout, &policy(true, false), &mut RunOutcome::new());
        assert_eq!(report.pruned, 0);
        assert!(layout.subjects_dir.join("sub-v1/mri/aseg.mgz").is_file());
    }

    #[test]
    fn archive_replaces_tree() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        populate(&layout);
        let mut outcome = RunOutcome::new();

        let report = finalize(&layout, &policy(true, true), &mut outcome);

        let archive_path = report.archive.unwrap();
        assert_eq!(archive_path, layout.output_dir.join("reconflow_sub_01_a1.zip"));
        assert!(!layout.analysis_dir.exists());

        let mut archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "a1/subjects/sub-v1/mri/aseg.mgz",
                "a1/subjects/tables/aseg_stats_vol.csv",
                "a1/subjects/tables/lh_aparc_stats_thickness.csv",
            ]
        );
        let mut content = String::new();
        archive
            .by_name("a1/subjects/tables/aseg_stats_vol.csv")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "id,vol\n");
    }

    #[test]
    fn large_file_is_archived_intact() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("a1");
        fs::create_dir_all(&tree).unwrap();
        let body: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        fs::write(tree.join("orig.mgz"), &body).unwrap();

        let dest = dir.path().join("out.zip");
        assert_eq!(zip_tree(&tree, &dest).unwrap(), 1);

        let mut archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut read_back = Vec::new();
        archive
            .by_name("a1/orig.mgz")
            .unwrap()
            .read_to_end(&mut read_back)
            .unwrap();
        assert_eq!(read_back, body);
    }

    #[test]
    fn missing_tree_is_an_archive_error() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        fs::create_dir_all(&layout.output_dir).unwrap();
        let mut outcome = RunOutcome::new();

        let report = finalize(&layout, &policy(false, true), &mut outcome);
        assert!(report.archive.is_none());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn prune_removes_links_without_following() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("fsaverage");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("keep.me"), b"x").unwrap();
        let subjects = dir.path().join("subjects");
        fs::create_dir_all(&subjects).unwrap();
        std::os::unix::fs::symlink(&target, subjects.join("fsaverage")).unwrap();

        assert_eq!(prune_intermediate(&subjects, "tables").unwrap(), 1);
        assert!(target.join("keep.me").is_file());
    }
}
