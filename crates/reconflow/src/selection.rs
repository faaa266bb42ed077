//! Scan selection: which files of the subject take part in the run.
//!
//! Sessions are visited in catalog order, then their acquisitions, then the
//! files of each acquisition. A session rejected by the session rules skips
//! all of its acquisitions. Qualifying files are fetched into the input
//! directory under a unique, filesystem-safe name.

use crate::catalog::{AcquisitionRef, FileEntry, ScanCatalog, SessionRef};
use crate::error::OrchestrationError;
use crate::filter::CompiledRules;
use crate::naming::{self, make_file_name_safe, NameRegistry, ScanId};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One selected scan. Created at discovery time and never modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanRecord {
    pub local_path: PathBuf,
    pub original_name: String,
    #[serde(serialize_with = "created_or_unknown")]
    pub created: Option<DateTime<Utc>>,
    pub session_label: String,
    /// Filesystem-safe session label.
    pub visit_label: String,
    pub acquisition_label: String,
    /// Raw reading, Tesla or milli-Tesla.
    pub field_strength: Option<f64>,
    pub stable_id: ScanId,
    /// Why the scan was accepted.
    pub reason: String,
}

impl ScanRecord {
    pub fn created_label(&self) -> String {
        match self.created {
            Some(ts) => ts.to_rfc3339(),
            None => "unknown".to_string(),
        }
    }
}

fn created_or_unknown<S: Serializer>(
    created: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match created {
        Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
        None => serializer.serialize_str("unknown"),
    }
}

/// Inputs of one selection pass.
#[derive(Debug, Clone)]
pub struct SelectionRequest<'a> {
    pub rules: &'a CompiledRules,
    pub measurement_tags: &'a [String],
    pub file_type: &'a str,
    pub input_dir: &'a Path,
    /// Filesystem-safe subject code, first half of every identifier.
    pub subject_code: &'a str,
}

/// Selected scans in catalog order, plus fetch counters.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub records: Vec<ScanRecord>,
    pub downloaded: usize,
    pub reused: usize,
}

impl Selection {
    pub fn identifiers(&self) -> Vec<ScanId> {
        self.records.iter().map(|r| r.stable_id.clone()).collect()
    }
}

/// Walk the subject's sessions and collect the qualifying scans.
///
/// Finding nothing is not an error here; listing or fetching failures are.
pub fn select(
    catalog: &dyn ScanCatalog,
    request: &SelectionRequest<'_>,
) -> Result<Selection, OrchestrationError> {
    let sessions = catalog
        .sessions()
        .map_err(|e| OrchestrationError::Selection(format!("listing sessions: {}", e)))?;

    info!(
        subject = request.subject_code,
        sessions = sessions.len(),
        "Selecting scans"
    );

    let mut names = NameRegistry::new();
    let mut selection = Selection::default();

    for session in &sessions {
        let session_decision = request.rules.session.decide(&session.label);
        if !session_decision.is_admitted() {
            info!(session = %session.label, decision = %session_decision, "Skipping session");
            continue;
        }

        let acquisitions = catalog.acquisitions(session).map_err(|e| {
            OrchestrationError::Selection(format!(
                "listing acquisitions of session '{}': {}",
                session.label, e
            ))
        })?;

        for acquisition in &acquisitions {
            let acquisition_decision = request.rules.acquisition.decide(&acquisition.label);
            if !acquisition_decision.is_admitted() {
                debug!(
                    session = %session.label,
                    acquisition = %acquisition.label,
                    decision = %acquisition_decision,
                    "Skipping acquisition"
                );
                continue;
            }

            for file in &acquisition.files {
                let Some(tag) = qualifying_tag(file, request) else {
                    continue;
                };
                let reason = format!(
                    "session {}; acquisition {}; measurement {}",
                    session_decision, acquisition_decision, tag
                );
                let record = fetch(
                    catalog,
                    request,
                    session,
                    acquisition,
                    file,
                    reason,
                    &mut names,
                    &mut selection,
                )?;
                selection.records.push(record);
            }
        }
    }

    info!(selected = selection.records.len(), "Scan selection complete");
    Ok(selection)
}

fn qualifying_tag<'f>(file: &'f FileEntry, request: &SelectionRequest<'_>) -> Option<&'f str> {
    if file.file_type.as_deref() != Some(request.file_type) {
        return None;
    }
    file.measurements()
        .iter()
        .find(|m| request.measurement_tags.iter().any(|tag| tag == *m))
        .map(String::as_str)
}

#[allow(clippy::too_many_arguments)]
fn fetch(
    catalog: &dyn ScanCatalog,
    request: &SelectionRequest<'_>,
    session: &SessionRef,
    acquisition: &AcquisitionRef,
    file: &FileEntry,
    reason: String,
    names: &mut NameRegistry,
    selection: &mut Selection,
) -> Result<ScanRecord, OrchestrationError> {
    let local_name = names.claim(&make_file_name_safe(&file.name, "_"));
    let local_path = request.input_dir.join(&local_name);

    if local_path.is_file() {
        info!(file = %local_name, "File exists");
        selection.reused += 1;
    } else {
        info!(file = %file.name, dest = %local_path.display(), "Downloading");
        catalog
            .download(acquisition, &file.name, &local_path)
            .map_err(|e| OrchestrationError::Selection(e.to_string()))?;
        selection.downloaded += 1;
    }

    let visit_label = make_file_name_safe(&session.label, "_");
    Ok(ScanRecord {
        local_path,
        original_name: file.name.clone(),
        created: file.created,
        session_label: session.label.clone(),
        stable_id: naming::assign(request.subject_code, &visit_label),
        visit_label,
        acquisition_label: acquisition.label.clone(),
        field_strength: file.field_strength(),
        reason,
    })
}
