//! Filesystem-safe names and per-scan identifiers.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

/// Subject directory of the within-subject template.
pub const TEMPLATE_ID: &str = "BASE";

static UNSAFE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.\-]+").unwrap());

/// Replace every run of characters outside `[A-Za-z0-9_.-]` with `replacement`.
/// A leading dot is dropped so the result is never a hidden file.
pub fn make_file_name_safe(name: &str, replacement: &str) -> String {
    let safe = UNSAFE_RUN.replace_all(name.trim(), replacement);
    safe.trim_start_matches('.').to_string()
}

/// Stable directory name of one scan, reused by every processing phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory of this scan's longitudinal re-run.
    pub fn longitudinal_dir(&self) -> String {
        format!("{}.long.{}", self.0, TEMPLATE_ID)
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{subject_code}-{visit_label}`, both already filesystem-safe.
///
/// No uniqueness check happens here; two sessions with the same safe label
/// under one subject yield the same identifier.
pub fn assign(subject_code: &str, visit_label: &str) -> ScanId {
    ScanId(format!("{}-{}", subject_code, visit_label))
}

/// Hands out unique local file names for the selected scans.
///
/// A name already taken gets an integer prefix. The counter starts at 1 and
/// is shared by every collision of the run, so the prefixes are monotonic.
#[derive(Debug)]
pub struct NameRegistry {
    taken: HashSet<String>,
    next_prefix: u32,
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NameRegistry {
    pub fn new() -> Self {
        Self {
            taken: HashSet::new(),
            next_prefix: 1,
        }
    }

    pub fn claim(&mut self, safe_name: &str) -> String {
        let mut candidate = safe_name.to_string();
        while self.taken.contains(&candidate) {
            candidate = format!("{}_{}", self.next_prefix, safe_name);
            self.next_prefix += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_characters_are_replaced() {
        assert_eq!(make_file_name_safe("Visit 1 (baseline)", "_"), "Visit_1_baseline_");
        assert_eq!(make_file_name_safe("T1w MPRAGE.nii.gz", "_"), "T1w_MPRAGE.nii.gz");
        assert_eq!(make_file_name_safe(".hidden", "_"), "hidden");
        assert_eq!(make_file_name_safe("a/b\\c", ""), "abc");
    }

    #[test]
    fn identifier_joins_subject_and_visit() {
        let id = assign("sub_01", "ses-02");
        assert_eq!(id.as_str(), "sub_01-ses-02");
        assert_eq!(id.longitudinal_dir(), "sub_01-ses-02.long.BASE");
    }

    #[test]
    fn collisions_get_monotonic_prefixes() {
        let mut registry = NameRegistry::new();
        let names: Vec<String> = (0..4).map(|_| registry.claim("T1.nii.gz")).collect();
        assert_eq!(names, vec!["T1.nii.gz", "1_T1.nii.gz", "2_T1.nii.gz", "3_T1.nii.gz"]);
    }

    #[test]
    fn counter_is_shared_across_names() {
        let mut registry = NameRegistry::new();
        registry.claim("a.nii");
        registry.claim("b.nii");
        assert_eq!(registry.claim("a.nii"), "1_a.nii");
        assert_eq!(registry.claim("b.nii"), "2_b.nii");
    }
}
