//! Include/exclude rules for sessions and acquisitions.
//!
//! Rules come from three layers, lowest precedence first: project metadata,
//! subject metadata, run configuration. Each layer may supply any of the four
//! rule fields as a whitespace-separated list of regular expressions. A field
//! is replaced wholesale by a higher layer only when that layer supplies a
//! non-empty value; lists are never merged.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub const SESSION_INCLUDE: &str = "session_include";
pub const SESSION_EXCLUDE: &str = "session_exclude";
pub const ACQUISITION_INCLUDE: &str = "acquisition_include";
pub const ACQUISITION_EXCLUDE: &str = "acquisition_exclude";

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid {field} pattern '{pattern}': {source}")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// How a non-empty include list admits a label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncludeMode {
    /// The label must match every include pattern.
    #[default]
    All,
    /// The label must match at least one include pattern.
    Any,
}

/// One rule layer as supplied by a metadata map or the run configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleFragment {
    pub session_include: Option<String>,
    pub session_exclude: Option<String>,
    pub acquisition_include: Option<String>,
    pub acquisition_exclude: Option<String>,
}

impl RuleFragment {
    /// Read the rule fields out of a free-form metadata map. Non-string
    /// values are ignored; arrays of strings are joined with spaces.
    pub fn from_metadata(info: &Map<String, Value>) -> Self {
        let field = |key: &str| match info.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(items)) => {
                let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                Some(parts.join(" "))
            }
            _ => None,
        };
        Self {
            session_include: field(SESSION_INCLUDE),
            session_exclude: field(SESSION_EXCLUDE),
            acquisition_include: field(ACQUISITION_INCLUDE),
            acquisition_exclude: field(ACQUISITION_EXCLUDE),
        }
    }
}

/// The effective rules for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet {
    pub session_include: Vec<String>,
    pub session_exclude: Vec<String>,
    pub acquisition_include: Vec<String>,
    pub acquisition_exclude: Vec<String>,
}

/// Merge rule layers, lowest precedence first.
pub fn resolve_rules(layers: &[RuleFragment]) -> RuleSet {
    let mut rules = RuleSet::default();
    for layer in layers {
        overlay(&mut rules.session_include, &layer.session_include);
        overlay(&mut rules.session_exclude, &layer.session_exclude);
        overlay(&mut rules.acquisition_include, &layer.acquisition_include);
        overlay(&mut rules.acquisition_exclude, &layer.acquisition_exclude);
    }
    rules
}

fn overlay(current: &mut Vec<String>, supplied: &Option<String>) {
    let Some(raw) = supplied else {
        return;
    };
    let patterns: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if !patterns.is_empty() {
        *current = patterns;
    }
}

impl RuleSet {
    pub fn compile(&self, mode: IncludeMode) -> Result<CompiledRules, FilterError> {
        Ok(CompiledRules {
            session: Matcher::new(
                compile_all(SESSION_INCLUDE, &self.session_include)?,
                compile_all(SESSION_EXCLUDE, &self.session_exclude)?,
                mode,
            ),
            acquisition: Matcher::new(
                compile_all(ACQUISITION_INCLUDE, &self.acquisition_include)?,
                compile_all(ACQUISITION_EXCLUDE, &self.acquisition_exclude)?,
                mode,
            ),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.session_include.is_empty()
            && self.session_exclude.is_empty()
            && self.acquisition_include.is_empty()
            && self.acquisition_exclude.is_empty()
    }
}

fn compile_all(field: &'static str, patterns: &[String]) -> Result<Vec<Regex>, FilterError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| FilterError::InvalidPattern {
                field,
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

/// Compiled rules for both granularities.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    pub session: Matcher,
    pub acquisition: Matcher,
}

/// Outcome of checking one label against one granularity's rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Matched an exclude pattern.
    Excluded { pattern: String },
    /// Failed the include list.
    NotIncluded { pattern: String },
    /// Passed a non-empty include list.
    Included,
    /// No include list applies.
    Unfiltered,
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Included | Decision::Unfiltered)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Excluded { pattern } => write!(f, "excluded by '{}'", pattern),
            Decision::NotIncluded { pattern } => write!(f, "not included by '{}'", pattern),
            Decision::Included => f.write_str("included"),
            Decision::Unfiltered => f.write_str("no filter"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Matcher {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    mode: IncludeMode,
}

impl Matcher {
    pub fn new(include: Vec<Regex>, exclude: Vec<Regex>, mode: IncludeMode) -> Self {
        Self {
            include,
            exclude,
            mode,
        }
    }

    pub fn decide(&self, label: &str) -> Decision {
        // Search semantics: a pattern matches anywhere in the label.
        if let Some(hit) = self.exclude.iter().find(|re| re.is_match(label)) {
            return Decision::Excluded {
                pattern: hit.as_str().to_string(),
            };
        }
        if self.include.is_empty() {
            return Decision::Unfiltered;
        }
        match self.mode {
            IncludeMode::All => match self.include.iter().find(|re| !re.is_match(label)) {
                Some(miss) => Decision::NotIncluded {
                    pattern: miss.as_str().to_string(),
                },
                None => Decision::Included,
            },
            IncludeMode::Any => {
                if self.include.iter().any(|re| re.is_match(label)) {
                    Decision::Included
                } else {
                    let listed: Vec<&str> = self.include.iter().map(Regex::as_str).collect();
                    Decision::NotIncluded {
                        pattern: listed.join(" "),
                    }
                }
            }
        }
    }
}

/// Check a label against include and exclude patterns.
pub fn admit(label: &str, include: &[Regex], exclude: &[Regex], mode: IncludeMode) -> bool {
    Matcher::new(include.to_vec(), exclude.to_vec(), mode)
        .decide(label)
        .is_admitted()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(session_include: Option<&str>, acquisition_exclude: Option<&str>) -> RuleFragment {
        RuleFragment {
            session_include: session_include.map(str::to_string),
            acquisition_exclude: acquisition_exclude.map(str::to_string),
            ..Default::default()
        }
    }

    fn res(patterns: &[&str]) -> Vec<Regex> {
        patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
    }

    #[test]
    fn higher_layer_replaces_field() {
        let rules = resolve_rules(&[
            fragment(Some("baseline"), None),
            fragment(None, None),
            fragment(Some("month12 month24"), None),
        ]);
        assert_eq!(rules.session_include, vec!["month12", "month24"]);
    }

    #[test]
    fn empty_or_absent_layer_never_overrides() {
        let rules = resolve_rules(&[
            fragment(Some("baseline"), Some("localizer")),
            fragment(Some("   "), None),
            fragment(Some(""), None),
        ]);
        assert_eq!(rules.session_include, vec!["baseline"]);
        assert_eq!(rules.acquisition_exclude, vec!["localizer"]);
    }

    #[test]
    fn layering_over_all_combinations() {
        // Each layer either omits the field, supplies blank text, or supplies a value.
        let choices = [None, Some(" "), Some("a"), Some("b c")];
        for first in choices {
            for second in choices {
                for third in choices {
                    let layers = [
                        fragment(first, None),
                        fragment(second, None),
                        fragment(third, None),
                    ];
                    let expected: Vec<String> = [third, second, first]
                        .iter()
                        .flatten()
                        .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
                        .find(|v| !v.is_empty())
                        .unwrap_or_default();
                    assert_eq!(
                        resolve_rules(&layers).session_include,
                        expected,
                        "layers {:?}",
                        (first, second, third)
                    );
                }
            }
        }
    }

    #[test]
    fn exclude_wins_over_include() {
        let include = res(&["T1"]);
        let exclude = res(&["rep"]);
        for mode in [IncludeMode::All, IncludeMode::Any] {
            assert!(!admit("T1_MPRAGE_rep", &include, &exclude, mode));
            assert!(!admit("T1_MPRAGE_rep", &[], &exclude, mode));
            assert!(admit("T1_MPRAGE", &include, &exclude, mode));
        }
    }

    #[test]
    fn include_all_requires_every_pattern() {
        let include = res(&["T1", "MPRAGE"]);
        assert!(admit("T1_MPRAGE", &include, &[], IncludeMode::All));
        assert!(!admit("T1_SPGR", &include, &[], IncludeMode::All));
        assert!(admit("T1_SPGR", &include, &[], IncludeMode::Any));
        assert!(!admit("T2_FLAIR", &include, &[], IncludeMode::Any));
    }

    #[test]
    fn no_include_list_admits() {
        assert!(admit("anything", &[], &[], IncludeMode::All));
    }

    #[test]
    fn patterns_search_rather_than_full_match() {
        let include = res(&["^ses-0[12]"]);
        assert!(admit("ses-01_baseline", &include, &[], IncludeMode::All));
        assert!(!admit("ses-03", &include, &[], IncludeMode::All));
    }

    #[test]
    fn decision_names_the_exclude_pattern() {
        let matcher = Matcher::new(vec![], res(&["scout", "local"]), IncludeMode::All);
        assert_eq!(
            matcher.decide("localizer"),
            Decision::Excluded {
                pattern: "local".to_string()
            }
        );
    }

    #[test]
    fn invalid_pattern_reports_field() {
        let rules = RuleSet {
            acquisition_exclude: vec!["(".to_string()],
            ..Default::default()
        };
        let err = rules.compile(IncludeMode::All).unwrap_err();
        assert!(err.to_string().contains("acquisition_exclude"));
    }

    #[test]
    fn metadata_map_supplies_fragment() {
        let info: Map<String, Value> = serde_json::from_str(
            r#"{"session_exclude": "pilot", "acquisition_include": ["T1", "MPRAGE"], "other": 3}"#,
        )
        .unwrap();
        let fragment = RuleFragment::from_metadata(&info);
        assert_eq!(fragment.session_exclude.as_deref(), Some("pilot"));
        assert_eq!(fragment.acquisition_include.as_deref(), Some("T1 MPRAGE"));
        assert_eq!(fragment.session_include, None);
    }
}
