use chrono::SecondsFormat;

use crate::error::config_error;
use crate::StitchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LinkType {
    DedupeOnly,
    LinkOnly,
    LinkAndDedupe,
}

/// One rung of a comparison's CASE cascade. `condition` is a SQL predicate
/// over `<column>_l` / `<column>_r`; `None` marks the catch-all else level.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComparisonLevel {
    pub vector_value: i64,
    pub label: String,
    pub condition: Option<String>,
    pub u_probability: Option<f64>,
}

impl ComparisonLevel {
    pub fn new(vector_value: i64, label: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            vector_value,
            label: label.into(),
            condition: Some(condition.into()),
            u_probability: None,
        }
    }

    pub fn else_level(label: impl Into<String>) -> Self {
        Self {
            vector_value: 0,
            label: label.into(),
            condition: None,
            u_probability: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComparisonSpec {
    pub column: String,
    pub term_frequency_adjustments: bool,
    /// Ordered by descending vector value; the catch-all level last.
    pub levels: Vec<ComparisonLevel>,
}

impl ComparisonSpec {
    pub fn exact_match(column: &str) -> Self {
        Self {
            column: column.to_string(),
            term_frequency_adjustments: false,
            levels: vec![
                ComparisonLevel::new(1, "exact match", format!("{column}_l = {column}_r")),
                ComparisonLevel::else_level("all other comparisons"),
            ],
        }
    }

    pub fn exact_match_with_term_frequencies(column: &str) -> Self {
        let mut spec = Self::exact_match(column);
        spec.term_frequency_adjustments = true;
        spec
    }

    pub fn levenshtein_within(column: &str, distance: u32) -> Self {
        Self {
            column: column.to_string(),
            term_frequency_adjustments: false,
            levels: vec![
                ComparisonLevel::new(2, "exact match", format!("{column}_l = {column}_r")),
                ComparisonLevel::new(
                    1,
                    format!("levenshtein <= {distance}"),
                    format!("levenshtein({column}_l, {column}_r) <= {distance}"),
                ),
                ComparisonLevel::else_level("all other comparisons"),
            ],
        }
    }

    pub fn level_by_value(&self, vector_value: i64) -> Option<&ComparisonLevel> {
        self.levels
            .iter()
            .find(|level| level.vector_value == vector_value)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    pub link_type: LinkType,
    pub comparisons: Vec<ComparisonSpec>,
    pub blocking_rules: Vec<String>,
    /// Explicit run-scope token; a fresh one is generated when absent.
    pub run_uid: Option<String>,
}

impl Settings {
    pub fn new(link_type: LinkType) -> Self {
        Self {
            link_type,
            comparisons: Vec::new(),
            blocking_rules: Vec::new(),
            run_uid: None,
        }
    }

    pub fn comparison_columns(&self) -> Vec<&str> {
        self.comparisons
            .iter()
            .map(|comparison| comparison.column.as_str())
            .collect()
    }

    pub fn term_frequency_columns(&self) -> Vec<&str> {
        self.comparisons
            .iter()
            .filter(|comparison| comparison.term_frequency_adjustments)
            .map(|comparison| comparison.column.as_str())
            .collect()
    }

    pub(crate) fn validate(&self) -> Result<(), StitchError> {
        let mut seen = std::collections::BTreeSet::new();
        for comparison in &self.comparisons {
            if !seen.insert(comparison.column.as_str()) {
                return Err(config_error(format!(
                    "duplicate comparison column `{}`",
                    comparison.column
                )));
            }
            let catch_alls = comparison
                .levels
                .iter()
                .filter(|level| level.condition.is_none())
                .count();
            if catch_alls != 1 {
                return Err(config_error(format!(
                    "comparison `{}` must have exactly one catch-all level, found {catch_alls}",
                    comparison.column
                )));
            }
            if comparison
                .levels
                .last()
                .is_some_and(|level| level.condition.is_some())
            {
                return Err(config_error(format!(
                    "comparison `{}` must list its catch-all level last",
                    comparison.column
                )));
            }
        }
        Ok(())
    }
}

/// What a saved model persists: the configuration plus the run-scope token,
/// so a reloaded instance regains cache-compatibility with tables it
/// previously materialized.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSnapshot {
    pub run_uid: String,
    pub saved_at: String,
    pub settings: Settings,
}

impl ModelSnapshot {
    pub fn new(run_uid: impl Into<String>, settings: Settings) -> Self {
        Self {
            run_uid: run_uid.into(),
            saved_at: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            settings,
        }
    }

    pub fn to_json(&self) -> Result<String, StitchError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| config_error(format!("failed to serialize model snapshot: {err}")))
    }

    pub fn from_json(json: &str) -> Result<Self, StitchError> {
        serde_json::from_str(json)
            .map_err(|err| config_error(format!("failed to parse model snapshot: {err}")))
    }
}
