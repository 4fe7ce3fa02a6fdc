//! Analysis configuration
//!
//! Thresholds steer event segmentation and timing aggregation. The form
//! definition names the prompts and XML tags to report on; it is supplied
//! directly by the caller as a JSON file.

use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Split a run of same-code rows after this many milliseconds
pub const DEFAULT_EVENT_THRESHOLD_MS: i64 = 400;

/// Split a run of relation rows after this many milliseconds
pub const DEFAULT_RELATION_THRESHOLD_MS: i64 = 60_000;

/// Pauses shorter than this (30 minutes) count as short breaks
pub const DEFAULT_SHORT_BREAK_THRESHOLD_MS: i64 = 1_800_000;

/// Resumed periods longer than this (2 hours) are flagged
pub const DEFAULT_LARGE_RESUME_THRESHOLD_MS: i64 = 7_200_000;

/// Time thresholds, all in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub event_ms: i64,
    pub relation_ms: i64,
    pub short_break_ms: i64,
    pub large_resume_ms: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            event_ms: DEFAULT_EVENT_THRESHOLD_MS,
            relation_ms: DEFAULT_RELATION_THRESHOLD_MS,
            short_break_ms: DEFAULT_SHORT_BREAK_THRESHOLD_MS,
            large_resume_ms: DEFAULT_LARGE_RESUME_THRESHOLD_MS,
        }
    }
}

/// Analytics metadata for one ODK form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormDefinition {
    pub form_id: String,
    /// Title used for the instances folder in ODK Briefcase Storage
    pub form_title: String,
    /// Prompt names to analyze from `log.txt`
    #[serde(default)]
    pub prompts: Vec<String>,
    /// XML tag names to extract from `submission.xml`
    #[serde(default)]
    pub tags: Vec<String>,
}

impl FormDefinition {
    pub fn from_json(json: &str) -> Result<Self> {
        let form: FormDefinition = serde_json::from_str(json)?;
        form.validate()?;
        Ok(form)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.form_id.trim().is_empty() {
            return Err(AnalyticsError::FormDefinition(
                "form_id must not be empty".to_string(),
            ));
        }
        if self.form_title.trim().is_empty() {
            return Err(AnalyticsError::FormDefinition(format!(
                "form_title must not be empty for form {}",
                self.form_id
            )));
        }
        Ok(())
    }
}

/// Read-only configuration shared by every instance of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisConfig {
    pub thresholds: Thresholds,
    pub prompts: Vec<String>,
    pub tags: Vec<String>,
}

impl AnalysisConfig {
    pub fn new(prompts: Vec<String>, tags: Vec<String>) -> Self {
        Self {
            thresholds: Thresholds::default(),
            prompts,
            tags,
        }
    }

    pub fn for_form(form: &FormDefinition) -> Self {
        Self::new(form.prompts.clone(), form.tags.clone())
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.event_ms, 400);
        assert_eq!(thresholds.relation_ms, 60_000);
        assert_eq!(thresholds.short_break_ms, 1_800_000);
        assert_eq!(thresholds.large_resume_ms, 7_200_000);
    }

    #[test]
    fn test_partial_thresholds_fill_defaults() {
        let thresholds: Thresholds = serde_json::from_str(r#"{"event_ms": 1000}"#).unwrap();
        assert_eq!(thresholds.event_ms, 1000);
        assert_eq!(thresholds.relation_ms, DEFAULT_RELATION_THRESHOLD_MS);
    }

    #[test]
    fn test_form_definition_from_json() {
        let form = FormDefinition::from_json(
            r#"{
                "form_id": "HHQ-v12",
                "form_title": "Household Questionnaire",
                "prompts": ["age", "consent"],
                "tags": ["level1"],
                "extra": true
            }"#,
        )
        .unwrap();
        assert_eq!(form.form_title, "Household Questionnaire");
        assert_eq!(form.prompts, vec!["age", "consent"]);

        let config = AnalysisConfig::for_form(&form);
        assert_eq!(config.tags, vec!["level1"]);
        assert_eq!(config.thresholds, Thresholds::default());
    }

    #[test]
    fn test_form_definition_lists_default_empty() {
        let form = FormDefinition::from_json(r#"{"form_id": "a", "form_title": "A"}"#).unwrap();
        assert!(form.prompts.is_empty());
        assert!(form.tags.is_empty());
    }

    #[test]
    fn test_form_definition_requires_title() {
        let result = FormDefinition::from_json(r#"{"form_id": "a", "form_title": " "}"#);
        assert!(matches!(result, Err(AnalyticsError::FormDefinition(_))));

        let result = FormDefinition::from_json("not json");
        assert!(matches!(result, Err(AnalyticsError::Json(_))));
    }
}
