//! Core types produced by the analysis pipeline
//!
//! [`InstanceMetrics`] is the aggregated record for one survey instance;
//! [`LogAnalysis`] pairs it with the events and diagnostics it came from.

use crate::diagnostics::Diagnostic;
use crate::event::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Metrics for one tracked prompt.
///
/// Each field stays `None` until the prompt is observed in a way that affects
/// it, so "never seen" and "zero" remain distinguishable in the export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMetrics {
    /// Time on screen (milliseconds)
    pub resumed_ms: Option<i64>,
    /// Short pauses taken while on this prompt (milliseconds)
    pub short_break_ms: Option<i64>,
    /// Contravened constraints / missing required answers
    pub contravened_constraint_count: Option<u32>,
    /// Times the prompt was entered
    pub visit_count: Option<u32>,
    /// Times the saved value changed
    pub value_change_count: Option<u32>,
}

impl PromptMetrics {
    pub fn add_resumed(&mut self, ms: i64) {
        *self.resumed_ms.get_or_insert(0) += ms;
    }

    pub fn add_short_break(&mut self, ms: i64) {
        *self.short_break_ms.get_or_insert(0) += ms;
    }

    pub fn count_contravened_constraint(&mut self) {
        *self.contravened_constraint_count.get_or_insert(0) += 1;
    }

    pub fn count_visit(&mut self) {
        *self.visit_count.get_or_insert(0) += 1;
    }

    pub fn count_value_change(&mut self) {
        *self.value_change_count.get_or_insert(0) += 1;
    }
}

/// Aggregated log metrics for one instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMetrics {
    /// Logging version from the first line, e.g. `v1.2`
    pub log_version: Option<String>,
    /// Total time between resume and pause (milliseconds)
    pub resumed_ms: i64,
    /// Total time between pause and resume (milliseconds)
    pub paused_ms: i64,
    /// Paused time made up of pauses under the short break threshold
    pub short_break_ms: i64,
    pub save_count: u32,
    /// Prompt screens entered
    pub enter_count: u32,
    /// Related forms that removed themselves (`rS`)
    pub relation_self_destruct_count: u32,
    /// Per-prompt metrics, keyed by tracked prompt name
    pub prompts: BTreeMap<String, PromptMetrics>,
    /// Prompts visited but not in the tracked list
    pub uncaptured_prompts: BTreeSet<String>,
}

impl InstanceMetrics {
    pub fn prompt(&self, name: &str) -> Option<&PromptMetrics> {
        self.prompts.get(name)
    }

    pub(crate) fn prompt_mut(&mut self, name: &str) -> &mut PromptMetrics {
        self.prompts.entry(name.to_string()).or_default()
    }
}

/// Result of analyzing one log
#[derive(Debug, Clone, Serialize)]
pub struct LogAnalysis {
    pub metrics: InstanceMetrics,
    pub events: Vec<Event>,
    pub diagnostics: Vec<Diagnostic>,
    /// Rows that made it into events (synthetic pauses excluded)
    pub row_count: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_metrics_start_absent() {
        let mut metrics = PromptMetrics::default();
        assert_eq!(metrics.visit_count, None);

        metrics.count_visit();
        metrics.count_visit();
        metrics.add_resumed(1500);
        assert_eq!(metrics.visit_count, Some(2));
        assert_eq!(metrics.resumed_ms, Some(1500));
        assert_eq!(metrics.short_break_ms, None);
    }

    #[test]
    fn test_prompt_mut_creates_entry() {
        let mut metrics = InstanceMetrics::default();
        assert!(metrics.prompt("age").is_none());

        metrics.prompt_mut("age").count_value_change();
        assert_eq!(metrics.prompt("age").unwrap().value_change_count, Some(1));
    }
}
