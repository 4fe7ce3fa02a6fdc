//! Pipeline orchestration
//!
//! This module provides the public API for log analysis.
//! It runs the full pipeline from raw `log.txt` text to [`LogAnalysis`].

use crate::aggregator::Aggregator;
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::parser::{LogParser, ParsedLog};
use crate::types::LogAnalysis;
use chrono::DateTime;
use std::path::Path;

/// Analyze the text of one ODK Collect log.
///
/// # Arguments
/// * `log` - Contents of a `log.txt`
/// * `config` - Thresholds plus the prompts to report on
///
/// # Returns
/// Instance metrics together with the events and diagnostics behind them
///
/// # Example
/// ```ignore
/// let config = AnalysisConfig::new(vec!["age".to_string()], Vec::new());
/// let analysis = analyze_log(&std::fs::read_to_string("log.txt")?, &config)?;
/// println!("{} ms on screen", analysis.metrics.resumed_ms);
/// ```
pub fn analyze_log(log: &str, config: &AnalysisConfig) -> Result<LogAnalysis> {
    let parsed = LogParser::new(config.thresholds).parse_str(log)?;
    Ok(analyze_parsed(parsed, config))
}

/// Analyze the log file at `path`.
///
/// Fails only when the file cannot be read; problems inside the log become
/// diagnostics.
pub fn analyze_log_file(path: &Path, config: &AnalysisConfig) -> Result<LogAnalysis> {
    let parsed = LogParser::new(config.thresholds).parse_path(path)?;
    Ok(analyze_parsed(parsed, config))
}

/// Run aggregation over already segmented events.
///
/// Pipeline stages:
/// 1. LogParser - Validate lines and segment rows into events
/// 2. Aggregator - Walk events once and accumulate metrics
fn analyze_parsed(parsed: ParsedLog, config: &AnalysisConfig) -> LogAnalysis {
    let ParsedLog {
        version,
        events,
        mut diagnostics,
    } = parsed;

    let original = || events.iter().filter(|event| !event.is_synthetic());
    let row_count = original().map(|event| event.row_count()).sum();
    let first = original().map(|event| event.min_time()).min();
    let last = original().map(|event| event.max_time()).max();

    let (mut metrics, aggregate_diagnostics) =
        Aggregator::aggregate(config.thresholds, &config.prompts, events.iter().cloned());
    metrics.log_version = version;
    diagnostics.extend(aggregate_diagnostics);

    LogAnalysis {
        metrics,
        events,
        diagnostics,
        row_count,
        first_timestamp: first.and_then(DateTime::from_timestamp_millis),
        last_timestamp: last.and_then(DateTime::from_timestamp_millis),
    }
}
