//! Anomaly diagnostics
//!
//! Data-quality and sequence problems found while reading a log never abort
//! the analysis. Each one is logged as a warning and kept as a typed
//! [`Diagnostic`] so callers can report on it.

use crate::schema::RowRejection;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One anomaly found in a log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    EmptyLine { line: usize },
    WrongFieldCount { line: usize, fields: usize },
    MalformedLine { line: usize },
    MissingVersion,
    /// A run of a non-repeatable code was split only because of time
    TimeSplit { code: String, line: usize },
    /// Timestamps inside one event go backwards
    NotIncreasing { start_line: usize, end_line: usize },
    FirstNotResume { code: String, line: usize },
    /// A second resume arrived before any pause; a pause was synthesized
    ResumeWithoutPause { line: usize },
    OutOfOrder { previous: String, current: String },
    UnknownStage { event: String },
    ConsecutiveResume { first: String, second: String },
    PauseBeforeResume { event: String },
    ConsecutivePause { first: String, second: String },
    LargeResumedTime {
        from: String,
        to: String,
        resumed_ms: i64,
    },
    UnmatchedEnterExit { enter: String, leave: String },
}

impl Diagnostic {
    /// Stable identifier used as a structured logging field
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::EmptyLine { .. } => "empty_line",
            Diagnostic::WrongFieldCount { .. } => "wrong_field_count",
            Diagnostic::MalformedLine { .. } => "malformed_line",
            Diagnostic::MissingVersion => "missing_version",
            Diagnostic::TimeSplit { .. } => "time_split",
            Diagnostic::NotIncreasing { .. } => "not_increasing",
            Diagnostic::FirstNotResume { .. } => "first_not_resume",
            Diagnostic::ResumeWithoutPause { .. } => "resume_without_pause",
            Diagnostic::OutOfOrder { .. } => "out_of_order",
            Diagnostic::UnknownStage { .. } => "unknown_stage",
            Diagnostic::ConsecutiveResume { .. } => "consecutive_resume",
            Diagnostic::PauseBeforeResume { .. } => "pause_before_resume",
            Diagnostic::ConsecutivePause { .. } => "consecutive_pause",
            Diagnostic::LargeResumedTime { .. } => "large_resumed_time",
            Diagnostic::UnmatchedEnterExit { .. } => "unmatched_enter_exit",
        }
    }

    /// True for problems with a single line rather than the event sequence
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            Diagnostic::EmptyLine { .. }
                | Diagnostic::WrongFieldCount { .. }
                | Diagnostic::MalformedLine { .. }
                | Diagnostic::MissingVersion
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::EmptyLine { line } => write!(f, "Empty line: {line}"),
            Diagnostic::WrongFieldCount { line, fields } => {
                write!(f, "Line with incorrect length ({fields} fields): {line}")
            }
            Diagnostic::MalformedLine { line } => write!(f, "Incorrectly formatted line: {line}"),
            Diagnostic::MissingVersion => write!(f, "No logging version in first line"),
            Diagnostic::TimeSplit { code, line } => {
                write!(f, "Event split ({code}) based on time threshold at line {line}")
            }
            Diagnostic::NotIncreasing {
                start_line,
                end_line,
            } => write!(f, "Event times not increasing at lines {start_line}-{end_line}"),
            Diagnostic::FirstNotResume { code, line } => {
                write!(f, "First non-relation event ({code}) not oR at line {line}")
            }
            Diagnostic::ResumeWithoutPause { line } => write!(f, "oR, oR without oP at line {line}"),
            Diagnostic::OutOfOrder { previous, current } => {
                write!(f, "Out of order events: {previous} and {current}")
            }
            Diagnostic::UnknownStage { event } => write!(f, "Unknown event stage: {event}"),
            Diagnostic::ConsecutiveResume { first, second } => {
                write!(f, "Still oR, oR ({first} and {second}) without oP")
            }
            Diagnostic::PauseBeforeResume { event } => write!(f, "Before first oR, found oP: {event}"),
            Diagnostic::ConsecutivePause { first, second } => {
                write!(f, "oP, oP ({first} and {second}) without oR")
            }
            Diagnostic::LargeResumedTime {
                from,
                to,
                resumed_ms,
            } => write!(
                f,
                "Large resumed time ({resumed_ms} ms) between {from} and {to}"
            ),
            Diagnostic::UnmatchedEnterExit { enter, leave } => {
                write!(f, "Unmatched enter/exit event: {enter}, {leave}")
            }
        }
    }
}

impl From<RowRejection> for Diagnostic {
    fn from(rejection: RowRejection) -> Self {
        match rejection {
            RowRejection::Empty { line } => Diagnostic::EmptyLine { line },
            RowRejection::WrongFieldCount { line, fields } => {
                Diagnostic::WrongFieldCount { line, fields }
            }
            RowRejection::Malformed { line } => Diagnostic::MalformedLine { line },
        }
    }
}

/// Accumulates diagnostics, logging each one as it is recorded
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(kind = diagnostic.kind(), "{}", diagnostic);
        self.items.push(diagnostic);
    }

    /// Append diagnostics that were already logged elsewhere
    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.items.extend(diagnostics);
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}
