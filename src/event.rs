//! Events: runs of consecutive log rows sharing one code
//!
//! An [`Event`] is built by closing an open [`Run`]. Its time bounds,
//! monotonicity flag and [`Stage`] are fixed at that point.

use crate::schema::{is_bookend_xpath, Code, LogRow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

static PROMPT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|/)([^/]+)\[1\]$").unwrap());

/// Part of the questionnaire an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Form-relation bookkeeping
    Relation,
    /// Beginning or end of the questionnaire
    Bookend,
    /// An answerable prompt
    Question,
    /// Rows disagree on whether they are bookend rows
    Error,
}

impl Stage {
    /// Classify an event from its code and the xpaths of its rows
    pub fn classify<'a>(code: &Code, xpaths: impl IntoIterator<Item = &'a str>) -> Stage {
        if code.is_relation() {
            return Stage::Relation;
        }

        let (mut bookend, mut other) = (0usize, 0usize);
        for xpath in xpaths {
            if is_bookend_xpath(xpath) {
                bookend += 1;
            } else {
                other += 1;
            }
        }

        if code.is_bookend() || (bookend > 0 && other == 0) {
            Stage::Bookend
        } else if bookend == 0 {
            Stage::Question
        } else {
            Stage::Error
        }
    }
}

/// Prompt name for an xpath: the segment before a trailing `[1]`, if any
pub fn prompt_name(xpath: &str) -> &str {
    PROMPT_PATTERN
        .captures(xpath)
        .and_then(|captures| captures.get(2))
        .map_or(xpath, |m| m.as_str())
}

/// Rows accumulated for an event that has not been closed yet
#[derive(Debug, Clone)]
pub(crate) struct Run {
    rows: Vec<LogRow>,
    min_time: i64,
    max_time: i64,
    increasing: bool,
}

impl Run {
    pub(crate) fn start(row: LogRow) -> Self {
        Self {
            min_time: row.timestamp,
            max_time: row.timestamp,
            increasing: true,
            rows: vec![row],
        }
    }

    pub(crate) fn code(&self) -> &Code {
        &self.rows[0].code
    }

    /// Timestamp of the first row
    pub(crate) fn start_time(&self) -> i64 {
        self.rows[0].timestamp
    }

    /// Line of the last row
    pub(crate) fn end_line(&self) -> usize {
        self.rows[self.rows.len() - 1].line
    }

    pub(crate) fn push(&mut self, row: LogRow) {
        let last_time = self.rows[self.rows.len() - 1].timestamp;
        self.min_time = self.min_time.min(row.timestamp);
        self.max_time = self.max_time.max(row.timestamp);
        self.increasing = self.increasing && row.timestamp >= last_time;
        self.rows.push(row);
    }

    pub(crate) fn close(self) -> Event {
        let stage = Stage::classify(self.code(), self.rows.iter().map(|r| r.xpath.as_str()));
        Event {
            start_line: self.rows[0].line,
            min_time: self.min_time,
            max_time: self.max_time,
            increasing: self.increasing,
            stage,
            synthetic: false,
            rows: self.rows,
        }
    }
}

/// A maximal run of consecutive rows with the same code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    rows: Vec<LogRow>,
    start_line: usize,
    min_time: i64,
    max_time: i64,
    increasing: bool,
    stage: Stage,
    synthetic: bool,
}

impl Event {
    /// Build one event from rows, taking the code of the first row.
    ///
    /// Returns `None` for an empty row list.
    pub fn from_rows(rows: impl IntoIterator<Item = LogRow>) -> Option<Event> {
        let mut rows = rows.into_iter();
        let mut run = Run::start(rows.next()?);
        for row in rows {
            run.push(row);
        }
        Some(run.close())
    }

    pub fn rows(&self) -> &[LogRow] {
        &self.rows
    }

    pub fn code(&self) -> &Code {
        &self.rows[0].code
    }

    pub fn start_line(&self) -> usize {
        self.start_line
    }

    /// Line of the last row
    pub fn end_line(&self) -> usize {
        self.rows[self.rows.len() - 1].line
    }

    pub fn min_time(&self) -> i64 {
        self.min_time
    }

    pub fn max_time(&self) -> i64 {
        self.max_time
    }

    pub fn delta(&self) -> i64 {
        self.max_time - self.min_time
    }

    /// Whether row timestamps never decrease
    pub fn is_increasing(&self) -> bool {
        self.increasing
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// True for pauses inserted to repair a missing `oP`
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Number of log rows merged into this event
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// One prompt name per row, in row order
    pub fn prompts(&self) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(|row| prompt_name(&row.xpath))
    }

    pub fn prompt_set(&self) -> BTreeSet<&str> {
        self.prompts().collect()
    }

    /// Strictly before `other`, with no overlap in time
    pub fn precedes(&self, other: &Event) -> bool {
        self.max_time < other.min_time
    }

    /// Strictly after `other`, with no overlap in time
    pub fn follows(&self, other: &Event) -> bool {
        self.min_time > other.max_time
    }

    /// Time from the end of `earlier` to the start of this event
    pub fn gap_since(&self, earlier: &Event) -> i64 {
        self.min_time - earlier.max_time
    }

    /// A synthetic `oP` placed 1 ms after this event ends.
    ///
    /// The copy keeps this event's rows (xpaths, values, line numbers) and
    /// stage; only code and timestamps change.
    pub fn pause_after(&self) -> Event {
        let time = self.max_time + 1;
        let rows = self
            .rows
            .iter()
            .map(|row| LogRow {
                timestamp: time,
                code: Code::Pause,
                ..row.clone()
            })
            .collect();
        Event {
            rows,
            start_line: self.end_line(),
            min_time: time,
            max_time: time,
            increasing: true,
            stage: self.stage,
            synthetic: true,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(@{} for {}", self.code(), self.start_line, self.rows.len())?;
        if self.synthetic {
            write!(f, ", synthetic")?;
        }
        write!(f, ")")
    }
}
