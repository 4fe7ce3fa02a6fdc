//! Row-level schema of ODK Collect `log.txt`
//!
//! Each data line carries four tab-separated fields:
//! `timestamp` (13-digit epoch milliseconds), `code` (two word characters),
//! `xpath` (non-empty) and `value` (possibly empty). An optional first line
//! starting with `#` carries the logging version, e.g. `# ODK Collect log v1.2`.

use crate::schema::code::Code;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static TIMESTAMP_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{13}$").unwrap());

static CODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w{2}$").unwrap());

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"v[0-9]\.[0-9]$").unwrap());

/// Number of tab-separated fields in a data line
pub const FIELD_COUNT: usize = 4;

/// One validated data line of the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRow {
    /// 1-based line number in the source log
    pub line: usize,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub code: Code,
    pub xpath: String,
    pub value: String,
}

impl LogRow {
    pub fn new(
        line: usize,
        timestamp: i64,
        code: impl Into<Code>,
        xpath: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            line,
            timestamp,
            code: code.into(),
            xpath: xpath.into(),
            value: value.into(),
        }
    }
}

/// A line of the log that survived validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    /// A data row for the event stream
    Row(LogRow),
    /// The leading `#` comment, with the version found in it (if any)
    VersionStamp(Option<String>),
}

/// Reasons a line is kept out of the event stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowRejection {
    #[error("Empty line: {line}")]
    Empty { line: usize },

    #[error("Line with incorrect length: {line} ({fields} fields)")]
    WrongFieldCount { line: usize, fields: usize },

    #[error("Incorrectly formatted line: {line}")]
    Malformed { line: usize },
}

/// Validate the fields of one record found at 1-based `line`.
///
/// Only line 1 may carry the version stamp.
pub fn parse_fields(fields: &[&str], line: usize) -> Result<LogLine, RowRejection> {
    match fields {
        [] | [""] => Err(RowRejection::Empty { line }),
        [first, ..] if line == 1 && first.starts_with('#') => {
            Ok(LogLine::VersionStamp(version_stamp(first)))
        }
        [timestamp, code, xpath, value] => {
            if !TIMESTAMP_PATTERN.is_match(timestamp)
                || !CODE_PATTERN.is_match(code)
                || xpath.is_empty()
            {
                return Err(RowRejection::Malformed { line });
            }
            let timestamp = timestamp
                .parse::<i64>()
                .map_err(|_| RowRejection::Malformed { line })?;
            Ok(LogLine::Row(LogRow::new(line, timestamp, *code, *xpath, *value)))
        }
        _ => Err(RowRejection::WrongFieldCount {
            line,
            fields: fields.len(),
        }),
    }
}

/// Extract the logging version (e.g. `v1.2`) from the end of a comment line
pub fn version_stamp(comment: &str) -> Option<String> {
    VERSION_PATTERN
        .find(comment)
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_row() {
        let fields = ["1500000000000", "EP", "/data/age[1]", "23"];
        let parsed = parse_fields(&fields, 4).unwrap();
        assert_eq!(
            parsed,
            LogLine::Row(LogRow::new(4, 1_500_000_000_000, Code::EnterPrompt, "/data/age[1]", "23"))
        );
    }

    #[test]
    fn test_empty_value_is_valid() {
        let fields = ["1500000000000", "oR", "null", ""];
        assert!(matches!(parse_fields(&fields, 2), Ok(LogLine::Row(_))));
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(parse_fields(&[], 3), Err(RowRejection::Empty { line: 3 }));
        assert_eq!(parse_fields(&[""], 3), Err(RowRejection::Empty { line: 3 }));
    }

    #[test]
    fn test_three_fields_rejected() {
        let fields = ["1500000000000", "EP", "/data/age[1]"];
        assert_eq!(
            parse_fields(&fields, 6),
            Err(RowRejection::WrongFieldCount { line: 6, fields: 3 })
        );
    }

    #[test]
    fn test_malformed_fields_rejected() {
        let short_time = ["150000000000", "EP", "/data/age[1]", ""];
        let long_code = ["1500000000000", "EPX", "/data/age[1]", ""];
        let no_xpath = ["1500000000000", "EP", "", ""];
        for fields in [short_time, long_code, no_xpath] {
            assert_eq!(
                parse_fields(&fields, 2),
                Err(RowRejection::Malformed { line: 2 })
            );
        }
    }

    #[test]
    fn test_version_stamp_only_on_first_line() {
        let fields = ["# ODK Collect log v1.2"];
        assert_eq!(
            parse_fields(&fields, 1),
            Ok(LogLine::VersionStamp(Some("v1.2".to_string())))
        );
        assert!(parse_fields(&fields, 2).is_err());
    }

    #[test]
    fn test_version_stamp_missing() {
        assert_eq!(version_stamp("# ODK Collect log"), None);
        assert_eq!(version_stamp("# v1.2 trailing"), None);
    }
}
