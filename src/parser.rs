//! Log file reading
//!
//! Reads `log.txt` line by line as tab-separated fields, validates each line,
//! extracts the version stamp and drives the segmenter over the surviving rows.
//! A line that is not valid UTF-8 is rejected like any other malformed line.

use crate::config::Thresholds;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::Result;
use crate::event::Event;
use crate::schema::{parse_fields, LogLine, RowRejection};
use crate::segmenter::{advance, finalize, SegmenterState};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Events and diagnostics recovered from one log
#[derive(Debug, Clone, Default)]
pub struct ParsedLog {
    /// Logging version from the first line, e.g. `v1.2`
    pub version: Option<String>,
    pub events: Vec<Event>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parser for ODK Collect interaction logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogParser {
    thresholds: Thresholds,
}

impl LogParser {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Parse the log at `path`.
    ///
    /// The file handle is released before returning, on success or error.
    pub fn parse_path(&self, path: &Path) -> Result<ParsedLog> {
        let file = File::open(path)?;
        self.parse_reader(BufReader::new(file))
    }

    pub fn parse_str(&self, log: &str) -> Result<ParsedLog> {
        self.parse_reader(log.as_bytes())
    }

    /// Parse tab-separated lines from `reader`.
    ///
    /// Fields are split on tabs only; quote characters are literal.
    pub fn parse_reader<R: BufRead>(&self, reader: R) -> Result<ParsedLog> {
        let mut diagnostics = Diagnostics::new();
        let mut state = SegmenterState::default();
        let mut events = Vec::new();
        let mut version = None;
        let mut seen_lines = 0;

        for (index, bytes) in reader.split(b'\n').enumerate() {
            let bytes = bytes?;
            let line = index + 1;
            seen_lines = line;

            let parsed = match String::from_utf8(bytes) {
                Ok(text) => {
                    let text = text.strip_suffix('\r').unwrap_or(&text);
                    let fields: Vec<&str> = if text.is_empty() {
                        Vec::new()
                    } else {
                        text.split('\t').collect()
                    };
                    parse_fields(&fields, line)
                }
                Err(_) => Err(RowRejection::Malformed { line }),
            };
            if line == 1 && !matches!(parsed, Ok(LogLine::VersionStamp(Some(_)))) {
                diagnostics.warn(Diagnostic::MissingVersion);
            }

            match parsed {
                Ok(LogLine::VersionStamp(stamp)) => version = stamp,
                Ok(LogLine::Row(row)) => {
                    let step = advance(&self.thresholds, state, row);
                    state = step.state;
                    events.extend(step.events);
                    diagnostics.extend(step.diagnostics);
                }
                Err(rejection) => diagnostics.warn(rejection.into()),
            }
        }

        if seen_lines == 0 {
            diagnostics.warn(Diagnostic::MissingVersion);
        }

        let step = finalize(state);
        events.extend(step.events);
        diagnostics.extend(step.diagnostics);

        Ok(ParsedLog {
            version,
            events,
            diagnostics: diagnostics.into_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Code;
    use std::io::Write;

    const LOG: &str = "# ODK Collect log v1.2\n\
        1500000000000\toR\tnull\t\n\
        1500000000100\tEP\t/data/age[1]\t\n\
        1500000000150\tEP\t/data/name[1]\t\n\
        1500000003000\tLP\t/data/age[1]\t34\n\
        1500000004000\toP\tnull\t\n";

    #[test]
    fn test_parse_well_formed_log() {
        let parsed = LogParser::default().parse_str(LOG).unwrap();

        assert_eq!(parsed.version.as_deref(), Some("v1.2"));
        let codes: Vec<&Code> = parsed.events.iter().map(|e| e.code()).collect();
        assert_eq!(
            codes,
            vec![&Code::Resume, &Code::EnterPrompt, &Code::LeavePrompt, &Code::Pause]
        );
        assert_eq!(parsed.events[1].row_count(), 2);
        assert_eq!(parsed.events[0].start_line(), 2);
        assert_eq!(parsed.events[2].rows()[0].value, "34");
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn test_malformed_line_skipped() {
        let log = "# ODK Collect log v1.2\n\
            1500000000000\toR\tnull\t\n\
            1500000000100\tEP\t/data/age[1]\n\
            1500000000200\tEP\t/data/name[1]\t\n";
        let parsed = LogParser::default().parse_str(log).unwrap();

        assert!(parsed
            .diagnostics
            .contains(&Diagnostic::WrongFieldCount { line: 3, fields: 3 }));
        assert!(parsed
            .events
            .iter()
            .flat_map(|e| e.rows())
            .all(|row| row.line != 3));
    }

    #[test]
    fn test_blank_lines_reported() {
        let log = "# ODK Collect log v1.2\n\
            1500000000000\toR\tnull\t\n\
            \n\
            1500000000100\tEP\t/data/age[1]\t\n";
        let parsed = LogParser::default().parse_str(log).unwrap();

        assert!(parsed.diagnostics.contains(&Diagnostic::EmptyLine { line: 3 }));
        assert_eq!(parsed.events[1].start_line(), 4);
    }

    #[test]
    fn test_missing_version() {
        let log = "1500000000000\toR\tnull\t\n";
        let parsed = LogParser::default().parse_str(log).unwrap();

        assert_eq!(parsed.version, None);
        assert_eq!(parsed.diagnostics[0], Diagnostic::MissingVersion);
        assert_eq!(parsed.events[0].code(), &Code::Resume);
    }

    #[test]
    fn test_comment_without_version() {
        let log = "# ODK Collect log\n1500000000000\toR\tnull\t\n";
        let parsed = LogParser::default().parse_str(log).unwrap();

        assert_eq!(parsed.version, None);
        assert_eq!(parsed.diagnostics[0], Diagnostic::MissingVersion);
        assert_eq!(parsed.events[0].start_line(), 2);
    }

    #[test]
    fn test_empty_log() {
        let parsed = LogParser::default().parse_str("").unwrap();
        assert!(parsed.events.is_empty());
        assert_eq!(parsed.diagnostics, vec![Diagnostic::MissingVersion]);
    }

    #[test]
    fn test_quotes_are_literal() {
        let log = "# v1.0\n1500000000000\tLP\t/data/note[1]\tsaid \"hi\"\n";
        let parsed = LogParser::default().parse_str(log).unwrap();
        assert_eq!(parsed.events[0].rows()[0].value, "said \"hi\"");
    }

    #[test]
    fn test_invalid_utf8_line_skipped() {
        let mut log = Vec::new();
        log.extend_from_slice(b"# ODK Collect log v1.2\n");
        log.extend_from_slice(b"1500000000000\toR\tnull\t\n");
        log.extend_from_slice(b"1500000000100\tEP\t/data/age[1]\t\n");
        log.extend_from_slice(b"1500000003000\tLP\t/data/age[1]\t\xff\xfe\n");
        log.extend_from_slice(b"1500000004000\toP\tnull\t\n");

        let parsed = LogParser::default().parse_reader(&log[..]).unwrap();

        assert_eq!(parsed.version.as_deref(), Some("v1.2"));
        assert_eq!(parsed.diagnostics, vec![Diagnostic::MalformedLine { line: 4 }]);
        let codes: Vec<&Code> = parsed.events.iter().map(|e| e.code()).collect();
        assert_eq!(codes, vec![&Code::Resume, &Code::EnterPrompt, &Code::Pause]);
    }

    #[test]
    fn test_parse_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LOG.as_bytes()).unwrap();

        let parsed = LogParser::default().parse_path(file.path()).unwrap();
        assert_eq!(parsed.version.as_deref(), Some("v1.2"));
        assert_eq!(parsed.events.len(), 4);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = LogParser::default().parse_path(Path::new("/nonexistent/log.txt"));
        assert!(result.is_err());
    }
}
