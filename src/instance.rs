//! One ODK instance folder
//!
//! An instance folder holds `submission.xml`, `log.txt` and any photos taken
//! during the interview. [`Instance::analyze`] gathers file sizes, extracts
//! configured XML tag values and runs log analysis. A missing or duplicated
//! file only skips the part of the analysis that needs it.

use crate::config::AnalysisConfig;
use crate::error::{AnalyticsError, Result};
use crate::pipeline::analyze_log_file;
use crate::types::InstanceMetrics;
use glob::MatchOptions;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info_span};

/// Log file name inside an instance folder
pub const LOG_FILE: &str = "log.txt";

/// Submission file name inside an instance folder
pub const XML_FILE: &str = "submission.xml";

const PHOTO_PATTERNS: [&str; 2] = ["*.[jJ][pP][gG]", "*.[jJ][pP][eE][gG]"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Everything recorded about one instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Instance {
    /// Folder name, normally the instance uuid
    pub folder: String,
    /// Bytes
    pub xml_size: u64,
    pub log_size: u64,
    /// Total bytes of all photos
    pub photo_size: u64,
    /// Configured tags found in `submission.xml`
    pub tag_data: BTreeMap<String, String>,
    pub metrics: InstanceMetrics,
}

impl Instance {
    /// Analyze the instance folder at `dir`.
    ///
    /// Never fails as a whole: each structural problem is logged and leaves
    /// its fields at their defaults.
    pub fn analyze(dir: &Path, config: &AnalysisConfig) -> Instance {
        let folder = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let span = info_span!("instance", folder = %folder);
        let _guard = span.enter();
        debug!("Beginning work");

        let mut instance = Instance {
            folder,
            ..Default::default()
        };

        let files = match InstanceFiles::discover(dir) {
            Ok(files) => files,
            Err(err) => {
                error!(%err, "Unable to list instance files");
                return instance;
            }
        };

        match files.sizes() {
            Ok((xml, log, photo)) => {
                instance.xml_size = xml;
                instance.log_size = log;
                instance.photo_size = photo;
            }
            Err(err) => error!(%err, "Unable to read file sizes"),
        }

        match single_file(dir, XML_FILE, &files.xml) {
            Ok(path) if !config.tags.is_empty() => match fs::read_to_string(path) {
                Ok(contents) => instance.tag_data = extract_tags(&contents, &config.tags),
                Err(err) => error!(%err, "Unable to read {}", XML_FILE),
            },
            Ok(_) => {}
            Err(err) => error!(%err),
        }

        match single_file(dir, LOG_FILE, &files.log) {
            Ok(path) => match analyze_log_file(path, config) {
                Ok(analysis) => instance.metrics = analysis.metrics,
                Err(err) => error!(%err, "Abandoned log analysis"),
            },
            Err(err) => error!(%err),
        }

        instance
    }
}

/// Files found in an instance folder
#[derive(Debug, Default)]
struct InstanceFiles {
    xml: Vec<PathBuf>,
    log: Vec<PathBuf>,
    photos: Vec<PathBuf>,
}

impl InstanceFiles {
    fn discover(dir: &Path) -> Result<Self> {
        Ok(Self {
            xml: find_files(dir, &[XML_FILE])?,
            log: find_files(dir, &[LOG_FILE])?,
            photos: find_files(dir, &PHOTO_PATTERNS)?,
        })
    }

    /// Total bytes of xml, log and photo files
    fn sizes(&self) -> Result<(u64, u64, u64)> {
        Ok((
            total_size(&self.xml)?,
            total_size(&self.log)?,
            total_size(&self.photos)?,
        ))
    }
}

/// All files in `dir` matching any of `patterns`
fn find_files(dir: &Path, patterns: &[&str]) -> Result<Vec<PathBuf>> {
    let base = PathBuf::from(glob::Pattern::escape(&dir.to_string_lossy()));
    let mut found = Vec::new();
    for pattern in patterns {
        let full = base.join(pattern);
        for entry in glob::glob_with(&full.to_string_lossy(), MATCH_OPTIONS)? {
            found.push(entry.map_err(|err| err.into_error())?);
        }
    }
    Ok(found)
}

fn total_size(files: &[PathBuf]) -> Result<u64> {
    let mut total = 0;
    for file in files {
        total += fs::metadata(file)?.len();
    }
    Ok(total)
}

fn single_file<'a>(dir: &Path, name: &str, found: &'a [PathBuf]) -> Result<&'a Path> {
    match found {
        [path] => Ok(path),
        _ => Err(AnalyticsError::FileCount {
            folder: dir.to_path_buf(),
            name: name.to_string(),
            found: found.len(),
        }),
    }
}

/// First `<tag>value</tag>` per tag, where the value holds no markup
pub fn extract_tags(contents: &str, tags: &[String]) -> BTreeMap<String, String> {
    tags.iter()
        .filter_map(|tag| {
            let tag_name = regex::escape(tag);
            let pattern = Regex::new(&format!("<{tag_name}>([^<>]+)</{tag_name}>")).ok()?;
            let value = pattern.captures(contents)?.get(1)?;
            Some((tag.clone(), value.as_str().to_string()))
        })
        .collect()
}
