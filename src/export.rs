//! CSV export of instance analytics
//!
//! One row per instance folder. An existing output file is appended to only
//! when its header matches the header for the current form; folders already
//! present in it are skipped.

use crate::config::AnalysisConfig;
use crate::error::{AnalyticsError, Result};
use crate::instance::Instance;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Columns common to every form
pub const BASE_COLUMNS: [&str; 11] = [
    "dir_uuid",
    "log_version",
    "xml_size_kb",
    "log_size_kb",
    "photo_size_kb",
    "resumed",
    "paused",
    "short_break",
    "save_count",
    "screen_count",
    "rS",
];

/// Per-prompt column suffixes, in order
pub const PROMPT_SUFFIXES: [&str; 5] = ["CC", "time", "visits", "delta", "sb"];

/// Header for a form: base columns, then tags, then five columns per prompt
pub fn analytics_header(prompts: &[String], tags: &[String]) -> Vec<String> {
    let mut header: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    header.extend(tags.iter().cloned());
    for prompt in prompts {
        header.extend(PROMPT_SUFFIXES.iter().map(|suffix| format!("{prompt}_{suffix}")));
    }
    header
}

/// CSV cells for one instance, aligned with [`analytics_header`].
///
/// Durations are whole seconds and sizes whole kilobytes, both truncated.
/// Absent values are empty cells.
pub fn instance_row(instance: &Instance, prompts: &[String], tags: &[String]) -> Vec<String> {
    let metrics = &instance.metrics;
    let mut row = vec![
        instance.folder.clone(),
        cell(metrics.log_version.as_ref()),
        (instance.xml_size / 1000).to_string(),
        (instance.log_size / 1000).to_string(),
        (instance.photo_size / 1000).to_string(),
        (metrics.resumed_ms / 1000).to_string(),
        (metrics.paused_ms / 1000).to_string(),
        (metrics.short_break_ms / 1000).to_string(),
        metrics.save_count.to_string(),
        metrics.enter_count.to_string(),
        metrics.relation_self_destruct_count.to_string(),
    ];

    row.extend(tags.iter().map(|tag| cell(instance.tag_data.get(tag))));

    for prompt in prompts {
        let found = metrics.prompt(prompt);
        row.push(cell(found.and_then(|p| p.contravened_constraint_count)));
        row.push(cell(found.and_then(|p| p.resumed_ms).map(|ms| ms / 1000)));
        row.push(cell(found.and_then(|p| p.visit_count)));
        row.push(cell(found.and_then(|p| p.value_change_count)));
        row.push(cell(found.and_then(|p| p.short_break_ms).map(|ms| ms / 1000)));
    }
    row
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Open an existing CSV for reading, or `None` when there is no file
fn open_existing(path: &Path) -> Result<Option<csv::Reader<File>>> {
    match File::open(path) {
        Ok(file) => Ok(Some(
            csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(file),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Folder names already recorded in the CSV at `path`.
///
/// Empty when the file does not exist.
pub fn previously_analyzed(path: &Path) -> Result<BTreeSet<String>> {
    let mut found = BTreeSet::new();
    let Some(mut reader) = open_existing(path)? else {
        return Ok(found);
    };
    for record in reader.records().skip(1) {
        if let Some(folder) = record?.get(0) {
            found.insert(folder.to_string());
        }
    }
    Ok(found)
}

/// First column where an existing CSV header and a proposed header differ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMismatch {
    /// Column in the file, `None` past its end
    pub existing: Option<String>,
    /// Column in the proposed header, `None` past its end
    pub proposed: Option<String>,
}

impl From<ColumnMismatch> for AnalyticsError {
    fn from(mismatch: ColumnMismatch) -> Self {
        AnalyticsError::SchemaMismatch {
            existing: mismatch.existing,
            proposed: mismatch.proposed,
        }
    }
}

/// Compare the header of the CSV at `path` against `header`.
///
/// A missing or empty file never mismatches.
pub fn schema_mismatch(path: &Path, header: &[String]) -> Result<Option<ColumnMismatch>> {
    let Some(mut reader) = open_existing(path)? else {
        return Ok(None);
    };
    let Some(first) = reader.records().next() else {
        return Ok(None);
    };
    let first = first?;

    let width = first.len().max(header.len());
    for i in 0..width {
        let existing = first.get(i);
        let proposed = header.get(i).map(String::as_str);
        if existing != proposed {
            let mismatch = ColumnMismatch {
                existing: existing.map(str::to_string),
                proposed: proposed.map(str::to_string),
            };
            error!(
                "Header mismatch at {:?} (CSV) and {:?} (new)",
                mismatch.existing, mismatch.proposed
            );
            return Ok(Some(mismatch));
        }
    }
    Ok(None)
}

/// How the output file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Overwrite,
    Append,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Overwrite => write!(f, "overwrite"),
            WriteMode::Append => write!(f, "append"),
        }
    }
}

/// Instance folders to analyze and where their rows go
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub output: PathBuf,
    pub instances_dir: PathBuf,
    pub mode: WriteMode,
    /// Folders to analyze, sorted by path
    pub folders: Vec<PathBuf>,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.folders.len();
        if count == 0 {
            return write!(f, "All up to date. No new instances to analyze.");
        }
        let which = match self.mode {
            WriteMode::Overwrite => "all",
            WriteMode::Append => "new",
        };
        writeln!(
            f,
            "Analyzing {which} {count} instances downloaded into {}",
            self.instances_dir.display()
        )?;
        write!(
            f,
            "Intended output file with {}: {}",
            self.mode,
            self.output.display()
        )
    }
}

/// Decide which instance folders to analyze.
///
/// With `overwrite` every subfolder of `instances_dir` is planned. Otherwise
/// the existing output must have a matching header, and folders it already
/// lists are skipped.
pub fn plan_folders(
    output: &Path,
    overwrite: bool,
    instances_dir: &Path,
    header: &[String],
) -> Result<Plan> {
    if !instances_dir.is_dir() {
        return Err(AnalyticsError::InstancesDirNotFound(instances_dir.to_path_buf()));
    }

    let (mode, done) = if overwrite {
        (WriteMode::Overwrite, BTreeSet::new())
    } else {
        if let Some(mismatch) = schema_mismatch(output, header)? {
            return Err(mismatch.into());
        }
        (WriteMode::Append, previously_analyzed(output)?)
    };

    let mut folders = Vec::new();
    for entry in fs::read_dir(instances_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if done.contains(&*entry.file_name().to_string_lossy()) {
            continue;
        }
        folders.push(entry.path());
    }
    folders.sort();

    Ok(Plan {
        output: output.to_path_buf(),
        instances_dir: instances_dir.to_path_buf(),
        mode,
        folders,
    })
}

/// Outcome of writing one batch of instances
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CondenseSummary {
    pub instance_count: usize,
    /// Prompts visited in some instance but absent from the form's prompts
    pub uncaptured_prompts: BTreeSet<String>,
}

/// Analyze every planned folder and write one row each.
///
/// The header is written only when the output starts out empty.
pub fn write_analytics(plan: &Plan, config: &AnalysisConfig) -> Result<CondenseSummary> {
    let mut summary = CondenseSummary::default();
    if plan.folders.is_empty() {
        return Ok(summary);
    }

    let mut options = OpenOptions::new();
    match plan.mode {
        WriteMode::Overwrite => options.write(true).create(true).truncate(true),
        WriteMode::Append => options.append(true).create(true),
    };
    let file = options.open(&plan.output)?;
    let empty = file.metadata()?.len() == 0;

    let mut writer = csv::Writer::from_writer(file);
    if empty {
        writer.write_record(analytics_header(&config.prompts, &config.tags))?;
    }

    for folder in &plan.folders {
        let instance = Instance::analyze(folder, config);
        writer.write_record(instance_row(&instance, &config.prompts, &config.tags))?;
        summary
            .uncaptured_prompts
            .extend(instance.metrics.uncaptured_prompts);
        summary.instance_count += 1;
    }
    writer.flush()?;

    if !summary.uncaptured_prompts.is_empty() {
        info!(
            "From instances in {}, discovered {} uncaptured prompts: {:?}",
            plan.instances_dir.display(),
            summary.uncaptured_prompts.len(),
            summary.uncaptured_prompts
        );
    }
    Ok(summary)
}

/// Plan and write in one step
pub fn condense_to_csv(
    output: &Path,
    overwrite: bool,
    instances_dir: &Path,
    config: &AnalysisConfig,
) -> Result<CondenseSummary> {
    let header = analytics_header(&config.prompts, &config.tags);
    let plan = plan_folders(output, overwrite, instances_dir, &header)?;
    write_analytics(&plan, config)
}
