//! Condense CLI - Command-line interface for ODK analytics
//!
//! Commands:
//! - run: Condense every instance of one form into an analytics CSV
//! - inspect: Analyze a single log.txt and print events, metrics and diagnostics
//! - header: Print the analytics CSV header for a form

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use odk_analytics::export::{analytics_header, plan_folders, write_analytics};
use odk_analytics::pipeline::analyze_log_file;
use odk_analytics::types::LogAnalysis;
use odk_analytics::{
    AnalysisConfig, AnalyticsError, Diagnostic, FormDefinition, Thresholds, VERSION,
};

/// Folder layout of ODK Briefcase Storage below the storage directory
const BRIEFCASE_STORAGE: &str = "ODK Briefcase Storage";

/// Condense - Intermediate analytics data from ODK Collect submissions
#[derive(Parser)]
#[command(name = "condense")]
#[command(author = "PMA Data Team")]
#[command(version = VERSION)]
#[command(about = "Condense ODK Collect logs into analytics CSV files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Condense all submissions of one form into an analytics CSV
    Run {
        /// A directory with a subdirectory called "ODK Briefcase Storage"
        #[arg(long)]
        storage_directory: PathBuf,

        /// Form definition JSON: {"form_id", "form_title", "prompts", "tags"}
        #[arg(long)]
        form: PathBuf,

        /// A directory to store output and export information
        #[arg(long)]
        export_directory: PathBuf,

        /// The file to write, usually with a ".csv" extension
        #[arg(long)]
        export_filename: String,

        /// Overwrite the output CSV instead of appending to it
        #[arg(long)]
        overwrite: bool,

        /// Interpret --storage-directory as the folder containing all instances
        #[arg(short, long)]
        storage_literal: bool,

        /// One of DEBUG, INFO, WARNING, ERROR (default DEBUG, or RUST_LOG)
        #[arg(long)]
        log_level: Option<String>,

        /// Log file name inside the export directory (default stderr)
        #[arg(long)]
        log_file: Option<String>,

        #[command(flatten)]
        thresholds: ThresholdArgs,
    },

    /// Analyze one log.txt and print what was found
    Inspect {
        /// Path to a log.txt
        #[arg(long)]
        log: PathBuf,

        /// Form definition JSON naming the prompts to report on
        #[arg(long)]
        form: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        thresholds: ThresholdArgs,
    },

    /// Print the analytics CSV header for a form
    Header {
        /// Form definition JSON
        #[arg(long)]
        form: PathBuf,
    },
}

/// Threshold overrides, in milliseconds
#[derive(clap::Args)]
struct ThresholdArgs {
    /// Split same-code rows further apart than this
    #[arg(long)]
    event_threshold: Option<i64>,

    /// Split relation rows further apart than this
    #[arg(long)]
    relation_threshold: Option<i64>,

    /// Pauses shorter than this count as short breaks
    #[arg(long)]
    short_break_threshold: Option<i64>,
}

impl ThresholdArgs {
    fn apply(&self, mut thresholds: Thresholds) -> Thresholds {
        if let Some(ms) = self.event_threshold {
            thresholds.event_ms = ms;
        }
        if let Some(ms) = self.relation_threshold {
            thresholds.relation_ms = ms;
        }
        if let Some(ms) = self.short_break_threshold {
            thresholds.short_break_ms = ms;
        }
        thresholds
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CondenseCliError> {
    match cli.command {
        Commands::Run {
            storage_directory,
            form,
            export_directory,
            export_filename,
            overwrite,
            storage_literal,
            log_level,
            log_file,
            thresholds,
        } => {
            init_logging(log_level.as_deref(), &export_directory, log_file.as_deref())?;
            let form = FormDefinition::from_path(&form)?;
            let config = AnalysisConfig::for_form(&form)
                .with_thresholds(thresholds.apply(Thresholds::default()));
            let instances_dir = if storage_literal {
                storage_directory
            } else {
                storage_directory
                    .join(BRIEFCASE_STORAGE)
                    .join("forms")
                    .join(&form.form_title)
                    .join("instances")
            };
            let output = export_directory.join(export_filename);
            cmd_run(&form, &config, &instances_dir, &output, overwrite)
        }
        Commands::Inspect {
            log,
            form,
            json,
            thresholds,
        } => {
            let config = match form {
                Some(path) => AnalysisConfig::for_form(&FormDefinition::from_path(&path)?),
                None => AnalysisConfig::default(),
            }
            .with_thresholds(thresholds.apply(Thresholds::default()));
            cmd_inspect(&log, &config, json)
        }
        Commands::Header { form } => {
            let form = FormDefinition::from_path(&form)?;
            cmd_header(&form)
        }
    }
}

/// Install the tracing subscriber for `run`
fn init_logging(
    log_level: Option<&str>,
    export_directory: &Path,
    log_file: Option<&str>,
) -> Result<(), CondenseCliError> {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level_directive(level)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
    };

    let result = match log_file {
        Some(name) => {
            let file = File::create(export_directory.join(name))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .try_init(),
    };
    result.map_err(|e| CondenseCliError::Logging(e.to_string()))
}

/// Map a level name to a filter directive; unknown names fall back to debug
fn level_directive(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "ERROR" => "error",
        "WARNING" | "WARN" => "warn",
        "INFO" => "info",
        _ => "debug",
    }
}

fn cmd_run(
    form: &FormDefinition,
    config: &AnalysisConfig,
    instances_dir: &Path,
    output: &Path,
    overwrite: bool,
) -> Result<(), CondenseCliError> {
    info!("Create logging record for form_id {:?}", form.form_id);
    let start = Instant::now();

    let header = analytics_header(&config.prompts, &config.tags);
    let plan = plan_folders(output, overwrite, instances_dir, &header)?;
    println!("{plan}");
    if plan.folders.is_empty() {
        return Ok(());
    }

    let summary = write_analytics(&plan, config)?;

    let message = format!(
        "Finished condensing data to {:?} for form_id {:?} after {} ({} instances)",
        output.display().to_string(),
        form.form_id,
        elapsed(start.elapsed().as_secs()),
        summary.instance_count
    );
    info!("{message}");
    println!("{message}");
    Ok(())
}

/// Seconds up to five minutes, minutes after that
fn elapsed(seconds: u64) -> String {
    if seconds > 300 {
        format!("{:.2} minutes", seconds as f64 / 60.0)
    } else {
        format!("{seconds} seconds")
    }
}

fn cmd_inspect(log: &Path, config: &AnalysisConfig, json: bool) -> Result<(), CondenseCliError> {
    let analysis = analyze_log_file(log, config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    print_report(&analysis);
    Ok(())
}

fn print_report(analysis: &LogAnalysis) {
    let metrics = &analysis.metrics;
    let timestamp = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };

    println!("Log Report");
    println!("==========");
    println!("Log version:  {}", metrics.log_version.as_deref().unwrap_or("unknown"));
    println!("Rows:         {}", analysis.row_count);
    println!("Events:       {}", analysis.events.len());
    println!("First:        {}", timestamp(analysis.first_timestamp));
    println!("Last:         {}", timestamp(analysis.last_timestamp));
    println!("Resumed:      {} ms", metrics.resumed_ms);
    println!("Paused:       {} ms", metrics.paused_ms);
    println!("Short break:  {} ms", metrics.short_break_ms);
    println!("Saves:        {}", metrics.save_count);
    println!("Screens:      {}", metrics.enter_count);
    println!("rS:           {}", metrics.relation_self_destruct_count);

    println!("\nEvents:");
    for event in &analysis.events {
        println!(
            "  {:<28} {:<8} {}..{}",
            event.to_string(),
            format!("{:?}", event.stage()),
            event.min_time(),
            event.max_time()
        );
    }

    if !metrics.prompts.is_empty() {
        println!("\nPrompts:");
        for (name, prompt) in &metrics.prompts {
            println!(
                "  - {}: time {:?} ms, visits {:?}, changes {:?}, CC {:?}, short break {:?} ms",
                name,
                prompt.resumed_ms,
                prompt.visit_count,
                prompt.value_change_count,
                prompt.contravened_constraint_count,
                prompt.short_break_ms
            );
        }
    }

    if !metrics.uncaptured_prompts.is_empty() {
        println!("\nUncaptured prompts:");
        for name in &metrics.uncaptured_prompts {
            println!("  - {name}");
        }
    }

    let (line_problems, sequence_problems): (Vec<_>, Vec<_>) = analysis
        .diagnostics
        .iter()
        .partition(|diagnostic| diagnostic.is_row_level());
    print_diagnostics("Line problems", &line_problems);
    print_diagnostics("Sequence problems", &sequence_problems);
}

fn print_diagnostics(title: &str, diagnostics: &[&Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    println!("\n{} ({}):", title, diagnostics.len());
    for diagnostic in diagnostics {
        println!("  - [{}] {}", diagnostic.kind(), diagnostic);
    }
}

fn cmd_header(form: &FormDefinition) -> Result<(), CondenseCliError> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    writer
        .write_record(analytics_header(&form.prompts, &form.tags))
        .map_err(AnalyticsError::from)?;
    writer.flush()?;
    Ok(())
}

// Error types

#[derive(Debug)]
enum CondenseCliError {
    Io(io::Error),
    Analytics(AnalyticsError),
    Json(serde_json::Error),
    Logging(String),
}

impl From<io::Error> for CondenseCliError {
    fn from(e: io::Error) -> Self {
        CondenseCliError::Io(e)
    }
}

impl From<AnalyticsError> for CondenseCliError {
    fn from(e: AnalyticsError) -> Self {
        CondenseCliError::Analytics(e)
    }
}

impl From<serde_json::Error> for CondenseCliError {
    fn from(e: serde_json::Error) -> Self {
        CondenseCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CondenseCliError> for CliError {
    fn from(e: CondenseCliError) -> Self {
        match e {
            CondenseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CondenseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CondenseCliError::Logging(message) => CliError {
                code: "LOGGING_ERROR".to_string(),
                message,
                hint: None,
            },
            CondenseCliError::Analytics(e) => {
                let (code, hint) = match &e {
                    AnalyticsError::InstancesDirNotFound(_) => (
                        "INSTANCES_NOT_FOUND",
                        Some("Check --storage-directory and --storage-literal arguments"),
                    ),
                    AnalyticsError::SchemaMismatch { .. } => (
                        "SCHEMA_MISMATCH",
                        Some("Analytics file schema mismatch. Use the --overwrite option"),
                    ),
                    AnalyticsError::FormDefinition(_) | AnalyticsError::Json(_) => (
                        "FORM_ERROR",
                        Some("Form definition needs form_id, form_title, prompts and tags"),
                    ),
                    AnalyticsError::Io(_) => ("IO_ERROR", Some("Check file paths and permissions")),
                    _ => ("ANALYTICS_ERROR", None),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("WARNING"), "warn");
        assert_eq!(level_directive("info"), "info");
        assert_eq!(level_directive("verbose"), "debug");
    }

    #[test]
    fn test_elapsed() {
        assert_eq!(elapsed(42), "42 seconds");
        assert_eq!(elapsed(600), "10.00 minutes");
    }

    #[test]
    fn test_threshold_overrides() {
        let args = ThresholdArgs {
            event_threshold: Some(1000),
            relation_threshold: None,
            short_break_threshold: Some(60_000),
        };
        let thresholds = args.apply(Thresholds::default());
        assert_eq!(thresholds.event_ms, 1000);
        assert_eq!(thresholds.relation_ms, 60_000);
        assert_eq!(thresholds.short_break_ms, 60_000);
    }

    #[test]
    fn test_schema_mismatch_error_code() {
        let error = CliError::from(CondenseCliError::from(AnalyticsError::SchemaMismatch {
            existing: Some("a".to_string()),
            proposed: None,
        }));
        assert_eq!(error.code, "SCHEMA_MISMATCH");
        assert!(error.hint.is_some());
    }
}
