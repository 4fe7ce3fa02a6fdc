//! ODK Analytics - Timing and interaction analytics for ODK Collect logs
//!
//! Turns the `log.txt` written by ODK Collect during an interview into
//! per-instance metrics through a deterministic pipeline: line validation →
//! event segmentation → single-pass aggregation → CSV export.
//!
//! ## Modules
//!
//! - **Log Pipeline**: Parse one log into events and aggregate instance metrics
//! - **Condense**: Analyze every instance folder of a form into one CSV file

pub mod aggregator;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod export;
pub mod instance;
pub mod parser;
pub mod pipeline;
pub mod schema;
pub mod segmenter;
pub mod types;

pub use aggregator::Aggregator;
pub use config::{AnalysisConfig, FormDefinition, Thresholds};
pub use diagnostics::Diagnostic;
pub use error::{AnalyticsError, Result};
pub use event::{Event, Stage};
pub use export::{analytics_header, condense_to_csv, instance_row, CondenseSummary};
pub use instance::Instance;
pub use parser::{LogParser, ParsedLog};
pub use pipeline::{analyze_log, analyze_log_file};
pub use segmenter::{advance, finalize, Segmenter, SegmenterState, Step};
pub use types::{InstanceMetrics, LogAnalysis, PromptMetrics};

// Schema exports
pub use schema::{Code, LogRow};

/// Crate version reported by the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
