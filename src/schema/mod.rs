//! Input schema of ODK Collect interaction logs
//!
//! This module defines the row format of `log.txt`, its validation rules and
//! the closed set of event codes the analysis understands.

mod code;
mod log_row;

pub use code::*;
pub use log_row::*;
