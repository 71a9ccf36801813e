//! Output formatting for pool usage.
//!
//! - [`csv`] - CSV table of range usage
//! - [`terminal`] - Terminal summary with colors

mod csv;
mod terminal;

pub use csv::{print_usage_csv, usage_csv};
pub use terminal::{format_field, print_usage_summary, usage_line};
