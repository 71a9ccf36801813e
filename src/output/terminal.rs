//! Terminal output utilities.
//!
//! Provides formatting helpers and a coloured usage summary.

use crate::processing::RangeUsage;
use colored::Colorize;

/// Format a value as a quoted, right-aligned field.
///
/// # Arguments
/// * `value` - The value to format
/// * `width` - The minimum width of the field
///
/// # Returns
/// A quoted, right-aligned string
pub fn format_field<T: ToString>(value: T, width: usize) -> String {
    let value_str = value.to_string();
    let quoted = format!("\"{value_str}\"");
    let quoted_len = quoted.len();

    if quoted_len >= width {
        quoted
    } else {
        format!("{quoted:>width$}")
    }
}

/// One plain-text line describing a range's fill level.
pub fn usage_line(usage: &RangeUsage) -> String {
    format!(
        "{range}: {claimed}/{total} claimed, {free} free",
        range = usage.range,
        claimed = usage.claimed.len(),
        total = usage.total,
        free = usage.free()
    )
}

/// Print one line per range plus a total, exhausted ranges in red.
pub fn print_usage_summary(usage: &[RangeUsage]) {
    log::info!("Storage pool summary for {} ranges", usage.len());
    for row in usage {
        let status = if row.total > 0 && row.free() == 0 {
            "FULL".on_red()
        } else if row.claimed.is_empty() {
            "FREE".green()
        } else {
            "IN USE".yellow()
        };
        println!("{status} {}", usage_line(row));
    }

    let total: u64 = usage.iter().map(|row| row.total).sum();
    let free: u64 = usage.iter().map(RangeUsage::free).sum();
    println!(
        "{} {} ranges, {total} addresses, {free} free",
        "TOTAL".bold(),
        usage.len()
    );
}
