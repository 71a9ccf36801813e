//! CSV rendering of range usage.

use super::terminal::format_field;
use crate::processing::RangeUsage;
use itertools::Itertools;

const CSV_HEADER: &str = r#""range","pod","zone","vlan","start_ip","end_ip","netmask","gateway","total","claimed","claimed_ips""#;

/// Render usage as CSV, one row per range, header first.
///
/// # Arguments
/// * `usage` - Usage rows, as returned by `StoragePool::range_usage`
///
/// # Returns
/// The CSV text, newline terminated
pub fn usage_csv(usage: &[RangeUsage]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for row in usage {
        out.push_str(&csv_row(row));
        out.push('\n');
    }
    out
}

/// Print [`usage_csv`] to stdout.
pub fn print_usage_csv(usage: &[RangeUsage]) {
    log::info!("Printing usage of {} ranges as CSV", usage.len());
    print!("{}", usage_csv(usage));
}

fn csv_row(row: &RangeUsage) -> String {
    let range = &row.range;
    format!(
        "{id},{pod},{zone},{vlan},{start},{end},{netmask},{gateway},{total},{claimed},{claimed_ips}",
        id = format_field(range.id, 6),
        pod = format_field(range.pod_id, 6),
        zone = format_field(range.zone_id, 6),
        vlan = format_field(range.vlan.map_or("none".to_string(), |v| v.to_string()), 6),
        start = format_field(range.start_ip, 17),
        end = format_field(range.end_ip, 17),
        netmask = format_field(range.netmask, 17),
        gateway = format_field(range.gateway.map_or("none".to_string(), |g| g.to_string()), 17),
        total = format_field(row.total, 7),
        claimed = format_field(row.claimed.len(), 7),
        claimed_ips = format_field(row.claimed.iter().join(" "), 0),
    )
}
