//! Parse `df -h` style columnar output into typed records for the disk visualization.

use serde::{Deserialize, Serialize};

/// One filesystem line of disk-usage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskRecord {
    pub filesystem: String,
    pub size: String,
    pub used: String,
    pub avail: String,
    pub use_percent: f64,
    pub mounted_on: String,
    pub size_bytes: u64,
    pub used_bytes: u64,
    pub avail_bytes: u64,
}

/// Parse every line after the header. Lines that do not fit the column layout are skipped.
pub fn parse_disk_usage(output: &str) -> Vec<DiskRecord> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let record = parse_line(line);
            if record.is_none() && !line.trim().is_empty() {
                log::debug!("disk usage: skipping line {:?}", line);
            }
            record
        })
        .collect()
}

fn parse_line(line: &str) -> Option<DiskRecord> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 6 {
        return None;
    }
    let use_percent = tokens[4]
        .trim_end_matches('%')
        .parse::<f64>()
        .unwrap_or(0.0);
    Some(DiskRecord {
        filesystem: tokens[0].to_string(),
        size: tokens[1].to_string(),
        used: tokens[2].to_string(),
        avail: tokens[3].to_string(),
        use_percent,
        mounted_on: tokens[5..].join(" "),
        size_bytes: parse_size(tokens[1]),
        used_bytes: parse_size(tokens[2]),
        avail_bytes: parse_size(tokens[3]),
    })
}

/// Human-readable size (`1.5G`, `100m`) to bytes with binary multiples.
/// No unit, an unknown unit, `-` or an unparsable number all give 0.
pub fn parse_size(token: &str) -> u64 {
    let token = token.trim();
    let Some(unit) = token.chars().last() else {
        return 0;
    };
    let exponent = match unit.to_ascii_uppercase() {
        'K' => 1,
        'M' => 2,
        'G' => 3,
        'T' => 4,
        _ => return 0,
    };
    let number = &token[..token.len() - unit.len_utf8()];
    match number.parse::<f64>() {
        Ok(n) if n.is_finite() && n >= 0.0 => (n * 1024f64.powi(exponent)) as u64,
        _ => 0,
    }
}
