//! Human-readable formatting helpers.

/// Format bytes with base-1024 units, two decimals.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format a millisecond duration as e.g. `1m 30s`.
pub fn format_duration_ms(millis: u64) -> String {
    let seconds = millis / 1000;
    if seconds < 60 {
        format!("{}.{:01}s", seconds, (millis % 1000) / 100)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
