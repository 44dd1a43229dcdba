//! Formatting helpers shared by the CLI and reports.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let now = Utc::now();
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Render a millisecond epoch in the session's offset.
pub fn format_millis(millis: i64, offset: FixedOffset) -> String {
    match offset.timestamp_millis_opt(millis).single() {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("<invalid {}>", millis),
    }
}

/// Format an optional ratio as a percentage, or "n/a" when undefined.
pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis_uses_offset() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        // 2024-01-01 12:00:00 UTC
        let millis = 1_704_110_400_000;
        assert_eq!(format_millis(millis, utc), "2024-01-01 12:00:00");
        assert_eq!(format_millis(millis, est), "2024-01-01 07:00:00");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(Some(0.5)), "50.0%");
        assert_eq!(format_rate(Some(1.0)), "100.0%");
        assert_eq!(format_rate(None), "n/a");
    }

    #[test]
    fn test_relative_time_recent() {
        let ts = Utc::now() - chrono::Duration::seconds(30);
        assert!(format_relative_time(ts).ends_with("s ago"));
    }
}
