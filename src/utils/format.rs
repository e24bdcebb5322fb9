//! Human-readable formatting for listing tables and progress lines

/// `mm:ss`, or `hh:mm:ss` past an hour; "Unknown" when the listing had no duration
pub fn format_duration(seconds: Option<u64>) -> String {
    let Some(total) = seconds else {
        return "Unknown".to_string();
    };

    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Compact view count: `950`, `1.2K`, `3.4M`
pub fn format_view_count(views: Option<u64>) -> String {
    match views {
        None | Some(0) => "Unknown".to_string(),
        Some(n) if n >= 1_000_000 => format!("{:.1}M", n as f64 / 1_000_000.0),
        Some(n) if n >= 1_000 => format!("{:.1}K", n as f64 / 1_000.0),
        Some(n) => n.to_string(),
    }
}

/// Truncate to `max` characters, ending in "..." when shortened
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Fixed-width text progress bar for the CLI
pub fn progress_bar(fraction: f64, width: usize) -> String {
    let fraction = fraction.clamp(0.0, 1.0);
    let filled = (fraction * width as f64).round() as usize;
    format!(
        "[{}{}] {:5.1}%",
        "#".repeat(filled),
        "-".repeat(width - filled),
        fraction * 100.0
    )
}
