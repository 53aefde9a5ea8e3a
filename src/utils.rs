pub fn format_duration(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if mins > 0 {
        parts.push(format!("{}m", mins));
    }
    if secs > 0 || (days == 0 && hours == 0 && mins == 0) {
        parts.push(format!("{}s", secs));
    }

    parts.join(" ")
}

/// Like [`format_duration`], but keeps millisecond precision below a minute.
pub fn format_micros(micros: u64) -> String {
    if micros < 1_000_000 {
        return format!("{}ms", micros / 1_000);
    }

    let seconds = micros / 1_000_000;
    let millis = (micros % 1_000_000) / 1_000;
    if seconds >= 60 || millis == 0 {
        return format_duration(seconds);
    }

    let fraction = format!("{:03}", millis);
    format!("{}.{}s", seconds, fraction.trim_end_matches('0'))
}
