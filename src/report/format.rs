/// Formats seconds as `1h2m3s`. Zero is `0s`; negative durations keep their
/// sign.
pub fn format_duration(seconds: f64) -> String {
    let negative = seconds < 0.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total = seconds.abs() as u64;
    let (hours, minutes, seconds) = (total / 3600, total / 60 % 60, total % 60);

    let mut result = String::new();
    if negative {
        result.push('-');
    }
    if hours > 0 {
        result.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        result.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 {
        result.push_str(&format!("{seconds}s"));
    }
    if result.is_empty() || result == "-" {
        result = "0s".to_string();
    }
    result
}

pub fn format_optional_duration(seconds: Option<f64>) -> String {
    seconds.map_or_else(|| "-".to_string(), format_duration)
}
