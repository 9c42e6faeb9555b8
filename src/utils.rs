use std::time::{SystemTime, UNIX_EPOCH};

/// Characters that are not allowed in file names on at least one common platform.
const ILLEGAL_FILENAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

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

pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec.max(0.0) as u64))
}

pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Drops characters illegal in file names and replaces whitespace with `_`.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let sanitized: String = name
        .trim()
        .chars()
        .filter(|c| !ILLEGAL_FILENAME_CHARS.contains(c) && !c.is_control())
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        None
    } else {
        Some(sanitized)
    }
}

/// A name for resources without any hint: unix seconds plus the content-type subtype.
pub fn generated_filename(content_type: Option<&str>) -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();

    format!("{seconds}.{}", extension_for(content_type))
}

fn extension_for(content_type: Option<&str>) -> String {
    content_type
        .and_then(|content_type| content_type.split(';').next())
        .and_then(|mime| mime.trim().split('/').nth(1))
        .and_then(|subtype| subtype.split('+').next())
        .and_then(sanitize_filename)
        .unwrap_or_else(|| "bin".to_string())
}

pub fn parse_size(size_str: &str) -> Result<u64, anyhow::Error> {
    let size_str = size_str.trim().to_uppercase();

    let (number_part, suffix) = if size_str.ends_with('K') {
        (&size_str[..size_str.len() - 1], 1024u64)
    } else if size_str.ends_with('M') {
        (&size_str[..size_str.len() - 1], 1024u64.pow(2))
    } else if size_str.ends_with('G') {
        (&size_str[..size_str.len() - 1], 1024u64.pow(3))
    } else {
        (size_str.as_str(), 1u64)
    };

    let number: f64 = number_part.trim().parse()?;
    if number < 0.0 {
        anyhow::bail!("size cannot be negative: {size_str}");
    }
    Ok((number * suffix as f64) as u64)
}

/// Splits a `Name: Value` header argument.
pub fn parse_header(header: &str) -> Option<(String, String)> {
    let (name, value) = header.split_once(':')?;
    let name = name.trim();
    (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_speed(2048.0), "2.00 KB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(61), "1m 1s");
        assert_eq!(format_duration(3723), "1h 2m 3s");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("my report?.pdf").as_deref(), Some("my_report.pdf"));
        assert_eq!(sanitize_filename("a/b\\c:d*e\"f<g>h|i").as_deref(), Some("abcdefghi"));
        assert_eq!(sanitize_filename("tab\there").as_deref(), Some("tabhere"));
        assert_eq!(sanitize_filename("??"), None);
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("  "), None);
    }

    #[test]
    fn test_generated_filename_uses_subtype() {
        let name = generated_filename(Some("image/svg+xml; charset=utf-8"));
        let (stamp, ext) = name.split_once('.').unwrap();
        assert!(stamp.parse::<u64>().is_ok());
        assert_eq!(ext, "svg");

        assert!(generated_filename(None).ends_with(".bin"));
        assert!(generated_filename(Some("garbage")).ends_with(".bin"));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("4k").unwrap(), 4096);
        assert_eq!(parse_size("1.5M").unwrap(), 1024 * 1024 * 3 / 2);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("-1K").is_err());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Authorization: Bearer a:b"),
            Some(("Authorization".to_string(), "Bearer a:b".to_string()))
        );
        assert_eq!(parse_header("no-colon"), None);
        assert_eq!(parse_header(": value"), None);
    }
}
