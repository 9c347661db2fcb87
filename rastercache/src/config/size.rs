//! Human-readable byte sizes ("64MB", "2 GB", "4096").

use thiserror::Error;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Suffixes in the order they are tried; longer spellings first so "MB" is
/// not mistaken for "B".
const SUFFIXES: &[(&str, usize)] = &[
    ("GB", GB),
    ("G", GB),
    ("MB", MB),
    ("M", MB),
    ("KB", KB),
    ("K", KB),
    ("B", 1),
];

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{input}' - expected format like '64MB', '2GB', or '4096'")]
pub struct SizeParseError {
    input: String,
}

/// Parse a size string into bytes.
///
/// Accepts a bare byte count or an integer followed by `B`, `K`/`KB`,
/// `M`/`MB` or `G`/`GB` (binary multiples, any case, optional space).
///
/// ```
/// use rastercache::config::parse_size;
///
/// assert_eq!(parse_size("4096").unwrap(), 4096);
/// assert_eq!(parse_size("64MB").unwrap(), 64 * 1024 * 1024);
/// assert_eq!(parse_size("1 g").unwrap(), 1024 * 1024 * 1024);
/// ```
pub fn parse_size(input: &str) -> Result<usize, SizeParseError> {
    let invalid = || SizeParseError {
        input: input.to_string(),
    };
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (digits, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, multiplier)| {
            upper
                .strip_suffix(suffix)
                .map(|rest| (rest.trim_end(), *multiplier))
        })
        .unwrap_or((upper.as_str(), 1));

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(invalid)
}

/// Format a byte count using the largest unit that divides it exactly.
///
/// ```
/// use rastercache::config::format_size;
///
/// assert_eq!(format_size(64 * 1024 * 1024), "64MB");
/// assert_eq!(format_size(1536), "1536B");
/// ```
pub fn format_size(bytes: usize) -> String {
    let unit = [(GB, "GB"), (MB, "MB"), (KB, "KB")]
        .into_iter()
        .find(|(size, _)| bytes >= *size && bytes % size == 0);
    match unit {
        Some((size, suffix)) => format!("{}{suffix}", bytes / size),
        None => format!("{bytes}B"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_bytes() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("65536").unwrap(), 65536);
        assert_eq!(parse_size("512B").unwrap(), 512);
    }

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_size("8K").unwrap(), 8 * KB);
        assert_eq!(parse_size("8kb").unwrap(), 8 * KB);
        assert_eq!(parse_size("40MB").unwrap(), 40 * MB);
        assert_eq!(parse_size("40m").unwrap(), 40 * MB);
        assert_eq!(parse_size("3GB").unwrap(), 3 * GB);
    }

    #[test]
    fn test_parse_whitespace() {
        assert_eq!(parse_size("  16 MB ").unwrap(), 16 * MB);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", "MB", "abc", "-1MB", "1.5GB", "2TB", "12 34"] {
            assert!(parse_size(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_parse_overflow() {
        assert!(parse_size(&format!("{}GB", usize::MAX)).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0B");
        assert_eq!(format_size(KB), "1KB");
        assert_eq!(format_size(40 * MB), "40MB");
        assert_eq!(format_size(2 * GB), "2GB");
        assert_eq!(format_size(GB + KB), "1048577KB");
        assert_eq!(format_size(1000), "1000B");
    }

    #[test]
    fn test_format_output_parses_back() {
        for bytes in [512, 4 * KB, 40 * MB, 3 * GB] {
            assert_eq!(parse_size(&format_size(bytes)).unwrap(), bytes);
        }
    }
}
