//! UI utilities for WebDrop CLI.

const BAR_WIDTH: usize = 24;

/// Render a progress fraction as a fixed-width bar with a percentage.
pub fn progress_line(fraction: f64) -> String {
    let fraction = if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = (fraction * BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:>6.2}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        fraction * 100.0
    )
}

/// Parse a size string like "512", "64k", "1M" or "2G".
///
/// Suffixes are binary (`k` = 1024) and case-insensitive.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (digits, multiplier) = match s.char_indices().last()? {
        (i, 'k' | 'K') => (&s[..i], 1024),
        (i, 'm' | 'M') => (&s[..i], 1024 * 1024),
        (i, 'g' | 'G') => (&s[..i], 1024 * 1024 * 1024),
        _ => (s, 1),
    };

    let num: u64 = digits.trim().parse().ok()?;
    num.checked_mul(multiplier)
}

/// Print a section header.
pub fn print_header(title: &str) {
    println!();
    println!("{} v{}", title, webdrop_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_line() {
        assert_eq!(progress_line(0.0), format!("[{}]   0.00%", "-".repeat(24)));
        assert_eq!(progress_line(1.0), format!("[{}] 100.00%", "#".repeat(24)));
        assert_eq!(
            progress_line(0.5),
            format!("[{}{}]  50.00%", "#".repeat(12), "-".repeat(12))
        );
    }

    #[test]
    fn test_progress_line_clamps() {
        assert_eq!(progress_line(1.7), progress_line(1.0));
        assert_eq!(progress_line(-0.3), progress_line(0.0));
        assert_eq!(progress_line(f64::NAN), progress_line(0.0));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("64k"), Some(64 * 1024));
        assert_eq!(parse_size("64K"), Some(64 * 1024));
        assert_eq!(parse_size("1M"), Some(1024 * 1024));
        assert_eq!(parse_size("2g"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size(" 8 k "), Some(8 * 1024));
        assert_eq!(parse_size("k"), None);
        assert_eq!(parse_size("1.5M"), None);
        assert_eq!(parse_size(""), None);
    }
}
