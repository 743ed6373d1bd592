use chrono::{DateTime, FixedOffset, Local};

use crate::protocol::v1::TimeUnit;

/// Formats a datetime truncated to the given resolution, keeping its offset.
pub fn format_datetime(dt: &DateTime<FixedOffset>, unit: TimeUnit) -> String {
    dt.format(unit.format_pattern()).to_string()
}

/// The current local time with its UTC offset attached.
pub fn local_now_with_offset() -> DateTime<FixedOffset> {
    DateTime::<FixedOffset>::from(Local::now())
}

/// Truncates a string to at most `length` bytes without splitting a character.
pub fn truncate_string_at_boundary<S: Into<String>>(value: S, length: usize) -> String {
    let mut value = value.into();
    if value.len() > length {
        let mut end = length;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_ascii() {
        assert_eq!(truncate_string_at_boundary("abcdef", 3), "abc");
        assert_eq!(truncate_string_at_boundary("abc", 10), "abc");
    }

    #[test]
    fn test_truncate_multibyte() {
        // "é" is two bytes, cutting inside it must back off.
        assert_eq!(truncate_string_at_boundary("aé", 2), "a");
        assert_eq!(truncate_string_at_boundary("aé", 3), "aé");
    }

    #[test]
    fn test_now_has_offset() {
        let now = local_now_with_offset();
        let formatted = format_datetime(&now, TimeUnit::Day);
        assert!(formatted.contains('+') || formatted.contains('-'));
    }
}
