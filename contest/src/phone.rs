//! Phone normalization and the pure pattern predicates behind the fraud
//! signals.
//!
//! Stored phones are always in canonical `+98…` form so the unique column
//! and the cache key namespace agree on one spelling per subscriber.

use once_cell::sync::Lazy;
use regex::Regex;

static MOBILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+989\d{9}$").unwrap());

/// Canonicalize a raw phone string, returning `None` when the result is not
/// a valid mobile number. Accepted spellings of the same subscriber:
/// `09123456789`, `+989123456789`, `989123456789`, `00989123456789`.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    let canonical = if has_plus {
        format!("+{digits}")
    } else if let Some(rest) = digits.strip_prefix("00") {
        format!("+{rest}")
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("+98{rest}")
    } else {
        format!("+{digits}")
    };

    MOBILE_RE.is_match(&canonical).then_some(canonical)
}

/// Some digit repeated in a run of at least `len`.
pub fn has_repeated_run(phone: &str, len: usize) -> bool {
    let digits: Vec<u8> = phone.bytes().filter(|b| b.is_ascii_digit()).collect();
    longest_run(&digits, |prev, next| next == prev) >= len
}

/// Strictly ascending or descending digit run of at least `len`.
pub fn has_monotone_run(phone: &str, len: usize) -> bool {
    let digits: Vec<u8> = phone.bytes().filter(|b| b.is_ascii_digit()).collect();
    longest_run(&digits, |prev, next| next == prev + 1) >= len
        || longest_run(&digits, |prev, next| prev == next + 1) >= len
}

/// Numbers that show up in test traffic and demos.
pub fn is_test_pattern(phone: &str) -> bool {
    const KNOWN: [&str; 3] = ["9123456789", "9111111111", "9000000000"];

    let digits: String = phone.bytes().filter(u8::is_ascii_digit).map(char::from).collect();
    KNOWN.iter().any(|suffix| digits.ends_with(suffix))
}

pub fn is_unusual(phone: &str) -> bool {
    has_repeated_run(phone, 6) || has_monotone_run(phone, 6) || is_test_pattern(phone)
}

fn longest_run(digits: &[u8], step: impl Fn(u8, u8) -> bool) -> usize {
    let mut best = usize::from(!digits.is_empty());
    let mut current = best;

    for window in digits.windows(2) {
        if step(window[0], window[1]) {
            current += 1;
            best = best.max(current);
        } else {
            current = 1;
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_local_form() {
        assert_eq!(normalize("09123456789").as_deref(), Some("+989123456789"));
    }

    #[test]
    fn test_normalize_preserves_international_forms() {
        assert_eq!(normalize("+989123456789").as_deref(), Some("+989123456789"));
        assert_eq!(normalize("989123456789").as_deref(), Some("+989123456789"));
        assert_eq!(normalize("00989123456789").as_deref(), Some("+989123456789"));
    }

    #[test]
    fn test_normalize_strips_formatting() {
        assert_eq!(normalize("0912 345-6789").as_deref(), Some("+989123456789"));
        assert_eq!(normalize("  +98 (912) 345 6789 ").as_deref(), Some("+989123456789"));
    }

    #[test]
    fn test_normalize_rejects_invalid() {
        assert_eq!(normalize("12345"), None);
        assert_eq!(normalize("0812345678"), None);
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("not a phone"), None);
    }

    #[test]
    fn test_repeated_run() {
        assert!(has_repeated_run("+989111111234", 6));
        assert!(!has_repeated_run("+989111112345", 6));
    }

    #[test]
    fn test_monotone_run() {
        assert!(has_monotone_run("+989123456789", 6));
        assert!(has_monotone_run("+989876543210", 6));
        assert!(!has_monotone_run("+989121212121", 6));
    }

    #[test]
    fn test_unusual_covers_test_numbers() {
        assert!(is_unusual("+989123456789"));
        assert!(!is_unusual("+989351742968"));
    }
}
