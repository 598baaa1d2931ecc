//! Common validation utilities.

use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

/// Maximum length of a sanitized file name, extension included.
pub const MAX_FILENAME_LENGTH: usize = 120;

/// Name used when nothing usable survives sanitization.
const FALLBACK_FILENAME: &str = "document";

lazy_static! {
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9._\-() ]+").unwrap();
    static ref REPEATED_SEPARATORS: Regex = Regex::new(r"[_ ]{2,}").unwrap();
}

/// Validates that the start of a date range is not after its end.
pub fn validate_date_range(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<(), ValidationError> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => {
            let mut err = ValidationError::new("date_range_order");
            err.message = Some("Start date must not be after end date".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

/// Returns true when both bounds are set and they span more than `max_days`.
pub fn date_span_exceeds(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    max_days: i64,
) -> bool {
    match (from, to) {
        (Some(from), Some(to)) => to - from > Duration::days(max_days),
        _ => false,
    }
}

/// Reduces a user-supplied file name to a portable archive entry name.
///
/// Path separators and control characters are replaced, leading dots are
/// stripped so entries cannot become hidden files or `..`, and the result is
/// truncated to [`MAX_FILENAME_LENGTH`] while keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let replaced = UNSAFE_FILENAME_CHARS.replace_all(base, "_");
    let collapsed = REPEATED_SEPARATORS.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ' || c == '_');

    if trimmed.is_empty() {
        return FALLBACK_FILENAME.to_string();
    }

    truncate_preserving_extension(trimmed, MAX_FILENAME_LENGTH)
}

/// Splits a file name into stem and extension (without the dot).
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos < name.len() - 1 => (&name[..pos], Some(&name[pos + 1..])),
        _ => (name, None),
    }
}

fn truncate_preserving_extension(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }

    let (stem, ext) = split_extension(name);
    let ext_len = ext.map(|e| e.len() + 1).unwrap_or(0);
    let keep = max_len.saturating_sub(ext_len).max(1);
    let mut cut = keep.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }

    match ext {
        Some(ext) if ext_len < max_len => format!("{}.{}", &stem[..cut], ext),
        _ => name[..max_len].to_string(),
    }
}
