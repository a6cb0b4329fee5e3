pub mod confidence;
pub mod anchor;
pub mod table;
pub mod classifier;
pub mod csv_view;

pub use confidence::*;
pub use anchor::*;
pub use table::*;
pub use classifier::*;
pub use csv_view::*;

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{ExtractionPath, FieldValue, ParameterRecord, ParameterStatus};

/// Turns recognized text into structured lab rows.
///
/// The three implementations run independently over the same text; none sees
/// another's output, so each can cross-check the others.
pub trait StructuredExtractor: Send + Sync {
    fn path(&self) -> ExtractionPath;

    /// Rows in the order they appear in `text`. Never fails: text with nothing
    /// recognizable yields an empty list.
    fn extract(&self, text: &str) -> Vec<ParameterRecord>;
}

// ═══════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════

static DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*[-–—]\s*").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static BOUNDED_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:-|–|—|\bto\b)\s*(\d+(?:\.\d+)?)").unwrap()
});
static UPPER_LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<\s*=?\s*(\d+(?:\.\d+)?)").unwrap());
static LOWER_LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^>\s*=?\s*(\d+(?:\.\d+)?)").unwrap());

/// Trimmed, non-empty lines.
pub fn clean_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Collapse whitespace and unify dashes: `"12.0 – 16.0"` becomes `"12.0-16.0"`.
pub fn normalize_range(raw: &str) -> FieldValue {
    let collapsed = WHITESPACE.replace_all(raw.trim(), " ");
    FieldValue::new(DASHES.replace_all(&collapsed, "-").into_owned())
}

/// Compare a value against its printed reference range.
///
/// Only a direct numeric comparison decides: an absent value is MISSING, and
/// anything that does not parse on either side is UNKNOWN. Bounds are inclusive.
pub fn determine_status(value: &FieldValue, range: &FieldValue) -> ParameterStatus {
    if value.is_missing() {
        return ParameterStatus::Missing;
    }
    let (Some(value), Some(range)) = (value.as_number(), range.as_present()) else {
        return ParameterStatus::Unknown;
    };
    let range = range.trim();

    if let Some(caps) = UPPER_LIMIT.captures(range) {
        return match caps[1].parse::<f64>() {
            Ok(max) if value > max => ParameterStatus::High,
            Ok(_) => ParameterStatus::Normal,
            Err(_) => ParameterStatus::Unknown,
        };
    }
    if let Some(caps) = LOWER_LIMIT.captures(range) {
        return match caps[1].parse::<f64>() {
            Ok(min) if value < min => ParameterStatus::Low,
            Ok(_) => ParameterStatus::Normal,
            Err(_) => ParameterStatus::Unknown,
        };
    }

    let Some(caps) = BOUNDED_RANGE.captures(range) else {
        return ParameterStatus::Unknown;
    };
    match (caps[1].parse::<f64>(), caps[2].parse::<f64>()) {
        (Ok(low), Ok(high)) if low <= high => {
            if value < low {
                ParameterStatus::Low
            } else if value > high {
                ParameterStatus::High
            } else {
                ParameterStatus::Normal
            }
        }
        _ => ParameterStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(value: &str, range: &str) -> ParameterStatus {
        determine_status(&FieldValue::new(value), &FieldValue::new(range))
    }

    #[test]
    fn status_from_numeric_comparison() {
        assert_eq!(status("55", "40-70"), ParameterStatus::Normal);
        assert_eq!(status("30", "40-70"), ParameterStatus::Low);
        assert_eq!(status("80", "40-70"), ParameterStatus::High);
        assert_eq!(status("40", "40-70"), ParameterStatus::Normal);
        assert_eq!(status("13.5", "12.0 – 16.0"), ParameterStatus::Normal);
        assert_eq!(status("4.2", "4.5 to 5.5"), ParameterStatus::Low);
    }

    #[test]
    fn unparseable_sides_are_unknown() {
        assert_eq!(status("Positive", "40-70"), ParameterStatus::Unknown);
        assert_eq!(status("55", "NA"), ParameterStatus::Unknown);
        assert_eq!(status("55", "see note"), ParameterStatus::Unknown);
        assert_eq!(status("55", "70-40"), ParameterStatus::Unknown);
        assert_eq!(status("NA", "40-70"), ParameterStatus::Missing);
    }

    #[test]
    fn one_sided_limits() {
        assert_eq!(status("250", "< 200"), ParameterStatus::High);
        assert_eq!(status("150", "<200"), ParameterStatus::Normal);
        assert_eq!(status("35", "> 40"), ParameterStatus::Low);
    }

    #[test]
    fn range_normalization() {
        assert_eq!(normalize_range("12.0 - 16.0").as_str(), "12.0-16.0");
        assert_eq!(normalize_range(" 150000 —  450000 ").as_str(), "150000-450000");
        assert_eq!(normalize_range("   ").as_str(), "NA");
    }

    #[test]
    fn clean_lines_skips_blanks() {
        let lines: Vec<_> = clean_lines("  a \n\n\t\n b").collect();
        assert_eq!(lines, vec!["a", "b"]);
    }
}
