use serde::{Serialize, Serializer};

use super::enums::{ExtractionPath, ParameterStatus};

/// Literal written for every field a row could not supply.
pub const NA: &str = "NA";

/// A structured field that is either read from the source text or explicitly absent.
///
/// Never empty: a blank token becomes `Missing`, which renders as "NA".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Present(String),
    Missing,
}

impl FieldValue {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NA) {
            Self::Missing
        } else if trimmed.len() == raw.len() {
            Self::Present(raw)
        } else {
            Self::Present(trimmed.to_string())
        }
    }

    pub fn from_option(raw: Option<&str>) -> Self {
        raw.map(Self::new).unwrap_or(Self::Missing)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Present(s) => s,
            Self::Missing => NA,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn as_present(&self) -> Option<&str> {
        match self {
            Self::Present(s) => Some(s),
            Self::Missing => None,
        }
    }

    /// Numeric reading of the token, when it is a plain number.
    pub fn as_number(&self) -> Option<f64> {
        self.as_present()?.trim().parse::<f64>().ok()
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One structured lab row, as produced by a single extraction path.
///
/// Constructed once with every field resolved; nothing downstream mutates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterRecord {
    pub test_name: String,
    /// Canonical vocabulary key when the name maps onto the lab vocabulary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_key: Option<String>,
    pub value: FieldValue,
    pub unit: FieldValue,
    pub reference_range: FieldValue,
    pub status: ParameterStatus,
    pub method: FieldValue,
    pub raw_text: String,
    pub confidence: f32,
    pub source: ExtractionPath,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_tokens_become_missing() {
        assert!(FieldValue::new("").is_missing());
        assert!(FieldValue::new("   ").is_missing());
        assert!(FieldValue::new("na").is_missing());
        assert_eq!(FieldValue::new("").as_str(), "NA");
    }

    #[test]
    fn present_tokens_are_trimmed() {
        assert_eq!(FieldValue::new(" g/dL ").as_str(), "g/dL");
        assert_eq!(FieldValue::new("13.5").as_number(), Some(13.5));
        assert_eq!(FieldValue::new("Positive").as_number(), None);
        assert_eq!(FieldValue::Missing.as_number(), None);
    }

    #[test]
    fn missing_serializes_as_na_literal() {
        let json = serde_json::to_string(&FieldValue::Missing).unwrap();
        assert_eq!(json, "\"NA\"");
    }
}
