use crate::models::FieldValue;

/// Row confidence bands.
pub mod row_thresholds {
    /// Start for a row whose value was read.
    pub const BASE: f32 = 0.80;

    /// Start for a row kept only for completeness (no value found).
    pub const VALUE_MISSING: f32 = 0.40;

    /// Ceiling; no text-derived row is certain.
    pub const MAX: f32 = 0.99;
}

/// Evidence one row carries, as seen by the extractor that built it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowEvidence {
    /// The test name appears verbatim in the row text.
    pub name_in_text: bool,
    pub has_value: bool,
    pub has_unit: bool,
    pub has_range: bool,
}

impl RowEvidence {
    pub fn from_fields(
        name_in_text: bool,
        value: &FieldValue,
        unit: &FieldValue,
        range: &FieldValue,
    ) -> Self {
        Self {
            name_in_text,
            has_value: !value.is_missing(),
            has_unit: !unit.is_missing(),
            has_range: !range.is_missing(),
        }
    }
}

/// Score one structured row from the fields it actually carries.
pub fn row_confidence(evidence: RowEvidence) -> f32 {
    let mut confidence = if evidence.has_value {
        row_thresholds::BASE
    } else {
        row_thresholds::VALUE_MISSING
    };

    if evidence.name_in_text {
        confidence += 0.10;
    }
    if evidence.has_unit {
        confidence += 0.05;
    }
    if evidence.has_range {
        confidence += 0.05;
    }

    confidence.min(row_thresholds::MAX)
}
