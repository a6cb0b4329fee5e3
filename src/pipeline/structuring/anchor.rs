//! Vocabulary-restricted extraction keyed on canonical test names.
//!
//! Every anchor found in the text yields exactly one row, however little else
//! could be read around it. Missing fields stay `NA`.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use super::confidence::{row_confidence, RowEvidence};
use super::{clean_lines, determine_status, StructuredExtractor};
use crate::models::{ExtractionPath, FieldValue, ParameterRecord};
use crate::pipeline::vocabulary::{AnchorOccurrence, CanonicalParameter, LabVocabulary};

static DECIMAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\.\d+\b").unwrap());
static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\b").unwrap());
static DASH_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.?\d*\s*[-–—]\s*\d+\.?\d*").unwrap());
static TO_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\d+\.?\d*\s*to\s*\d+\.?\d*").unwrap());

/// Shorter text is treated as a failed read.
const MIN_TEXT_LENGTH: usize = 10;

/// Lines absorbed after an anchor line when rebuilding a broken row.
const MAX_CONTINUATION_LINES: usize = 3;

pub struct AnchorBasedExtractor {
    vocabulary: Arc<LabVocabulary>,
}

impl AnchorBasedExtractor {
    pub fn new(vocabulary: Arc<LabVocabulary>) -> Self {
        Self { vocabulary }
    }

    /// No digit or no anchor anywhere: nothing trustworthy to key rows on.
    pub fn is_recognition_failure(&self, text: &str) -> bool {
        let trimmed = text.trim();
        trimmed.chars().count() < MIN_TEXT_LENGTH
            || !trimmed.chars().any(|c| c.is_ascii_digit())
            || !self.vocabulary.contains_anchor(trimmed)
    }

    /// Anchor line plus up to three following lines carrying a digit or a
    /// method keyword, stopping at the next anchor.
    fn reconstruct_row(&self, kept: &[&str], all: &[&str], occurrence: &AnchorOccurrence) -> Vec<String> {
        let carries_anchor = |line: &str| {
            self.vocabulary
                .anchor_occurrences(line)
                .iter()
                .any(|o| o.parameter == occurrence.parameter)
        };

        let Some(start) = kept.iter().position(|line| carries_anchor(line)) else {
            // Every line naming this test was filtered as noise; keep the
            // raw line so the row is not lost.
            let fallback = all
                .iter()
                .find(|line| carries_anchor(line))
                .map(|line| line.to_string())
                .unwrap_or_else(|| occurrence.phrase.clone());
            return vec![fallback];
        };

        let mut row = vec![kept[start].to_string()];
        for line in kept.iter().skip(start + 1).take(MAX_CONTINUATION_LINES) {
            if self.vocabulary.contains_anchor(line) {
                break;
            }
            if line.chars().any(|c| c.is_ascii_digit()) || self.vocabulary.mentions_method(line) {
                row.push(line.to_string());
            }
        }
        row
    }

    fn build_record(&self, parameter: &CanonicalParameter, phrase: &str, row_text: String) -> ParameterRecord {
        let value = FieldValue::from_option(first_value(&row_text));
        let unit = FieldValue::from_option(self.vocabulary.first_unit(&row_text));
        let reference_range = FieldValue::from_option(first_range(&row_text));
        let method = FieldValue::from_option(self.vocabulary.first_method(&row_text));

        let evidence = RowEvidence::from_fields(
            row_text.to_lowercase().contains(phrase),
            &value,
            &unit,
            &reference_range,
        );

        ParameterRecord {
            test_name: parameter.display_name.clone(),
            canonical_key: Some(parameter.key.clone()),
            status: determine_status(&value, &reference_range),
            confidence: row_confidence(evidence),
            value,
            unit,
            reference_range,
            method,
            raw_text: row_text,
            source: ExtractionPath::AnchorBased,
        }
    }
}

impl StructuredExtractor for AnchorBasedExtractor {
    fn path(&self) -> ExtractionPath {
        ExtractionPath::AnchorBased
    }

    fn extract(&self, text: &str) -> Vec<ParameterRecord> {
        if self.is_recognition_failure(text) {
            debug!(length = text.len(), "No anchors or digits, skipping anchor extraction");
            return Vec::new();
        }

        let all: Vec<&str> = clean_lines(text).collect();
        let kept: Vec<&str> = all
            .iter()
            .copied()
            .filter(|line| !self.vocabulary.anchor_noise.matches(line))
            .collect();

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for occurrence in self.vocabulary.anchor_occurrences(text) {
            if !seen.insert(occurrence.parameter) {
                continue;
            }
            let Some(parameter) = self.vocabulary.parameter(occurrence.parameter) else {
                continue;
            };
            let row_text = self.reconstruct_row(&kept, &all, &occurrence).join(" ");
            records.push(self.build_record(parameter, &occurrence.phrase, row_text));
        }

        debug!(
            rows = records.len(),
            noise_lines = all.len() - kept.len(),
            "Anchor extraction complete"
        );
        records
    }
}

/// First decimal, else first integer.
fn first_value(text: &str) -> Option<&str> {
    DECIMAL
        .find(text)
        .or_else(|| INTEGER.find(text))
        .map(|m| m.as_str())
}

fn first_range(text: &str) -> Option<&str> {
    DASH_RANGE
        .find(text)
        .or_else(|| TO_RANGE.find(text))
        .map(|m| m.as_str())
}
