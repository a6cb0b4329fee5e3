//! Accept/reject judgement over recognized or uploaded text.
//!
//! Deliberately lenient: a marginal read that still carries lab content is
//! worth structuring, so low confidence alone never rejects.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::config::ExtractionConfig;
use crate::models::enums::str_enum;
use crate::pipeline::vocabulary::LabVocabulary;

static NUMERIC_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+\.?\d*").unwrap());
static NUMBER_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.?\d*\s+\d+\.?\d*").unwrap());
static COLUMN_GAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());
static LETTER_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-zA-Z]{2,}").unwrap());

str_enum!(
    /// Content evidence found in a block of text.
    SignalType {
        MedicalParameter => "medical_parameter",
        NumericValues => "numeric_values",
        MedicalUnits => "medical_units",
        MedicalKeywords => "medical_keywords",
        TableStructure => "table_structure",
        TextContent => "text_content",
    }
);

impl SignalType {
    /// Signals that point at lab content rather than just "some text".
    pub fn is_lab_specific(&self) -> bool {
        matches!(
            self,
            Self::MedicalParameter | Self::NumericValues | Self::MedicalUnits | Self::MedicalKeywords
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
    pub accepted: bool,
    pub message: String,
    /// In detection order, no duplicates.
    pub signals: Vec<SignalType>,
    /// Accepted without any lab-specific signal.
    pub provisional: bool,
}

impl ValidationVerdict {
    fn accept(message: String, signals: Vec<SignalType>) -> Self {
        let provisional = !signals.iter().any(SignalType::is_lab_specific);
        Self {
            accepted: true,
            message,
            signals,
            provisional,
        }
    }

    fn reject(message: String, signals: Vec<SignalType>) -> Self {
        Self {
            accepted: false,
            message,
            signals,
            provisional: false,
        }
    }

    pub fn signal_names(&self) -> Vec<String> {
        self.signals.iter().map(|s| s.as_str().to_string()).collect()
    }
}

/// Multi-signal text validator.
///
/// Thresholds come from `ExtractionConfig` so the last-resort branch can be
/// tuned and tested like any other parameter.
pub struct OutputValidator {
    vocabulary: Arc<LabVocabulary>,
    min_text_length: usize,
    last_resort_min_length: usize,
    lenient_min_length: usize,
    min_confidence: f32,
}

impl OutputValidator {
    pub fn new(vocabulary: Arc<LabVocabulary>, config: &ExtractionConfig) -> Self {
        Self {
            vocabulary,
            min_text_length: config.min_text_length,
            last_resort_min_length: config.last_resort_min_length,
            lenient_min_length: config.lenient_min_length,
            min_confidence: config.min_confidence_threshold,
        }
    }

    /// Every content signal present in `text`.
    pub fn signals(&self, text: &str) -> Vec<SignalType> {
        let mut signals = Vec::new();
        if self.vocabulary.medical_signals.matches(text) {
            signals.push(SignalType::MedicalParameter);
        }
        if NUMERIC_TOKEN.is_match(text) {
            signals.push(SignalType::NumericValues);
        }
        if self.vocabulary.validator_units().is_match(text) {
            signals.push(SignalType::MedicalUnits);
        }
        if self.vocabulary.validator_keywords().is_match(text) {
            signals.push(SignalType::MedicalKeywords);
        }
        if NUMBER_PAIR.is_match(text) || COLUMN_GAP.find_iter(text).count() > 1 {
            signals.push(SignalType::TableStructure);
        }
        if LETTER_RUN.is_match(text) {
            signals.push(SignalType::TextContent);
        }
        signals
    }

    pub fn validate(&self, text: &str, confidence: f32) -> ValidationVerdict {
        let trimmed = text.trim();
        let length = trimmed.chars().count();
        if length < self.min_text_length {
            return ValidationVerdict::reject(
                format!("Text too short: {length} < {} characters", self.min_text_length),
                Vec::new(),
            );
        }

        let signals = self.signals(trimmed);
        let numeric_count = NUMERIC_TOKEN.find_iter(trimmed).count();

        if signals.is_empty() && numeric_count == 0 {
            let has_letter = trimmed.chars().any(|c| c.is_ascii_alphabetic());
            if length >= self.last_resort_min_length && has_letter {
                return ValidationVerdict::accept(
                    format!("Accepting text with basic content ({length} characters, no lab signal)"),
                    signals,
                );
            }
            return ValidationVerdict::reject(
                format!("No medical or meaningful content detected ({length} characters)"),
                signals,
            );
        }

        if confidence < self.min_confidence {
            if !signals.is_empty() || length >= self.lenient_min_length {
                let reasons = if signals.is_empty() {
                    "text_length".to_string()
                } else {
                    join_signals(&signals)
                };
                return ValidationVerdict::accept(
                    format!("Low confidence ({confidence:.2}) but accepting due to content indicators: {reasons}"),
                    signals,
                );
            }
            return ValidationVerdict::reject(
                format!("OCR confidence too low: {confidence:.2} < {}", self.min_confidence),
                signals,
            );
        }

        ValidationVerdict::accept(
            format!(
                "Validation passed: {} indicators ({}), {numeric_count} numeric values, confidence: {confidence:.2}",
                signals.len(),
                join_signals(&signals)
            ),
            signals,
        )
    }
}

fn join_signals(signals: &[SignalType]) -> String {
    signals.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator_with(config: &ExtractionConfig) -> OutputValidator {
        OutputValidator::new(Arc::new(LabVocabulary::bundled().unwrap()), config)
    }

    fn validator() -> OutputValidator {
        validator_with(&ExtractionConfig::default())
    }

    #[test]
    fn short_text_is_rejected() {
        let verdict = validator().validate("  Hb ", 0.9);
        assert!(!verdict.accepted);
        assert!(verdict.message.contains("too short"));
    }

    #[test]
    fn lab_line_passes_with_all_signals() {
        let verdict = validator().validate("Hemoglobin  13.5  g/dL  12.0-16.0 normal", 0.85);
        assert!(verdict.accepted);
        assert!(!verdict.provisional);
        for signal in [
            SignalType::MedicalParameter,
            SignalType::NumericValues,
            SignalType::MedicalUnits,
            SignalType::MedicalKeywords,
            SignalType::TableStructure,
            SignalType::TextContent,
        ] {
            assert!(verdict.signals.contains(&signal), "missing {signal}");
        }
    }

    #[test]
    fn low_confidence_never_rejects_content() {
        let verdict = validator().validate("WBC 7500", 0.05);
        assert!(verdict.accepted);
        assert!(verdict.message.starts_with("Low confidence"));
    }

    #[test]
    fn last_resort_accepts_long_text_with_letters() {
        let verdict = validator().validate("a ; b ; c ; d ; e", 0.9);
        assert!(verdict.signals.is_empty());
        assert!(verdict.accepted);
        assert!(verdict.provisional);
    }

    #[test]
    fn last_resort_threshold_is_tunable() {
        let strict = validator_with(&ExtractionConfig {
            last_resort_min_length: 40,
            ..Default::default()
        });
        let verdict = strict.validate("a ; b ; c ; d ; e", 0.9);
        assert!(!verdict.accepted);
        assert!(verdict.message.contains("No medical or meaningful content"));
    }

    #[test]
    fn symbols_without_letters_are_rejected() {
        let verdict = validator().validate("; ; ; ; ; ; ; ;", 0.9);
        assert!(!verdict.accepted);
    }

    #[test]
    fn non_medical_prose_is_only_provisional() {
        let verdict = validator().validate("The quick brown fox jumps over the lazy dog", 0.9);
        assert!(verdict.accepted);
        assert!(verdict.provisional);
        assert_eq!(verdict.signals, vec![SignalType::TextContent]);
    }

    #[test]
    fn signal_names_are_snake_case() {
        let verdict = validator().validate("Platelet Count 90000", 0.9);
        let names = verdict.signal_names();
        assert!(names.contains(&"medical_parameter".to_string()));
        assert!(names.contains(&"numeric_values".to_string()));
    }
}
