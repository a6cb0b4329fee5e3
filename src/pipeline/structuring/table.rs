//! Vocabulary-free row parsing over the results table.
//!
//! Test names are taken as printed, so this path also catches tests the
//! vocabulary does not know. It exists to cross-check the anchor path.

use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use tracing::debug;

use super::confidence::{row_confidence, RowEvidence};
use super::{clean_lines, determine_status, StructuredExtractor};
use crate::models::{ExtractionPath, FieldValue, ParameterRecord};
use crate::pipeline::vocabulary::LabVocabulary;

static ROW_NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z\s()]+?)\s+(\d+\.?\d*)").unwrap());
static ROW_COLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z\s()]+?)\s*:\s*(\d+\.?\d*)").unwrap());

/// Ordered row grammar; the first pattern that yields a usable name wins.
static GRAMMAR: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // name value unit range
        r"^([A-Za-z][A-Za-z\s()]+?)\s+(\d+\.?\d*)\s+([A-Za-z/%]+)\s+(.+)$",
        // name value unit
        r"^([A-Za-z][A-Za-z\s()]+?)\s+(\d+\.?\d*)\s+([A-Za-z/%]+)(?:\s|$)",
        // name : value unit range
        r"^([A-Za-z][A-Za-z\s()]+?)\s*:\s*(\d+\.?\d*)\s+([A-Za-z/%]+)\s+(.+)$",
        // name [:-] value
        r"^([A-Za-z][A-Za-z\s()]+?)\s*[:\-]?\s*(\d+\.?\d*)(?:\s|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// `name status-word`, e.g. "HBsAg Negative". The last word is the value.
static STATUS_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z\s()]*?)\s+([A-Za-z]+)\s*$").unwrap());

pub struct TableExtractor {
    vocabulary: Arc<LabVocabulary>,
}

impl TableExtractor {
    pub fn new(vocabulary: Arc<LabVocabulary>) -> Self {
        Self { vocabulary }
    }

    fn status_row<'t>(&self, line: &'t str) -> Option<Captures<'t>> {
        STATUS_ROW
            .captures(line)
            .filter(|caps| self.vocabulary.is_status_word(&caps[2]))
    }

    fn starts_row(&self, line: &str) -> bool {
        ROW_NUMERIC.is_match(line) || ROW_COLON.is_match(line) || self.status_row(line).is_some()
    }

    /// Lines between the table header and the footer, noise removed.
    pub fn table_section<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let mut lines = Vec::new();
        let mut in_table = false;
        for line in clean_lines(text) {
            if self.vocabulary.table_noise.matches(line) {
                continue;
            }
            if self.vocabulary.table_section.is_start(line) {
                in_table = true;
                continue;
            }
            if self.starts_row(line) {
                in_table = true;
            }
            if in_table {
                if self.vocabulary.table_section.is_end(line) {
                    break;
                }
                lines.push(line);
            }
        }
        lines
    }

    /// Lines that do not start a row are appended to the row above.
    pub fn merge_broken_lines(&self, lines: &[&str]) -> Vec<String> {
        let mut rows: Vec<String> = Vec::new();
        for line in lines {
            match rows.last_mut() {
                Some(current) if !self.starts_row(line) => {
                    current.push(' ');
                    current.push_str(line);
                }
                _ => rows.push(line.to_string()),
            }
        }
        rows
    }

    pub fn parse_row(&self, row: &str) -> Option<ParameterRecord> {
        let row = row.trim();
        for pattern in GRAMMAR.iter() {
            let Some(caps) = pattern.captures(row) else {
                continue;
            };
            let name = caps[1].trim();
            if self.vocabulary.is_status_word(name) {
                continue;
            }
            let group = |i: usize| caps.get(i).map(|m| m.as_str());
            return Some(self.record(
                name,
                FieldValue::new(&caps[2]),
                FieldValue::from_option(group(3)),
                FieldValue::from_option(group(4)),
                row,
            ));
        }

        let caps = self.status_row(row)?;
        let name = caps[1].trim();
        if self.vocabulary.is_status_word(name) {
            return None;
        }
        Some(self.record(
            name,
            FieldValue::new(&caps[2]),
            FieldValue::Missing,
            FieldValue::Missing,
            row,
        ))
    }

    fn record(
        &self,
        name: &str,
        value: FieldValue,
        unit: FieldValue,
        reference_range: FieldValue,
        row: &str,
    ) -> ParameterRecord {
        let evidence = RowEvidence::from_fields(true, &value, &unit, &reference_range);
        ParameterRecord {
            test_name: name.to_string(),
            canonical_key: self.vocabulary.canonical_for_name(name).map(|p| p.key.clone()),
            status: determine_status(&value, &reference_range),
            method: FieldValue::from_option(self.vocabulary.first_table_method(row)),
            confidence: row_confidence(evidence),
            value,
            unit,
            reference_range,
            raw_text: row.to_string(),
            source: ExtractionPath::Table,
        }
    }
}

impl StructuredExtractor for TableExtractor {
    fn path(&self) -> ExtractionPath {
        ExtractionPath::Table
    }

    fn extract(&self, text: &str) -> Vec<ParameterRecord> {
        let section = self.table_section(text);
        let rows = self.merge_broken_lines(&section);
        let records: Vec<ParameterRecord> = rows.iter().filter_map(|r| self.parse_row(r)).collect();
        debug!(
            section_lines = section.len(),
            rows = rows.len(),
            parsed = records.len(),
            "Table extraction complete"
        );
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParameterStatus;

    fn extractor() -> TableExtractor {
        TableExtractor::new(Arc::new(LabVocabulary::bundled().unwrap()))
    }

    const REPORT: &str = "CITY DIAGNOSTIC LABORATORY
Patient Name: Jane Doe
Collected: 12/03/2024 09:15
Phone 9876543210
Test  Result  Unit  Reference
Hemoglobin 13.5 g/dL 12.0-16.0
Total WBC Count 11500 /cumm 4000-11000
Platelet Count 90000
HBsAg Negative
ESR : 12 mm/hr 0-20
*** End of Report ***
Sodium 140 mmol/L 135-145";

    #[test]
    fn parses_every_grammar_form() {
        let rows = extractor().extract(REPORT);
        let names: Vec<_> = rows.iter().map(|r| r.test_name.as_str()).collect();
        assert_eq!(names, vec!["Hemoglobin", "Total WBC Count", "Platelet Count", "HBsAg", "ESR"]);

        assert_eq!(rows[0].unit.as_str(), "g/dL");
        assert_eq!(rows[0].reference_range.as_str(), "12.0-16.0");
        assert_eq!(rows[0].status, ParameterStatus::Normal);
        assert_eq!(rows[1].status, ParameterStatus::High);
        assert_eq!(rows[2].value.as_str(), "90000");
        assert_eq!(rows[2].unit.as_str(), "NA");
        assert_eq!(rows[3].value.as_str(), "Negative");
        assert_eq!(rows[3].status, ParameterStatus::Unknown);
        assert_eq!(rows[4].unit.as_str(), "mm/hr");
        assert_eq!(rows[4].reference_range.as_str(), "0-20");
    }

    #[test]
    fn unknown_tests_have_no_canonical_key() {
        let rows = extractor().extract(REPORT);
        assert_eq!(rows[0].canonical_key.as_deref(), Some("hemoglobin"));
        assert_eq!(rows[4].canonical_key, None);
    }

    #[test]
    fn noise_lines_never_become_rows() {
        let rows = extractor().extract(REPORT);
        for row in &rows {
            assert!(!row.test_name.contains("Phone"));
            assert!(!row.test_name.contains("Patient"));
            assert!(!row.raw_text.contains("2024"));
        }
    }

    #[test]
    fn contact_numbers_never_become_rows() {
        let e = extractor();
        for line in [
            "Telephone 9876543210",
            "Contact No: 9876543210",
            "Ph 9876543210",
            "Mob. +91 98765 43210",
            "Helpline 9876543210",
        ] {
            let rows = e.extract(&format!("{line}\nHemoglobin 13.5 g/dL 12.0-16.0"));
            let names: Vec<_> = rows.iter().map(|r| r.test_name.as_str()).collect();
            assert_eq!(names, vec!["Hemoglobin"], "{line}");
        }
    }

    #[test]
    fn lab_terms_containing_tel_are_kept() {
        let rows = extractor().extract("Platelet Count 250000 /cumm 150000-450000\npH 6.5 4.5-8.0");
        let names: Vec<_> = rows.iter().map(|r| r.test_name.as_str()).collect();
        assert_eq!(names, vec!["Platelet Count", "pH"]);
    }

    #[test]
    fn continuation_lines_are_merged() {
        let rows = extractor().extract("Hemoglobin 13.5\ng/dL 12.0-16.0\nPhotometry\nMCV 88 fL 80-100");
        assert_eq!(rows.len(), 2);
        let hb = &rows[0];
        assert_eq!(hb.raw_text, "Hemoglobin 13.5 g/dL 12.0-16.0 Photometry");
        assert!(hb.reference_range.as_str().starts_with("12.0-16.0"));
        assert_eq!(hb.method.as_str(), "Photometry");
        assert_eq!(hb.status, ParameterStatus::Normal);
    }

    #[test]
    fn status_words_are_not_test_names() {
        let e = extractor();
        assert!(e.parse_row("Normal 13.5 g/dL").is_none());
        assert!(e.parse_row("High Low").is_none());
        assert!(e.extract("Normal 13.5 g/dL").is_empty());
    }

    #[test]
    fn text_without_rows_is_empty() {
        assert!(extractor().extract("nothing to see here").is_empty());
    }
}
