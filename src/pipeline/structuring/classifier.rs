//! Canonical-name classifier: normalizes names, units and ranges, then
//! decides LOW / NORMAL / HIGH by direct numeric comparison.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::confidence::{row_confidence, RowEvidence};
use super::{clean_lines, determine_status, normalize_range, StructuredExtractor};
use crate::models::{ExtractionPath, FieldValue, ParameterRecord};
use crate::pipeline::vocabulary::LabVocabulary;

static NAME_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z\s()]*").unwrap());
static NAME_VALUE_UNIT_REST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z\s()]*?)\s*:?\s+(\d+\.?\d*)\s+([A-Za-z/%]+)\s+(.+)$").unwrap()
});
static NAME_VALUE_REST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z\s()]*?)\s*:?\s+(\d+\.?\d*)\s+(.+)$").unwrap());
static NAME_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z\s()]*?)\s*:?\s+(\d+\.?\d*)$").unwrap());
static RANGE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\d+\.?\d*\s*(?:[-–—]|\bto\b)\s*\d+\.?\d*|[<>]=?\s*\d+\.?\d*)").unwrap()
});

/// A classified row before it becomes a record.
struct ParsedRow<'r> {
    name: &'r str,
    value: &'r str,
    unit: Option<&'r str>,
    range: Option<&'r str>,
}

pub struct ParameterClassifier {
    vocabulary: Arc<LabVocabulary>,
}

impl ParameterClassifier {
    pub fn new(vocabulary: Arc<LabVocabulary>) -> Self {
        Self { vocabulary }
    }

    fn names_parameter(&self, line: &str) -> bool {
        NAME_PREFIX
            .find(line)
            .is_some_and(|m| self.vocabulary.canonical_for_name(m.as_str()).is_some())
    }

    fn section<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let mut lines = Vec::new();
        let mut in_table = false;
        for line in clean_lines(text) {
            if self.vocabulary.classifier_ignore.matches(line) {
                continue;
            }
            if self.vocabulary.classifier_section.is_start(line) {
                in_table = true;
                continue;
            }
            if self.names_parameter(line) {
                in_table = true;
            }
            if in_table {
                if self.vocabulary.classifier_section.is_end(line) {
                    break;
                }
                lines.push(line);
            }
        }
        lines
    }

    /// A new row starts wherever a line opens with a known test name.
    fn merge_rows(&self, lines: &[&str]) -> Vec<String> {
        let mut rows: Vec<String> = Vec::new();
        for line in lines {
            match rows.last_mut() {
                Some(current) if !self.names_parameter(line) => {
                    current.push(' ');
                    current.push_str(line);
                }
                _ => rows.push(line.to_string()),
            }
        }
        rows
    }

    fn parse<'r>(&self, row: &'r str) -> Option<ParsedRow<'r>> {
        if let Some(caps) = NAME_VALUE_UNIT_REST.captures(row) {
            return Some(ParsedRow {
                name: caps.get(1)?.as_str(),
                value: caps.get(2)?.as_str(),
                unit: caps.get(3).map(|m| m.as_str()),
                range: caps.get(4).map(|m| m.as_str()),
            });
        }
        if let Some(caps) = NAME_VALUE_REST.captures(row) {
            let rest = caps.get(3)?.as_str().trim();
            let (unit, range) = split_unit(rest);
            return Some(ParsedRow {
                name: caps.get(1)?.as_str(),
                value: caps.get(2)?.as_str(),
                unit,
                range,
            });
        }
        let caps = NAME_VALUE.captures(row)?;
        Some(ParsedRow {
            name: caps.get(1)?.as_str(),
            value: caps.get(2)?.as_str(),
            unit: None,
            range: None,
        })
    }

    pub fn classify_row(&self, row: &str) -> Option<ParameterRecord> {
        let parsed = self.parse(row.trim())?;
        let parameter = self.vocabulary.canonical_for_name(parsed.name.trim())?;

        let value = FieldValue::new(parsed.value);
        let unit = parsed
            .unit
            .map(|u| FieldValue::new(self.vocabulary.normalize_unit(u)))
            .unwrap_or(FieldValue::Missing);
        let reference_range = parsed
            .range
            .map(|r| {
                let token = RANGE_TOKEN.find(r).map(|m| m.as_str()).unwrap_or(r);
                normalize_range(token)
            })
            .unwrap_or(FieldValue::Missing);

        let evidence = RowEvidence::from_fields(true, &value, &unit, &reference_range);
        Some(ParameterRecord {
            test_name: parameter.display_name.clone(),
            canonical_key: Some(parameter.key.clone()),
            status: determine_status(&value, &reference_range),
            method: FieldValue::from_option(self.vocabulary.first_method(row)),
            confidence: row_confidence(evidence),
            value,
            unit,
            reference_range,
            raw_text: row.trim().to_string(),
            source: ExtractionPath::Classifier,
        })
    }
}

impl StructuredExtractor for ParameterClassifier {
    fn path(&self) -> ExtractionPath {
        ExtractionPath::Classifier
    }

    /// One record per canonical parameter; the first row naming it wins.
    fn extract(&self, text: &str) -> Vec<ParameterRecord> {
        let section = self.section(text);
        let rows = self.merge_rows(&section);
        let mut seen = HashSet::new();
        let records: Vec<ParameterRecord> = rows
            .iter()
            .filter_map(|row| self.classify_row(row))
            .filter(|r| seen.insert(r.canonical_key.clone()))
            .collect();
        debug!(rows = rows.len(), classified = records.len(), "Classification complete");
        records
    }
}

/// `"g/dL 12.0-16.0"` splits into unit and range; a remainder that opens
/// with a number is all range.
fn split_unit(rest: &str) -> (Option<&str>, Option<&str>) {
    if rest.starts_with(|c: char| c.is_ascii_digit() || c == '<' || c == '>') {
        return (None, Some(rest));
    }
    match rest.split_once(char::is_whitespace) {
        Some((unit, range)) => (Some(unit), Some(range.trim())),
        None => (Some(rest), None),
    }
}

/// Classifier output as a JSON object keyed by display name.
pub fn classifier_view(records: &[ParameterRecord]) -> Value {
    let mut view = Map::new();
    for record in records {
        view.insert(
            record.test_name.clone(),
            json!({
                "value": json_value(&record.value),
                "unit": record.unit.as_str(),
                "reference_range": record.reference_range.as_str(),
                "status": record.status.label(),
            }),
        );
    }
    Value::Object(view)
}

/// Integers stay integers, decimals become JSON numbers, anything else a string.
fn json_value(value: &FieldValue) -> Value {
    let raw = value.as_str();
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    value
        .as_number()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}
