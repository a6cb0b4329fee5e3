//! Uploads that already carry text: JSON documents, CSV tables, plain text.
//!
//! Each is turned into report-like text lines so the same structured
//! extractors run on every input kind.

use serde_json::Value;

use super::ExtractionError;

/// Substrings that mark a JSON document as lab data.
const JSON_MEDICAL_KEYWORDS: &[&str] = &[
    "hemoglobin", "glucose", "cholesterol", "rbc", "wbc", "platelet", "hb", "hgb", "blood", "test",
    "result", "count", "level", "mcv", "mch", "mchc",
];

/// Top-level keys that identify the patient, not a measurement.
const SKIPPED_TOP_LEVEL_KEYS: &[&str] = &["name", "id"];

const JSON_HEADER: &str = "Medical Report Data (from JSON):";
const JSON_RAW_HEADER: &str = "Medical Data (from JSON):";

/// Pretty-printed JSON shorter than this is not worth structuring.
const MIN_RAW_JSON_LENGTH: usize = 20;

// ═══════════════════════════════════════════════════════════
// JSON
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum JsonReading {
    /// Parameter lines were found.
    Parameters { text: String, count: usize },
    /// No parameter lines; the whole document as text.
    Raw { text: String },
    /// Parsed, but nothing in it looks like lab data.
    NotMedical,
    /// Parsed, but too little to work with.
    Empty,
}

pub fn read_json_upload(bytes: &[u8]) -> Result<JsonReading, ExtractionError> {
    let raw = decode_text(bytes)?;
    let document: Value = serde_json::from_str(&raw)
        .map_err(|e| ExtractionError::MalformedStructuredInput(format!("Invalid JSON format: {e}")))?;

    let lowered = document.to_string().to_lowercase();
    let medical = JSON_MEDICAL_KEYWORDS.iter().any(|k| lowered.contains(k))
        || lowered.chars().any(|c| c.is_ascii_digit());
    if !medical {
        return Ok(JsonReading::NotMedical);
    }

    let mut lines = Vec::new();
    flatten_json(&document, "", &mut lines);
    if !lines.is_empty() {
        let count = lines.len();
        return Ok(JsonReading::Parameters {
            text: format!("{JSON_HEADER}\n\n{}", lines.join("\n")),
            count,
        });
    }

    let pretty = serde_json::to_string_pretty(&document)
        .map_err(|e| ExtractionError::MalformedStructuredInput(e.to_string()))?;
    if pretty.len() > MIN_RAW_JSON_LENGTH {
        Ok(JsonReading::Raw {
            text: format!("{JSON_RAW_HEADER}\n\n{pretty}"),
        })
    } else {
        Ok(JsonReading::Empty)
    }
}

/// One line per leaf. `{"value", "unit", "reference_range", "status"}` objects
/// become `name: value unit (Normal: range) [status]`.
pub fn flatten_json(value: &Value, prefix: &str, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if prefix.is_empty() && SKIPPED_TOP_LEVEL_KEYS.contains(&key.to_lowercase().as_str()) {
                    continue;
                }
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}_{key}")
                };
                match child {
                    Value::Object(inner) if inner.contains_key("value") => {
                        lines.push(parameter_line(&path, inner));
                    }
                    Value::Object(_) => flatten_json(child, &path, lines),
                    Value::Array(items) => {
                        for (i, item) in items.iter().enumerate() {
                            match item {
                                Value::Object(_) => flatten_json(item, &format!("{path}_{i}"), lines),
                                other => {
                                    if let Some(text) = scalar_text(other) {
                                        lines.push(format!("{path}_{i}: {text}"));
                                    }
                                }
                            }
                        }
                    }
                    other => {
                        if let Some(text) = scalar_text(other) {
                            lines.push(format!("{path}: {text}"));
                        }
                    }
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Object(_) => flatten_json(item, &format!("item_{i}"), lines),
                    other => {
                        if let Some(text) = scalar_text(other) {
                            lines.push(format!("value_{i}: {text}"));
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn parameter_line(name: &str, fields: &serde_json::Map<String, Value>) -> String {
    let field = |key: &str| fields.get(key).and_then(scalar_text).unwrap_or_default();
    let mut line = format!("{name}: {}", field("value"));
    let unit = field("unit");
    if !unit.is_empty() {
        line.push(' ');
        line.push_str(&unit);
    }
    let range = field("reference_range");
    if !range.is_empty() {
        line.push_str(&format!(" (Normal: {range})"));
    }
    let status = field("status");
    if !status.is_empty() {
        line.push_str(&format!(" [{status}]"));
    }
    line
}

/// Text of a scalar; `None` for null, blank strings and containers.
fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

// ═══════════════════════════════════════════════════════════
// CSV
// ═══════════════════════════════════════════════════════════

/// A rectangular CSV upload.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Header and rows as report lines, cells separated by a column gap.
    pub fn to_text(&self) -> String {
        std::iter::once(&self.header)
            .chain(self.rows.iter())
            .map(|cells| {
                cells
                    .iter()
                    .map(|c| c.trim())
                    .filter(|c| !c.is_empty())
                    .collect::<Vec<_>>()
                    .join("  ")
            })
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn read_csv_upload(bytes: &[u8]) -> Result<CsvTable, ExtractionError> {
    let raw = decode_text(bytes)?;
    let mut records = parse_csv_records(&raw).map_err(ExtractionError::MalformedStructuredInput)?;
    records.retain(|r| r.iter().any(|c| !c.trim().is_empty()));
    if records.is_empty() {
        return Err(ExtractionError::MalformedStructuredInput("CSV file is empty".into()));
    }

    let header = records.remove(0);
    for (i, row) in records.iter().enumerate() {
        if row.len() != header.len() {
            return Err(ExtractionError::MalformedStructuredInput(format!(
                "CSV row {} has {} columns, header has {}",
                i + 2,
                row.len(),
                header.len()
            )));
        }
    }
    Ok(CsvTable {
        header,
        rows: records,
    })
}

/// RFC 4180 records: quoted fields may hold commas, doubled quotes and newlines.
pub fn parse_csv_records(raw: &str) -> Result<Vec<Vec<String>>, String> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err("Unterminated quoted field".to_string());
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

// ═══════════════════════════════════════════════════════════
// Text
// ═══════════════════════════════════════════════════════════

/// Strict UTF-8, BOM stripped.
pub fn decode_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ExtractionError::EncodingError(format!("Upload is not valid UTF-8: {e}")))?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_parameters_become_lines() {
        let raw = br#"{
            "name": "Jane Doe",
            "hemoglobin": {"value": 13.5, "unit": "g/dL", "reference_range": "12.0-16.0", "status": "Normal"},
            "platelet_count": 250000
        }"#;
        let reading = read_json_upload(raw).unwrap();
        let JsonReading::Parameters { text, count } = reading else {
            panic!("expected parameter lines");
        };
        assert_eq!(count, 2);
        assert!(text.starts_with("Medical Report Data (from JSON):"));
        assert!(text.contains("hemoglobin: 13.5 g/dL (Normal: 12.0-16.0) [Normal]"));
        assert!(text.contains("platelet_count: 250000"));
        assert!(!text.contains("Jane Doe"));
    }

    #[test]
    fn nested_objects_and_arrays_are_prefixed() {
        let doc: Value = serde_json::json!({
            "cbc": {"mcv": {"value": "88", "unit": "fL"}},
            "tests": [{"wbc": 7500}, 42]
        });
        let mut lines = Vec::new();
        flatten_json(&doc, "", &mut lines);
        assert_eq!(lines, vec!["cbc_mcv: 88 fL", "tests_0_wbc: 7500", "tests_1: 42"]);
    }

    #[test]
    fn json_without_lab_data_is_not_medical() {
        let reading = read_json_upload(br#"{"greeting": "hello there"}"#).unwrap();
        assert_eq!(reading, JsonReading::NotMedical);
    }

    #[test]
    fn json_with_only_skipped_keys_falls_back_to_raw() {
        let reading = read_json_upload(br#"{"name": "Blood panel for patient 12"}"#).unwrap();
        assert!(matches!(reading, JsonReading::Raw { ref text } if text.contains("Blood panel")));
    }

    #[test]
    fn malformed_json_carries_parser_message() {
        let err = read_json_upload(b"{\"hemoglobin\": ").unwrap_err();
        let ExtractionError::MalformedStructuredInput(msg) = err else {
            panic!("wrong error kind");
        };
        assert!(msg.starts_with("Invalid JSON format"));
    }

    #[test]
    fn csv_rows_render_as_report_lines() {
        let table = read_csv_upload(b"test,value,unit\nHemoglobin,13.5,g/dL\n\"MCV, mean\",88,fL\n").unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.to_text(), "test  value  unit\nHemoglobin  13.5  g/dL\nMCV, mean  88  fL");
    }

    #[test]
    fn ragged_csv_is_malformed() {
        let err = read_csv_upload(b"a,b,c\n1,2\n").unwrap_err();
        assert!(err.to_string().contains("row 2 has 2 columns"));
    }

    #[test]
    fn empty_csv_is_malformed() {
        assert!(matches!(
            read_csv_upload(b"\n\n"),
            Err(ExtractionError::MalformedStructuredInput(_))
        ));
    }

    #[test]
    fn csv_quotes_and_crlf() {
        let records = parse_csv_records("a,\"say \"\"hi\"\"\"\r\n\"multi\nline\",x").unwrap();
        assert_eq!(records, vec![vec!["a", "say \"hi\""], vec!["multi\nline", "x"]]);
        assert!(parse_csv_records("\"open").is_err());
    }

    #[test]
    fn text_must_be_utf8() {
        assert_eq!(decode_text("\u{feff}Hb 13".as_bytes()).unwrap(), "Hb 13");
        assert!(matches!(decode_text(&[0xff, 0xfe, 0x00]), Err(ExtractionError::EncodingError(_))));
    }
}
