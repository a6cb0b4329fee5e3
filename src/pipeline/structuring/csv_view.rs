use crate::models::ParameterRecord;

/// Fixed column set shared by the anchor and table views.
pub const CSV_COLUMNS: [&str; 6] = ["test_name", "value", "unit", "reference_range", "method", "raw_text"];

/// Render records as CSV: header line, then one line per record.
///
/// Missing cells are the literal `NA`, never blank. `raw_text` is folded onto
/// one line. Cells holding a comma, quote or line break are quoted RFC 4180
/// style.
pub fn records_to_csv(records: &[ParameterRecord]) -> String {
    let mut out = CSV_COLUMNS.join(",");
    out.push('\n');
    for record in records {
        let raw_text = fold_whitespace(&record.raw_text);
        let cells = [
            record.test_name.as_str(),
            record.value.as_str(),
            record.unit.as_str(),
            record.reference_range.as_str(),
            record.method.as_str(),
            if raw_text.is_empty() { crate::models::NA } else { raw_text.as_str() },
        ];
        let line: Vec<String> = cells.iter().map(|c| quote_cell(c)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn fold_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn quote_cell(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
