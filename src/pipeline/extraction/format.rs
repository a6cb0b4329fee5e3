use std::path::Path;

use super::types::RawInput;
use crate::models::InputCategory;

/// Human-readable list of accepted uploads, quoted in error envelopes.
pub const SUPPORTED_TYPES: &str = "PDF, PNG, JPG, JPEG, JSON, CSV, TXT";

/// Classify an upload: declared media type first, then the file extension,
/// then a lenient look at the name, then magic bytes.
pub fn classify_input(input: &RawInput) -> InputCategory {
    if let Some(category) = input
        .declared_media_type
        .as_deref()
        .and_then(category_for_media_type)
    {
        return category;
    }

    if let Some(category) = mime_guess::from_path(&input.file_name)
        .iter()
        .find_map(|mime| category_for_media_type(mime.essence_str()))
    {
        return category;
    }

    if let Some(category) = category_from_name(&input.file_name) {
        return category;
    }

    category_from_magic(&input.bytes).unwrap_or(InputCategory::Unsupported)
}

fn category_for_media_type(media_type: &str) -> Option<InputCategory> {
    let essence = media_type.split(';').next().unwrap_or("").trim().to_lowercase();
    match essence.as_str() {
        "application/pdf" | "application/x-pdf" => Some(InputCategory::Pdf),
        "image/png" | "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(InputCategory::RasterImage),
        "application/json" | "text/json" => Some(InputCategory::StructuredJson),
        "text/csv" | "application/csv" | "text/comma-separated-values" => Some(InputCategory::TabularCsv),
        "text/plain" | "text/txt" => Some(InputCategory::PlainText),
        _ => None,
    }
}

/// Names like `report.jpg.download` or `scan.PNG (1)`: image-like names
/// win over rejection.
fn category_from_name(file_name: &str) -> Option<InputCategory> {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_name)
        .to_lowercase();
    if [".png", ".jpg", ".jpeg"].iter().any(|ext| name.contains(ext)) {
        Some(InputCategory::RasterImage)
    } else if name.contains(".pdf") {
        Some(InputCategory::Pdf)
    } else if name.contains(".json") {
        Some(InputCategory::StructuredJson)
    } else if name.contains(".csv") {
        Some(InputCategory::TabularCsv)
    } else if name.contains(".txt") {
        Some(InputCategory::PlainText)
    } else {
        None
    }
}

/// Magic bytes, for uploads that carry neither a usable type nor a name.
fn category_from_magic(bytes: &[u8]) -> Option<InputCategory> {
    match bytes {
        // %PDF
        [0x25, 0x50, 0x44, 0x46, ..] => Some(InputCategory::Pdf),
        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some(InputCategory::RasterImage),
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some(InputCategory::RasterImage),
        _ => None,
    }
}
