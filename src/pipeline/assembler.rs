//! Builds the output envelope from routed text and the three record sets.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{
    round_confidence, DebugMetadata, EnvelopeError, EnvelopeStatus, ErrorKind, ExtractionResult,
    InputCategory, ParameterRecord, ParameterSets,
};
use crate::pipeline::extraction::{ExtractionError, RawInput, RoutedText, SUPPORTED_TYPES};
use crate::pipeline::structuring::{classifier_view, records_to_csv};

/// `extraction_method` of an envelope where nothing was read.
pub const NO_METHOD: &str = "none";

const PHOTO_TIPS: &[&str] = &[
    "Retake the photo with better lighting",
    "Make sure the text is in sharp focus",
    "Take the photo straight-on, not at an angle",
    "Avoid shadows and glare on the page",
    "Upload the original PDF instead of a photo when you have it",
    "Crop the image to the test results table",
    "Use a higher resolution so the text is clearly readable",
];

const STRUCTURED_TIPS: &[&str] = &[
    "Upload a lab report that lists parameter names with their values",
    "Check that the file is the exported report and not an empty template",
];

const RE_EXPORT_TIPS: &[&str] = &[
    "Make sure the file is not corrupted or truncated",
    "Re-export or re-save the document and upload it again",
];

/// Envelope factory. Never fails: every path ends in an [`ExtractionResult`].
pub struct ResultAssembler {
    vocabulary_version: String,
}

impl ResultAssembler {
    pub fn new(vocabulary_version: impl Into<String>) -> Self {
        Self {
            vocabulary_version: vocabulary_version.into(),
        }
    }

    /// Envelope for text the router produced, accepted or not.
    pub fn success(&self, input: &RawInput, routed: RoutedText, sets: ParameterSets) -> ExtractionResult {
        let status = if routed.accepted {
            EnvelopeStatus::Success
        } else {
            EnvelopeStatus::LowConfidence
        };
        let error = (!routed.accepted).then(|| EnvelopeError {
            kind: ErrorKind::RecognitionFailure,
            message: routed.validation_message.clone(),
        });
        let remediation = if status == EnvelopeStatus::LowConfidence || routed.provisional {
            remediation_for(status, routed.category)
        } else {
            Vec::new()
        };

        let details = routed.details;
        let mut debug_metadata = self.metadata(input, Some(routed.category));
        debug_metadata.pdf_route = routed.pdf_route;
        debug_metadata.preprocessing_strategy = details.preprocessing_strategy;
        debug_metadata.recognition_config = details.recognition_config;
        debug_metadata.total_attempts = details.total_attempts;
        debug_metadata.timed_out_attempts = details.timed_out_attempts;
        debug_metadata.original_image_size = details.original_image_size;
        debug_metadata.processed_image_size = details.processed_image_size;
        debug_metadata.pages_processed = details.pages_processed;
        debug_metadata.pages_accepted = details.pages_accepted;
        debug_metadata.fallback_method = details.fallback_method;
        debug_metadata.attempt_trace = details.attempt_trace;
        debug_metadata.provisional = routed.provisional;
        debug_metadata.matched_signals = routed.signals.iter().map(|s| s.as_str().to_string()).collect();

        ExtractionResult {
            request_id: request_id(input),
            status,
            extraction_method: routed.method,
            confidence: round_confidence(routed.confidence),
            validation_message: routed.validation_message,
            raw_text: routed.text,
            medical_parameters: merge_parameters(&sets),
            anchor_extraction_csv: records_to_csv(&sets.anchor_based),
            table_extraction_csv: records_to_csv(&sets.table),
            classifier_json: classifier_view(&sets.classifier),
            parameter_sets: sets,
            error,
            remediation,
            debug_metadata,
        }
    }

    /// Envelope for an upload that could not be read at all.
    pub fn failure(&self, input: &RawInput, category: InputCategory, error: &ExtractionError) -> ExtractionResult {
        let kind = error.kind();
        let status = match kind {
            ErrorKind::UnsupportedType | ErrorKind::MalformedStructuredInput => EnvelopeStatus::Error,
            ErrorKind::RecognitionFailure | ErrorKind::ValidationRejected => EnvelopeStatus::LowConfidence,
        };
        let message = error.to_string();

        ExtractionResult {
            request_id: request_id(input),
            status,
            extraction_method: NO_METHOD.to_string(),
            confidence: 0.0,
            validation_message: message.clone(),
            raw_text: String::new(),
            medical_parameters: Vec::new(),
            parameter_sets: ParameterSets::default(),
            anchor_extraction_csv: records_to_csv(&[]),
            table_extraction_csv: records_to_csv(&[]),
            classifier_json: Value::Object(Map::new()),
            error: Some(EnvelopeError { kind, message }),
            remediation: remediation_for(status, category),
            debug_metadata: self.metadata(input, Some(category)),
        }
    }

    fn metadata(&self, input: &RawInput, category: Option<InputCategory>) -> DebugMetadata {
        DebugMetadata {
            category,
            vocabulary_version: self.vocabulary_version.clone(),
            content_sha256: content_hash(&input.bytes),
            processed_at: Utc::now(),
            ..Default::default()
        }
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Same bytes under the same declared type always get the same id.
pub fn request_id(input: &RawInput) -> Uuid {
    let media_type = input.declared_media_type.as_deref().unwrap_or("unknown");
    let name = format!("{}:{media_type}", content_hash(&input.bytes));
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// Flat list for downstream interpretation.
///
/// Anchor order is kept; for each canonical parameter the classifier record
/// replaces the anchor one when both exist. Classifier-only parameters follow,
/// then table rows for tests the vocabulary does not know.
pub fn merge_parameters(sets: &ParameterSets) -> Vec<ParameterRecord> {
    let mut merged = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for anchor in &sets.anchor_based {
        let Some(key) = anchor.canonical_key.as_deref() else {
            continue;
        };
        if !seen.insert(key) {
            continue;
        }
        let classified = sets
            .classifier
            .iter()
            .find(|r| r.canonical_key.as_deref() == Some(key));
        merged.push(classified.unwrap_or(anchor).clone());
    }

    for record in &sets.classifier {
        if let Some(key) = record.canonical_key.as_deref() {
            if seen.insert(key) {
                merged.push(record.clone());
            }
        }
    }

    merged.extend(sets.table.iter().filter(|r| r.canonical_key.is_none()).cloned());
    merged
}

fn remediation_for(status: EnvelopeStatus, category: InputCategory) -> Vec<String> {
    if status == EnvelopeStatus::Error {
        let mut tips = vec![format!("Upload one of the supported file types: {SUPPORTED_TYPES}")];
        tips.extend(RE_EXPORT_TIPS.iter().map(|t| t.to_string()));
        return tips;
    }
    let tips = match category {
        InputCategory::Pdf | InputCategory::RasterImage => PHOTO_TIPS,
        InputCategory::StructuredJson | InputCategory::TabularCsv | InputCategory::PlainText => {
            STRUCTURED_TIPS
        }
        InputCategory::Unsupported => RE_EXPORT_TIPS,
    };
    tips.iter().map(|t| t.to_string()).collect()
}
