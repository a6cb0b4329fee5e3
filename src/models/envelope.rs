use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::enums::{EnvelopeStatus, ErrorKind, InputCategory, PdfRoute};
use super::parameter::ParameterRecord;

/// Terminal output of one processed upload.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    /// UUID v5 of the content hash: identical uploads share an id.
    pub request_id: Uuid,
    pub status: EnvelopeStatus,
    /// Free-text provenance (`direct_text`, `ocr_image_standard`, ...).
    pub extraction_method: String,
    /// 0..1, rounded to three places.
    pub confidence: f64,
    pub validation_message: String,
    pub raw_text: String,
    /// Flat merged view for downstream interpretation.
    pub medical_parameters: Vec<ParameterRecord>,
    pub parameter_sets: ParameterSets,
    pub anchor_extraction_csv: String,
    pub table_extraction_csv: String,
    pub classifier_json: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remediation: Vec<String>,
    pub debug_metadata: DebugMetadata,
}

/// One record list per structured extraction path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParameterSets {
    pub anchor_based: Vec<ParameterRecord>,
    pub table: Vec<ParameterRecord>,
    pub classifier: Vec<ParameterRecord>,
}

impl ParameterSets {
    pub fn is_empty(&self) -> bool {
        self.anchor_based.is_empty() && self.table.is_empty() && self.classifier.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Scores of one recognition attempt, kept in the bounded trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptSummary {
    pub attempt_index: usize,
    pub strategy: String,
    pub recognition_config: String,
    pub text_length: usize,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<InputCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_route: Option<PdfRoute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprocessing_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition_config: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_attempts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_out_attempts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_image_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_accepted: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_method: Option<String>,
    /// Accepted without any lab-specific signal.
    pub provisional: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matched_signals: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempt_trace: Vec<AttemptSummary>,
    pub vocabulary_version: String,
    pub content_sha256: String,
    pub processed_at: DateTime<Utc>,
}

/// Round a score to three decimal places for the envelope.
pub fn round_confidence(confidence: f32) -> f64 {
    let clamped = f64::from(confidence.clamp(0.0, 1.0));
    (clamped * 1000.0).round() / 1000.0
}
