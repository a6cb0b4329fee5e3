use image::{DynamicImage, GrayImage};
use serde::Serialize;

use super::ocr::{RecognitionConfig, RecognitionConfigId};
use super::preprocess::PreprocessingStrategy;
use super::ExtractionError;

/// An upload as received: bytes plus what the caller claims it is.
#[derive(Debug, Clone)]
pub struct RawInput {
    pub bytes: Vec<u8>,
    pub declared_media_type: Option<String>,
    pub file_name: String,
}

impl RawInput {
    pub fn new(bytes: Vec<u8>, declared_media_type: Option<&str>, file_name: &str) -> Self {
        Self {
            bytes,
            declared_media_type: declared_media_type
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty()),
            file_name: file_name.to_string(),
        }
    }
}

/// One recognized word with its engine confidence (0..1, negative when unassigned).
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWordResult {
    pub text: String,
    pub confidence: f32,
}

/// Raw OCR result from the engine
#[derive(Debug, Clone, PartialEq)]
pub struct OcrPageResult {
    pub text: String,
    /// Mean of the positive word confidences.
    pub confidence: f32,
    pub word_confidences: Vec<OcrWordResult>,
}

impl OcrPageResult {
    pub fn from_words(text: String, word_confidences: Vec<OcrWordResult>) -> Self {
        let confidence = mean_positive_confidence(&word_confidences);
        Self {
            text,
            confidence,
            word_confidences,
        }
    }
}

/// Mean over tokens with a positive confidence. Non-positive tokens are
/// excluded, not counted as zero.
pub fn mean_positive_confidence(words: &[OcrWordResult]) -> f32 {
    let (sum, count) = words
        .iter()
        .filter(|w| w.confidence > 0.0)
        .fold((0.0f32, 0usize), |(sum, count), w| (sum + w.confidence, count + 1));
    if count == 0 {
        0.0
    } else {
        (sum / count as f32).min(1.0)
    }
}

/// One (preprocessing strategy, recognition config) execution over an image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionAttempt {
    pub preprocessing_strategy: PreprocessingStrategy,
    pub recognition_config: RecognitionConfigId,
    pub recognized_text: String,
    pub mean_token_confidence: f32,
    pub attempt_index: usize,
}

impl RecognitionAttempt {
    /// Length of the trimmed text in characters.
    pub fn text_len(&self) -> usize {
        self.recognized_text.trim().chars().count()
    }
}

/// OCR engine abstraction (allows mocking for tests)
pub trait OcrEngine: Send + Sync {
    fn recognize(
        &self,
        image: &GrayImage,
        config: &RecognitionConfig,
    ) -> Result<OcrPageResult, ExtractionError>;
}

/// PDF text-layer extraction abstraction. One string per page.
pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError>;
}

/// One rendered page: its image, or why that page alone could not be drawn.
pub type RenderedPage = Result<DynamicImage, ExtractionError>;

/// Rasterizes the pages of a scanned PDF for recognition.
pub trait PdfPageRenderer: Send + Sync {
    /// Every page, in order. A document that cannot be opened fails as a
    /// whole; a single bad page fails only its own slot.
    fn render_pages(&self, pdf_bytes: &[u8], dpi: u32) -> Result<Vec<RenderedPage>, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, confidence: f32) -> OcrWordResult {
        OcrWordResult {
            text: text.into(),
            confidence,
        }
    }

    #[test]
    fn non_positive_tokens_are_excluded_not_zeroed() {
        let words = vec![word("Hemoglobin", 0.9), word("~", -1.0), word("13.5", 0.7), word("|", 0.0)];
        let mean = mean_positive_confidence(&words);
        assert!((mean - 0.8).abs() < 1e-6);
    }

    #[test]
    fn no_positive_tokens_means_zero() {
        assert_eq!(mean_positive_confidence(&[]), 0.0);
        assert_eq!(mean_positive_confidence(&[word("?", -1.0)]), 0.0);
    }

    #[test]
    fn raw_input_normalizes_media_type() {
        let input = RawInput::new(vec![], Some(" Image/PNG "), "scan.png");
        assert_eq!(input.declared_media_type.as_deref(), Some("image/png"));
        let input = RawInput::new(vec![], Some(""), "scan.png");
        assert!(input.declared_media_type.is_none());
    }

    #[test]
    fn attempt_length_ignores_surrounding_whitespace() {
        let attempt = RecognitionAttempt {
            preprocessing_strategy: PreprocessingStrategy::Standard,
            recognition_config: RecognitionConfigId::UniformBlock,
            recognized_text: "  Hb 13.5 \n".into(),
            mean_token_confidence: 0.5,
            attempt_index: 0,
        };
        assert_eq!(attempt.text_len(), 7);
    }
}
