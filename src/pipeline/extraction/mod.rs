pub mod types;
pub mod imaging;
pub mod preprocess;
pub mod ocr;
pub mod pdf;
pub mod pdf_renderer;
pub mod pdfium;
pub mod sanitize;
pub mod validation;
pub mod recognition;
pub mod format;
pub mod structured_input;
pub mod router;

pub use types::*;
pub use preprocess::*;
pub use ocr::*;
pub use pdf::*;
pub use validation::*;
pub use recognition::*;
pub use format::*;
pub use router::*;

use std::path::PathBuf;

use thiserror::Error;

use crate::models::ErrorKind;
use crate::pipeline::vocabulary::VocabularyError;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tesseract OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("Tesseract OCR configuration error: {0}")]
    OcrConfig(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("Tessdata not found at: {0}")]
    TessdataNotFound(PathBuf),

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF page {page} could not be rendered: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDF is encrypted or password-protected")]
    PdfEncrypted,

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Text encoding error: {0}")]
    EncodingError(String),

    #[error("Unsupported file type '{media_type}' ({file_name}). Supported: {supported}")]
    UnsupportedType {
        media_type: String,
        file_name: String,
        supported: String,
    },

    #[error("Input of {size} bytes exceeds the {limit} byte limit")]
    InputTooLarge { size: usize, limit: usize },

    #[error("Malformed structured input: {0}")]
    MalformedStructuredInput(String),

    #[error("Upload has no content: {0}")]
    EmptyUpload(String),

    #[error("Recognition produced no usable text: {0}")]
    RecognitionExhausted(String),

    #[error("Recognized text rejected: {0}")]
    ValidationRejected(String),

    #[error("Vocabulary error: {0}")]
    Vocabulary(#[from] VocabularyError),
}

impl ExtractionError {
    /// Position of this failure in the envelope error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedType { .. } | Self::InputTooLarge { .. } | Self::PdfEncrypted => {
                ErrorKind::UnsupportedType
            }
            Self::MalformedStructuredInput(_) | Self::EncodingError(_) | Self::EmptyUpload(_) => {
                ErrorKind::MalformedStructuredInput
            }
            Self::ValidationRejected(_) => ErrorKind::ValidationRejected,
            Self::Io(_)
            | Self::OcrInit(_)
            | Self::OcrConfig(_)
            | Self::OcrProcessing(_)
            | Self::TessdataNotFound(_)
            | Self::PdfParsing(_)
            | Self::PdfRendering { .. }
            | Self::ImageProcessing(_)
            | Self::RecognitionExhausted(_)
            | Self::Vocabulary(_) => ErrorKind::RecognitionFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_mapping() {
        let unsupported = ExtractionError::UnsupportedType {
            media_type: "application/zip".into(),
            file_name: "report.zip".into(),
            supported: "pdf".into(),
        };
        assert_eq!(unsupported.kind(), ErrorKind::UnsupportedType);
        assert_eq!(
            ExtractionError::MalformedStructuredInput("eof".into()).kind(),
            ErrorKind::MalformedStructuredInput
        );
        assert_eq!(
            ExtractionError::OcrProcessing("boom".into()).kind(),
            ErrorKind::RecognitionFailure
        );
        assert_eq!(
            ExtractionError::ValidationRejected("short".into()).kind(),
            ErrorKind::ValidationRejected
        );
    }

    #[test]
    fn unsupported_message_names_type_and_supported_set() {
        let err = ExtractionError::UnsupportedType {
            media_type: "application/zip".into(),
            file_name: "report.zip".into(),
            supported: "PDF, PNG, JPEG".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("application/zip"));
        assert!(msg.contains("PDF, PNG, JPEG"));
    }
}
