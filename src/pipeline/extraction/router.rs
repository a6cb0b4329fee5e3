//! Input classification and dispatch to direct text reading or recognition.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::format::{classify_input, SUPPORTED_TYPES};
use super::pdf::join_pages;
use super::preprocess::{
    prepare_decoded, prepare_image, ExifOrientationCorrector, ImagePreprocessor,
    OrientationCorrector,
};
use super::recognition::{RecognitionOrchestrator, RecognitionOutcome, Resolution};
use super::sanitize::sanitize_extracted_text;
use super::structured_input::{decode_text, read_csv_upload, read_json_upload, JsonReading};
use super::types::{OcrEngine, PdfExtractor, PdfPageRenderer, RawInput};
use super::validation::{OutputValidator, SignalType};
use super::ExtractionError;
use crate::config::ExtractionConfig;
use crate::models::{AttemptSummary, InputCategory, PdfRoute};
use crate::pipeline::vocabulary::LabVocabulary;

/// Plain text uploads shorter than this are not even leniently accepted.
const LENIENT_TEXT_MIN_LENGTH: usize = 10;

/// Text obtained from one upload, with its provenance.
#[derive(Debug, Clone)]
pub struct RoutedText {
    pub category: InputCategory,
    pub pdf_route: Option<PdfRoute>,
    /// `direct_text`, `ocr_image_standard`, `emergency_fallback`, ...
    pub method: String,
    pub text: String,
    pub confidence: f32,
    /// False when every tier was exhausted; the envelope is then low confidence.
    pub accepted: bool,
    pub validation_message: String,
    pub signals: Vec<SignalType>,
    pub provisional: bool,
    pub details: RouteDetails,
}

/// Recognition bookkeeping surfaced in the envelope's debug metadata.
#[derive(Debug, Clone, Default)]
pub struct RouteDetails {
    pub preprocessing_strategy: Option<String>,
    pub recognition_config: Option<String>,
    pub total_attempts: Option<usize>,
    pub timed_out_attempts: Option<usize>,
    pub original_image_size: Option<String>,
    pub processed_image_size: Option<String>,
    pub pages_processed: Option<usize>,
    pub pages_accepted: Option<usize>,
    pub fallback_method: Option<String>,
    pub attempt_trace: Vec<AttemptSummary>,
}

impl RouteDetails {
    fn from_outcome(outcome: &RecognitionOutcome) -> Self {
        Self {
            preprocessing_strategy: outcome.strategy.map(|s| s.as_str().to_string()),
            recognition_config: outcome.recognition_config.map(|c| c.as_str().to_string()),
            total_attempts: Some(outcome.total_attempts),
            timed_out_attempts: Some(outcome.timed_out_attempts),
            fallback_method: match outcome.resolution {
                Resolution::Emergency(transform) => Some(transform.as_str().to_string()),
                _ => None,
            },
            attempt_trace: outcome.trace.clone(),
            ..Default::default()
        }
    }
}

/// Classifies uploads and turns each into validated text.
pub struct FileRouter {
    config: ExtractionConfig,
    vocabulary: Arc<LabVocabulary>,
    validator: Arc<OutputValidator>,
    recognizer: RecognitionOrchestrator,
    pdf_extractor: Box<dyn PdfExtractor>,
    pdf_renderer: Option<Box<dyn PdfPageRenderer>>,
    orientation: Box<dyn OrientationCorrector>,
}

impl FileRouter {
    pub fn new(
        config: ExtractionConfig,
        vocabulary: Arc<LabVocabulary>,
        ocr_engine: Arc<dyn OcrEngine>,
        preprocessor: Arc<dyn ImagePreprocessor>,
        pdf_extractor: Box<dyn PdfExtractor>,
    ) -> Self {
        let validator = Arc::new(OutputValidator::new(vocabulary.clone(), &config));
        let recognizer = RecognitionOrchestrator::new(
            ocr_engine,
            preprocessor,
            validator.clone(),
            vocabulary.clone(),
            &config,
        );
        Self {
            config,
            vocabulary,
            validator,
            recognizer,
            pdf_extractor,
            pdf_renderer: None,
            orientation: Box::new(ExifOrientationCorrector),
        }
    }

    /// Add a page renderer for scanned PDFs.
    pub fn with_pdf_renderer(mut self, renderer: Box<dyn PdfPageRenderer>) -> Self {
        self.pdf_renderer = Some(renderer);
        self
    }

    pub fn with_orientation_corrector(mut self, corrector: Box<dyn OrientationCorrector>) -> Self {
        self.orientation = corrector;
        self
    }

    pub fn validator(&self) -> &OutputValidator {
        &self.validator
    }

    pub fn route(&self, input: &RawInput) -> Result<RoutedText, ExtractionError> {
        let category = classify_input(input);
        info!(
            category = category.as_str(),
            size = input.bytes.len(),
            "Routing upload"
        );

        if category.is_supported() && input.bytes.len() > self.config.max_input_bytes {
            return Err(ExtractionError::InputTooLarge {
                size: input.bytes.len(),
                limit: self.config.max_input_bytes,
            });
        }

        match category {
            InputCategory::Pdf => self.route_pdf(&input.bytes),
            InputCategory::RasterImage => self.route_image(&input.bytes),
            InputCategory::StructuredJson => self.route_json(&input.bytes),
            InputCategory::TabularCsv => self.route_csv(&input.bytes),
            InputCategory::PlainText => self.route_text(&input.bytes),
            InputCategory::Unsupported => Err(ExtractionError::UnsupportedType {
                media_type: input
                    .declared_media_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                file_name: input.file_name.clone(),
                supported: SUPPORTED_TYPES.to_string(),
            }),
        }
    }

    /// Enough characters and at least one lab signal.
    pub fn looks_medical(&self, text: &str) -> bool {
        text.trim().chars().count() >= self.config.min_text_length
            && self.vocabulary.medical_signals.matches(text)
    }

    // ── PDF ──

    fn route_pdf(&self, bytes: &[u8]) -> Result<RoutedText, ExtractionError> {
        let direct = match self.pdf_extractor.extract_pages(bytes) {
            Ok(pages) => sanitize_extracted_text(&join_pages(&pages)),
            Err(ExtractionError::PdfEncrypted) => return Err(ExtractionError::PdfEncrypted),
            Err(e) => {
                warn!(error = %e, "PDF text layer unreadable, treating as scanned");
                String::new()
            }
        };

        if self.looks_medical(&direct) {
            info!(length = direct.len(), "PDF text layer is sufficient");
            return Ok(self.direct_text(
                InputCategory::Pdf,
                Some(PdfRoute::DirectText),
                "direct_text",
                direct,
                self.config.direct_text_confidence,
                "Direct text layer extracted; medical content detected".to_string(),
            ));
        }

        debug!(length = direct.len(), "PDF text layer insufficient, rendering pages");
        self.route_scanned_pdf(bytes)
    }

    fn route_scanned_pdf(&self, bytes: &[u8]) -> Result<RoutedText, ExtractionError> {
        let renderer = self.pdf_renderer.as_ref().ok_or_else(|| ExtractionError::PdfRendering {
            page: 0,
            reason: "No page renderer configured for scanned PDFs".to_string(),
        })?;
        let pages = renderer.render_pages(bytes, self.config.render_dpi)?;
        let page_count = pages.len();

        let mut combined = String::new();
        let mut confidence_sum = 0.0f32;
        let mut accepted_pages = 0usize;
        let mut total_attempts = 0usize;
        let mut timed_out = 0usize;
        let mut trace = Vec::new();

        for (page, rendered) in pages.into_iter().enumerate() {
            let prepared = match rendered.and_then(|img| prepare_decoded(img, &self.config)) {
                Ok(prepared) => prepared,
                Err(e) => {
                    warn!(page = page + 1, error = %e, "Skipping page that could not be rendered");
                    continue;
                }
            };

            let outcome = self.recognizer.recognize(&prepared.image);
            total_attempts += outcome.total_attempts;
            timed_out += outcome.timed_out_attempts;
            if trace.is_empty() {
                trace = outcome.trace.clone();
            }
            if outcome.is_accepted() {
                combined.push_str(&format!("\n--- Page {} ---\n", page + 1));
                combined.push_str(&outcome.text);
                confidence_sum += outcome.confidence;
                accepted_pages += 1;
            } else {
                debug!(page = page + 1, reason = %outcome.verdict.message, "Page rejected");
            }
        }

        let details = RouteDetails {
            total_attempts: Some(total_attempts),
            timed_out_attempts: Some(timed_out),
            pages_processed: Some(page_count),
            pages_accepted: Some(accepted_pages),
            attempt_trace: trace,
            ..Default::default()
        };

        if accepted_pages == 0 {
            warn!(pages = page_count, "No valid pages found in scanned PDF");
            return Ok(RoutedText {
                category: InputCategory::Pdf,
                pdf_route: Some(PdfRoute::Scanned),
                method: "ocr_scanned_pdf".to_string(),
                text: String::new(),
                confidence: 0.0,
                accepted: false,
                validation_message: "No valid pages found in PDF".to_string(),
                signals: Vec::new(),
                provisional: false,
                details,
            });
        }

        let confidence = confidence_sum / accepted_pages as f32;
        let verdict = self.validator.validate(&combined, confidence);
        info!(
            pages = page_count,
            accepted = accepted_pages,
            confidence,
            "Scanned PDF recognized"
        );
        Ok(RoutedText {
            category: InputCategory::Pdf,
            pdf_route: Some(PdfRoute::Scanned),
            method: "ocr_scanned_pdf".to_string(),
            text: combined.trim().to_string(),
            confidence,
            accepted: verdict.accepted,
            validation_message: verdict.message,
            signals: verdict.signals,
            provisional: verdict.provisional,
            details,
        })
    }

    // ── Images ──

    fn route_image(&self, bytes: &[u8]) -> Result<RoutedText, ExtractionError> {
        let prepared = prepare_image(bytes, self.orientation.as_ref(), &self.config)?;
        let outcome = self.recognizer.recognize(&prepared.image);

        let mut details = RouteDetails::from_outcome(&outcome);
        details.original_image_size = Some(prepared.original_size_label());
        details.processed_image_size = Some(prepared.processed_size_label());

        let method = match outcome.resolution {
            Resolution::Selected => format!(
                "ocr_image_{}",
                outcome.strategy.map(|s| s.as_str()).unwrap_or("unknown")
            ),
            Resolution::Emergency(_) => "emergency_fallback".to_string(),
            Resolution::Exhausted => "ocr_image_exhausted".to_string(),
        };
        let validation_message = match outcome.resolution {
            Resolution::Exhausted => format!(
                "{}. Tried {} different approaches.",
                outcome.verdict.message, outcome.total_attempts
            ),
            _ => outcome.verdict.message.clone(),
        };

        Ok(RoutedText {
            category: InputCategory::RasterImage,
            pdf_route: None,
            method,
            accepted: outcome.is_accepted(),
            confidence: outcome.confidence,
            validation_message,
            signals: outcome.verdict.signals.clone(),
            provisional: outcome.verdict.provisional,
            text: outcome.text,
            details,
        })
    }

    // ── Uploads that already carry text ──

    fn route_json(&self, bytes: &[u8]) -> Result<RoutedText, ExtractionError> {
        match read_json_upload(bytes)? {
            JsonReading::Parameters { text, count } => Ok(self.direct_text(
                InputCategory::StructuredJson,
                None,
                "json_direct",
                text,
                self.config.direct_text_confidence,
                format!("Successfully extracted {count} medical parameters from JSON"),
            )),
            JsonReading::Raw { text } => Ok(self.direct_text(
                InputCategory::StructuredJson,
                None,
                "json_fallback",
                text,
                self.config.json_fallback_confidence,
                "JSON processed as raw text; no structured medical parameters found".to_string(),
            )),
            JsonReading::NotMedical => Err(ExtractionError::ValidationRejected(
                "JSON file doesn't contain medical data".to_string(),
            )),
            JsonReading::Empty => Err(ExtractionError::EmptyUpload(
                "No medical parameters found in JSON. Expected {\"parameter\": {\"value\": ..., \"unit\": ...}}"
                    .to_string(),
            )),
        }
    }

    fn route_csv(&self, bytes: &[u8]) -> Result<RoutedText, ExtractionError> {
        let table = read_csv_upload(bytes)?;
        let rows = table.rows.len();
        Ok(self.direct_text(
            InputCategory::TabularCsv,
            None,
            "csv_direct",
            table.to_text(),
            self.config.direct_text_confidence,
            format!("CSV table read directly: {rows} rows"),
        ))
    }

    fn route_text(&self, bytes: &[u8]) -> Result<RoutedText, ExtractionError> {
        let text = decode_text(bytes)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ExtractionError::EmptyUpload("Text file is empty".to_string()));
        }

        if self.looks_medical(trimmed) {
            return Ok(self.direct_text(
                InputCategory::PlainText,
                None,
                "direct_text_file",
                trimmed.to_string(),
                self.config.direct_text_confidence,
                "Direct text file processing; medical content detected".to_string(),
            ));
        }
        if trimmed.chars().count() >= LENIENT_TEXT_MIN_LENGTH {
            return Ok(self.direct_text(
                InputCategory::PlainText,
                None,
                "direct_text_file_lenient",
                trimmed.to_string(),
                self.config.lenient_text_confidence,
                "Text file processed with lenient validation".to_string(),
            ));
        }
        Err(ExtractionError::ValidationRejected(
            "Text file content too short or no medical data detected".to_string(),
        ))
    }

    /// Text that needed no recognition. Signals still come from the validator.
    fn direct_text(
        &self,
        category: InputCategory,
        pdf_route: Option<PdfRoute>,
        method: &str,
        text: String,
        confidence: f32,
        validation_message: String,
    ) -> RoutedText {
        let signals = self.validator.signals(&text);
        let provisional = !signals.iter().any(SignalType::is_lab_specific);
        RoutedText {
            category,
            pdf_route,
            method: method.to_string(),
            text,
            confidence,
            accepted: true,
            validation_message,
            signals,
            provisional,
            details: RouteDetails::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

    use super::*;
    use crate::pipeline::extraction::ocr::{mock_page, MockOcrEngine, RecognitionConfigId};
    use crate::pipeline::extraction::pdf::{make_text_pdf, MockPdfExtractor, PdfTextExtractor};
    use crate::pipeline::extraction::pdfium::MockPdfPageRenderer;
    use crate::pipeline::extraction::preprocess::MockImagePreprocessor;

    fn router(engine: Arc<MockOcrEngine>, pdf: Box<dyn PdfExtractor>) -> FileRouter {
        FileRouter::new(
            ExtractionConfig::default(),
            Arc::new(LabVocabulary::bundled().unwrap()),
            engine,
            Arc::new(MockImagePreprocessor),
            pdf,
        )
    }

    fn light_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([240, 240, 240]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    #[test]
    fn digital_pdf_skips_recognition() {
        let engine = Arc::new(MockOcrEngine::new("never used", 0.9));
        let router = router(engine.clone(), Box::new(PdfTextExtractor));
        let pdf = make_text_pdf(&["Hemoglobin 13.5 g/dL 12.0-16.0"]);
        let routed = router
            .route(&RawInput::new(pdf, Some("application/pdf"), "report.pdf"))
            .unwrap();
        assert_eq!(routed.method, "direct_text");
        assert_eq!(routed.pdf_route, Some(PdfRoute::DirectText));
        assert!(routed.accepted);
        assert!(routed.text.contains("Hemoglobin"));
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn scanned_pdf_joins_accepted_pages() {
        let engine = Arc::new(MockOcrEngine::new("Platelet Count 250000 /cumm", 0.8));
        let router = router(engine.clone(), Box::new(MockPdfExtractor::without_text(2)))
            .with_pdf_renderer(Box::new(MockPdfPageRenderer::new(2)));
        let routed = router
            .route(&RawInput::new(b"%PDF-1.4".to_vec(), None, "scan.pdf"))
            .unwrap();
        assert_eq!(routed.method, "ocr_scanned_pdf");
        assert_eq!(routed.pdf_route, Some(PdfRoute::Scanned));
        assert!(routed.accepted);
        assert!(routed.text.starts_with("--- Page 1 ---"));
        assert!(routed.text.contains("--- Page 2 ---"));
        assert!((routed.confidence - 0.8).abs() < 1e-6);
        assert_eq!(routed.details.pages_processed, Some(2));
        assert_eq!(routed.details.pages_accepted, Some(2));
        assert_eq!(engine.calls(), 72);
    }

    #[test]
    fn scanned_pdf_without_renderer_is_an_error() {
        let engine = Arc::new(MockOcrEngine::blank());
        let router = router(engine, Box::new(MockPdfExtractor::without_text(1)));
        let err = router
            .route(&RawInput::new(b"%PDF-1.4".to_vec(), None, "scan.pdf"))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::PdfRendering { .. }));
    }

    #[test]
    fn image_method_names_the_winning_strategy() {
        let engine = Arc::new(MockOcrEngine::with_responder(|_, config| {
            let conf = if config.id == RecognitionConfigId::SingleColumn { 0.9 } else { 0.4 };
            Ok(mock_page("WBC Count 7500 /cumm", conf))
        }));
        let router = router(engine, Box::new(PdfTextExtractor));
        let routed = router
            .route(&RawInput::new(light_png(200, 150), Some("image/png"), "photo.png"))
            .unwrap();
        assert_eq!(routed.method, "ocr_image_standard");
        assert_eq!(routed.details.recognition_config.as_deref(), Some("single_column"));
        assert_eq!(routed.details.original_image_size.as_deref(), Some("200x150"));
        assert_eq!(routed.details.processed_image_size.as_deref(), Some("800x600"));
        assert_eq!(routed.details.total_attempts, Some(36));
    }

    #[test]
    fn blank_image_is_not_accepted() {
        let router = router(Arc::new(MockOcrEngine::blank()), Box::new(PdfTextExtractor));
        let routed = router
            .route(&RawInput::new(light_png(200, 150), Some("image/png"), "blank.png"))
            .unwrap();
        assert!(!routed.accepted);
        assert!(routed.validation_message.contains("Tried 36 different approaches"));
    }

    #[test]
    fn unsupported_type_names_type_and_supported_set() {
        let router = router(Arc::new(MockOcrEngine::blank()), Box::new(PdfTextExtractor));
        let err = router
            .route(&RawInput::new(b"PK".to_vec(), Some("application/zip"), "report.zip"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("application/zip"));
        assert!(msg.contains(SUPPORTED_TYPES));
    }

    #[test]
    fn text_uploads_direct_lenient_and_empty() {
        let router = router(Arc::new(MockOcrEngine::blank()), Box::new(PdfTextExtractor));
        let direct = router
            .route(&RawInput::new(b"Hemoglobin 13.5 g/dL".to_vec(), Some("text/plain"), "r.txt"))
            .unwrap();
        assert_eq!(direct.method, "direct_text_file");
        assert!((direct.confidence - 0.95).abs() < 1e-6);

        let lenient = router
            .route(&RawInput::new(b"Seen by the clinic today".to_vec(), None, "note.txt"))
            .unwrap();
        assert_eq!(lenient.method, "direct_text_file_lenient");
        assert!((lenient.confidence - 0.7).abs() < 1e-6);

        let err = router
            .route(&RawInput::new(b"  \n ".to_vec(), None, "empty.txt"))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyUpload(_)));
    }

    #[test]
    fn json_and_csv_uploads() {
        let router = router(Arc::new(MockOcrEngine::blank()), Box::new(PdfTextExtractor));
        let json = router
            .route(&RawInput::new(
                br#"{"hemoglobin": {"value": 13.5, "unit": "g/dL"}}"#.to_vec(),
                Some("application/json"),
                "r.json",
            ))
            .unwrap();
        assert_eq!(json.method, "json_direct");

        let csv = router
            .route(&RawInput::new(b"test,value\nMCV,88\n".to_vec(), None, "r.csv"))
            .unwrap();
        assert_eq!(csv.method, "csv_direct");
        assert!(csv.text.contains("MCV  88"));

        let err = router
            .route(&RawInput::new(b"{oops".to_vec(), None, "r.json"))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedStructuredInput(_)));
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let config = ExtractionConfig {
            max_input_bytes: 8,
            ..Default::default()
        };
        let router = FileRouter::new(
            config,
            Arc::new(LabVocabulary::bundled().unwrap()),
            Arc::new(MockOcrEngine::blank()),
            Arc::new(MockImagePreprocessor),
            Box::new(PdfTextExtractor),
        );
        let err = router
            .route(&RawInput::new(b"Hemoglobin 13.5".to_vec(), None, "r.txt"))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::InputTooLarge { size: 15, limit: 8 }));
    }
}
