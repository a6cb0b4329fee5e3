//! Lab report processing: the single entry point of the pipeline.
//!
//! route (classify + read / recognize + validate) → structure (three
//! independent extractors) → assemble the envelope.
//!
//! Collaborators are injected as trait objects, so the whole flow runs in
//! tests against mock recognition and rendering engines.

use std::sync::Arc;

use tracing::{info, info_span, warn};

use crate::config::ExtractionConfig;
use crate::models::{ExtractionPath, ExtractionResult, ParameterSets};
use crate::pipeline::assembler::ResultAssembler;
use crate::pipeline::extraction::pdf_renderer::default_page_renderer;
use crate::pipeline::extraction::{
    classify_input, default_ocr_engine, FileRouter, PdfTextExtractor, PixelPreprocessor, RawInput,
};
use crate::pipeline::structuring::{
    AnchorBasedExtractor, ParameterClassifier, StructuredExtractor, TableExtractor,
};
use crate::pipeline::vocabulary::LabVocabulary;

pub struct LabReportProcessor {
    router: FileRouter,
    extractors: Vec<Box<dyn StructuredExtractor>>,
    assembler: ResultAssembler,
}

impl LabReportProcessor {
    pub fn new(vocabulary: Arc<LabVocabulary>, router: FileRouter) -> Self {
        let extractors: Vec<Box<dyn StructuredExtractor>> = vec![
            Box::new(AnchorBasedExtractor::new(vocabulary.clone())),
            Box::new(TableExtractor::new(vocabulary.clone())),
            Box::new(ParameterClassifier::new(vocabulary.clone())),
        ];
        Self {
            router,
            extractors,
            assembler: ResultAssembler::new(vocabulary.version.clone()),
        }
    }

    /// Production wiring: Tesseract when available, pixel preprocessing,
    /// pdf-extract for text layers and PDFium (or embedded-image
    /// extraction) for scanned pages.
    pub fn with_defaults(config: ExtractionConfig, vocabulary: Arc<LabVocabulary>) -> Self {
        let router = FileRouter::new(
            config,
            vocabulary.clone(),
            default_ocr_engine(),
            Arc::new(PixelPreprocessor),
            Box::new(PdfTextExtractor),
        )
        .with_pdf_renderer(default_page_renderer());
        Self::new(vocabulary, router)
    }

    /// Process one upload. Never fails: every outcome is an envelope.
    pub fn process(&self, input: RawInput) -> ExtractionResult {
        let media_type = input.declared_media_type.as_deref().unwrap_or("unknown");
        let _span = info_span!(
            "process_upload",
            file_name = %input.file_name,
            media_type = %media_type
        )
        .entered();

        let result = match self.router.route(&input) {
            Ok(routed) => {
                let sets = if routed.accepted {
                    self.structure(&routed.text)
                } else {
                    ParameterSets::default()
                };
                self.assembler.success(&input, routed, sets)
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind().as_str(), "Upload could not be read");
                self.assembler.failure(&input, classify_input(&input), &e)
            }
        };

        info!(
            status = result.status.as_str(),
            method = %result.extraction_method,
            confidence = result.confidence,
            parameters = result.medical_parameters.len(),
            "Upload processed"
        );
        result
    }

    /// Run every structured extractor over the same text.
    pub fn structure(&self, text: &str) -> ParameterSets {
        let mut sets = ParameterSets::default();
        for extractor in &self.extractors {
            let records = extractor.extract(text);
            match extractor.path() {
                ExtractionPath::AnchorBased => sets.anchor_based = records,
                ExtractionPath::Table => sets.table = records,
                ExtractionPath::Classifier => sets.classifier = records,
            }
        }
        sets
    }
}
