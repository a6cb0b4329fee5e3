use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::GrayImage;

use super::types::{OcrEngine, OcrPageResult, OcrWordResult};
use super::ExtractionError;
use crate::models::enums::str_enum;

/// Characters that occur in lab values, units and ranges.
/// Restricting the engine to these suppresses symbol noise on table scans.
pub const LAB_VALUE_WHITELIST: &str =
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz.,-/():% ";

str_enum!(
    /// Page-segmentation assumption handed to the recognition engine.
    RecognitionConfigId {
        UniformBlock => "uniform_block",
        SingleColumn => "single_column",
        SparseText => "sparse_text",
        AutomaticLayout => "automatic_layout",
        SingleLine => "single_line",
        RawLine => "raw_line",
        EmergencyBlock => "emergency_block",
    }
);

/// Engine settings for one recognition pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionConfig {
    pub id: RecognitionConfigId,
    /// Tesseract page segmentation mode number.
    pub page_seg_mode: u8,
    pub char_whitelist: Option<&'static str>,
}

impl RecognitionConfig {
    /// The six configs every preprocessing strategy is paired with.
    pub fn standard_set() -> Vec<RecognitionConfig> {
        vec![
            Self::new(RecognitionConfigId::UniformBlock, 6, Some(LAB_VALUE_WHITELIST)),
            Self::new(RecognitionConfigId::SingleColumn, 4, None),
            Self::new(RecognitionConfigId::SparseText, 11, None),
            Self::new(RecognitionConfigId::AutomaticLayout, 3, None),
            Self::new(RecognitionConfigId::SingleLine, 7, None),
            Self::new(RecognitionConfigId::RawLine, 13, None),
        ]
    }

    /// Fixed config of the emergency chain: uniform block, no whitelist.
    pub fn emergency() -> RecognitionConfig {
        Self::new(RecognitionConfigId::EmergencyBlock, 6, None)
    }

    fn new(id: RecognitionConfigId, page_seg_mode: u8, char_whitelist: Option<&'static str>) -> Self {
        Self {
            id,
            page_seg_mode,
            char_whitelist,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tesseract
// ═══════════════════════════════════════════════════════════

/// Bundled Tesseract OCR engine.
/// Only available when compiled with the `ocr` feature flag.
#[cfg(feature = "ocr")]
pub struct BundledTesseract {
    tessdata_dir: std::path::PathBuf,
    lang: String,
}

#[cfg(feature = "ocr")]
impl BundledTesseract {
    pub fn new(tessdata_dir: &std::path::Path) -> Result<Self, ExtractionError> {
        if !tessdata_dir.join("eng.traineddata").exists() {
            return Err(ExtractionError::TessdataNotFound(tessdata_dir.to_path_buf()));
        }
        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
            lang: "eng".to_string(),
        })
    }

    /// Locate tessdata via `TESSDATA_PREFIX`, then the usual system paths.
    pub fn from_environment() -> Result<Self, ExtractionError> {
        let mut candidates: Vec<std::path::PathBuf> = Vec::new();
        if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
            candidates.push(prefix.into());
        }
        candidates.extend(
            [
                "/usr/share/tesseract-ocr/5/tessdata",
                "/usr/share/tesseract-ocr/4.00/tessdata",
                "/usr/share/tessdata",
                "/usr/local/share/tessdata",
                "/opt/homebrew/share/tessdata",
            ]
            .iter()
            .map(std::path::PathBuf::from),
        );
        let dir = candidates
            .iter()
            .find(|dir| dir.join("eng.traineddata").exists())
            .ok_or_else(|| {
                ExtractionError::TessdataNotFound(
                    candidates.first().cloned().unwrap_or_default(),
                )
            })?;
        Self::new(dir)
    }

    /// Set language(s) for OCR (e.g., "eng", "eng+fra")
    pub fn with_languages(mut self, langs: &str) -> Self {
        self.lang = langs.to_string();
        self
    }
}

#[cfg(feature = "ocr")]
fn page_seg_mode(mode: u8) -> tesseract::PageSegMode {
    use tesseract::PageSegMode;
    match mode {
        3 => PageSegMode::PsmAuto,
        4 => PageSegMode::PsmSingleColumn,
        6 => PageSegMode::PsmSingleBlock,
        7 => PageSegMode::PsmSingleLine,
        8 => PageSegMode::PsmSingleWord,
        11 => PageSegMode::PsmSparseText,
        12 => PageSegMode::PsmSparseTextOsd,
        13 => PageSegMode::PsmRawLine,
        _ => PageSegMode::PsmAuto,
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for BundledTesseract {
    fn recognize(
        &self,
        image: &GrayImage,
        config: &RecognitionConfig,
    ) -> Result<OcrPageResult, ExtractionError> {
        let png = super::imaging::encode_png(image)?;
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| ExtractionError::OcrInit("Invalid tessdata path".into()))?;

        let tess = tesseract::Tesseract::new(Some(tessdata_str), Some(&self.lang))
            .map_err(|e| ExtractionError::OcrInit(format!("{e:?}")))?;

        let tess = match config.char_whitelist {
            Some(whitelist) => tess
                .set_variable("tessedit_char_whitelist", whitelist)
                .map_err(|e| ExtractionError::OcrConfig(format!("Failed to set whitelist: {e:?}")))?,
            None => tess,
        };

        let mut tess = tess
            .set_image_from_mem(&png)
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;
        tess.set_page_seg_mode(page_seg_mode(config.page_seg_mode));

        let text = tess
            .get_text()
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        // Level 5 TSV rows carry one confidence per word.
        let word_confidences = match tess.get_tsv_text(0) {
            Ok(tsv) => parse_tsv_word_confidences(&tsv),
            Err(e) => {
                tracing::debug!(error = ?e, config = %config.id, "TSV output unavailable");
                Vec::new()
            }
        };

        Ok(OcrPageResult::from_words(text, word_confidences))
    }
}

/// Stand-in when no recognition engine can be loaded (no `ocr` feature, or
/// no tessdata). Every call fails, so images degrade to a low-confidence envelope.
pub struct UnavailableOcrEngine;

impl OcrEngine for UnavailableOcrEngine {
    fn recognize(
        &self,
        _image: &GrayImage,
        _config: &RecognitionConfig,
    ) -> Result<OcrPageResult, ExtractionError> {
        Err(ExtractionError::OcrInit(
            "No recognition engine available (build with the `ocr` feature and install tessdata)".into(),
        ))
    }
}

/// Tesseract when compiled in and tessdata is found, `UnavailableOcrEngine` otherwise.
pub fn default_ocr_engine() -> Arc<dyn OcrEngine> {
    #[cfg(feature = "ocr")]
    {
        match BundledTesseract::from_environment() {
            Ok(engine) => return Arc::new(engine),
            Err(e) => tracing::warn!(error = %e, "Tesseract unavailable, recognition disabled"),
        }
    }
    Arc::new(UnavailableOcrEngine)
}

// ═══════════════════════════════════════════════════════════
// Mock implementation (testing)
// ═══════════════════════════════════════════════════════════

type Responder =
    dyn Fn(&GrayImage, &RecognitionConfig) -> Result<OcrPageResult, ExtractionError> + Send + Sync;

/// Mock OCR engine for unit testing without Tesseract.
///
/// Answers through a closure so tests can vary output per config, and counts
/// every call.
pub struct MockOcrEngine {
    responder: Box<Responder>,
    calls: AtomicUsize,
}

impl MockOcrEngine {
    /// Same text for every call; each word gets `confidence`.
    pub fn new(text: &str, confidence: f32) -> Self {
        let text = text.to_string();
        Self::with_responder(move |_, _| Ok(mock_page(&text, confidence)))
    }

    /// Recognizes nothing, like a blank page.
    pub fn blank() -> Self {
        Self::new("", 0.0)
    }

    pub fn failing() -> Self {
        Self::with_responder(|_, _| Err(ExtractionError::OcrProcessing("Mock OCR failure".into())))
    }

    pub fn with_responder(
        responder: impl Fn(&GrayImage, &RecognitionConfig) -> Result<OcrPageResult, ExtractionError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(
        &self,
        image: &GrayImage,
        config: &RecognitionConfig,
    ) -> Result<OcrPageResult, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(image, config)
    }
}

/// Page result whose words all share one confidence.
pub fn mock_page(text: &str, confidence: f32) -> OcrPageResult {
    let words = text
        .split_whitespace()
        .map(|w| OcrWordResult {
            text: w.to_string(),
            confidence,
        })
        .collect();
    OcrPageResult::from_words(text.to_string(), words)
}

/// Parse Tesseract TSV output into per-word confidences.
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 = individual word entries. Confidence is 0-100, scaled to 0.0-1.0;
/// Tesseract's -1 ("no confidence") is kept negative so the mean skips it.
pub fn parse_tsv_word_confidences(tsv: &str) -> Vec<OcrWordResult> {
    let mut results = Vec::new();

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        if fields[0].trim().parse::<i32>().ok() != Some(5) {
            continue;
        }
        let Ok(conf) = fields[10].trim().parse::<f32>() else {
            continue;
        };
        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }
        results.push(OcrWordResult {
            text: word.to_string(),
            confidence: if conf < 0.0 { -1.0 } else { conf / 100.0 },
        });
    }

    results
}
