//! Recognition orchestration: strategy × config cross-product, selection,
//! and the emergency fallback chain.
//!
//! Candidate generation is a pure fan-out (no attempt depends on another),
//! followed by an explicit max-by-score reduction in `select_best`.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::GrayImage;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::ocr::{RecognitionConfig, RecognitionConfigId};
use super::preprocess::{EmergencyTransform, ImagePreprocessor, PreprocessingStrategy};
use super::sanitize::sanitize_extracted_text;
use super::types::{OcrEngine, RecognitionAttempt};
use super::validation::{OutputValidator, SignalType, ValidationVerdict};
use crate::config::ExtractionConfig;
use crate::models::AttemptSummary;
use crate::pipeline::vocabulary::LabVocabulary;

/// Every attempt produced by one cross-product run.
#[derive(Debug, Clone, Default)]
pub struct AttemptBatch {
    /// Ordered by `attempt_index`.
    pub attempts: Vec<RecognitionAttempt>,
    /// Finished after the per-attempt deadline; not produced.
    pub timed_out: usize,
    /// Engine errors; not produced.
    pub failed: usize,
}

impl AttemptBatch {
    pub fn total(&self) -> usize {
        self.attempts.len() + self.timed_out + self.failed
    }
}

/// How the recognized text was finally obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The selected cross-product attempt passed validation.
    Selected,
    /// The selected attempt failed; an emergency transform produced usable text.
    Emergency(EmergencyTransform),
    /// Every tier failed.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct RecognitionOutcome {
    pub resolution: Resolution,
    /// Accepted text, or the best rejected attempt's text when exhausted.
    pub text: String,
    pub confidence: f32,
    pub strategy: Option<PreprocessingStrategy>,
    pub recognition_config: Option<RecognitionConfigId>,
    pub verdict: ValidationVerdict,
    pub total_attempts: usize,
    pub timed_out_attempts: usize,
    /// Best attempts first, bounded by `attempt_trace_len`.
    pub trace: Vec<AttemptSummary>,
}

impl RecognitionOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self.resolution, Resolution::Exhausted)
    }
}

// ═══════════════════════════════════════════════════════════
// Selection
// ═══════════════════════════════════════════════════════════

/// Pick the winning attempt.
///
/// Attempts longer than `min_length` compete on confidence. When none qualify,
/// the longest text wins (confidence breaks length ties). Remaining ties go to
/// the lowest `attempt_index`, so the result does not depend on scheduling.
pub fn select_best(attempts: &[RecognitionAttempt], min_length: usize) -> Option<&RecognitionAttempt> {
    let qualified = attempts.iter().filter(|a| a.text_len() > min_length);
    if let Some(best) = qualified.min_by(|a, b| by_confidence(a, b)) {
        return Some(best);
    }
    attempts.iter().min_by(|a, b| by_length(a, b))
}

/// Descending confidence, then ascending index.
fn by_confidence(a: &RecognitionAttempt, b: &RecognitionAttempt) -> Ordering {
    b.mean_token_confidence
        .total_cmp(&a.mean_token_confidence)
        .then_with(|| a.attempt_index.cmp(&b.attempt_index))
}

/// Descending length, then descending confidence, then ascending index.
fn by_length(a: &RecognitionAttempt, b: &RecognitionAttempt) -> Ordering {
    b.text_len()
        .cmp(&a.text_len())
        .then_with(|| by_confidence(a, b))
}

/// The `limit` best attempts in selection order.
pub fn rank_attempts(attempts: &[RecognitionAttempt], min_length: usize, limit: usize) -> Vec<AttemptSummary> {
    let (mut qualified, mut rest): (Vec<_>, Vec<_>) =
        attempts.iter().partition(|a| a.text_len() > min_length);
    qualified.sort_by(|a, b| by_confidence(a, b));
    rest.sort_by(|a, b| by_length(a, b));
    qualified
        .into_iter()
        .chain(rest)
        .take(limit)
        .map(|a| AttemptSummary {
            attempt_index: a.attempt_index,
            strategy: a.preprocessing_strategy.as_str().to_string(),
            recognition_config: a.recognition_config.as_str().to_string(),
            text_length: a.text_len(),
            confidence: a.mean_token_confidence,
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Emergency fallback chain
// ═══════════════════════════════════════════════════════════

/// Text accepted by the emergency chain.
#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyHit {
    pub transform: EmergencyTransform,
    pub text: String,
}

/// Ordered aggressive transforms, each read once with the fixed emergency config.
/// The first output with a digit and a lab keyword or number wins.
pub struct EmergencyFallbackChain {
    vocabulary: Arc<LabVocabulary>,
    transforms: Vec<EmergencyTransform>,
    config: RecognitionConfig,
}

/// Emergency output must be longer than this (trimmed characters).
const EMERGENCY_MIN_LENGTH: usize = 10;

impl EmergencyFallbackChain {
    pub fn new(vocabulary: Arc<LabVocabulary>) -> Self {
        Self {
            vocabulary,
            transforms: EmergencyTransform::ALL.to_vec(),
            config: RecognitionConfig::emergency(),
        }
    }

    pub fn run(
        &self,
        image: &GrayImage,
        engine: &dyn OcrEngine,
        preprocessor: &dyn ImagePreprocessor,
    ) -> Option<EmergencyHit> {
        for &transform in &self.transforms {
            let processed = preprocessor.apply_emergency(image, transform);
            let page = match engine.recognize(&processed, &self.config) {
                Ok(page) => page,
                Err(e) => {
                    debug!(transform = %transform, error = %e, "Emergency attempt failed");
                    continue;
                }
            };
            let text = sanitize_extracted_text(&page.text);
            if self.is_usable(&text) {
                info!(transform = %transform, length = text.len(), "Emergency fallback produced text");
                return Some(EmergencyHit { transform, text });
            }
            debug!(transform = %transform, length = text.len(), "Emergency attempt unusable");
        }
        None
    }

    pub fn is_usable(&self, text: &str) -> bool {
        let trimmed = text.trim();
        let has_digit = trimmed.chars().any(|c| c.is_ascii_digit());
        trimmed.chars().count() > EMERGENCY_MIN_LENGTH
            && has_digit
            && (self.vocabulary.emergency_keywords().is_match(trimmed) || has_number(trimmed))
    }
}

fn has_number(text: &str) -> bool {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .any(|token| token.trim_matches('.').parse::<f64>().is_ok())
}

// ═══════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════

/// Drives recognition of one prepared image.
pub struct RecognitionOrchestrator {
    engine: Arc<dyn OcrEngine>,
    preprocessor: Arc<dyn ImagePreprocessor>,
    validator: Arc<OutputValidator>,
    emergency: EmergencyFallbackChain,
    strategies: Vec<PreprocessingStrategy>,
    configs: Vec<RecognitionConfig>,
    selection_min_length: usize,
    emergency_confidence: f32,
    deadline: Option<Duration>,
    trace_len: usize,
    pool: Option<rayon::ThreadPool>,
}

impl RecognitionOrchestrator {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        preprocessor: Arc<dyn ImagePreprocessor>,
        validator: Arc<OutputValidator>,
        vocabulary: Arc<LabVocabulary>,
        config: &ExtractionConfig,
    ) -> Self {
        let pool = if config.worker_threads > 0 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(config.worker_threads)
                .thread_name(|i| format!("recognition-{i}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!(error = %e, threads = config.worker_threads, "Falling back to the global rayon pool");
                    None
                }
            }
        } else {
            None
        };

        Self {
            engine,
            preprocessor,
            validator,
            emergency: EmergencyFallbackChain::new(vocabulary),
            strategies: PreprocessingStrategy::ALL.to_vec(),
            configs: RecognitionConfig::standard_set(),
            selection_min_length: config.selection_min_length,
            emergency_confidence: config.emergency_confidence,
            deadline: config.attempt_deadline(),
            trace_len: config.attempt_trace_len,
            pool,
        }
    }

    /// Run every (strategy, config) pair over `image`.
    pub fn generate_attempts(&self, image: &GrayImage) -> AttemptBatch {
        let run = || {
            self.strategies
                .par_iter()
                .enumerate()
                .flat_map_iter(|(s_idx, &strategy)| {
                    let processed = self.preprocessor.apply(image, strategy);
                    self.configs
                        .iter()
                        .enumerate()
                        .map(|(c_idx, config)| {
                            let index = s_idx * self.configs.len() + c_idx;
                            self.run_attempt(&processed, strategy, config, index)
                        })
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        };
        let outcomes = match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        };

        let mut batch = AttemptBatch::default();
        for outcome in outcomes {
            match outcome {
                AttemptOutcome::Produced(attempt) => batch.attempts.push(attempt),
                AttemptOutcome::TimedOut => batch.timed_out += 1,
                AttemptOutcome::Failed => batch.failed += 1,
            }
        }
        batch.attempts.sort_by_key(|a| a.attempt_index);
        batch
    }

    fn run_attempt(
        &self,
        processed: &GrayImage,
        strategy: PreprocessingStrategy,
        config: &RecognitionConfig,
        attempt_index: usize,
    ) -> AttemptOutcome {
        let started = Instant::now();
        let result = self.engine.recognize(processed, config);
        let elapsed = started.elapsed();

        if let Some(deadline) = self.deadline {
            if elapsed > deadline {
                debug!(
                    strategy = %strategy,
                    config = %config.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Attempt exceeded deadline"
                );
                return AttemptOutcome::TimedOut;
            }
        }

        match result {
            Ok(page) => {
                let text = sanitize_extracted_text(&page.text);
                debug!(
                    strategy = %strategy,
                    config = %config.id,
                    length = text.len(),
                    confidence = page.confidence,
                    "Recognition attempt"
                );
                AttemptOutcome::Produced(RecognitionAttempt {
                    preprocessing_strategy: strategy,
                    recognition_config: config.id,
                    recognized_text: text,
                    mean_token_confidence: page.confidence,
                    attempt_index,
                })
            }
            Err(e) => {
                debug!(strategy = %strategy, config = %config.id, error = %e, "Attempt failed");
                AttemptOutcome::Failed
            }
        }
    }

    /// Best validated text for `image`, walking every tier before giving up.
    pub fn recognize(&self, image: &GrayImage) -> RecognitionOutcome {
        let batch = self.generate_attempts(image);
        let trace = rank_attempts(&batch.attempts, self.selection_min_length, self.trace_len);
        let total_attempts = batch.total();
        let timed_out_attempts = batch.timed_out;

        let best = select_best(&batch.attempts, self.selection_min_length);
        let verdict = match best {
            Some(attempt) => self
                .validator
                .validate(&attempt.recognized_text, attempt.mean_token_confidence),
            None => ValidationVerdict {
                accepted: false,
                message: "OCR failed to produce any result".to_string(),
                signals: Vec::new(),
                provisional: false,
            },
        };

        if let (Some(attempt), true) = (best, verdict.accepted) {
            info!(
                strategy = %attempt.preprocessing_strategy,
                config = %attempt.recognition_config,
                confidence = attempt.mean_token_confidence,
                attempts = total_attempts,
                timed_out = timed_out_attempts,
                "Recognition attempt selected"
            );
            return RecognitionOutcome {
                resolution: Resolution::Selected,
                text: attempt.recognized_text.clone(),
                confidence: attempt.mean_token_confidence,
                strategy: Some(attempt.preprocessing_strategy),
                recognition_config: Some(attempt.recognition_config),
                verdict,
                total_attempts,
                timed_out_attempts,
                trace,
            };
        }

        debug!(reason = %verdict.message, "Selected attempt rejected, running emergency chain");
        if let Some(hit) = self.emergency.run(image, self.engine.as_ref(), self.preprocessor.as_ref()) {
            let signals: Vec<SignalType> = self.validator.signals(&hit.text);
            let verdict = ValidationVerdict {
                accepted: true,
                message: format!(
                    "Emergency fallback ({}) accepted provisionally after: {}",
                    hit.transform, verdict.message
                ),
                signals,
                provisional: true,
            };
            return RecognitionOutcome {
                resolution: Resolution::Emergency(hit.transform),
                text: hit.text,
                confidence: self.emergency_confidence,
                strategy: None,
                recognition_config: Some(RecognitionConfigId::EmergencyBlock),
                verdict,
                total_attempts,
                timed_out_attempts,
                trace,
            };
        }

        warn!(
            attempts = total_attempts,
            timed_out = timed_out_attempts,
            reason = %verdict.message,
            "Every recognition tier exhausted"
        );
        RecognitionOutcome {
            resolution: Resolution::Exhausted,
            text: best.map(|a| a.recognized_text.clone()).unwrap_or_default(),
            confidence: best.map(|a| a.mean_token_confidence).unwrap_or(0.0),
            strategy: best.map(|a| a.preprocessing_strategy),
            recognition_config: best.map(|a| a.recognition_config),
            verdict,
            total_attempts,
            timed_out_attempts,
            trace,
        }
    }
}

enum AttemptOutcome {
    Produced(RecognitionAttempt),
    TimedOut,
    Failed,
}
