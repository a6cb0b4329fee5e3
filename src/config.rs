use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "lab-extract";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix for environment overrides, e.g. `LAB_EXTRACT_RENDER_DPI=200`.
const ENV_PREFIX: &str = "LAB_EXTRACT_";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "lab_extract=info"
}

/// Directory holding `lab_vocabulary.json`.
/// `LAB_EXTRACT_RESOURCES` wins; otherwise the crate's own `resources/`.
pub fn resources_dir() -> PathBuf {
    match std::env::var(format!("{ENV_PREFIX}RESOURCES")) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources"),
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Read(String, String),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(String, String),
}

/// Every tunable of the extraction pipeline.
///
/// Defaults reproduce the reference behavior; all fields can be overridden from
/// a JSON file or `LAB_EXTRACT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Output validator floor length (trimmed characters).
    pub min_text_length: usize,
    /// An attempt qualifies for confidence-based selection only above this length.
    pub selection_min_length: usize,
    /// Length at which text with letters but no signal is still accepted.
    pub last_resort_min_length: usize,
    /// Length that rescues a low-confidence verdict without content signals.
    pub lenient_min_length: usize,
    pub min_confidence_threshold: f32,
    /// Images narrower or shorter than this are upscaled before preprocessing.
    pub floor_width: u32,
    pub floor_height: u32,
    pub render_dpi: u32,
    pub direct_text_confidence: f32,
    pub lenient_text_confidence: f32,
    pub json_fallback_confidence: f32,
    pub emergency_confidence: f32,
    /// Per-attempt deadline in milliseconds; 0 disables it.
    pub attempt_deadline_ms: u64,
    /// Rayon pool size for the attempt cross-product; 0 uses the global pool.
    pub worker_threads: usize,
    pub max_input_bytes: usize,
    /// Number of attempts kept in the debug trace.
    pub attempt_trace_len: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_length: 5,
            selection_min_length: 10,
            last_resort_min_length: 10,
            lenient_min_length: 15,
            min_confidence_threshold: 0.2,
            floor_width: 800,
            floor_height: 600,
            render_dpi: 300,
            direct_text_confidence: 0.95,
            lenient_text_confidence: 0.7,
            json_fallback_confidence: 0.6,
            emergency_confidence: 0.3,
            attempt_deadline_ms: 20_000,
            worker_threads: 0,
            max_input_bytes: 50 * 1024 * 1024,
            attempt_trace_len: 5,
        }
    }
}

impl ExtractionConfig {
    /// Load from a JSON file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))
    }

    /// Defaults with `LAB_EXTRACT_*` overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Apply overrides from any key/value source. Keys are upper-case field names.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        override_field(&lookup, "MIN_TEXT_LENGTH", &mut self.min_text_length);
        override_field(&lookup, "SELECTION_MIN_LENGTH", &mut self.selection_min_length);
        override_field(&lookup, "LAST_RESORT_MIN_LENGTH", &mut self.last_resort_min_length);
        override_field(&lookup, "LENIENT_MIN_LENGTH", &mut self.lenient_min_length);
        override_field(&lookup, "MIN_CONFIDENCE_THRESHOLD", &mut self.min_confidence_threshold);
        override_field(&lookup, "FLOOR_WIDTH", &mut self.floor_width);
        override_field(&lookup, "FLOOR_HEIGHT", &mut self.floor_height);
        override_field(&lookup, "RENDER_DPI", &mut self.render_dpi);
        override_field(&lookup, "DIRECT_TEXT_CONFIDENCE", &mut self.direct_text_confidence);
        override_field(&lookup, "LENIENT_TEXT_CONFIDENCE", &mut self.lenient_text_confidence);
        override_field(&lookup, "JSON_FALLBACK_CONFIDENCE", &mut self.json_fallback_confidence);
        override_field(&lookup, "EMERGENCY_CONFIDENCE", &mut self.emergency_confidence);
        override_field(&lookup, "ATTEMPT_DEADLINE_MS", &mut self.attempt_deadline_ms);
        override_field(&lookup, "WORKER_THREADS", &mut self.worker_threads);
        override_field(&lookup, "MAX_INPUT_BYTES", &mut self.max_input_bytes);
        override_field(&lookup, "ATTEMPT_TRACE_LEN", &mut self.attempt_trace_len);
        self
    }

    pub fn attempt_deadline(&self) -> Option<Duration> {
        (self.attempt_deadline_ms > 0).then(|| Duration::from_millis(self.attempt_deadline_ms))
    }
}

fn override_field<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, field: &mut T) {
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *field = value,
        Err(_) => tracing::warn!(key = name, value = %raw, "Ignoring unparseable config override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn app_name_is_lab_extract() {
        assert_eq!(APP_NAME, "lab-extract");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn defaults_match_reference_thresholds() {
        let config = ExtractionConfig::default();
        assert_eq!(config.min_text_length, 5);
        assert_eq!(config.selection_min_length, 10);
        assert_eq!((config.floor_width, config.floor_height), (800, 600));
        assert_eq!(config.render_dpi, 300);
        assert!((config.emergency_confidence - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            ("RENDER_DPI", "200"),
            ("LAST_RESORT_MIN_LENGTH", "40"),
            ("WORKER_THREADS", "many"),
        ]
        .into_iter()
        .collect();
        let config = ExtractionConfig::default()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.render_dpi, 200);
        assert_eq!(config.last_resort_min_length, 40);
        assert_eq!(config.worker_threads, 0);
    }

    #[test]
    fn zero_deadline_disables_it() {
        let config = ExtractionConfig {
            attempt_deadline_ms: 0,
            ..Default::default()
        };
        assert!(config.attempt_deadline().is_none());
        assert_eq!(
            ExtractionConfig::default().attempt_deadline(),
            Some(Duration::from_secs(20))
        );
    }

    #[test]
    fn json_file_keeps_defaults_for_absent_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"render_dpi": 150}"#).unwrap();
        let config = ExtractionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.render_dpi, 150);
        assert_eq!(config.min_text_length, 5);
    }

    #[test]
    fn json_file_parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = ExtractionConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref p, _) if p.ends_with("broken.json")));
    }

    #[test]
    fn resources_dir_defaults_to_crate_resources() {
        if std::env::var("LAB_EXTRACT_RESOURCES").is_ok() {
            return;
        }
        assert!(resources_dir().ends_with("resources"));
    }
}
