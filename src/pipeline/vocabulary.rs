//! Versioned lab vocabulary: anchors, synonyms, noise banks and unit tables.
//!
//! Loaded once from `resources/lab_vocabulary.json` (or the copy compiled into
//! the binary), compiled into regexes, then shared read-only by every extractor.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

const VOCABULARY_FILE: &str = "lab_vocabulary.json";
const BUNDLED_JSON: &str = include_str!("../../resources/lab_vocabulary.json");

#[derive(Error, Debug)]
pub enum VocabularyError {
    #[error("Failed to read vocabulary file {0}: {1}")]
    Read(String, String),

    #[error("Failed to parse vocabulary {0}: {1}")]
    Parse(String, String),

    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Vocabulary defines no parameters")]
    Empty,
}

// ═══════════════════════════════════════════════════════════
// File format
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
struct ParameterSpec {
    key: String,
    display_name: String,
    /// Phrases the anchor-based extractor keys rows on.
    anchors: Vec<String>,
    /// Additional variants accepted by name normalization only.
    #[serde(default)]
    synonyms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct VocabularyFile {
    version: String,
    parameters: Vec<ParameterSpec>,
    anchor_noise: Vec<String>,
    table_noise: Vec<String>,
    classifier_ignore: Vec<String>,
    unit_patterns: Vec<String>,
    unit_synonyms: BTreeMap<String, String>,
    method_keywords: Vec<String>,
    table_method_keywords: Vec<String>,
    status_words: Vec<String>,
    table_section_start: Vec<String>,
    table_section_end: Vec<String>,
    classifier_section_start: Vec<String>,
    classifier_section_end: Vec<String>,
    medical_signals: Vec<String>,
    validator_units: String,
    validator_keywords: String,
    emergency_keywords: String,
}

// ═══════════════════════════════════════════════════════════
// Compiled vocabulary
// ═══════════════════════════════════════════════════════════

/// A canonical lab-test identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalParameter {
    pub key: String,
    pub display_name: String,
}

#[derive(Debug)]
struct Term {
    phrase: String,
    parameter: usize,
    pattern: Regex,
}

/// One anchor phrase found in a text, as a byte span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorOccurrence {
    pub parameter: usize,
    pub phrase: String,
    pub start: usize,
    pub end: usize,
}

/// An ordered set of regexes; a line matching any of them is rejected.
#[derive(Debug)]
pub struct PatternBank {
    patterns: Vec<Regex>,
}

impl PatternBank {
    fn compile(sources: &[String]) -> Result<Self, VocabularyError> {
        let patterns = sources
            .iter()
            .map(|s| compile_pattern(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, line: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(line))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Keyword lists delimiting the results table of a report.
#[derive(Debug)]
pub struct SectionMarkers {
    start: Vec<String>,
    end: Vec<String>,
}

impl SectionMarkers {
    fn new(start: &[String], end: &[String]) -> Self {
        let lower = |v: &[String]| v.iter().map(|k| k.to_lowercase()).collect();
        Self {
            start: lower(start),
            end: lower(end),
        }
    }

    /// Header lines such as "Investigation  Result  Unit".
    pub fn is_start(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.start.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Footer lines that close the table.
    pub fn is_end(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.end.iter().any(|k| lower.contains(k.as_str()))
    }
}

/// Immutable lab vocabulary shared by reference across one or many requests.
#[derive(Debug)]
pub struct LabVocabulary {
    pub version: String,
    parameters: Vec<CanonicalParameter>,
    /// Anchor phrases, longest first.
    anchor_terms: Vec<Term>,
    /// Anchors plus synonyms, longest first.
    name_terms: Vec<Term>,
    pub anchor_noise: PatternBank,
    pub table_noise: PatternBank,
    pub classifier_ignore: PatternBank,
    pub medical_signals: PatternBank,
    pub table_section: SectionMarkers,
    pub classifier_section: SectionMarkers,
    unit_patterns: Vec<Regex>,
    unit_synonyms: HashMap<String, String>,
    method_patterns: Vec<Regex>,
    table_method_patterns: Vec<Regex>,
    status_words: HashSet<String>,
    validator_units: Regex,
    validator_keywords: Regex,
    emergency_keywords: Regex,
}

impl LabVocabulary {
    /// Load from `<resources_dir>/lab_vocabulary.json`.
    pub fn load(resources_dir: &Path) -> Result<Self, VocabularyError> {
        let path = resources_dir.join(VOCABULARY_FILE);
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| VocabularyError::Read(path.display().to_string(), e.to_string()))?;
        Self::from_json_str(&raw, VOCABULARY_FILE)
    }

    /// The vocabulary compiled into the binary.
    pub fn bundled() -> Result<Self, VocabularyError> {
        Self::from_json_str(BUNDLED_JSON, "bundled vocabulary")
    }

    pub fn from_json_str(raw: &str, source: &str) -> Result<Self, VocabularyError> {
        let file: VocabularyFile = serde_json::from_str(raw)
            .map_err(|e| VocabularyError::Parse(source.to_string(), e.to_string()))?;
        Self::compile(file)
    }

    fn compile(file: VocabularyFile) -> Result<Self, VocabularyError> {
        if file.parameters.is_empty() {
            return Err(VocabularyError::Empty);
        }

        let parameters = file
            .parameters
            .iter()
            .map(|p| CanonicalParameter {
                key: p.key.clone(),
                display_name: p.display_name.clone(),
            })
            .collect();

        let mut anchor_terms = Vec::new();
        let mut name_terms = Vec::new();
        for (index, spec) in file.parameters.iter().enumerate() {
            for phrase in &spec.anchors {
                anchor_terms.push(Term::new(phrase, index)?);
                name_terms.push(Term::new(phrase, index)?);
            }
            for phrase in &spec.synonyms {
                name_terms.push(Term::new(phrase, index)?);
            }
        }
        sort_longest_first(&mut anchor_terms);
        sort_longest_first(&mut name_terms);

        let keyword_patterns = |keywords: &[String]| {
            keywords
                .iter()
                .map(|k| compile_pattern(&phrase_pattern(k)))
                .collect::<Result<Vec<_>, _>>()
        };

        let vocabulary = Self {
            version: file.version,
            parameters,
            anchor_terms,
            name_terms,
            anchor_noise: PatternBank::compile(&file.anchor_noise)?,
            table_noise: PatternBank::compile(&file.table_noise)?,
            classifier_ignore: PatternBank::compile(&file.classifier_ignore)?,
            medical_signals: PatternBank::compile(&file.medical_signals)?,
            table_section: SectionMarkers::new(&file.table_section_start, &file.table_section_end),
            classifier_section: SectionMarkers::new(
                &file.classifier_section_start,
                &file.classifier_section_end,
            ),
            unit_patterns: file
                .unit_patterns
                .iter()
                .map(|p| compile_pattern(p))
                .collect::<Result<Vec<_>, _>>()?,
            unit_synonyms: file
                .unit_synonyms
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
            method_patterns: keyword_patterns(&file.method_keywords)?,
            table_method_patterns: keyword_patterns(&file.table_method_keywords)?,
            status_words: file.status_words.iter().map(|w| w.to_lowercase()).collect(),
            validator_units: compile_pattern(&file.validator_units)?,
            validator_keywords: compile_pattern(&file.validator_keywords)?,
            emergency_keywords: compile_pattern(&file.emergency_keywords)?,
        };

        tracing::debug!(
            version = %vocabulary.version,
            parameters = vocabulary.parameters.len(),
            anchors = vocabulary.anchor_terms.len(),
            "Lab vocabulary compiled"
        );
        Ok(vocabulary)
    }

    pub fn parameters(&self) -> &[CanonicalParameter] {
        &self.parameters
    }

    pub fn parameter(&self, index: usize) -> Option<&CanonicalParameter> {
        self.parameters.get(index)
    }

    pub fn anchor_phrases(&self) -> impl Iterator<Item = &str> {
        self.anchor_terms.iter().map(|t| t.phrase.as_str())
    }

    /// Every anchor phrase in `text`, ordered by position.
    ///
    /// Longer phrases claim their span first, so "total rbc count" is not also
    /// reported as "rbc count".
    pub fn anchor_occurrences(&self, text: &str) -> Vec<AnchorOccurrence> {
        let mut found: Vec<AnchorOccurrence> = Vec::new();
        for term in &self.anchor_terms {
            for m in term.pattern.find_iter(text) {
                let overlaps = found
                    .iter()
                    .any(|o| m.start() < o.end && o.start < m.end());
                if overlaps {
                    continue;
                }
                found.push(AnchorOccurrence {
                    parameter: term.parameter,
                    phrase: term.phrase.clone(),
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
        found.sort_by_key(|o| o.start);
        found
    }

    pub fn contains_anchor(&self, text: &str) -> bool {
        self.anchor_terms.iter().any(|t| t.pattern.is_match(text))
    }

    /// Map a free-form test name onto the vocabulary via anchors and synonyms.
    pub fn canonical_for_name(&self, name: &str) -> Option<&CanonicalParameter> {
        self.name_terms
            .iter()
            .find(|t| t.pattern.is_match(name))
            .and_then(|t| self.parameters.get(t.parameter))
    }

    /// First unit token in `text`, as written.
    pub fn first_unit<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.unit_patterns
            .iter()
            .find_map(|p| p.find(text))
            .map(|m| m.as_str())
    }

    /// Canonical spelling of a unit; unknown units pass through trimmed.
    pub fn normalize_unit(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.unit_synonyms
            .get(&trimmed.to_lowercase())
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }

    pub fn first_method<'t>(&self, text: &'t str) -> Option<&'t str> {
        first_keyword(&self.method_patterns, text)
    }

    pub fn first_table_method<'t>(&self, text: &'t str) -> Option<&'t str> {
        first_keyword(&self.table_method_patterns, text)
    }

    pub fn mentions_method(&self, text: &str) -> bool {
        self.method_patterns.iter().any(|p| p.is_match(text))
    }

    pub fn is_status_word(&self, word: &str) -> bool {
        self.status_words.contains(&word.trim().to_lowercase())
    }

    pub fn validator_units(&self) -> &Regex {
        &self.validator_units
    }

    pub fn validator_keywords(&self) -> &Regex {
        &self.validator_keywords
    }

    pub fn emergency_keywords(&self) -> &Regex {
        &self.emergency_keywords
    }
}

impl Term {
    fn new(phrase: &str, parameter: usize) -> Result<Self, VocabularyError> {
        Ok(Self {
            phrase: phrase.to_lowercase(),
            parameter,
            pattern: compile_pattern(&phrase_pattern(phrase))?,
        })
    }
}

fn sort_longest_first(terms: &mut [Term]) {
    terms.sort_by(|a, b| {
        b.phrase
            .len()
            .cmp(&a.phrase.len())
            .then_with(|| a.phrase.cmp(&b.phrase))
    });
}

/// Case-insensitive whole-word pattern; inner spaces match any whitespace run.
fn phrase_pattern(phrase: &str) -> String {
    let escaped = regex::escape(phrase.trim()).replace(' ', r"\s+");
    format!(r"(?i)\b{escaped}\b")
}

fn compile_pattern(source: &str) -> Result<Regex, VocabularyError> {
    Regex::new(source).map_err(|e| VocabularyError::Pattern {
        pattern: source.to_string(),
        message: e.to_string(),
    })
}

fn first_keyword<'t>(patterns: &[Regex], text: &'t str) -> Option<&'t str> {
    patterns.iter().find_map(|p| p.find(text)).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> LabVocabulary {
        LabVocabulary::bundled().unwrap()
    }

    #[test]
    fn bundled_vocabulary_compiles() {
        let v = vocab();
        assert!(!v.version.is_empty());
        assert_eq!(v.parameters().len(), 14);
        assert!(!v.anchor_noise.is_empty());
    }

    #[test]
    fn load_from_resources_dir_matches_bundled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(VOCABULARY_FILE), BUNDLED_JSON).unwrap();
        let loaded = LabVocabulary::load(dir.path()).unwrap();
        assert_eq!(loaded.version, vocab().version);
        assert_eq!(loaded.parameters(), vocab().parameters());
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LabVocabulary::load(dir.path()).unwrap_err();
        assert!(matches!(err, VocabularyError::Read(..)));
    }

    #[test]
    fn bad_pattern_is_reported() {
        let broken = BUNDLED_JSON.replacen(
            r#""validator_units": ""#,
            r#""validator_units": "(unclosed"#,
            1,
        );
        let err = LabVocabulary::from_json_str(&broken, "test").unwrap_err();
        assert!(matches!(err, VocabularyError::Pattern { .. }));
    }

    #[test]
    fn longer_anchor_claims_the_span() {
        let v = vocab();
        let found = v.anchor_occurrences("Total RBC Count 4.8 mill/cumm");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].phrase, "total rbc count");
        assert_eq!(v.parameter(found[0].parameter).unwrap().key, "total_rbc_count");
    }

    #[test]
    fn anchors_respect_word_boundaries() {
        let v = vocab();
        let found = v.anchor_occurrences("MCHC 33.1 g/dL\nMCH 29.0 pg");
        let keys: Vec<_> = found
            .iter()
            .map(|o| v.parameter(o.parameter).unwrap().key.as_str())
            .collect();
        assert_eq!(keys, vec!["mchc", "mch"]);
    }

    #[test]
    fn synonyms_map_to_canonical_names() {
        let v = vocab();
        assert_eq!(v.canonical_for_name("Hb").unwrap().key, "hemoglobin");
        assert_eq!(v.canonical_for_name("Hematocrit").unwrap().key, "pcv");
        assert_eq!(v.canonical_for_name("PLT").unwrap().display_name, "Platelet Count");
        assert_eq!(
            v.canonical_for_name("Mean Corpuscular Hemoglobin Concentration").unwrap().key,
            "mchc"
        );
        assert!(v.canonical_for_name("Serum Sodium").is_none());
    }

    #[test]
    fn units_are_found_and_normalized() {
        let v = vocab();
        assert_eq!(v.first_unit("13.5 gm/dl 12-16"), Some("gm/dl"));
        assert_eq!(v.first_unit("4.5 million/cumm"), Some("million/cumm"));
        assert_eq!(v.first_unit("flow cytometry 60"), None);
        assert_eq!(v.normalize_unit("GM/DL"), "g/dL");
        assert_eq!(v.normalize_unit("cells/cumm"), "/cumm");
        assert_eq!(v.normalize_unit("fl"), "fL");
        assert_eq!(v.normalize_unit(" mEq/L "), "mEq/L");
    }

    #[test]
    fn methods_and_status_words() {
        let v = vocab();
        assert_eq!(v.first_method("by Electrical  Impedance"), Some("Electrical  Impedance"));
        assert_eq!(v.first_method("Enzymatic"), None);
        assert_eq!(v.first_table_method("Enzymatic"), Some("Enzymatic"));
        assert!(v.is_status_word(" High "));
        assert!(!v.is_status_word("Hemoglobin"));
    }

    #[test]
    fn section_markers_are_case_insensitive() {
        let v = vocab();
        assert!(v.table_section.is_start("INVESTIGATION   RESULT   UNITS"));
        assert!(v.table_section.is_end("*** End of Report ***"));
        assert!(!v.table_section.is_end("Hemoglobin 13.5"));
    }
}
