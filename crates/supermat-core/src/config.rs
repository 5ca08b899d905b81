//! Supermat Configuration Management
//!
//! Handles configuration from environment variables and TOML files with
//! defaults matching the heuristics the linker was tuned with.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::RelationType;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Heuristic word lists used by the classifier and resolvers
    pub lexicon: Lexicon,

    /// Linking pipeline configuration
    pub linking: LinkingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(relations) = std::env::var("SUPERMAT_RELATIONS") {
            config.linking.relations = parse_relations(&relations)?;
        }
        if let Ok(flag) = std::env::var("SUPERMAT_SYNTACTIC_FALLBACK") {
            config.linking.syntactic_fallback =
                flag.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "SUPERMAT_SYNTACTIC_FALLBACK".to_string(),
                    value: flag,
                })?;
        }
        if let Ok(unit) = std::env::var("SUPERMAT_VALUE_UNIT") {
            config.lexicon.value_unit = unit;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.logging.json_format = format.eq_ignore_ascii_case("json");
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let defaults = Self::default();

        // Only override if env values differ from defaults
        if env_config.linking.relations != defaults.linking.relations {
            self.linking.relations = env_config.linking.relations;
        }
        if env_config.linking.syntactic_fallback != defaults.linking.syntactic_fallback {
            self.linking.syntactic_fallback = env_config.linking.syntactic_fallback;
        }
        if env_config.lexicon.value_unit != defaults.lexicon.value_unit {
            self.lexicon.value_unit = env_config.lexicon.value_unit;
        }
        if env_config.logging.level != defaults.logging.level {
            self.logging.level = env_config.logging.level;
        }
        if env_config.logging.json_format {
            self.logging.json_format = true;
        }

        Ok(self)
    }
}

fn parse_relations(raw: &str) -> Result<Vec<RelationType>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SUPERMAT_RELATIONS".to_string(),
                value: s.to_string(),
            })
        })
        .collect()
}

/// Heuristic word lists
///
/// Matching rules per list:
/// - `comparison_after`, `acceptance_before`, `ordinal_cues`, `separators`
///   and `value_unit` compare case-insensitively
/// - `rejection_before` compares case-sensitively ("T N" vs "tn" matter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lexicon {
    /// Words asking for positional pairing ("respectively")
    pub ordinal_cues: Vec<String>,

    /// Unit a critical value must end with
    pub value_unit: String,

    /// Words right after a value marking it as a comparison
    pub comparison_after: Vec<String>,

    /// Phrases right before a value naming another quantity
    pub rejection_before: Vec<String>,

    /// Phrases right before a value asserting a critical value
    pub acceptance_before: Vec<String>,

    /// Tokens that separate clauses between two candidates
    pub separators: Vec<String>,

    /// Opening and closing bracket pairs
    pub brackets: Vec<(String, String)>,

    /// Abbreviations that never end a sentence
    pub abbreviations: Vec<String>,
}

impl Lexicon {
    pub fn is_ordinal_cue(&self, word: &str) -> bool {
        contains_ignore_case(&self.ordinal_cues, word)
    }

    pub fn is_comparison(&self, word: &str) -> bool {
        contains_ignore_case(&self.comparison_after, word)
    }

    pub fn is_separator(&self, word: &str) -> bool {
        contains_ignore_case(&self.separators, word)
    }

    /// Index of the bracket pair opened by `token`
    pub fn opening_bracket(&self, token: &str) -> Option<usize> {
        self.brackets.iter().position(|(open, _)| open == token)
    }

    /// Index of the bracket pair closed by `token`
    pub fn closing_bracket(&self, token: &str) -> Option<usize> {
        self.brackets.iter().position(|(_, close)| close == token)
    }

    /// Whether `text` carries the expected unit
    pub fn has_value_unit(&self, text: &str) -> bool {
        text.trim_end()
            .to_lowercase()
            .ends_with(&self.value_unit.to_lowercase())
    }
}

fn contains_ignore_case(list: &[String], word: &str) -> bool {
    let word = word.to_lowercase();
    list.iter().any(|w| w.to_lowercase() == word)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Lexicon {
    fn default() -> Self {
        Self {
            ordinal_cues: strings(&["respectively"]),
            value_unit: "k".to_string(),
            comparison_after: strings(&["higher", "lower"]),
            rejection_before: strings(&[
                "T N", "TN", "t n", "tn", "Curie", "curie", "Neel", "neel", "at T =", "at T=",
                "ΔT c", "ΔTc", "Δ T c", "T =", "T=",
            ]),
            acceptance_before: strings(&[
                "superconducts at",
                "superconductive at around",
                "superconducts around",
                "superconductivity at",
                "superconductivity around",
                "exibits superconductivity at",
                "T c =",
                "Tc =",
            ]),
            separators: strings(&[
                ",", ";", "and", "but", "while", "whereas", "which", "although",
            ]),
            brackets: vec![
                ("(".to_string(), ")".to_string()),
                ("[".to_string(), "]".to_string()),
                ("{".to_string(), "}".to_string()),
            ],
            abbreviations: strings(&[
                "al.", "Fig.", "Figs.", "Ref.", "Refs.", "e.g.", "i.e.", "vs.", "cf.", "Eq.",
                "Eqs.", "No.", "ca.", "approx.",
            ]),
        }
    }
}

/// Linking pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkingConfig {
    /// Relation types resolved by the pipeline, in order
    pub relations: Vec<RelationType>,

    /// Fall back to the dependency-based resolver
    pub syntactic_fallback: bool,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            relations: vec![RelationType::MaterialTc, RelationType::TcPressure],
            syntactic_fallback: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl From<ConfigError> for crate::LinkError {
    fn from(err: ConfigError) -> Self {
        crate::LinkError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(
            config.linking.relations,
            vec![RelationType::MaterialTc, RelationType::TcPressure]
        );
        assert!(config.linking.syntactic_fallback);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [linking]
            relations = ["material-tc", "material-crystal-structure"]
            syntactic_fallback = false

            [lexicon]
            ordinal_cues = ["respectively", "resp."]
            "#,
        )
        .unwrap();

        assert_eq!(
            config.linking.relations,
            vec![
                RelationType::MaterialTc,
                RelationType::MaterialCrystalStructure
            ]
        );
        assert!(!config.linking.syntactic_fallback);
        assert!(config.lexicon.is_ordinal_cue("resp."));
        // untouched lists keep their defaults
        assert!(config.lexicon.is_separator("whereas"));
    }

    #[test]
    fn test_parse_relations() {
        assert_eq!(
            parse_relations("material-tc, tc-pressure").unwrap(),
            vec![RelationType::MaterialTc, RelationType::TcPressure]
        );
        assert!(parse_relations("material-tc,bogus").is_err());
    }

    #[test]
    fn test_lexicon_matching() {
        let lexicon = Lexicon::default();
        assert!(lexicon.is_comparison("Higher"));
        assert!(lexicon.is_ordinal_cue("RESPECTIVELY"));
        assert!(lexicon.is_separator("Whereas"));
        assert!(!lexicon.is_separator("where"));
        assert!(lexicon.has_value_unit("30 K "));
        assert!(!lexicon.has_value_unit("30 °C"));
        assert_eq!(lexicon.opening_bracket("["), Some(1));
        assert_eq!(lexicon.closing_bracket("}"), Some(2));
        assert_eq!(lexicon.closing_bracket("("), None);
    }
}
