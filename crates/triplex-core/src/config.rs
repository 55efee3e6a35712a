//! Triplex Configuration Management
//!
//! Handles configuration from environment variables and TOML files.
//! Every tuning constant used by the engine lives here with its default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Schema registry location
    pub schemas: SchemaConfig,

    /// Multi-level index tuning
    pub index: IndexConfig,

    /// Entity-type inference cascade
    pub inference: InferenceConfig,

    /// Schema detection weights
    pub detection: DetectionConfig,

    /// Hybrid extraction thresholds
    pub extraction: ExtractionConfig,

    /// Oracle provider configuration
    pub oracle: OracleConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Schemas
        if let Ok(dir) = std::env::var("TRIPLEX_SCHEMA_DIR") {
            config.schemas.dir = PathBuf::from(dir);
        }
        if let Ok(id) = std::env::var("TRIPLEX_DEFAULT_SCHEMA") {
            config.schemas.default_schema = Some(id);
        }

        // Oracle
        if let Ok(provider) = std::env::var("ORACLE_PROVIDER") {
            config.oracle.provider = provider.parse()?;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.oracle.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("ORACLE_BASE_URL") {
            config.oracle.base_url = Some(url);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            config.oracle.ollama_url = url;
        }
        if let Ok(model) = std::env::var("ORACLE_MODEL") {
            config.oracle.model = model;
        }
        if let Ok(secs) = std::env::var("ORACLE_TIMEOUT_SECS") {
            config.oracle.timeout_secs = secs.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ORACLE_TIMEOUT_SECS".to_string(),
                value: secs,
            })?;
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

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let defaults = Self::default();

        if env_config.schemas.dir != defaults.schemas.dir {
            self.schemas.dir = env_config.schemas.dir;
        }
        if env_config.schemas.default_schema.is_some() {
            self.schemas.default_schema = env_config.schemas.default_schema;
        }
        if env_config.oracle.provider != defaults.oracle.provider {
            self.oracle.provider = env_config.oracle.provider;
        }
        if env_config.oracle.model != defaults.oracle.model {
            self.oracle.model = env_config.oracle.model;
        }
        if env_config.oracle.timeout_secs != defaults.oracle.timeout_secs {
            self.oracle.timeout_secs = env_config.oracle.timeout_secs;
        }
        if env_config.logging.level != defaults.logging.level {
            self.logging.level = env_config.logging.level;
        }

        // Always use env for sensitive values
        if env_config.oracle.api_key.is_some() {
            self.oracle.api_key = env_config.oracle.api_key;
        }

        Ok(self)
    }

    /// Reject weights and thresholds outside their valid ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |key: &str, v: f32| -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: v.to_string(),
                })
            }
        };

        unit("index.keyword_confidence", self.index.keyword_confidence)?;
        unit("index.prefix_confidence", self.index.prefix_confidence)?;
        unit("index.pattern_confidence", self.index.pattern_confidence)?;
        unit("inference.cache_trust_threshold", self.inference.cache_trust_threshold)?;
        unit("detection.tie_threshold", self.detection.tie_threshold)?;
        unit("extraction.confidence_floor", self.extraction.confidence_floor)?;
        unit(
            "extraction.min_high_confidence_ratio",
            self.extraction.min_high_confidence_ratio,
        )?;

        let weights =
            self.detection.ontology_weight + self.detection.seed_weight + self.detection.structure_weight;
        if weights <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "detection weights".to_string(),
                value: weights.to_string(),
            });
        }
        if self.extraction.units_per_triple == 0 {
            return Err(ConfigError::InvalidValue {
                key: "extraction.units_per_triple".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Schema registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Directory holding YAML/JSON schema files
    pub dir: PathBuf,

    /// Schema used when detection finds no candidate
    pub default_schema: Option<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("schemas"),
            default_schema: None,
        }
    }
}

/// Multi-level index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Confidence stored for vocabulary terms in the exact index
    pub keyword_confidence: f32,

    /// Confidence stored for vocabulary terms in the prefix trie
    pub prefix_confidence: f32,

    /// Confidence stored for schema patterns
    pub pattern_confidence: f32,

    /// Multiplier applied to prefix-tier hits at query time
    pub prefix_decay: f32,

    /// Multiplier applied to partial substring hits
    pub partial_decay: f32,

    /// Cap on trie results per prefix query
    pub max_prefix_results: usize,

    /// Default number of types returned by a search
    pub default_top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            keyword_confidence: 1.0,
            prefix_confidence: 0.9,
            pattern_confidence: 0.8,
            prefix_decay: 0.9,
            partial_decay: 0.7,
            max_prefix_results: 50,
            default_top_k: 5,
        }
    }
}

/// Layered entity-type inference configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Cache entries short-circuit only above this confidence
    pub cache_trust_threshold: f32,

    /// Confidence for a schema pattern-bank hit
    pub pattern_confidence: f32,

    /// Confidence for a keyword-bank hit
    pub keyword_confidence: f32,

    /// Confidence for a context-bank hit
    pub context_confidence: f32,

    /// Characters of surrounding text used as context by the extractor
    pub context_window: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            cache_trust_threshold: 0.9,
            pattern_confidence: 0.8,
            keyword_confidence: 0.7,
            context_confidence: 0.6,
            context_window: 100,
        }
    }
}

/// Schema detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub ontology_weight: f32,
    pub seed_weight: f32,
    pub structure_weight: f32,

    /// Candidates at or below this score are discarded
    pub min_score: f32,

    /// Top-two gap below which the oracle is asked to break the tie
    pub tie_threshold: f32,

    /// Score added to the candidate the oracle names
    pub oracle_bonus: f32,

    /// Maximum evidence items kept per candidate
    pub max_evidence: usize,

    /// Pattern matches at which the structural score saturates
    pub structure_saturation: usize,

    /// Characters of the document sent with a tie-break prompt
    pub excerpt_chars: usize,

    /// Token limit for the tie-break answer
    pub oracle_max_tokens: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ontology_weight: 0.4,
            seed_weight: 0.3,
            structure_weight: 0.3,
            min_score: 0.05,
            tie_threshold: 0.1,
            oracle_bonus: 0.1,
            max_evidence: 5,
            structure_saturation: 10,
            excerpt_chars: 1000,
            oracle_max_tokens: 50,
        }
    }
}

/// Hybrid triple extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Fewer rule triples than this triggers the oracle
    pub min_triples: usize,

    /// Triples at or above this confidence count as high-confidence
    pub confidence_floor: f32,

    /// High-confidence share below which the oracle is consulted
    pub min_high_confidence_ratio: f32,

    /// Complexity units per expected triple
    pub units_per_triple: usize,

    /// Floor on the expected triple count
    pub min_expected_triples: usize,

    /// Fraction of the expected count rules must reach
    pub density_factor: f32,

    /// Both instance-of spans must resolve above this confidence
    pub instance_min_confidence: f32,

    /// Confidence assigned to oracle triples that carry none
    pub oracle_default_confidence: f32,

    /// Skip the oracle entirely even when rules are insufficient
    pub rules_only: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_triples: 3,
            confidence_floor: 0.6,
            min_high_confidence_ratio: 0.5,
            units_per_triple: 100,
            min_expected_triples: 3,
            density_factor: 0.5,
            instance_min_confidence: 0.5,
            oracle_default_confidence: 0.8,
            rules_only: false,
        }
    }
}

/// Oracle provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Provider to use
    pub provider: OracleProvider,

    /// API key (OpenAI and compatible APIs)
    pub api_key: Option<String>,

    /// API base URL (for Azure or compatible APIs)
    pub base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Model name to use
    pub model: String,

    /// Upper bound on tokens per request
    pub max_tokens: u32,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: OracleProvider::OpenAI,
            api_key: None,
            base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            timeout_secs: 30,
        }
    }
}

/// Supported oracle providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    OpenAI,
    Ollama,
    Azure,
    Offline,
}

impl std::str::FromStr for OracleProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "azure" => Ok(Self::Azure),
            "offline" | "none" => Ok(Self::Offline),
            _ => Err(ConfigError::InvalidValue {
                key: "ORACLE_PROVIDER".to_string(),
                value: s.to_string(),
            }),
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

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.inference.cache_trust_threshold, 0.9);
        assert_eq!(config.extraction.min_triples, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oracle_provider_parse() {
        assert_eq!(
            "openai".parse::<OracleProvider>().unwrap(),
            OracleProvider::OpenAI
        );
        assert_eq!(
            "Ollama".parse::<OracleProvider>().unwrap(),
            OracleProvider::Ollama
        );
        assert_eq!(
            "offline".parse::<OracleProvider>().unwrap(),
            OracleProvider::Offline
        );
        assert!("invalid".parse::<OracleProvider>().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [detection]
            tie_threshold = 0.2

            [oracle]
            provider = "ollama"
            model = "llama3"
            "#,
        )
        .unwrap();

        assert_eq!(config.detection.tie_threshold, 0.2);
        assert_eq!(config.detection.ontology_weight, 0.4);
        assert_eq!(config.oracle.provider, OracleProvider::Ollama);
        assert_eq!(config.oracle.ollama_url, "http://localhost:11434");
    }

    #[test]
    fn test_from_file_rejects_bad_ratio() {
        let dir = std::env::temp_dir().join(format!("triplex-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "[extraction]\nmin_high_confidence_ratio = 1.5\n").unwrap();

        let err = EngineConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::from_file("/nonexistent/triplex.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
