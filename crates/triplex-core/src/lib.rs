//! Triplex Core - Shared types, errors and traits
//!
//! This crate defines the abstractions used throughout the Triplex workspace:
//! - Common error types
//! - Candidate triples and their provenance tags
//! - Engine configuration
//! - The oracle trait plus prompt building and response parsing
//! - The graph payload handed to persistence collaborators

pub mod config;
pub mod oracle;

pub use config::{
    ConfigError, DetectionConfig, EngineConfig, ExtractionConfig, IndexConfig, InferenceConfig,
    LoggingConfig, OracleConfig, OracleProvider, SchemaConfig,
};
pub use oracle::{
    build_extraction_prompt, parse_oracle_triples, Oracle, OracleTriple, RelationSummary,
    SchemaDescriptor, TypeSummary,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for Triplex operations
#[derive(Error, Debug)]
pub enum TriplexError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Schema registry is empty")]
    EmptyRegistry,

    #[error("Oracle error: {0}")]
    OracleError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for TriplexError {
    fn from(e: ConfigError) -> Self {
        Self::ConfigError(e.to_string())
    }
}

impl From<serde_json::Error> for TriplexError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TriplexError>;

// ============================================================================
// Triples
// ============================================================================

/// Provenance tag recording which extraction path produced a triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    InstancePattern,
    TemporalPattern,
    SpatialPattern,
    ActionPattern,
    ContainmentPattern,
    RelationTrigger,
    CoOccurrence,
    Oracle,
}

impl ExtractionMethod {
    /// All rule-based methods, in the order the extractor runs them
    pub const RULES: [ExtractionMethod; 7] = [
        Self::InstancePattern,
        Self::TemporalPattern,
        Self::SpatialPattern,
        Self::ActionPattern,
        Self::ContainmentPattern,
        Self::RelationTrigger,
        Self::CoOccurrence,
    ];

    /// Whether the triple came from the generative fallback
    pub fn is_oracle(&self) -> bool {
        matches!(self, Self::Oracle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstancePattern => "instance_pattern",
            Self::TemporalPattern => "temporal_pattern",
            Self::SpatialPattern => "spatial_pattern",
            Self::ActionPattern => "action_pattern",
            Self::ContainmentPattern => "containment_pattern",
            Self::RelationTrigger => "relation_trigger",
            Self::CoOccurrence => "co_occurrence",
            Self::Oracle => "oracle",
        }
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-case and trim a term for comparison and dedup
pub fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

/// A scored subject-predicate-object statement with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,

    /// Confidence in [0, 1]
    pub confidence: f32,

    /// Extraction path that produced this triple
    pub method: ExtractionMethod,

    /// Matched text the triple was read from
    pub evidence: String,
}

impl CandidateTriple {
    /// Create a triple; confidence is clamped into [0, 1]
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        confidence: f32,
        method: ExtractionMethod,
    ) -> Self {
        Self {
            subject: subject.into().trim().to_string(),
            predicate: predicate.into().trim().to_string(),
            object: object.into().trim().to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            method,
            evidence: String::new(),
        }
    }

    /// Attach the source snippet
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    /// Dedup key: case-insensitive, trimmed (subject, predicate, object)
    pub fn key(&self) -> (String, String, String) {
        (
            normalize_term(&self.subject),
            normalize_term(&self.predicate),
            normalize_term(&self.object),
        )
    }
}

/// A known relation supplied alongside a document to help schema detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl SeedTriple {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

// ============================================================================
// Graph Payload
// ============================================================================

/// Entity record handed to the persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedEntity {
    pub id: Uuid,

    /// Surface name as it appeared in the triples
    pub name: String,

    /// Inferred type, `None` when the cascade ended in unknown
    pub entity_type: Option<String>,

    pub confidence: f32,

    /// Tier that resolved the type
    pub inferred_by: Option<String>,
}

/// Triple record referencing entities by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphTriple {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub predicate: String,
    pub object_id: Uuid,
    pub confidence: f32,
    pub method: ExtractionMethod,
    pub evidence: String,
}

/// Everything produced for a single document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPayload {
    pub document_id: Uuid,

    /// Schema the document was classified under
    pub schema_id: String,

    pub entities: Vec<TypedEntity>,
    pub triples: Vec<GraphTriple>,
    pub created_at: DateTime<Utc>,
}

impl GraphPayload {
    /// Look up an entity by id
    pub fn entity(&self, id: Uuid) -> Option<&TypedEntity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for persistence collaborators receiving extraction results
#[async_trait::async_trait]
pub trait GraphSink: Send + Sync {
    /// Store one document's payload
    async fn store(&self, payload: &GraphPayload) -> Result<()>;

    /// Get sink name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triple_key_normalization() {
        let a = CandidateTriple::new(
            " Ant Colony ",
            "Solves",
            "TSP",
            0.7,
            ExtractionMethod::RelationTrigger,
        );
        let b = CandidateTriple::new("ant colony", "solves ", "tsp", 0.9, ExtractionMethod::Oracle);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_triple_confidence_clamped() {
        let t = CandidateTriple::new("a", "b", "c", 1.7, ExtractionMethod::Oracle);
        assert_eq!(t.confidence, 1.0);
        let t = CandidateTriple::new("a", "b", "c", -0.2, ExtractionMethod::Oracle);
        assert_eq!(t.confidence, 0.0);
    }

    #[test]
    fn test_method_serde_names() {
        let json = serde_json::to_string(&ExtractionMethod::CoOccurrence).unwrap();
        assert_eq!(json, "\"co_occurrence\"");
        assert!(ExtractionMethod::Oracle.is_oracle());
        assert!(ExtractionMethod::RULES.iter().all(|m| !m.is_oracle()));
    }

    #[test]
    fn test_config_error_converts() {
        let err: TriplexError = ConfigError::MissingRequired("schemas.dir".into()).into();
        assert!(matches!(err, TriplexError::ConfigError(_)));
    }
}
