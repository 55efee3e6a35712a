//! Engine
//!
//! Top-level context owning the registry, index and cache. One engine is
//! constructed per process and passed by reference. A document runs
//! through detect, choose schema, extract, then type every entity. Cache
//! writes only happen through the explicit feedback step.

use serde::{Deserialize, Serialize};
use triplex_core::{CandidateTriple, EngineConfig, Oracle, Result, SeedTriple};
use triplex_index::MultiLevelIndex;
use triplex_schema::SchemaRegistry;
use uuid::Uuid;

use crate::cache::{CacheSource, EntityTypeCache, RecordOutcome};
use crate::detector::{DetectionResult, SchemaDetector};
use crate::hybrid::{HybridExtraction, HybridTripleExtractor};
use crate::inferer::{Inference, InferenceMethod, LayeredInferer};

// ============================================================================
// Outcome
// ============================================================================

/// Inferred type of one entity appearing in the triples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTyping {
    pub name: String,
    pub inference: Inference,
}

/// Everything produced for one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub document_id: Uuid,
    pub schema_id: String,

    /// Ranked schema candidates; empty when the schema was given
    pub detection: Vec<DetectionResult>,

    pub extraction: HybridExtraction,
    pub entities: Vec<EntityTyping>,
}

impl DocumentOutcome {
    pub fn triples(&self) -> &[CandidateTriple] {
        &self.extraction.triples
    }

    /// Typing of an entity, matched case-insensitively
    pub fn entity(&self, name: &str) -> Option<&EntityTyping> {
        self.entities
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name.trim()))
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    config: EngineConfig,
    registry: SchemaRegistry,
    index: MultiLevelIndex,
    cache: EntityTypeCache,
    detector: SchemaDetector,
}

impl Engine {
    /// Build the index and detector over a registry. An empty registry is
    /// the one fatal startup condition.
    pub fn new(config: EngineConfig, registry: SchemaRegistry) -> Result<Self> {
        registry.ensure_not_empty()?;

        let index = MultiLevelIndex::build(registry.iter(), config.index.clone());
        let cache = EntityTypeCache::new(config.inference.cache_trust_threshold);
        let detector = SchemaDetector::new(&registry, config.detection.clone());

        tracing::info!(
            schemas = registry.len(),
            terms = index.stats().exact_terms,
            "Engine initialized"
        );

        Ok(Self {
            config,
            registry,
            index,
            cache,
            detector,
        })
    }

    /// Open the configured schema directory and build an engine over it
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let registry = SchemaRegistry::open(&config.schemas.dir)?;
        Self::new(config, registry)
    }

    /// Start from a previously saved cache
    pub fn with_cache(mut self, cache: EntityTypeCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Mutable registry access. Call [`Engine::refresh`] after structural
    /// changes so the index and detector see them.
    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.registry
    }

    pub fn index(&self) -> &MultiLevelIndex {
        &self.index
    }

    pub fn cache(&self) -> &EntityTypeCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut EntityTypeCache {
        &mut self.cache
    }

    /// Rebuild the index and detector from the registry. Learned index terms
    /// are dropped; re-promote them with [`Engine::promote_cache_terms`].
    pub fn refresh(&mut self) -> Result<()> {
        self.registry.ensure_not_empty()?;
        self.index = MultiLevelIndex::build(self.registry.iter(), self.config.index.clone());
        self.detector = SchemaDetector::new(&self.registry, self.config.detection.clone());
        tracing::info!(schemas = self.registry.len(), "Engine refreshed");
        Ok(())
    }

    /// Inferer bound to one schema's banks
    pub fn inferer(&self, schema_id: &str) -> Result<LayeredInferer<'_>> {
        let schema = self.registry.load(schema_id)?;
        Ok(LayeredInferer::new(
            &self.cache,
            &self.index,
            schema,
            self.config.inference.clone(),
        ))
    }

    /// Hybrid extractor for one schema
    pub fn extractor(&self, schema_id: &str) -> Result<HybridTripleExtractor> {
        let schema = self.registry.load(schema_id)?;
        Ok(HybridTripleExtractor::new(
            schema,
            self.config.extraction.clone(),
        ))
    }

    /// Configured default schema if registered, else the first by id
    pub fn fallback_schema_id(&self) -> Result<&str> {
        if let Some(id) = self.config.schemas.default_schema.as_deref() {
            match self.registry.load(id) {
                Ok(schema) => return Ok(schema.id.as_str()),
                Err(_) => tracing::warn!(schema = %id, "Configured default schema not registered"),
            }
        }
        self.registry
            .list()
            .into_iter()
            .next()
            .ok_or(triplex_core::TriplexError::EmptyRegistry)
    }

    /// Rank schemas for a document
    pub async fn detect(
        &self,
        text: &str,
        seeds: &[SeedTriple],
        oracle: Option<&dyn Oracle>,
    ) -> Result<Vec<DetectionResult>> {
        // Detection only consults the schema-independent tiers
        let inferer = self.inferer(self.fallback_schema_id()?)?;
        Ok(self.detector.detect(text, seeds, &inferer, oracle).await)
    }

    /// Classify a document, then extract under the winning schema
    pub async fn process(
        &self,
        text: &str,
        seeds: &[SeedTriple],
        oracle: Option<&dyn Oracle>,
    ) -> Result<DocumentOutcome> {
        let detection = self.detect(text, seeds, oracle).await?;

        let schema_id = match detection.first() {
            Some(best) => best.schema_id.clone(),
            None => {
                let id = self.fallback_schema_id()?.to_string();
                tracing::warn!(schema = %id, "No schema scored above threshold, using fallback");
                id
            }
        };

        self.run(schema_id, detection, text, oracle).await
    }

    /// Extract under a known schema, skipping detection
    pub async fn process_with_schema(
        &self,
        schema_id: &str,
        text: &str,
        oracle: Option<&dyn Oracle>,
    ) -> Result<DocumentOutcome> {
        self.run(schema_id.to_string(), Vec::new(), text, oracle).await
    }

    async fn run(
        &self,
        schema_id: String,
        detection: Vec<DetectionResult>,
        text: &str,
        oracle: Option<&dyn Oracle>,
    ) -> Result<DocumentOutcome> {
        let document_id = Uuid::new_v4();
        tracing::info!(document = %document_id, schema = %schema_id, chars = text.len(), "Processing document");

        let schema = self.registry.load(&schema_id)?;
        let inferer = self.inferer(&schema_id)?;
        let extractor = HybridTripleExtractor::new(schema, self.config.extraction.clone());

        let extraction = extractor.extract(text, &inferer, oracle).await;
        let entities = type_entities(&extraction.triples, schema.instance_relation(), &inferer);

        let resolved = entities.iter().filter(|e| e.inference.is_resolved()).count();
        tracing::info!(
            document = %document_id,
            triples = extraction.triples.len(),
            entities = entities.len(),
            resolved,
            oracle_invoked = extraction.oracle_invoked,
            "Document processed"
        );

        Ok(DocumentOutcome {
            document_id,
            schema_id,
            detection,
            extraction,
            entities,
        })
    }

    /// Write a document's resolved typings into the cache and bump schema
    /// usage counters. Typings that came from the cache are not re-recorded.
    /// Returns the number of cache writes.
    pub fn record_feedback(&mut self, outcome: &DocumentOutcome) -> usize {
        let mut written = 0;
        for typing in &outcome.entities {
            let (Some(entity_type), Some(method)) =
                (typing.inference.entity_type(), typing.inference.method())
            else {
                continue;
            };
            if method == InferenceMethod::Cache {
                continue;
            }

            let result = self.cache.record(
                &typing.name,
                entity_type,
                typing.inference.confidence(),
                CacheSource::Inferred,
            );
            if result != RecordOutcome::Ignored {
                written += 1;
            }
            self.registry.record_usage(&outcome.schema_id, entity_type);
        }

        tracing::debug!(document = %outcome.document_id, written, "Recorded feedback");
        written
    }

    /// Push cache entries seen at least `min_count` times into the index as
    /// learned terms. Returns the number of terms added.
    pub fn promote_cache_terms(&mut self, min_count: u64) -> usize {
        let terms = self.cache.export_high_frequency(min_count);
        let added = self.index.batch_update(
            terms
                .iter()
                .map(|t| (t.name.as_str(), t.entity_type.as_str(), t.confidence)),
        );
        tracing::info!(candidates = terms.len(), added, "Promoted cache terms to index");
        added
    }
}

/// Infer a type for every triple endpoint once, in first-seen order.
/// Objects of instance-of triples are classes and are skipped.
fn type_entities(
    triples: &[CandidateTriple],
    instance_relation: &str,
    inferer: &LayeredInferer<'_>,
) -> Vec<EntityTyping> {
    let mut seen = std::collections::HashSet::new();
    let mut entities = Vec::new();

    for triple in triples {
        let is_instance = triple.predicate == instance_relation;
        let endpoints = std::iter::once(&triple.subject)
            .chain((!is_instance).then_some(&triple.object));

        for name in endpoints {
            if !seen.insert(triplex_core::normalize_term(name)) {
                continue;
            }
            let context = Some(triple.evidence.as_str()).filter(|e| !e.is_empty());
            entities.push(EntityTyping {
                name: name.clone(),
                inference: inferer.infer(name, context),
            });
        }
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use triplex_core::TriplexError;
    use triplex_schema::{EntityTypeDef, RelationTypeDef, Schema};

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.insert(
            Schema::new("cs", "Computer Science")
                .with_entity_type(
                    "Algorithm",
                    EntityTypeDef::new("procedure")
                        .with_examples(["Ant Colony Optimization", "Dijkstra"])
                        .with_keywords(["algorithm", "heuristic"]),
                )
                .with_entity_type(
                    "Problem",
                    EntityTypeDef::new("task").with_keywords(["problem"]),
                )
                .with_relation_type(
                    "solves",
                    RelationTypeDef::new("").with_domain(["Algorithm"]).with_range(["Problem"]),
                ),
        );
        registry.insert(
            Schema::new("bio", "Biology")
                .with_entity_type(
                    "Organism",
                    EntityTypeDef::new("living thing")
                        .with_examples(["Honey Bee"])
                        .with_keywords(["species"]),
                )
                .with_relation_type("lives_in", RelationTypeDef::new("")),
        );
        registry
    }

    const TEXT: &str = "Dijkstra is an algorithm. Dijkstra solves the Shortest Path Problem \
                        with a heuristic.";

    #[test]
    fn test_empty_registry_is_fatal() {
        let result = Engine::new(EngineConfig::default(), SchemaRegistry::new());
        assert!(matches!(result, Err(TriplexError::EmptyRegistry)));
    }

    #[test]
    fn test_fallback_schema() {
        let engine = Engine::new(EngineConfig::default(), registry()).unwrap();
        assert_eq!(engine.fallback_schema_id().unwrap(), "bio");

        let mut config = EngineConfig::default();
        config.schemas.default_schema = Some("cs".into());
        let engine = Engine::new(config, registry()).unwrap();
        assert_eq!(engine.fallback_schema_id().unwrap(), "cs");

        let mut config = EngineConfig::default();
        config.schemas.default_schema = Some("missing".into());
        let engine = Engine::new(config, registry()).unwrap();
        assert_eq!(engine.fallback_schema_id().unwrap(), "bio");
    }

    #[tokio::test]
    async fn test_process_detects_and_extracts() {
        let engine = Engine::new(EngineConfig::default(), registry()).unwrap();
        let outcome = engine.process(TEXT, &[], None).await.unwrap();

        assert_eq!(outcome.schema_id, "cs");
        assert_eq!(outcome.detection[0].schema_id, "cs");
        assert!(outcome
            .triples()
            .iter()
            .any(|t| t.subject == "Dijkstra" && t.predicate == "is_instance_of" && t.object == "Algorithm"));
        assert!(outcome
            .triples()
            .iter()
            .any(|t| t.predicate == "solves" && t.object == "Shortest Path Problem"));

        let dijkstra = outcome.entity("dijkstra").unwrap();
        assert_eq!(dijkstra.inference.entity_type(), Some("Algorithm"));
        let problem = outcome.entity("Shortest Path Problem").unwrap();
        assert_eq!(problem.inference.entity_type(), Some("Problem"));
        // The class itself is not typed as an entity
        assert!(outcome.entity("Algorithm").is_none());
    }

    #[tokio::test]
    async fn test_process_with_unknown_schema() {
        let engine = Engine::new(EngineConfig::default(), registry()).unwrap();
        let result = engine.process_with_schema("physics", TEXT, None).await;
        assert!(matches!(result, Err(TriplexError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_feedback_and_promotion() {
        let mut engine = Engine::new(EngineConfig::default(), registry()).unwrap();
        let outcome = engine.process_with_schema("cs", TEXT, None).await.unwrap();
        assert!(outcome.detection.is_empty());

        let written = engine.record_feedback(&outcome);
        assert_eq!(written, outcome.entities.iter().filter(|e| e.inference.is_resolved()).count());
        assert!(written >= 2);

        let entry = engine.cache().get("Shortest Path Problem").unwrap();
        assert_eq!(entry.entity_type, "Problem");
        assert_eq!(entry.source, CacheSource::Inferred);
        assert!(engine.registry().load("cs").unwrap().entity_types["Problem"].usage_count >= 1);

        engine.record_feedback(&outcome);
        let promoted = engine.promote_cache_terms(2);
        assert!(promoted >= 1);
        let hit = engine.index().lookup("Shortest Path Problem").unwrap();
        assert_eq!(hit.entity_type, "Problem");
    }
}
