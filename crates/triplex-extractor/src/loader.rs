//! Graph Loader module
//!
//! Converts a processed document into uuid-keyed entity and triple records
//! and hands them to a [`GraphSink`].

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use triplex_core::{normalize_term, CandidateTriple, GraphPayload, GraphSink, GraphTriple, Result, TypedEntity};

use crate::engine::DocumentOutcome;
use crate::inferer::Inference;

// ============================================================================
// Conversion utilities
// ============================================================================

/// Build an entity record from a name and its inference
pub fn typed_entity(name: &str, inference: Option<&Inference>) -> TypedEntity {
    TypedEntity {
        id: Uuid::new_v4(),
        name: name.trim().to_string(),
        entity_type: inference.and_then(|i| i.entity_type()).map(str::to_string),
        confidence: inference.map(Inference::confidence).unwrap_or(0.0),
        inferred_by: inference.and_then(Inference::method).map(|m| m.to_string()),
    }
}

/// Build a triple record between two known entity ids
pub fn candidate_to_graph_triple(
    triple: &CandidateTriple,
    subject_id: Uuid,
    object_id: Uuid,
) -> GraphTriple {
    GraphTriple {
        id: Uuid::new_v4(),
        subject_id,
        predicate: triple.predicate.clone(),
        object_id,
        confidence: triple.confidence,
        method: triple.method,
        evidence: triple.evidence.clone(),
    }
}

// ============================================================================
// Graph Loader
// ============================================================================

/// Result of loading one document
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub entities_loaded: usize,
    pub relations_loaded: usize,
    /// Normalized entity name to entity ID
    pub entity_map: HashMap<String, Uuid>,
}

impl LoadResult {
    pub fn is_empty(&self) -> bool {
        self.entities_loaded == 0 && self.relations_loaded == 0
    }

    pub fn total(&self) -> usize {
        self.entities_loaded + self.relations_loaded
    }
}

/// Collects entities and triples for one document
pub struct GraphLoader {
    document_id: Uuid,
    schema_id: String,
    /// Normalized name -> entity ID
    entity_map: HashMap<String, Uuid>,
    entities: Vec<TypedEntity>,
    triples: Vec<GraphTriple>,
}

impl GraphLoader {
    pub fn new(document_id: Uuid, schema_id: impl Into<String>) -> Self {
        Self {
            document_id,
            schema_id: schema_id.into(),
            entity_map: HashMap::new(),
            entities: Vec::new(),
            triples: Vec::new(),
        }
    }

    /// Loader pre-filled with a document's typed entities and triples
    pub fn from_outcome(outcome: &DocumentOutcome) -> Self {
        let mut loader = Self::new(outcome.document_id, outcome.schema_id.clone());
        for typing in &outcome.entities {
            loader.add_entity(&typing.name, Some(&typing.inference));
        }
        for triple in outcome.triples() {
            loader.add_triple(triple);
        }
        loader
    }

    /// Add an entity; names are matched case-insensitively, so a repeated
    /// name returns the existing ID
    pub fn add_entity(&mut self, name: &str, inference: Option<&Inference>) -> Uuid {
        let key = normalize_term(name);
        if let Some(&id) = self.entity_map.get(&key) {
            return id;
        }

        let entity = typed_entity(name, inference);
        let id = entity.id;
        self.entity_map.insert(key, id);
        self.entities.push(entity);
        id
    }

    /// Add a triple. Endpoints not yet known are added untyped.
    pub fn add_triple(&mut self, triple: &CandidateTriple) -> Uuid {
        let subject_id = self.add_entity(&triple.subject, None);
        let object_id = self.add_entity(&triple.object, None);

        let record = candidate_to_graph_triple(triple, subject_id, object_id);
        let id = record.id;
        self.triples.push(record);
        id
    }

    pub fn entities(&self) -> &[TypedEntity] {
        &self.entities
    }

    pub fn triples(&self) -> &[GraphTriple] {
        &self.triples
    }

    pub fn entity_map(&self) -> &HashMap<String, Uuid> {
        &self.entity_map
    }

    pub fn result(&self) -> LoadResult {
        LoadResult {
            entities_loaded: self.entities.len(),
            relations_loaded: self.triples.len(),
            entity_map: self.entity_map.clone(),
        }
    }

    /// Take the collected records as a payload
    pub fn into_payload(self) -> GraphPayload {
        GraphPayload {
            document_id: self.document_id,
            schema_id: self.schema_id,
            entities: self.entities,
            triples: self.triples,
            created_at: Utc::now(),
        }
    }
}

/// Convert a processed document and store it through a sink
pub async fn store_outcome(outcome: &DocumentOutcome, sink: &dyn GraphSink) -> Result<LoadResult> {
    let loader = GraphLoader::from_outcome(outcome);
    let result = loader.result();
    sink.store(&loader.into_payload()).await?;

    tracing::info!(
        document = %outcome.document_id,
        sink = sink.name(),
        entities = result.entities_loaded,
        triples = result.relations_loaded,
        "Stored graph payload"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inferer::{InferenceMethod, InferenceOutcome};
    use std::sync::Mutex;
    use triplex_core::ExtractionMethod;

    fn inference(entity_type: &str, confidence: f32) -> Inference {
        Inference {
            outcome: InferenceOutcome::Resolved {
                entity_type: entity_type.to_string(),
                confidence,
                method: InferenceMethod::Index,
            },
            tiers: Vec::new(),
        }
    }

    fn triple(s: &str, p: &str, o: &str) -> CandidateTriple {
        CandidateTriple::new(s, p, o, 0.75, ExtractionMethod::RelationTrigger).with_evidence("evidence")
    }

    #[derive(Default)]
    struct MemorySink {
        stored: Mutex<Vec<GraphPayload>>,
    }

    #[async_trait::async_trait]
    impl GraphSink for MemorySink {
        async fn store(&self, payload: &GraphPayload) -> Result<()> {
            self.stored.lock().unwrap().push(payload.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "memory"
        }
    }

    #[test]
    fn test_typed_entity() {
        let entity = typed_entity(" Dijkstra ", Some(&inference("Algorithm", 1.0)));
        assert_eq!(entity.name, "Dijkstra");
        assert_eq!(entity.entity_type.as_deref(), Some("Algorithm"));
        assert_eq!(entity.inferred_by.as_deref(), Some("index"));

        let unknown = typed_entity("Foo", None);
        assert!(unknown.entity_type.is_none());
        assert_eq!(unknown.confidence, 0.0);
    }

    #[test]
    fn test_add_entity_dedups_case_insensitively() {
        let mut loader = GraphLoader::new(Uuid::new_v4(), "cs");
        let a = loader.add_entity("Dijkstra", Some(&inference("Algorithm", 1.0)));
        let b = loader.add_entity("dijkstra", None);
        assert_eq!(a, b);
        assert_eq!(loader.entities().len(), 1);
        assert_eq!(loader.entities()[0].entity_type.as_deref(), Some("Algorithm"));
    }

    #[test]
    fn test_add_triple_links_entities() {
        let mut loader = GraphLoader::new(Uuid::new_v4(), "cs");
        let dijkstra = loader.add_entity("Dijkstra", Some(&inference("Algorithm", 1.0)));
        loader.add_triple(&triple("Dijkstra", "solves", "Shortest Path"));

        let result = loader.result();
        assert_eq!(result.entities_loaded, 2);
        assert_eq!(result.relations_loaded, 1);
        assert_eq!(result.total(), 3);

        let record = &loader.triples()[0];
        assert_eq!(record.subject_id, dijkstra);
        assert_eq!(record.object_id, loader.entity_map()["shortest path"]);
        assert_eq!(record.evidence, "evidence");
    }

    #[tokio::test]
    async fn test_store_outcome() {
        use crate::engine::{DocumentOutcome, EntityTyping};
        use crate::hybrid::HybridExtraction;
        use std::time::Duration;

        let outcome = DocumentOutcome {
            document_id: Uuid::new_v4(),
            schema_id: "cs".into(),
            detection: Vec::new(),
            extraction: HybridExtraction {
                triples: vec![triple("Dijkstra", "solves", "Shortest Path")],
                rule_count: 1,
                oracle_count: 0,
                reasons: Vec::new(),
                oracle_invoked: false,
                stages: Vec::new(),
                elapsed: Duration::ZERO,
            },
            entities: vec![EntityTyping {
                name: "Dijkstra".into(),
                inference: inference("Algorithm", 1.0),
            }],
        };

        let sink = MemorySink::default();
        let result = store_outcome(&outcome, &sink).await.unwrap();
        assert_eq!(result.total(), 3);

        let stored = sink.stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        let payload = &stored[0];
        assert_eq!(payload.document_id, outcome.document_id);
        let subject = payload.entity(payload.triples[0].subject_id).unwrap();
        assert_eq!(subject.entity_type.as_deref(), Some("Algorithm"));
    }
}
