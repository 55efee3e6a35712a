//! End-to-end tests over the bundled schema files
//!
//! Runs detection, extraction, typing, feedback and graph hand-off with a
//! deterministic stub oracle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use triplex_core::{
    EngineConfig, ExtractionMethod, GraphPayload, GraphSink, Oracle, Result, SeedTriple,
};
use triplex_extractor::{
    store_outcome, Engine, Evaluator, ExtractionStats, FallbackReason, GoldTriple, InferenceMethod,
};

const ACO_TEXT: &str = "Ant Colony Optimization is an Algorithm. \
                        Ant Colony Optimization solves Traveling Salesman Problem.";

fn schema_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../schemas")
}

fn engine() -> Engine {
    let mut config = EngineConfig::default();
    config.schemas.dir = schema_dir();
    Engine::from_config(config).unwrap()
}

/// Oracle that always answers with the same text and counts calls
struct StubOracle {
    answer: &'static str,
    calls: AtomicUsize,
}

impl StubOracle {
    fn new(answer: &'static str) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Oracle for StubOracle {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.to_string())
    }
}

#[derive(Default)]
struct CollectingSink {
    payloads: Mutex<Vec<GraphPayload>>,
}

#[async_trait::async_trait]
impl GraphSink for CollectingSink {
    async fn store(&self, payload: &GraphPayload) -> Result<()> {
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "collecting"
    }
}

// =============================================================================
// Registry
// =============================================================================

#[test]
fn test_bundled_schemas_load() {
    let engine = engine();
    assert_eq!(engine.registry().list(), vec!["biology", "computer_science"]);

    let cs = engine.registry().load("computer_science").unwrap();
    assert_eq!(cs.display_name(), "Computer Science");
    assert_eq!(cs.instance_relation(), "is_instance_of");
    assert_eq!(cs.resolve_relation("Tackles").map(|(name, _)| name), Some("solves"));
    assert!(cs.descriptor().prompt_template.is_some());
}

// =============================================================================
// Extraction
// =============================================================================

#[tokio::test]
async fn test_rule_families_extract_instance_and_relation() {
    let engine = engine();
    let oracle = StubOracle::new("[]");

    let outcome = engine
        .process_with_schema("computer_science", ACO_TEXT, Some(&oracle))
        .await
        .unwrap();
    let triples = outcome.triples();

    let instance = triples
        .iter()
        .find(|t| t.predicate == "is_instance_of")
        .expect("instance-of triple");
    assert_eq!(instance.subject, "Ant Colony Optimization");
    assert_eq!(instance.object, "Algorithm");
    assert_eq!(instance.method, ExtractionMethod::InstancePattern);
    assert!(instance.confidence >= 0.7);

    let solves = triples
        .iter()
        .find(|t| t.predicate == "solves")
        .expect("solves triple");
    assert_eq!(solves.subject, "Ant Colony Optimization");
    assert_eq!(solves.object, "Traveling Salesman Problem");
    assert!(!solves.method.is_oracle());
    assert!(solves.confidence >= 0.7);

    // Two rule triples are below the minimum of three
    assert_eq!(outcome.extraction.rule_count, 2);
    assert!(outcome.extraction.oracle_invoked);
    assert!(outcome
        .extraction
        .reasons
        .contains(&FallbackReason::TooFewTriples { count: 2, min: 3 }));
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    assert!(triples.iter().all(|t| !t.method.is_oracle()));
}

#[tokio::test]
async fn test_oracle_triples_are_tagged_and_merged() {
    let engine = engine();
    let oracle = StubOracle::new(
        r#"Here you go:
        [{"subject": "ant colony optimization", "predicate": "solves", "object": "traveling salesman problem", "confidence": 0.95},
         {"subject": "Ant Colony Optimization", "predicate": "employs", "object": "Pheromone Trail"}]"#,
    );

    let outcome = engine
        .process_with_schema("computer_science", ACO_TEXT, Some(&oracle))
        .await
        .unwrap();
    let triples = outcome.triples();

    // The oracle's duplicate wins on confidence but keeps a single key
    let solves: Vec<_> = triples.iter().filter(|t| t.predicate == "solves").collect();
    assert_eq!(solves.len(), 1);
    assert_eq!(solves[0].method, ExtractionMethod::Oracle);
    assert_eq!(solves[0].confidence, 0.95);

    let uses = triples.iter().find(|t| t.predicate == "uses").unwrap();
    assert_eq!(uses.method, ExtractionMethod::Oracle);
    assert_eq!(uses.confidence, 0.8);

    let stats = ExtractionStats::from_triples(triples);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.oracle_count, 2);

    let gold = [
        GoldTriple::new("Ant Colony Optimization", "is_instance_of", "Algorithm"),
        GoldTriple::new("Ant Colony Optimization", "solves", "Traveling Salesman Problem"),
    ];
    let metrics = Evaluator::new().evaluate(triples, &gold);
    assert_eq!(metrics.true_positives, 2);
    assert_eq!(metrics.false_positives, 1);
    assert!((metrics.recall() - 1.0).abs() < 1e-6);
}

// =============================================================================
// Orchestration
// =============================================================================

#[tokio::test]
async fn test_process_detects_computer_science() {
    let engine = engine();

    let outcome = engine.process(ACO_TEXT, &[], None).await.unwrap();

    assert_eq!(outcome.schema_id, "computer_science");
    assert_eq!(outcome.detection[0].schema_id, "computer_science");
    assert!(!outcome.detection[0].evidence.is_empty());
    assert!(!outcome.extraction.oracle_invoked);

    let aco = outcome.entity("Ant Colony Optimization").unwrap();
    assert_eq!(aco.inference.entity_type(), Some("Algorithm"));
    let tsp = outcome.entity("traveling salesman problem").unwrap();
    assert_eq!(tsp.inference.entity_type(), Some("Problem"));
}

#[tokio::test]
async fn test_seed_triples_steer_detection() {
    let engine = engine();
    let seeds = [SeedTriple::new("Gray Wolf", "inhabits", "Savanna")];

    let detection = engine
        .detect("The colony moved at dawn.", &seeds, None)
        .await
        .unwrap();

    assert_eq!(detection[0].schema_id, "biology");
    assert!(detection[0].scores.seed > 0.9);
}

#[tokio::test]
async fn test_feedback_makes_cache_authoritative() {
    let mut engine = engine();

    let first = engine
        .process_with_schema("computer_science", ACO_TEXT, None)
        .await
        .unwrap();
    assert_eq!(
        first.entity("Ant Colony Optimization").unwrap().inference.method(),
        Some(InferenceMethod::Index)
    );
    assert!(engine.record_feedback(&first) >= 2);

    let second = engine
        .process_with_schema("computer_science", ACO_TEXT, None)
        .await
        .unwrap();
    let aco = second.entity("Ant Colony Optimization").unwrap();
    assert_eq!(aco.inference.method(), Some(InferenceMethod::Cache));
    assert_eq!(aco.inference.entity_type(), Some("Algorithm"));

    let usage = engine
        .registry()
        .load("computer_science")
        .unwrap()
        .entity_types["Algorithm"]
        .usage_count;
    assert_eq!(usage, 1);
}

#[tokio::test]
async fn test_outcome_reaches_graph_sink() {
    let engine = engine();
    let sink = CollectingSink::default();

    let outcome = engine
        .process_with_schema("computer_science", ACO_TEXT, None)
        .await
        .unwrap();
    let result = store_outcome(&outcome, &sink).await.unwrap();

    // ACO, TSP and the Algorithm class node
    assert_eq!(result.entities_loaded, 3);
    assert_eq!(result.relations_loaded, 2);

    let payloads = sink.payloads.lock().unwrap();
    let payload = &payloads[0];
    assert_eq!(payload.schema_id, "computer_science");
    let json = serde_json::to_value(payload).unwrap();
    assert_eq!(json["triples"].as_array().unwrap().len(), 2);
}
