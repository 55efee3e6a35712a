//! Hybrid Triple Extractor
//!
//! Runs the rule families first and consults the oracle only when the
//! rule output looks insufficient. Results from both paths are merged
//! under the candidate dedup key.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use triplex_core::{
    normalize_term, CandidateTriple, ExtractionConfig, ExtractionMethod, Oracle, OracleTriple,
    SchemaDescriptor,
};
use triplex_schema::Schema;

use crate::inferer::LayeredInferer;
use crate::rules::RuleBasedTripleExtractor;
use crate::text::split_sentences;

// ============================================================================
// Merge
// ============================================================================

/// Deduplicate by normalized (s, p, o). On collision the strictly higher
/// confidence wins, otherwise the first occurrence is kept. The result is
/// sorted by confidence, descending and stable.
pub fn merge_and_deduplicate(triples: Vec<CandidateTriple>) -> Vec<CandidateTriple> {
    let mut slots: HashMap<(String, String, String), usize> = HashMap::new();
    let mut merged: Vec<CandidateTriple> = Vec::with_capacity(triples.len());

    for triple in triples {
        match slots.get(&triple.key()) {
            Some(&slot) => {
                if triple.confidence > merged[slot].confidence {
                    merged[slot] = triple;
                }
            }
            None => {
                slots.insert(triple.key(), merged.len());
                merged.push(triple);
            }
        }
    }

    merged.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    merged
}

// ============================================================================
// Sufficiency
// ============================================================================

/// Why the rule output was judged insufficient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FallbackReason {
    /// Fewer unique triples than the configured minimum
    TooFewTriples { count: usize, min: usize },

    /// Share of high-confidence triples below the configured ratio
    LowConfidenceRatio { high_ratio: f32 },

    /// Fewer triples than the text's complexity suggests
    SparseDensity { count: usize, expected: usize },
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewTriples { count, min } => write!(f, "{} triples, minimum {}", count, min),
            Self::LowConfidenceRatio { high_ratio } => {
                write!(f, "only {:.0}% high-confidence triples", high_ratio * 100.0)
            }
            Self::SparseDensity { count, expected } => {
                write!(f, "{} triples, {} expected", count, expected)
            }
        }
    }
}

/// Complexity units: characters, plus 10 per sentence, plus 5 per
/// capitalized token
pub fn text_complexity(text: &str) -> usize {
    let chars = text.chars().count();
    let sentences = split_sentences(text)
        .into_iter()
        .filter(|s| s.chars().count() > 5)
        .count();
    let capitalized = text
        .split_whitespace()
        .filter(|token| token.chars().next().is_some_and(char::is_uppercase))
        .count();
    chars + 10 * sentences + 5 * capitalized
}

/// Reasons to consult the oracle; empty when the rules are sufficient
pub fn fallback_reasons(
    text: &str,
    triples: &[CandidateTriple],
    config: &ExtractionConfig,
) -> Vec<FallbackReason> {
    let mut reasons = Vec::new();
    let count = triples.len();

    if count < config.min_triples {
        reasons.push(FallbackReason::TooFewTriples {
            count,
            min: config.min_triples,
        });
    }

    if count > 0 {
        let high = triples
            .iter()
            .filter(|t| t.confidence >= config.confidence_floor)
            .count();
        let high_ratio = high as f32 / count as f32;
        if high_ratio < config.min_high_confidence_ratio {
            reasons.push(FallbackReason::LowConfidenceRatio { high_ratio });
        }
    }

    let expected = (text_complexity(text) / config.units_per_triple.max(1))
        .max(config.min_expected_triples);
    if (count as f32) < expected as f32 * config.density_factor {
        reasons.push(FallbackReason::SparseDensity { count, expected });
    }

    reasons
}

// ============================================================================
// Hybrid Extractor
// ============================================================================

/// Pipeline stage of one extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStage {
    Rules,
    Oracle,
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: ExtractionStage,
    pub elapsed: Duration,
}

/// Result of one hybrid extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridExtraction {
    /// Merged, deduplicated triples sorted by confidence
    pub triples: Vec<CandidateTriple>,

    /// Unique triples from the rule families
    pub rule_count: usize,

    /// Triples returned by the oracle, before merging
    pub oracle_count: usize,

    /// Why the oracle was consulted (empty when rules sufficed)
    pub reasons: Vec<FallbackReason>,

    pub oracle_invoked: bool,
    pub stages: Vec<StageTiming>,
    pub elapsed: Duration,
}

impl HybridExtraction {
    pub fn rule_triples(&self) -> impl Iterator<Item = &CandidateTriple> {
        self.triples.iter().filter(|t| !t.method.is_oracle())
    }

    pub fn oracle_triples(&self) -> impl Iterator<Item = &CandidateTriple> {
        self.triples.iter().filter(|t| t.method.is_oracle())
    }
}

/// Rules plus oracle fallback for one schema
#[derive(Debug, Clone)]
pub struct HybridTripleExtractor {
    rules: RuleBasedTripleExtractor,
    descriptor: SchemaDescriptor,
    relation_names: HashMap<String, String>,
    config: ExtractionConfig,
}

impl HybridTripleExtractor {
    pub fn new(schema: &Schema, config: ExtractionConfig) -> Self {
        let mut relation_names = HashMap::new();
        for (name, def) in &schema.relation_types {
            for alias in &def.aliases {
                relation_names
                    .entry(normalize_term(alias))
                    .or_insert_with(|| name.clone());
            }
        }
        // Names take precedence over aliases
        for name in schema.relation_types.keys() {
            relation_names.insert(normalize_term(name), name.clone());
        }

        Self {
            rules: RuleBasedTripleExtractor::new(schema, config.instance_min_confidence),
            descriptor: schema.descriptor(),
            relation_names,
            config,
        }
    }

    pub fn rules(&self) -> &RuleBasedTripleExtractor {
        &self.rules
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract triples, falling back to the oracle when the rule output is
    /// insufficient and an oracle is available
    pub async fn extract(
        &self,
        text: &str,
        inferer: &LayeredInferer<'_>,
        oracle: Option<&dyn Oracle>,
    ) -> HybridExtraction {
        let started = Instant::now();
        let mut stages = Vec::with_capacity(3);

        let stage_start = Instant::now();
        let rule_triples = self.rules.extract(text, inferer);
        stages.push(StageTiming {
            stage: ExtractionStage::Rules,
            elapsed: stage_start.elapsed(),
        });
        let rule_count = rule_triples.len();

        let reasons = fallback_reasons(text, &rule_triples, &self.config);
        let mut oracle_invoked = false;
        let mut oracle_triples = Vec::new();

        match oracle {
            _ if reasons.is_empty() => {
                tracing::debug!(schema = %self.descriptor.id, rule_count, "Rule output sufficient");
            }
            _ if self.config.rules_only => {
                tracing::debug!(schema = %self.descriptor.id, "Oracle fallback disabled");
            }
            None => {
                tracing::debug!(schema = %self.descriptor.id, "No oracle configured");
            }
            Some(oracle) => {
                tracing::info!(
                    schema = %self.descriptor.id,
                    oracle = oracle.name(),
                    rule_count,
                    reasons = ?reasons,
                    "Rule output insufficient, consulting oracle"
                );
                let stage_start = Instant::now();
                oracle_triples = oracle
                    .extract_triples(text, &self.descriptor)
                    .await
                    .into_iter()
                    .map(|t| self.tag_oracle_triple(t, oracle.name()))
                    .collect();
                oracle_invoked = true;
                stages.push(StageTiming {
                    stage: ExtractionStage::Oracle,
                    elapsed: stage_start.elapsed(),
                });
            }
        }
        let oracle_count = oracle_triples.len();

        let stage_start = Instant::now();
        let mut all = rule_triples;
        all.extend(oracle_triples);
        let triples = merge_and_deduplicate(all);
        stages.push(StageTiming {
            stage: ExtractionStage::Merge,
            elapsed: stage_start.elapsed(),
        });

        tracing::info!(
            schema = %self.descriptor.id,
            rule_count,
            oracle_count,
            total = triples.len(),
            "Extraction complete"
        );

        HybridExtraction {
            triples,
            rule_count,
            oracle_count,
            reasons,
            oracle_invoked,
            stages,
            elapsed: started.elapsed(),
        }
    }

    /// Tag an oracle triple, defaulting its confidence and mapping the
    /// predicate onto a declared relation name when one matches
    fn tag_oracle_triple(&self, triple: OracleTriple, oracle: &str) -> CandidateTriple {
        let predicate = self
            .relation_names
            .get(&normalize_term(&triple.predicate))
            .cloned()
            .unwrap_or(triple.predicate);
        let confidence = triple
            .confidence
            .unwrap_or(self.config.oracle_default_confidence);

        CandidateTriple::new(
            triple.subject,
            predicate,
            triple.object,
            confidence,
            ExtractionMethod::Oracle,
        )
        .with_evidence(oracle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntityTypeCache;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use triplex_core::{IndexConfig, InferenceConfig, Result};
    use triplex_index::MultiLevelIndex;
    use triplex_schema::{EntityTypeDef, RelationTypeDef};

    struct StubOracle {
        response: String,
        calls: AtomicUsize,
    }

    impl StubOracle {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Oracle for StubOracle {
        fn name(&self) -> &str {
            "stub"
        }

        async fn generate(&self, _: &str, _: u32, _: f32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn schema() -> Schema {
        Schema::new("cs", "Computer Science")
            .with_entity_type(
                "Algorithm",
                EntityTypeDef::new("procedure").with_examples(["Ant Colony Optimization"]),
            )
            .with_relation_type("solves", RelationTypeDef::new("").with_aliases(["addresses"]))
    }

    fn triple(s: &str, p: &str, o: &str, confidence: f32) -> CandidateTriple {
        CandidateTriple::new(s, p, o, confidence, ExtractionMethod::RelationTrigger)
    }

    const SPARSE_TEXT: &str = "Ant Colony Optimization solves Traveling Salesman Problem.";

    const RICH_TEXT: &str = "The Louvre is located in Paris. The Conference starts on 2024-05-01. \
                             Overfitting leads to Poor Generalization.";

    #[test]
    fn test_merge_keeps_higher_confidence() {
        let merged = merge_and_deduplicate(vec![
            triple("ACO", "solves", "TSP", 0.6),
            triple("aco ", "Solves", "tsp", 0.9),
            triple("ACO", "uses", "Pheromone", 0.7),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].confidence, 0.9);
        assert_eq!(merged[0].subject, "aco");
        assert_eq!(merged[1].predicate, "uses");
    }

    #[test]
    fn test_merge_tie_keeps_first() {
        let mut first = triple("ACO", "solves", "TSP", 0.8);
        first.evidence = "first".into();
        let mut second = triple("ACO", "solves", "TSP", 0.8);
        second.evidence = "second".into();
        let merged = merge_and_deduplicate(vec![first, second]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].evidence, "first");
    }

    #[test]
    fn test_fallback_reasons() {
        let config = ExtractionConfig::default();

        let reasons = fallback_reasons("short", &[triple("a", "p", "b", 0.9)], &config);
        assert_eq!(
            reasons,
            vec![
                FallbackReason::TooFewTriples { count: 1, min: 3 },
                FallbackReason::SparseDensity { count: 1, expected: 3 },
            ]
        );

        // One of three at or above the 0.6 floor is below half
        let low = vec![
            triple("a", "p", "b", 0.3),
            triple("c", "p", "d", 0.59),
            triple("e", "p", "f", 0.9),
        ];
        let reasons = fallback_reasons("short", &low, &config);
        assert!(matches!(reasons.as_slice(), [FallbackReason::LowConfidenceRatio { .. }]));

        // Two of three reach the floor
        let mostly_high = vec![
            triple("a", "p", "b", 0.3),
            triple("c", "p", "d", 0.6),
            triple("e", "p", "f", 0.9),
        ];
        assert!(fallback_reasons("short", &mostly_high, &config).is_empty());

        let long_text = "Lorem ipsum dolor sit amet. ".repeat(40);
        let ok = vec![
            triple("a", "p", "b", 0.9),
            triple("c", "p", "d", 0.9),
            triple("e", "p", "f", 0.9),
        ];
        let reasons = fallback_reasons(&long_text, &ok, &config);
        assert!(matches!(
            reasons.as_slice(),
            [FallbackReason::SparseDensity { count: 3, .. }]
        ));
        assert!(fallback_reasons("short", &ok, &config).is_empty());
    }

    #[test]
    fn test_middling_confidence_triggers_fallback() {
        let config = ExtractionConfig::default();
        let middling = vec![
            triple("a", "p", "b", 0.55),
            triple("c", "p", "d", 0.55),
            triple("e", "p", "f", 0.55),
        ];

        let reasons = fallback_reasons("short", &middling, &config);
        assert_eq!(reasons, vec![FallbackReason::LowConfidenceRatio { high_ratio: 0.0 }]);
    }

    #[test]
    fn test_text_complexity() {
        // 22 chars, one sentence, two capitalized tokens
        assert_eq!(text_complexity("Hello World is a test."), 22 + 10 + 10);
        assert_eq!(text_complexity(""), 0);
    }

    #[tokio::test]
    async fn test_oracle_consulted_when_rules_sparse() {
        let schema = schema();
        let cache = EntityTypeCache::default();
        let index = MultiLevelIndex::build([&schema], IndexConfig::default());
        let inferer = LayeredInferer::new(&cache, &index, &schema, InferenceConfig::default());
        let extractor = HybridTripleExtractor::new(&schema, ExtractionConfig::default());
        let oracle = StubOracle::new(
            r#"[{"subject": "ACO", "predicate": "Addresses", "object": "TSP", "confidence": 1.7},
                {"subject": "ACO", "relation": "uses", "object": "Pheromone"}]"#,
        );

        let result = extractor.extract(SPARSE_TEXT, &inferer, Some(&oracle)).await;

        assert_eq!(oracle.calls(), 1);
        assert!(result.oracle_invoked);
        assert_eq!(result.rule_count, 1);
        assert_eq!(result.oracle_count, 2);
        assert!(result
            .reasons
            .contains(&FallbackReason::TooFewTriples { count: 1, min: 3 }));

        let oracle_triples: Vec<_> = result.oracle_triples().collect();
        assert_eq!(oracle_triples.len(), 2);
        let solves = oracle_triples.iter().find(|t| t.subject == "ACO" && t.object == "TSP").unwrap();
        assert_eq!(solves.predicate, "solves");
        assert_eq!(solves.confidence, 1.0);
        let uses = oracle_triples.iter().find(|t| t.predicate == "uses").unwrap();
        assert_eq!(uses.confidence, 0.8);
        assert_eq!(uses.evidence, "stub");
        assert_eq!(result.rule_triples().count(), 1);
    }

    #[tokio::test]
    async fn test_rules_only_skips_oracle() {
        let schema = schema();
        let cache = EntityTypeCache::default();
        let index = MultiLevelIndex::build([&schema], IndexConfig::default());
        let inferer = LayeredInferer::new(&cache, &index, &schema, InferenceConfig::default());
        let config = ExtractionConfig {
            rules_only: true,
            ..Default::default()
        };
        let extractor = HybridTripleExtractor::new(&schema, config);
        let oracle = StubOracle::new("[]");

        let result = extractor.extract(SPARSE_TEXT, &inferer, Some(&oracle)).await;

        assert_eq!(oracle.calls(), 0);
        assert!(!result.oracle_invoked);
        assert!(!result.reasons.is_empty());
        assert_eq!(result.triples.len(), 1);
    }

    #[tokio::test]
    async fn test_sufficient_rules_skip_oracle() {
        let schema = schema();
        let cache = EntityTypeCache::default();
        let index = MultiLevelIndex::build([&schema], IndexConfig::default());
        let inferer = LayeredInferer::new(&cache, &index, &schema, InferenceConfig::default());
        let extractor = HybridTripleExtractor::new(&schema, ExtractionConfig::default());
        let oracle = StubOracle::new("[]");

        let result = extractor.extract(RICH_TEXT, &inferer, Some(&oracle)).await;

        assert_eq!(oracle.calls(), 0);
        assert!(result.reasons.is_empty());
        assert_eq!(result.rule_count, 3);
        assert!(result.triples.iter().all(|t| !t.method.is_oracle()));
        assert_eq!(result.stages.len(), 2);
    }

    fn arb_triple() -> impl Strategy<Value = CandidateTriple> {
        (
            prop::sample::select(vec!["ACO", "aco", " Dijkstra", "TSP"]),
            prop::sample::select(vec!["solves", "SOLVES", "uses"]),
            prop::sample::select(vec!["TSP", "tsp ", "Graph"]),
            0.0f32..=1.0,
            prop::sample::select(ExtractionMethod::RULES.to_vec()),
        )
            .prop_map(|(s, p, o, c, m)| CandidateTriple::new(s, p, o, c, m))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn merging_with_itself_is_a_no_op(triples in prop::collection::vec(arb_triple(), 0..20)) {
            let once = merge_and_deduplicate(triples.clone());
            let mut doubled = triples.clone();
            doubled.extend(triples);
            prop_assert_eq!(merge_and_deduplicate(doubled), once.clone());
            prop_assert_eq!(merge_and_deduplicate(once.clone()), once);
        }

        #[test]
        fn merged_keys_are_unique_and_sorted(triples in prop::collection::vec(arb_triple(), 0..20)) {
            let merged = merge_and_deduplicate(triples);
            let keys: std::collections::HashSet<_> = merged.iter().map(|t| t.key()).collect();
            prop_assert_eq!(keys.len(), merged.len());
            prop_assert!(merged.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        }
    }
}
