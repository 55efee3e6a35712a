//! Schema Detector
//!
//! Scores every registered schema against a document using three signals:
//! ontology overlap, seed-relation overlap and structural pattern density.
//! When the two best candidates are too close the oracle is asked to
//! break the tie.

use crate::inferer::{LayeredInferer, TypeBanks};
use crate::text::{contains_term, excerpt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use triplex_core::{normalize_term, DetectionConfig, Oracle, SeedTriple};
use triplex_schema::{compile_search_pattern, Schema, SchemaRegistry};

// ============================================================================
// Results
// ============================================================================

/// Signal that decided a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Ontology,
    SeedKnowledge,
    DocumentStructure,
    Hybrid,
    OracleAssisted,
}

/// Per-signal scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalScores {
    pub ontology: f32,
    pub seed: f32,
    pub structure: f32,
}

/// One ranked schema candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub schema_id: String,
    pub confidence: f32,
    pub evidence: Vec<String>,
    pub method: DetectionMethod,
    pub scores: SignalScores,
}

// ============================================================================
// Schema Profiles
// ============================================================================

/// Vocabulary of one schema, precomputed for scoring
struct SchemaProfile {
    schema: Schema,
    type_count: usize,
    /// (lower-cased term, type) pairs
    examples: Vec<(String, String)>,
    keywords: Vec<(String, String)>,
    patterns: Vec<(Regex, String)>,
    banks: TypeBanks,
}

impl SchemaProfile {
    fn new(schema: &Schema) -> Self {
        let mut examples = Vec::new();
        let mut keywords = Vec::new();
        let mut patterns = Vec::new();

        for (type_name, def) in &schema.entity_types {
            examples.extend(
                def.examples
                    .iter()
                    .map(|e| normalize_term(e))
                    .filter(|e| !e.is_empty())
                    .map(|e| (e, type_name.clone())),
            );
            keywords.extend(
                def.keywords
                    .iter()
                    .map(|k| normalize_term(k))
                    .filter(|k| !k.is_empty())
                    .map(|k| (k, type_name.clone())),
            );
            for pattern in &def.patterns {
                match compile_search_pattern(pattern) {
                    Ok(regex) => patterns.push((regex, type_name.clone())),
                    Err(e) => tracing::warn!(schema = %schema.id, error = %e, "Skipping pattern"),
                }
            }
        }

        Self {
            schema: schema.clone(),
            type_count: schema.entity_types.len().max(1),
            examples,
            keywords,
            patterns,
            banks: TypeBanks::from_schema(schema),
        }
    }

    fn ontology_score(&self, lowered: &str, evidence: &mut Vec<String>) -> f32 {
        let mut example_hits = 0usize;
        for (term, ty) in &self.examples {
            if contains_term(lowered, term) {
                example_hits += 1;
                evidence.push(format!("example '{}' ({})", term, ty));
            }
        }
        let mut keyword_hits = 0usize;
        for (term, ty) in &self.keywords {
            if contains_term(lowered, term) {
                keyword_hits += 1;
                evidence.push(format!("keyword '{}' ({})", term, ty));
            }
        }

        let types = self.type_count as f32;
        let example_score = example_hits as f32 / (types * 2.0);
        let keyword_score = keyword_hits as f32 / (types * 3.0);
        ((example_score + keyword_score) / 2.0).min(1.0)
    }

    fn seed_score(
        &self,
        seeds: &[SeedTriple],
        inferer: &LayeredInferer<'_>,
        evidence: &mut Vec<String>,
    ) -> f32 {
        if seeds.is_empty() {
            return 0.0;
        }

        let declared = seeds
            .iter()
            .filter(|s| match self.schema.resolve_relation(&s.predicate) {
                Some((name, _)) => {
                    evidence.push(format!("seed relation '{}'", name));
                    true
                }
                None => false,
            })
            .count();
        let predicate_fraction = declared as f32 / seeds.len() as f32;

        let entities: BTreeSet<String> = seeds
            .iter()
            .flat_map(|s| [normalize_term(&s.subject), normalize_term(&s.object)])
            .filter(|e| !e.is_empty())
            .collect();
        if entities.is_empty() {
            return predicate_fraction;
        }

        let typed = entities
            .iter()
            .filter(|name| self.types_entity(name, inferer))
            .count();
        let entity_fraction = typed as f32 / entities.len() as f32;

        (predicate_fraction + entity_fraction) / 2.0
    }

    /// Whether the entity's inferred type is declared by this schema. The
    /// cross-schema tiers are consulted first; the schema's own banks only
    /// when those find nothing.
    fn types_entity(&self, name: &str, inferer: &LayeredInferer<'_>) -> bool {
        match inferer.infer_global(name).entity_type() {
            Some(ty) => self.schema.defines_entity_type(ty),
            None => {
                self.banks.match_pattern(name).is_some() || self.banks.match_keywords(name).is_some()
            }
        }
    }

    fn structure_score(&self, text: &str, saturation: usize, evidence: &mut Vec<String>) -> f32 {
        let mut count = 0usize;
        for (regex, ty) in &self.patterns {
            for m in regex.find_iter(text) {
                if m.as_str().trim().is_empty() {
                    continue;
                }
                count += 1;
                evidence.push(format!("pattern match '{}' ({})", m.as_str().trim(), ty));
            }
        }
        (count as f32 / saturation.max(1) as f32).min(1.0)
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Multi-signal schema classifier
pub struct SchemaDetector {
    profiles: Vec<SchemaProfile>,
    config: DetectionConfig,
}

impl SchemaDetector {
    /// Precompute profiles for every schema in the registry
    pub fn new(registry: &SchemaRegistry, config: DetectionConfig) -> Self {
        Self {
            profiles: registry.iter().map(SchemaProfile::new).collect(),
            config,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Score all schemas without consulting the oracle. Candidates at or
    /// below the minimum score are dropped; the rest are sorted descending.
    pub fn rank(
        &self,
        text: &str,
        seeds: &[SeedTriple],
        inferer: &LayeredInferer<'_>,
    ) -> Vec<DetectionResult> {
        let lowered = text.to_lowercase();
        let cfg = &self.config;

        let mut results: Vec<DetectionResult> = self
            .profiles
            .iter()
            .filter_map(|profile| {
                let mut ontology_evidence = Vec::new();
                let mut seed_evidence = Vec::new();
                let mut structure_evidence = Vec::new();

                let scores = SignalScores {
                    ontology: profile.ontology_score(&lowered, &mut ontology_evidence),
                    seed: profile.seed_score(seeds, inferer, &mut seed_evidence),
                    structure: profile.structure_score(
                        text,
                        cfg.structure_saturation,
                        &mut structure_evidence,
                    ),
                };
                let confidence = cfg.ontology_weight * scores.ontology
                    + cfg.seed_weight * scores.seed
                    + cfg.structure_weight * scores.structure;

                tracing::debug!(
                    schema = %profile.schema.id,
                    ontology = scores.ontology,
                    seed = scores.seed,
                    structure = scores.structure,
                    confidence,
                    "Schema scored"
                );

                if confidence <= cfg.min_score {
                    return None;
                }

                let evidence: Vec<String> = ontology_evidence
                    .into_iter()
                    .chain(seed_evidence)
                    .chain(structure_evidence)
                    .take(cfg.max_evidence)
                    .collect();

                Some(DetectionResult {
                    schema_id: profile.schema.id.clone(),
                    confidence,
                    evidence,
                    method: method_for(&scores),
                    scores,
                })
            })
            .collect();

        sort_results(&mut results);
        results
    }

    /// Rank schemas and, when the top two are within the tie threshold,
    /// let the oracle pick between them.
    pub async fn detect(
        &self,
        text: &str,
        seeds: &[SeedTriple],
        inferer: &LayeredInferer<'_>,
        oracle: Option<&dyn Oracle>,
    ) -> Vec<DetectionResult> {
        let mut results = self.rank(text, seeds, inferer);

        let winner = match (oracle, results.as_slice()) {
            (Some(oracle), [first, second, ..])
                if first.confidence - second.confidence < self.config.tie_threshold =>
            {
                tracing::info!(
                    first = %first.schema_id,
                    second = %second.schema_id,
                    gap = first.confidence - second.confidence,
                    "Schema tie, consulting oracle"
                );
                self.break_tie(text, first, second, oracle).await
            }
            _ => None,
        };

        if let Some(winner) = winner {
            if let Some(result) = results.iter_mut().find(|r| r.schema_id == winner) {
                result.confidence = (result.confidence + self.config.oracle_bonus).min(1.0);
                result.method = DetectionMethod::OracleAssisted;
            }
            sort_results(&mut results);
        }

        if let Some(best) = results.first() {
            tracing::info!(
                schema = %best.schema_id,
                confidence = best.confidence,
                method = ?best.method,
                "Schema detected"
            );
        }
        results
    }

    /// Returns the id of the candidate the oracle names, or `None` when the
    /// answer names neither, both, or the call fails.
    async fn break_tie(
        &self,
        text: &str,
        first: &DetectionResult,
        second: &DetectionResult,
        oracle: &dyn Oracle,
    ) -> Option<String> {
        let prompt = self.tie_break_prompt(text, first, second);
        let response = match oracle
            .generate(&prompt, self.config.oracle_max_tokens, 0.0)
            .await
        {
            Ok(response) => response.to_lowercase(),
            Err(e) => {
                tracing::warn!(error = %e, "Tie-break oracle call failed, keeping ranking");
                return None;
            }
        };

        let named: Vec<&DetectionResult> = [first, second]
            .into_iter()
            .filter(|c| self.names_candidate(&response, c))
            .collect();

        match named.as_slice() {
            [only] => Some(only.schema_id.clone()),
            _ => {
                tracing::debug!(response = %response, "Ambiguous tie-break answer, keeping ranking");
                None
            }
        }
    }

    fn names_candidate(&self, response: &str, candidate: &DetectionResult) -> bool {
        if contains_term(response, &normalize_term(&candidate.schema_id)) {
            return true;
        }
        self.profile(&candidate.schema_id)
            .map(|p| p.schema.display_name())
            .filter(|name| !name.is_empty())
            .map(|name| contains_term(response, &normalize_term(name)))
            .unwrap_or(false)
    }

    fn profile(&self, id: &str) -> Option<&SchemaProfile> {
        self.profiles.iter().find(|p| p.schema.id == id)
    }

    fn tie_break_prompt(
        &self,
        text: &str,
        first: &DetectionResult,
        second: &DetectionResult,
    ) -> String {
        let describe = |candidate: &DetectionResult| -> String {
            let description = self
                .profile(&candidate.schema_id)
                .map(|p| p.schema.metadata.description.clone())
                .unwrap_or_default();
            format!(
                "- {} ({}): {}\n  evidence: {}",
                candidate.schema_id,
                self.profile(&candidate.schema_id)
                    .map(|p| p.schema.display_name())
                    .unwrap_or(&candidate.schema_id),
                description,
                candidate.evidence.join("; ")
            )
        };

        format!(
            "Two domain schemas match the document equally well.\n\n\
             Candidates:\n{}\n{}\n\n\
             Document excerpt:\n{}\n\n\
             Answer with the id of the single best schema.",
            describe(first),
            describe(second),
            excerpt(text, self.config.excerpt_chars)
        )
    }
}

fn method_for(scores: &SignalScores) -> DetectionMethod {
    let contributing: Vec<DetectionMethod> = [
        (scores.ontology, DetectionMethod::Ontology),
        (scores.seed, DetectionMethod::SeedKnowledge),
        (scores.structure, DetectionMethod::DocumentStructure),
    ]
    .into_iter()
    .filter(|(score, _)| *score > 0.0)
    .map(|(_, method)| method)
    .collect();

    match contributing.as_slice() {
        [single] => *single,
        _ => DetectionMethod::Hybrid,
    }
}

fn sort_results(results: &mut [DetectionResult]) {
    results.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.schema_id.cmp(&b.schema_id))
    });
}
