//! Layered Entity-Type Inferer
//!
//! Resolves an entity name to a type through a fixed cascade:
//!
//! 1. trusted cache entry
//! 2. multi-level index, top hit
//! 3. schema pattern bank
//! 4. weighted keyword bank
//! 5. context indicator bank (only with context)
//!
//! falling through to [`InferenceOutcome::Unknown`]. The inferer never
//! consults the oracle.

use crate::cache::EntityTypeCache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use triplex_core::InferenceConfig;
use triplex_index::MultiLevelIndex;
use triplex_schema::{compile_pattern, Schema};

// ============================================================================
// Results
// ============================================================================

/// Cascade tier that produced an inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMethod {
    Cache,
    Index,
    Pattern,
    Keyword,
    Context,
}

impl std::fmt::Display for InferenceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Index => write!(f, "index"),
            Self::Pattern => write!(f, "pattern"),
            Self::Keyword => write!(f, "keyword"),
            Self::Context => write!(f, "context"),
        }
    }
}

/// Final outcome of the cascade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InferenceOutcome {
    Resolved {
        entity_type: String,
        confidence: f32,
        method: InferenceMethod,
    },
    Unknown,
}

/// Time spent in one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTiming {
    pub method: InferenceMethod,
    pub elapsed: Duration,
    pub hit: bool,
}

/// Inference result plus per-tier timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inference {
    pub outcome: InferenceOutcome,
    pub tiers: Vec<TierTiming>,
}

impl Inference {
    pub fn entity_type(&self) -> Option<&str> {
        match &self.outcome {
            InferenceOutcome::Resolved { entity_type, .. } => Some(entity_type),
            InferenceOutcome::Unknown => None,
        }
    }

    /// Zero for unknown
    pub fn confidence(&self) -> f32 {
        match &self.outcome {
            InferenceOutcome::Resolved { confidence, .. } => *confidence,
            InferenceOutcome::Unknown => 0.0,
        }
    }

    pub fn method(&self) -> Option<InferenceMethod> {
        match &self.outcome {
            InferenceOutcome::Resolved { method, .. } => Some(*method),
            InferenceOutcome::Unknown => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.outcome, InferenceOutcome::Resolved { .. })
    }

    pub fn total_elapsed(&self) -> Duration {
        self.tiers.iter().map(|t| t.elapsed).sum()
    }
}

// ============================================================================
// Type Banks
// ============================================================================

/// Schema-derived pattern, keyword and context banks
#[derive(Debug, Clone, Default)]
pub struct TypeBanks {
    schema_id: String,
    patterns: Vec<(Regex, String)>,
    keywords: Vec<(String, Vec<String>)>,
    indicators: Vec<(String, Vec<String>)>,
}

impl TypeBanks {
    /// Compile the banks of one schema. Types are visited in name order;
    /// within a type, patterns keep their declared order.
    pub fn from_schema(schema: &Schema) -> Self {
        let mut banks = Self {
            schema_id: schema.id.clone(),
            ..Default::default()
        };

        for (type_name, def) in &schema.entity_types {
            for pattern in &def.patterns {
                match compile_pattern(pattern) {
                    Ok(regex) => banks.patterns.push((regex, type_name.clone())),
                    Err(e) => tracing::warn!(schema = %schema.id, error = %e, "Skipping pattern"),
                }
            }

            let keywords = lowered(&def.keywords);
            if !keywords.is_empty() {
                banks.keywords.push((type_name.clone(), keywords));
            }

            let indicators = lowered(def.indicators());
            if !indicators.is_empty() {
                banks.indicators.push((type_name.clone(), indicators));
            }
        }
        banks
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    /// First pattern matching the name
    pub fn match_pattern(&self, name: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(regex, _)| regex.is_match(name))
            .map(|(_, ty)| ty.as_str())
    }

    /// Type whose keywords contained in `name` have the largest total length
    pub fn match_keywords(&self, name: &str) -> Option<&str> {
        best_by_length(&self.keywords, &name.to_lowercase())
    }

    /// Same scoring as keywords, over indicator words found in `context`
    pub fn match_context(&self, context: &str) -> Option<&str> {
        best_by_length(&self.indicators, &context.to_lowercase())
    }
}

fn lowered(words: &[String]) -> Vec<String> {
    words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Arg-max of summed matched-word lengths; earlier types win ties
fn best_by_length<'a>(bank: &'a [(String, Vec<String>)], haystack: &str) -> Option<&'a str> {
    let mut best: Option<(&str, usize)> = None;
    for (ty, words) in bank {
        let score: usize = words
            .iter()
            .filter(|w| haystack.contains(w.as_str()))
            .map(|w| w.chars().count())
            .sum();
        if score > 0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((ty.as_str(), score));
        }
    }
    best.map(|(ty, _)| ty)
}

// ============================================================================
// Inferer
// ============================================================================

/// Cascade over cache, index and the active schema's banks
pub struct LayeredInferer<'a> {
    cache: &'a EntityTypeCache,
    index: &'a MultiLevelIndex,
    banks: TypeBanks,
    config: InferenceConfig,
}

impl<'a> LayeredInferer<'a> {
    pub fn new(
        cache: &'a EntityTypeCache,
        index: &'a MultiLevelIndex,
        schema: &Schema,
        config: InferenceConfig,
    ) -> Self {
        Self {
            cache,
            index,
            banks: TypeBanks::from_schema(schema),
            config,
        }
    }

    /// Switch the active schema. Only the banks are reloaded; the cache and
    /// index are shared across schemas.
    pub fn set_schema(&mut self, schema: &Schema) {
        if self.banks.schema_id() != schema.id {
            tracing::debug!(from = %self.banks.schema_id(), to = %schema.id, "Switching inference schema");
        }
        self.banks = TypeBanks::from_schema(schema);
    }

    pub fn schema_id(&self) -> &str {
        self.banks.schema_id()
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Run the full cascade
    pub fn infer(&self, name: &str, context: Option<&str>) -> Inference {
        let mut tiers = Vec::with_capacity(5);
        let name = name.trim();

        let outcome = self
            .schema_independent(name, &mut tiers)
            .or_else(|| {
                timed(&mut tiers, InferenceMethod::Pattern, || {
                    self.banks
                        .match_pattern(name)
                        .map(|ty| (ty.to_string(), self.config.pattern_confidence))
                })
            })
            .or_else(|| {
                timed(&mut tiers, InferenceMethod::Keyword, || {
                    self.banks
                        .match_keywords(name)
                        .map(|ty| (ty.to_string(), self.config.keyword_confidence))
                })
            })
            .or_else(|| {
                let context = context.filter(|c| !c.trim().is_empty())?;
                timed(&mut tiers, InferenceMethod::Context, || {
                    self.banks
                        .match_context(context)
                        .map(|ty| (ty.to_string(), self.config.context_confidence))
                })
            })
            .unwrap_or(InferenceOutcome::Unknown);

        for tier in &tiers {
            tracing::trace!(
                entity = %name,
                method = %tier.method,
                elapsed_us = tier.elapsed.as_micros() as u64,
                hit = tier.hit,
                "Inference tier"
            );
        }

        Inference { outcome, tiers }
    }

    /// Only the schema-independent tiers (cache and index)
    pub fn infer_global(&self, name: &str) -> Inference {
        let mut tiers = Vec::with_capacity(2);
        let outcome = self
            .schema_independent(name.trim(), &mut tiers)
            .unwrap_or(InferenceOutcome::Unknown);
        Inference { outcome, tiers }
    }

    fn schema_independent(&self, name: &str, tiers: &mut Vec<TierTiming>) -> Option<InferenceOutcome> {
        if name.is_empty() {
            return None;
        }
        timed(tiers, InferenceMethod::Cache, || {
            self.cache
                .lookup_trusted(name)
                .map(|e| (e.entity_type.clone(), e.confidence))
        })
        .or_else(|| {
            timed(tiers, InferenceMethod::Index, || {
                self.index
                    .lookup(name)
                    .map(|m| (m.entity_type, m.confidence))
            })
        })
    }
}

fn timed<F>(tiers: &mut Vec<TierTiming>, method: InferenceMethod, tier: F) -> Option<InferenceOutcome>
where
    F: FnOnce() -> Option<(String, f32)>,
{
    let start = Instant::now();
    let result = tier();
    tiers.push(TierTiming {
        method,
        elapsed: start.elapsed(),
        hit: result.is_some(),
    });
    result.map(|(entity_type, confidence)| InferenceOutcome::Resolved {
        entity_type,
        confidence,
        method,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSource;
    use triplex_core::IndexConfig;
    use triplex_schema::EntityTypeDef;

    fn schema() -> Schema {
        Schema::new("cs", "Computer Science")
            .with_entity_type(
                "Algorithm",
                EntityTypeDef::new("procedure")
                    .with_examples(["Dijkstra"])
                    .with_keywords(["search", "sort"])
                    .with_patterns([r".*\s(optimization|algorithm)$"])
                    .with_context_indicators(["converges", "iteration"]),
            )
            .with_entity_type(
                "DataStructure",
                EntityTypeDef::new("structure")
                    .with_keywords(["tree", "search tree", "heap"]),
            )
    }

    fn index_without_vocabulary() -> MultiLevelIndex {
        MultiLevelIndex::new(IndexConfig::default())
    }

    #[test]
    fn test_cache_tier_first() {
        let mut cache = EntityTypeCache::new(0.9);
        cache.record("Dijkstra", "Person", 0.95, CacheSource::HumanReviewed);
        let index = MultiLevelIndex::build([&schema()], IndexConfig::default());
        let inferer = LayeredInferer::new(&cache, &index, &schema(), InferenceConfig::default());

        let inference = inferer.infer("Dijkstra", None);
        assert_eq!(inference.entity_type(), Some("Person"));
        assert_eq!(inference.method(), Some(InferenceMethod::Cache));
        assert_eq!(inference.tiers.len(), 1);
    }

    #[test]
    fn test_untrusted_cache_falls_through_to_index() {
        let mut cache = EntityTypeCache::new(0.9);
        cache.record("Dijkstra", "Person", 0.6, CacheSource::Inferred);
        let index = MultiLevelIndex::build([&schema()], IndexConfig::default());
        let inferer = LayeredInferer::new(&cache, &index, &schema(), InferenceConfig::default());

        let inference = inferer.infer("Dijkstra", None);
        assert_eq!(inference.entity_type(), Some("Algorithm"));
        assert_eq!(inference.method(), Some(InferenceMethod::Index));
        assert_eq!(inference.tiers.len(), 2);
        assert!(!inference.tiers[0].hit);
    }

    #[test]
    fn test_pattern_tier() {
        let cache = EntityTypeCache::default();
        let index = index_without_vocabulary();
        let inferer = LayeredInferer::new(&cache, &index, &schema(), InferenceConfig::default());

        let inference = inferer.infer("Particle Swarm Optimization", None);
        assert_eq!(inference.entity_type(), Some("Algorithm"));
        assert_eq!(inference.method(), Some(InferenceMethod::Pattern));
        assert_eq!(inference.confidence(), 0.8);
    }

    #[test]
    fn test_keyword_tier_weights_by_length() {
        let cache = EntityTypeCache::default();
        let index = index_without_vocabulary();
        let inferer = LayeredInferer::new(&cache, &index, &schema(), InferenceConfig::default());

        // "search" (6) for Algorithm vs "search tree" + "tree" (15) for DataStructure
        let inference = inferer.infer("Binary Search Tree", None);
        assert_eq!(inference.entity_type(), Some("DataStructure"));
        assert_eq!(inference.method(), Some(InferenceMethod::Keyword));
        assert_eq!(inference.confidence(), 0.7);
    }

    #[test]
    fn test_context_tier() {
        let cache = EntityTypeCache::default();
        let index = index_without_vocabulary();
        let inferer = LayeredInferer::new(&cache, &index, &schema(), InferenceConfig::default());

        let context = "After each iteration the method converges quickly";
        let inference = inferer.infer("Foo", Some(context));
        assert_eq!(inference.entity_type(), Some("Algorithm"));
        assert_eq!(inference.method(), Some(InferenceMethod::Context));
        assert_eq!(inference.confidence(), 0.6);
        assert_eq!(inference.tiers.len(), 5);
    }

    #[test]
    fn test_unknown_without_context() {
        let cache = EntityTypeCache::default();
        let index = index_without_vocabulary();
        let inferer = LayeredInferer::new(&cache, &index, &schema(), InferenceConfig::default());

        let inference = inferer.infer("Foo", None);
        assert_eq!(inference.outcome, InferenceOutcome::Unknown);
        assert_eq!(inference.confidence(), 0.0);
        // Context tier skipped entirely
        assert_eq!(inference.tiers.len(), 4);
    }

    #[test]
    fn test_set_schema_reloads_banks_only() {
        let mut cache = EntityTypeCache::new(0.9);
        cache.record("Mercury", "Planet", 1.0, CacheSource::HumanReviewed);
        let index = index_without_vocabulary();
        let mut inferer = LayeredInferer::new(&cache, &index, &schema(), InferenceConfig::default());

        let other = Schema::new("chem", "Chemistry")
            .with_entity_type("Element", EntityTypeDef::new("").with_keywords(["ium"]));
        inferer.set_schema(&other);

        assert_eq!(inferer.schema_id(), "chem");
        assert_eq!(inferer.infer("Sodium", None).entity_type(), Some("Element"));
        assert_eq!(inferer.infer("Mercury", None).entity_type(), Some("Planet"));
        assert_eq!(inferer.infer("Heap", None).outcome, InferenceOutcome::Unknown);
    }

    #[test]
    fn test_infer_global_skips_banks() {
        let cache = EntityTypeCache::default();
        let index = index_without_vocabulary();
        let inferer = LayeredInferer::new(&cache, &index, &schema(), InferenceConfig::default());
        assert!(!inferer.infer_global("Genetic Algorithm").is_resolved());
        assert!(inferer.infer("Genetic Algorithm", None).is_resolved());
    }
}
