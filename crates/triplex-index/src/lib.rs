//! Triplex Index - Cascading term-to-type lookup
//!
//! Three specialized indexes are built from schema vocabularies:
//! - exact: normalized term to entries, constant-time lookup
//! - prefix trie: depth-first enumeration of terms under a prefix
//! - patterns: ordered regexes matched against the query
//!
//! [`MultiLevelIndex::search`] walks them from most to least specific and
//! finishes with a partial substring scan over the exact index.

pub mod exact;
pub mod pattern;
pub mod trie;

pub use exact::ExactIndex;
pub use pattern::{PatternIndex, PatternSpec};
pub use trie::PrefixTrie;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use triplex_core::{normalize_term, IndexConfig, Result, TriplexError};
use triplex_schema::Schema;

// ============================================================================
// Entries
// ============================================================================

/// Origin of an index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexSource {
    Keyword,
    Pattern,
    Learned,
}

/// A (term, type, confidence, source) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Normalized (trimmed, lower-cased) term
    pub term: String,
    pub entity_type: String,
    pub confidence: f32,
    pub source: IndexSource,
}

impl IndexEntry {
    pub fn new(
        term: impl Into<String>,
        entity_type: impl Into<String>,
        confidence: f32,
        source: IndexSource,
    ) -> Self {
        Self {
            term: normalize_term(&term.into()),
            entity_type: entity_type.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source,
        }
    }
}

/// Index tier that produced a match, most specific first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    Exact,
    Prefix,
    Pattern,
    Partial,
}

/// One type returned by a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMatch {
    pub entity_type: String,
    pub confidence: f32,
    pub tier: MatchTier,
}

/// Index size counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub exact_terms: usize,
    pub exact_entries: usize,
    pub trie_terms: usize,
    pub patterns: usize,
    pub learned_terms: usize,
    pub entity_types: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    config: IndexConfig,
    exact: Vec<IndexEntry>,
    trie: Vec<IndexEntry>,
    patterns: Vec<PatternSpec>,
}

// ============================================================================
// Multi-Level Index
// ============================================================================

/// Exact, prefix and pattern indexes searched as a cascade
#[derive(Debug, Clone)]
pub struct MultiLevelIndex {
    config: IndexConfig,
    exact: ExactIndex,
    trie: PrefixTrie,
    patterns: PatternIndex,
}

impl MultiLevelIndex {
    /// Create an empty index
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            exact: ExactIndex::new(),
            trie: PrefixTrie::new(),
            patterns: PatternIndex::new(),
        }
    }

    /// Build from the vocabularies of one or more schemas
    pub fn build<'a>(schemas: impl IntoIterator<Item = &'a Schema>, config: IndexConfig) -> Self {
        let mut index = Self::new(config);
        let mut count = 0;
        for schema in schemas {
            index.add_schema(schema);
            count += 1;
        }
        let stats = index.stats();
        tracing::info!(
            schemas = count,
            exact_terms = stats.exact_terms,
            patterns = stats.patterns,
            "Built multi-level index"
        );
        index
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Index a schema's type names, aliases, examples, keywords and patterns
    pub fn add_schema(&mut self, schema: &Schema) {
        for (type_name, def) in &schema.entity_types {
            let terms = std::iter::once(type_name)
                .chain(&def.aliases)
                .chain(&def.examples)
                .chain(&def.keywords);
            for term in terms {
                self.add_vocabulary_term(term, type_name);
            }

            for pattern in &def.patterns {
                if let Err(e) = self
                    .patterns
                    .add(pattern, type_name, self.config.pattern_confidence)
                {
                    tracing::warn!(schema = %schema.id, error = %e, "Skipping pattern");
                }
            }
        }
    }

    fn add_vocabulary_term(&mut self, term: &str, entity_type: &str) {
        if term.trim().is_empty() {
            return;
        }
        self.exact.insert(IndexEntry::new(
            term,
            entity_type,
            self.config.keyword_confidence,
            IndexSource::Keyword,
        ));
        self.trie.insert(IndexEntry::new(
            term,
            entity_type,
            self.config.prefix_confidence,
            IndexSource::Keyword,
        ));
    }

    /// Add a term confirmed outside the schemas (e.g. from cache export).
    /// Returns false if the term was empty or already learned for this type.
    pub fn add_learned_term(&mut self, term: &str, entity_type: &str, confidence: f32) -> bool {
        if term.trim().is_empty() {
            return false;
        }
        let added = self.exact.insert(IndexEntry::new(
            term,
            entity_type,
            confidence,
            IndexSource::Learned,
        ));
        self.trie.insert(IndexEntry::new(
            term,
            entity_type,
            confidence.min(self.config.prefix_confidence),
            IndexSource::Learned,
        ));
        added
    }

    /// Add many learned terms; returns the number actually added
    pub fn batch_update<I, S, T>(&mut self, updates: I) -> usize
    where
        I: IntoIterator<Item = (S, T, f32)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let added = updates
            .into_iter()
            .filter(|(term, ty, conf)| self.add_learned_term(term.as_ref(), ty.as_ref(), *conf))
            .count();
        tracing::debug!(added, "Batch index update");
        added
    }

    /// Cascading search. Tiers are consulted in order of specificity while
    /// fewer than `top_k` distinct types have been found; results keep the
    /// best confidence per type, sorted descending.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<IndexMatch> {
        let query = normalize_term(query);
        if query.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut best: HashMap<String, IndexMatch> = HashMap::new();
        for entry in self.exact.get(&query) {
            offer(&mut best, &entry.entity_type, entry.confidence, MatchTier::Exact);
        }

        if best.len() < top_k {
            for entry in self
                .trie
                .search_prefix(&query, self.config.max_prefix_results)
            {
                offer(
                    &mut best,
                    &entry.entity_type,
                    entry.confidence * self.config.prefix_decay,
                    MatchTier::Prefix,
                );
            }
        }

        if best.len() < top_k {
            for spec in self.patterns.matches(&query) {
                offer(&mut best, &spec.entity_type, spec.confidence, MatchTier::Pattern);
            }
        }

        if best.len() < top_k {
            for entry in self.exact.containing(&query) {
                offer(
                    &mut best,
                    &entry.entity_type,
                    entry.confidence * self.config.partial_decay,
                    MatchTier::Partial,
                );
            }
        }

        let mut results: Vec<IndexMatch> = best.into_values().collect();
        results.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.tier.cmp(&b.tier))
                .then_with(|| a.entity_type.cmp(&b.entity_type))
        });
        results.truncate(top_k);
        results
    }

    /// Best single match, if any
    pub fn lookup(&self, query: &str) -> Option<IndexMatch> {
        self.search(query, 1).into_iter().next()
    }

    pub fn stats(&self) -> IndexStats {
        let types: HashSet<&str> = self
            .exact
            .iter()
            .map(|e| e.entity_type.as_str())
            .chain(self.patterns.specs().map(|p| p.entity_type.as_str()))
            .collect();

        IndexStats {
            exact_terms: self.exact.term_count(),
            exact_entries: self.exact.len(),
            trie_terms: self.trie.term_count(),
            patterns: self.patterns.len(),
            learned_terms: self
                .exact
                .iter()
                .filter(|e| e.source == IndexSource::Learned)
                .count(),
            entity_types: types.len(),
        }
    }

    /// Write the index as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = IndexSnapshot {
            config: self.config.clone(),
            exact: self.exact.iter().cloned().collect(),
            trie: self.trie.iter().cloned().collect(),
            patterns: self.patterns.specs().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path.as_ref(), json)?;
        tracing::info!(path = %path.as_ref().display(), "Saved index");
        Ok(())
    }

    /// Read an index written by [`save`](Self::save); the trie is rebuilt
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let snapshot: IndexSnapshot = serde_json::from_str(&content)
            .map_err(|e| TriplexError::Serialization(format!("index snapshot: {}", e)))?;

        let mut index = Self::new(snapshot.config);
        for entry in snapshot.exact {
            index.exact.insert(entry);
        }
        for entry in snapshot.trie {
            index.trie.insert(entry);
        }
        for spec in snapshot.patterns {
            if let Err(e) = index
                .patterns
                .add(&spec.pattern, &spec.entity_type, spec.confidence)
            {
                tracing::warn!(error = %e, "Skipping pattern from snapshot");
            }
        }
        Ok(index)
    }
}

/// Keep the best match per type
fn offer(best: &mut HashMap<String, IndexMatch>, ty: &str, confidence: f32, tier: MatchTier) {
    match best.get_mut(ty) {
        Some(existing) if existing.confidence >= confidence => {}
        Some(existing) => {
            existing.confidence = confidence;
            existing.tier = tier;
        }
        None => {
            best.insert(
                ty.to_string(),
                IndexMatch {
                    entity_type: ty.to_string(),
                    confidence,
                    tier,
                },
            );
        }
    }
}

impl Default for MultiLevelIndex {
    fn default() -> Self {
        Self::new(IndexConfig::default())
    }
}
