//! Entity-Type Cache
//!
//! Memo of confirmed classifications keyed by lower-cased entity name.
//! Only entries above the trust threshold short-circuit inference.
//! Entries are never evicted automatically; [`EntityTypeCache::prune`]
//! is the only way to remove them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use triplex_core::{normalize_term, Result, TriplexError};

// ============================================================================
// Entries
// ============================================================================

/// Where a cached classification came from, in increasing order of trust
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    Inferred,
    Oracle,
    Validated,
    HumanReviewed,
}

impl std::fmt::Display for CacheSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inferred => write!(f, "inferred"),
            Self::Oracle => write!(f, "oracle"),
            Self::Validated => write!(f, "validated"),
            Self::HumanReviewed => write!(f, "human_reviewed"),
        }
    }
}

/// A cached classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub entity_type: String,
    pub confidence: f32,
    pub source: CacheSource,

    /// Times the classification was recorded
    pub count: u64,

    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// Effect of a [`EntityTypeCache::record`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// New entry created
    Inserted,
    /// Existing entry kept; count and recency updated
    Reinforced,
    /// Existing entry overwritten by a more trusted source
    Replaced,
    /// Empty name, nothing stored
    Ignored,
}

/// A high-frequency entry exported for review or index promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedType {
    pub name: String,
    pub entity_type: String,
    pub confidence: f32,
    pub source: CacheSource,
    pub count: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub trusted: usize,
    pub total_count: u64,
    pub average_confidence: f32,
    pub by_source: BTreeMap<CacheSource, usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    trust_threshold: f32,
    entries: BTreeMap<String, CacheEntry>,
}

// ============================================================================
// Cache
// ============================================================================

/// Frequency- and confidence-weighted classification memo
#[derive(Debug, Clone)]
pub struct EntityTypeCache {
    entries: HashMap<String, CacheEntry>,
    trust_threshold: f32,
}

impl EntityTypeCache {
    pub fn new(trust_threshold: f32) -> Self {
        Self {
            entries: HashMap::new(),
            trust_threshold,
        }
    }

    pub fn trust_threshold(&self) -> f32 {
        self.trust_threshold
    }

    /// Entry for a name regardless of confidence
    pub fn get(&self, name: &str) -> Option<&CacheEntry> {
        self.entries.get(&normalize_term(name))
    }

    /// Entry for a name if it is trusted enough to skip inference
    pub fn lookup_trusted(&self, name: &str) -> Option<&CacheEntry> {
        self.get(name)
            .filter(|e| e.confidence > self.trust_threshold)
    }

    /// Record a classification.
    ///
    /// A new name is inserted. For a known name the count is incremented and
    /// `last_used` refreshed; type, confidence and source are only replaced
    /// when `source` is strictly more trusted than the stored one.
    pub fn record(
        &mut self,
        name: &str,
        entity_type: &str,
        confidence: f32,
        source: CacheSource,
    ) -> RecordOutcome {
        let key = normalize_term(name);
        if key.is_empty() {
            return RecordOutcome::Ignored;
        }
        let now = Utc::now();
        let confidence = confidence.clamp(0.0, 1.0);

        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.count += 1;
                entry.last_used = now;
                if source > entry.source {
                    tracing::debug!(
                        name = %key,
                        from = %entry.source,
                        to = %source,
                        "Replacing cached type with more trusted source"
                    );
                    entry.entity_type = entity_type.to_string();
                    entry.confidence = confidence;
                    entry.source = source;
                    RecordOutcome::Replaced
                } else {
                    RecordOutcome::Reinforced
                }
            }
            None => {
                self.entries.insert(
                    key,
                    CacheEntry {
                        entity_type: entity_type.to_string(),
                        confidence,
                        source,
                        count: 1,
                        first_seen: now,
                        last_used: now,
                    },
                );
                RecordOutcome::Inserted
            }
        }
    }

    /// Record a human-approved classification at full confidence
    pub fn record_human_review(&mut self, name: &str, entity_type: &str) -> RecordOutcome {
        self.record(name, entity_type, 1.0, CacheSource::HumanReviewed)
    }

    /// Entries seen at least `min_count` times, most frequent first
    pub fn export_high_frequency(&self, min_count: u64) -> Vec<CachedType> {
        let mut exported: Vec<CachedType> = self
            .entries
            .iter()
            .filter(|(_, e)| e.count >= min_count)
            .map(|(name, e)| CachedType {
                name: name.clone(),
                entity_type: e.entity_type.clone(),
                confidence: e.confidence,
                source: e.source,
                count: e.count,
            })
            .collect();
        exported.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        exported
    }

    /// Remove entries below `min_confidence` or seen fewer than `min_count`
    /// times. Human-reviewed entries are kept. Returns the number removed.
    pub fn prune(&mut self, min_confidence: f32, min_count: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| {
            e.source == CacheSource::HumanReviewed
                || (e.confidence >= min_confidence && e.count >= min_count)
        });
        let removed = before - self.entries.len();
        tracing::info!(removed, remaining = self.entries.len(), "Pruned entity-type cache");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            entries: self.entries.len(),
            ..Default::default()
        };
        let mut confidence_sum = 0.0;
        for entry in self.entries.values() {
            if entry.confidence > self.trust_threshold {
                stats.trusted += 1;
            }
            stats.total_count += entry.count;
            confidence_sum += entry.confidence;
            *stats.by_source.entry(entry.source).or_insert(0) += 1;
        }
        if !self.entries.is_empty() {
            stats.average_confidence = confidence_sum / self.entries.len() as f32;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write a JSON backup
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = CacheSnapshot {
            trust_threshold: self.trust_threshold,
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(&snapshot)?)?;
        tracing::info!(path = %path.as_ref().display(), entries = self.entries.len(), "Saved cache");
        Ok(())
    }

    /// Restore a JSON backup written by [`save`](Self::save)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let snapshot: CacheSnapshot = serde_json::from_str(&content)
            .map_err(|e| TriplexError::Serialization(format!("cache backup: {}", e)))?;
        Ok(Self {
            entries: snapshot.entries.into_iter().collect(),
            trust_threshold: snapshot.trust_threshold,
        })
    }
}

impl Default for EntityTypeCache {
    fn default() -> Self {
        Self::new(0.9)
    }
}
