//! Quality Metrics module
//!
//! Per-method extraction statistics, plus precision, recall and F1 of
//! predicted triples against a gold standard.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use triplex_core::{normalize_term, CandidateTriple, ExtractionMethod};

// ============================================================================
// Extraction Statistics
// ============================================================================

/// Count and mean confidence for one extraction method
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodStats {
    pub count: usize,
    pub average_confidence: f32,
}

/// Breakdown of an extraction result by provenance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total: usize,
    pub rule_count: usize,
    pub oracle_count: usize,
    pub average_confidence: f32,
    pub by_method: BTreeMap<ExtractionMethod, MethodStats>,
}

impl ExtractionStats {
    pub fn from_triples(triples: &[CandidateTriple]) -> Self {
        let mut sums: BTreeMap<ExtractionMethod, (usize, f32)> = BTreeMap::new();
        for triple in triples {
            let slot = sums.entry(triple.method).or_default();
            slot.0 += 1;
            slot.1 += triple.confidence;
        }

        let by_method = sums
            .into_iter()
            .map(|(method, (count, sum))| {
                (
                    method,
                    MethodStats {
                        count,
                        average_confidence: sum / count as f32,
                    },
                )
            })
            .collect();

        let oracle_count = triples.iter().filter(|t| t.method.is_oracle()).count();
        let total = triples.len();
        let average_confidence = if total == 0 {
            0.0
        } else {
            triples.iter().map(|t| t.confidence).sum::<f32>() / total as f32
        };

        Self {
            total,
            rule_count: total - oracle_count,
            oracle_count,
            average_confidence,
            by_method,
        }
    }

    /// Share of triples produced by rule families
    pub fn rule_ratio(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.rule_count as f32 / self.total as f32
        }
    }

    /// Share of triples produced by the oracle
    pub fn oracle_ratio(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.oracle_count as f32 / self.total as f32
        }
    }
}

// ============================================================================
// Triple Metrics
// ============================================================================

/// Metrics for triple extraction evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripleMetrics {
    /// Predicted triples present in the gold set
    pub true_positives: usize,
    /// Predicted triples absent from the gold set
    pub false_positives: usize,
    /// Gold triples never predicted
    pub false_negatives: usize,
    pub gold_total: usize,
    pub predicted_total: usize,
}

impl TripleMetrics {
    /// Calculate precision (TP / (TP + FP))
    pub fn precision(&self) -> f32 {
        if self.true_positives + self.false_positives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_positives) as f32
        }
    }

    /// Calculate recall (TP / (TP + FN))
    pub fn recall(&self) -> f32 {
        if self.true_positives + self.false_negatives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_negatives) as f32
        }
    }

    /// Calculate F1 score (2 * P * R / (P + R))
    pub fn f1_score(&self) -> f32 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

// ============================================================================
// Gold Standard
// ============================================================================

/// A gold standard triple for evaluation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GoldTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl GoldTriple {
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

    fn key(&self) -> (String, String, String) {
        (
            normalize_term(&self.subject),
            normalize_term(&self.predicate),
            normalize_term(&self.object),
        )
    }
}

impl From<&CandidateTriple> for GoldTriple {
    fn from(t: &CandidateTriple) -> Self {
        Self::new(&t.subject, &t.predicate, &t.object)
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluator for extraction quality
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    /// Ignore predicted triples below this confidence
    min_confidence: f32,
    /// Compare subject and object only
    ignore_predicates: bool,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Count a prediction as correct when subject and object match,
    /// whatever the predicate
    pub fn ignoring_predicates(mut self) -> Self {
        self.ignore_predicates = true;
        self
    }

    fn key(&self, (s, p, o): (String, String, String)) -> (String, String, String) {
        if self.ignore_predicates {
            (s, String::new(), o)
        } else {
            (s, p, o)
        }
    }

    /// Evaluate predicted triples. Both sides are compared by normalized
    /// key, so duplicates on either side count once.
    pub fn evaluate(&self, predicted: &[CandidateTriple], gold: &[GoldTriple]) -> TripleMetrics {
        let predicted_set: HashSet<_> = predicted
            .iter()
            .filter(|t| t.confidence >= self.min_confidence)
            .map(|t| self.key(t.key()))
            .collect();
        let gold_set: HashSet<_> = gold.iter().map(|g| self.key(g.key())).collect();

        let true_positives = predicted_set.intersection(&gold_set).count();

        TripleMetrics {
            true_positives,
            false_positives: predicted_set.len() - true_positives,
            false_negatives: gold_set.len() - true_positives,
            gold_total: gold_set.len(),
            predicted_total: predicted_set.len(),
        }
    }
}

// ============================================================================
// Aggregate Metrics
// ============================================================================

/// Aggregate metrics for a batch of evaluations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub triple_metrics: TripleMetrics,
    pub num_documents: usize,
    pub oracle_documents: usize,
}

impl AggregateMetrics {
    /// Add one document's metrics; `used_oracle` marks documents where the
    /// fallback ran
    pub fn add(&mut self, metrics: &TripleMetrics, used_oracle: bool) {
        self.triple_metrics.true_positives += metrics.true_positives;
        self.triple_metrics.false_positives += metrics.false_positives;
        self.triple_metrics.false_negatives += metrics.false_negatives;
        self.triple_metrics.gold_total += metrics.gold_total;
        self.triple_metrics.predicted_total += metrics.predicted_total;
        self.num_documents += 1;
        if used_oracle {
            self.oracle_documents += 1;
        }
    }

    pub fn report(&self) -> String {
        let m = &self.triple_metrics;
        format!(
            "=== Extraction Quality Report ===\n\n\
             Documents evaluated: {} (oracle fallback: {})\n\n\
             Triple Extraction:\n\
               Precision: {:.1}%\n\
               Recall:    {:.1}%\n\
               F1 Score:  {:.1}%\n\
               Gold: {} | Predicted: {} | TP: {} | FP: {} | FN: {}\n",
            self.num_documents,
            self.oracle_documents,
            m.precision() * 100.0,
            m.recall() * 100.0,
            m.f1_score() * 100.0,
            m.gold_total,
            m.predicted_total,
            m.true_positives,
            m.false_positives,
            m.false_negatives,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
