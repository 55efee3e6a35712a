//! Triplex Extractor - Classification and triple extraction pipeline
//!
//! Implements entity-type inference, schema detection and hybrid
//! rule/oracle triple extraction, tied together by the [`Engine`].

pub mod cache;
pub mod detector;
pub mod engine;
pub mod hybrid;
pub mod inferer;
pub mod loader;
pub mod metrics;
pub mod rules;
pub mod text;

pub use cache::{CacheEntry, CacheSource, CacheStats, CachedType, EntityTypeCache, RecordOutcome};
pub use detector::{DetectionMethod, DetectionResult, SchemaDetector, SignalScores};
pub use engine::{DocumentOutcome, Engine, EntityTyping};
pub use hybrid::{
    fallback_reasons, merge_and_deduplicate, text_complexity, ExtractionStage, FallbackReason,
    HybridExtraction, HybridTripleExtractor, StageTiming,
};
pub use inferer::{Inference, InferenceMethod, InferenceOutcome, LayeredInferer, TierTiming, TypeBanks};
pub use loader::{store_outcome, GraphLoader, LoadResult};
pub use metrics::{AggregateMetrics, Evaluator, ExtractionStats, GoldTriple, MethodStats, TripleMetrics};
pub use rules::RuleBasedTripleExtractor;
