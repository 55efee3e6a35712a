//! Triplex Schema - Declarative domain schemas
//!
//! Schemas are loaded from YAML or JSON files, kept in a [`SchemaRegistry`]
//! and can be merged or derived programmatically.

pub mod model;
pub mod pattern;
pub mod registry;

pub use model::{
    EntityTypeDef, RelationTypeDef, Schema, SchemaMetadata, DEFAULT_INSTANCE_RELATION,
    EXTRACTION_PROMPT_KEY,
};
pub use pattern::{compile_pattern, compile_search_pattern};
pub use registry::{SchemaOverrides, SchemaRegistry};
