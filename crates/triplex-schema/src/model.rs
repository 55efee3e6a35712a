//! Schema data model
//!
//! A schema declares the entity types and relation types of one domain,
//! together with the vocabulary (examples, keywords, patterns, aliases)
//! used to recognize them in text.

use crate::pattern::compile_pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use triplex_core::{normalize_term, RelationSummary, SchemaDescriptor, TypeSummary};

/// Relation name used for instance-of triples when a schema declares none
pub const DEFAULT_INSTANCE_RELATION: &str = "is_instance_of";

/// Prompt key holding a custom extraction template
pub const EXTRACTION_PROMPT_KEY: &str = "extraction_user_prompt";

const INSTANCE_RELATION_NAMES: [&str; 4] = ["is_instance_of", "instance_of", "is_a", "isa"];

fn is_zero(v: &u64) -> bool {
    *v == 0
}

// ============================================================================
// Metadata
// ============================================================================

/// Descriptive header of a schema file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaMetadata {
    pub name: String,
    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

// ============================================================================
// Entity Types
// ============================================================================

/// Declaration of one entity type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityTypeDef {
    pub description: String,

    /// Canonical instances of the type
    pub examples: Vec<String>,

    /// Words whose presence suggests the type
    pub keywords: Vec<String>,

    /// Regular expressions matched case-insensitively at the start of a name
    pub patterns: Vec<String>,

    /// Alternative names for the type itself
    pub aliases: Vec<String>,

    /// Words found around a mention; falls back to `keywords` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_indicators: Option<Vec<String>>,

    /// Times this type was assigned by the engine
    #[serde(skip_serializing_if = "is_zero")]
    pub usage_count: u64,
}

impl EntityTypeDef {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.examples = examples.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context_indicators<I, S>(mut self, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_indicators = Some(indicators.into_iter().map(Into::into).collect());
        self
    }

    /// Context indicator words, defaulting to the keywords
    pub fn indicators(&self) -> &[String] {
        self.context_indicators.as_deref().unwrap_or(&self.keywords)
    }
}

// ============================================================================
// Relation Types
// ============================================================================

/// Declaration of one relation type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationTypeDef {
    pub description: String,

    /// Allowed subject types; empty or `*` allows any
    pub subject_types: Vec<String>,

    /// Allowed object types; empty or `*` allows any
    pub object_types: Vec<String>,

    /// Alternative predicate spellings
    pub aliases: Vec<String>,

    pub is_symmetric: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverse_relation: Option<String>,

    pub examples: Vec<String>,

    #[serde(skip_serializing_if = "is_zero")]
    pub usage_count: u64,
}

impl RelationTypeDef {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_domain<I, S>(mut self, subject_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject_types = subject_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_range<I, S>(mut self, object_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.object_types = object_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn symmetric(mut self) -> Self {
        self.is_symmetric = true;
        self
    }

    pub fn allows_subject(&self, entity_type: &str) -> bool {
        type_allowed(&self.subject_types, entity_type)
    }

    pub fn allows_object(&self, entity_type: &str) -> bool {
        type_allowed(&self.object_types, entity_type)
    }
}

fn type_allowed(allowed: &[String], entity_type: &str) -> bool {
    allowed.is_empty()
        || allowed
            .iter()
            .any(|t| t == "*" || t.eq_ignore_ascii_case(entity_type))
}

// ============================================================================
// Schema
// ============================================================================

/// A domain schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Registry identifier, taken from the file stem on load
    #[serde(skip)]
    pub id: String,

    #[serde(default)]
    pub metadata: SchemaMetadata,

    #[serde(default)]
    pub entity_types: BTreeMap<String, EntityTypeDef>,

    #[serde(default)]
    pub relation_types: BTreeMap<String, RelationTypeDef>,

    /// Free-form settings for schema expansion tooling
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expansion_config: BTreeMap<String, serde_json::Value>,

    /// Named prompt templates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub llm_prompts: BTreeMap<String, String>,
}

impl Schema {
    /// Create an empty schema
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: SchemaMetadata {
                name: name.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    pub fn with_entity_type(mut self, name: impl Into<String>, def: EntityTypeDef) -> Self {
        self.entity_types.insert(name.into(), def);
        self
    }

    pub fn with_relation_type(mut self, name: impl Into<String>, def: RelationTypeDef) -> Self {
        self.relation_types.insert(name.into(), def);
        self
    }

    pub fn with_prompt(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.llm_prompts.insert(key.into(), template.into());
        self
    }

    /// Human-readable name, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.metadata.name.is_empty() {
            &self.id
        } else {
            &self.metadata.name
        }
    }

    /// Drop every pattern that does not compile. Returns the number dropped.
    pub fn sanitize_patterns(&mut self) -> usize {
        let mut dropped = 0;
        for (type_name, def) in self.entity_types.iter_mut() {
            let before = def.patterns.len();
            def.patterns.retain(|p| match compile_pattern(p) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(
                        schema = %self.id,
                        entity_type = %type_name,
                        error = %e,
                        "Dropping invalid pattern"
                    );
                    false
                }
            });
            dropped += before - def.patterns.len();
        }
        dropped
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityTypeDef> {
        self.entity_types.get(name)
    }

    /// Whether `name` is a declared entity type (case-insensitive)
    pub fn defines_entity_type(&self, name: &str) -> bool {
        self.canonical_type_name(name).is_some()
    }

    /// Declared spelling of an entity type name or alias
    pub fn canonical_type_name(&self, name: &str) -> Option<&str> {
        let wanted = normalize_term(name);
        self.entity_types
            .iter()
            .find(|(type_name, def)| {
                normalize_term(type_name) == wanted
                    || def.aliases.iter().any(|a| normalize_term(a) == wanted)
            })
            .map(|(type_name, _)| type_name.as_str())
    }

    /// Resolve a predicate by exact name, case-insensitive name, then alias
    pub fn resolve_relation(&self, predicate: &str) -> Option<(&str, &RelationTypeDef)> {
        if let Some((name, def)) = self.relation_types.get_key_value(predicate) {
            return Some((name.as_str(), def));
        }

        let wanted = normalize_term(predicate);
        self.relation_types
            .iter()
            .find(|(name, _)| normalize_term(name) == wanted)
            .or_else(|| {
                self.relation_types
                    .iter()
                    .find(|(_, def)| def.aliases.iter().any(|a| normalize_term(a) == wanted))
            })
            .map(|(name, def)| (name.as_str(), def))
    }

    /// Predicate used for instance-of triples
    pub fn instance_relation(&self) -> &str {
        INSTANCE_RELATION_NAMES
            .iter()
            .find_map(|candidate| self.resolve_relation(candidate).map(|(name, _)| name))
            .unwrap_or(DEFAULT_INSTANCE_RELATION)
    }

    /// Increment the usage counter of an entity type
    pub fn record_type_usage(&mut self, entity_type: &str) -> bool {
        match self.entity_types.get_mut(entity_type) {
            Some(def) => {
                def.usage_count += 1;
                true
            }
            None => false,
        }
    }

    /// Compact vocabulary view for oracle prompts
    pub fn descriptor(&self) -> SchemaDescriptor {
        SchemaDescriptor {
            id: self.id.clone(),
            name: self.display_name().to_string(),
            description: self.metadata.description.clone(),
            entity_types: self
                .entity_types
                .iter()
                .map(|(name, def)| TypeSummary {
                    name: name.clone(),
                    description: def.description.clone(),
                    examples: def.examples.iter().take(3).cloned().collect(),
                })
                .collect(),
            relation_types: self
                .relation_types
                .iter()
                .map(|(name, def)| RelationSummary {
                    name: name.clone(),
                    description: def.description.clone(),
                    subject_types: def.subject_types.clone(),
                    object_types: def.object_types.clone(),
                })
                .collect(),
            prompt_template: self.llm_prompts.get(EXTRACTION_PROMPT_KEY).cloned(),
        }
    }
}
