//! Ordered regex index

use regex::Regex;
use serde::{Deserialize, Serialize};
use triplex_core::Result;
use triplex_schema::compile_pattern;

/// Serializable form of a pattern entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub pattern: String,
    pub entity_type: String,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    spec: PatternSpec,
    regex: Regex,
}

/// Patterns in insertion order, matched case-insensitively at the start of a query
#[derive(Debug, Default, Clone)]
pub struct PatternIndex {
    patterns: Vec<CompiledPattern>,
}

impl PatternIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and append a pattern. Returns `Ok(false)` for a duplicate
    /// (pattern, type) pair.
    pub fn add(
        &mut self,
        pattern: &str,
        entity_type: &str,
        confidence: f32,
    ) -> Result<bool> {
        if self
            .patterns
            .iter()
            .any(|p| p.spec.pattern == pattern && p.spec.entity_type == entity_type)
        {
            return Ok(false);
        }

        let regex = compile_pattern(pattern)?;
        self.patterns.push(CompiledPattern {
            spec: PatternSpec {
                pattern: pattern.to_string(),
                entity_type: entity_type.to_string(),
                confidence: confidence.clamp(0.0, 1.0),
            },
            regex,
        });
        Ok(true)
    }

    /// Every pattern matching `query`, in insertion order
    pub fn matches<'a>(&'a self, query: &'a str) -> impl Iterator<Item = &'a PatternSpec> + 'a {
        self.patterns
            .iter()
            .filter(move |p| p.regex.is_match(query))
            .map(|p| &p.spec)
    }

    pub fn specs(&self) -> impl Iterator<Item = &PatternSpec> {
        self.patterns.iter().map(|p| &p.spec)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
