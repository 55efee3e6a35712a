//! Oracle abstraction
//!
//! The oracle is an opaque text-in/text-out generative service. Nothing
//! about its answers is assumed: responses are parsed leniently and any
//! failure degrades to an empty result.

use crate::Result;
use serde::{Deserialize, Serialize};

/// Token limit used for triple extraction prompts
pub const EXTRACTION_MAX_TOKENS: u32 = 1024;

/// Temperature used for triple extraction prompts
pub const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// Placeholder replaced by the document text in custom prompt templates
pub const TEXT_PLACEHOLDER: &str = "{text}";

// ============================================================================
// Schema Descriptor
// ============================================================================

/// Compact view of an entity type for prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSummary {
    pub name: String,
    pub description: String,
    pub examples: Vec<String>,
}

/// Compact view of a relation type for prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationSummary {
    pub name: String,
    pub description: String,
    pub subject_types: Vec<String>,
    pub object_types: Vec<String>,
}

/// Schema vocabulary handed to the oracle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub entity_types: Vec<TypeSummary>,
    pub relation_types: Vec<RelationSummary>,

    /// Schema-supplied user prompt containing `{text}`
    pub prompt_template: Option<String>,
}

// ============================================================================
// Oracle Triples
// ============================================================================

/// Triple as returned by the oracle, before provenance tagging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: Option<f32>,
}

/// Build the triple extraction prompt for a document
pub fn build_extraction_prompt(text: &str, schema: &SchemaDescriptor) -> String {
    if let Some(template) = schema
        .prompt_template
        .as_deref()
        .filter(|t| t.contains(TEXT_PLACEHOLDER))
    {
        return template.replace(TEXT_PLACEHOLDER, text);
    }

    let entity_lines: Vec<String> = schema
        .entity_types
        .iter()
        .map(|t| {
            if t.examples.is_empty() {
                format!("- {}: {}", t.name, t.description)
            } else {
                format!(
                    "- {}: {} (e.g. {})",
                    t.name,
                    t.description,
                    t.examples.join(", ")
                )
            }
        })
        .collect();

    let relation_lines: Vec<String> = schema
        .relation_types
        .iter()
        .map(|r| {
            format!(
                "- {}({} -> {}): {}",
                r.name,
                r.subject_types.join("|"),
                r.object_types.join("|"),
                r.description
            )
        })
        .collect();

    format!(
        "Extract knowledge triples from the text using the {} schema.\n\n\
         Entity types:\n{}\n\n\
         Relation types:\n{}\n\n\
         Text:\n{}\n\n\
         Respond with a JSON array of objects with fields \
         \"subject\", \"predicate\", \"object\" and \"confidence\" (0-1). \
         Use only the relation types listed above.",
        schema.name,
        entity_lines.join("\n"),
        relation_lines.join("\n"),
        text
    )
}

#[derive(Debug, Deserialize)]
struct RawTriple {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default, alias = "relation")]
    predicate: Option<String>,
    #[serde(default)]
    object: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct WrappedTriples {
    triples: Vec<serde_json::Value>,
}

/// Parse an oracle response into triples.
///
/// Accepts a bare JSON array, an object with a `triples` array, or either
/// embedded in surrounding prose or code fences. Entries missing a field
/// are skipped. Anything unparseable yields an empty list.
pub fn parse_oracle_triples(response: &str) -> Vec<OracleTriple> {
    let values = match locate_json_array(response) {
        Some(values) => values,
        None => return Vec::new(),
    };

    values
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawTriple>(v).ok())
        .filter_map(|raw| {
            let subject = raw.subject?.trim().to_string();
            let predicate = raw.predicate?.trim().to_string();
            let object = raw.object?.trim().to_string();
            if subject.is_empty() || predicate.is_empty() || object.is_empty() {
                return None;
            }
            Some(OracleTriple {
                subject,
                predicate,
                object,
                confidence: raw.confidence.filter(|c| c.is_finite()),
            })
        })
        .collect()
}

fn locate_json_array(response: &str) -> Option<Vec<serde_json::Value>> {
    let trimmed = response.trim();

    if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
        return Some(values);
    }
    if let Ok(wrapped) = serde_json::from_str::<WrappedTriples>(trimmed) {
        return Some(wrapped.triples);
    }

    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

// ============================================================================
// Oracle Trait
// ============================================================================

/// Trait for generative inference services
#[async_trait::async_trait]
pub trait Oracle: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Generate a completion
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;

    /// Extract triples for a document. Never fails: transport errors and
    /// malformed answers both produce an empty list.
    async fn extract_triples(&self, text: &str, schema: &SchemaDescriptor) -> Vec<OracleTriple> {
        let prompt = build_extraction_prompt(text, schema);
        match self
            .generate(&prompt, EXTRACTION_MAX_TOKENS, EXTRACTION_TEMPERATURE)
            .await
        {
            Ok(response) => {
                let triples = parse_oracle_triples(&response);
                tracing::debug!(
                    oracle = self.name(),
                    count = triples.len(),
                    "Parsed oracle triples"
                );
                triples
            }
            Err(e) => {
                tracing::warn!(oracle = self.name(), error = %e, "Oracle extraction failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TriplexError;

    fn descriptor() -> SchemaDescriptor {
        SchemaDescriptor {
            id: "cs".into(),
            name: "Computer Science".into(),
            description: "Algorithms and problems".into(),
            entity_types: vec![TypeSummary {
                name: "Algorithm".into(),
                description: "A procedure".into(),
                examples: vec!["Dijkstra".into()],
            }],
            relation_types: vec![RelationSummary {
                name: "solves".into(),
                description: "Algorithm solves problem".into(),
                subject_types: vec!["Algorithm".into()],
                object_types: vec!["Problem".into()],
            }],
            prompt_template: None,
        }
    }

    #[test]
    fn test_default_prompt_lists_vocabulary() {
        let prompt = build_extraction_prompt("Dijkstra finds paths.", &descriptor());
        assert!(prompt.contains("- Algorithm: A procedure (e.g. Dijkstra)"));
        assert!(prompt.contains("solves(Algorithm -> Problem)"));
        assert!(prompt.contains("Dijkstra finds paths."));
    }

    #[test]
    fn test_template_prompt() {
        let mut schema = descriptor();
        schema.prompt_template = Some("Triples please: {text}".into());
        assert_eq!(
            build_extraction_prompt("abc", &schema),
            "Triples please: abc"
        );
    }

    #[test]
    fn test_parse_bare_array() {
        let triples = parse_oracle_triples(
            r#"[{"subject":"A","predicate":"solves","object":"B","confidence":0.9}]"#,
        );
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].confidence, Some(0.9));
    }

    #[test]
    fn test_parse_embedded_and_wrapped() {
        let fenced = "Sure!\n```json\n[{\"subject\":\"A\",\"relation\":\"uses\",\"object\":\"B\"}]\n```";
        let triples = parse_oracle_triples(fenced);
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].predicate, "uses");
        assert_eq!(triples[0].confidence, None);

        let wrapped = r#"{"triples":[{"subject":"X","predicate":"p","object":"Y"}]}"#;
        assert_eq!(parse_oracle_triples(wrapped).len(), 1);
    }

    #[test]
    fn test_parse_skips_incomplete_entries() {
        let triples = parse_oracle_triples(
            r#"[{"subject":"A","predicate":"p"},{"subject":" ","predicate":"p","object":"B"},{"subject":"C","predicate":"q","object":"D"}]"#,
        );
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].subject, "C");
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_oracle_triples("").is_empty());
        assert!(parse_oracle_triples("I cannot help with that").is_empty());
        assert!(parse_oracle_triples("] oops [").is_empty());
    }

    struct FailingOracle;

    #[async_trait::async_trait]
    impl Oracle for FailingOracle {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _: &str, _: u32, _: f32) -> Result<String> {
            Err(TriplexError::OracleError("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_extract_triples_swallows_errors() {
        let triples = FailingOracle
            .extract_triples("text", &descriptor())
            .await;
        assert!(triples.is_empty());
    }
}
