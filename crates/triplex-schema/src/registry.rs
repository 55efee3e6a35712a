//! Schema registry
//!
//! Loads schema files from a directory, keeps them keyed by id and
//! supports merging and deriving new schemas from existing ones.

use crate::model::{EntityTypeDef, RelationTypeDef, Schema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use triplex_core::{Result, TriplexError};

/// Changes applied on top of a copied schema by [`SchemaRegistry::derive`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaOverrides {
    pub name: Option<String>,
    pub description: Option<String>,

    /// Entity types added or replaced wholesale
    pub entity_types: BTreeMap<String, EntityTypeDef>,

    /// Relation types added or replaced wholesale
    pub relation_types: BTreeMap<String, RelationTypeDef>,

    pub remove_entity_types: Vec<String>,
    pub remove_relation_types: Vec<String>,

    pub llm_prompts: BTreeMap<String, String>,
}

/// Registry of domain schemas
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    dir: Option<PathBuf>,
    schemas: BTreeMap<String, Schema>,
}

impl SchemaRegistry {
    /// Create an empty in-memory registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a schema directory, loading every `.yaml`, `.yml` and `.json`
    /// file in it. Malformed files are logged and skipped.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(TriplexError::NotFound(format!(
                "schema directory {}",
                dir.display()
            )));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| schema_format(p).is_some())
            .collect();
        paths.sort();

        let mut registry = Self {
            dir: Some(dir.to_path_buf()),
            schemas: BTreeMap::new(),
        };

        for path in paths {
            match Self::read_file(&path) {
                Ok(schema) => {
                    if registry.schemas.contains_key(&schema.id) {
                        tracing::warn!(path = %path.display(), id = %schema.id, "Duplicate schema id, skipping");
                        continue;
                    }
                    registry.insert(schema);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping schema file");
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            count = registry.schemas.len(),
            "Loaded schema registry"
        );
        Ok(registry)
    }

    /// Parse one schema file; the id is the file stem
    pub fn read_file(path: &Path) -> Result<Schema> {
        let format = schema_format(path).ok_or_else(|| {
            TriplexError::InvalidSchema(format!("unsupported extension: {}", path.display()))
        })?;
        let content = std::fs::read_to_string(path)?;

        let mut schema: Schema = match format {
            SchemaFormat::Yaml => serde_yaml::from_str(&content)
                .map_err(|e| TriplexError::InvalidSchema(e.to_string()))?,
            SchemaFormat::Json => serde_json::from_str(&content)
                .map_err(|e| TriplexError::InvalidSchema(e.to_string()))?,
        };

        schema.id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| TriplexError::InvalidSchema(path.display().to_string()))?;

        if schema.entity_types.is_empty() {
            return Err(TriplexError::InvalidSchema(format!(
                "{} declares no entity types",
                schema.id
            )));
        }
        Ok(schema)
    }

    /// Directory schemas are persisted to, if any
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Get a schema by id
    pub fn load(&self, id: &str) -> Result<&Schema> {
        self.schemas
            .get(id)
            .ok_or_else(|| TriplexError::NotFound(format!("schema {}", id)))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Schema> {
        self.schemas.get_mut(id)
    }

    /// Register a schema in memory, replacing any schema with the same id.
    /// Invalid patterns are dropped on the way in.
    pub fn insert(&mut self, mut schema: Schema) -> Option<Schema> {
        schema.sanitize_patterns();
        self.schemas.insert(schema.id.clone(), schema)
    }

    /// Register a schema and write it to the registry directory
    pub fn save(&mut self, schema: Schema) -> Result<()> {
        let id = schema.id.clone();
        if id.is_empty() {
            return Err(TriplexError::InvalidSchema("schema id is empty".to_string()));
        }
        self.insert(schema);
        self.persist(&id)?;
        Ok(())
    }

    /// Write a registered schema to `<dir>/<id>.yaml`. In-memory registries
    /// return `Ok(None)`.
    pub fn persist(&self, id: &str) -> Result<Option<PathBuf>> {
        let schema = self.load(id)?;
        let dir = match &self.dir {
            Some(dir) => dir,
            None => return Ok(None),
        };

        let yaml = serde_yaml::to_string(schema)
            .map_err(|e| TriplexError::Serialization(e.to_string()))?;
        let path = dir.join(format!("{}.yaml", id));
        std::fs::write(&path, yaml)?;

        tracing::info!(id = %id, path = %path.display(), "Saved schema");
        Ok(Some(path))
    }

    /// Registered schema ids, sorted
    pub fn list(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Fail when no schema is registered
    pub fn ensure_not_empty(&self) -> Result<()> {
        if self.is_empty() {
            Err(TriplexError::EmptyRegistry)
        } else {
            Ok(())
        }
    }

    /// Union several schemas into a new one. Types declared in more than one
    /// source have their vocabulary lists concatenated and deduplicated.
    pub fn merge(&mut self, ids: &[&str], new_id: &str) -> Result<&Schema> {
        if ids.is_empty() {
            return Err(TriplexError::InvalidSchema(
                "merge requires at least one source schema".to_string(),
            ));
        }

        let sources: Vec<&Schema> = ids.iter().map(|id| self.load(id)).collect::<Result<_>>()?;

        let mut merged = Schema::new(new_id, new_id)
            .with_description(format!("Merged from {}", ids.join(", ")));

        for source in sources {
            for (name, def) in &source.entity_types {
                match merged.entity_types.get_mut(name) {
                    Some(existing) => merge_entity_type(existing, def),
                    None => {
                        merged.entity_types.insert(name.clone(), def.clone());
                    }
                }
            }
            for (name, def) in &source.relation_types {
                match merged.relation_types.get_mut(name) {
                    Some(existing) => merge_relation_type(existing, def),
                    None => {
                        merged.relation_types.insert(name.clone(), def.clone());
                    }
                }
            }
            for (key, value) in &source.llm_prompts {
                merged
                    .llm_prompts
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        tracing::info!(
            id = %new_id,
            sources = ?ids,
            entity_types = merged.entity_types.len(),
            relation_types = merged.relation_types.len(),
            "Merged schemas"
        );

        self.insert(merged);
        self.load(new_id)
    }

    /// Copy a schema under a new id and apply overrides
    pub fn derive(
        &mut self,
        source_id: &str,
        new_id: &str,
        overrides: SchemaOverrides,
    ) -> Result<&Schema> {
        let mut derived = self.load(source_id)?.clone();
        derived.id = new_id.to_string();
        for def in derived.entity_types.values_mut() {
            def.usage_count = 0;
        }
        for def in derived.relation_types.values_mut() {
            def.usage_count = 0;
        }

        if let Some(name) = overrides.name {
            derived.metadata.name = name;
        }
        if let Some(description) = overrides.description {
            derived.metadata.description = description;
        }
        for name in &overrides.remove_entity_types {
            derived.entity_types.remove(name);
        }
        for name in &overrides.remove_relation_types {
            derived.relation_types.remove(name);
        }
        derived.entity_types.extend(overrides.entity_types);
        derived.relation_types.extend(overrides.relation_types);
        derived.llm_prompts.extend(overrides.llm_prompts);

        if derived.entity_types.is_empty() {
            return Err(TriplexError::InvalidSchema(format!(
                "{} would declare no entity types",
                new_id
            )));
        }

        tracing::info!(source = %source_id, id = %new_id, "Derived schema");
        self.insert(derived);
        self.load(new_id)
    }

    /// Bump the usage counter of an entity type in a schema
    pub fn record_usage(&mut self, id: &str, entity_type: &str) -> bool {
        self.schemas
            .get_mut(id)
            .map(|s| s.record_type_usage(entity_type))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy)]
enum SchemaFormat {
    Yaml,
    Json,
}

fn schema_format(path: &Path) -> Option<SchemaFormat> {
    match path.extension()?.to_str()?.to_lowercase().as_str() {
        "yaml" | "yml" => Some(SchemaFormat::Yaml),
        "json" => Some(SchemaFormat::Json),
        _ => None,
    }
}

fn extend_unique(target: &mut Vec<String>, extra: &[String]) {
    let mut seen: HashSet<String> = target.iter().cloned().collect();
    for item in extra {
        if seen.insert(item.clone()) {
            target.push(item.clone());
        }
    }
}

fn merge_entity_type(existing: &mut EntityTypeDef, other: &EntityTypeDef) {
    if existing.description.is_empty() {
        existing.description = other.description.clone();
    }
    extend_unique(&mut existing.examples, &other.examples);
    extend_unique(&mut existing.keywords, &other.keywords);
    extend_unique(&mut existing.patterns, &other.patterns);
    extend_unique(&mut existing.aliases, &other.aliases);
    match (&mut existing.context_indicators, &other.context_indicators) {
        (Some(mine), Some(theirs)) => extend_unique(mine, theirs),
        (None, Some(theirs)) => existing.context_indicators = Some(theirs.clone()),
        _ => {}
    }
    existing.usage_count += other.usage_count;
}

fn merge_relation_type(existing: &mut RelationTypeDef, other: &RelationTypeDef) {
    if existing.description.is_empty() {
        existing.description = other.description.clone();
    }
    extend_unique(&mut existing.subject_types, &other.subject_types);
    extend_unique(&mut existing.object_types, &other.object_types);
    extend_unique(&mut existing.aliases, &other.aliases);
    extend_unique(&mut existing.examples, &other.examples);
    existing.is_symmetric |= other.is_symmetric;
    if existing.inverse_relation.is_none() {
        existing.inverse_relation = other.inverse_relation.clone();
    }
    existing.usage_count += other.usage_count;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CS_YAML: &str = r#"
metadata:
  name: Computer Science
entity_types:
  Algorithm:
    description: A procedure
    keywords: [algorithm, optimization]
    patterns: ['.*\s(Algorithm|Optimization)$']
  Problem:
    keywords: [problem]
relation_types:
  solves:
    subject_types: [Algorithm]
    object_types: [Problem]
"#;

    const BIO_JSON: &str = r#"{
  "metadata": {"name": "Biology"},
  "entity_types": {
    "Algorithm": {"keywords": ["heuristic", "algorithm"], "examples": ["BLAST"]},
    "Gene": {"keywords": ["gene"], "patterns": ["[A-Z]{2,}\\d+", "(broken"]}
  },
  "relation_types": {"encodes": {"subject_types": ["Gene"], "object_types": ["*"]}}
}"#;

    fn write_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cs.yaml"), CS_YAML).unwrap();
        std::fs::write(dir.path().join("bio.json"), BIO_JSON).unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "entity_types: [not, a, map").unwrap();
        std::fs::write(dir.path().join("empty.yml"), "metadata:\n  name: Empty\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        dir
    }

    #[test]
    fn test_open_skips_malformed() {
        let dir = write_dir();
        let registry = SchemaRegistry::open(dir.path()).unwrap();
        assert_eq!(registry.list(), vec!["bio", "cs"]);
    }

    #[test]
    fn test_open_missing_dir() {
        let err = SchemaRegistry::open("/nonexistent/schemas").unwrap_err();
        assert!(matches!(err, TriplexError::NotFound(_)));
    }

    #[test]
    fn test_invalid_patterns_dropped_on_load() {
        let dir = write_dir();
        let registry = SchemaRegistry::open(dir.path()).unwrap();
        let bio = registry.load("bio").unwrap();
        assert_eq!(bio.entity_types["Gene"].patterns, vec!["[A-Z]{2,}\\d+"]);
    }

    #[test]
    fn test_load_not_found() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.load("missing"),
            Err(TriplexError::NotFound(_))
        ));
        assert!(matches!(
            registry.ensure_not_empty(),
            Err(TriplexError::EmptyRegistry)
        ));
    }

    #[test]
    fn test_merge_unions_and_dedups() {
        let dir = write_dir();
        let mut registry = SchemaRegistry::open(dir.path()).unwrap();
        let merged = registry.merge(&["cs", "bio"], "cs_bio").unwrap();

        assert_eq!(merged.entity_types.len(), 3);
        assert_eq!(merged.relation_types.len(), 2);
        assert_eq!(
            merged.entity_types["Algorithm"].keywords,
            vec!["algorithm", "optimization", "heuristic"]
        );
        assert_eq!(merged.entity_types["Algorithm"].examples, vec!["BLAST"]);
        assert_eq!(merged.entity_types["Algorithm"].description, "A procedure");
    }

    #[test]
    fn test_merge_missing_source() {
        let dir = write_dir();
        let mut registry = SchemaRegistry::open(dir.path()).unwrap();
        assert!(registry.merge(&["cs", "nope"], "x").is_err());
        assert!(registry.load("x").is_err());
    }

    #[test]
    fn test_derive_applies_overrides() {
        let dir = write_dir();
        let mut registry = SchemaRegistry::open(dir.path()).unwrap();
        let overrides = SchemaOverrides {
            name: Some("Operations Research".into()),
            entity_types: BTreeMap::from([(
                "Heuristic".to_string(),
                EntityTypeDef::new("Rule of thumb").with_keywords(["heuristic"]),
            )]),
            remove_entity_types: vec!["Problem".into()],
            ..Default::default()
        };

        let derived = registry.derive("cs", "ops", overrides).unwrap();
        assert_eq!(derived.metadata.name, "Operations Research");
        assert!(derived.entity_types.contains_key("Heuristic"));
        assert!(!derived.entity_types.contains_key("Problem"));

        // Source untouched
        assert!(registry.load("cs").unwrap().entity_types.contains_key("Problem"));
    }

    #[test]
    fn test_save_round_trips_through_directory() {
        let dir = write_dir();
        let mut registry = SchemaRegistry::open(dir.path()).unwrap();
        registry.derive("cs", "cs2", SchemaOverrides::default()).unwrap();
        registry.persist("cs2").unwrap();

        let reopened = SchemaRegistry::open(dir.path()).unwrap();
        let cs2 = reopened.load("cs2").unwrap();
        assert_eq!(cs2.entity_types, registry.load("cs").unwrap().entity_types);
    }

    #[test]
    fn test_record_usage() {
        let dir = write_dir();
        let mut registry = SchemaRegistry::open(dir.path()).unwrap();
        assert!(registry.record_usage("cs", "Algorithm"));
        assert!(!registry.record_usage("cs", "Unknown"));
        assert_eq!(
            registry.load("cs").unwrap().entity_types["Algorithm"].usage_count,
            1
        );
    }
}
