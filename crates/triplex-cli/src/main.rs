//! Triplex CLI - Command-line interface
//!
//! Usage:
//!   triplex schemas list
//!   triplex schemas show <id>
//!   triplex detect <file> [--seed s,p,o]
//!   triplex infer <name>... [--schema id]
//!   triplex extract <file> [--schema id] [--feedback]
//!   triplex index search <query>
//!   triplex cache prune --min-confidence 0.5

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use triplex_core::{EngineConfig, GraphPayload, GraphSink, Oracle, SeedTriple};
use triplex_extractor::{store_outcome, Engine, EntityTypeCache, ExtractionStats};
use triplex_oracle::create_oracle;
use triplex_schema::SchemaOverrides;

#[derive(Parser)]
#[command(name = "triplex")]
#[command(about = "Schema-guided triple extraction CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Schema directory (overrides the configuration)
    #[arg(long, global = true)]
    schemas: Option<PathBuf>,

    /// Entity-type cache backup, loaded on start
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and compose schemas
    Schemas {
        #[command(subcommand)]
        action: SchemaAction,
    },
    /// Rank schemas for a document
    Detect {
        /// Document path, or - for stdin
        input: String,

        /// Known relation as subject,predicate,object
        #[arg(long = "seed", value_parser = parse_seed)]
        seeds: Vec<SeedTriple>,

        /// Never call the oracle
        #[arg(long)]
        rules_only: bool,
    },
    /// Infer the type of entity names
    Infer {
        names: Vec<String>,

        /// Schema whose banks to use (defaults to the fallback schema)
        #[arg(long)]
        schema: Option<String>,

        /// Surrounding text for the context tier
        #[arg(long)]
        context: Option<String>,
    },
    /// Extract triples from a document and print the graph payload
    Extract {
        /// Document path, or - for stdin
        input: String,

        /// Skip detection and use this schema
        #[arg(long)]
        schema: Option<String>,

        /// Never call the oracle
        #[arg(long)]
        rules_only: bool,

        /// Record resolved typings and write the cache back
        #[arg(long)]
        feedback: bool,
    },
    /// Query the multi-level index
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Maintain the entity-type cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum SchemaAction {
    /// List registered schemas
    List,
    /// Print a schema as YAML
    Show { id: String },
    /// Union several schemas into a new one
    Merge {
        new_id: String,
        #[arg(required = true)]
        sources: Vec<String>,
        /// Write the result into the schema directory
        #[arg(long)]
        save: bool,
    },
    /// Copy a schema and apply overrides from a YAML file
    Derive {
        source: String,
        new_id: String,
        #[arg(long)]
        overrides: Option<PathBuf>,
        #[arg(long)]
        save: bool,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Search a term
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Show index sizes
    Stats,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print frequently seen entries as JSON
    Export {
        #[arg(long, default_value_t = 1)]
        min_count: u64,
    },
    /// Drop weak entries and write the cache back
    Prune {
        #[arg(long, default_value_t = 0.5)]
        min_confidence: f32,
        #[arg(long, default_value_t = 1)]
        min_count: u64,
    },
}

/// Graph sink writing each payload to stdout as JSON
struct StdoutSink;

#[async_trait::async_trait]
impl GraphSink for StdoutSink {
    async fn store(&self, payload: &GraphPayload) -> triplex_core::Result<()> {
        println!("{}", serde_json::to_string_pretty(payload)?);
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?.with_env_override()?,
        None => EngineConfig::from_env()?,
    };
    if let Some(dir) = &cli.schemas {
        config.schemas.dir = dir.clone();
    }
    init_tracing(&config);

    let mut engine = Engine::from_config(config)
        .context("failed to initialize engine")?;
    if let Some(path) = cli.cache.as_deref().filter(|p| p.exists()) {
        engine = engine.with_cache(EntityTypeCache::load(path)?);
    }

    match cli.command {
        Commands::Schemas { action } => run_schemas(&mut engine, action)?,
        Commands::Detect {
            input,
            seeds,
            rules_only,
        } => {
            let text = read_input(&input)?;
            let oracle = oracle_for(&engine, rules_only);
            let ranked = engine.detect(&text, &seeds, oracle.as_deref()).await?;
            if ranked.is_empty() {
                println!("No schema scored above threshold");
            }
            for (rank, result) in ranked.iter().enumerate() {
                println!(
                    "{}. {} ({:.3}, {:?}) ontology={:.3} seed={:.3} structure={:.3}",
                    rank + 1,
                    result.schema_id,
                    result.confidence,
                    result.method,
                    result.scores.ontology,
                    result.scores.seed,
                    result.scores.structure
                );
                for evidence in result.evidence.iter().take(5) {
                    println!("     {}", evidence);
                }
            }
        }
        Commands::Infer {
            names,
            schema,
            context,
        } => {
            let schema_id = match schema {
                Some(id) => id,
                None => engine.fallback_schema_id()?.to_string(),
            };
            let inferer = engine.inferer(&schema_id)?;
            for name in &names {
                let inference = inferer.infer(name, context.as_deref());
                match (inference.entity_type(), inference.method()) {
                    (Some(ty), Some(method)) => println!(
                        "{}\t{}\t{:.2}\t{}",
                        name,
                        ty,
                        inference.confidence(),
                        method
                    ),
                    _ => println!("{}\tUnknown", name),
                }
            }
        }
        Commands::Extract {
            input,
            schema,
            rules_only,
            feedback,
        } => {
            let text = read_input(&input)?;
            let oracle = oracle_for(&engine, rules_only);
            let outcome = match schema {
                Some(id) => engine.process_with_schema(&id, &text, oracle.as_deref()).await?,
                None => engine.process(&text, &[], oracle.as_deref()).await?,
            };

            let stats = ExtractionStats::from_triples(outcome.triples());
            tracing::info!(
                schema = %outcome.schema_id,
                triples = stats.total,
                rule_ratio = stats.rule_ratio(),
                reasons = ?outcome.extraction.reasons,
                "Extraction complete"
            );
            store_outcome(&outcome, &StdoutSink).await?;

            if feedback {
                let written = engine.record_feedback(&outcome);
                tracing::info!(written, "Feedback recorded");
                save_cache(&engine, cli.cache.as_deref())?;
            }
        }
        Commands::Index { action } => match action {
            IndexAction::Search { query, top_k } => {
                let matches = engine.index().search(&query, top_k);
                if matches.is_empty() {
                    println!("No match for '{}'", query);
                }
                for m in matches {
                    println!("{}\t{:.2}\t{:?}", m.entity_type, m.confidence, m.tier);
                }
            }
            IndexAction::Stats => {
                println!("{}", serde_json::to_string_pretty(&engine.index().stats())?);
            }
        },
        Commands::Cache { action } => match action {
            CacheAction::Export { min_count } => {
                let exported = engine.cache().export_high_frequency(min_count);
                println!("{}", serde_json::to_string_pretty(&exported)?);
            }
            CacheAction::Prune {
                min_confidence,
                min_count,
            } => {
                let removed = engine.cache_mut().prune(min_confidence, min_count);
                println!("Removed {} entries, {} remaining", removed, engine.cache().len());
                save_cache(&engine, cli.cache.as_deref())?;
            }
        },
    }

    Ok(())
}

fn run_schemas(engine: &mut Engine, action: SchemaAction) -> anyhow::Result<()> {
    match action {
        SchemaAction::List => {
            for schema in engine.registry().iter() {
                println!(
                    "{}\t{}\t{} entity types, {} relations",
                    schema.id,
                    schema.display_name(),
                    schema.entity_types.len(),
                    schema.relation_types.len()
                );
            }
        }
        SchemaAction::Show { id } => {
            let schema = engine.registry().load(&id)?;
            print!("{}", serde_yaml::to_string(schema)?);
        }
        SchemaAction::Merge {
            new_id,
            sources,
            save,
        } => {
            let ids: Vec<&str> = sources.iter().map(String::as_str).collect();
            let merged = engine.registry_mut().merge(&ids, &new_id)?;
            println!(
                "Merged {} into {} ({} entity types)",
                sources.join(", "),
                new_id,
                merged.entity_types.len()
            );
            persist_schema(engine, &new_id, save)?;
        }
        SchemaAction::Derive {
            source,
            new_id,
            overrides,
            save,
        } => {
            let overrides = match overrides {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    serde_yaml::from_str::<SchemaOverrides>(&content)?
                }
                None => SchemaOverrides::default(),
            };
            let derived = engine.registry_mut().derive(&source, &new_id, overrides)?;
            println!(
                "Derived {} from {} ({} entity types)",
                new_id,
                source,
                derived.entity_types.len()
            );
            persist_schema(engine, &new_id, save)?;
        }
    }
    Ok(())
}

fn persist_schema(engine: &mut Engine, id: &str, save: bool) -> anyhow::Result<()> {
    if save {
        match engine.registry().persist(id)? {
            Some(path) => println!("Saved {}", path.display()),
            None => println!("Registry has no directory, nothing saved"),
        }
    }
    engine.refresh()?;
    Ok(())
}

fn save_cache(engine: &Engine, path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(path) => engine.cache().save(path)?,
        None => tracing::warn!("No --cache path given, cache not saved"),
    }
    Ok(())
}

fn oracle_for(engine: &Engine, rules_only: bool) -> Option<Box<dyn Oracle>> {
    if rules_only || engine.config().extraction.rules_only {
        None
    } else {
        Some(create_oracle(&engine.config().oracle))
    }
}

fn read_input(input: &str) -> anyhow::Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {}", input))
    }
}

fn parse_seed(s: &str) -> Result<SeedTriple, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [subject, predicate, object]
            if !subject.is_empty() && !predicate.is_empty() && !object.is_empty() =>
        {
            Ok(SeedTriple::new(*subject, *predicate, *object))
        }
        _ => Err(format!("expected subject,predicate,object but got '{}'", s)),
    }
}

fn init_tracing(config: &EngineConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(config.logging.include_location)
        .with_line_number(config.logging.include_location);

    if config.logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_seed() {
        let seed = parse_seed("Gray Wolf, inhabits, Savanna").unwrap();
        assert_eq!(seed, SeedTriple::new("Gray Wolf", "inhabits", "Savanna"));
        assert!(parse_seed("a,b").is_err());
        assert!(parse_seed("a,,c").is_err());
    }

    #[test]
    fn test_extract_args() {
        let cli = Cli::try_parse_from([
            "triplex",
            "--schemas",
            "schemas",
            "extract",
            "doc.txt",
            "--schema",
            "biology",
            "--rules-only",
        ])
        .unwrap();
        assert_eq!(cli.schemas, Some(PathBuf::from("schemas")));
        match cli.command {
            Commands::Extract {
                schema, rules_only, ..
            } => {
                assert_eq!(schema.as_deref(), Some("biology"));
                assert!(rules_only);
            }
            _ => panic!("expected extract"),
        }
    }
}
