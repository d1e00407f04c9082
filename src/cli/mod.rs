//! CLI command definitions and implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::embedding::has_api_key;
use crate::pipeline::{PipelineConfig, RagPipeline};

/// Data directory (~/.sefaz-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sefaz-rag")
}

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "sefaz-rag")]
#[command(version, about = "RAG pipeline over SEFAZ-PE tax legislation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the knowledge base from a directory of PDFs
    Build {
        /// Directory containing the source PDFs
        #[arg(short, long, default_value = "documents")]
        docs: PathBuf,

        /// Rebuild even if an index already exists
        #[arg(long)]
        force: bool,
    },

    /// Semantic search over the knowledge base
    Query {
        /// Search query
        query: String,

        /// Number of results
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Drop results beyond this raw distance
        #[arg(long)]
        max_distance: Option<f32>,
    },

    /// Ask a question and get a grounded answer
    Chat {
        /// Question about the indexed legislation
        query: String,
    },

    /// Append new documents to an existing knowledge base
    Update {
        /// Directory containing the new PDFs
        #[arg(short, long)]
        docs: Option<PathBuf>,
    },

    /// Show pipeline status
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Build { docs, force } => cmd_build(docs, force).await,
        Commands::Query {
            query,
            limit,
            max_distance,
        } => cmd_query(&query, limit, max_distance).await,
        Commands::Chat { query } => cmd_chat(&query).await,
        Commands::Update { docs } => cmd_update(docs).await,
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "No API key configured.\n\n\
             Set one with:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             or\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             Get a key at: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

fn default_config(docs: Option<PathBuf>) -> PipelineConfig {
    let data_dir = get_data_dir();
    let mut config = PipelineConfig {
        persist_directory: data_dir.join("lance_db"),
        ..PipelineConfig::default()
    };
    if let Some(docs) = docs {
        config.documents_path = docs;
    }
    config
}

async fn open_pipeline(docs: Option<PathBuf>) -> Result<Arc<RagPipeline>> {
    let data_dir = get_data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
    }

    let pipeline = RagPipeline::from_env(default_config(docs))
        .await
        .context("Failed to initialize pipeline")?;
    Ok(Arc::new(pipeline))
}

async fn cmd_build(docs: PathBuf, force: bool) -> Result<()> {
    require_api_key()?;

    println!("[*] Building knowledge base from {:?}...", docs);

    let pipeline = open_pipeline(Some(docs)).await?;
    let indexed = pipeline
        .build_knowledge_base(force)
        .await
        .context("Build failed")?;

    if indexed == 0 {
        println!("[OK] Existing knowledge base loaded (use --force to rebuild)");
    } else {
        println!("[OK] Knowledge base built: {} chunks indexed", indexed);
    }

    Ok(())
}

async fn cmd_query(query: &str, limit: usize, max_distance: Option<f32>) -> Result<()> {
    require_api_key()?;

    println!("[*] Searching: \"{}\"", query);

    let pipeline = open_pipeline(None).await?;
    pipeline
        .load_knowledge_base()
        .await
        .context("No knowledge base found, run `sefaz-rag build` first")?;

    let results = pipeline.search(query, limit, max_distance).await?;

    if results.is_empty() {
        println!("\n[!] No results.");
        return Ok(());
    }

    println!("\n[OK] Results ({}):\n", results.len());

    for (i, hit) in results.iter().enumerate() {
        println!(
            "{}. [score: {:.4}] {} (page {})",
            i + 1,
            hit.score,
            hit.metadata.file_name,
            hit.metadata.page_index + 1
        );
        println!("   Content: {}", truncate_text(&hit.content, 200));
    }

    Ok(())
}

async fn cmd_chat(query: &str) -> Result<()> {
    require_api_key()?;

    let pipeline = open_pipeline(None).await?;
    pipeline
        .load_knowledge_base()
        .await
        .context("No knowledge base found, run `sefaz-rag build` first")?;

    println!("[*] Question: \"{}\"", query);

    let response = pipeline.chat(query).await?;

    println!("\n{}", response.response);
    println!();
    println!(
        "[OK] Confidence: {} (avg score: {:.3}, documents: {})",
        response.confidence.as_str(),
        response.avg_score,
        response.documents_used
    );

    if !response.sources.is_empty() {
        println!("\nSources:");
        let mut seen = std::collections::HashSet::new();
        for source in &response.sources {
            if seen.insert(source.file_name.clone()) {
                println!("  - {}", source.file_name);
            }
        }
    }

    Ok(())
}

async fn cmd_update(docs: Option<PathBuf>) -> Result<()> {
    require_api_key()?;

    let pipeline = open_pipeline(None).await?;
    pipeline
        .load_knowledge_base()
        .await
        .context("No knowledge base found, run `sefaz-rag build` first")?;

    println!("[*] Updating knowledge base...");

    let added = pipeline.update_knowledge_base(docs).await?;

    if added == 0 {
        println!("[!] No new documents found.");
    } else {
        println!("[OK] Knowledge base updated: {} chunks added", added);
    }

    Ok(())
}

async fn cmd_status() -> Result<()> {
    let config = default_config(None);

    println!("[*] sefaz-rag status");
    println!();
    println!("Documents path:    {:?}", config.documents_path);
    println!("Persist directory: {:?}", config.persist_directory);
    println!("Collection:        {}", config.collection_name);
    println!(
        "Chunking:          {} chars, {} overlap",
        config.chunk.chunk_size, config.chunk.chunk_overlap
    );

    // index info needs the pipeline, which needs an API key
    if has_api_key() {
        let pipeline = open_pipeline(None).await?;
        let stats = pipeline.get_statistics().await;

        if stats.index_loaded {
            println!("Index:             {} chunks", stats.index_rows);
        } else {
            println!("Index:             not built (run `sefaz-rag build`)");
        }
    }

    println!();
    if has_api_key() {
        println!("API key:           configured");
    } else {
        println!("API key:           missing (export GEMINI_API_KEY=...)");
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Truncates on a character boundary, appending an ellipsis.
fn truncate_text(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        flattened
    } else {
        let truncated: String = flattened.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("exact", 5), "exact");
        assert_eq!(truncate_text("toolongtext", 4), "tool...");
        // whitespace runs are flattened before measuring
        assert_eq!(truncate_text("a\n b   c", 10), "a b c");
    }

    #[test]
    fn test_data_dir_is_namespaced() {
        assert!(get_data_dir().ends_with(".sefaz-rag"));
    }
}
