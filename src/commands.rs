use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::CancellationSignal;
use crate::config::Config;
use crate::database::{HierarchyStore, KnowledgeFile, SectionStore};
use crate::embeddings::{EmbeddingProvider, OllamaClient};
use crate::indexer::Indexer;
use crate::search::SearchResponse;

/// Settings changed from the command line; `None` leaves a value as it is
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub model: Option<String>,
    pub embedding_dimension: Option<u32>,
    pub candidate_limit: Option<usize>,
}

impl ConfigUpdate {
    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply every requested change, stopping at the first invalid value
    #[inline]
    pub fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(host) = self.host {
            config.ollama.set_host(host)?;
        }
        if let Some(port) = self.port {
            config.ollama.set_port(port)?;
        }
        if let Some(model) = self.model {
            config.ollama.set_model(model)?;
        }
        if let Some(dimension) = self.embedding_dimension {
            config.ollama.set_embedding_dimension(dimension)?;
        }
        if let Some(limit) = self.candidate_limit {
            config.search.set_candidate_limit(limit)?;
        }
        Ok(())
    }
}

/// Signal that fires on Ctrl-C
fn interrupt_signal() -> CancellationSignal {
    let signal = CancellationSignal::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    signal
}

async fn open_indexer(config: &Config) -> Result<Indexer> {
    let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(client);

    let indexer = Indexer::open(&config.store_dir(), embedder, config.chunking.clone())
        .await
        .with_context(|| {
            format!(
                "Failed to open knowledge base at {}",
                config.store_dir().display()
            )
        })?;

    Ok(indexer.with_batch_size(config.ollama.batch_size as usize))
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    println!("Knowledge base: {}", config.base_dir().display());
    println!("Config file: {}", config.config_file_path().display());
    println!();
    println!("[ollama]");
    println!("  URL: {}", config.ollama.ollama_url()?);
    println!("  Model: {}", config.ollama.model);
    println!("  Batch Size: {}", config.ollama.batch_size);
    println!("  Embedding Dimension: {}", config.ollama.embedding_dimension);
    println!("[chunking]");
    println!(
        "  Chunk Sizes: min {}, target {}, max {} tokens",
        config.chunking.min_chunk_size,
        config.chunking.target_chunk_size,
        config.chunking.max_chunk_size
    );
    println!("  Overlap: {} tokens", config.chunking.overlap_size);
    println!("[search]");
    println!("  Candidate Limit: {}", config.search.candidate_limit);
    Ok(())
}

/// Apply `update` to the stored configuration and write it back
#[inline]
pub fn update_config(mut config: Config, update: ConfigUpdate) -> Result<()> {
    if update.is_empty() {
        return show_config(&config);
    }

    let dimension_before = config.ollama.embedding_dimension;
    update.apply(&mut config)?;
    config.save()?;
    println!("Saved {}", config.config_file_path().display());

    if config.ollama.embedding_dimension != dimension_before && config.vector_index_path().exists()
    {
        println!(
            "Embedding dimension changed; delete {} and re-add your files to rebuild the index",
            config.vector_index_path().display()
        );
    }
    Ok(())
}

/// Ingest a markdown file and persist the knowledge base
#[inline]
pub async fn add_file(config: &Config, path: &Path, title: Option<String>) -> Result<()> {
    let markdown = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut file = KnowledgeFile::new(name).with_source(path.display().to_string());
    if let Some(title) = title {
        file = file.with_title(title);
    }

    let indexer = open_indexer(config).await?;
    let summary = indexer
        .ingest(file, &markdown, &interrupt_signal())
        .await
        .with_context(|| format!("Failed to index {}", path.display()))?;
    indexer.save(&config.store_dir()).await?;

    println!(
        "Added {} (ID: {})",
        summary.file.display_name(),
        summary.file.id
    );
    println!("  Sections: {}", summary.sections);
    println!("  Chunks: {}", summary.chunks);
    Ok(())
}

#[inline]
pub async fn search(config: &Config, query: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let indexer = open_indexer(config).await?;
    let searcher = indexer
        .searcher()
        .with_candidate_limit(config.search.candidate_limit);

    let response = searcher.search(query, limit, &interrupt_signal()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&indexer, &response).await?;
    }
    Ok(())
}

async fn print_response(indexer: &Indexer, response: &SearchResponse) -> Result<()> {
    if response.sections.is_empty() {
        println!("No results for '{}'", response.query);
        return Ok(());
    }

    println!(
        "Results for '{}' ({} sections):",
        response.query,
        response.sections.len()
    );
    println!();

    for (rank, ranked) in response.sections.iter().enumerate() {
        let file_name = indexer
            .store()
            .files()
            .get(&ranked.section.file_id)
            .await?
            .map(|file| file.display_name().to_string())
            .unwrap_or_else(|| ranked.section.file_id.clone());

        println!(
            "{}. {} > {} [{}%]",
            rank + 1,
            file_name,
            ranked.section.heading_path,
            ranked.metrics.relevance_score
        );
        println!(
            "   {} matched chunks, coverage {:.0}%, best similarity {:.3}",
            ranked.metrics.matched_chunks,
            ranked.metrics.coverage_factor * 100.0,
            ranked.metrics.max_similarity
        );
    }
    Ok(())
}

#[inline]
pub async fn list_files(config: &Config) -> Result<()> {
    let indexer = open_indexer(config).await?;
    let store = indexer.store();
    let files = store.files().list_all().await?;

    if files.is_empty() {
        println!("No files have been added yet.");
        println!("Use 'knowledge-rag add <path>' to add a markdown file.");
        return Ok(());
    }

    println!("Knowledge Files ({} total):", files.len());
    println!();

    for file in &files {
        let sections = store.sections().sections_for_file(&file.id).await?;
        let mut chunk_count = 0;
        for section in &sections {
            chunk_count += store.chunks().count_by_parent(&section.id).await?;
        }

        println!("{} (ID: {})", file.display_name(), file.id);
        if let Some(source) = &file.source {
            println!("   Source: {}", source);
        }
        println!("   Sections: {}", sections.len());
        println!("   Chunks: {}", chunk_count);
        println!(
            "   Added: {}",
            file.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }
    Ok(())
}

/// Delete a file and everything under it, then persist
#[inline]
pub async fn delete_file(config: &Config, file_id: &str) -> Result<()> {
    let indexer = open_indexer(config).await?;

    let Some(file) = indexer.store().files().get(file_id).await? else {
        anyhow::bail!("File not found: {}", file_id);
    };

    indexer.delete_file(file_id).await?;
    indexer.save(&config.store_dir()).await?;

    info!("Deleted file {}", file_id);
    println!("Deleted {} (ID: {})", file.display_name(), file.id);
    Ok(())
}

/// Report store sizes, index consistency, and Ollama reachability
#[inline]
/// Run the blocking Ollama health check on the blocking thread pool
async fn check_ollama(client: &OllamaClient) -> Result<()> {
    let client = client.clone();
    tokio::task::spawn_blocking(move || client.health_check())
        .await
        .context("Ollama health check task failed")?
}

pub async fn show_status(config: &Config, repair: bool) -> Result<()> {
    println!("Knowledge Base Status");
    println!("{}", "=".repeat(40));
    println!("Location: {}", config.store_dir().display());
    println!();

    println!("Ollama:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match check_ollama(&client).await {
            Ok(()) => {
                println!("   Connected ({})", client.base_url());
                println!("   Model: {}", client.model());
            }
            Err(e) => println!("   Unhealthy: {}", e),
        },
        Err(e) => println!("   Failed to create client: {}", e),
    }
    println!();

    let indexer = open_indexer(config).await?;
    let store = indexer.store();
    println!("Contents:");
    println!("   Files: {}", store.files().count().await?);
    println!("   Sections: {}", store.sections().count().await?);
    println!("   Chunks: {}", store.chunks().count().await?);
    println!(
        "   Vectors: {} ({} dimensions)",
        indexer.index().len().await,
        indexer.index().dimension()
    );
    println!();

    println!("Consistency:");
    let report = indexer.validate_consistency().await?;
    println!("   {}", report.summary());

    if !report.is_consistent {
        if repair {
            let resolved = indexer.repair(&report, &interrupt_signal()).await?;
            indexer.save(&config.store_dir()).await?;
            println!("   Repaired {} of {} issues", resolved, report.total_issues());
        } else {
            println!("   Run 'knowledge-rag status --repair' to fix them");
        }
    }
    Ok(())
}
