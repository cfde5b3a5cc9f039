// Indexer module
// Turns markdown documents into files, sections, and embedded chunks, and removes them again

pub mod consistency;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::database::{
    ChunkStore, HierarchyStore, KnowledgeFile, KnowledgeFileChunk, KnowledgeFileSection,
    KnowledgeStore, VECTOR_SNAPSHOT, VectorIndex,
};
use crate::embeddings::{
    ChunkingConfig, EmbeddingProvider, chunk_section, embedding_text, split_sections,
};
use crate::search::KnowledgeSearcher;
use crate::{CancellationSignal, KnowledgeError, Result};

pub use consistency::{ConsistencyReport, check_consistency};

const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;

/// Writes documents into the knowledge store and the vector index, keeping the two in step
pub struct Indexer {
    store: Arc<KnowledgeStore>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking_config: ChunkingConfig,
    batch_size: usize,
}

/// What one ingestion added
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSummary {
    pub file: KnowledgeFile,
    pub sections: usize,
    pub chunks: usize,
}

/// Entities prepared for one document before anything is written
struct PreparedDocument {
    sections: Vec<KnowledgeFileSection>,
    chunks: Vec<KnowledgeFileChunk>,
    embedding_texts: Vec<String>,
}

impl Indexer {
    /// Fails with `DimensionMismatch` when the provider and the index disagree on dimension
    #[inline]
    pub fn new(
        store: Arc<KnowledgeStore>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking_config: ChunkingConfig,
    ) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(KnowledgeError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dimension(),
            });
        }

        Ok(Self {
            store,
            index,
            embedder,
            chunking_config,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
        })
    }

    /// Restore the collections and vector index saved in `store_dir`
    ///
    /// Missing snapshots start empty; a fresh index takes the provider's dimension.
    #[inline]
    pub async fn open(
        store_dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking_config: ChunkingConfig,
    ) -> Result<Self> {
        let store = KnowledgeStore::new();
        store.load(store_dir).await?;

        let vector_path = store_dir.join(VECTOR_SNAPSHOT);
        let index = if tokio::fs::try_exists(&vector_path).await? {
            VectorIndex::open(&vector_path).await?
        } else {
            debug!("No vector snapshot in {}, starting empty", store_dir.display());
            VectorIndex::new(embedder.dimension())?
        };

        info!("Opened knowledge base at {}", store_dir.display());
        Self::new(
            Arc::new(store),
            Arc::new(index),
            embedder,
            chunking_config,
        )
    }

    /// Number of texts sent to the embedding provider per call
    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    #[inline]
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Searcher sharing this indexer's stores, index, and embedding provider
    #[inline]
    pub fn searcher(&self) -> KnowledgeSearcher {
        KnowledgeSearcher::for_store(
            &self.store,
            Arc::clone(&self.index),
            Arc::clone(&self.embedder),
        )
    }

    /// Persist every collection and the vector index into `store_dir`
    #[inline]
    pub async fn save(&self, store_dir: &Path) -> Result<()> {
        self.store.save(store_dir).await?;
        self.index.save(&store_dir.join(VECTOR_SNAPSHOT)).await?;
        info!("Saved knowledge base to {}", store_dir.display());
        Ok(())
    }

    /// Ingest a markdown document stored under `name`
    #[inline]
    pub async fn ingest_markdown(
        &self,
        name: &str,
        markdown: &str,
        source: Option<&str>,
        signal: &CancellationSignal,
    ) -> Result<IngestSummary> {
        let file = KnowledgeFile::new(name);
        let file = match source {
            Some(source) => file.with_source(source),
            None => file,
        };
        self.ingest(file, markdown, signal).await
    }

    /// Split, chunk, and embed `markdown`, then record it under `file`
    ///
    /// Embedding happens before anything is written. If a write fails afterwards, the
    /// entities already added for this file are removed again.
    #[inline]
    pub async fn ingest(
        &self,
        file: KnowledgeFile,
        markdown: &str,
        signal: &CancellationSignal,
    ) -> Result<IngestSummary> {
        if file.name.trim().is_empty() {
            return Err(KnowledgeError::InvalidInput(
                "file name must not be empty".to_string(),
            ));
        }
        if signal.is_cancelled() {
            return Err(KnowledgeError::Cancelled);
        }

        info!("Indexing {}", file.display_name());

        let prepared = self.prepare(&file, markdown);
        let embeddings = self.embed_all(&prepared.embedding_texts, signal).await?;

        let summary = IngestSummary {
            file: file.clone(),
            sections: prepared.sections.len(),
            chunks: prepared.chunks.len(),
        };

        let file_id = file.id.clone();
        if let Err(e) = self.write_document(file, prepared, embeddings).await {
            error!("Failed to record {}, rolling back: {}", file_id, e);
            if let Err(cleanup) = self.delete_file(&file_id).await {
                warn!("Rollback of {} incomplete: {}", file_id, cleanup);
            }
            return Err(e);
        }

        info!(
            "Indexed {}: {} sections, {} chunks",
            summary.file.display_name(),
            summary.sections,
            summary.chunks
        );
        Ok(summary)
    }

    fn prepare(&self, file: &KnowledgeFile, markdown: &str) -> PreparedDocument {
        let title = file.display_name();
        let mut prepared = PreparedDocument {
            sections: Vec::new(),
            chunks: Vec::new(),
            embedding_texts: Vec::new(),
        };

        for content_section in split_sections(markdown, title) {
            let chunks = chunk_section(&content_section, &self.chunking_config);
            if chunks.is_empty() {
                continue;
            }

            let section = KnowledgeFileSection::new(
                file,
                content_section.heading_path,
                content_section.heading_level,
            );
            for chunk in chunks {
                prepared.embedding_texts.push(embedding_text(
                    title,
                    &section.heading_path,
                    &chunk.content,
                ));
                prepared
                    .chunks
                    .push(KnowledgeFileChunk::new(&section, chunk.content));
            }
            prepared.sections.push(section);
        }

        debug!(
            "Prepared {} sections and {} chunks for {}",
            prepared.sections.len(),
            prepared.chunks.len(),
            title
        );
        prepared
    }

    async fn embed_all(
        &self,
        texts: &[String],
        signal: &CancellationSignal,
    ) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let batch_embeddings = self.embedder.embed_batch(batch, signal).await?;
            if batch_embeddings.len() != batch.len() {
                return Err(KnowledgeError::Embedding(format!(
                    "{} returned {} embeddings for {} texts",
                    self.embedder.name(),
                    batch_embeddings.len(),
                    batch.len()
                )));
            }
            embeddings.extend(batch_embeddings);
            debug!("Embedded {}/{} chunks", embeddings.len(), texts.len());
        }

        Ok(embeddings)
    }

    async fn write_document(
        &self,
        file: KnowledgeFile,
        prepared: PreparedDocument,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<()> {
        self.store.files().add(file).await?;

        for section in prepared.sections {
            self.store.sections().add(section).await?;
        }

        for (mut chunk, embedding) in prepared.chunks.into_iter().zip(embeddings) {
            self.index.add(&chunk.id, embedding.clone()).await?;
            chunk.embedding = Some(embedding);
            self.store.chunks().add(chunk).await?;
        }

        Ok(())
    }

    /// Remove a file with its sections, chunks, and vectors
    ///
    /// The stores never cascade on their own, so each level is deleted explicitly.
    /// Returns whether a file record existed.
    #[inline]
    pub async fn delete_file(&self, file_id: &str) -> Result<bool> {
        let chunk_ids: Vec<String> = self
            .store
            .chunks()
            .list_all()
            .await?
            .into_iter()
            .filter(|chunk| chunk.file_id == file_id)
            .map(|chunk| chunk.id)
            .collect();

        for chunk_id in &chunk_ids {
            self.index.remove(chunk_id).await;
        }

        self.store.chunks().delete_by_file(file_id).await?;
        self.store.sections().delete_by_parent(file_id).await?;
        let existed = self.store.files().delete(file_id).await?;

        if existed {
            info!(
                "Deleted file {} with {} chunks",
                file_id,
                chunk_ids.len()
            );
        } else {
            debug!("No file {} to delete", file_id);
        }
        Ok(existed)
    }

    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        check_consistency(&self.store, &self.index).await
    }

    /// Fix what a consistency report found
    ///
    /// Orphaned vectors and records without a parent are removed; chunks missing from
    /// the index are re-indexed from their stored embedding, or re-embedded if they
    /// have none. Returns the number of issues resolved.
    #[inline]
    pub async fn repair(
        &self,
        report: &ConsistencyReport,
        signal: &CancellationSignal,
    ) -> Result<usize> {
        if report.is_consistent {
            info!("Knowledge base is consistent, no repair needed");
            return Ok(0);
        }

        let mut resolved = 0;

        for vector_id in &report.orphaned_vectors {
            if self.index.remove(vector_id).await {
                resolved += 1;
            }
        }

        for chunk_id in &report.chunks_missing_section {
            self.index.remove(chunk_id).await;
            if self.store.chunks().delete(chunk_id).await? {
                resolved += 1;
            }
        }

        for section_id in &report.sections_missing_file {
            let chunk_ids: Vec<String> = self
                .store
                .chunks()
                .list_by_parent(section_id)
                .await?
                .into_iter()
                .map(|chunk| chunk.id)
                .collect();
            for chunk_id in &chunk_ids {
                self.index.remove(chunk_id).await;
            }
            self.store.chunks().delete_by_parent(section_id).await?;
            if self.store.sections().delete(section_id).await? {
                resolved += 1;
            }
        }

        for chunk_id in &report.chunks_missing_vectors {
            let Some(mut chunk) = self.store.chunks().get(chunk_id).await? else {
                continue;
            };

            let embedding = match chunk.embedding.take() {
                Some(embedding) if embedding.len() == self.index.dimension() => embedding,
                _ => {
                    let text = self.chunk_embedding_text(&chunk).await?;
                    self.embedder.embed(&text, signal).await?
                }
            };
            self.index.add(&chunk.id, embedding.clone()).await?;
            chunk.embedding = Some(embedding);
            self.store.chunks().add(chunk).await?;
            resolved += 1;
        }

        info!("Repaired {} consistency issues", resolved);
        Ok(resolved)
    }

    /// Rebuild the text a chunk was embedded from at ingest time
    async fn chunk_embedding_text(&self, chunk: &KnowledgeFileChunk) -> Result<String> {
        let file = self.store.files().get(&chunk.file_id).await?;
        let section = self.store.sections().get(&chunk.section_id).await?;

        let text = match (file, section) {
            (Some(file), Some(section)) => {
                embedding_text(file.display_name(), &section.heading_path, &chunk.content)
            }
            (Some(file), None) => {
                embedding_text(file.display_name(), file.display_name(), &chunk.content)
            }
            _ => {
                warn!("Chunk {} has lost its file, embedding bare content", chunk.id);
                chunk.content.clone()
            }
        };
        Ok(text)
    }
}
