// Embeddings module
// Embedding provider contract, the Ollama implementation, and markdown chunking

pub mod chunking;
pub mod ollama;

pub use chunking::{
    ChunkingConfig, ContentChunk, ContentSection, chunk_section, embedding_text,
    estimate_token_count, split_sections,
};
pub use ollama::{DEFAULT_EMBEDDING_DIMENSION, OllamaClient};

use async_trait::async_trait;

use crate::{CancellationSignal, Result};

/// Turns text into embedding vectors
///
/// Implementations must return [`crate::KnowledgeError::Cancelled`] promptly once
/// `signal` fires.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str, signal: &CancellationSignal) -> Result<Vec<f32>>;

    /// Embed several texts, preserving input order
    #[inline]
    async fn embed_batch(
        &self,
        texts: &[String],
        signal: &CancellationSignal,
    ) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text, signal).await?);
        }
        Ok(embeddings)
    }

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}
