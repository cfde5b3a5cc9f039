// Query pipeline: embed, retrieve candidates, hydrate, group by section, score, rank


pub mod relevance;

pub use relevance::{RelevanceMetrics, score_section};

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::database::{
    ChunkStore, HierarchyStore, KnowledgeFileChunk, KnowledgeFileSection, KnowledgeStore,
    MemoryChunkStore, MemorySectionStore, SectionStore, VectorIndex, VectorMatch, cosine_similarity,
};
use crate::embeddings::EmbeddingProvider;
use crate::{CancellationSignal, KnowledgeError};

/// A section and how well it matched the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedSection {
    pub section: KnowledgeFileSection,
    pub metrics: RelevanceMetrics,
}

/// Successful query outcome, sections ordered best first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub sections: Vec<RankedSection>,
}

/// Failed query outcome
///
/// Carries no partial results. `retryable` is false only when the query itself was unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Search for '{query}' failed: {message}")]
pub struct QueryFailure {
    pub query: String,
    pub message: String,
    pub retryable: bool,
}

impl QueryFailure {
    fn from_error(query: &str, error: &KnowledgeError) -> Self {
        let (message, retryable) = match error {
            KnowledgeError::Cancelled => ("Search cancelled".to_string(), true),
            KnowledgeError::InvalidInput(_) => (error.to_string(), false),
            _ => (error.to_string(), true),
        };

        Self {
            query: query.to_string(),
            message,
            retryable,
        }
    }
}

pub type SearchResult = std::result::Result<SearchResponse, QueryFailure>;

/// Hydrated candidate with its exact similarity to the query
struct ScoredChunk {
    chunk: KnowledgeFileChunk,
    similarity: f32,
}

/// Runs queries against a knowledge store and its vector index
///
/// Holds no per-query state, so one searcher can serve concurrent queries.
pub struct KnowledgeSearcher {
    sections: Arc<dyn SectionStore>,
    chunks: Arc<dyn ChunkStore>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    candidate_limit: usize,
}

impl KnowledgeSearcher {
    #[inline]
    pub fn new(
        sections: Arc<dyn SectionStore>,
        chunks: Arc<dyn ChunkStore>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            sections,
            chunks,
            index,
            embedder,
            candidate_limit: SearchConfig::default().candidate_limit,
        }
    }

    /// Searcher over the in-memory stores of `store`
    #[inline]
    pub fn for_store(
        store: &KnowledgeStore,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let sections: Arc<MemorySectionStore> = Arc::clone(store.sections());
        let chunks: Arc<MemoryChunkStore> = Arc::clone(store.chunks());
        Self::new(sections, chunks, index, embedder)
    }

    /// Default number of candidates fetched when a query gives no limit
    #[inline]
    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit;
        self
    }

    #[inline]
    pub fn candidate_limit(&self) -> usize {
        self.candidate_limit
    }

    /// Answer `query`, ranking the sections whose chunks are nearest to it
    ///
    /// `limit` overrides the number of candidate chunks pulled from the index. Every
    /// failure along the way, including cancellation through `signal`, is reported as
    /// a [`QueryFailure`].
    #[inline]
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        signal: &CancellationSignal,
    ) -> SearchResult {
        if query.trim().is_empty() {
            let error = KnowledgeError::InvalidInput("query must not be empty".to_string());
            return Err(QueryFailure::from_error(query, &error));
        }

        let limit = limit.unwrap_or(self.candidate_limit);
        debug!("Searching for '{}' with {} candidates", query, limit);

        let outcome = tokio::select! {
            biased;
            () = signal.cancelled() => Err(KnowledgeError::Cancelled),
            ranked = self.rank_sections(query, limit, signal) => ranked,
        };

        match outcome {
            Ok(sections) => {
                info!(
                    "Search for '{}' returned {} sections",
                    query,
                    sections.len()
                );
                Ok(SearchResponse {
                    query: query.to_string(),
                    sections,
                })
            }
            Err(error) => {
                warn!("Search for '{}' failed: {}", query, error);
                Err(QueryFailure::from_error(query, &error))
            }
        }
    }

    async fn rank_sections(
        &self,
        query: &str,
        limit: usize,
        signal: &CancellationSignal,
    ) -> crate::Result<Vec<RankedSection>> {
        let query_vector = self.embedder.embed(query, signal).await?;
        let candidates = self.index.search(&query_vector, limit).await?;
        let hydrated = self.hydrate(&candidates, &query_vector).await?;

        let pool: Vec<f32> = hydrated.iter().map(|scored| scored.similarity).collect();

        let mut ranked = Vec::new();
        for (section_id, scores) in group_by_section(&hydrated) {
            let total_chunks = self.chunks.count_by_parent(&section_id).await?;
            let metrics = score_section(&scores, &pool, total_chunks);

            match self.sections.get(&section_id).await? {
                Some(section) => ranked.push(RankedSection { section, metrics }),
                None => debug!("Dropping result for missing section {}", section_id),
            }
        }

        // Stable: sections with equal scores keep first-appearance order
        ranked.sort_by(|a, b| {
            b.metrics
                .normalized_score
                .total_cmp(&a.metrics.normalized_score)
        });

        Ok(ranked)
    }

    /// Fetch the chunk behind each candidate and rescore it against the query
    ///
    /// Candidates whose chunk is gone or carries no usable embedding are skipped.
    async fn hydrate(
        &self,
        candidates: &[VectorMatch],
        query_vector: &[f32],
    ) -> crate::Result<Vec<ScoredChunk>> {
        let lookups = join_all(
            candidates
                .iter()
                .map(|candidate| self.chunks.get(&candidate.id)),
        )
        .await;

        let mut hydrated = Vec::with_capacity(candidates.len());
        for (candidate, lookup) in candidates.iter().zip(lookups) {
            let Some(chunk) = lookup? else {
                debug!("Skipping candidate {} with no chunk record", candidate.id);
                continue;
            };

            let similarity = match chunk.embedding.as_deref() {
                Some(embedding) if embedding.len() == query_vector.len() => {
                    cosine_similarity(query_vector, embedding)
                }
                _ => {
                    debug!("Skipping chunk {} without a usable embedding", chunk.id);
                    continue;
                }
            };

            hydrated.push(ScoredChunk { chunk, similarity });
        }

        debug!(
            "Hydrated {} of {} candidates",
            hydrated.len(),
            candidates.len()
        );
        Ok(hydrated)
    }
}

/// Similarities per section id, sections in order of first appearance
fn group_by_section(scored: &[ScoredChunk]) -> Vec<(String, Vec<f32>)> {
    let mut groups: Vec<(String, Vec<f32>)> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for item in scored {
        let section_id = item.chunk.section_id.as_str();
        match positions.get(section_id) {
            Some(&position) => groups[position].1.push(item.similarity),
            None => {
                positions.insert(section_id, groups.len());
                groups.push((section_id.to_string(), vec![item.similarity]));
            }
        }
    }

    groups
}
