// Consistency validation
// Cross-checks the knowledge hierarchy against itself and against the vector index

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::{HierarchyStore, KnowledgeStore, VectorIndex};

/// Result of comparing the stores with the vector index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub chunk_count: usize,
    pub vector_count: usize,
    /// Chunk ids with no vector in the index
    pub chunks_missing_vectors: Vec<String>,
    /// Vector ids with no chunk record
    pub orphaned_vectors: Vec<String>,
    /// Section ids whose file record is gone
    pub sections_missing_file: Vec<String>,
    /// Chunk ids whose section record is gone
    pub chunks_missing_section: Vec<String>,
    pub is_consistent: bool,
}

/// Walk every collection and the index, collecting dangling references
///
/// Ids are reported in store order so repeated checks print identically.
#[inline]
pub async fn check_consistency(
    store: &KnowledgeStore,
    index: &VectorIndex,
) -> Result<ConsistencyReport> {
    info!("Starting knowledge base consistency validation");

    let file_ids: HashSet<String> = store
        .files()
        .list_all()
        .await?
        .into_iter()
        .map(|file| file.id)
        .collect();
    let sections = store.sections().list_all().await?;
    let chunks = store.chunks().list_all().await?;
    let vector_ids = index.ids().await;

    debug!(
        "Checking {} files, {} sections, {} chunks, {} vectors",
        file_ids.len(),
        sections.len(),
        chunks.len(),
        vector_ids.len()
    );

    let section_ids: HashSet<&str> = sections.iter().map(|s| s.id.as_str()).collect();
    let chunk_ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
    let indexed: HashSet<&str> = vector_ids.iter().map(String::as_str).collect();

    let sections_missing_file: Vec<String> = sections
        .iter()
        .filter(|section| !file_ids.contains(&section.file_id))
        .map(|section| section.id.clone())
        .collect();

    let chunks_missing_section: Vec<String> = chunks
        .iter()
        .filter(|chunk| !section_ids.contains(chunk.section_id.as_str()))
        .map(|chunk| chunk.id.clone())
        .collect();

    let chunks_missing_vectors: Vec<String> = chunks
        .iter()
        .filter(|chunk| !indexed.contains(chunk.id.as_str()))
        .map(|chunk| chunk.id.clone())
        .collect();

    let orphaned_vectors: Vec<String> = vector_ids
        .iter()
        .filter(|id| !chunk_ids.contains(id.as_str()))
        .cloned()
        .collect();

    let is_consistent = chunks_missing_vectors.is_empty()
        && orphaned_vectors.is_empty()
        && sections_missing_file.is_empty()
        && chunks_missing_section.is_empty();

    let report = ConsistencyReport {
        chunk_count: chunks.len(),
        vector_count: vector_ids.len(),
        chunks_missing_vectors,
        orphaned_vectors,
        sections_missing_file,
        chunks_missing_section,
        is_consistent,
    };

    if report.is_consistent {
        info!("Knowledge base consistency validation passed");
    } else {
        warn!("Knowledge base consistency validation found issues");
        report.log_issues();
    }

    Ok(report)
}

impl ConsistencyReport {
    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Knowledge base is consistent: {} chunks, {} vectors",
                self.chunk_count, self.vector_count
            )
        } else {
            format!(
                "Knowledge base inconsistencies found: {} chunks without vectors, {} orphaned vectors, {} sections without a file, {} chunks without a section",
                self.chunks_missing_vectors.len(),
                self.orphaned_vectors.len(),
                self.sections_missing_file.len(),
                self.chunks_missing_section.len()
            )
        }
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.chunks_missing_vectors.len()
            + self.orphaned_vectors.len()
            + self.sections_missing_file.len()
            + self.chunks_missing_section.len()
    }

    fn log_issues(&self) {
        if !self.chunks_missing_vectors.is_empty() {
            warn!(
                "Found {} chunks missing from the vector index",
                self.chunks_missing_vectors.len()
            );
        }

        if !self.orphaned_vectors.is_empty() {
            warn!(
                "Found {} vectors with no chunk record",
                self.orphaned_vectors.len()
            );
        }

        if !self.sections_missing_file.is_empty() {
            warn!(
                "Found {} sections whose file was deleted",
                self.sections_missing_file.len()
            );
        }

        if !self.chunks_missing_section.is_empty() {
            warn!(
                "Found {} chunks whose section was deleted",
                self.chunks_missing_section.len()
            );
        }
    }
}
