// Storage layer
// In-memory knowledge hierarchy (JSON snapshots) and exact vector index (binary snapshots)


pub mod knowledge_store;
pub mod vector_index;

pub use knowledge_store::{
    ChunkStore, FileStore, HierarchyEntity, HierarchyStore, KnowledgeFile, KnowledgeFileChunk,
    KnowledgeFileSection, KnowledgeStore, MemoryChunkStore, MemoryFileStore, MemorySectionStore,
    ROOT_PARENT, SectionStore,
};
pub use knowledge_store::{CHUNKS_SNAPSHOT, FILES_SNAPSHOT, SECTIONS_SNAPSHOT};
pub use vector_index::{VECTOR_SNAPSHOT, VectorIndex, VectorMatch, cosine_similarity};

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{KnowledgeError, Result};

/// Write a snapshot next to its destination and rename it into place
///
/// A crash mid-write leaves the previous snapshot intact. Each write goes through its
/// own uniquely named temporary file, so concurrent saves to one path never collide.
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&directory).await.map_err(|e| {
        KnowledgeError::Persistence(format!(
            "Failed to create snapshot directory {}: {}",
            directory.display(),
            e
        ))
    })?;

    let destination = path.to_path_buf();
    let contents = bytes.to_vec();
    tokio::task::spawn_blocking(move || persist_snapshot(&directory, &destination, &contents))
        .await
        .map_err(|e| KnowledgeError::Persistence(format!("Snapshot write task failed: {}", e)))??;

    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

fn persist_snapshot(directory: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let write_error = |e: std::io::Error| {
        KnowledgeError::Persistence(format!("Failed to write snapshot {}: {}", path.display(), e))
    };

    let mut temp_file = NamedTempFile::new_in(directory).map_err(write_error)?;
    temp_file.write_all(bytes).map_err(write_error)?;
    temp_file.as_file().sync_all().map_err(write_error)?;

    temp_file.persist(path).map_err(|e| {
        KnowledgeError::Persistence(format!(
            "Failed to move snapshot into place at {}: {}",
            path.display(),
            e.error
        ))
    })?;
    Ok(())
}
