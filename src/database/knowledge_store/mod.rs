
pub mod models;

pub use models::{
    HierarchyEntity, KnowledgeFile, KnowledgeFileChunk, KnowledgeFileSection, ROOT_PARENT,
};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::write_atomically;
use crate::{KnowledgeError, Result};

pub const FILES_SNAPSHOT: &str = "files.json";
pub const SECTIONS_SNAPSHOT: &str = "sections.json";
pub const CHUNKS_SNAPSHOT: &str = "chunks.json";

/// Operations shared by the file, section, and chunk stores
///
/// Children are kept in insertion order per parent id; `index` arguments are
/// positions in that sequence. Lookups of missing ids or out-of-range
/// positions return `Ok(None)` rather than an error. Deletions never cascade
/// to further descendants.
#[async_trait]
pub trait HierarchyStore<T: HierarchyEntity>: Send + Sync {
    /// Insert `entity`, replacing any existing entity with the same id
    async fn add(&self, entity: T) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<T>>;

    async fn get_by_index(&self, parent_id: &str, index: usize) -> Result<Option<T>>;

    /// Sibling that follows position `index`
    async fn get_next(&self, parent_id: &str, index: usize) -> Result<Option<T>>;

    /// Sibling that precedes position `index`
    async fn get_previous(&self, parent_id: &str, index: usize) -> Result<Option<T>>;

    /// Remove a single entity, returning whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Remove every child of `parent_id`, returning whether anything was removed
    async fn delete_by_parent(&self, parent_id: &str) -> Result<bool>;

    async fn exists(&self, id: &str) -> Result<bool>;

    /// Every entity in insertion order
    async fn list_all(&self) -> Result<Vec<T>>;

    /// Children of `parent_id` in sequence order
    async fn list_by_parent(&self, parent_id: &str) -> Result<Vec<T>>;

    async fn count_by_parent(&self, parent_id: &str) -> Result<usize>;

    async fn count(&self) -> Result<usize>;
}

#[async_trait]
pub trait FileStore: HierarchyStore<KnowledgeFile> {
    /// Replace an existing file record; fails with `NotFound` if the id is unknown
    async fn update(&self, file: KnowledgeFile) -> Result<()>;
}

#[async_trait]
pub trait SectionStore: HierarchyStore<KnowledgeFileSection> {
    #[inline]
    async fn sections_for_file(&self, file_id: &str) -> Result<Vec<KnowledgeFileSection>> {
        self.list_by_parent(file_id).await
    }
}

#[async_trait]
pub trait ChunkStore: HierarchyStore<KnowledgeFileChunk> {
    /// Remove every chunk owned by `file_id`, returning whether anything was removed
    async fn delete_by_file(&self, file_id: &str) -> Result<bool>;
}

/// Entities plus the derived parent index
#[derive(Debug)]
struct Collection<T> {
    entities: HashMap<String, T>,
    order: Vec<String>,
    children: HashMap<String, Vec<String>>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            entities: HashMap::new(),
            order: Vec::new(),
            children: HashMap::new(),
        }
    }
}

impl<T: HierarchyEntity> Collection<T> {
    fn from_entities(entities: Vec<T>) -> Result<Self> {
        let mut collection = Self::default();
        for entity in entities {
            entity.validate().map_err(|e| {
                KnowledgeError::Persistence(format!("Invalid {} in snapshot: {}", T::KIND, e))
            })?;
            collection.upsert(entity);
        }
        Ok(collection)
    }

    /// Caller must have validated `entity`
    fn upsert(&mut self, entity: T) {
        let id = entity.id().to_string();
        let parent_id = entity.parent_id().to_string();

        match self.entities.get(&id) {
            Some(existing) if existing.parent_id() == parent_id => {}
            Some(existing) => {
                let previous_parent = existing.parent_id().to_string();
                self.detach_child(&previous_parent, &id);
                self.children.entry(parent_id).or_default().push(id.clone());
            }
            None => {
                self.order.push(id.clone());
                self.children.entry(parent_id).or_default().push(id.clone());
            }
        }

        self.entities.insert(id, entity);
    }

    fn remove(&mut self, id: &str) -> Option<T> {
        let entity = self.entities.remove(id)?;
        self.order.retain(|existing| existing != id);
        self.detach_child(entity.parent_id(), id);
        Some(entity)
    }

    fn remove_children(&mut self, parent_id: &str) -> usize {
        let Some(child_ids) = self.children.remove(parent_id) else {
            return 0;
        };

        let removed: HashSet<String> = child_ids
            .into_iter()
            .filter(|id| self.entities.remove(id).is_some())
            .collect();
        self.order.retain(|id| !removed.contains(id));
        removed.len()
    }

    fn remove_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        let doomed: Vec<String> = self
            .order
            .iter()
            .filter(|id| self.entities.get(*id).is_some_and(&predicate))
            .cloned()
            .collect();
        for id in &doomed {
            self.remove(id);
        }
        doomed.len()
    }

    fn detach_child(&mut self, parent_id: &str, id: &str) {
        if let Some(siblings) = self.children.get_mut(parent_id) {
            siblings.retain(|existing| existing != id);
            if siblings.is_empty() {
                self.children.remove(parent_id);
            }
        }
    }

    fn child_at(&self, parent_id: &str, index: usize) -> Option<T> {
        self.children
            .get(parent_id)
            .and_then(|siblings| siblings.get(index))
            .and_then(|id| self.entities.get(id))
            .cloned()
    }

    fn children_of(&self, parent_id: &str) -> Vec<T> {
        self.children
            .get(parent_id)
            .map(|siblings| {
                siblings
                    .iter()
                    .filter_map(|id| self.entities.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn ordered(&self) -> Vec<&T> {
        self.order
            .iter()
            .filter_map(|id| self.entities.get(id))
            .collect()
    }
}

/// In-memory store guarded by a reader-writer lock, persisted as a JSON array
///
/// Every mutation completes while the write guard is held, so concurrent
/// callers never observe a half-updated parent index.
#[derive(Debug)]
pub struct MemoryStore<T> {
    collection: RwLock<Collection<T>>,
}

pub type MemoryFileStore = MemoryStore<KnowledgeFile>;
pub type MemorySectionStore = MemoryStore<KnowledgeFileSection>;
pub type MemoryChunkStore = MemoryStore<KnowledgeFileChunk>;

impl<T: HierarchyEntity> MemoryStore<T> {
    #[inline]
    pub fn new() -> Self {
        Self {
            collection: RwLock::new(Collection::default()),
        }
    }

    #[inline]
    pub async fn clear(&self) {
        *self.collection.write().await = Collection::default();
    }

    /// Write every entity to `path` as one JSON array in insertion order
    #[inline]
    pub async fn save(&self, path: &Path) -> Result<()> {
        let (bytes, count) = {
            let collection = self.collection.read().await;
            let ordered = collection.ordered();
            (serde_json::to_vec_pretty(&ordered)?, ordered.len())
        };

        write_atomically(path, &bytes).await?;
        info!(
            "Saved {} {} records to {}",
            count,
            T::KIND.to_lowercase(),
            path.display()
        );
        Ok(())
    }

    /// Replace the current contents with the snapshot at `path`
    ///
    /// Both the primary map and the parent index are rebuilt from the array,
    /// whose element order becomes the sequence order.
    #[inline]
    pub async fn load(&self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            KnowledgeError::Persistence(format!(
                "Failed to read {} snapshot {}: {}",
                T::KIND.to_lowercase(),
                path.display(),
                e
            ))
        })?;

        let entities: Vec<T> = serde_json::from_slice(&bytes).map_err(|e| {
            KnowledgeError::Persistence(format!(
                "Failed to parse {} snapshot {}: {}",
                T::KIND.to_lowercase(),
                path.display(),
                e
            ))
        })?;

        let rebuilt = Collection::from_entities(entities)?;
        let count = rebuilt.order.len();
        *self.collection.write().await = rebuilt;

        info!(
            "Loaded {} {} records from {}",
            count,
            T::KIND.to_lowercase(),
            path.display()
        );
        Ok(())
    }

    async fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool + Send,
    {
        self.collection.write().await.remove_where(predicate)
    }
}

impl<T: HierarchyEntity> Default for MemoryStore<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: HierarchyEntity + 'static> HierarchyStore<T> for MemoryStore<T> {
    #[inline]
    async fn add(&self, entity: T) -> Result<()> {
        entity.validate()?;
        debug!("Adding {} {}", T::KIND.to_lowercase(), entity.id());
        self.collection.write().await.upsert(entity);
        Ok(())
    }

    #[inline]
    async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.collection.read().await.entities.get(id).cloned())
    }

    #[inline]
    async fn get_by_index(&self, parent_id: &str, index: usize) -> Result<Option<T>> {
        Ok(self.collection.read().await.child_at(parent_id, index))
    }

    #[inline]
    async fn get_next(&self, parent_id: &str, index: usize) -> Result<Option<T>> {
        let Some(next) = index.checked_add(1) else {
            return Ok(None);
        };
        self.get_by_index(parent_id, next).await
    }

    #[inline]
    async fn get_previous(&self, parent_id: &str, index: usize) -> Result<Option<T>> {
        let Some(previous) = index.checked_sub(1) else {
            return Ok(None);
        };
        self.get_by_index(parent_id, previous).await
    }

    #[inline]
    async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.collection.write().await.remove(id).is_some();
        if removed {
            debug!("Deleted {} {}", T::KIND.to_lowercase(), id);
        }
        Ok(removed)
    }

    #[inline]
    async fn delete_by_parent(&self, parent_id: &str) -> Result<bool> {
        let removed = self.collection.write().await.remove_children(parent_id);
        if removed > 0 {
            debug!(
                "Deleted {} {} records under {}",
                removed,
                T::KIND.to_lowercase(),
                parent_id
            );
        }
        Ok(removed > 0)
    }

    #[inline]
    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.collection.read().await.entities.contains_key(id))
    }

    #[inline]
    async fn list_all(&self) -> Result<Vec<T>> {
        Ok(self
            .collection
            .read()
            .await
            .ordered()
            .into_iter()
            .cloned()
            .collect())
    }

    #[inline]
    async fn list_by_parent(&self, parent_id: &str) -> Result<Vec<T>> {
        Ok(self.collection.read().await.children_of(parent_id))
    }

    #[inline]
    async fn count_by_parent(&self, parent_id: &str) -> Result<usize> {
        Ok(self
            .collection
            .read()
            .await
            .children
            .get(parent_id)
            .map_or(0, Vec::len))
    }

    #[inline]
    async fn count(&self) -> Result<usize> {
        Ok(self.collection.read().await.order.len())
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    #[inline]
    async fn update(&self, file: KnowledgeFile) -> Result<()> {
        file.validate()?;
        let mut collection = self.collection.write().await;
        if !collection.entities.contains_key(&file.id) {
            return Err(KnowledgeError::NotFound {
                kind: KnowledgeFile::KIND,
                id: file.id,
            });
        }
        debug!("Updating file {}", file.id);
        collection.upsert(file);
        Ok(())
    }
}

#[async_trait]
impl SectionStore for MemorySectionStore {}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    #[inline]
    async fn delete_by_file(&self, file_id: &str) -> Result<bool> {
        let removed = self.remove_where(|chunk| chunk.file_id == file_id).await;
        if removed > 0 {
            debug!("Deleted {} chunks of file {}", removed, file_id);
        }
        Ok(removed > 0)
    }
}

/// The three collections that make up the knowledge hierarchy
///
/// Each collection is locked independently and shared through `Arc`, so
/// searchers can hold the section and chunk stores as trait objects.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    files: Arc<MemoryFileStore>,
    sections: Arc<MemorySectionStore>,
    chunks: Arc<MemoryChunkStore>,
}

impl KnowledgeStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn files(&self) -> &Arc<MemoryFileStore> {
        &self.files
    }

    #[inline]
    pub fn sections(&self) -> &Arc<MemorySectionStore> {
        &self.sections
    }

    #[inline]
    pub fn chunks(&self) -> &Arc<MemoryChunkStore> {
        &self.chunks
    }

    /// Save all three collections into `dir`
    #[inline]
    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.files.save(&dir.join(FILES_SNAPSHOT)).await?;
        self.sections.save(&dir.join(SECTIONS_SNAPSHOT)).await?;
        self.chunks.save(&dir.join(CHUNKS_SNAPSHOT)).await?;
        Ok(())
    }

    /// Load all three collections from `dir`; a missing snapshot leaves its collection empty
    #[inline]
    pub async fn load(&self, dir: &Path) -> Result<()> {
        load_or_clear(&self.files, &dir.join(FILES_SNAPSHOT)).await?;
        load_or_clear(&self.sections, &dir.join(SECTIONS_SNAPSHOT)).await?;
        load_or_clear(&self.chunks, &dir.join(CHUNKS_SNAPSHOT)).await?;
        Ok(())
    }
}

async fn load_or_clear<T: HierarchyEntity>(store: &MemoryStore<T>, path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path).await? {
        store.load(path).await
    } else {
        debug!("No snapshot at {}, starting empty", path.display());
        store.clear().await;
        Ok(())
    }
}
