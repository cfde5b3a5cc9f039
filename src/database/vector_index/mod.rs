
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::write_atomically;
use crate::{KnowledgeError, Result};

/// File name of the vector snapshot inside a store directory
pub const VECTOR_SNAPSHOT: &str = "vectors.bin";

const SNAPSHOT_MAGIC: &[u8; 4] = b"KVIX";
const SNAPSHOT_VERSION: u16 = 1;

/// Exact nearest-neighbor index over fixed-dimension embeddings
///
/// Every search is a linear scan scoring each stored vector by cosine
/// similarity. Entries keep their insertion order, which is also the
/// tie-break order for equal scores.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    entries: RwLock<IndexEntries>,
}

/// A single search hit
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub similarity: f32,
}

#[derive(Debug, Default)]
struct IndexEntries {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    positions: HashMap<String, usize>,
}

impl IndexEntries {
    fn upsert(&mut self, id: String, vector: Vec<f32>) -> bool {
        if let Some(&position) = self.positions.get(&id) {
            self.vectors[position] = vector;
            return false;
        }

        self.positions.insert(id.clone(), self.ids.len());
        self.ids.push(id);
        self.vectors.push(vector);
        true
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(position) = self.positions.remove(id) else {
            return false;
        };

        self.ids.remove(position);
        self.vectors.remove(position);
        for (offset, id) in self.ids.iter().enumerate().skip(position) {
            self.positions.insert(id.clone(), offset);
        }
        true
    }
}

impl VectorIndex {
    /// Create an empty index accepting vectors of exactly `dimension` values
    #[inline]
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(KnowledgeError::InvalidInput(
                "Vector dimension must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            dimension,
            entries: RwLock::new(IndexEntries::default()),
        })
    }

    /// Open a snapshot written by [`VectorIndex::save`], taking its dimension from the file
    #[inline]
    pub async fn open(path: &Path) -> Result<Self> {
        let bytes = read_snapshot(path).await?;
        let (dimension, records) = decode_snapshot(&bytes)?;
        let index = Self::new(dimension)?;
        {
            let mut entries = index.entries.write().await;
            for (id, vector) in records {
                entries.upsert(id, vector);
            }
        }
        info!(
            "Opened vector index from {} ({} dimensions)",
            path.display(),
            dimension
        );
        Ok(index)
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or overwrite the vector stored under `id`
    ///
    /// Overwriting keeps the entry's original insertion position.
    #[inline]
    pub async fn add(&self, id: &str, vector: Vec<f32>) -> Result<()> {
        if id.is_empty() {
            return Err(KnowledgeError::InvalidInput(
                "Vector id cannot be empty".to_string(),
            ));
        }
        self.check_dimension(&vector)?;

        let inserted = self.entries.write().await.upsert(id.to_string(), vector);
        debug!(
            "{} vector {}",
            if inserted { "Inserted" } else { "Replaced" },
            id
        );
        Ok(())
    }

    /// Remove the vector stored under `id`, returning whether one existed
    #[inline]
    pub async fn remove(&self, id: &str) -> bool {
        self.entries.write().await.remove(id)
    }

    #[inline]
    pub async fn get(&self, id: &str) -> Option<Vec<f32>> {
        let entries = self.entries.read().await;
        entries
            .positions
            .get(id)
            .map(|&position| entries.vectors[position].clone())
    }

    #[inline]
    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.positions.contains_key(id)
    }

    #[inline]
    pub async fn len(&self) -> usize {
        self.entries.read().await.ids.len()
    }

    #[inline]
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.ids.is_empty()
    }

    /// All stored ids in insertion order
    #[inline]
    pub async fn ids(&self) -> Vec<String> {
        self.entries.read().await.ids.clone()
    }

    /// Return up to `limit` entries ordered by descending cosine similarity to `query`
    #[inline]
    pub async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorMatch>> {
        self.check_dimension(query)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let mut scored: Vec<(usize, f32)> = entries
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, cosine_similarity(query, vector)))
            .collect();

        // Stable sort: equal scores stay in insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);

        let matches: Vec<VectorMatch> = scored
            .into_iter()
            .map(|(position, similarity)| VectorMatch {
                id: entries.ids[position].clone(),
                similarity,
            })
            .collect();

        debug!(
            "Vector search scanned {} entries, returning {}",
            entries.ids.len(),
            matches.len()
        );
        Ok(matches)
    }

    /// Write every entry to `path` in the binary snapshot format
    #[inline]
    pub async fn save(&self, path: &Path) -> Result<()> {
        let bytes = {
            let entries = self.entries.read().await;
            encode_snapshot(self.dimension, &entries.ids, &entries.vectors)
        };

        write_atomically(path, &bytes).await?;
        info!("Saved vector index to {}", path.display());
        Ok(())
    }

    /// Replace the current contents with the snapshot stored at `path`
    ///
    /// The snapshot must have been written with the same dimension.
    #[inline]
    pub async fn load(&self, path: &Path) -> Result<()> {
        let bytes = read_snapshot(path).await?;
        let (dimension, records) = decode_snapshot(&bytes)?;
        if dimension != self.dimension {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.dimension,
                actual: dimension,
            });
        }

        let mut rebuilt = IndexEntries::default();
        for (id, vector) in records {
            rebuilt.upsert(id, vector);
        }

        let count = rebuilt.ids.len();
        *self.entries.write().await = rebuilt;
        info!("Loaded {} vectors from {}", count, path.display());
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` when either vector has zero magnitude
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

async fn read_snapshot(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        KnowledgeError::Persistence(format!(
            "Failed to read vector snapshot {}: {}",
            path.display(),
            e
        ))
    })
}

// Layout (little-endian):
// magic[4] | version u16 | dimension u32 | count u64 | count * (id_len u32 | id | dimension * f32)
fn encode_snapshot(dimension: usize, ids: &[String], vectors: &[Vec<f32>]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(18 + ids.len() * (8 + dimension * 4));

    buffer.extend_from_slice(SNAPSHOT_MAGIC);
    buffer.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buffer.extend_from_slice(&(dimension as u32).to_le_bytes());
    buffer.extend_from_slice(&(ids.len() as u64).to_le_bytes());

    for (id, vector) in ids.iter().zip(vectors) {
        buffer.extend_from_slice(&(id.len() as u32).to_le_bytes());
        buffer.extend_from_slice(id.as_bytes());
        for value in vector {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
    }

    buffer
}

type SnapshotRecords = Vec<(String, Vec<f32>)>;

fn decode_snapshot(bytes: &[u8]) -> Result<(usize, SnapshotRecords)> {
    let mut reader = SnapshotReader { bytes, offset: 0 };

    if reader.take(4)? != SNAPSHOT_MAGIC {
        return Err(KnowledgeError::Persistence(
            "Not a vector index snapshot (bad magic)".to_string(),
        ));
    }

    let version = reader.read_u16()?;
    if version != SNAPSHOT_VERSION {
        return Err(KnowledgeError::Persistence(format!(
            "Unsupported vector snapshot version: {}",
            version
        )));
    }

    let dimension = reader.read_u32()? as usize;
    if dimension == 0 {
        return Err(KnowledgeError::Persistence(
            "Vector snapshot declares zero dimensions".to_string(),
        ));
    }

    let count = usize::try_from(reader.read_u64()?).map_err(|_| {
        KnowledgeError::Persistence("Vector snapshot entry count overflows".to_string())
    })?;

    // Each record needs at least its length prefix and vector payload
    let minimum_record = 4 + dimension * 4;
    if count.saturating_mul(minimum_record) > reader.remaining() {
        return Err(KnowledgeError::Persistence(format!(
            "Vector snapshot truncated: {} entries declared but only {} bytes remain",
            count,
            reader.remaining()
        )));
    }

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let id_len = reader.read_u32()? as usize;
        let id = std::str::from_utf8(reader.take(id_len)?)
            .map_err(|e| {
                KnowledgeError::Persistence(format!("Vector id is not valid UTF-8: {}", e))
            })?
            .to_string();

        let mut vector = Vec::with_capacity(dimension);
        for _ in 0..dimension {
            vector.push(f32::from_le_bytes(reader.take_array()?));
        }
        records.push((id, vector));
    }

    if reader.remaining() != 0 {
        return Err(KnowledgeError::Persistence(format!(
            "Vector snapshot has {} unexpected trailing bytes",
            reader.remaining()
        )));
    }

    Ok((dimension, records))
}

struct SnapshotReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> SnapshotReader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                KnowledgeError::Persistence(format!(
                    "Vector snapshot truncated at byte {}",
                    self.offset
                ))
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        slice.try_into().map_err(|_| {
            KnowledgeError::Persistence("Vector snapshot field has wrong width".to_string())
        })
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }
}
