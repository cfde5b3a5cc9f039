
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::database::VECTOR_SNAPSHOT;
use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

const CONFIG_FILE_NAME: &str = "config.toml";
const STORE_DIR_NAME: &str = "store";
const BASE_DIR_NAME: &str = ".knowledge-rag";

const BATCH_SIZE_RANGE: RangeInclusive<u32> = 1..=1000;
const EMBEDDING_DIMENSION_RANGE: RangeInclusive<u32> = 64..=4096;
const CANDIDATE_LIMIT_RANGE: RangeInclusive<usize> = 1..=1000;
const MAX_CHUNK_TOKENS: usize = 8192;

/// Settings stored in `config.toml` under the knowledge base directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    /// Directory the file was loaded from; never serialized
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    /// Texts sent per `/api/embed` request
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of nearest chunks fetched from the vector index per query
    pub candidate_limit: usize,
}

impl Default for SearchConfig {
    #[inline]
    fn default() -> Self {
        Self {
            candidate_limit: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Home directory not found, cannot locate the knowledge base")]
    DirectoryError,
    #[error("'{0}' is not a valid Ollama URL")]
    InvalidUrl(String),
    #[error("Port {0} is not usable")]
    InvalidPort(u16),
    #[error("Batch size {0} is outside {min}..={max}", min = BATCH_SIZE_RANGE.start(), max = BATCH_SIZE_RANGE.end())]
    InvalidBatchSize(u32),
    #[error("Model name '{0}' is empty")]
    InvalidModel(String),
    #[error("Protocol '{0}' is not supported (use http or https)")]
    InvalidProtocol(String),
    #[error("Embedding dimension {0} is outside {min}..={max}", min = EMBEDDING_DIMENSION_RANGE.start(), max = EMBEDDING_DIMENSION_RANGE.end())]
    InvalidEmbeddingDimension(u32),
    #[error("Candidate limit {0} is outside {min}..={max}", min = CANDIDATE_LIMIT_RANGE.start(), max = CANDIDATE_LIMIT_RANGE.end())]
    InvalidCandidateLimit(usize),
    #[error("Chunk sizes min {min}, target {target}, max {max} must satisfy 0 < min < target < max <= {limit}", limit = MAX_CHUNK_TOKENS)]
    InvalidChunkSizes {
        min: usize,
        target: usize,
        max: usize,
    },
    #[error("Overlap of {0} tokens must be smaller than the min chunk size")]
    InvalidOverlapSize(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default knowledge base location, `~/.knowledge-rag`
    #[inline]
    pub fn default_base_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(BASE_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Read `config.toml` from `base_dir`; a missing file yields the defaults
    #[inline]
    pub fn load<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let path = base_dir.join(CONFIG_FILE_NAME);

        let mut config = match fs::read_to_string(&path) {
            Ok(content) => toml::from_str::<Self>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        config.base_dir = base_dir;

        config
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate().context("Refusing to save invalid settings")?;

        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("Failed to create {}", self.base_dir.display()))?;

        let path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.search.validate()?;
        validate_chunking(&self.chunking)
    }

    #[inline]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE_NAME)
    }

    /// Directory holding the JSON collection snapshots and the vector snapshot
    #[inline]
    pub fn store_dir(&self) -> PathBuf {
        self.base_dir.join(STORE_DIR_NAME)
    }

    #[inline]
    pub fn vector_index_path(&self) -> PathBuf {
        self.store_dir().join(VECTOR_SNAPSHOT)
    }
}

fn validate_chunking(config: &ChunkingConfig) -> Result<(), ConfigError> {
    let (min, target, max) = (
        config.min_chunk_size,
        config.target_chunk_size,
        config.max_chunk_size,
    );

    let ordered = 0 < min && min < target && target < max && max <= MAX_CHUNK_TOKENS;
    if !ordered {
        return Err(ConfigError::InvalidChunkSizes { min, target, max });
    }
    if config.overlap_size >= min {
        return Err(ConfigError::InvalidOverlapSize(config.overlap_size));
    }
    Ok(())
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.protocol.as_str(), "http" | "https") {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }
        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }
        if !BATCH_SIZE_RANGE.contains(&self.batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }
        if !EMBEDDING_DIMENSION_RANGE.contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let address = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&address).map_err(|_| ConfigError::InvalidUrl(address))
    }

    /// Apply `change` to a copy and keep it only if the result validates
    fn update(&mut self, change: impl FnOnce(&mut Self)) -> Result<(), ConfigError> {
        let mut candidate = self.clone();
        change(&mut candidate);
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        self.update(|config| config.host = host)
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        self.update(|config| config.port = port)
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        self.update(|config| config.model = model)
    }

    /// Changing the dimension invalidates any existing vector snapshot
    #[inline]
    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        self.update(|config| config.embedding_dimension = dimension)
    }
}

impl SearchConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !CANDIDATE_LIMIT_RANGE.contains(&self.candidate_limit) {
            return Err(ConfigError::InvalidCandidateLimit(self.candidate_limit));
        }
        Ok(())
    }

    #[inline]
    pub fn set_candidate_limit(&mut self, limit: usize) -> Result<(), ConfigError> {
        if !CANDIDATE_LIMIT_RANGE.contains(&limit) {
            return Err(ConfigError::InvalidCandidateLimit(limit));
        }
        self.candidate_limit = limit;
        Ok(())
    }
}
