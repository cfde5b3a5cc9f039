#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embeddings::chunking::estimate_token_count;
use crate::{KnowledgeError, Result};

/// Parent key shared by every file; files form a single ordered sequence under it
pub const ROOT_PARENT: &str = "";

/// An entity that lives in an ordered child list under a parent id
pub trait HierarchyEntity: Clone + Send + Sync + Serialize + DeserializeOwned {
    /// Human-readable entity kind, used in error messages
    const KIND: &'static str;

    fn id(&self) -> &str;

    fn parent_id(&self) -> &str;

    /// Reject entities that cannot be indexed
    #[inline]
    fn validate(&self) -> Result<()> {
        if self.id().trim().is_empty() {
            return Err(KnowledgeError::InvalidInput(format!(
                "{} id cannot be empty",
                Self::KIND
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFile {
    pub id: String,
    pub name: String,
    pub title: Option<String>,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeFileSection {
    pub id: String,
    pub file_id: String,
    /// Heading path (e.g., "Getting Started > Installation")
    pub heading_path: String,
    pub heading_level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFileChunk {
    pub id: String,
    pub section_id: String,
    pub file_id: String,
    pub content: String,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl KnowledgeFile {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            title: None,
            source: None,
            created_at: Utc::now(),
        }
    }

    #[inline]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[inline]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Title if one was set, otherwise the file name
    #[inline]
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

impl KnowledgeFileSection {
    #[inline]
    pub fn new(
        file: &KnowledgeFile,
        heading_path: impl Into<String>,
        heading_level: Option<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_id: file.id.clone(),
            heading_path: heading_path.into(),
            heading_level,
        }
    }
}

impl KnowledgeFileChunk {
    #[inline]
    pub fn new(section: &KnowledgeFileSection, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4().to_string(),
            section_id: section.id.clone(),
            file_id: section.file_id.clone(),
            token_count: estimate_token_count(&content),
            content,
            embedding: None,
        }
    }

    #[inline]
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }
}

impl HierarchyEntity for KnowledgeFile {
    const KIND: &'static str = "File";

    #[inline]
    fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    fn parent_id(&self) -> &str {
        ROOT_PARENT
    }
}

impl HierarchyEntity for KnowledgeFileSection {
    const KIND: &'static str = "Section";

    #[inline]
    fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    fn parent_id(&self) -> &str {
        &self.file_id
    }

    #[inline]
    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(KnowledgeError::InvalidInput(
                "Section id cannot be empty".to_string(),
            ));
        }
        if self.file_id.trim().is_empty() {
            return Err(KnowledgeError::InvalidInput(format!(
                "Section {} has no owning file",
                self.id
            )));
        }
        Ok(())
    }
}

impl HierarchyEntity for KnowledgeFileChunk {
    const KIND: &'static str = "Chunk";

    #[inline]
    fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    fn parent_id(&self) -> &str {
        &self.section_id
    }

    #[inline]
    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(KnowledgeError::InvalidInput(
                "Chunk id cannot be empty".to_string(),
            ));
        }
        if self.section_id.trim().is_empty() || self.file_id.trim().is_empty() {
            return Err(KnowledgeError::InvalidInput(format!(
                "Chunk {} must reference both a section and a file",
                self.id
            )));
        }
        Ok(())
    }
}
