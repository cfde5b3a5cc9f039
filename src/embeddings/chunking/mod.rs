
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Heading path used for content that appears before any heading in an untitled document
const UNTITLED_SECTION: &str = "Content";

/// A run of markdown belonging to one heading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSection {
    /// The heading path (e.g., "Getting Started > Installation > Prerequisites")
    pub heading_path: String,
    /// Markdown between this heading and the next one
    pub content: String,
    /// The heading level (1-6), `None` for content preceding the first heading
    pub heading_level: Option<u8>,
    pub has_code_blocks: bool,
}

/// A piece of a section sized for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    pub content: String,
    /// Position of this chunk within its section
    pub chunk_index: usize,
    /// Estimated token count
    pub token_count: usize,
    pub has_code_blocks: bool,
}

/// Configuration for content chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub target_chunk_size: usize,
    /// Maximum chunk size in tokens before forced splitting
    pub max_chunk_size: usize,
    /// Minimum chunk size in tokens (smaller chunks will be merged)
    pub min_chunk_size: usize,
    /// Overlap size in tokens between adjacent chunks
    pub overlap_size: usize,
    /// Whether to preserve code blocks as single units
    pub preserve_code_blocks: bool,
    /// Whether to break at sentence boundaries when possible
    pub sentence_boundary_splitting: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_chunk_size: 650,
            max_chunk_size: 1000,
            min_chunk_size: 100,
            overlap_size: 50,
            preserve_code_blocks: true,
            sentence_boundary_splitting: true,
        }
    }
}

/// Split a markdown document into sections, one per heading that has body text
///
/// Content before the first heading is filed under `title`. Heading-like lines inside
/// fenced code are left alone because sections follow the parsed document structure.
#[inline]
pub fn split_sections(markdown: &str, title: &str) -> Vec<ContentSection> {
    let mut sections = Vec::new();
    let mut heading_stack: Vec<(u8, String)> = Vec::new();
    let mut open_heading: Option<(u8, String)> = None;
    let mut body_start = 0;
    let mut has_code_blocks = false;

    for (event, range) in Parser::new(markdown).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                push_section(
                    &mut sections,
                    &heading_stack,
                    title,
                    markdown.get(body_start..range.start),
                    has_code_blocks,
                );
                has_code_blocks = false;
                open_heading = Some((heading_level_to_u8(level), String::new()));
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, text)) = open_heading.take() {
                    let text = text.trim();
                    if !text.is_empty() {
                        update_heading_stack(&mut heading_stack, level, text.to_string());
                    }
                }
                body_start = range.end;
            }
            Event::Text(text) => {
                if let Some((_, heading_text)) = open_heading.as_mut() {
                    heading_text.push_str(&text);
                }
            }
            Event::Code(code) => match open_heading.as_mut() {
                Some((_, heading_text)) => heading_text.push_str(&code),
                None => has_code_blocks = true,
            },
            Event::Start(Tag::CodeBlock(_)) => has_code_blocks = true,
            Event::SoftBreak | Event::HardBreak => {
                if let Some((_, heading_text)) = open_heading.as_mut() {
                    heading_text.push(' ');
                }
            }
            _ => {}
        }
    }

    push_section(
        &mut sections,
        &heading_stack,
        title,
        markdown.get(body_start..),
        has_code_blocks,
    );

    debug!("Split '{}' into {} sections", title, sections.len());
    sections
}

fn push_section(
    sections: &mut Vec<ContentSection>,
    heading_stack: &[(u8, String)],
    title: &str,
    body: Option<&str>,
    has_code_blocks: bool,
) {
    let Some(body) = body.map(str::trim).filter(|body| !body.is_empty()) else {
        return;
    };

    sections.push(ContentSection {
        heading_path: build_heading_path(heading_stack, title),
        content: body.to_string(),
        heading_level: heading_stack.last().map(|(level, _)| *level),
        has_code_blocks,
    });
}

const fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn update_heading_stack(stack: &mut Vec<(u8, String)>, level: u8, text: String) {
    // Remove headings at the same or deeper level
    stack.retain(|(l, _)| *l < level);
    stack.push((level, text));
}

fn build_heading_path(stack: &[(u8, String)], title: &str) -> String {
    if !stack.is_empty() {
        return stack
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join(" > ");
    }

    let title = title.trim();
    if title.is_empty() {
        UNTITLED_SECTION.to_string()
    } else {
        title.to_string()
    }
}

/// Chunk a single section into embedding-ready pieces
#[inline]
pub fn chunk_section(section: &ContentSection, config: &ChunkingConfig) -> Vec<ContentChunk> {
    let content = section.content.trim();
    if content.is_empty() {
        return Vec::new();
    }

    let token_count = estimate_token_count(content);
    if token_count <= config.target_chunk_size {
        return vec![ContentChunk {
            content: content.to_string(),
            chunk_index: 0,
            token_count,
            has_code_blocks: section.has_code_blocks,
        }];
    }

    let splits = if section.has_code_blocks && config.preserve_code_blocks {
        split_with_code_preservation(content, config)
    } else {
        split_by_semantics(content, config)
    };

    let chunks = splits
        .into_iter()
        .filter(|split| !split.trim().is_empty())
        .map(|split| ContentChunk {
            token_count: estimate_token_count(&split),
            has_code_blocks: section.has_code_blocks && contains_code_block(&split),
            content: split,
            chunk_index: 0,
        })
        .collect();

    let chunks = merge_small_chunks(chunks, config);
    let mut chunks = if config.overlap_size > 0 {
        add_overlap(chunks, config.overlap_size)
    } else {
        chunks
    };

    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.chunk_index = i;
    }

    debug!(
        "Chunked section '{}' into {} chunks",
        section.heading_path,
        chunks.len()
    );
    chunks
}

/// Text sent to the embedding provider for one chunk, carrying its document context
#[inline]
pub fn embedding_text(document_title: &str, heading_path: &str, content: &str) -> String {
    if heading_path == document_title {
        format!("Document: {}\n\n{}", document_title, content)
    } else {
        format!(
            "Document: {}\nSection: {}\n\n{}",
            document_title, heading_path, content
        )
    }
}

/// Accumulates text pieces and cuts a new split whenever a token limit would be passed
struct SplitBuffer {
    splits: Vec<String>,
    current: String,
    current_tokens: usize,
}

impl SplitBuffer {
    const fn new() -> Self {
        Self {
            splits: Vec::new(),
            current: String::new(),
            current_tokens: 0,
        }
    }

    fn push(&mut self, piece: &str, separator: &str, limit: Option<usize>) {
        let tokens = estimate_token_count(piece);
        if limit.is_some_and(|limit| self.current_tokens + tokens > limit) {
            self.flush();
        }

        self.current.push_str(piece);
        self.current.push_str(separator);
        self.current_tokens += tokens;
    }

    fn flush(&mut self) {
        let split = self.current.trim();
        if !split.is_empty() {
            self.splits.push(split.to_string());
        }
        self.current.clear();
        self.current_tokens = 0;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.splits
    }
}

/// Split content at line boundaries, never inside a fenced code block
fn split_with_code_preservation(content: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut buffer = SplitBuffer::new();
    let mut in_code_block = false;

    for line in content.lines() {
        // Splitting is allowed before an opening fence, never before a closing one
        let limit = (!in_code_block).then_some(config.max_chunk_size);
        buffer.push(line, "\n", limit);

        if line.trim().starts_with("```") {
            in_code_block = !in_code_block;
        }
    }

    buffer.finish()
}

/// Split content at paragraph boundaries, falling back to sentences or words for
/// oversized paragraphs
fn split_by_semantics(content: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut buffer = SplitBuffer::new();
    let limit = Some(config.target_chunk_size);

    for paragraph in content.split("\n\n").filter(|p| !p.trim().is_empty()) {
        if estimate_token_count(paragraph) <= config.max_chunk_size {
            buffer.push(paragraph, "\n\n", limit);
            continue;
        }

        let pieces = if config.sentence_boundary_splitting {
            split_by_sentences(paragraph, config.target_chunk_size)
        } else {
            split_by_words(paragraph, config.target_chunk_size)
        };
        for piece in pieces {
            buffer.push(&piece, "\n\n", limit);
        }
    }

    buffer.finish()
}

fn split_by_sentences(text: &str, target: usize) -> Vec<String> {
    let sentences = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    let mut buffer = SplitBuffer::new();
    let last = sentences.len().saturating_sub(1);
    for (i, sentence) in sentences.iter().enumerate() {
        let separator = if i < last { ". " } else { "" };
        buffer.push(sentence, separator, Some(target));
    }
    buffer.finish()
}

fn split_by_words(text: &str, target: usize) -> Vec<String> {
    let mut buffer = SplitBuffer::new();
    for word in text.split_whitespace() {
        buffer.push(word, " ", Some(target));
    }
    buffer.finish()
}

/// Fold chunks under the minimum size into their predecessor when the result still fits
fn merge_small_chunks(chunks: Vec<ContentChunk>, config: &ChunkingConfig) -> Vec<ContentChunk> {
    let mut merged: Vec<ContentChunk> = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        match merged.last_mut() {
            Some(previous)
                if chunk.token_count < config.min_chunk_size
                    && previous.token_count + chunk.token_count <= config.max_chunk_size =>
            {
                previous.content.push_str("\n\n");
                previous.content.push_str(&chunk.content);
                previous.token_count += chunk.token_count;
                previous.has_code_blocks |= chunk.has_code_blocks;
            }
            _ => merged.push(chunk),
        }
    }

    merged
}

/// Prefix each chunk with the tail of the one before it
fn add_overlap(mut chunks: Vec<ContentChunk>, overlap_tokens: usize) -> Vec<ContentChunk> {
    for i in 1..chunks.len() {
        let (left, right) = chunks.split_at_mut(i);
        let previous = &left[i - 1];
        let current = &mut right[0];

        let overlap_text = extract_overlap_text(&previous.content, overlap_tokens);
        if !overlap_text.is_empty() {
            current.content = format!("{}\n\n{}", overlap_text, current.content);
            current.token_count += estimate_token_count(&overlap_text);
        }
    }

    chunks
}

fn extract_overlap_text(content: &str, overlap_tokens: usize) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    let word_count = (overlap_tokens as f64 * 0.75) as usize;

    if words.len() <= word_count {
        return String::new();
    }

    words[words.len() - word_count..].join(" ")
}

/// Estimate token count with a words-plus-punctuation heuristic
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Roughly 0.75 words per token for English text
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}

fn contains_code_block(text: &str) -> bool {
    text.contains("```") || text.contains('`') || text.lines().any(|line| line.starts_with("    "))
}
