use super::*;
use async_trait::async_trait;
use tempfile::TempDir;

use crate::database::SectionStore;

const KEYWORDS: [&str; 4] = ["install", "search", "python", "cargo"];

const GUIDE: &str = "# Install

Use cargo to install the tools.

# Search

Search the index quickly.

## Python

Python bindings exist for search.
";

/// Counts keyword occurrences, plus a small constant so no vector is all zeros
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str, signal: &CancellationSignal) -> Result<Vec<f32>> {
        if signal.is_cancelled() {
            return Err(KnowledgeError::Cancelled);
        }
        let text = text.to_lowercase();
        Ok(KEYWORDS
            .iter()
            .map(|keyword| text.matches(keyword).count() as f32 + 0.01)
            .collect())
    }

    fn dimension(&self) -> usize {
        KEYWORDS.len()
    }

    fn name(&self) -> &str {
        "keywords"
    }
}

/// Claims the right dimension but returns short vectors
struct ShortVectorEmbedder;

#[async_trait]
impl EmbeddingProvider for ShortVectorEmbedder {
    async fn embed(&self, _text: &str, _signal: &CancellationSignal) -> Result<Vec<f32>> {
        Ok(vec![1.0])
    }

    fn dimension(&self) -> usize {
        KEYWORDS.len()
    }

    fn name(&self) -> &str {
        "short"
    }
}

struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str, _signal: &CancellationSignal) -> Result<Vec<f32>> {
        Err(KnowledgeError::Embedding("connection refused".to_string()))
    }

    fn dimension(&self) -> usize {
        KEYWORDS.len()
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn create_test_indexer(embedder: Arc<dyn EmbeddingProvider>) -> Indexer {
    let index = VectorIndex::new(KEYWORDS.len()).expect("should create index");
    Indexer::new(
        Arc::new(KnowledgeStore::new()),
        Arc::new(index),
        embedder,
        ChunkingConfig::default(),
    )
    .expect("should create indexer")
}

async fn assert_empty(indexer: &Indexer) {
    let store = indexer.store();
    assert_eq!(store.files().count().await.expect("should count"), 0);
    assert_eq!(store.sections().count().await.expect("should count"), 0);
    assert_eq!(store.chunks().count().await.expect("should count"), 0);
    assert!(indexer.index().is_empty().await);
}

#[test]
fn indexer_rejects_mismatched_dimensions() {
    let index = VectorIndex::new(3).expect("should create index");
    let result = Indexer::new(
        Arc::new(KnowledgeStore::new()),
        Arc::new(index),
        Arc::new(KeywordEmbedder),
        ChunkingConfig::default(),
    );
    assert!(matches!(
        result,
        Err(KnowledgeError::DimensionMismatch {
            expected: 3,
            actual: 4
        })
    ));
}

#[tokio::test]
async fn ingest_records_hierarchy_in_document_order() {
    let indexer = create_test_indexer(Arc::new(KeywordEmbedder));

    let summary = indexer
        .ingest_markdown("guide.md", GUIDE, Some("/docs/guide.md"), &CancellationSignal::new())
        .await
        .expect("ingest should succeed");

    assert_eq!(summary.sections, 3);
    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.file.source.as_deref(), Some("/docs/guide.md"));

    let store = indexer.store();
    let sections = store
        .sections()
        .sections_for_file(&summary.file.id)
        .await
        .expect("should list sections");
    let paths: Vec<&str> = sections.iter().map(|s| s.heading_path.as_str()).collect();
    assert_eq!(paths, vec!["Install", "Search", "Search > Python"]);

    let chunks = store.chunks().list_all().await.expect("should list chunks");
    assert_eq!(chunks.len(), 3);
    for chunk in &chunks {
        assert!(chunk.has_embedding());
        assert_eq!(chunk.file_id, summary.file.id);
        assert_eq!(
            indexer.index().get(&chunk.id).await,
            chunk.embedding.clone()
        );
    }
    assert_eq!(indexer.index().len().await, 3);
}

#[tokio::test]
async fn small_batches_embed_every_chunk() {
    let indexer = create_test_indexer(Arc::new(KeywordEmbedder)).with_batch_size(1);
    let summary = indexer
        .ingest_markdown("guide.md", GUIDE, None, &CancellationSignal::new())
        .await
        .expect("ingest should succeed");
    assert_eq!(indexer.index().len().await, summary.chunks);
}

#[tokio::test]
async fn ingested_documents_are_searchable() {
    let indexer = create_test_indexer(Arc::new(KeywordEmbedder));
    indexer
        .ingest_markdown("guide.md", GUIDE, None, &CancellationSignal::new())
        .await
        .expect("ingest should succeed");

    let response = indexer
        .searcher()
        .search("cargo install", None, &CancellationSignal::new())
        .await
        .expect("search should succeed");

    assert!(!response.sections.is_empty());
    assert_eq!(response.sections[0].section.heading_path, "Install");
}

#[tokio::test]
async fn delete_file_cascades_explicitly() {
    let indexer = create_test_indexer(Arc::new(KeywordEmbedder));
    let signal = CancellationSignal::new();
    let removed = indexer
        .ingest_markdown("guide.md", GUIDE, None, &signal)
        .await
        .expect("ingest should succeed");
    let kept = indexer
        .ingest_markdown("other.md", "# Other\n\nPython notes.", None, &signal)
        .await
        .expect("ingest should succeed");

    assert!(
        indexer
            .delete_file(&removed.file.id)
            .await
            .expect("delete should succeed")
    );

    let store = indexer.store();
    assert!(
        !store
            .files()
            .exists(&removed.file.id)
            .await
            .expect("should check file")
    );
    assert_eq!(store.sections().count().await.expect("should count"), 1);
    assert_eq!(store.chunks().count().await.expect("should count"), 1);
    assert_eq!(indexer.index().len().await, 1);
    assert!(
        store
            .files()
            .exists(&kept.file.id)
            .await
            .expect("should check file")
    );

    let report = indexer
        .validate_consistency()
        .await
        .expect("check should succeed");
    assert!(report.is_consistent);

    assert!(
        !indexer
            .delete_file("unknown")
            .await
            .expect("delete should succeed")
    );
}

#[tokio::test]
async fn failed_write_rolls_back() {
    let indexer = create_test_indexer(Arc::new(ShortVectorEmbedder));

    let result = indexer
        .ingest_markdown("guide.md", GUIDE, None, &CancellationSignal::new())
        .await;

    assert!(matches!(
        result,
        Err(KnowledgeError::DimensionMismatch { .. })
    ));
    assert_empty(&indexer).await;
}

#[tokio::test]
async fn embedding_failure_writes_nothing() {
    let indexer = create_test_indexer(Arc::new(FailingEmbedder));

    let result = indexer
        .ingest_markdown("guide.md", GUIDE, None, &CancellationSignal::new())
        .await;

    assert!(matches!(result, Err(KnowledgeError::Embedding(_))));
    assert_empty(&indexer).await;
}

#[tokio::test]
async fn cancelled_ingest_writes_nothing() {
    let indexer = create_test_indexer(Arc::new(KeywordEmbedder));
    let signal = CancellationSignal::new();
    signal.cancel();

    let result = indexer.ingest_markdown("guide.md", GUIDE, None, &signal).await;

    assert!(matches!(result, Err(KnowledgeError::Cancelled)));
    assert_empty(&indexer).await;
}

#[tokio::test]
async fn empty_name_is_rejected() {
    let indexer = create_test_indexer(Arc::new(KeywordEmbedder));
    let result = indexer
        .ingest_markdown("  ", GUIDE, None, &CancellationSignal::new())
        .await;
    assert!(matches!(result, Err(KnowledgeError::InvalidInput(_))));
}

#[tokio::test]
async fn save_and_open_round_trip() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let store_dir = temp_dir.path().join("store");

    let indexer = create_test_indexer(Arc::new(KeywordEmbedder));
    let summary = indexer
        .ingest_markdown("guide.md", GUIDE, None, &CancellationSignal::new())
        .await
        .expect("ingest should succeed");
    indexer.save(&store_dir).await.expect("save should succeed");

    let reopened = Indexer::open(&store_dir, Arc::new(KeywordEmbedder), ChunkingConfig::default())
        .await
        .expect("open should succeed");

    assert_eq!(reopened.index().len().await, summary.chunks);
    let file = reopened
        .store()
        .files()
        .get(&summary.file.id)
        .await
        .expect("should get file")
        .expect("file should exist");
    assert_eq!(file.name, "guide.md");

    let report = reopened
        .validate_consistency()
        .await
        .expect("check should succeed");
    assert!(report.is_consistent);
}

#[tokio::test]
async fn open_empty_directory_starts_fresh() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");

    let indexer = Indexer::open(temp_dir.path(), Arc::new(KeywordEmbedder), ChunkingConfig::default())
        .await
        .expect("open should succeed");

    assert_eq!(indexer.index().dimension(), KEYWORDS.len());
    assert_empty(&indexer).await;
}

#[tokio::test]
async fn repair_resolves_reported_issues() {
    let indexer = create_test_indexer(Arc::new(KeywordEmbedder));
    let signal = CancellationSignal::new();
    let summary = indexer
        .ingest_markdown("guide.md", GUIDE, None, &signal)
        .await
        .expect("ingest should succeed");

    let chunks = indexer
        .store()
        .chunks()
        .list_all()
        .await
        .expect("should list chunks");
    assert!(indexer.index().remove(&chunks[0].id).await);
    indexer
        .index()
        .add("stray", vec![1.0; KEYWORDS.len()])
        .await
        .expect("should add stray vector");

    let report = indexer
        .validate_consistency()
        .await
        .expect("check should succeed");
    assert_eq!(report.total_issues(), 2);

    let resolved = indexer
        .repair(&report, &signal)
        .await
        .expect("repair should succeed");
    assert_eq!(resolved, 2);

    let report = indexer
        .validate_consistency()
        .await
        .expect("check should succeed");
    assert!(report.is_consistent, "{}", report.summary());
    assert_eq!(indexer.index().len().await, summary.chunks);
}

#[tokio::test]
async fn repair_embeds_chunks_with_document_context() {
    let indexer = create_test_indexer(Arc::new(KeywordEmbedder));
    let signal = CancellationSignal::new();
    indexer
        .ingest_markdown("guide.md", GUIDE, None, &signal)
        .await
        .expect("ingest should succeed");

    let mut chunk = indexer
        .store()
        .chunks()
        .list_all()
        .await
        .expect("should list chunks")
        .remove(0);
    let original = indexer
        .index()
        .get(&chunk.id)
        .await
        .expect("chunk should have a vector");

    // Lose both the stored embedding and the indexed vector
    assert!(indexer.index().remove(&chunk.id).await);
    chunk.embedding = None;
    indexer
        .store()
        .chunks()
        .add(chunk.clone())
        .await
        .expect("should overwrite chunk");

    let report = indexer
        .validate_consistency()
        .await
        .expect("check should succeed");
    assert_eq!(report.chunks_missing_vectors, vec![chunk.id.clone()]);
    indexer
        .repair(&report, &signal)
        .await
        .expect("repair should succeed");

    let repaired = indexer
        .index()
        .get(&chunk.id)
        .await
        .expect("repair should restore the vector");
    assert_eq!(repaired, original);

    let bare = KeywordEmbedder
        .embed(&chunk.content, &signal)
        .await
        .expect("should embed");
    assert_ne!(repaired, bare);
}
