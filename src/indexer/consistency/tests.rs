use super::*;
use crate::database::{KnowledgeFile, KnowledgeFileChunk, KnowledgeFileSection};

fn empty_report() -> ConsistencyReport {
    ConsistencyReport {
        chunk_count: 3,
        vector_count: 3,
        chunks_missing_vectors: vec![],
        orphaned_vectors: vec![],
        sections_missing_file: vec![],
        chunks_missing_section: vec![],
        is_consistent: true,
    }
}

#[test]
fn consistent_report() {
    let report = empty_report();
    assert_eq!(report.total_issues(), 0);
    assert!(report.summary().contains("is consistent"));
}

#[test]
fn inconsistent_report() {
    let report = ConsistencyReport {
        orphaned_vectors: vec!["v1".to_string()],
        chunks_missing_section: vec!["c1".to_string(), "c2".to_string()],
        is_consistent: false,
        ..empty_report()
    };

    assert_eq!(report.total_issues(), 3);
    assert!(report.summary().contains("inconsistencies found"));
    assert!(report.summary().contains("1 orphaned vectors"));
}

#[tokio::test]
async fn detects_dangling_references() {
    let store = KnowledgeStore::new();
    let index = VectorIndex::new(2).expect("should create index");

    let file = KnowledgeFile::new("a.md");
    let section = KnowledgeFileSection::new(&file, "A", Some(1));
    let indexed = KnowledgeFileChunk::new(&section, "indexed");
    let unindexed = KnowledgeFileChunk::new(&section, "unindexed");

    store.files().add(file).await.expect("should add file");
    store
        .sections()
        .add(section.clone())
        .await
        .expect("should add section");
    store
        .chunks()
        .add(indexed.clone())
        .await
        .expect("should add chunk");
    store
        .chunks()
        .add(unindexed.clone())
        .await
        .expect("should add chunk");
    index
        .add(&indexed.id, vec![1.0, 0.0])
        .await
        .expect("should index chunk");
    index
        .add("stray", vec![0.0, 1.0])
        .await
        .expect("should index stray");

    let report = check_consistency(&store, &index)
        .await
        .expect("check should succeed");
    assert!(!report.is_consistent);
    assert_eq!(report.chunks_missing_vectors, vec![unindexed.id.clone()]);
    assert_eq!(report.orphaned_vectors, vec!["stray".to_string()]);
    assert!(report.sections_missing_file.is_empty());
    assert!(report.chunks_missing_section.is_empty());

    // Deleting parents without cascading leaves orphans behind
    store
        .files()
        .delete(&section.file_id)
        .await
        .expect("should delete file");
    store
        .sections()
        .delete(&section.id)
        .await
        .expect("should delete section");

    let report = check_consistency(&store, &index)
        .await
        .expect("check should succeed");
    assert!(report.sections_missing_file.is_empty());
    assert_eq!(
        report.chunks_missing_section,
        vec![indexed.id.clone(), unindexed.id.clone()]
    );
    assert_eq!(report.total_issues(), 4);
}
