use super::*;

#[test]
fn new_entities_link_to_their_parents() {
    let file = KnowledgeFile::new("guide.md").with_title("User Guide");
    let section = KnowledgeFileSection::new(&file, "Intro > Setup", Some(2));
    let chunk = KnowledgeFileChunk::new(&section, "Install the package first.");

    assert_eq!(section.file_id, file.id);
    assert_eq!(section.parent_id(), file.id);
    assert_eq!(chunk.section_id, section.id);
    assert_eq!(chunk.file_id, file.id);
    assert_eq!(chunk.parent_id(), section.id);
    assert_eq!(file.parent_id(), ROOT_PARENT);
    assert!(chunk.token_count > 0);
    assert!(!chunk.has_embedding());
}

#[test]
fn display_name_prefers_title() {
    let file = KnowledgeFile::new("guide.md");
    assert_eq!(file.display_name(), "guide.md");
    assert_eq!(file.with_title("Guide").display_name(), "Guide");
}

#[test]
fn validation_rejects_missing_ids() {
    let mut file = KnowledgeFile::new("a.md");
    assert!(file.validate().is_ok());
    file.id = "  ".to_string();
    assert!(matches!(
        file.validate(),
        Err(KnowledgeError::InvalidInput(_))
    ));

    let file = KnowledgeFile::new("b.md");
    let mut section = KnowledgeFileSection::new(&file, "Top", Some(1));
    section.file_id = String::new();
    assert!(section.validate().is_err());

    let section = KnowledgeFileSection::new(&file, "Top", Some(1));
    let mut chunk = KnowledgeFileChunk::new(&section, "text");
    chunk.file_id = String::new();
    assert!(chunk.validate().is_err());
}

#[test]
fn chunk_embedding_is_optional_in_json() {
    let file = KnowledgeFile::new("a.md");
    let section = KnowledgeFileSection::new(&file, "Top", None);
    let chunk = KnowledgeFileChunk::new(&section, "text");

    let json = serde_json::to_string(&chunk).expect("should serialize chunk");
    assert!(!json.contains("embedding"));

    let parsed: KnowledgeFileChunk = serde_json::from_str(&json).expect("should parse chunk");
    assert_eq!(parsed, chunk);

    let embedded = KnowledgeFileChunk {
        embedding: Some(vec![0.25, 0.5]),
        ..chunk
    };
    let json = serde_json::to_string(&embedded).expect("should serialize chunk");
    let parsed: KnowledgeFileChunk = serde_json::from_str(&json).expect("should parse chunk");
    assert!(parsed.has_embedding());
    assert_eq!(parsed.embedding, Some(vec![0.25, 0.5]));
}
