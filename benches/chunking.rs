use criterion::{Criterion, criterion_group, criterion_main};
use knowledge_rag::embeddings::{ChunkingConfig, chunk_section, split_sections};
use std::fmt::Write;
use std::hint::black_box;

fn sample_document() -> String {
    let mut markdown = String::from("# Reference\n\nGenerated reference manual.\n\n");
    for chapter in 0..20 {
        let _ = write!(markdown, "## Chapter {}\n\n", chapter);
        for paragraph in 0..15 {
            let _ = write!(
                markdown,
                "Paragraph {} of chapter {} describes the configuration options in detail. \
                 Each option has a default value and a short explanation.\n\n",
                paragraph, chapter
            );
        }
        markdown.push_str("```rust\nlet config = Config::default();\nconfig.validate()?;\n```\n\n");
    }
    markdown
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let markdown = sample_document();
    let config = ChunkingConfig::default();

    c.bench_function("split_sections", |b| {
        b.iter(|| split_sections(black_box(&markdown), black_box("reference.md")))
    });

    let sections = split_sections(&markdown, "reference.md");
    c.bench_function("chunking", |b| {
        b.iter(|| {
            sections
                .iter()
                .map(|section| chunk_section(black_box(section), black_box(&config)).len())
                .sum::<usize>()
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
