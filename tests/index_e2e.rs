//! End-to-end tests over the full build → persist → search pipeline.

mod common;

use common::{ConceptEmbedder, RandEmbedder};
use nearline::{
    BuildOptions, FilterOp, IndexBuilder, IndexSearcher, MetadataFilter, MetadataMap,
    SearchOptions, Value,
};
use std::path::PathBuf;
use std::sync::Arc;

fn meta(pairs: &[(&str, Value)]) -> MetadataMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn build_animal_index(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("animals.idx");
    let mut builder = IndexBuilder::new(Arc::new(ConceptEmbedder));
    builder.add_text(
        "cats are mammals",
        meta(&[("topic", Value::Str("animals".into()))]),
    );
    builder.add_text(
        "dogs are mammals",
        meta(&[("topic", Value::Str("animals".into()))]),
    );
    builder.add_text(
        "rust is a language",
        meta(&[("topic", Value::Str("software".into()))]),
    );
    builder.build_index(&path).unwrap();
    path
}

#[test]
fn semantic_scenario_feline_and_programming() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_animal_index(&dir);
    let searcher = IndexSearcher::open(&path, Arc::new(ConceptEmbedder)).unwrap();

    let hits = searcher
        .search(
            "feline pets",
            &SearchOptions {
                top_k: 1,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "cats are mammals");

    let hits = searcher
        .search(
            "programming",
            &SearchOptions {
                top_k: 1,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert_eq!(hits[0].text, "rust is a language");
}

#[test]
fn results_carry_text_and_metadata_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_animal_index(&dir);
    let searcher = IndexSearcher::open(&path, Arc::new(ConceptEmbedder)).unwrap();

    let hits = searcher
        .search("kitten", &SearchOptions::default())
        .unwrap();
    let cat = hits.iter().find(|h| h.text == "cats are mammals").unwrap();
    assert_eq!(cat.id, 0);
    assert_eq!(
        cat.metadata.get("topic"),
        Some(&Value::Str("animals".into()))
    );
}

#[test]
fn scores_are_descending_and_bounded_by_top_k() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("many.idx");
    let embedder = Arc::new(RandEmbedder::new(16));
    let mut builder = IndexBuilder::new(embedder.clone());
    for i in 0..50 {
        builder.add_text(format!("document number {i}"), MetadataMap::new());
    }
    builder.build_index(&path).unwrap();

    let searcher = IndexSearcher::open(&path, embedder).unwrap();
    let hits = searcher
        .search(
            "document number 7",
            &SearchOptions {
                top_k: 10,
                complexity: 64,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert_eq!(hits.len(), 10);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    // Identical text embeds identically: the exact document must win.
    assert_eq!(hits[0].text, "document number 7");
}

#[test]
fn keyword_only_ranks_exact_phrase_over_semantic_match() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hybrid.idx");
    let mut builder = IndexBuilder::new(Arc::new(ConceptEmbedder));
    // Semantically close to the query but lexically disjoint.
    builder.add_text("felines kitten canines", MetadataMap::new());
    // Contains the query terms verbatim.
    builder.add_text("my cats sleep all day", MetadataMap::new());
    builder.build_index(&path).unwrap();

    let searcher = IndexSearcher::open(&path, Arc::new(ConceptEmbedder)).unwrap();
    let hits = searcher
        .search(
            "cats sleep",
            &SearchOptions {
                top_k: 2,
                gemma: 0.0,
                complexity: 16,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert_eq!(hits[0].text, "my cats sleep all day");
}

#[test]
fn hybrid_weight_blends_both_legs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hybrid2.idx");
    let mut builder = IndexBuilder::new(Arc::new(ConceptEmbedder));
    builder.add_text("cats and more cats", MetadataMap::new());
    builder.add_text("unrelated bookkeeping notes", MetadataMap::new());
    builder.build_index(&path).unwrap();

    let searcher = IndexSearcher::open(&path, Arc::new(ConceptEmbedder)).unwrap();
    for gemma in [0.0, 0.25, 0.5, 0.75, 1.0] {
        let hits = searcher
            .search(
                "cats",
                &SearchOptions {
                    top_k: 1,
                    gemma,
                    ..SearchOptions::default()
                },
            )
            .unwrap();
        assert_eq!(hits[0].text, "cats and more cats", "gemma={gemma}");
    }
}

#[test]
fn metadata_filter_drops_nonmatching_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_animal_index(&dir);
    let searcher = IndexSearcher::open(&path, Arc::new(ConceptEmbedder)).unwrap();

    let filter = MetadataFilter::new().with("topic", FilterOp::Eq, "software");
    let (hits, diagnostics) = searcher
        .search_with_diagnostics(
            "pets",
            &SearchOptions {
                top_k: 3,
                complexity: 16,
                filter: Some(filter),
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert!(hits.iter().all(|h| h.text == "rust is a language"));
    assert!(diagnostics.filtered_out >= 2);
}

#[test]
fn compacted_index_saves_storage_and_still_answers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compact.idx");
    let embedder = Arc::new(RandEmbedder::new(24));
    let mut builder = IndexBuilder::with_options(
        embedder.clone(),
        BuildOptions {
            compact: true,
            graph_degree: 8,
            build_complexity: 32,
            ..BuildOptions::default()
        },
    );
    let n = 80usize;
    for i in 0..n {
        builder.add_text(format!("stored chunk {i}"), MetadataMap::new());
    }
    let summary = builder.build_index(&path).unwrap();
    assert!(summary.resident < n, "compaction kept everything resident");

    let searcher = IndexSearcher::open(&path, embedder).unwrap();
    let stats = searcher.stats();
    assert!(stats.is_compact);
    // The headline property: resident bytes beat naive full storage.
    assert!(stats.resident_bytes < n * 24 * 4);

    // Recompute-marked candidates resolve through the collaborator.
    let (hits, diagnostics) = searcher
        .search_with_diagnostics(
            "stored chunk 11",
            &SearchOptions {
                top_k: 5,
                complexity: 48,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert_eq!(hits[0].text, "stored chunk 11");
    assert!(diagnostics.recomputed > 0);
    assert_eq!(diagnostics.embedding_failures, 0);
}

#[test]
fn compacted_results_match_uncompacted() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(RandEmbedder::new(16));

    let mut texts = Vec::new();
    for i in 0..60 {
        texts.push(format!("entry {i}"));
    }

    let plain = dir.path().join("plain.idx");
    let mut builder = IndexBuilder::with_options(
        embedder.clone(),
        BuildOptions {
            graph_degree: 8,
            ..BuildOptions::default()
        },
    );
    for t in &texts {
        builder.add_text(t.clone(), MetadataMap::new());
    }
    builder.build_index(&plain).unwrap();

    let compacted = dir.path().join("compact.idx");
    let mut builder = IndexBuilder::with_options(
        embedder.clone(),
        BuildOptions {
            graph_degree: 8,
            compact: true,
            ..BuildOptions::default()
        },
    );
    for t in &texts {
        builder.add_text(t.clone(), MetadataMap::new());
    }
    builder.build_index(&compacted).unwrap();

    let s1 = IndexSearcher::open(&plain, embedder.clone()).unwrap();
    let s2 = IndexSearcher::open(&compacted, embedder).unwrap();
    let options = SearchOptions {
        top_k: 10,
        complexity: 48,
        ..SearchOptions::default()
    };
    // The graphs are identical and the recomputed vectors are exact, so the
    // result sets must agree.
    let a: Vec<u64> = s1.search("entry 33", &options).unwrap().iter().map(|h| h.id).collect();
    let b: Vec<u64> = s2.search("entry 33", &options).unwrap().iter().map(|h| h.id).collect();
    assert_eq!(a, b);
}

#[test]
fn warmup_returns_elapsed_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_animal_index(&dir);
    let searcher = IndexSearcher::open(&path, Arc::new(ConceptEmbedder)).unwrap();
    let elapsed = searcher.warmup();
    assert!(elapsed >= 0.0);
    assert!(elapsed < 5.0, "warmup took {elapsed}s on a 3-passage index");
}

#[test]
fn stats_reflect_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_animal_index(&dir);
    let searcher = IndexSearcher::open(&path, Arc::new(ConceptEmbedder)).unwrap();
    let stats = searcher.stats();
    assert_eq!(stats.total_passages, 3);
    assert_eq!(stats.resident_embeddings, 3);
    assert!(!stats.is_compact);
    assert!(stats.graph_layers >= 1);
}
