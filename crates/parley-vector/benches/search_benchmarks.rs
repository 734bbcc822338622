//! Benchmarks for similarity search and collection loading.
//!
//! Uses 5,000 chunks by default. Set `BENCH_FULL_SCALE=1` to run against
//! 50,000 chunks:
//!
//! ```bash
//! BENCH_FULL_SCALE=1 cargo bench -p parley-vector
//! ```

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use parley_vector::embedding::{EmbeddingService, MockEmbedding};
use parley_vector::index::VectorIndex;
use parley_vector::search::SearchEngine;
use parley_vector::store::{StoredDocument, VectorStore};

const CI_CHUNK_COUNT: usize = 5_000;
const FULL_SCALE_CHUNK_COUNT: usize = 50_000;

fn chunk_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_CHUNK_COUNT
    } else {
        CI_CHUNK_COUNT
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
}

/// Article-sized chunk, made unique by its index.
fn chunk_text(index: usize) -> String {
    format!(
        "Retrieval-augmented generation grounds a language model in documents \
         fetched at query time. A question is rewritten into a standalone query, \
         embedded, and matched against an index of article chunks; the closest \
         chunks are pasted into the prompt as context. Article {} section {}.",
        index / 10,
        index % 10
    )
}

fn chunk_metadata(index: usize) -> Map<String, Value> {
    match json!({"title": format!("Article {}", index / 10), "chunk": index}) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn build_documents(count: usize) -> Vec<StoredDocument> {
    let rt = runtime();
    let embedder = MockEmbedding::new();
    (0..count)
        .map(|i| {
            let content = chunk_text(i);
            let embedding = rt.block_on(embedder.embed(&content)).expect("embed failed");
            StoredDocument {
                id: Uuid::new_v4(),
                content,
                metadata: chunk_metadata(i),
                embedding,
            }
        })
        .collect()
}

fn build_index(documents: &[StoredDocument]) -> VectorIndex {
    let index = VectorIndex::new();
    for doc in documents {
        index
            .insert(doc.id, doc.embedding.clone(), doc.content.clone(), doc.metadata.clone())
            .expect("insert failed");
    }
    index
}

fn bench_index_search(c: &mut Criterion) {
    let count = chunk_count();
    let index = build_index(&build_documents(count));
    let query = runtime()
        .block_on(MockEmbedding::new().embed("what is retrieval-augmented generation"))
        .expect("query embed failed");

    let mut group = c.benchmark_group("index_search");
    group.measurement_time(Duration::from_secs(10));
    for k in [2usize, 10] {
        group.bench_function(format!("top{}_{}chunks", k, count), |b| {
            b.iter(|| index.search(&query, k).expect("search failed"));
        });
    }
    group.finish();
}

fn bench_similarity_search(c: &mut Criterion) {
    let count = chunk_count();
    let engine = SearchEngine::new(build_index(&build_documents(count)), MockEmbedding::new());
    let rt = runtime();

    let mut group = c.benchmark_group("similarity_search");
    group.measurement_time(Duration::from_secs(10));
    group.bench_function(format!("embed_and_top2_{}chunks", count), |b| {
        b.iter(|| {
            let docs = rt
                .block_on(engine.similarity_search("how are chunks matched to a query", 2))
                .expect("similarity search failed");
            assert_eq!(docs.len(), 2);
            docs
        });
    });
    group.finish();
}

fn bench_load_collection(c: &mut Criterion) {
    let count = chunk_count();
    let dir = tempfile::tempdir().expect("tempdir");
    let store = VectorStore::create(dir.path()).expect("create store");
    store
        .ensure_collection("bench", MockEmbedding::new().dimensions())
        .expect("create collection");
    store
        .add_documents("bench", &build_documents(count))
        .expect("add documents");

    let mut group = c.benchmark_group("load_collection");
    group.sample_size(10);
    group.bench_function(format!("{}chunks", count), |b| {
        b.iter(|| {
            let index = store.load_collection("bench").expect("load failed");
            assert_eq!(index.len(), count);
            index
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_index_search,
    bench_similarity_search,
    bench_load_collection,
);
criterion_main!(benches);
