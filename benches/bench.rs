//! Criterion benchmarks for xmldex.
//!
//! Covers key construction, document indexing and value lookups.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rand::Rng;
use xmldex::config::{CollectionConfigManager, EngineConfig, IndexSpec};
use xmldex::dom::{Document, DocumentBuilder, DocumentSet, NodeSet};
use xmldex::index::{QNameKey, QueryContext, Relation, ValueIndex};
use xmldex::metadata::{DocumentMetadata, DocumentType, LockTimeout, LockToken};
use xmldex::qname::{QName, SymbolTable};
use xmldex::storage::memory::MemoryStorage;
use xmldex::value::{AtomicType, AtomicValue};

/// Generate documents with `elements` random `price` and `name` children each.
fn generate_documents(count: u32, elements: usize) -> Vec<Document> {
    let mut rng = rand::rng();
    let names = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];

    (0..count)
        .map(|id| {
            let mut builder = DocumentBuilder::new(id + 1, 1, format!("doc{id}.xml"));
            builder.start_element(QName::new("items"));
            for _ in 0..elements {
                let price = rng.random_range(0..10_000);
                builder.leaf(QName::new("price"), price.to_string()).unwrap();
                let name = names[rng.random_range(0..names.len())];
                builder.leaf(QName::new("name"), name).unwrap();
            }
            builder.end_element().unwrap();
            builder.build().unwrap()
        })
        .collect()
}

fn open_index() -> ValueIndex {
    let collections = Arc::new(CollectionConfigManager::new());
    let spec = IndexSpec::default()
        .with(QName::new("price"), AtomicType::Integer)
        .unwrap()
        .with(QName::new("name"), AtomicType::String)
        .unwrap();
    collections.configure(1, spec).unwrap();
    ValueIndex::open(
        Arc::new(MemoryStorage::new_default()),
        EngineConfig::default(),
        collections,
    )
    .unwrap()
}

/// Benchmark key construction.
fn bench_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("keys");
    let symbols = SymbolTable::new();
    let qname = QName::with_namespace("http://example.org/ns", "price");

    group.bench_function("build_integer_key", |b| {
        b.iter(|| QNameKey::build(AtomicType::Integer, black_box(" 0042 "), &qname))
    });

    group.bench_function("serialize_string_key", |b| {
        let key = QNameKey::build(AtomicType::String, "The quick brown fox", &qname).unwrap();
        b.iter(|| key.serialize(black_box(1), true, &symbols))
    });

    group.bench_function("serialize_case_folded_key", |b| {
        let key = QNameKey::build(AtomicType::String, "The Quick Brown Fox", &qname).unwrap();
        b.iter(|| key.serialize(black_box(1), false, &symbols))
    });

    group.finish();
}

/// Benchmark indexing whole documents.
fn bench_indexing(c: &mut Criterion) {
    let mut group = c.benchmark_group("indexing");
    group.sample_size(20);

    let docs = generate_documents(50, 100);
    group.throughput(Throughput::Elements(50 * 200));
    group.bench_function("index_documents", |b| {
        b.iter_with_setup(
            || (open_index(), docs.clone()),
            |(index, mut docs)| {
                for doc in docs.iter_mut() {
                    index.index_document(doc).unwrap();
                }
                black_box(index.key_count().unwrap())
            },
        )
    });

    group.finish();
}

/// Benchmark lookups against a populated index.
fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    let index = open_index();
    let mut docs = generate_documents(200, 50);
    let mut doc_set = DocumentSet::new();
    for doc in docs.iter_mut() {
        index.index_document(doc).unwrap();
        doc_set.add_document(doc);
    }
    let ctx = QueryContext::new();
    let price = QName::new("price");
    let name = QName::new("name");

    group.bench_function("eq_integer", |b| {
        b.iter(|| {
            index.find_by_relation(
                Relation::Eq,
                &doc_set,
                &NodeSet::new(),
                &price,
                AtomicValue::Integer(black_box(5_000)),
                &ctx,
            )
        })
    });

    group.bench_function("lt_integer_range", |b| {
        b.iter(|| {
            index.find_by_relation(
                Relation::Lt,
                &doc_set,
                &NodeSet::new(),
                &price,
                AtomicValue::Integer(black_box(100)),
                &ctx,
            )
        })
    });

    group.bench_function("eq_string", |b| {
        b.iter(|| {
            index.find_by_relation(
                Relation::Eq,
                &doc_set,
                &NodeSet::new(),
                &name,
                AtomicValue::from(black_box("gamma")),
                &ctx,
            )
        })
    });

    group.finish();
}

/// Benchmark the metadata codec.
fn bench_metadata(c: &mut Criterion) {
    let mut group = c.benchmark_group("metadata");

    let mut metadata = DocumentMetadata::new();
    metadata.set_created(1_700_000_000_000);
    metadata.set_doc_type(Some(DocumentType::new("html").with_ids("-//W3C//DTD XHTML 1.0//EN", "xhtml1.dtd")));
    metadata.set_lock_token(Some(LockToken::exclusive_write(
        Some("alice".into()),
        LockTimeout::Seconds(600),
    )));
    let bytes = metadata.to_bytes().unwrap();

    group.bench_function("encode", |b| b.iter(|| black_box(&metadata).to_bytes()));
    group.bench_function("decode", |b| {
        b.iter(|| DocumentMetadata::from_bytes(black_box(&bytes)))
    });

    group.finish();
}

criterion_group!(benches, bench_keys, bench_indexing, bench_lookup, bench_metadata);

criterion_main!(benches);
