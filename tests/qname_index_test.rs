use std::sync::Arc;

use tempfile::TempDir;
use xmldex::config::{CollectionConfigManager, EngineConfig, IndexSpec};
use xmldex::dom::{CollectionId, Document, DocumentBuilder, DocumentId, DocumentSet, NodeSet};
use xmldex::error::Result;
use xmldex::index::{QueryContext, Relation, ValueIndex};
use xmldex::qname::QName;
use xmldex::storage::Storage;
use xmldex::storage::file::{FileStorage, FileStorageConfig};
use xmldex::storage::memory::MemoryStorage;
use xmldex::value::{AtomicType, AtomicValue};

const COLLECTION: CollectionId = 1;

/// `<test><a>001</a><a>01</a><a>1</a><b>001</b><b>01</b><b>1</b></test>`
fn scenario_document(id: DocumentId) -> Result<Document> {
    let mut builder = DocumentBuilder::new(id, COLLECTION, format!("test{id}.xml"));
    builder.start_element(QName::new("test"));
    for name in ["a", "b"] {
        for text in ["001", "01", "1"] {
            builder.leaf(QName::new(name), text)?;
        }
    }
    builder.end_element()?;
    builder.build()
}

fn spec(a: AtomicType, b: AtomicType) -> Result<IndexSpec> {
    IndexSpec::default()
        .with(QName::new("a"), a)?
        .with(QName::new("b"), b)
}

fn eq_count(index: &ValueIndex, doc: &Document, name: &str, value: AtomicValue) -> Result<usize> {
    let mut docs = DocumentSet::new();
    docs.add_document(doc);
    let found = index.find_by_relation(
        Relation::Eq,
        &docs,
        &NodeSet::new(),
        &QName::new(name),
        value,
        &QueryContext::new(),
    )?;
    Ok(found.len())
}

#[test]
fn test_configuration_drives_indexing() -> Result<()> {
    // 1. No configuration yet: the document is stored but nothing is indexed
    let collections = Arc::new(CollectionConfigManager::new());
    let index = ValueIndex::open(
        Arc::new(MemoryStorage::new_default()),
        EngineConfig::default(),
        Arc::clone(&collections),
    )?;
    let mut docs = vec![scenario_document(1)?];
    index.index_document(&mut docs[0])?;

    assert_eq!(eq_count(&index, &docs[0], "a", AtomicValue::Integer(1))?, 0);
    assert_eq!(eq_count(&index, &docs[0], "b", AtomicValue::from("1"))?, 0);

    // 2. `a` as integer, `b` as string
    collections.configure(COLLECTION, spec(AtomicType::Integer, AtomicType::String)?)?;
    assert_eq!(index.reindex_collection(COLLECTION, &mut docs)?, 1);

    assert_eq!(eq_count(&index, &docs[0], "a", AtomicValue::Integer(1))?, 3);
    assert_eq!(eq_count(&index, &docs[0], "b", AtomicValue::from("1"))?, 1);
    assert_eq!(eq_count(&index, &docs[0], "b", AtomicValue::from("001"))?, 1);

    // 3. Configuring again is refused, replacing is not
    assert!(
        collections
            .configure(COLLECTION, spec(AtomicType::String, AtomicType::Integer)?)
            .is_err()
    );
    collections.replace(COLLECTION, spec(AtomicType::String, AtomicType::Integer)?);
    index.reindex_collection(COLLECTION, &mut docs)?;

    assert_eq!(eq_count(&index, &docs[0], "a", AtomicValue::Integer(1))?, 0);
    assert_eq!(eq_count(&index, &docs[0], "a", AtomicValue::from("01"))?, 1);
    assert_eq!(eq_count(&index, &docs[0], "b", AtomicValue::Integer(1))?, 3);

    Ok(())
}

#[test]
fn test_values_failing_coercion_are_skipped() -> Result<()> {
    let collections = Arc::new(CollectionConfigManager::new());
    collections.configure(
        COLLECTION,
        IndexSpec::default().with(QName::new("price"), AtomicType::Decimal)?,
    )?;
    let index = ValueIndex::open(
        Arc::new(MemoryStorage::new_default()),
        EngineConfig::default(),
        collections,
    )?;

    let mut builder = DocumentBuilder::new(3, COLLECTION, "prices.xml");
    builder.start_element(QName::new("prices"));
    for text in ["1.5", "n/a", "2.25", "", "10"] {
        builder.leaf(QName::new("price"), text)?;
    }
    builder.end_element()?;
    let mut doc = builder.build()?;

    // Indexing succeeds even though two values are not decimals
    index.index_document(&mut doc)?;

    let mut docs = DocumentSet::new();
    docs.add_document(&doc);
    let ctx = QueryContext::new();
    let price = QName::new("price");

    let all = index.find_by_relation(
        Relation::Ge,
        &docs,
        &NodeSet::new(),
        &price,
        AtomicValue::Decimal(0.0),
        &ctx,
    )?;
    assert_eq!(all.len(), 3);

    let above_two = index.find_by_relation(
        Relation::Gt,
        &docs,
        &NodeSet::new(),
        &price,
        AtomicValue::Decimal(2.0),
        &ctx,
    )?;
    assert_eq!(above_two.len(), 2);

    // A comparison value of another type matches nothing
    let as_string = index.find_by_relation(
        Relation::Eq,
        &docs,
        &NodeSet::new(),
        &price,
        AtomicValue::from("1.5"),
        &ctx,
    )?;
    assert!(as_string.is_empty());

    Ok(())
}

#[test]
fn test_index_survives_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    let open = |collections: Arc<CollectionConfigManager>| -> Result<ValueIndex> {
        let storage: Arc<dyn Storage> =
            Arc::new(FileStorage::new(dir.path(), FileStorageConfig::new(dir.path()))?);
        ValueIndex::open(storage, EngineConfig::default(), collections)
    };

    let doc = {
        let collections = Arc::new(CollectionConfigManager::new());
        collections.configure(COLLECTION, spec(AtomicType::Integer, AtomicType::String)?)?;
        let index = open(collections)?;

        let mut doc = scenario_document(9)?;
        index.index_document(&mut doc)?;
        index.close()?;
        doc
    };

    assert!(dir.path().join("values.dbx").exists());
    assert!(dir.path().join("values.dbx.symbols").exists());

    // The reopened index answers without any collection configuration
    let index = open(Arc::new(CollectionConfigManager::new()))?;
    assert_eq!(eq_count(&index, &doc, "a", AtomicValue::Integer(1))?, 3);
    assert_eq!(eq_count(&index, &doc, "b", AtomicValue::from("01"))?, 1);
    assert_eq!(index.key_count()?, 4);

    Ok(())
}

#[test]
fn test_documents_of_other_collections_are_not_returned() -> Result<()> {
    let collections = Arc::new(CollectionConfigManager::new());
    collections.configure(1, spec(AtomicType::Integer, AtomicType::String)?)?;
    collections.configure(2, spec(AtomicType::Integer, AtomicType::String)?)?;
    let index = ValueIndex::open(
        Arc::new(MemoryStorage::new_default()),
        EngineConfig::default(),
        collections,
    )?;

    let mut first = scenario_document(1)?;
    let mut builder = DocumentBuilder::new(2, 2, "other.xml");
    builder.start_element(QName::new("test"));
    builder.leaf(QName::new("a"), "1")?;
    builder.end_element()?;
    let mut second = builder.build()?;

    index.index_document(&mut first)?;
    index.index_document(&mut second)?;

    assert_eq!(eq_count(&index, &first, "a", AtomicValue::Integer(1))?, 3);
    assert_eq!(eq_count(&index, &second, "a", AtomicValue::Integer(1))?, 1);

    let mut both = DocumentSet::new();
    both.add_document(&first);
    both.add_document(&second);
    let found = index.find_by_relation(
        Relation::Eq,
        &both,
        &NodeSet::new(),
        &QName::new("a"),
        AtomicValue::Integer(1),
        &QueryContext::new(),
    )?;
    assert_eq!(found.len(), 4);

    Ok(())
}
