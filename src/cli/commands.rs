//! Command implementations for the xmldex CLI.

use std::path::Path;
use std::sync::Arc;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::{CollectionConfigManager, EngineConfig};
use crate::error::{Result, XmldexError};
use crate::index::{Relation, ValueIndex};
use crate::metadata::DocumentMetadata;
use crate::qname::QName;
use crate::storage::Storage;
use crate::storage::file::{FileStorage, FileStorageConfig};
use crate::value::{AtomicType, AtomicValue, IndexableValue};

/// Execute a CLI command.
pub fn execute_command(args: XmldexArgs) -> Result<()> {
    match &args.command {
        Command::InspectMetadata(inspect_args) => inspect_metadata(inspect_args, &args),
        Command::DumpIndex(dump_args) => dump_index(dump_args, &args),
        Command::Lookup(lookup_args) => lookup(lookup_args, &args),
    }
}

/// Decode a metadata file and print it.
fn inspect_metadata(args: &InspectMetadataArgs, cli_args: &XmldexArgs) -> Result<()> {
    let bytes = std::fs::read(&args.file)?;
    let metadata = DocumentMetadata::from_bytes(&bytes)?;
    tracing::debug!(file = %args.file.display(), bytes = bytes.len(), "metadata decoded");

    let report = MetadataReport::new(args.file.display().to_string(), &metadata);
    output_result(&report, cli_args)
}

/// List every key of an index file.
fn dump_index(args: &DumpIndexArgs, cli_args: &XmldexArgs) -> Result<()> {
    let index = open_index(&args.index_dir, &args.name, true)?;
    let entries = index.entries()?;
    let key_count = entries.len();

    let rows = entries
        .iter()
        .filter(|entry| args.collection.is_none_or(|c| entry.collection_id == c))
        .map(EntryRow::from)
        .collect();

    let dump = IndexDump {
        file: args.index_dir.join(&args.name).display().to_string(),
        key_count,
        entries: rows,
    };
    output_result(&dump, cli_args)
}

/// Scan one collection for nodes whose value matches.
fn lookup(args: &LookupArgs, cli_args: &XmldexArgs) -> Result<()> {
    let relation: Relation = args.relation.parse()?;
    let qname: QName = args.qname.parse()?;
    let value_type: AtomicType = args.value_type.parse()?;
    let value = IndexableValue::from_text(value_type, &args.value).map_err(|err| {
        XmldexError::invalid_argument(format!("'{}' is not a valid {value_type}: {err}", args.value))
    })?;

    let index = open_index(&args.index_dir, &args.name, !args.ignore_case)?;
    let nodes = index.scan_collection(
        relation,
        args.collection,
        &qname,
        AtomicValue::from(value.clone()),
    )?;

    let result = LookupResult {
        collection: args.collection,
        qname: qname.to_string(),
        relation: relation.to_string(),
        value: value.to_string(),
        value_type: value_type.to_string(),
        nodes,
    };
    output_result(&result, cli_args)
}

/// Open an existing index read-only. The index is never closed, so nothing
/// is written back.
fn open_index(dir: &Path, name: &str, case_sensitive: bool) -> Result<ValueIndex> {
    let storage = FileStorage::new(dir, FileStorageConfig::new(dir))?;
    if !storage.file_exists(name) {
        return Err(XmldexError::not_found(format!(
            "no index file '{name}' in {}",
            dir.display()
        )));
    }

    let config = EngineConfig {
        case_sensitive,
        index_file_name: name.to_string(),
        ..EngineConfig::default()
    };
    ValueIndex::open(Arc::new(storage), config, Arc::new(CollectionConfigManager::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexSpec;
    use crate::dom::DocumentBuilder;
    use tempfile::TempDir;

    fn write_index(dir: &Path) {
        let storage: Arc<dyn Storage> =
            Arc::new(FileStorage::new(dir, FileStorageConfig::new(dir)).unwrap());
        let collections = Arc::new(CollectionConfigManager::new());
        collections
            .configure(
                1,
                IndexSpec::default()
                    .with(QName::new("a"), AtomicType::Integer)
                    .unwrap(),
            )
            .unwrap();
        let index = ValueIndex::open(storage, EngineConfig::default(), collections).unwrap();

        let mut builder = DocumentBuilder::new(5, 1, "test.xml");
        builder.start_element(QName::new("test"));
        builder.leaf(QName::new("a"), "1").unwrap();
        builder.leaf(QName::new("a"), "2").unwrap();
        builder.end_element().unwrap();
        let mut doc = builder.build().unwrap();

        index.index_document(&mut doc).unwrap();
        index.close().unwrap();
    }

    #[test]
    fn test_open_missing_index() {
        let dir = TempDir::new().unwrap();
        let result = open_index(dir.path(), "values.dbx", true);
        assert!(matches!(result, Err(XmldexError::NotFound(_))));
    }

    #[test]
    fn test_open_written_index() {
        let dir = TempDir::new().unwrap();
        write_index(dir.path());

        let index = open_index(dir.path(), "values.dbx", true).unwrap();
        assert_eq!(index.entries().unwrap().len(), 2);

        let nodes = index
            .scan_collection(Relation::Ge, 1, &QName::new("a"), AtomicValue::from(1i64))
            .unwrap();
        assert_eq!(nodes.len(), 2);
    }
}
