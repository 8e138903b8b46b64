use std::sync::Arc;

use tempfile::TempDir;
use xmldex::error::{Result, XmldexError};
use xmldex::metadata::{DocumentMetadata, DocumentType, LockTimeout, LockToken};
use xmldex::resource::{DocumentRecord, ResourceRegistry, User};
use xmldex::storage::file::{FileStorage, FileStorageConfig};
use xmldex::txn::TransactionManager;
use xmldex::webdav::{LockCoordinator, LockRequest};

fn registry(dir: &TempDir) -> Result<Arc<ResourceRegistry>> {
    let storage = FileStorage::new(dir.path(), FileStorageConfig::new(dir.path()))?;
    Ok(Arc::new(ResourceRegistry::new(Arc::new(storage))))
}

#[test]
fn test_metadata_file_decodes_standalone() -> Result<()> {
    let dir = TempDir::new()?;
    let registry = registry(&dir)?;

    let mut metadata = DocumentMetadata::new();
    metadata.set_created(1_600_000_000_000);
    metadata.set_last_modified(1_600_000_500_000);
    metadata.set_page_count(12);
    metadata.set_doc_type(Some(
        DocumentType::new("html").with_ids("-//W3C//DTD XHTML 1.0 Strict//EN", "xhtml1-strict.dtd"),
    ));
    registry.add_document(DocumentRecord::new(42, "/db/site/index.xml").with_metadata(metadata.clone()))?;

    let path = dir.path().join(ResourceRegistry::metadata_file_name(42));
    let bytes = std::fs::read(&path)?;
    let decoded = DocumentMetadata::from_bytes(&bytes)?;
    assert_eq!(decoded, metadata);
    assert_eq!(decoded.doc_type().and_then(|d| d.system_id.as_deref()), Some("xhtml1-strict.dtd"));
    assert!(decoded.lock_token().is_none());

    // Every strict prefix of the file is rejected
    for len in [0, 1, bytes.len() / 2, bytes.len() - 1] {
        assert!(matches!(
            DocumentMetadata::from_bytes(&bytes[..len]),
            Err(XmldexError::MetadataCodec(_))
        ));
    }
    Ok(())
}

#[test]
fn test_lock_token_reaches_disk() -> Result<()> {
    let dir = TempDir::new()?;
    let registry = registry(&dir)?;
    registry.add_document(DocumentRecord::new(7, "/db/a.xml"))?;

    let coordinator = LockCoordinator::new(Arc::clone(&registry), Arc::new(TransactionManager::new()));
    let carol = User::new(5, "carol");
    let granted = coordinator.lock(
        &carol,
        "/db/a.xml",
        &LockRequest::default()
            .with_owner("mailto:carol@example.org")
            .with_timeout(LockTimeout::Seconds(3600)),
    )?;

    let bytes = std::fs::read(dir.path().join(ResourceRegistry::metadata_file_name(7)))?;
    let decoded = DocumentMetadata::from_bytes(&bytes)?;
    let token: &LockToken = decoded.lock_token().ok_or_else(|| XmldexError::other("no lock token"))?;

    assert_eq!(token, &granted.token);
    assert_eq!(token.owner.as_deref(), Some("mailto:carol@example.org"));
    assert_eq!(token.timeout, LockTimeout::Seconds(3600));
    assert_eq!(decoded.user_lock(), carol.id);
    Ok(())
}
