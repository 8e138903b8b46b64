//! Document records, principals and the resource registry.
//!
//! [`ResourceStore`] is what the lock coordinator needs from the database:
//! permission-checked document lookup, collection existence, the
//! per-document update lock and transactional metadata writes.
//! [`ResourceRegistry`] is an in-process implementation that persists each
//! document's metadata through a [`Storage`] backend.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::dom::DocumentId;
use crate::error::{Result, XmldexError};
use crate::metadata::DocumentMetadata;
use crate::storage::{self, Storage};
use crate::txn::{CommitTarget, TransactionOperation};

/// Id reserved for "no user".
pub const NO_USER: i32 = 0;

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
}

impl User {
    pub fn new<S: Into<String>>(id: i32, name: S) -> Self {
        User {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Who may access a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    /// Every user.
    #[default]
    Everyone,
    /// Only the listed user ids.
    Users(BTreeSet<i32>),
}

impl Access {
    pub fn allows(&self, user: &User) -> bool {
        match self {
            Access::Everyone => true,
            Access::Users(ids) => ids.contains(&user.id),
        }
    }
}

/// A stored document as seen by the resource layer.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub doc_id: DocumentId,
    pub path: String,
    pub access: Access,
    pub metadata: DocumentMetadata,
}

impl DocumentRecord {
    pub fn new<S: Into<String>>(doc_id: DocumentId, path: S) -> Self {
        DocumentRecord {
            doc_id,
            path: path.into(),
            access: Access::Everyone,
            metadata: DocumentMetadata::new(),
        }
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Collection path of the document (everything before the last `/`).
    pub fn collection_path(&self) -> &str {
        parent_path(&self.path)
    }
}

fn parent_path(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) => "/",
        Some(index) => &path[..index],
        None => "",
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim();
    let trimmed = if trimmed.len() > 1 {
        trimmed.trim_end_matches('/')
    } else {
        trimmed
    };
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// The database as seen by the lock coordinator.
pub trait ResourceStore: CommitTarget + fmt::Debug {
    /// The document at `path`, or `None` if there is none.
    ///
    /// Fails with `PermissionDenied` if `principal` may not access it.
    fn document(&self, principal: &User, path: &str) -> Result<Option<DocumentRecord>>;

    fn collection_exists(&self, path: &str) -> bool;

    /// The mutex serializing updates of the document at `path`.
    fn update_lock(&self, path: &str) -> Option<Arc<Mutex<()>>>;

    fn user(&self, id: i32) -> Option<User>;
}

#[derive(Debug)]
struct Entry {
    record: RwLock<DocumentRecord>,
    update_lock: Arc<Mutex<()>>,
}

/// In-process [`ResourceStore`].
///
/// Metadata is written as `meta-{doc_id}.bin` in the storage before it is
/// published in memory.
#[derive(Debug)]
pub struct ResourceRegistry {
    storage: Arc<dyn Storage>,
    collections: RwLock<BTreeSet<String>>,
    documents: RwLock<AHashMap<String, Arc<Entry>>>,
    users: RwLock<BTreeMap<i32, User>>,
}

impl ResourceRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let mut collections = BTreeSet::new();
        collections.insert("/".to_string());
        ResourceRegistry {
            storage,
            collections: RwLock::new(collections),
            documents: RwLock::new(AHashMap::new()),
            users: RwLock::new(BTreeMap::new()),
        }
    }

    /// Storage file holding the metadata of `doc_id`.
    pub fn metadata_file_name(doc_id: DocumentId) -> String {
        format!("meta-{doc_id}.bin")
    }

    pub fn add_user(&self, user: User) {
        self.users.write().insert(user.id, user);
    }

    /// Create a collection and its ancestors.
    pub fn add_collection(&self, path: &str) {
        let mut collections = self.collections.write();
        let mut current = normalize(path);
        loop {
            let parent = parent_path(&current).to_string();
            collections.insert(current.clone());
            if parent.is_empty() || parent == current {
                break;
            }
            current = parent;
        }
    }

    /// Register a document, creating its collection. Its metadata is
    /// persisted immediately.
    pub fn add_document(&self, mut record: DocumentRecord) -> Result<()> {
        record.path = normalize(&record.path);
        if self.documents.read().contains_key(&record.path) {
            return Err(XmldexError::invalid_operation(format!(
                "{} already exists",
                record.path
            )));
        }
        self.add_collection(record.collection_path());
        self.persist(record.doc_id, &record.metadata)?;

        let entry = Arc::new(Entry {
            record: RwLock::new(record.clone()),
            update_lock: Arc::new(Mutex::new(())),
        });
        self.documents.write().insert(record.path, entry);
        Ok(())
    }

    /// Re-read the persisted metadata of the document at `path`.
    pub fn load_metadata(&self, path: &str) -> Result<DocumentMetadata> {
        let entry = self.entry(path)?;
        let doc_id = entry.record.read().doc_id;
        let bytes = storage::read_all(self.storage.as_ref(), &Self::metadata_file_name(doc_id))?;
        DocumentMetadata::from_bytes(&bytes)
    }

    /// Current metadata of the document at `path`, without permission checks.
    pub fn metadata(&self, path: &str) -> Result<DocumentMetadata> {
        Ok(self.entry(path)?.record.read().metadata.clone())
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }

    fn entry(&self, path: &str) -> Result<Arc<Entry>> {
        self.documents
            .read()
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| XmldexError::not_found(path.to_string()))
    }

    fn persist(&self, doc_id: DocumentId, metadata: &DocumentMetadata) -> Result<()> {
        storage::write_all_atomic(
            self.storage.as_ref(),
            &Self::metadata_file_name(doc_id),
            &metadata.to_bytes()?,
        )
    }
}

impl CommitTarget for ResourceRegistry {
    fn apply(&self, transaction_id: &str, operations: &[TransactionOperation]) -> Result<()> {
        let mut staged = Vec::with_capacity(operations.len());
        for operation in operations {
            match operation {
                TransactionOperation::StoreMetadata { path, metadata } => {
                    let entry = self.entry(path)?;
                    let doc_id = entry.record.read().doc_id;
                    self.persist(doc_id, metadata)?;
                    staged.push((entry, metadata));
                }
            }
        }

        for (entry, metadata) in staged {
            entry.record.write().metadata = metadata.clone();
        }

        tracing::debug!(
            target: "xmldex::resource",
            txn = transaction_id,
            operations = operations.len(),
            "metadata published"
        );
        Ok(())
    }
}

impl ResourceStore for ResourceRegistry {
    fn document(&self, principal: &User, path: &str) -> Result<Option<DocumentRecord>> {
        let Some(entry) = self.documents.read().get(&normalize(path)).cloned() else {
            return Ok(None);
        };
        let record = entry.record.read();
        if !record.access.allows(principal) {
            return Err(XmldexError::permission_denied(format!(
                "{principal} may not access {path}"
            )));
        }
        Ok(Some(record.clone()))
    }

    fn collection_exists(&self, path: &str) -> bool {
        self.collections.read().contains(&normalize(path))
    }

    fn update_lock(&self, path: &str) -> Option<Arc<Mutex<()>>> {
        self.documents
            .read()
            .get(&normalize(path))
            .map(|entry| Arc::clone(&entry.update_lock))
    }

    fn user(&self, id: i32) -> Option<User> {
        self.users.read().get(&id).cloned()
    }
}
