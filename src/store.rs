//! Persistent sorted key/postings store.
//!
//! The whole file is guarded by one reader/writer lock. Callers obtain a
//! [`StoreGuard`] with [`SortedIndexFile::acquire`], which waits at most the
//! configured lock timeout, and the lock is released when the guard drops.
//!
//! File layout (see [`crate::storage::structured`]):
//!
//! ```text
//! u32 magic | u16 version | varint entry count
//! entry*: bytes key | bytes postings
//! u32 crc32
//! ```

pub mod postings;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::StoreConfig;
use crate::error::{Result, XmldexError};
use crate::index::query::IndexQuery;
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

pub use postings::{DocPostings, Postings};

const MAGIC: u32 = 0x5844_5856; // "XDXV"
const VERSION: u16 = 1;

/// Lock mode requested from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    dirty: bool,
    closed: bool,
}

/// A sorted map from encoded keys to encoded [`Postings`], persisted as one
/// file in a [`Storage`].
#[derive(Debug)]
pub struct SortedIndexFile {
    storage: Arc<dyn Storage>,
    name: String,
    config: StoreConfig,
    state: RwLock<IndexState>,
}

impl SortedIndexFile {
    /// Open `name` in `storage`, or start empty if it does not exist yet.
    pub fn open(storage: Arc<dyn Storage>, name: &str, config: StoreConfig) -> Result<Self> {
        let entries = if storage.file_exists(name) {
            Self::load(storage.as_ref(), name)?
        } else {
            BTreeMap::new()
        };

        tracing::debug!(
            target: "xmldex::store",
            file = name,
            entries = entries.len(),
            "opened index file"
        );

        Ok(SortedIndexFile {
            storage,
            name: name.to_string(),
            config,
            state: RwLock::new(IndexState {
                entries,
                dirty: false,
                closed: false,
            }),
        })
    }

    fn load(storage: &dyn Storage, name: &str) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut reader = StructReader::new(storage.open_input(name)?)?;

        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(XmldexError::index(format!(
                "{name} is not an index file (magic {magic:#010x})"
            )));
        }
        let version = reader.read_u16()?;
        if version != VERSION {
            return Err(XmldexError::index(format!(
                "{name} has unsupported version {version}"
            )));
        }

        let count = reader.read_varint()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = reader.read_bytes()?;
            let postings = reader.read_bytes()?;
            entries.insert(key, postings);
        }

        if !reader.verify_checksum()? {
            return Err(XmldexError::index(format!("checksum mismatch in {name}")));
        }
        reader.close()?;
        Ok(entries)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the store lock in `mode`, waiting at most the configured timeout.
    pub fn acquire(&self, mode: LockMode) -> Result<StoreGuard<'_>> {
        let timeout = self.config.lock_timeout();
        let inner = match mode {
            LockMode::Read => self.state.try_read_for(timeout).map(GuardInner::Read),
            LockMode::Write => self.state.try_write_for(timeout).map(GuardInner::Write),
        }
        .ok_or_else(|| {
            XmldexError::lock_acquisition(format!(
                "{:?} lock on {} not acquired within {:?}",
                mode, self.name, timeout
            ))
        })?;

        let guard = StoreGuard { file: self, inner };
        if guard.state().closed {
            return Err(XmldexError::storage(format!("{} is closed", self.name)));
        }
        Ok(guard)
    }

    /// Write the file if it changed since the last sync.
    pub fn sync(&self) -> Result<()> {
        self.acquire(LockMode::Write)?.sync()
    }

    /// Sync and refuse every later use.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.acquire(LockMode::Write)?;
        guard.sync()?;
        guard.state_mut()?.closed = true;
        Ok(())
    }

    fn persist(&self, entries: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<()> {
        let temp_name = format!("{}.tmp", self.name);
        let mut writer = StructWriter::new(self.storage.create_output(&temp_name)?);
        writer.write_u32(MAGIC)?;
        writer.write_u16(VERSION)?;
        writer.write_varint(entries.len() as u64)?;
        for (key, postings) in entries {
            writer.write_bytes(key)?;
            writer.write_bytes(postings)?;
        }
        writer.close()?;
        self.storage.rename_file(&temp_name, &self.name)?;

        tracing::debug!(
            target: "xmldex::store",
            file = %self.name,
            entries = entries.len(),
            "index file written"
        );
        Ok(())
    }
}

enum GuardInner<'a> {
    Read(RwLockReadGuard<'a, IndexState>),
    Write(RwLockWriteGuard<'a, IndexState>),
}

/// Holds the store lock. Dropping it releases the lock.
pub struct StoreGuard<'a> {
    file: &'a SortedIndexFile,
    inner: GuardInner<'a>,
}

impl StoreGuard<'_> {
    pub fn mode(&self) -> LockMode {
        match self.inner {
            GuardInner::Read(_) => LockMode::Read,
            GuardInner::Write(_) => LockMode::Write,
        }
    }

    fn state(&self) -> &IndexState {
        match &self.inner {
            GuardInner::Read(guard) => guard,
            GuardInner::Write(guard) => guard,
        }
    }

    fn state_mut(&mut self) -> Result<&mut IndexState> {
        match &mut self.inner {
            GuardInner::Write(guard) => Ok(guard),
            GuardInner::Read(_) => Err(XmldexError::invalid_operation(format!(
                "{} is only read locked",
                self.file.name
            ))),
        }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Call `callback` for every entry matching `query`, in key order.
    pub fn query<F>(&self, query: &IndexQuery, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8], &Postings) -> Result<()>,
    {
        for (key, value) in self.state().entries.range::<Vec<u8>, _>(query.range()) {
            if query.is_excluded(key) {
                continue;
            }
            let postings = Postings::decode(value)?;
            callback(key, &postings)?;
        }
        Ok(())
    }

    /// Postings stored under exactly `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Postings>> {
        self.state()
            .entries
            .get(key)
            .map(|value| Postings::decode(value))
            .transpose()
    }

    /// Append `gids` of `doc_id` under `key`.
    pub fn append(&mut self, key: &[u8], doc_id: u32, gids: &[u64]) -> Result<()> {
        let state = self.state_mut()?;
        let mut postings = match state.entries.get(key) {
            Some(value) => Postings::decode(value)?,
            None => Postings::new(),
        };
        postings.append(doc_id, gids);
        state.entries.insert(key.to_vec(), postings.encode());
        state.dirty = true;
        Ok(())
    }

    /// Store `value` under `key` without decoding it.
    #[cfg(test)]
    pub(crate) fn put_raw(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let state = self.state_mut()?;
        state.entries.insert(key.to_vec(), value);
        state.dirty = true;
        Ok(())
    }

    /// Remove `gids` of `doc_id` from `key`. Returns the number of node ids removed.
    pub fn remove_nodes(&mut self, key: &[u8], doc_id: u32, gids: &[u64]) -> Result<usize> {
        let state = self.state_mut()?;
        let Some(value) = state.entries.get(key) else {
            return Ok(0);
        };
        let mut postings = Postings::decode(value)?;
        let removed = postings.remove_nodes(doc_id, gids);
        if removed > 0 {
            if postings.is_empty() {
                state.entries.remove(key);
            } else {
                state.entries.insert(key.to_vec(), postings.encode());
            }
            state.dirty = true;
        }
        Ok(removed)
    }

    /// Remove every node of `doc_id` under keys starting with `prefix`.
    /// Returns the number of node ids removed.
    pub fn remove_document(&mut self, prefix: &[u8], doc_id: u32) -> Result<usize> {
        let state = self.state_mut()?;
        let query = IndexQuery::prefix(prefix);
        let mut updates = Vec::new();

        for (key, value) in state.entries.range::<Vec<u8>, _>(query.range()) {
            let mut postings = Postings::decode(value)?;
            let removed = postings.remove_document(doc_id);
            if removed > 0 {
                updates.push((key.clone(), postings, removed));
            }
        }

        let mut total = 0;
        for (key, postings, removed) in updates {
            total += removed;
            if postings.is_empty() {
                state.entries.remove(&key);
            } else {
                state.entries.insert(key, postings.encode());
            }
        }
        if total > 0 {
            state.dirty = true;
        }
        Ok(total)
    }

    /// Write the file if it changed since the last sync.
    pub fn sync(&mut self) -> Result<()> {
        let file = self.file;
        let state = self.state_mut()?;
        if state.dirty {
            file.persist(&state.entries)?;
            state.dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::query::Relation;
    use crate::storage::memory::MemoryStorage;
    use std::time::Duration;

    fn open(storage: &Arc<dyn Storage>) -> SortedIndexFile {
        SortedIndexFile::open(Arc::clone(storage), "values.dbx", StoreConfig::default()).unwrap()
    }

    fn memory() -> Arc<dyn Storage> {
        Arc::new(MemoryStorage::new_default())
    }

    #[test]
    fn test_append_query_and_persist() {
        let storage = memory();
        let file = open(&storage);
        {
            let mut guard = file.acquire(LockMode::Write).unwrap();
            guard.append(&[0, 1, 5], 1, &[3, 4]).unwrap();
            guard.append(&[0, 1, 7], 1, &[5]).unwrap();
            guard.append(&[0, 2, 1], 2, &[2]).unwrap();
            guard.sync().unwrap();
        }

        let reopened = open(&storage);
        let guard = reopened.acquire(LockMode::Read).unwrap();
        assert_eq!(guard.len(), 3);

        let mut seen = Vec::new();
        let query = IndexQuery::new(Relation::Ge, vec![0, 1, 5], 2);
        guard
            .query(&query, |key, postings| {
                seen.push((key.to_vec(), postings.len()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(vec![0, 1, 5], 2), (vec![0, 1, 7], 1)]);
    }

    #[test]
    fn test_remove_nodes_and_documents() {
        let storage = memory();
        let file = open(&storage);
        let mut guard = file.acquire(LockMode::Write).unwrap();
        guard.append(&[1, 1], 1, &[3, 4]).unwrap();
        guard.append(&[1, 2], 1, &[5]).unwrap();
        guard.append(&[1, 2], 2, &[6]).unwrap();
        guard.append(&[2, 1], 1, &[7]).unwrap();

        assert_eq!(guard.remove_nodes(&[1, 1], 1, &[3]).unwrap(), 1);
        assert_eq!(guard.remove_document(&[1], 1).unwrap(), 2);
        assert!(guard.get(&[1, 1]).unwrap().is_none());
        assert_eq!(guard.get(&[1, 2]).unwrap().unwrap().len(), 1);
        assert_eq!(guard.get(&[2, 1]).unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_read_guard_cannot_write() {
        let storage = memory();
        let file = open(&storage);
        let mut guard = file.acquire(LockMode::Read).unwrap();
        assert_eq!(guard.mode(), LockMode::Read);
        assert!(guard.append(&[1], 1, &[1]).is_err());
    }

    #[test]
    fn test_lock_timeout() {
        let storage = memory();
        let config = StoreConfig {
            lock_timeout_ms: 20,
            sync_on_flush: false,
        };
        let file = SortedIndexFile::open(storage, "values.dbx", config).unwrap();

        let writer = file.acquire(LockMode::Write).unwrap();
        let err = file.acquire(LockMode::Read).err().unwrap();
        assert!(matches!(err, XmldexError::LockAcquisition(_)));
        drop(writer);

        let _a = file.acquire(LockMode::Read).unwrap();
        let _b = file.acquire(LockMode::Read).unwrap();
        assert!(Duration::from_millis(20) == file.config.lock_timeout());
    }

    #[test]
    fn test_closed_file_is_rejected() {
        let storage = memory();
        let file = open(&storage);
        file.acquire(LockMode::Write)
            .unwrap()
            .append(&[1], 1, &[1])
            .unwrap();
        file.close().unwrap();
        assert!(storage.file_exists("values.dbx"));
        assert!(matches!(
            file.acquire(LockMode::Read).err().unwrap(),
            XmldexError::Storage(_)
        ));
    }

    #[test]
    fn test_corrupt_file_fails_to_open() {
        let storage = Arc::new(MemoryStorage::new_default());
        let dyn_storage: Arc<dyn Storage> = storage.clone();
        {
            let file = open(&dyn_storage);
            let mut guard = file.acquire(LockMode::Write).unwrap();
            guard.append(&[9, 9], 3, &[1, 2]).unwrap();
            guard.sync().unwrap();
        }

        let mut bytes = crate::storage::read_all(storage.as_ref(), "values.dbx").unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0x01;
        storage.corrupt_file("values.dbx", &bytes);

        assert!(SortedIndexFile::open(dyn_storage, "values.dbx", StoreConfig::default()).is_err());
    }
}
