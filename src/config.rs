//! Engine settings and per-collection index configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::dom::CollectionId;
use crate::error::{Result, XmldexError};
use crate::qname::QName;
use crate::value::AtomicType;

fn default_true() -> bool {
    true
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_index_file_name() -> String {
    "values.dbx".to_string()
}

/// Settings of the sorted index store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum time to wait for the store lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Persist the index file after every flush.
    #[serde(default)]
    pub sync_on_flush: bool,
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            lock_timeout_ms: default_lock_timeout_ms(),
            sync_on_flush: false,
        }
    }
}

/// Settings of the value index engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whether string keys keep their case.
    #[serde(default = "default_true")]
    pub case_sensitive: bool,

    /// Master switch for QName value indexing. When off every indexing and
    /// lookup entry point does nothing.
    #[serde(default = "default_true")]
    pub qname_indexing: bool,

    #[serde(default)]
    pub store: StoreConfig,

    /// Name of the index file inside the storage.
    #[serde(default = "default_index_file_name")]
    pub index_file_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            case_sensitive: true,
            qname_indexing: true,
            store: StoreConfig::default(),
            index_file_name: default_index_file_name(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

mod qname_string {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::qname::QName;

    pub fn serialize<S: Serializer>(qname: &QName, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(qname)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<QName, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One `create` entry: index `qname` as values of `atomic_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeIndexSpec {
    #[serde(with = "qname_string")]
    pub qname: QName,

    #[serde(rename = "type")]
    pub atomic_type: AtomicType,
}

#[derive(Deserialize)]
struct RawIndexSpec {
    #[serde(default)]
    create: Vec<RangeIndexSpec>,
}

/// Index configuration of one collection.
///
/// ```
/// use xmldex::config::IndexSpec;
/// use xmldex::qname::QName;
/// use xmldex::value::AtomicType;
///
/// let spec = IndexSpec::from_json(r#"{"create":[{"qname":"a","type":"xs:integer"}]}"#).unwrap();
/// assert_eq!(spec.get(&QName::new("a")).unwrap().atomic_type, AtomicType::Integer);
/// assert!(spec.get(&QName::new("b")).is_none());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "RawIndexSpec")]
pub struct IndexSpec {
    create: Vec<RangeIndexSpec>,
    #[serde(skip)]
    by_qname: AHashMap<QName, usize>,
}

impl IndexSpec {
    pub fn new(create: Vec<RangeIndexSpec>) -> Result<Self> {
        let mut by_qname = AHashMap::with_capacity(create.len());
        for (i, spec) in create.iter().enumerate() {
            if !spec.atomic_type.is_indexable() {
                return Err(XmldexError::invalid_config(format!(
                    "type {} of {} cannot be indexed",
                    spec.atomic_type, spec.qname
                )));
            }
            if by_qname.insert(spec.qname.clone(), i).is_some() {
                return Err(XmldexError::invalid_config(format!(
                    "{} is configured twice",
                    spec.qname
                )));
            }
        }
        Ok(IndexSpec { create, by_qname })
    }

    /// Builder-style entry for tests and programmatic setup.
    pub fn with(mut self, qname: QName, atomic_type: AtomicType) -> Result<Self> {
        self.create.push(RangeIndexSpec { qname, atomic_type });
        Self::new(self.create)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The index definition for `qname`, if any.
    pub fn get(&self, qname: &QName) -> Option<&RangeIndexSpec> {
        self.by_qname.get(qname).map(|&i| &self.create[i])
    }

    pub fn entries(&self) -> &[RangeIndexSpec] {
        &self.create
    }

    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
    }
}

impl PartialEq for IndexSpec {
    fn eq(&self, other: &Self) -> bool {
        self.create == other.create
    }
}

impl TryFrom<RawIndexSpec> for IndexSpec {
    type Error = XmldexError;

    fn try_from(raw: RawIndexSpec) -> Result<Self> {
        IndexSpec::new(raw.create)
    }
}

/// Holds the index configuration of every collection.
///
/// A collection has at most one configuration. Configuring it a second time
/// is an error; [`CollectionConfigManager::replace`] swaps it explicitly.
#[derive(Debug, Default)]
pub struct CollectionConfigManager {
    configs: RwLock<AHashMap<CollectionId, Arc<IndexSpec>>>,
}

impl CollectionConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&self, collection_id: CollectionId, spec: IndexSpec) -> Result<()> {
        let mut configs = self.configs.write();
        if configs.contains_key(&collection_id) {
            return Err(XmldexError::invalid_config(format!(
                "collection {collection_id} is already configured"
            )));
        }
        configs.insert(collection_id, Arc::new(spec));
        Ok(())
    }

    /// Install `spec`, returning the configuration it replaced.
    pub fn replace(&self, collection_id: CollectionId, spec: IndexSpec) -> Option<Arc<IndexSpec>> {
        self.configs.write().insert(collection_id, Arc::new(spec))
    }

    pub fn remove(&self, collection_id: CollectionId) -> Option<Arc<IndexSpec>> {
        self.configs.write().remove(&collection_id)
    }

    pub fn get(&self, collection_id: CollectionId) -> Option<Arc<IndexSpec>> {
        self.configs.read().get(&collection_id).cloned()
    }
}
