//! Composite index keys and the strategy seam that derives them.

use std::cmp::Ordering;
use std::fmt;

use crate::config::{IndexSpec, RangeIndexSpec};
use crate::dom::{CollectionId, IndexTypeMask};
use crate::error::{Result, XmldexError};
use crate::qname::{QName, QNameIds, SymbolTable};
use crate::value::{AtomicType, AtomicValue, IndexableValue, NotIndexable};

/// Length of the `[collection][namespace][local name]` key prefix.
pub const KEY_PREFIX_LEN: usize = 6;

/// Length of the prefix that pins collection, qualified name and value type.
pub const TYPED_PREFIX_LEN: usize = KEY_PREFIX_LEN + 1;

/// A qualified name paired with a typed value.
///
/// Keys order by the canonical string of the name first and by the value
/// second. Within one collection and name, the serialized bytes order the
/// same way, except that a case-insensitive index orders strings by their
/// lower-cased form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QNameKey {
    qname: QName,
    value: IndexableValue,
}

impl QNameKey {
    pub fn new(qname: QName, value: IndexableValue) -> Self {
        QNameKey { qname, value }
    }

    /// Key for node text under a configured type.
    pub fn build(
        atomic_type: AtomicType,
        text: &str,
        qname: &QName,
    ) -> std::result::Result<Self, NotIndexable> {
        let value = IndexableValue::from_text(atomic_type, text)?;
        Ok(QNameKey::new(qname.clone(), value))
    }

    /// Key for a comparison value supplied by the evaluator.
    pub fn from_value(value: AtomicValue, qname: &QName) -> std::result::Result<Self, NotIndexable> {
        let value = IndexableValue::try_from(value)?;
        Ok(QNameKey::new(qname.clone(), value))
    }

    pub fn qname(&self) -> &QName {
        &self.qname
    }

    pub fn value(&self) -> &IndexableValue {
        &self.value
    }

    /// On-disk form, interning the name parts on first use.
    pub fn serialize(
        &self,
        collection_id: CollectionId,
        case_sensitive: bool,
        symbols: &SymbolTable,
    ) -> Result<Vec<u8>> {
        let ids = symbols.intern(&self.qname)?;
        Ok(self.serialize_with(collection_id, ids, case_sensitive))
    }

    /// On-disk form if the name is already known to `symbols`.
    ///
    /// A name that was never interned cannot have any entries, so lookups
    /// use this to avoid growing the table.
    pub fn serialize_existing(
        &self,
        collection_id: CollectionId,
        case_sensitive: bool,
        symbols: &SymbolTable,
    ) -> Option<Vec<u8>> {
        let ids = symbols.lookup(&self.qname)?;
        Some(self.serialize_with(collection_id, ids, case_sensitive))
    }

    fn serialize_with(&self, collection_id: CollectionId, ids: QNameIds, case_sensitive: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_PREFIX_LEN + 9);
        out.extend_from_slice(&key_prefix(collection_id, ids));
        self.value.encode_into(&mut out, case_sensitive);
        out
    }
}

impl PartialOrd for QNameKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QNameKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.qname
            .cmp(&other.qname)
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl fmt::Display for QNameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.qname, self.value)
    }
}

/// The 6-byte prefix shared by every key of one name in one collection.
pub fn key_prefix(collection_id: CollectionId, ids: QNameIds) -> [u8; KEY_PREFIX_LEN] {
    let mut prefix = [0u8; KEY_PREFIX_LEN];
    prefix[0..2].copy_from_slice(&collection_id.to_be_bytes());
    prefix[2..4].copy_from_slice(&ids.namespace.to_be_bytes());
    prefix[4..6].copy_from_slice(&ids.local_name.to_be_bytes());
    prefix
}

/// A stored key split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedKey {
    pub collection_id: CollectionId,
    pub ids: QNameIds,
    pub value: IndexableValue,
}

impl DecodedKey {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() <= KEY_PREFIX_LEN {
            return Err(XmldexError::index(format!(
                "key of {} bytes is too short",
                bytes.len()
            )));
        }
        let u16_at = |i: usize| u16::from_be_bytes([bytes[i], bytes[i + 1]]);
        Ok(DecodedKey {
            collection_id: u16_at(0),
            ids: QNameIds {
                namespace: u16_at(2),
                local_name: u16_at(4),
            },
            value: IndexableValue::decode(&bytes[KEY_PREFIX_LEN..])?,
        })
    }
}

/// Derives index keys for nodes and comparison values.
///
/// The engine only talks to this trait, so a different key layout (a path
/// scoped index, say) plugs in without touching buffering, storage or
/// queries.
pub trait KeyStrategy: Send + Sync + fmt::Debug {
    type Key: Ord + Clone + fmt::Debug + fmt::Display + Send;

    /// Index kind merged into an element's mask when it is indexed.
    fn index_type(&self) -> IndexTypeMask;

    /// The index definition that applies to `qname`, or `None` when the name
    /// is not indexed. Must not allocate.
    fn lookup<'a>(&self, spec: &'a IndexSpec, qname: &QName) -> Option<&'a RangeIndexSpec>;

    /// Key for the text of a node governed by `range`.
    fn node_key(
        &self,
        range: &RangeIndexSpec,
        qname: &QName,
        text: &str,
    ) -> std::result::Result<Self::Key, NotIndexable>;

    /// Key for a query comparison value.
    fn query_key(&self, qname: &QName, value: AtomicValue) -> std::result::Result<Self::Key, NotIndexable>;

    /// Serialized key for storing, allocating symbols as needed.
    fn encode(
        &self,
        key: &Self::Key,
        collection_id: CollectionId,
        case_sensitive: bool,
        symbols: &SymbolTable,
    ) -> Result<Vec<u8>>;

    /// Serialized key for lookups, or `None` if nothing can match it.
    fn encode_existing(
        &self,
        key: &Self::Key,
        collection_id: CollectionId,
        case_sensitive: bool,
        symbols: &SymbolTable,
    ) -> Option<Vec<u8>>;

    /// Bytes of an encoded key that range scans must not leave.
    fn scan_prefix_len(&self) -> usize;
}

/// Keys scoped by qualified name: `[collection][ns][local][value]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QNameKeyStrategy;

impl KeyStrategy for QNameKeyStrategy {
    type Key = QNameKey;

    fn index_type(&self) -> IndexTypeMask {
        IndexTypeMask::QNAME
    }

    fn lookup<'a>(&self, spec: &'a IndexSpec, qname: &QName) -> Option<&'a RangeIndexSpec> {
        spec.get(qname)
    }

    fn node_key(
        &self,
        range: &RangeIndexSpec,
        qname: &QName,
        text: &str,
    ) -> std::result::Result<QNameKey, NotIndexable> {
        QNameKey::build(range.atomic_type, text, qname)
    }

    fn query_key(&self, qname: &QName, value: AtomicValue) -> std::result::Result<QNameKey, NotIndexable> {
        QNameKey::from_value(value, qname)
    }

    fn encode(
        &self,
        key: &QNameKey,
        collection_id: CollectionId,
        case_sensitive: bool,
        symbols: &SymbolTable,
    ) -> Result<Vec<u8>> {
        key.serialize(collection_id, case_sensitive, symbols)
    }

    fn encode_existing(
        &self,
        key: &QNameKey,
        collection_id: CollectionId,
        case_sensitive: bool,
        symbols: &SymbolTable,
    ) -> Option<Vec<u8>> {
        key.serialize_existing(collection_id, case_sensitive, symbols)
    }

    fn scan_prefix_len(&self) -> usize {
        TYPED_PREFIX_LEN
    }
}
