//! Qualified names and the symbol table that interns their parts.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, XmldexError};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::Storage;

/// A namespace-qualified XML name.
///
/// Identity is `(namespace, local_name)`; the prefix is carried for display
/// only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QName {
    namespace: String,
    local_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
}

impl QName {
    /// A name with no namespace.
    pub fn new<S: Into<String>>(local_name: S) -> Self {
        QName {
            namespace: String::new(),
            local_name: local_name.into(),
            prefix: None,
        }
    }

    /// A name in `namespace`.
    pub fn with_namespace<N: Into<String>, L: Into<String>>(namespace: N, local_name: L) -> Self {
        QName {
            namespace: namespace.into(),
            local_name: local_name.into(),
            prefix: None,
        }
    }

    /// Attach a display prefix.
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn has_namespace(&self) -> bool {
        !self.namespace.is_empty()
    }

    /// `{ns}local` when namespaced, `local` otherwise.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    fn cmp_canonical(&self, other: &QName) -> Ordering {
        // Byte-wise comparison of the canonical forms without allocating them.
        fn parts(q: &QName) -> [&[u8]; 4] {
            if q.has_namespace() {
                [
                    b"{".as_slice(),
                    q.namespace.as_bytes(),
                    b"}".as_slice(),
                    q.local_name.as_bytes(),
                ]
            } else {
                let none = b"".as_slice();
                [none, none, none, q.local_name.as_bytes()]
            }
        }
        let a = parts(self).into_iter().flatten();
        let b = parts(other).into_iter().flatten();
        a.cmp(b)
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.local_name == other.local_name
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.local_name.hash(state);
    }
}

impl PartialOrd for QName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_canonical(other)
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_namespace() {
            write!(f, "{{{}}}{}", self.namespace, self.local_name)
        } else {
            f.write_str(&self.local_name)
        }
    }
}

impl FromStr for QName {
    type Err = XmldexError;

    /// Parses `local` or `{namespace}local`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('{') {
            let (namespace, local) = rest
                .split_once('}')
                .ok_or_else(|| XmldexError::invalid_argument(format!("unterminated namespace in '{s}'")))?;
            if local.is_empty() {
                return Err(XmldexError::invalid_argument(format!("missing local name in '{s}'")));
            }
            Ok(QName::with_namespace(namespace, local))
        } else if s.is_empty() || s.contains(['{', '}']) {
            Err(XmldexError::invalid_argument(format!("invalid qname '{s}'")))
        } else {
            Ok(QName::new(s))
        }
    }
}

/// Symbol ids for one qualified name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QNameIds {
    pub namespace: u16,
    pub local_name: u16,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SymbolSpace {
    names: Vec<String>,
    #[serde(skip)]
    ids: AHashMap<String, u16>,
}

impl SymbolSpace {
    fn rebuild(&mut self) {
        self.ids = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), (i + 1) as u16))
            .collect();
    }

    fn get(&self, symbol: &str) -> Option<u16> {
        self.ids.get(symbol).copied()
    }

    fn intern(&mut self, symbol: &str, kind: &str) -> Result<u16> {
        if let Some(id) = self.get(symbol) {
            return Ok(id);
        }
        if self.names.len() >= u16::MAX as usize {
            return Err(XmldexError::index(format!("{kind} symbol space exhausted")));
        }
        self.names.push(symbol.to_string());
        let id = self.names.len() as u16;
        self.ids.insert(symbol.to_string(), id);
        Ok(id)
    }

    fn name(&self, id: u16) -> Option<&str> {
        self.names.get((id as usize).checked_sub(1)?).map(String::as_str)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Symbols {
    namespaces: SymbolSpace,
    local_names: SymbolSpace,
}

/// Interns namespace URIs and local names into stable 16-bit ids.
///
/// Ids start at 1; the empty namespace is always 0. A table can be saved and
/// reloaded so that ids embedded in a persisted index keep their meaning.
#[derive(Debug, Default)]
pub struct SymbolTable {
    inner: RwLock<Symbols>,
}

impl SymbolTable {
    const SNAPSHOT_MAGIC: u32 = 0x5844_5359; // "XDSY"

    pub fn new() -> Self {
        Self::default()
    }

    /// Ids for `qname`, allocating new ones on first sight.
    pub fn intern(&self, qname: &QName) -> Result<QNameIds> {
        if let Some(ids) = self.lookup(qname) {
            return Ok(ids);
        }

        let mut symbols = self.inner.write();
        let namespace = if qname.has_namespace() {
            symbols.namespaces.intern(qname.namespace(), "namespace")?
        } else {
            0
        };
        let local_name = symbols.local_names.intern(qname.local_name(), "local name")?;
        Ok(QNameIds {
            namespace,
            local_name,
        })
    }

    /// Ids for `qname` if both parts are already known.
    pub fn lookup(&self, qname: &QName) -> Option<QNameIds> {
        let symbols = self.inner.read();
        let namespace = if qname.has_namespace() {
            symbols.namespaces.get(qname.namespace())?
        } else {
            0
        };
        let local_name = symbols.local_names.get(qname.local_name())?;
        Some(QNameIds {
            namespace,
            local_name,
        })
    }

    /// Reverse lookup used by inspection tools.
    pub fn resolve(&self, ids: QNameIds) -> Option<QName> {
        let symbols = self.inner.read();
        let local_name = symbols.local_names.name(ids.local_name)?.to_string();
        if ids.namespace == 0 {
            Some(QName::new(local_name))
        } else {
            let namespace = symbols.namespaces.name(ids.namespace)?;
            Some(QName::with_namespace(namespace, local_name))
        }
    }

    pub fn len(&self) -> usize {
        let symbols = self.inner.read();
        symbols.namespaces.names.len() + symbols.local_names.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize the table to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&*self.inner.read())?)
    }

    /// Restore a table from [`SymbolTable::to_json`] output.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut symbols: Symbols = serde_json::from_str(json)?;
        symbols.namespaces.rebuild();
        symbols.local_names.rebuild();
        Ok(SymbolTable {
            inner: RwLock::new(symbols),
        })
    }

    /// Persist the JSON snapshot inside a checksummed struct file.
    pub fn save(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let temp_name = format!("{name}.tmp");
        let mut writer = StructWriter::new(storage.create_output(&temp_name)?);
        writer.write_u32(Self::SNAPSHOT_MAGIC)?;
        writer.write_string(&self.to_json()?)?;
        writer.close()?;
        storage.rename_file(&temp_name, name)
    }

    /// Load a snapshot written by [`SymbolTable::save`], or an empty table if
    /// the file does not exist.
    pub fn load(storage: &dyn Storage, name: &str) -> Result<Self> {
        if !storage.file_exists(name) {
            return Ok(Self::new());
        }

        let mut reader = StructReader::new(storage.open_input(name)?)?;
        if reader.read_u32()? != Self::SNAPSHOT_MAGIC {
            return Err(XmldexError::index(format!("{name} is not a symbol table")));
        }
        let json = reader.read_string()?;
        if !reader.verify_checksum()? {
            return Err(XmldexError::index(format!("checksum mismatch in {name}")));
        }
        reader.close()?;
        Self::from_json(&json)
    }
}
