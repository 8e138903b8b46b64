//! The value index engine: indexing sessions, flushing and lookups.
//!
//! [`ValueIndex`] is generic over a [`KeyStrategy`]; everything that depends
//! on the key layout goes through the strategy, so the engine itself only
//! deals with sessions, the store lock and node set assembly.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use xmldex::config::{CollectionConfigManager, EngineConfig, IndexSpec};
//! use xmldex::dom::{DocumentBuilder, DocumentSet, NodeSet};
//! use xmldex::index::{QueryContext, Relation, ValueIndex};
//! use xmldex::qname::QName;
//! use xmldex::storage::memory::MemoryStorage;
//! use xmldex::value::{AtomicType, AtomicValue};
//!
//! # fn main() -> xmldex::error::Result<()> {
//! let collections = Arc::new(CollectionConfigManager::new());
//! collections.configure(1, IndexSpec::default().with(QName::new("a"), AtomicType::Integer)?)?;
//! let index = ValueIndex::open(
//!     Arc::new(MemoryStorage::new_default()),
//!     EngineConfig::default(),
//!     Arc::clone(&collections),
//! )?;
//!
//! let mut builder = DocumentBuilder::new(1, 1, "test.xml");
//! builder.start_element(QName::new("test"));
//! builder.leaf(QName::new("a"), "001")?;
//! builder.end_element()?;
//! let mut doc = builder.build()?;
//! index.index_document(&mut doc)?;
//!
//! let mut docs = DocumentSet::new();
//! docs.add_document(&doc);
//! let found = index.find_by_relation(
//!     Relation::Eq,
//!     &docs,
//!     &NodeSet::new(),
//!     &QName::new("a"),
//!     AtomicValue::Integer(1),
//!     &QueryContext::new(),
//! )?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::config::{CollectionConfigManager, EngineConfig, IndexSpec};
use crate::dom::{
    Attr, CollectionId, Document, DocumentId, DocumentSet, ElementNode, Node, NodeId, NodeProxy,
    NodeSet, Sequence,
};
use crate::error::{Result, XmldexError};
use crate::index::key::{DecodedKey, KeyStrategy, QNameKeyStrategy};
use crate::index::pending::PendingIndex;
use crate::index::query::{IndexQuery, QueryContext, Relation};
use crate::qname::{QName, SymbolTable};
use crate::storage::Storage;
use crate::store::{LockMode, Postings, SortedIndexFile};
use crate::value::{AtomicValue, IndexableValue};

/// Whether a session adds entries to the index or removes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Store,
    Remove,
}

/// Buffers the index entries of one pass over one document.
///
/// Created by [`ValueIndex::begin_session`] and consumed by
/// [`ValueIndex::flush`].
#[derive(Debug)]
pub struct IndexingSession<'a, S: KeyStrategy> {
    strategy: &'a S,
    spec: Option<Arc<IndexSpec>>,
    doc_id: DocumentId,
    collection_id: CollectionId,
    mode: SessionMode,
    pending: PendingIndex<S::Key>,
}

impl<S: KeyStrategy> IndexingSession<'_, S> {
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn doc_id(&self) -> DocumentId {
        self.doc_id
    }

    /// Number of node ids captured so far.
    pub fn node_count(&self) -> usize {
        self.pending.node_count()
    }

    /// Whether nodes named `qname` are indexed in this session's collection.
    pub fn indexes(&self, qname: &QName) -> bool {
        self.spec
            .as_deref()
            .is_some_and(|spec| self.strategy.lookup(spec, qname).is_some())
    }

    fn expect_mode(&self, mode: SessionMode, operation: &str) -> Result<()> {
        if self.mode != mode {
            return Err(XmldexError::invalid_operation(format!(
                "{operation} called on a {:?} session",
                self.mode
            )));
        }
        Ok(())
    }

    /// Mark `element` as covered by this index if its name is configured.
    pub fn start_element(&mut self, element: &mut ElementNode) -> Result<()> {
        self.expect_mode(SessionMode::Store, "start_element")?;
        if self.indexes(element.qname()) {
            element.add_index_type(self.strategy.index_type());
        }
        Ok(())
    }

    /// Capture the text content of a finished element.
    pub fn end_element(&mut self, element: &ElementNode, content: &str) -> Result<()> {
        self.expect_mode(SessionMode::Store, "end_element")?;
        self.capture(element.qname(), element.gid(), content);
        Ok(())
    }

    pub fn store_attribute(&mut self, attr: &Attr) -> Result<()> {
        self.expect_mode(SessionMode::Store, "store_attribute")?;
        self.capture(attr.qname(), attr.gid(), attr.value());
        Ok(())
    }

    /// Capture an element whose entry is to be removed. `content` must be the
    /// text it was indexed with.
    pub fn remove_element(&mut self, element: &ElementNode, content: &str) -> Result<()> {
        self.expect_mode(SessionMode::Remove, "remove_element")?;
        self.capture(element.qname(), element.gid(), content);
        Ok(())
    }

    pub fn remove_attribute(&mut self, attr: &Attr) -> Result<()> {
        self.expect_mode(SessionMode::Remove, "remove_attribute")?;
        self.capture(attr.qname(), attr.gid(), attr.value());
        Ok(())
    }

    fn capture(&mut self, qname: &QName, gid: u64, text: &str) {
        let Some(spec) = self.spec.as_deref() else {
            return;
        };
        let Some(range) = self.strategy.lookup(spec, qname) else {
            return;
        };

        match self.strategy.node_key(range, qname, text) {
            Ok(key) => self.pending.add(key, NodeId::new(self.doc_id, gid)),
            Err(err) => {
                tracing::warn!(
                    target: "xmldex::index",
                    doc_id = self.doc_id,
                    gid,
                    qname = %qname,
                    error = %err,
                    "value not indexable, entry skipped"
                );
            }
        }
    }
}

/// One stored key with its postings, as listed by [`ValueIndex::entries`].
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub collection_id: CollectionId,
    pub qname: Option<QName>,
    pub value: IndexableValue,
    pub postings: Postings,
}

/// Secondary value index over element and attribute content.
#[derive(Debug)]
pub struct ValueIndex<S: KeyStrategy = QNameKeyStrategy> {
    strategy: S,
    config: EngineConfig,
    storage: Arc<dyn Storage>,
    store: SortedIndexFile,
    symbols: Arc<SymbolTable>,
    collections: Arc<CollectionConfigManager>,
}

impl ValueIndex<QNameKeyStrategy> {
    /// Open the QName-scoped index stored in `storage`.
    pub fn open(
        storage: Arc<dyn Storage>,
        config: EngineConfig,
        collections: Arc<CollectionConfigManager>,
    ) -> Result<Self> {
        Self::with_strategy(QNameKeyStrategy, storage, config, collections)
    }
}

impl<S: KeyStrategy> ValueIndex<S> {
    pub fn with_strategy(
        strategy: S,
        storage: Arc<dyn Storage>,
        config: EngineConfig,
        collections: Arc<CollectionConfigManager>,
    ) -> Result<Self> {
        let symbols_name = symbols_file_name(&config.index_file_name);
        let symbols = Arc::new(SymbolTable::load(storage.as_ref(), &symbols_name)?);
        let store = SortedIndexFile::open(
            Arc::clone(&storage),
            &config.index_file_name,
            config.store.clone(),
        )?;

        tracing::info!(
            target: "xmldex::index",
            file = %config.index_file_name,
            enabled = config.qname_indexing,
            case_sensitive = config.case_sensitive,
            "value index opened"
        );

        Ok(ValueIndex {
            strategy,
            config,
            storage,
            store,
            symbols,
            collections,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn collections(&self) -> &Arc<CollectionConfigManager> {
        &self.collections
    }

    pub fn is_enabled(&self) -> bool {
        self.config.qname_indexing
    }

    /// Start an indexing pass over `doc`.
    ///
    /// The collection's configuration is captured here, so a session keeps
    /// using the spec it started with.
    pub fn begin_session(&self, doc: &Document, mode: SessionMode) -> IndexingSession<'_, S> {
        let spec = if self.config.qname_indexing {
            self.collections.get(doc.collection_id())
        } else {
            None
        };
        IndexingSession {
            strategy: &self.strategy,
            spec,
            doc_id: doc.id(),
            collection_id: doc.collection_id(),
            mode,
            pending: PendingIndex::new(),
        }
    }

    /// Write the entries captured by `session` to the store.
    pub fn flush(&self, mut session: IndexingSession<'_, S>) -> Result<()> {
        if session.pending.is_empty() {
            return Ok(());
        }

        let keys = session.pending.len();
        let nodes = session.pending.node_count();
        let mut guard = self.store.acquire(LockMode::Write)?;

        for (key, node_ids) in session.pending.drain() {
            let gids: Vec<u64> = node_ids.iter().map(|node| node.gid).collect();
            match session.mode {
                SessionMode::Store => {
                    let encoded = self.strategy.encode(
                        &key,
                        session.collection_id,
                        self.config.case_sensitive,
                        &self.symbols,
                    )?;
                    guard.append(&encoded, session.doc_id, &gids)?;
                }
                SessionMode::Remove => {
                    let Some(encoded) = self.strategy.encode_existing(
                        &key,
                        session.collection_id,
                        self.config.case_sensitive,
                        &self.symbols,
                    ) else {
                        continue;
                    };
                    guard.remove_nodes(&encoded, session.doc_id, &gids)?;
                }
            }
        }

        // Symbols go first so the index file never holds unknown ids.
        if self.config.store.sync_on_flush {
            self.save_symbols()?;
            guard.sync()?;
        }

        tracing::debug!(
            target: "xmldex::index",
            doc_id = session.doc_id,
            collection_id = session.collection_id,
            mode = ?session.mode,
            keys,
            nodes,
            "session flushed"
        );
        Ok(())
    }

    /// Index every configured element and attribute of `doc`.
    pub fn index_document(&self, doc: &mut Document) -> Result<()> {
        if !self.config.qname_indexing {
            return Ok(());
        }
        let mut session = self.begin_session(doc, SessionMode::Store);
        if session.spec.is_none() {
            return Ok(());
        }
        visit_element(&mut session, doc.root_mut())?;
        self.flush(session)
    }

    /// Remove every entry of `doc` from its collection. Returns the number
    /// of node ids removed.
    pub fn drop_index(&self, doc: &Document) -> Result<usize> {
        if !self.config.qname_indexing {
            return Ok(0);
        }
        let prefix = doc.collection_id().to_be_bytes();
        let mut guard = self.store.acquire(LockMode::Write)?;
        let removed = guard.remove_document(&prefix, doc.id())?;
        if self.config.store.sync_on_flush && removed > 0 {
            guard.sync()?;
        }

        tracing::debug!(
            target: "xmldex::index",
            doc_id = doc.id(),
            collection_id = doc.collection_id(),
            removed,
            "document index dropped"
        );
        Ok(removed)
    }

    /// Drop and rebuild the entries of every document of `collection_id` in
    /// `docs`. Documents of other collections are left alone.
    pub fn reindex_collection(&self, collection_id: CollectionId, docs: &mut [Document]) -> Result<usize> {
        if !self.config.qname_indexing {
            return Ok(0);
        }
        let mut reindexed = 0;
        for doc in docs.iter_mut().filter(|d| d.collection_id() == collection_id) {
            self.drop_index(doc)?;
            self.index_document(doc)?;
            reindexed += 1;
        }

        tracing::info!(
            target: "xmldex::index",
            collection_id,
            documents = reindexed,
            "collection reindexed"
        );
        Ok(reindexed)
    }

    /// Nodes of `docs` whose key stands in `relation` to `key`.
    ///
    /// When `context` is not empty a node is kept only if it, or the
    /// document element of its document, is in `context`. A collection whose
    /// scan fails contributes nothing.
    pub fn find(
        &self,
        relation: Relation,
        docs: &DocumentSet,
        context: &NodeSet,
        key: &S::Key,
        ctx: &QueryContext,
    ) -> Result<NodeSet> {
        let mut result = NodeSet::new();
        if !self.config.qname_indexing {
            return Ok(result);
        }

        for collection_id in docs.collections() {
            ctx.check()?;

            let Some(encoded) = self.strategy.encode_existing(
                key,
                collection_id,
                self.config.case_sensitive,
                &self.symbols,
            ) else {
                continue;
            };
            let query = IndexQuery::new(relation, encoded, self.strategy.scan_prefix_len());

            match self.scan(&query, collection_id, docs, context) {
                Ok(found) => result.union(&found),
                Err(err) if err.is_scan_failure() => {
                    tracing::debug!(
                        target: "xmldex::index",
                        collection_id,
                        %relation,
                        key = %key,
                        error = %err,
                        "index scan failed, collection skipped"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(result)
    }

    fn scan(
        &self,
        query: &IndexQuery,
        collection_id: CollectionId,
        docs: &DocumentSet,
        context: &NodeSet,
    ) -> Result<NodeSet> {
        let guard = self.store.acquire(LockMode::Read)?;
        let mut found = NodeSet::new();
        guard.query(query, |_, postings| {
            for node in postings.iter() {
                if !docs.contains(node.doc_id) {
                    continue;
                }
                let proxy = NodeProxy::new(collection_id, node);
                if context.is_empty() || context.contains(&node) || context.contains(&proxy.root().id) {
                    found.add(proxy);
                }
            }
            Ok(())
        })?;
        Ok(found)
    }

    /// [`find`](Self::find) with the key built from a name and an evaluator
    /// value. A value that cannot be indexed yields an empty set.
    pub fn find_by_relation(
        &self,
        relation: Relation,
        docs: &DocumentSet,
        context: &NodeSet,
        qname: &QName,
        value: AtomicValue,
        ctx: &QueryContext,
    ) -> Result<NodeSet> {
        match self.query_key(qname, value) {
            Some(key) => self.find(relation, docs, context, &key, ctx),
            None => Ok(NodeSet::new()),
        }
    }

    /// Equality lookup over the documents of `context`.
    pub fn find_by_qname(
        &self,
        qname: &QName,
        value: AtomicValue,
        context: &Sequence,
        ctx: &QueryContext,
    ) -> Result<Sequence> {
        let context_set = context.to_node_set()?;
        let docs = context_set.document_set();
        let found = self.find_by_relation(Relation::Eq, &docs, &context_set, qname, value, ctx)?;
        Ok(Sequence::from(&found))
    }

    /// Nodes of one collection, without document or context filtering.
    pub fn scan_collection(
        &self,
        relation: Relation,
        collection_id: CollectionId,
        qname: &QName,
        value: AtomicValue,
    ) -> Result<Vec<NodeId>> {
        let Some(key) = self.query_key(qname, value) else {
            return Ok(Vec::new());
        };
        let Some(encoded) = self.strategy.encode_existing(
            &key,
            collection_id,
            self.config.case_sensitive,
            &self.symbols,
        ) else {
            return Ok(Vec::new());
        };

        let query = IndexQuery::new(relation, encoded, self.strategy.scan_prefix_len());
        let guard = self.store.acquire(LockMode::Read)?;
        let mut nodes = Vec::new();
        guard.query(&query, |_, postings| {
            nodes.extend(postings.iter());
            Ok(())
        })?;
        Ok(nodes)
    }

    fn query_key(&self, qname: &QName, value: AtomicValue) -> Option<S::Key> {
        let value_type = value.atomic_type();
        match self.strategy.query_key(qname, value) {
            Ok(key) => Some(key),
            Err(err) => {
                tracing::warn!(
                    target: "xmldex::index",
                    qname = %qname,
                    value_type = %value_type,
                    error = %err,
                    "comparison value not indexable, lookup yields nothing"
                );
                None
            }
        }
    }

    /// Every stored entry in key order.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        let guard = self.store.acquire(LockMode::Read)?;
        let mut entries = Vec::with_capacity(guard.len());
        guard.query(&IndexQuery::prefix(&[]), |key, postings| {
            let decoded = DecodedKey::decode(key)?;
            entries.push(IndexEntry {
                collection_id: decoded.collection_id,
                qname: self.symbols.resolve(decoded.ids),
                value: decoded.value,
                postings: postings.clone(),
            });
            Ok(())
        })?;
        Ok(entries)
    }

    /// Number of stored keys.
    pub fn key_count(&self) -> Result<usize> {
        Ok(self.store.acquire(LockMode::Read)?.len())
    }

    /// Persist the index file and the symbol table.
    pub fn sync(&self) -> Result<()> {
        self.save_symbols()?;
        self.store.sync()
    }

    pub fn close(&self) -> Result<()> {
        self.save_symbols()?;
        self.store.close()?;
        tracing::info!(target: "xmldex::index", file = %self.config.index_file_name, "value index closed");
        Ok(())
    }

    fn save_symbols(&self) -> Result<()> {
        self.symbols
            .save(self.storage.as_ref(), &symbols_file_name(&self.config.index_file_name))
    }
}

fn symbols_file_name(index_file_name: &str) -> String {
    format!("{index_file_name}.symbols")
}

fn visit_element<S: KeyStrategy>(
    session: &mut IndexingSession<'_, S>,
    element: &mut ElementNode,
) -> Result<()> {
    session.start_element(element)?;
    for attr in element.attributes() {
        session.store_attribute(attr)?;
    }
    for child in element.children_mut() {
        if let Node::Element(child) = child {
            visit_element(session, child)?;
        }
    }
    if session.indexes(element.qname()) {
        let content = element.string_value();
        session.end_element(element, &content)?;
    }
    Ok(())
}
