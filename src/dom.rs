//! Minimal in-memory node model.
//!
//! This is not a parser: documents are assembled through [`DocumentBuilder`]
//! and only carry what the value index needs (qualified names, node ids,
//! attribute values, text content and the per-element index type mask).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XmldexError};
use crate::qname::QName;
use crate::value::AtomicValue;

/// Numeric id of a collection. It is the leading component of every index key.
pub type CollectionId = u16;

/// Numeric id of a document, unique across collections.
pub type DocumentId = u32;

/// Global node id of the document element.
pub const ROOT_GID: u64 = 1;

/// Identity of a node: its document and its document-relative global id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub doc_id: DocumentId,
    pub gid: u64,
}

impl NodeId {
    pub fn new(doc_id: DocumentId, gid: u64) -> Self {
        NodeId { doc_id, gid }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.doc_id, self.gid)
    }
}

/// Bitmask of index kinds applied to an element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IndexTypeMask(u8);

impl IndexTypeMask {
    pub const NONE: IndexTypeMask = IndexTypeMask(0);
    pub const RANGE: IndexTypeMask = IndexTypeMask(0x01);
    pub const QNAME: IndexTypeMask = IndexTypeMask(0x02);
    pub const TEXT: IndexTypeMask = IndexTypeMask(0x04);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: IndexTypeMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: IndexTypeMask) -> IndexTypeMask {
        IndexTypeMask(self.0 | other.0)
    }
}

/// An attribute node.
#[derive(Debug, Clone)]
pub struct Attr {
    qname: QName,
    gid: u64,
    value: String,
}

impl Attr {
    pub fn qname(&self) -> &QName {
        &self.qname
    }

    pub fn gid(&self) -> u64 {
        self.gid
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A child of an element.
#[derive(Debug, Clone)]
pub enum Node {
    Element(ElementNode),
    Text(String),
}

/// An element node with its attributes and children.
#[derive(Debug, Clone)]
pub struct ElementNode {
    qname: QName,
    gid: u64,
    index_type: IndexTypeMask,
    attributes: Vec<Attr>,
    children: Vec<Node>,
}

impl ElementNode {
    pub fn qname(&self) -> &QName {
        &self.qname
    }

    pub fn gid(&self) -> u64 {
        self.gid
    }

    pub fn attributes(&self) -> &[Attr] {
        &self.attributes
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Node] {
        &mut self.children
    }

    pub fn index_type(&self) -> IndexTypeMask {
        self.index_type
    }

    /// Merge `kind` into the element's index type. Existing flags are kept.
    pub fn add_index_type(&mut self, kind: IndexTypeMask) {
        self.index_type = self.index_type.union(kind);
    }

    /// Concatenated text of all descendant text nodes.
    pub fn string_value(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(text) => out.push_str(text),
                Node::Element(element) => element.collect_text(out),
            }
        }
    }

    /// Depth-first search for the element with `gid`.
    pub fn find_mut(&mut self, gid: u64) -> Option<&mut ElementNode> {
        if self.gid == gid {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| match child {
            Node::Element(element) => element.find_mut(gid),
            Node::Text(_) => None,
        })
    }
}

/// A stored document.
#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    collection_id: CollectionId,
    name: String,
    root: ElementNode,
}

impl Document {
    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &ElementNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut ElementNode {
        &mut self.root
    }

    pub fn node_id(&self, gid: u64) -> NodeId {
        NodeId::new(self.id, gid)
    }

    /// Proxy for the document element.
    pub fn root_proxy(&self) -> NodeProxy {
        NodeProxy::new(self.collection_id, self.node_id(ROOT_GID))
    }
}

/// Builds a [`Document`], numbering nodes in document order from
/// [`ROOT_GID`].
///
/// ```
/// use xmldex::dom::DocumentBuilder;
/// use xmldex::qname::QName;
///
/// let mut builder = DocumentBuilder::new(1, 1, "test.xml");
/// builder.start_element(QName::new("test"));
/// builder.start_element(QName::new("a"));
/// builder.text("001");
/// builder.end_element().unwrap();
/// builder.end_element().unwrap();
/// let doc = builder.build().unwrap();
/// assert_eq!(doc.root().string_value(), "001");
/// ```
#[derive(Debug)]
pub struct DocumentBuilder {
    id: DocumentId,
    collection_id: CollectionId,
    name: String,
    next_gid: u64,
    stack: Vec<ElementNode>,
    root: Option<ElementNode>,
}

impl DocumentBuilder {
    pub fn new<S: Into<String>>(id: DocumentId, collection_id: CollectionId, name: S) -> Self {
        DocumentBuilder {
            id,
            collection_id,
            name: name.into(),
            next_gid: ROOT_GID,
            stack: Vec::new(),
            root: None,
        }
    }

    fn allocate_gid(&mut self) -> u64 {
        let gid = self.next_gid;
        self.next_gid += 1;
        gid
    }

    /// Open an element and return its gid.
    pub fn start_element(&mut self, qname: QName) -> u64 {
        let gid = self.allocate_gid();
        self.stack.push(ElementNode {
            qname,
            gid,
            index_type: IndexTypeMask::NONE,
            attributes: Vec::new(),
            children: Vec::new(),
        });
        gid
    }

    /// Add an attribute to the open element and return its gid.
    pub fn attribute<S: Into<String>>(&mut self, qname: QName, value: S) -> Result<u64> {
        let gid = self.allocate_gid();
        let element = self
            .stack
            .last_mut()
            .ok_or_else(|| XmldexError::invalid_operation("attribute outside of an element"))?;
        element.attributes.push(Attr {
            qname,
            gid,
            value: value.into(),
        });
        Ok(gid)
    }

    /// Append text to the open element. Text outside the root is ignored.
    pub fn text<S: Into<String>>(&mut self, text: S) {
        if let Some(element) = self.stack.last_mut() {
            element.children.push(Node::Text(text.into()));
        }
    }

    pub fn end_element(&mut self) -> Result<()> {
        let element = self
            .stack
            .pop()
            .ok_or_else(|| XmldexError::invalid_operation("end_element without open element"))?;

        match self.stack.last_mut() {
            Some(parent) => parent.children.push(Node::Element(element)),
            None if self.root.is_none() => self.root = Some(element),
            None => {
                return Err(XmldexError::invalid_operation(
                    "document already has a root element",
                ));
            }
        }
        Ok(())
    }

    /// Convenience for `start_element`, `text`, `end_element`.
    pub fn leaf<S: Into<String>>(&mut self, qname: QName, text: S) -> Result<u64> {
        let gid = self.start_element(qname);
        self.text(text);
        self.end_element()?;
        Ok(gid)
    }

    pub fn build(self) -> Result<Document> {
        if !self.stack.is_empty() {
            return Err(XmldexError::invalid_operation(format!(
                "{} unclosed element(s)",
                self.stack.len()
            )));
        }
        let root = self
            .root
            .ok_or_else(|| XmldexError::invalid_operation("document has no root element"))?;

        Ok(Document {
            id: self.id,
            collection_id: self.collection_id,
            name: self.name,
            root,
        })
    }
}

/// A node reference that also knows its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeProxy {
    pub collection_id: CollectionId,
    pub id: NodeId,
}

impl NodeProxy {
    pub fn new(collection_id: CollectionId, id: NodeId) -> Self {
        NodeProxy { collection_id, id }
    }

    /// The document element of this node's document.
    pub fn root(&self) -> NodeProxy {
        NodeProxy::new(self.collection_id, NodeId::new(self.id.doc_id, ROOT_GID))
    }
}

/// A set of nodes in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet {
    nodes: BTreeMap<NodeId, CollectionId>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: NodeProxy) {
        self.nodes.insert(node.id, node.collection_id);
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeProxy> + '_ {
        self.nodes
            .iter()
            .map(|(id, collection_id)| NodeProxy::new(*collection_id, *id))
    }

    /// Documents the nodes belong to.
    pub fn document_set(&self) -> DocumentSet {
        let mut docs = DocumentSet::new();
        for (id, collection_id) in &self.nodes {
            docs.add(id.doc_id, *collection_id);
        }
        docs
    }

    pub fn union(&mut self, other: &NodeSet) {
        self.nodes
            .extend(other.nodes.iter().map(|(id, collection_id)| (*id, *collection_id)));
    }
}

impl FromIterator<NodeProxy> for NodeSet {
    fn from_iter<I: IntoIterator<Item = NodeProxy>>(iter: I) -> Self {
        let mut set = NodeSet::new();
        for node in iter {
            set.add(node);
        }
        set
    }
}

/// The documents a query runs against, grouped by collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentSet {
    docs: BTreeMap<DocumentId, CollectionId>,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, doc_id: DocumentId, collection_id: CollectionId) {
        self.docs.insert(doc_id, collection_id);
    }

    pub fn add_document(&mut self, doc: &Document) {
        self.add(doc.id(), doc.collection_id());
    }

    pub fn contains(&self, doc_id: DocumentId) -> bool {
        self.docs.contains_key(&doc_id)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Distinct collection ids, ascending.
    pub fn collections(&self) -> Vec<CollectionId> {
        self.docs
            .values()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// One item of an evaluator sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Node(NodeProxy),
    Atomic(AtomicValue),
}

/// An evaluator sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    items: Vec<Item>,
}

impl Sequence {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The nodes of this sequence. Fails if it contains atomic values.
    pub fn to_node_set(&self) -> Result<NodeSet> {
        self.items
            .iter()
            .map(|item| match item {
                Item::Node(node) => Ok(*node),
                Item::Atomic(value) => Err(XmldexError::invalid_argument(format!(
                    "sequence item of type {} is not a node",
                    value.atomic_type()
                ))),
            })
            .collect()
    }

    /// `fn:root` applied to the first item: the document element of its
    /// document, or the empty sequence.
    pub fn root(&self) -> Result<Sequence> {
        match self.items.first() {
            None => Ok(Sequence::empty()),
            Some(Item::Node(node)) => Ok(Sequence::from(vec![Item::Node(node.root())])),
            Some(Item::Atomic(value)) => Err(XmldexError::invalid_argument(format!(
                "Context item is not a node; got {}",
                value.atomic_type()
            ))),
        }
    }
}

impl From<Vec<Item>> for Sequence {
    fn from(items: Vec<Item>) -> Self {
        Sequence { items }
    }
}

impl From<&NodeSet> for Sequence {
    fn from(set: &NodeSet) -> Self {
        Sequence {
            items: set.iter().map(Item::Node).collect(),
        }
    }
}
