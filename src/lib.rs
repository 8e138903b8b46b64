//! # xmldex
//!
//! Secondary value indexing and document metadata for a native XML database.
//!
//! ## Features
//!
//! - QName-scoped value index over element and attribute content
//! - Typed, order-preserving keys (strings, numbers, dates, booleans, ...)
//! - Sorted on-disk index store with a coarse shared/exclusive lock
//! - Compact binary document metadata with doctype and lock token
//! - Exclusive WebDAV-style document locks committed through transactions
//! - Pluggable storage backends (memory, file)
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
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
//!     collections,
//! )?;
//!
//! let mut builder = DocumentBuilder::new(1, 1, "test.xml");
//! builder.start_element(QName::new("test"));
//! builder.leaf(QName::new("a"), "01")?;
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

pub mod cli;
pub mod config;
pub mod dom;
pub mod error;
pub mod index;
pub mod metadata;
pub mod qname;
pub mod resource;
pub mod storage;
pub mod store;
pub mod txn;
pub mod util;
pub mod value;
pub mod webdav;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
