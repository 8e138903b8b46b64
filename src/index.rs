//! QName-scoped value index.
//!
//! - [`key`]: composite keys and the [`KeyStrategy`] seam
//! - [`pending`]: per-session entry buffer
//! - [`query`]: relations, key ranges and cancellation
//! - [`engine`]: indexing sessions, flush and lookups

pub mod engine;
pub mod key;
pub mod pending;
pub mod query;

pub use engine::{IndexEntry, IndexingSession, SessionMode, ValueIndex};
pub use key::{KeyStrategy, QNameKey, QNameKeyStrategy};
pub use pending::PendingIndex;
pub use query::{IndexQuery, QueryContext, Relation};
