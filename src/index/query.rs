//! Relations, key range queries and query cancellation.

use std::fmt;
use std::ops::Bound as RangeBound;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Result, XmldexError};

/// Comparison operator of a value lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relation::Eq => "eq",
            Relation::Ne => "ne",
            Relation::Lt => "lt",
            Relation::Le => "le",
            Relation::Gt => "gt",
            Relation::Ge => "ge",
        };
        f.write_str(s)
    }
}

impl FromStr for Relation {
    type Err = XmldexError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "eq" | "=" => Relation::Eq,
            "ne" | "!=" => Relation::Ne,
            "lt" | "<" => Relation::Lt,
            "le" | "<=" => Relation::Le,
            "gt" | ">" => Relation::Gt,
            "ge" | ">=" => Relation::Ge,
            _ => return Err(XmldexError::invalid_argument(format!("unknown relation '{s}'"))),
        })
    }
}

/// Bound type for range queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound<T> {
    /// Inclusive bound.
    Included(T),
    /// Exclusive bound.
    Excluded(T),
    /// Unbounded (no limit).
    Unbounded,
}

impl<T: PartialOrd> Bound<T> {
    /// Check if a value satisfies this bound as a lower bound.
    pub fn contains_lower(&self, value: &T) -> bool {
        match self {
            Bound::Included(bound) => value >= bound,
            Bound::Excluded(bound) => value > bound,
            Bound::Unbounded => true,
        }
    }

    /// Check if a value satisfies this bound as an upper bound.
    pub fn contains_upper(&self, value: &T) -> bool {
        match self {
            Bound::Included(bound) => value <= bound,
            Bound::Excluded(bound) => value < bound,
            Bound::Unbounded => true,
        }
    }
}

impl<T> Bound<T> {
    fn as_range_bound(&self) -> RangeBound<&T> {
        match self {
            Bound::Included(v) => RangeBound::Included(v),
            Bound::Excluded(v) => RangeBound::Excluded(v),
            Bound::Unbounded => RangeBound::Unbounded,
        }
    }
}

/// A scan over encoded keys.
///
/// Every query is confined to the keys that start with its prefix, so an
/// open-ended relation never runs into another collection, name or value
/// type.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    excluded: Option<Vec<u8>>,
}

impl IndexQuery {
    /// Query for `relation` against `key`, confined to `key[..prefix_len]`.
    pub fn new(relation: Relation, key: Vec<u8>, prefix_len: usize) -> Self {
        let prefix = &key[..prefix_len.min(key.len())];
        let prefix_start = Bound::Included(prefix.to_vec());
        let prefix_end = match prefix_successor(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };

        match relation {
            Relation::Eq => IndexQuery {
                lower: Bound::Included(key.clone()),
                upper: Bound::Included(key),
                excluded: None,
            },
            Relation::Ne => IndexQuery {
                lower: prefix_start,
                upper: prefix_end,
                excluded: Some(key),
            },
            Relation::Lt => IndexQuery {
                lower: prefix_start,
                upper: Bound::Excluded(key),
                excluded: None,
            },
            Relation::Le => IndexQuery {
                lower: prefix_start,
                upper: Bound::Included(key),
                excluded: None,
            },
            Relation::Gt => IndexQuery {
                lower: Bound::Excluded(key),
                upper: prefix_end,
                excluded: None,
            },
            Relation::Ge => IndexQuery {
                lower: Bound::Included(key),
                upper: prefix_end,
                excluded: None,
            },
        }
    }

    /// Every key that starts with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        IndexQuery {
            lower: Bound::Included(prefix.to_vec()),
            upper: match prefix_successor(prefix) {
                Some(end) => Bound::Excluded(end),
                None => Bound::Unbounded,
            },
            excluded: None,
        }
    }

    /// Bounds suitable for `BTreeMap::range`.
    pub fn range(&self) -> (RangeBound<&Vec<u8>>, RangeBound<&Vec<u8>>) {
        (self.lower.as_range_bound(), self.upper.as_range_bound())
    }

    pub fn matches(&self, key: &[u8]) -> bool {
        let key = key.to_vec();
        self.lower.contains_lower(&key)
            && self.upper.contains_upper(&key)
            && self.excluded.as_ref() != Some(&key)
    }

    /// Whether a key inside the range must still be skipped.
    pub fn is_excluded(&self, key: &[u8]) -> bool {
        self.excluded.as_deref() == Some(key)
    }
}

/// Smallest byte string greater than every string starting with `prefix`.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Cancellation state shared between a running query and its caller.
#[derive(Debug, Default)]
pub struct QueryContext {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        QueryContext {
            cancelled: AtomicBool::new(false),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with `OperationCancelled` once cancelled or past the deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(XmldexError::cancelled("query was cancelled"));
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(XmldexError::cancelled("query timed out"));
        }
        Ok(())
    }
}
