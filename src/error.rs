//! Error types for the xmldex library.
//!
//! All fallible operations return [`XmldexError`]. Conditions that the index
//! layer is required to swallow (a value that cannot be used as an index key,
//! a store scan that fails for one collection) are still represented here so
//! that they can be logged with a precise cause before being dropped.
//!
//! # Examples
//!
//! ```
//! use xmldex::error::{XmldexError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(XmldexError::invalid_argument("Invalid input"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for xmldex operations.
#[derive(Error, Debug)]
pub enum XmldexError {
    /// I/O errors (file operations, streams, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index structure errors (corrupt postings, symbol table exhausted, ...)
    #[error("Index error: {0}")]
    Index(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// The coarse index store lock could not be obtained in time
    #[error("Lock acquisition failed: {0}")]
    LockAcquisition(String),

    /// Malformed or truncated document metadata stream
    #[error("Metadata codec error: {0}")]
    MetadataCodec(String),

    /// The principal lacks the rights required for the resource
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The resource is exclusively locked by another principal
    #[error("Resource is locked: {0}")]
    ResourceLocked(String),

    /// A resource, collection or configuration was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request is valid but not supported
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A transaction could not be committed
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Operation cancelled (query timeout, explicit cancel)
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with XmldexError.
pub type Result<T> = std::result::Result<T, XmldexError>;

impl XmldexError {
    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        XmldexError::Index(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        XmldexError::Storage(msg.into())
    }

    /// Create a new lock acquisition error.
    pub fn lock_acquisition<S: Into<String>>(msg: S) -> Self {
        XmldexError::LockAcquisition(msg.into())
    }

    /// Create a new metadata codec error.
    pub fn codec<S: Into<String>>(msg: S) -> Self {
        XmldexError::MetadataCodec(msg.into())
    }

    /// Create a new permission denied error.
    pub fn permission_denied<S: Into<String>>(msg: S) -> Self {
        XmldexError::PermissionDenied(msg.into())
    }

    /// Create a new resource locked error.
    pub fn resource_locked<S: Into<String>>(msg: S) -> Self {
        XmldexError::ResourceLocked(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        XmldexError::NotFound(msg.into())
    }

    /// Create a new not implemented error.
    pub fn not_implemented<S: Into<String>>(msg: S) -> Self {
        XmldexError::NotImplemented(msg.into())
    }

    /// Create a new transaction error.
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        XmldexError::Transaction(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        XmldexError::Other(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        XmldexError::Other(format!("Invalid configuration: {}", msg.into()))
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        XmldexError::Other(format!("Invalid argument: {}", msg.into()))
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        XmldexError::InvalidOperation(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        XmldexError::OperationCancelled(msg.into())
    }

    /// Whether a query may treat this error as "no matches from this collection".
    pub fn is_scan_failure(&self) -> bool {
        matches!(
            self,
            XmldexError::Io(_)
                | XmldexError::Index(_)
                | XmldexError::Storage(_)
                | XmldexError::LockAcquisition(_)
        )
    }
}
