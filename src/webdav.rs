//! WebDAV LOCK/UNLOCK on document resources.
//!
//! Only exclusive depth-0 write locks on documents are supported. A granted
//! lock is stored in the document's metadata (lock token plus user lock) and
//! becomes visible only after the metadata transaction commits.

use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;

use crate::error::XmldexError;
use crate::metadata::{
    DocumentMetadata, LockDepth, LockScope, LockTimeout, LockToken, LockType, generate_opaque_token,
};
use crate::resource::{DocumentRecord, NO_USER, ResourceStore, User};
use crate::txn::{TransactionManager, TransactionOperation};

pub const SC_OK: u16 = 200;
pub const SC_UNAUTHORIZED: u16 = 401;
pub const SC_NOT_FOUND: u16 = 404;
pub const SC_CONFLICT: u16 = 409;
pub const SC_LOCKED: u16 = 423;
pub const SC_INTERNAL_SERVER_ERROR: u16 = 500;
pub const SC_NOT_IMPLEMENTED: u16 = 501;

/// Why a LOCK or UNLOCK was refused.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Permission denied: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resource is locked by user {holder}")]
    Locked { path: String, holder: String },

    /// Locked, but the holder is not known at this layer.
    #[error("Resource is locked: {0}")]
    LockedByOther(String),

    #[error("{0}")]
    NotImplemented(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error(transparent)]
    Internal(XmldexError),
}

impl LockError {
    /// HTTP status the handler should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            LockError::Unauthorized(_) => SC_UNAUTHORIZED,
            LockError::NotFound(_) => SC_NOT_FOUND,
            LockError::Locked { .. } | LockError::LockedByOther(_) => SC_LOCKED,
            LockError::NotImplemented(_) => SC_NOT_IMPLEMENTED,
            LockError::Conflict(_) => SC_CONFLICT,
            LockError::Transaction(_) | LockError::Internal(_) => SC_INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<XmldexError> for LockError {
    fn from(err: XmldexError) -> Self {
        match err {
            XmldexError::PermissionDenied(msg) => LockError::Unauthorized(msg),
            XmldexError::NotFound(msg) => LockError::NotFound(msg),
            XmldexError::ResourceLocked(msg) => LockError::LockedByOther(msg),
            XmldexError::NotImplemented(msg) => LockError::NotImplemented(msg),
            XmldexError::Transaction(msg) => LockError::Transaction(msg),
            other => LockError::Internal(other),
        }
    }
}

impl From<LockError> for XmldexError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Unauthorized(msg) => XmldexError::PermissionDenied(msg),
            LockError::NotFound(msg) => XmldexError::NotFound(msg),
            LockError::Locked { path, .. } => XmldexError::ResourceLocked(path),
            LockError::LockedByOther(msg) => XmldexError::ResourceLocked(msg),
            LockError::NotImplemented(msg) => XmldexError::NotImplemented(msg),
            LockError::Conflict(msg) => XmldexError::invalid_operation(msg),
            LockError::Transaction(msg) => XmldexError::Transaction(msg),
            LockError::Internal(err) => err,
        }
    }
}

pub type LockResult<T> = std::result::Result<T, LockError>;

/// The parameters of a LOCK request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub scope: LockScope,
    pub lock_type: LockType,
    pub depth: LockDepth,
    /// Owner to record. Defaults to the principal's name.
    pub owner: Option<String>,
    pub timeout: LockTimeout,
}

impl Default for LockRequest {
    fn default() -> Self {
        LockRequest {
            scope: LockScope::Exclusive,
            lock_type: LockType::Write,
            depth: LockDepth::Zero,
            owner: None,
            timeout: LockTimeout::Infinite,
        }
    }
}

impl LockRequest {
    pub fn shared() -> Self {
        LockRequest {
            scope: LockScope::Shared,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: LockTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_owner<S: Into<String>>(mut self, owner: S) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Reject what the coordinator cannot grant. Unset fields take the
    /// defaults.
    fn validate(&self) -> LockResult<()> {
        match self.scope {
            LockScope::Exclusive | LockScope::NotSet => {}
            LockScope::Shared => {
                return Err(LockError::NotImplemented(
                    "Shared locks are not implemented.".into(),
                ));
            }
        }
        match self.depth {
            LockDepth::Zero | LockDepth::NotSet => Ok(()),
            depth => Err(LockError::NotImplemented(format!(
                "Locks of depth {depth} are not implemented."
            ))),
        }
    }
}

/// A granted lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveLock {
    pub path: String,
    pub token: LockToken,
}

impl ActiveLock {
    /// The lock-discovery response body.
    pub fn to_xml(&self) -> String {
        let token = &self.token;
        let mut xml = String::with_capacity(512);
        xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n");
        xml.push_str("<D:prop xmlns:D=\"DAV:\">\n");
        xml.push_str("  <D:lockdiscovery>\n");
        xml.push_str("    <D:activelock>\n");
        xml.push_str("      <D:locktype><D:write/></D:locktype>\n");
        let scope = match token.scope {
            LockScope::Shared => "shared",
            LockScope::Exclusive | LockScope::NotSet => "exclusive",
        };
        let _ = writeln!(xml, "      <D:lockscope><D:{scope}/></D:lockscope>");
        let _ = writeln!(xml, "      <D:depth>{}</D:depth>", token.depth);
        let _ = writeln!(
            xml,
            "      <D:owner><D:href>{}</D:href></D:owner>",
            escape_xml(token.owner.as_deref().unwrap_or_default())
        );
        let _ = writeln!(xml, "      <D:timeout>{}</D:timeout>", token.timeout);
        let _ = writeln!(
            xml,
            "      <D:locktoken><D:href>{}</D:href></D:locktoken>",
            escape_xml(&token.token_uri().unwrap_or_default())
        );
        xml.push_str("    </D:activelock>\n");
        xml.push_str("  </D:lockdiscovery>\n");
        xml.push_str("</D:prop>\n");
        xml
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Grants and releases exclusive document locks.
#[derive(Debug)]
pub struct LockCoordinator<R: ResourceStore> {
    resources: Arc<R>,
    transactions: Arc<TransactionManager>,
}

impl<R: ResourceStore> LockCoordinator<R> {
    pub fn new(resources: Arc<R>, transactions: Arc<TransactionManager>) -> Self {
        LockCoordinator {
            resources,
            transactions,
        }
    }

    pub fn resources(&self) -> &Arc<R> {
        &self.resources
    }

    fn resolve(&self, principal: &User, path: &str) -> LockResult<DocumentRecord> {
        match self.resources.document(principal, path)? {
            Some(record) => Ok(record),
            None if self.resources.collection_exists(path) => {
                tracing::debug!(target: "xmldex::webdav", path, "Locking on collections not supported");
                Err(LockError::NotImplemented(
                    "Locking on collections not supported yet.".into(),
                ))
            }
            None => Err(LockError::NotFound(path.to_string())),
        }
    }

    fn holder_name(&self, user_id: i32) -> String {
        self.resources
            .user(user_id)
            .map(|user| user.name)
            .unwrap_or_else(|| format!("#{user_id}"))
    }

    fn commit(&self, record: &DocumentRecord, metadata: DocumentMetadata) -> LockResult<()> {
        let transaction = self.transactions.begin_transaction();
        transaction.lock().add_operation(TransactionOperation::StoreMetadata {
            path: record.path.clone(),
            metadata,
        })?;
        self.transactions
            .commit_transaction(&transaction, self.resources.as_ref())?;
        Ok(())
    }

    /// Lock the document at `path` for `principal`.
    ///
    /// A principal that already holds the lock is granted a fresh token.
    pub fn lock(&self, principal: &User, path: &str, request: &LockRequest) -> LockResult<ActiveLock> {
        self.resolve(principal, path)?;
        let update_lock = self
            .resources
            .update_lock(path)
            .ok_or_else(|| LockError::NotFound(path.to_string()))?;
        let _update = update_lock.lock();

        let record = self.resolve(principal, path)?;
        let holder = record.metadata.user_lock();
        if holder != NO_USER && holder != principal.id {
            let holder = self.holder_name(holder);
            tracing::debug!(target: "xmldex::webdav", path, %holder, "resource is locked");
            return Err(LockError::Locked {
                path: record.path,
                holder,
            });
        }
        request.validate()?;

        let token = LockToken {
            lock_type: LockType::Write,
            scope: LockScope::Exclusive,
            depth: LockDepth::Zero,
            owner: Some(request.owner.clone().unwrap_or_else(|| principal.name.clone())),
            timeout: request.timeout,
            opaque_token: Some(generate_opaque_token()),
        };

        let mut metadata = record.metadata.clone();
        metadata.set_lock_token(Some(token.clone()));
        metadata.set_user_lock(principal.id);
        self.commit(&record, metadata)?;

        tracing::info!(
            target: "xmldex::webdav",
            path = %record.path,
            user = %principal,
            regrant = holder == principal.id,
            "lock granted"
        );
        Ok(ActiveLock {
            path: record.path,
            token,
        })
    }

    /// Release the lock identified by `token`.
    pub fn unlock(&self, principal: &User, path: &str, token: &str) -> LockResult<()> {
        self.resolve(principal, path)?;
        let update_lock = self
            .resources
            .update_lock(path)
            .ok_or_else(|| LockError::NotFound(path.to_string()))?;
        let _update = update_lock.lock();

        let record = self.resolve(principal, path)?;
        let holder = record.metadata.user_lock();
        let Some(current) = record.metadata.lock_token() else {
            return Err(LockError::Conflict(format!("{} is not locked", record.path)));
        };
        if holder != NO_USER && holder != principal.id {
            return Err(LockError::Locked {
                holder: self.holder_name(holder),
                path: record.path,
            });
        }
        if !current.matches(token) {
            return Err(LockError::Conflict(format!(
                "lock token does not match the lock on {}",
                record.path
            )));
        }

        let mut metadata = record.metadata.clone();
        metadata.set_lock_token(None);
        metadata.set_user_lock(NO_USER);
        self.commit(&record, metadata)?;

        tracing::info!(target: "xmldex::webdav", path = %record.path, user = %principal, "lock released");
        Ok(())
    }

    /// The lock currently held on `path`, if any.
    pub fn discover(&self, principal: &User, path: &str) -> LockResult<Option<ActiveLock>> {
        let record = self.resolve(principal, path)?;
        Ok(record.metadata.lock_token().cloned().map(|token| ActiveLock {
            path: record.path.clone(),
            token,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_lock(owner: &str, timeout: LockTimeout) -> ActiveLock {
        ActiveLock {
            path: "/db/a.xml".into(),
            token: LockToken {
                lock_type: LockType::Write,
                scope: LockScope::Exclusive,
                depth: LockDepth::Zero,
                owner: Some(owner.into()),
                timeout,
                opaque_token: Some("0f8fad5b-d9cb-469f-a165-70867728950e".into()),
            },
        }
    }

    #[test]
    fn test_lock_discovery_xml() {
        let xml = active_lock("alice", LockTimeout::Infinite).to_xml();
        let expected = "<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n\
<D:prop xmlns:D=\"DAV:\">\n\
\x20 <D:lockdiscovery>\n\
\x20   <D:activelock>\n\
\x20     <D:locktype><D:write/></D:locktype>\n\
\x20     <D:lockscope><D:exclusive/></D:lockscope>\n\
\x20     <D:depth>0</D:depth>\n\
\x20     <D:owner><D:href>alice</D:href></D:owner>\n\
\x20     <D:timeout>Infinite</D:timeout>\n\
\x20     <D:locktoken><D:href>opaquelocktoken:0f8fad5b-d9cb-469f-a165-70867728950e</D:href></D:locktoken>\n\
\x20   </D:activelock>\n\
\x20 </D:lockdiscovery>\n\
</D:prop>\n";
        assert_eq!(xml, expected);
    }

    #[test]
    fn test_xml_escapes_owner_and_renders_seconds() {
        let xml = active_lock("a<b>&c", LockTimeout::Seconds(600)).to_xml();
        assert!(xml.contains("<D:href>a&lt;b&gt;&amp;c</D:href>"));
        assert!(xml.contains("<D:timeout>Second-600</D:timeout>"));
    }

    #[test]
    fn test_request_validation() {
        assert!(LockRequest::default().validate().is_ok());
        assert_eq!(
            LockRequest::shared().validate().unwrap_err().status_code(),
            SC_NOT_IMPLEMENTED
        );
        let deep = LockRequest {
            depth: LockDepth::Infinity,
            ..LockRequest::default()
        };
        assert_eq!(deep.validate().unwrap_err().status_code(), SC_NOT_IMPLEMENTED);
        let read = LockRequest {
            lock_type: LockType::NotSet,
            ..LockRequest::default()
        };
        assert!(read.validate().is_ok());
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (XmldexError::permission_denied("x"), SC_UNAUTHORIZED),
            (XmldexError::not_found("x"), SC_NOT_FOUND),
            (XmldexError::resource_locked("x"), SC_LOCKED),
            (XmldexError::not_implemented("x"), SC_NOT_IMPLEMENTED),
            (XmldexError::transaction("x"), SC_INTERNAL_SERVER_ERROR),
            (XmldexError::storage("x"), SC_INTERNAL_SERVER_ERROR),
        ];
        for (err, code) in cases {
            assert_eq!(LockError::from(err).status_code(), code);
        }
        assert_eq!(LockError::Conflict("x".into()).status_code(), SC_CONFLICT);
    }

    #[test]
    fn test_locked_storage_error_keeps_its_message() {
        let err = LockError::from(XmldexError::resource_locked("/db/a.xml"));
        assert_eq!(err.status_code(), SC_LOCKED);
        assert_eq!(err.to_string(), "Resource is locked: /db/a.xml");
        assert!(!err.to_string().ends_with("user "));

        let back = XmldexError::from(err);
        assert!(matches!(back, XmldexError::ResourceLocked(ref path) if path == "/db/a.xml"));
    }
}
