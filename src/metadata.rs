//! Administrative state of a stored document and its binary form.
//!
//! Layout (big-endian, strings are a varint byte length followed by UTF-8):
//!
//! ```text
//! i64 created | i64 last_modified | str mime_type | i32 page_count | i32 user_lock
//! u8 0 | u8 HAS_DOCTYPE, doctype
//! u8 0 | u8 HAS_LOCKTOKEN, lock token
//! ```
//!
//! A doctype is three optional strings (name, public id, system id), each a
//! presence byte followed by the string. A lock token is
//! `u8 type | u8 scope | u8 depth | i64 timeout | opt owner | opt token`.

use std::fmt;
use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, XmldexError};
use crate::util::varint;

/// Flag byte announcing a doctype.
pub const HAS_DOCTYPE: u8 = 1;

/// Flag byte announcing a lock token.
pub const HAS_LOCKTOKEN: u8 = 2;

/// Reindex level meaning "the whole document".
pub const REINDEX_ALL: i32 = -1;

/// Mime type of documents that never set one.
pub const XML_MIME_TYPE: &str = "application/xml";

/// Prefix of lock token URIs.
pub const OPAQUE_TOKEN_SCHEME: &str = "opaquelocktoken:";

/// Longest string the codec accepts.
const MAX_STRING_LEN: u64 = 1 << 24;

/// The doctype declaration of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentType {
    pub name: Option<String>,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

impl DocumentType {
    pub fn new<N: Into<String>>(name: N) -> Self {
        DocumentType {
            name: Some(name.into()),
            public_id: None,
            system_id: None,
        }
    }

    pub fn with_ids<P: Into<String>, S: Into<String>>(mut self, public_id: P, system_id: S) -> Self {
        self.public_id = Some(public_id.into());
        self.system_id = Some(system_id.into());
        self
    }
}

/// `lockscope` of a WebDAV lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    NotSet,
    Exclusive,
    Shared,
}

/// `locktype` of a WebDAV lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    NotSet,
    Write,
}

/// `Depth` of a WebDAV lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockDepth {
    NotSet,
    Zero,
    One,
    Infinity,
}

/// Lifetime of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockTimeout {
    Infinite,
    Seconds(u32),
}

impl LockScope {
    fn to_byte(self) -> u8 {
        match self {
            LockScope::NotSet => 0,
            LockScope::Exclusive => 1,
            LockScope::Shared => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(LockScope::NotSet),
            1 => Ok(LockScope::Exclusive),
            2 => Ok(LockScope::Shared),
            other => Err(XmldexError::codec(format!("unknown lock scope {other}"))),
        }
    }
}

impl LockType {
    fn to_byte(self) -> u8 {
        match self {
            LockType::NotSet => 0,
            LockType::Write => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(LockType::NotSet),
            1 => Ok(LockType::Write),
            other => Err(XmldexError::codec(format!("unknown lock type {other}"))),
        }
    }
}

impl LockDepth {
    fn to_byte(self) -> u8 {
        match self {
            LockDepth::Zero => 0,
            LockDepth::One => 1,
            LockDepth::Infinity => 2,
            LockDepth::NotSet => 0xFF,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(LockDepth::Zero),
            1 => Ok(LockDepth::One),
            2 => Ok(LockDepth::Infinity),
            0xFF => Ok(LockDepth::NotSet),
            other => Err(XmldexError::codec(format!("unknown lock depth {other}"))),
        }
    }
}

impl fmt::Display for LockDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockDepth::Zero => f.write_str("0"),
            LockDepth::One => f.write_str("1"),
            LockDepth::Infinity => f.write_str("Infinity"),
            LockDepth::NotSet => f.write_str("not set"),
        }
    }
}

impl LockTimeout {
    fn to_i64(self) -> i64 {
        match self {
            LockTimeout::Infinite => -1,
            LockTimeout::Seconds(seconds) => i64::from(seconds),
        }
    }

    fn from_i64(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(LockTimeout::Infinite),
            v => u32::try_from(v)
                .map(LockTimeout::Seconds)
                .map_err(|_| XmldexError::codec(format!("invalid lock timeout {v}"))),
        }
    }
}

impl fmt::Display for LockTimeout {
    /// The `Timeout` header form: `Infinite` or `Second-n`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTimeout::Infinite => f.write_str("Infinite"),
            LockTimeout::Seconds(seconds) => write!(f, "Second-{seconds}"),
        }
    }
}

/// A lock held on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub lock_type: LockType,
    pub scope: LockScope,
    pub depth: LockDepth,
    pub owner: Option<String>,
    pub timeout: LockTimeout,
    /// Token without the `opaquelocktoken:` scheme.
    pub opaque_token: Option<String>,
}

impl LockToken {
    /// An exclusive depth-0 write lock with a fresh token.
    pub fn exclusive_write(owner: Option<String>, timeout: LockTimeout) -> Self {
        LockToken {
            lock_type: LockType::Write,
            scope: LockScope::Exclusive,
            depth: LockDepth::Zero,
            owner,
            timeout,
            opaque_token: Some(generate_opaque_token()),
        }
    }

    /// The token as a URI, e.g. `opaquelocktoken:5f0c...`.
    pub fn token_uri(&self) -> Option<String> {
        self.opaque_token
            .as_ref()
            .map(|token| format!("{OPAQUE_TOKEN_SCHEME}{token}"))
    }

    /// Whether `token` names this lock, with or without the URI scheme.
    pub fn matches(&self, token: &str) -> bool {
        let token = token.trim().trim_start_matches('<').trim_end_matches('>');
        let token = token.strip_prefix(OPAQUE_TOKEN_SCHEME).unwrap_or(token);
        self.opaque_token.as_deref() == Some(token)
    }

    fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_u8(self.lock_type.to_byte())?;
        out.write_u8(self.scope.to_byte())?;
        out.write_u8(self.depth.to_byte())?;
        out.write_i64::<BigEndian>(self.timeout.to_i64())?;
        write_optional_string(out, self.owner.as_deref())?;
        write_optional_string(out, self.opaque_token.as_deref())
    }

    fn read<R: Read>(input: &mut R) -> Result<Self> {
        Ok(LockToken {
            lock_type: LockType::from_byte(input.read_u8()?)?,
            scope: LockScope::from_byte(input.read_u8()?)?,
            depth: LockDepth::from_byte(input.read_u8()?)?,
            timeout: LockTimeout::from_i64(input.read_i64::<BigEndian>()?)?,
            owner: read_optional_string(input)?,
            opaque_token: read_optional_string(input)?,
        })
    }
}

/// A new random opaque lock token.
pub fn generate_opaque_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn reindex_all() -> i32 {
    REINDEX_ALL
}

/// Metadata of one document.
///
/// `reindex` and `split_count` are transient: they are not written and are
/// not compared by `==`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    mime_type: String,
    created: i64,
    last_modified: i64,
    page_count: i32,
    user_lock: i32,
    doc_type: Option<DocumentType>,
    lock_token: Option<LockToken>,
    #[serde(skip, default = "reindex_all")]
    reindex: i32,
    #[serde(skip)]
    split_count: i32,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        DocumentMetadata {
            mime_type: XML_MIME_TYPE.to_string(),
            created: 0,
            last_modified: 0,
            page_count: 0,
            user_lock: 0,
            doc_type: None,
            lock_token: None,
            reindex: REINDEX_ALL,
            split_count: 0,
        }
    }
}

impl PartialEq for DocumentMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.mime_type == other.mime_type
            && self.created == other.created
            && self.last_modified == other.last_modified
            && self.page_count == other.page_count
            && self.user_lock == other.user_lock
            && self.doc_type == other.doc_type
            && self.lock_token == other.lock_token
    }
}

impl Eq for DocumentMetadata {}

impl DocumentMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy carrying only the mime type and the timestamps of `other`.
    pub fn derive_from(other: &DocumentMetadata) -> Self {
        DocumentMetadata {
            mime_type: other.mime_type.clone(),
            created: other.created,
            last_modified: other.last_modified,
            ..Self::default()
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn set_mime_type<S: Into<String>>(&mut self, mime_type: S) {
        self.mime_type = mime_type.into();
    }

    /// Creation time in milliseconds since the epoch.
    pub fn created(&self) -> i64 {
        self.created
    }

    /// Set the creation time. An unset or earlier last-modified time
    /// follows it.
    pub fn set_created(&mut self, millis: i64) {
        self.created = millis;
        if self.last_modified == 0 || self.last_modified < millis {
            self.last_modified = millis;
        }
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    /// Set the last-modified time, never earlier than the creation time.
    pub fn set_last_modified(&mut self, millis: i64) {
        self.last_modified = millis.max(self.created);
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created)
    }

    pub fn last_modified_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.last_modified)
    }

    /// Stamp the document as modified now.
    pub fn touch(&mut self) {
        self.set_last_modified(Utc::now().timestamp_millis());
    }

    pub fn page_count(&self) -> i32 {
        self.page_count
    }

    pub fn set_page_count(&mut self, count: i32) {
        self.page_count = count;
    }

    pub fn inc_page_count(&mut self) {
        self.page_count = self.page_count.saturating_add(1);
    }

    pub fn dec_page_count(&mut self) {
        self.page_count = self.page_count.saturating_sub(1);
    }

    /// Id of the user holding a lock, 0 if none.
    pub fn user_lock(&self) -> i32 {
        self.user_lock
    }

    pub fn set_user_lock(&mut self, user_id: i32) {
        self.user_lock = user_id;
    }

    pub fn doc_type(&self) -> Option<&DocumentType> {
        self.doc_type.as_ref()
    }

    pub fn set_doc_type(&mut self, doc_type: Option<DocumentType>) {
        self.doc_type = doc_type;
    }

    pub fn lock_token(&self) -> Option<&LockToken> {
        self.lock_token.as_ref()
    }

    pub fn set_lock_token(&mut self, token: Option<LockToken>) {
        self.lock_token = token;
    }

    pub fn reindex_required(&self) -> i32 {
        self.reindex
    }

    pub fn set_reindex_required(&mut self, level: i32) {
        self.reindex = level;
    }

    pub fn split_count(&self) -> i32 {
        self.split_count
    }

    pub fn set_split_count(&mut self, count: i32) {
        self.split_count = count;
    }

    pub fn inc_split_count(&mut self) {
        self.split_count = self.split_count.saturating_add(1);
    }

    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_i64::<BigEndian>(self.created)?;
        out.write_i64::<BigEndian>(self.last_modified)?;
        write_string(out, &self.mime_type)?;
        out.write_i32::<BigEndian>(self.page_count)?;
        out.write_i32::<BigEndian>(self.user_lock)?;

        match &self.doc_type {
            Some(doc_type) => {
                out.write_u8(HAS_DOCTYPE)?;
                write_optional_string(out, doc_type.name.as_deref())?;
                write_optional_string(out, doc_type.public_id.as_deref())?;
                write_optional_string(out, doc_type.system_id.as_deref())?;
            }
            None => out.write_u8(0)?,
        }

        match &self.lock_token {
            Some(token) => {
                out.write_u8(HAS_LOCKTOKEN)?;
                token.write(out)?;
            }
            None => out.write_u8(0)?,
        }
        Ok(())
    }

    /// Decode one metadata record. Any failure is a `MetadataCodec` error.
    pub fn read<R: Read>(input: &mut R) -> Result<Self> {
        Self::read_fields(input).map_err(|err| match err {
            XmldexError::MetadataCodec(_) => err,
            other => XmldexError::codec(other.to_string()),
        })
    }

    fn read_fields<R: Read>(input: &mut R) -> Result<Self> {
        let created = input.read_i64::<BigEndian>()?;
        let last_modified = input.read_i64::<BigEndian>()?;
        let mime_type = read_string(input)?;
        let page_count = input.read_i32::<BigEndian>()?;
        let user_lock = input.read_i32::<BigEndian>()?;

        let doc_type = match input.read_u8()? {
            0 => None,
            HAS_DOCTYPE => Some(DocumentType {
                name: read_optional_string(input)?,
                public_id: read_optional_string(input)?,
                system_id: read_optional_string(input)?,
            }),
            other => return Err(XmldexError::codec(format!("invalid doctype flag {other}"))),
        };

        let lock_token = match input.read_u8()? {
            0 => None,
            HAS_LOCKTOKEN => Some(LockToken::read(input)?),
            other => return Err(XmldexError::codec(format!("invalid lock token flag {other}"))),
        };

        Ok(DocumentMetadata {
            mime_type,
            created,
            last_modified,
            page_count,
            user_lock,
            doc_type,
            lock_token,
            reindex: REINDEX_ALL,
            split_count: 0,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        self.write(&mut out)?;
        Ok(out)
    }

    /// Decode `bytes`, which must hold exactly one record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let metadata = Self::read(&mut cursor)?;
        let consumed = cursor.position() as usize;
        if consumed != bytes.len() {
            return Err(XmldexError::codec(format!(
                "{} trailing bytes after metadata",
                bytes.len() - consumed
            )));
        }
        Ok(metadata)
    }
}

fn write_string<W: Write>(out: &mut W, value: &str) -> Result<()> {
    varint::write_u64(out, value.len() as u64)?;
    out.write_all(value.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(input: &mut R) -> Result<String> {
    let len = varint::read_u64(input)?;
    if len > MAX_STRING_LEN {
        return Err(XmldexError::codec(format!("string length {len} too large")));
    }
    let mut bytes = Vec::with_capacity(len as usize);
    Read::take(&mut *input, len).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != len {
        return Err(XmldexError::codec("truncated string"));
    }
    String::from_utf8(bytes).map_err(|e| XmldexError::codec(format!("invalid UTF-8: {e}")))
}

fn write_optional_string<W: Write>(out: &mut W, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => {
            out.write_u8(1)?;
            write_string(out, value)
        }
        None => Ok(out.write_u8(0)?),
    }
}

fn read_optional_string<R: Read>(input: &mut R) -> Result<Option<String>> {
    match input.read_u8()? {
        0 => Ok(None),
        1 => Ok(Some(read_string(input)?)),
        other => Err(XmldexError::codec(format!("invalid presence flag {other}"))),
    }
}
