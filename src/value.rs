//! Typed atomic values and their order-preserving key encoding.
//!
//! [`AtomicValue`] is what the query evaluator hands over; it covers every
//! atomic type the evaluator knows about. [`IndexableValue`] is the subset that
//! can become part of an index key: it has a total order against peers of the
//! same type and a byte encoding whose lexicographic order matches that total
//! order. `TryFrom<AtomicValue>` is the only way from one to the other.
//!
//! Encoded form: `[type tag][payload]`
//!
//! | type     | payload                                              |
//! |----------|------------------------------------------------------|
//! | boolean  | one byte, 0 or 1                                     |
//! | integer  | i64, sign bit flipped, big-endian                    |
//! | numeric  | f64 bits, all bits flipped if negative else sign set |
//! | date     | days since 1970-01-01 as integer                     |
//! | dateTime | milliseconds since the UTC epoch as integer          |
//! | string   | UTF-8 bytes, lower-cased for case-insensitive indexes |

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, XmldexError};
use crate::qname::QName;

const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_DECIMAL: u8 = 0x03;
const TAG_DOUBLE: u8 = 0x04;
const TAG_FLOAT: u8 = 0x05;
const TAG_DATE: u8 = 0x06;
const TAG_DATE_TIME: u8 = 0x07;
const TAG_STRING: u8 = 0x08;

/// Atomic types known to the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AtomicType {
    String,
    Integer,
    Decimal,
    Double,
    Float,
    Boolean,
    Date,
    DateTime,
    UntypedAtomic,
    QName,
    Base64Binary,
}

impl AtomicType {
    /// The `xs:` name of the type.
    pub fn xs_name(self) -> &'static str {
        match self {
            AtomicType::String => "xs:string",
            AtomicType::Integer => "xs:integer",
            AtomicType::Decimal => "xs:decimal",
            AtomicType::Double => "xs:double",
            AtomicType::Float => "xs:float",
            AtomicType::Boolean => "xs:boolean",
            AtomicType::Date => "xs:date",
            AtomicType::DateTime => "xs:dateTime",
            AtomicType::UntypedAtomic => "xs:untypedAtomic",
            AtomicType::QName => "xs:QName",
            AtomicType::Base64Binary => "xs:base64Binary",
        }
    }

    /// Whether values of this type can become index keys.
    pub fn is_indexable(self) -> bool {
        !matches!(
            self,
            AtomicType::UntypedAtomic | AtomicType::QName | AtomicType::Base64Binary
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            AtomicType::Integer | AtomicType::Decimal | AtomicType::Double | AtomicType::Float
        )
    }

    fn tag(self) -> Option<u8> {
        Some(match self {
            AtomicType::Boolean => TAG_BOOLEAN,
            AtomicType::Integer => TAG_INTEGER,
            AtomicType::Decimal => TAG_DECIMAL,
            AtomicType::Double => TAG_DOUBLE,
            AtomicType::Float => TAG_FLOAT,
            AtomicType::Date => TAG_DATE,
            AtomicType::DateTime => TAG_DATE_TIME,
            AtomicType::String => TAG_STRING,
            _ => return None,
        })
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            TAG_BOOLEAN => AtomicType::Boolean,
            TAG_INTEGER => AtomicType::Integer,
            TAG_DECIMAL => AtomicType::Decimal,
            TAG_DOUBLE => AtomicType::Double,
            TAG_FLOAT => AtomicType::Float,
            TAG_DATE => AtomicType::Date,
            TAG_DATE_TIME => AtomicType::DateTime,
            TAG_STRING => AtomicType::String,
            _ => return None,
        })
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.xs_name())
    }
}

impl FromStr for AtomicType {
    type Err = XmldexError;

    /// Accepts `xs:integer` as well as the bare `integer`.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        let local = name.strip_prefix("xs:").unwrap_or(name);
        Ok(match local {
            "string" => AtomicType::String,
            "integer" | "int" | "long" => AtomicType::Integer,
            "decimal" => AtomicType::Decimal,
            "double" => AtomicType::Double,
            "float" => AtomicType::Float,
            "boolean" => AtomicType::Boolean,
            "date" => AtomicType::Date,
            "dateTime" => AtomicType::DateTime,
            "untypedAtomic" => AtomicType::UntypedAtomic,
            "QName" => AtomicType::QName,
            "base64Binary" => AtomicType::Base64Binary,
            _ => {
                return Err(XmldexError::invalid_argument(format!(
                    "unknown atomic type '{s}'"
                )));
            }
        })
    }
}

impl TryFrom<String> for AtomicType {
    type Error = XmldexError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AtomicType> for String {
    fn from(value: AtomicType) -> Self {
        value.xs_name().to_string()
    }
}

/// Why a value could not become an index key.
///
/// Never fatal for an indexing pass: the entry is logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotIndexable {
    #[error("value '{value}' cannot be converted to type {target}")]
    Coercion { value: String, target: AtomicType },

    #[error("type {0} cannot be used as index key")]
    Unsupported(AtomicType),
}

/// A typed value as produced by the query evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicValue {
    String(String),
    Integer(i64),
    Decimal(f64),
    Double(f64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    UntypedAtomic(String),
    QName(QName),
    Base64Binary(Vec<u8>),
}

impl AtomicValue {
    pub fn atomic_type(&self) -> AtomicType {
        match self {
            AtomicValue::String(_) => AtomicType::String,
            AtomicValue::Integer(_) => AtomicType::Integer,
            AtomicValue::Decimal(_) => AtomicType::Decimal,
            AtomicValue::Double(_) => AtomicType::Double,
            AtomicValue::Float(_) => AtomicType::Float,
            AtomicValue::Boolean(_) => AtomicType::Boolean,
            AtomicValue::Date(_) => AtomicType::Date,
            AtomicValue::DateTime(_) => AtomicType::DateTime,
            AtomicValue::UntypedAtomic(_) => AtomicType::UntypedAtomic,
            AtomicValue::QName(_) => AtomicType::QName,
            AtomicValue::Base64Binary(_) => AtomicType::Base64Binary,
        }
    }
}

impl From<&str> for AtomicValue {
    fn from(value: &str) -> Self {
        AtomicValue::String(value.to_string())
    }
}

impl From<i64> for AtomicValue {
    fn from(value: i64) -> Self {
        AtomicValue::Integer(value)
    }
}

impl From<IndexableValue> for AtomicValue {
    fn from(value: IndexableValue) -> Self {
        match value {
            IndexableValue::String(s) => AtomicValue::String(s),
            IndexableValue::Integer(i) => AtomicValue::Integer(i),
            IndexableValue::Decimal(d) => AtomicValue::Decimal(d),
            IndexableValue::Double(d) => AtomicValue::Double(d),
            IndexableValue::Float(d) => AtomicValue::Float(d),
            IndexableValue::Boolean(b) => AtomicValue::Boolean(b),
            IndexableValue::Date(d) => AtomicValue::Date(d),
            IndexableValue::DateTime(dt) => AtomicValue::DateTime(dt),
        }
    }
}

/// A value that can be part of an index key.
///
/// Floating point payloads are never NaN and never negative zero.
#[derive(Debug, Clone)]
pub enum IndexableValue {
    String(String),
    Integer(i64),
    Decimal(f64),
    Double(f64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl IndexableValue {
    /// Coerce node text to `target`.
    ///
    /// Strings are taken as-is; every other type is parsed from the trimmed
    /// text, so `"001"` as `xs:integer` is 1.
    pub fn from_text(target: AtomicType, text: &str) -> std::result::Result<Self, NotIndexable> {
        let fail = || NotIndexable::Coercion {
            value: text.to_string(),
            target,
        };
        let trimmed = text.trim();

        match target {
            AtomicType::String => Ok(IndexableValue::String(text.to_string())),
            AtomicType::Integer => trimmed
                .parse::<i64>()
                .map(IndexableValue::Integer)
                .map_err(|_| fail()),
            AtomicType::Decimal => {
                if trimmed.contains(['e', 'E']) {
                    return Err(fail());
                }
                parse_f64(trimmed)
                    .filter(|d| d.is_finite())
                    .map(|d| IndexableValue::Decimal(normalize(d)))
                    .ok_or_else(fail)
            }
            AtomicType::Double => parse_f64(trimmed)
                .map(|d| IndexableValue::Double(normalize(d)))
                .ok_or_else(fail),
            AtomicType::Float => parse_f64(trimmed)
                .map(|d| IndexableValue::Float(normalize(d as f32 as f64)))
                .ok_or_else(fail),
            AtomicType::Boolean => match trimmed {
                "true" | "1" => Ok(IndexableValue::Boolean(true)),
                "false" | "0" => Ok(IndexableValue::Boolean(false)),
                _ => Err(fail()),
            },
            AtomicType::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(IndexableValue::Date)
                .map_err(|_| fail()),
            AtomicType::DateTime => parse_date_time(trimmed)
                .map(IndexableValue::DateTime)
                .ok_or_else(fail),
            other => Err(NotIndexable::Unsupported(other)),
        }
    }

    pub fn atomic_type(&self) -> AtomicType {
        match self {
            IndexableValue::String(_) => AtomicType::String,
            IndexableValue::Integer(_) => AtomicType::Integer,
            IndexableValue::Decimal(_) => AtomicType::Decimal,
            IndexableValue::Double(_) => AtomicType::Double,
            IndexableValue::Float(_) => AtomicType::Float,
            IndexableValue::Boolean(_) => AtomicType::Boolean,
            IndexableValue::Date(_) => AtomicType::Date,
            IndexableValue::DateTime(_) => AtomicType::DateTime,
        }
    }

    /// Type tag that leads the encoded form.
    pub fn type_tag(&self) -> u8 {
        match self {
            IndexableValue::String(_) => TAG_STRING,
            IndexableValue::Integer(_) => TAG_INTEGER,
            IndexableValue::Decimal(_) => TAG_DECIMAL,
            IndexableValue::Double(_) => TAG_DOUBLE,
            IndexableValue::Float(_) => TAG_FLOAT,
            IndexableValue::Boolean(_) => TAG_BOOLEAN,
            IndexableValue::Date(_) => TAG_DATE,
            IndexableValue::DateTime(_) => TAG_DATE_TIME,
        }
    }

    /// Append the order-preserving encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>, case_sensitive: bool) {
        out.push(self.type_tag());
        match self {
            IndexableValue::String(s) => {
                if case_sensitive {
                    out.extend_from_slice(s.as_bytes());
                } else {
                    out.extend_from_slice(s.to_lowercase().as_bytes());
                }
            }
            IndexableValue::Integer(i) => out.extend_from_slice(&encode_i64(*i)),
            IndexableValue::Decimal(d) | IndexableValue::Double(d) | IndexableValue::Float(d) => {
                out.extend_from_slice(&encode_f64(*d))
            }
            IndexableValue::Boolean(b) => out.push(u8::from(*b)),
            IndexableValue::Date(d) => out.extend_from_slice(&encode_i64(days_since_epoch(*d))),
            IndexableValue::DateTime(dt) => {
                out.extend_from_slice(&encode_i64(dt.timestamp_millis()))
            }
        }
    }

    /// Encoded form as a fresh buffer.
    pub fn encode(&self, case_sensitive: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        self.encode_into(&mut out, case_sensitive);
        out
    }

    /// Decode a value produced by [`IndexableValue::encode`].
    ///
    /// Strings from a case-insensitive index come back lower-cased.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, payload) = bytes
            .split_first()
            .ok_or_else(|| XmldexError::index("empty value encoding"))?;
        let ty = AtomicType::from_tag(tag)
            .ok_or_else(|| XmldexError::index(format!("unknown value tag {tag:#04x}")))?;

        let fixed = |len: usize| -> Result<[u8; 8]> {
            if payload.len() != len {
                return Err(XmldexError::index(format!(
                    "{ty} payload must be {len} bytes, got {}",
                    payload.len()
                )));
            }
            let mut buf = [0u8; 8];
            buf[..len].copy_from_slice(payload);
            Ok(buf)
        };

        Ok(match ty {
            AtomicType::String => IndexableValue::String(
                String::from_utf8(payload.to_vec())
                    .map_err(|e| XmldexError::index(format!("invalid UTF-8 in key: {e}")))?,
            ),
            AtomicType::Integer => IndexableValue::Integer(decode_i64(fixed(8)?)),
            AtomicType::Decimal => IndexableValue::Decimal(decode_f64(fixed(8)?)),
            AtomicType::Double => IndexableValue::Double(decode_f64(fixed(8)?)),
            AtomicType::Float => IndexableValue::Float(decode_f64(fixed(8)?)),
            AtomicType::Boolean => match fixed(1)?[0] {
                0 => IndexableValue::Boolean(false),
                1 => IndexableValue::Boolean(true),
                other => {
                    return Err(XmldexError::index(format!("invalid boolean byte {other}")));
                }
            },
            AtomicType::Date => {
                let days = decode_i64(fixed(8)?);
                IndexableValue::Date(
                    epoch_date()
                        .checked_add_signed(chrono::Duration::days(days))
                        .ok_or_else(|| XmldexError::index(format!("date out of range: {days}")))?,
                )
            }
            AtomicType::DateTime => {
                let millis = decode_i64(fixed(8)?);
                IndexableValue::DateTime(
                    Utc.timestamp_millis_opt(millis)
                        .single()
                        .ok_or_else(|| XmldexError::index(format!("dateTime out of range: {millis}")))?,
                )
            }
            other => return Err(XmldexError::index(format!("{other} in key encoding"))),
        })
    }
}

impl TryFrom<AtomicValue> for IndexableValue {
    type Error = NotIndexable;

    fn try_from(value: AtomicValue) -> std::result::Result<Self, NotIndexable> {
        let numeric = |d: f64, ty: AtomicType| {
            if d.is_nan() {
                Err(NotIndexable::Coercion {
                    value: d.to_string(),
                    target: ty,
                })
            } else {
                Ok(normalize(d))
            }
        };

        Ok(match value {
            AtomicValue::String(s) => IndexableValue::String(s),
            AtomicValue::Integer(i) => IndexableValue::Integer(i),
            AtomicValue::Decimal(d) => IndexableValue::Decimal(numeric(d, AtomicType::Decimal)?),
            AtomicValue::Double(d) => IndexableValue::Double(numeric(d, AtomicType::Double)?),
            AtomicValue::Float(d) => IndexableValue::Float(numeric(d, AtomicType::Float)?),
            AtomicValue::Boolean(b) => IndexableValue::Boolean(b),
            AtomicValue::Date(d) => IndexableValue::Date(d),
            AtomicValue::DateTime(dt) => IndexableValue::DateTime(dt),
            other => return Err(NotIndexable::Unsupported(other.atomic_type())),
        })
    }
}

impl PartialEq for IndexableValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexableValue {}

impl PartialOrd for IndexableValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Strings compare by their raw bytes, which is the order of the
/// case-sensitive encoding. A case-insensitive index orders keys by the
/// lower-cased bytes instead, so there `Ord` and the stored order can differ
/// for strings that differ in case. Lookups always compare encoded bytes.
impl Ord for IndexableValue {
    /// Values of different types order by type tag, like their encodings.
    fn cmp(&self, other: &Self) -> Ordering {
        use IndexableValue::*;
        match (self, other) {
            (String(a), String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Decimal(a), Decimal(b)) | (Double(a), Double(b)) | (Float(a), Float(b)) => {
                a.total_cmp(b)
            }
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            _ => self.type_tag().cmp(&other.type_tag()),
        }
    }
}

impl fmt::Display for IndexableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexableValue::String(s) => write!(f, "\"{s}\""),
            IndexableValue::Integer(i) => write!(f, "{i}"),
            IndexableValue::Decimal(d) | IndexableValue::Double(d) | IndexableValue::Float(d) => {
                write!(f, "{d}")
            }
            IndexableValue::Boolean(b) => write!(f, "{b}"),
            IndexableValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            IndexableValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

fn normalize(d: f64) -> f64 {
    if d == 0.0 { 0.0 } else { d }
}

fn parse_f64(text: &str) -> Option<f64> {
    let value = match text {
        "INF" | "+INF" => f64::INFINITY,
        "-INF" => f64::NEG_INFINITY,
        _ => {
            // Rust accepts "inf" and "nan" spellings that XML Schema does not.
            if text.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
                return None;
            }
            text.parse::<f64>().ok()?
        }
    };
    (!value.is_nan()).then_some(value)
}

fn parse_date_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    // No timezone: interpreted as UTC.
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn epoch_date() -> NaiveDate {
    NaiveDate::default()
}

fn days_since_epoch(date: NaiveDate) -> i64 {
    (date - epoch_date()).num_days()
}

fn encode_i64(value: i64) -> [u8; 8] {
    ((value as u64) ^ (1u64 << 63)).to_be_bytes()
}

fn decode_i64(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1u64 << 63)) as i64
}

fn encode_f64(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let ordered = if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1u64 << 63)
    };
    ordered.to_be_bytes()
}

fn decode_f64(bytes: [u8; 8]) -> f64 {
    let ordered = u64::from_be_bytes(bytes);
    let bits = if ordered >> 63 == 1 {
        ordered & !(1u64 << 63)
    } else {
        !ordered
    };
    f64::from_bits(bits)
}
