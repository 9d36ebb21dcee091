//! Key and value types for Gink
//!
//! This module defines:
//! - UserKey: keys of directories and key sets (int, string, or bytes)
//! - Value: the user-visible value model stored in entries
//!
//! ## Type Rules
//!
//! - Integer keys are limited to `|k| <= 2^53 - 1`
//! - `Int(1) != Float(1.0)`; different types are never equal
//! - Documents keep their insertion order

use crate::error::{Error, Result};
use crate::proto::{
    key_builder, value_builder, value_builder::special, DocumentBuilder, KeyBuilder, TupleBuilder,
    ValueBuilder,
};
use std::fmt;

/// Largest magnitude allowed for an integer key.
pub const KEY_MAX: i64 = (1 << 53) - 1;

const TAG_NUMBER: u8 = 0x10;
const TAG_CHARACTERS: u8 = 0x20;
const TAG_OCTETS: u8 = 0x30;

// =============================================================================
// UserKey
// =============================================================================

/// Key of a directory or key set entry.
///
/// Variant order matches the order of the encoded form: every integer key
/// sorts before every string key, which sorts before every bytes key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UserKey {
    /// Integer key, `|k| <= 2^53 - 1`
    Number(i64),
    /// UTF-8 string key
    Characters(String),
    /// Raw bytes key
    Octets(Vec<u8>),
}

impl UserKey {
    /// Reject keys outside the supported range.
    pub fn validate(&self) -> Result<()> {
        match self {
            UserKey::Number(n) if n.unsigned_abs() > KEY_MAX as u64 => {
                Err(Error::InvalidKey(format!("integer key out of range: {n}")))
            }
            _ => Ok(()),
        }
    }

    /// Order-preserving binary form used inside placement keys.
    ///
    /// A tag byte is followed by either the sign-flipped big-endian integer,
    /// or the payload with `0x00` escaped as `0x00 0xFF` and terminated by
    /// `0x00 0x01`. No encoding is a prefix of another.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            UserKey::Number(n) => {
                let mut out = Vec::with_capacity(9);
                out.push(TAG_NUMBER);
                out.extend_from_slice(&((*n as u64) ^ (1 << 63)).to_be_bytes());
                out
            }
            UserKey::Characters(s) => escape(TAG_CHARACTERS, s.as_bytes()),
            UserKey::Octets(b) => escape(TAG_OCTETS, b),
        }
    }

    /// Inverse of [`UserKey::encode`]; `data` must hold exactly one key.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (tag, rest) = data
            .split_first()
            .ok_or_else(|| Error::InvalidKey("empty encoded key".to_string()))?;
        match *tag {
            TAG_NUMBER => {
                let raw: [u8; 8] = rest
                    .try_into()
                    .map_err(|_| Error::InvalidKey("integer key must be 8 bytes".to_string()))?;
                Ok(UserKey::Number((u64::from_be_bytes(raw) ^ (1 << 63)) as i64))
            }
            TAG_CHARACTERS => String::from_utf8(unescape(rest)?)
                .map(UserKey::Characters)
                .map_err(|e| Error::InvalidKey(e.to_string())),
            TAG_OCTETS => Ok(UserKey::Octets(unescape(rest)?)),
            other => Err(Error::InvalidKey(format!("unknown key tag {other:#04x}"))),
        }
    }

    /// Convert to a wire builder.
    pub fn to_builder(&self) -> KeyBuilder {
        let key = match self {
            UserKey::Number(n) => key_builder::Key::Number(*n),
            UserKey::Characters(s) => key_builder::Key::Characters(s.clone()),
            UserKey::Octets(b) => key_builder::Key::Octets(b.clone()),
        };
        KeyBuilder { key: Some(key) }
    }

    /// Parse a wire builder.
    pub fn from_builder(builder: &KeyBuilder) -> Result<Self> {
        let key = match &builder.key {
            Some(key_builder::Key::Number(n)) => UserKey::Number(*n),
            Some(key_builder::Key::Characters(s)) => UserKey::Characters(s.clone()),
            Some(key_builder::Key::Octets(b)) => UserKey::Octets(b.clone()),
            None => return Err(Error::InvalidKey("key builder is empty".to_string())),
        };
        key.validate()?;
        Ok(key)
    }
}

fn escape(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    out.push(tag);
    for &byte in payload {
        out.push(byte);
        if byte == 0 {
            out.push(0xFF);
        }
    }
    out.extend_from_slice(&[0x00, 0x01]);
    out
}

fn unescape(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] != 0 {
            out.push(data[i]);
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            Some(0xFF) => {
                out.push(0);
                i += 2;
            }
            Some(0x01) if i + 2 == data.len() => return Ok(out),
            _ => break,
        }
    }
    Err(Error::InvalidKey("malformed escaped key".to_string()))
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserKey::Number(n) => write!(f, "{n}"),
            UserKey::Characters(s) => write!(f, "{s:?}"),
            UserKey::Octets(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

impl From<&str> for UserKey {
    fn from(s: &str) -> Self {
        UserKey::Characters(s.to_string())
    }
}

impl From<String> for UserKey {
    fn from(s: String) -> Self {
        UserKey::Characters(s)
    }
}

impl From<i64> for UserKey {
    fn from(n: i64) -> Self {
        UserKey::Number(n)
    }
}

impl From<i32> for UserKey {
    fn from(n: i32) -> Self {
        UserKey::Number(n as i64)
    }
}

impl From<Vec<u8>> for UserKey {
    fn from(b: Vec<u8>) -> Self {
        UserKey::Octets(b)
    }
}

impl From<&[u8]> for UserKey {
    fn from(b: &[u8]) -> Self {
        UserKey::Octets(b.to_vec())
    }
}

// =============================================================================
// Value
// =============================================================================

/// Value stored in an entry.
///
/// Float equality follows IEEE-754 semantics, so `NaN != NaN`.
#[derive(Debug, Clone)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Microseconds since the epoch
    Timestamp(i64),
    /// Fixed sequence of values
    Tuple(Vec<Value>),
    /// Keyed values in insertion order
    Document(Vec<(UserKey, Value)>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Document(a), Value::Document(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Timestamp(_) => "Timestamp",
            Value::Tuple(_) => "Tuple",
            Value::Document(_) => "Document",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as integer if this is an Int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as string slice if this is a String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as bool if this is a Bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert to a wire builder.
    pub fn to_builder(&self) -> ValueBuilder {
        use value_builder::Value as V;
        let value = match self {
            Value::Null => V::Special(special::NULL),
            Value::Bool(true) => V::Special(special::TRUE),
            Value::Bool(false) => V::Special(special::FALSE),
            Value::Int(i) => V::Integer(*i),
            Value::Float(f) => V::Doubled(*f),
            Value::String(s) => V::Characters(s.clone()),
            Value::Bytes(b) => V::Octets(b.clone()),
            Value::Timestamp(t) => V::Timestamp(*t),
            Value::Tuple(items) => V::Tuple(TupleBuilder {
                values: items.iter().map(Value::to_builder).collect(),
            }),
            Value::Document(pairs) => V::Document(DocumentBuilder {
                keys: pairs.iter().map(|(k, _)| k.to_builder()).collect(),
                values: pairs.iter().map(|(_, v)| v.to_builder()).collect(),
            }),
        };
        ValueBuilder { value: Some(value) }
    }

    /// Parse a wire builder.
    pub fn from_builder(builder: &ValueBuilder) -> Result<Self> {
        use value_builder::Value as V;
        match &builder.value {
            Some(V::Special(special::NULL)) => Ok(Value::Null),
            Some(V::Special(special::TRUE)) => Ok(Value::Bool(true)),
            Some(V::Special(special::FALSE)) => Ok(Value::Bool(false)),
            Some(V::Special(code)) => Err(Error::InvalidValue(format!("unknown special {code}"))),
            Some(V::Integer(i)) => Ok(Value::Int(*i)),
            Some(V::Doubled(f)) => Ok(Value::Float(*f)),
            Some(V::Characters(s)) => Ok(Value::String(s.clone())),
            Some(V::Octets(b)) => Ok(Value::Bytes(b.clone())),
            Some(V::Timestamp(t)) => Ok(Value::Timestamp(*t)),
            Some(V::Tuple(tuple)) => tuple
                .values
                .iter()
                .map(Value::from_builder)
                .collect::<Result<Vec<_>>>()
                .map(Value::Tuple),
            Some(V::Document(doc)) => {
                if doc.keys.len() != doc.values.len() {
                    return Err(Error::InvalidValue(
                        "document keys and values differ in length".to_string(),
                    ));
                }
                doc.keys
                    .iter()
                    .zip(&doc.values)
                    .map(|(k, v)| Ok((UserKey::from_builder(k)?, Value::from_builder(v)?)))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Document)
            }
            None => Err(Error::InvalidValue("value builder is empty".to_string())),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_range() {
        assert!(UserKey::Number(KEY_MAX).validate().is_ok());
        assert!(UserKey::Number(-KEY_MAX).validate().is_ok());
        assert!(UserKey::Number(KEY_MAX + 1).validate().is_err());
        let builder = UserKey::Number(i64::MIN).to_builder();
        assert!(matches!(UserKey::from_builder(&builder), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_key_encoding_types_ordered() {
        let n = UserKey::Number(KEY_MAX).encode();
        let s = UserKey::from("").encode();
        let b = UserKey::Octets(vec![]).encode();
        assert!(n < s && s < b);
    }

    #[test]
    fn test_key_with_embedded_zero() {
        let key = UserKey::from(vec![0u8, 1, 0]);
        assert_eq!(UserKey::decode(&key.encode()).unwrap(), key);
        assert!(UserKey::from("a").encode() < UserKey::from("a\0").encode());
        assert!(UserKey::from("a\0").encode() < UserKey::from("a\u{1}").encode());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(UserKey::decode(&[]).is_err());
        assert!(UserKey::decode(&[0x20, b'a']).is_err());
        assert!(UserKey::decode(&[0x99]).is_err());
    }

    #[test]
    fn test_value_equality_is_typed() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Bytes(b"x".to_vec()), Value::from("x"));
    }

    #[test]
    fn test_document_keeps_order() {
        let doc = Value::Document(vec![
            (UserKey::from("z"), Value::Int(1)),
            (UserKey::from("a"), Value::Null),
        ]);
        let restored = Value::from_builder(&doc.to_builder()).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn test_special_values() {
        for value in [Value::Null, Value::Bool(true), Value::Bool(false)] {
            assert_eq!(Value::from_builder(&value.to_builder()).unwrap(), value);
        }
        assert!(Value::from_builder(&ValueBuilder::default()).is_err());
    }

    fn user_key() -> impl Strategy<Value = UserKey> {
        prop_oneof![
            (-KEY_MAX..=KEY_MAX).prop_map(UserKey::Number),
            ".*".prop_map(UserKey::Characters),
            proptest::collection::vec(any::<u8>(), 0..24).prop_map(UserKey::Octets),
        ]
    }

    fn value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1e12f64..1e12).prop_map(Value::Float),
            ".*".prop_map(Value::String),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
            (0i64..i64::MAX).prop_map(Value::Timestamp),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Tuple),
                proptest::collection::vec((user_key(), inner), 0..4).prop_map(Value::Document),
            ]
        })
    }

    proptest! {
        #[test]
        fn test_key_roundtrip(key in user_key()) {
            prop_assert_eq!(UserKey::decode(&key.encode()).unwrap(), key.clone());
            prop_assert_eq!(UserKey::from_builder(&key.to_builder()).unwrap(), key);
        }

        #[test]
        fn test_key_order_preserved(a in user_key(), b in user_key()) {
            prop_assert_eq!(a.cmp(&b), a.encode().cmp(&b.encode()));
        }

        #[test]
        fn test_value_roundtrip(v in value()) {
            prop_assert_eq!(Value::from_builder(&v.to_builder()).unwrap(), v);
        }
    }
}
