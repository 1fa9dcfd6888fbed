//! FITS-like header metadata.

use crate::error::{MarvinError, MarvinResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One header card value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Logical(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl HeaderValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Float(v) => Some(*v),
            HeaderValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeaderValue::Logical(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            HeaderValue::Int(v) => write!(f, "{v}"),
            HeaderValue::Float(v) => write!(f, "{v}"),
            HeaderValue::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Int(v)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        HeaderValue::Float(v)
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Str(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Str(v)
    }
}

/// Value type of a known header key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Int,
    Float,
    Str,
}

/// Keys carried by product headers and their types.
///
/// Only these keys are read from and written to product files.
pub const HEADER_SCHEMA: &[(&str, KeyType)] = &[
    ("PLATEIFU", KeyType::Str),
    ("MANGAID", KeyType::Str),
    ("PLATE", KeyType::Int),
    ("IFUDSGN", KeyType::Str),
    ("OBJRA", KeyType::Float),
    ("OBJDEC", KeyType::Float),
    ("IFURA", KeyType::Float),
    ("IFUDEC", KeyType::Float),
    ("CTYPE1", KeyType::Str),
    ("CTYPE2", KeyType::Str),
    ("CUNIT1", KeyType::Str),
    ("CUNIT2", KeyType::Str),
    ("CRPIX1", KeyType::Float),
    ("CRPIX2", KeyType::Float),
    ("CRVAL1", KeyType::Float),
    ("CRVAL2", KeyType::Float),
    ("CD1_1", KeyType::Float),
    ("CD1_2", KeyType::Float),
    ("CD2_1", KeyType::Float),
    ("CD2_2", KeyType::Float),
    ("EBVGAL", KeyType::Float),
    ("DRP3QUAL", KeyType::Int),
    ("DAPQUAL", KeyType::Int),
    ("MNGTARG1", KeyType::Int),
    ("MNGTARG2", KeyType::Int),
    ("MNGTARG3", KeyType::Int),
    ("VERSDRP3", KeyType::Str),
    ("VERSDAP", KeyType::Str),
    ("BINTYPE", KeyType::Str),
    ("TEMPLATE", KeyType::Str),
    ("DATAKIND", KeyType::Str),
];

/// Ordered header keyword map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header(BTreeMap<String, HeaderValue>);

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        self.0.insert(key.into().to_uppercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.0.get(&key.to_uppercase())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(HeaderValue::as_i64)
    }

    /// Float key that must be present.
    pub fn require_f64(&self, key: &str) -> MarvinResult<f64> {
        self.get_f64(key)
            .ok_or_else(|| MarvinError::InvalidData(format!("header is missing numeric key {key}")))
    }

    /// String key that must be present.
    pub fn require_str(&self, key: &str) -> MarvinResult<&str> {
        self.get_str(key)
            .ok_or_else(|| MarvinError::InvalidData(format!("header is missing key {key}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_keys_are_case_insensitive() {
        let mut header = Header::new();
        header.insert("plateifu", "8485-1901");
        header.insert("CRPIX1", 17.0);
        header.insert("PLATE", 8485_i64);

        assert_eq!(header.get_str("PLATEIFU"), Some("8485-1901"));
        assert_eq!(header.get_f64("crpix1"), Some(17.0));
        assert_eq!(header.get_f64("PLATE"), Some(8485.0));
        assert_eq!(header.get_i64("PLATE"), Some(8485));
        assert!(header.require_f64("CRVAL1").is_err());
    }

    #[test]
    fn test_header_json_keeps_types() {
        let mut header = Header::new();
        header.insert("DRP3QUAL", 0_i64);
        header.insert("OBJRA", 232.544703);
        header.insert("CTYPE1", "RA---TAN");

        let json = serde_json::to_string(&header).unwrap();
        let back: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(back, header);
        assert_eq!(back.get("DRP3QUAL"), Some(&HeaderValue::Int(0)));
    }
}
