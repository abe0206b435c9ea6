//! Document codec
//!
//! Converts entities to and from the wire representation used by the remote
//! document database and the local cache: flat key/value maps holding only
//! strings, numbers, booleans, timestamps, arrays and nested maps.
//!
//! ## Optional fields
//!
//! Absent optional fields are omitted from encoded documents. Remote updates
//! are merge-writes, so a field that must be cleared is written as an
//! explicit [`Value::Null`] instead (see [`DocumentCodec::encode_for_merge`]).
//! Decoding treats `Null` the same as an absent field.

mod entities;
mod value;

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::models::Entity;

pub use entities::keys;
pub use value::Value;

/// Errors raised while decoding a document
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field type for {field}: expected {expected}")]
    InvalidType {
        field: String,
        expected: &'static str,
    },

    #[error("Invalid id in {field}: '{value}'")]
    InvalidId { field: String, value: String },

    #[error("Unknown block type: {0}")]
    UnknownBlockType(String),

    #[error("Invalid timestamp in {0}")]
    InvalidTimestamp(String),

    #[error("Malformed JSON: {0}")]
    Json(String),
}

/// The three synchronized collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Notes,
    Folders,
    Tags,
}

impl Collection {
    /// Every collection, in binding order
    pub const ALL: [Collection; 3] = [Collection::Notes, Collection::Folders, Collection::Tags];

    /// Remote collection name
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Notes => "notes",
            Collection::Folders => "folders",
            Collection::Tags => "tags",
        }
    }

    /// Key under which the local cache keeps this collection
    pub fn cache_key(&self) -> &'static str {
        match self {
            Collection::Notes => "saved_notes",
            Collection::Folders => "saved_folders",
            Collection::Tags => "saved_tags",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A wire document: field name to value
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`Document::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Get a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a field, treating explicit `Null` as absent
    pub fn get_present(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Remove a field
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Whether a field is set (possibly to `Null`)
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the document has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over fields in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overlay every field of `patch` onto this document
    ///
    /// Fields absent from `patch` are left untouched; fields set to `Null`
    /// in `patch` become `Null` here.
    pub fn merge(&mut self, patch: Document) {
        self.0.extend(patch.0);
    }

    /// Serialize to a JSON object string
    pub fn to_json_string(&self) -> String {
        Value::Map(self.clone()).to_json().to_string()
    }

    /// Parse from a JSON object string
    pub fn from_json_str(json: &str) -> Result<Self, CodecError> {
        let parsed: serde_json::Value =
            serde_json::from_str(json).map_err(|e| CodecError::Json(e.to_string()))?;
        match Value::from_json(parsed) {
            Value::Map(doc) => Ok(doc),
            _ => Err(CodecError::Json("expected a JSON object".to_string())),
        }
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Conversion between an entity and its wire document
pub trait DocumentCodec: Entity + Sized {
    /// Collection the entity lives in
    const COLLECTION: Collection;

    /// Optional fields that must be written as `Null` to be cleared remotely
    const CLEARABLE_FIELDS: &'static [&'static str] = &[];

    /// Encode every non-null field
    fn encode(&self) -> Document;

    /// Decode a document, failing if a required field is missing or mistyped
    fn decode(doc: &Document) -> Result<Self, CodecError>;

    /// Encode for a merge-write: absent clearable fields become explicit `Null`
    fn encode_for_merge(&self) -> Document {
        let mut doc = self.encode();
        for field in Self::CLEARABLE_FIELDS {
            if !doc.contains_key(field) {
                doc.insert(*field, Value::Null);
            }
        }
        doc
    }

    /// Encode only `fields`, as a patch for a partial update
    ///
    /// Cleared optional fields come out as explicit `Null`.
    fn encode_fields(&self, fields: &[&str]) -> Document {
        let mut encoded = self.encode_for_merge();
        fields
            .iter()
            .filter_map(|field| encoded.remove(field).map(|value| (field.to_string(), value)))
            .collect()
    }
}
