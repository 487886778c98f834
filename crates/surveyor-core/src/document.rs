//! The document envelope shared by the local and remote stores.
//!
//! On the wire a document is a flat JSON object: reserved members start with
//! an underscore (`_id`, `_rev`, `_deleted`, `_attachments`) and everything
//! else is application data.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{
  Error, Result,
  revision::{Revision, content_digest},
};

/// Prefix of design documents, which carry server-side functions rather than
/// application data.
pub const DESIGN_PREFIX: &str = "_design/";

/// Prefix of fields that only make sense in the local store and are stripped
/// before a document leaves the device.
pub const LOCAL_FIELD_PREFIX: &str = "_local";

/// A binary payload attached to a document under a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
  pub content_type: String,
  /// Base64-encoded payload. Empty for stubs.
  #[serde(default)]
  pub data:         String,
  /// Metadata-only reference returned by queries that do not inline
  /// attachment bodies. Writing a stub back keeps the stored payload.
  #[serde(default, skip_serializing_if = "is_false")]
  pub stub:         bool,
}

impl Attachment {
  pub fn from_bytes(content_type: impl Into<String>, bytes: &[u8]) -> Self {
    Self {
      content_type: content_type.into(),
      data:         B64.encode(bytes),
      stub:         false,
    }
  }

  /// Decode the payload.
  pub fn bytes(&self) -> Result<Vec<u8>> {
    if self.stub {
      return Err(Error::AttachmentStub);
    }
    B64
      .decode(&self.data)
      .map_err(|_| Error::AttachmentEncoding(self.content_type.clone()))
  }
}

fn is_false(b: &bool) -> bool { !*b }

/// A JSON document with an id, a store-assigned revision, and optional
/// attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  #[serde(rename = "_id")]
  pub id:          String,
  #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
  pub rev:         Option<Revision>,
  #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
  pub deleted:     bool,
  #[serde(
    rename = "_attachments",
    default,
    skip_serializing_if = "BTreeMap::is_empty"
  )]
  pub attachments: BTreeMap<String, Attachment>,
  #[serde(flatten)]
  pub fields:      Map<String, Value>,
}

impl Document {
  /// An empty, never-written document.
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id:          id.into(),
      rev:         None,
      deleted:     false,
      attachments: BTreeMap::new(),
      fields:      Map::new(),
    }
  }

  /// A deletion marker for `id` at revision `rev`.
  pub fn tombstone(id: impl Into<String>, rev: Option<Revision>) -> Self {
    Self { rev, deleted: true, ..Self::new(id) }
  }

  /// Serialise `value` into the document's fields. `value` must serialise to
  /// a JSON object.
  pub fn from_typed<T: Serialize>(id: impl Into<String>, value: &T) -> Result<Self> {
    match serde_json::to_value(value)? {
      Value::Object(fields) => Ok(Self { fields, ..Self::new(id) }),
      _ => Err(Error::NotAnObject(std::any::type_name::<T>())),
    }
  }

  /// Deserialise the document's fields into `T`.
  pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_value(Value::Object(self.fields.clone())).map_err(|source| {
      Error::Decode {
        id: self.id.clone(),
        expected: std::any::type_name::<T>(),
        source,
      }
    })
  }

  pub fn field(&self, name: &str) -> Option<&Value> { self.fields.get(name) }

  /// The string value of a top-level field, if it is a string.
  pub fn str_field(&self, name: &str) -> Option<&str> {
    self.fields.get(name).and_then(Value::as_str)
  }

  pub fn is_design(&self) -> bool { self.id.starts_with(DESIGN_PREFIX) }

  /// Digest over everything a revision covers: deletion flag, fields, and
  /// attachments. Field maps are ordered, so the digest is deterministic.
  pub fn content_digest(&self) -> String {
    let mut canonical = String::new();
    canonical.push_str(if self.deleted { "1|" } else { "0|" });
    canonical.push_str(&Value::Object(self.fields.clone()).to_string());
    for (name, attachment) in &self.attachments {
      canonical.push('|');
      canonical.push_str(name);
      canonical.push(':');
      canonical.push_str(&attachment.content_type);
      canonical.push(':');
      canonical.push_str(&attachment.data);
    }
    content_digest(canonical.as_bytes())
  }

  /// A copy fit to leave the device: no revision and no `_local*` fields.
  pub fn without_local_identity(&self) -> Self {
    let fields = self
      .fields
      .iter()
      .filter(|(k, _)| !k.starts_with(LOCAL_FIELD_PREFIX))
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    Self {
      id: self.id.clone(),
      rev: None,
      deleted: self.deleted,
      attachments: self.attachments.clone(),
      fields,
    }
  }
}
