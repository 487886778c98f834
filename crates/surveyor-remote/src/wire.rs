//! Request and response bodies of the document server's HTTP API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use surveyor_core::{Document, Revision};

/// `{ "error": ..., "reason": ... }` as returned with non-2xx statuses.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
  #[serde(default)]
  pub error:  String,
  #[serde(default)]
  pub reason: String,
}

impl ErrorBody {
  pub fn describe(&self) -> String {
    match (self.error.is_empty(), self.reason.is_empty()) {
      (false, false) => format!("{}: {}", self.error, self.reason),
      (false, true) => self.error.clone(),
      _ => self.reason.clone(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct PutResponse {
  pub rev: Revision,
}

#[derive(Debug, Serialize)]
pub struct BulkDocsRequest<'a> {
  pub docs:      &'a [Document],
  #[serde(skip_serializing_if = "Option::is_none")]
  pub new_edits: Option<bool>,
}

/// One element of the `_bulk_docs` response array.
#[derive(Debug, Deserialize)]
pub struct BulkItem {
  pub id:     String,
  #[serde(default)]
  pub rev:    Option<Revision>,
  #[serde(default)]
  pub error:  Option<String>,
  #[serde(default)]
  pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FindRequest<'a> {
  pub selector: &'a BTreeMap<String, Value>,
  pub limit:    usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bookmark: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FindResponse {
  pub docs:     Vec<Document>,
  #[serde(default)]
  pub bookmark: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IndexRequest<'a> {
  pub index: IndexFields<'a>,
  pub name:  &'a str,
  #[serde(rename = "type")]
  pub kind:  &'static str,
}

#[derive(Debug, Serialize)]
pub struct IndexFields<'a> {
  pub fields: &'a [String],
}

#[derive(Debug, Deserialize)]
pub struct IndexResponse {
  /// `"created"` or `"exists"`.
  pub result: String,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
  pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
  #[serde(default)]
  pub doc: Option<Document>,
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
  pub results:  Vec<ChangeRow>,
  pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
  pub id:      String,
  #[serde(default)]
  pub deleted: bool,
  #[serde(default)]
  pub changes: Vec<ChangeRev>,
  #[serde(default)]
  pub doc:     Option<Document>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRev {
  pub rev: Revision,
}

impl ChangeRow {
  /// The changed document, or a tombstone when the server omitted the body.
  pub fn into_document(self) -> Option<Document> {
    match self.doc {
      Some(doc) => Some(doc),
      None if self.deleted => {
        let rev = self.changes.into_iter().next().map(|c| c.rev);
        Some(Document::tombstone(self.id, rev))
      }
      None => None,
    }
  }
}

/// `_revs_diff` response: revisions the server does not have, per id.
pub type RevsDiffResponse = BTreeMap<String, RevsMissing>;

#[derive(Debug, Deserialize)]
pub struct RevsMissing {
  #[serde(default)]
  pub missing: Vec<Revision>,
}

#[derive(Debug, Deserialize)]
pub struct DbInfo {
  pub doc_count:  u64,
  pub update_seq: Value,
}

/// Sequences are strings on modern servers and integers on old ones.
pub fn seq_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
