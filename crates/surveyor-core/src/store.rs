//! The `DocumentStore` trait and supporting request/result types.
//!
//! The trait is implemented by the local SQLite backend
//! (`surveyor-store-sqlite`) and the remote HTTP backend
//! (`surveyor-remote`). The sync engine depends on this abstraction, not on
//! any concrete backend, so replication works in either direction.

use std::{collections::BTreeMap, future::Future};

use serde_json::Value;

use crate::{
  document::Document,
  filter::{FilterDesign, FilterSpec},
  revision::Revision,
};

// ─── Write results ───────────────────────────────────────────────────────────

/// Outcome of writing a single document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
  /// Accepted; the document now has this revision.
  Written(Revision),
  /// The presented revision is not the latest one.
  Conflict,
  /// Rejected for another reason. `status` is the transport status code when
  /// the store sits behind HTTP.
  Failed { status: Option<u16>, reason: String },
}

/// Per-document result of [`DocumentStore::put`] and
/// [`DocumentStore::bulk_write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
  pub id:     String,
  pub status: WriteStatus,
}

impl WriteResult {
  pub fn written(id: impl Into<String>, rev: Revision) -> Self {
    Self { id: id.into(), status: WriteStatus::Written(rev) }
  }

  pub fn conflict(id: impl Into<String>) -> Self {
    Self { id: id.into(), status: WriteStatus::Conflict }
  }

  pub fn revision(&self) -> Option<&Revision> {
    match &self.status {
      WriteStatus::Written(rev) => Some(rev),
      _ => None,
    }
  }

  pub fn is_conflict(&self) -> bool { matches!(self.status, WriteStatus::Conflict) }
}

// ─── Queries and indexes ─────────────────────────────────────────────────────

/// Conjunction of `field == value` predicates over top-level fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldQuery {
  pub equals: BTreeMap<String, Value>,
}

impl FieldQuery {
  pub fn new() -> Self { Self::default() }

  pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.equals.insert(field.into(), value.into());
    self
  }

  pub fn matches(&self, doc: &Document) -> bool {
    self.equals.iter().all(|(k, v)| doc.field(k) == Some(v))
  }
}

/// A secondary index over one or more top-level fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
  pub name:   String,
  pub fields: Vec<String>,
}

impl IndexDef {
  pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
    Self {
      name:   name.into(),
      fields: fields.iter().map(|f| (*f).to_owned()).collect(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
  Created,
  Exists,
}

// ─── Change feed ─────────────────────────────────────────────────────────────

/// Sequence value meaning "from the beginning".
pub const SEQ_START: &str = "0";

/// Parameters for [`DocumentStore::changes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesRequest {
  /// Opaque sequence returned as `last_seq` by a previous batch.
  pub since:  String,
  pub limit:  usize,
  pub filter: Option<FilterSpec>,
}

/// One page of the change feed. Tombstones are included.
#[derive(Debug, Clone, Default)]
pub struct ChangesBatch {
  pub docs:     Vec<Document>,
  pub last_seq: String,
  /// How many feed rows the store examined for this page. A value below the
  /// requested limit means the feed is exhausted.
  pub scanned:  usize,
}

/// Summary returned by [`DocumentStore::info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
  pub doc_count:  u64,
  pub update_seq: String,
}

impl StoreInfo {
  /// Approximate number of changes the store has seen: the numeric prefix of
  /// the update sequence. Remote sequences are opaque, so this is an
  /// estimate.
  pub fn change_count(&self) -> u64 {
    let digits: String = self
      .update_seq
      .chars()
      .take_while(char::is_ascii_digit)
      .collect();
    digits.parse().unwrap_or(0)
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over one collection in a document store backend.
///
/// Conflict detection is the store's job: a write that does not carry the
/// latest revision of a live document must be answered with
/// [`WriteStatus::Conflict`].
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait DocumentStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch a live document by id. Deleted documents are reported as `None`.
  fn get<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Document>, Self::Error>> + Send + 'a;

  /// Write one document under the revision rules above.
  fn put(
    &self,
    doc: Document,
  ) -> impl Future<Output = Result<WriteResult, Self::Error>> + Send + '_;

  /// Write many documents; one result per input, in input order.
  fn bulk_write(
    &self,
    docs: Vec<Document>,
  ) -> impl Future<Output = Result<Vec<WriteResult>, Self::Error>> + Send + '_;

  /// All live documents matching every predicate in `query`.
  fn find<'a>(
    &'a self,
    query: &'a FieldQuery,
  ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send + 'a;

  /// Create a secondary index unless one with the same name exists.
  fn ensure_index(
    &self,
    index: IndexDef,
  ) -> impl Future<Output = Result<IndexOutcome, Self::Error>> + Send + '_;

  /// All live, non-design documents ordered by id.
  fn all_docs(&self) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send + '_;

  /// Read one page of the change feed.
  fn changes<'a>(
    &'a self,
    request: &'a ChangesRequest,
  ) -> impl Future<Output = Result<ChangesBatch, Self::Error>> + Send + 'a;

  /// Store replicated documents as-is, keeping the winning revision per id.
  /// Returns how many documents changed.
  fn apply_replicated(
    &self,
    docs: Vec<Document>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Provision a filter function. Returns `false` when it already existed.
  fn install_filter<'a>(
    &'a self,
    filter: &'a FilterDesign,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn info(&self) -> impl Future<Output = Result<StoreInfo, Self::Error>> + Send + '_;
}
