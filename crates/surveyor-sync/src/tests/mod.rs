//! Shared fixtures for the sync engine tests: a fault-injecting store, a
//! sleeper that records instead of waiting, and a notifier that remembers.

mod lifecycle;

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
  },
  time::Duration,
};

use serde_json::json;
use surveyor_core::{
  Collection, Document,
  filter::{FilterDesign, FilterSpec},
  store::{
    ChangesBatch, ChangesRequest, DocumentStore, FieldQuery, IndexDef, IndexOutcome,
    StoreInfo, WriteResult, WriteStatus,
  },
  survey::{Question, ResponseType},
};
use surveyor_store_sqlite::{SqliteCollection, SqliteStore};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
  context::{CollectionSet, SharedView, StoreContext, SurveyView},
  notify::{Notification, Notifier},
  retry::Sleeper,
};

// ─── Faulty store ────────────────────────────────────────────────────────────

/// Counter value meaning "fail forever".
pub const ALWAYS: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum FakeError {
  #[error("injected failure: {0}")]
  Injected(&'static str),

  #[error(transparent)]
  Store(#[from] surveyor_store_sqlite::Error),
}

/// Knobs shared between a [`FaultyStore`] and the test that drives it.
#[derive(Debug, Default)]
pub struct Faults {
  /// Change feed reads that fail before the feed starts answering.
  pub failing_reads:    AtomicU32,
  /// Puts answered with a conflict without touching the store.
  pub conflicting_puts: AtomicU32,
  /// Fixed answers for puts of specific ids.
  pub put_status:       Mutex<HashMap<String, WriteStatus>>,
  /// Filters seen by the change feed, in call order.
  pub filters:          Mutex<Vec<Option<FilterSpec>>>,
  pub puts:             AtomicU32,
}

impl Faults {
  pub fn fail_reads(&self, n: u32) { self.failing_reads.store(n, Ordering::SeqCst) }

  pub fn conflict_puts(&self, n: u32) { self.conflicting_puts.store(n, Ordering::SeqCst) }

  pub fn force_put(&self, id: &str, status: WriteStatus) {
    self.put_status.lock().unwrap().insert(id.to_owned(), status);
  }

  pub fn seen_filters(&self) -> Vec<Option<FilterSpec>> { self.filters.lock().unwrap().clone() }
}

fn take(counter: &AtomicU32) -> bool {
  counter
    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
      0 => None,
      ALWAYS => Some(ALWAYS),
      n => Some(n - 1),
    })
    .is_ok()
}

/// A [`SqliteCollection`] that misbehaves on request.
#[derive(Debug, Clone)]
pub struct FaultyStore {
  pub inner:  SqliteCollection,
  pub faults: Arc<Faults>,
}

impl FaultyStore {
  pub fn new(inner: SqliteCollection) -> Self { Self { inner, faults: Arc::default() } }
}

impl DocumentStore for FaultyStore {
  type Error = FakeError;

  async fn get(&self, id: &str) -> Result<Option<Document>, FakeError> {
    Ok(self.inner.get(id).await?)
  }

  async fn put(&self, doc: Document) -> Result<WriteResult, FakeError> {
    self.faults.puts.fetch_add(1, Ordering::SeqCst);
    let forced = self.faults.put_status.lock().unwrap().get(&doc.id).cloned();
    if let Some(status) = forced {
      return Ok(WriteResult { id: doc.id, status });
    }
    if take(&self.faults.conflicting_puts) {
      return Ok(WriteResult::conflict(doc.id));
    }
    Ok(self.inner.put(doc).await?)
  }

  async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<WriteResult>, FakeError> {
    Ok(self.inner.bulk_write(docs).await?)
  }

  async fn find(&self, query: &FieldQuery) -> Result<Vec<Document>, FakeError> {
    Ok(self.inner.find(query).await?)
  }

  async fn ensure_index(&self, index: IndexDef) -> Result<IndexOutcome, FakeError> {
    Ok(self.inner.ensure_index(index).await?)
  }

  async fn all_docs(&self) -> Result<Vec<Document>, FakeError> { Ok(self.inner.all_docs().await?) }

  async fn changes(&self, request: &ChangesRequest) -> Result<ChangesBatch, FakeError> {
    self.faults.filters.lock().unwrap().push(request.filter.clone());
    if take(&self.faults.failing_reads) {
      return Err(FakeError::Injected("change feed unavailable"));
    }
    Ok(self.inner.changes(request).await?)
  }

  async fn apply_replicated(&self, docs: Vec<Document>) -> Result<usize, FakeError> {
    Ok(self.inner.apply_replicated(docs).await?)
  }

  async fn install_filter(&self, filter: &FilterDesign) -> Result<bool, FakeError> {
    Ok(self.inner.install_filter(filter).await?)
  }

  async fn info(&self) -> Result<StoreInfo, FakeError> { Ok(self.inner.info().await?) }
}

// ─── Sleeper and notifier ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingSleeper {
  delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
  pub fn delays_ms(&self) -> Vec<u128> {
    self.delays.lock().unwrap().iter().map(Duration::as_millis).collect()
  }
}

impl Sleeper for RecordingSleeper {
  async fn sleep(&self, duration: Duration) { self.delays.lock().unwrap().push(duration); }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
  seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn seen(&self) -> Vec<Notification> { self.seen.lock().unwrap().clone() }
}

impl Notifier for RecordingNotifier {
  fn notify(&self, notification: Notification) { self.seen.lock().unwrap().push(notification); }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

pub async fn sqlite() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

pub fn question(id: &str, index: u32, depends: Option<&str>) -> Question {
  Question {
    question_id:   id.into(),
    text:          format!("question {id}"),
    response_type: ResponseType::FreeText,
    required:      false,
    index,
    depends:       depends.map(Into::into),
    cascade_from:  None,
    organization:  "Mercy".into(),
    program:       "PT".into(),
  }
}

pub fn question_doc(q: &Question) -> Document {
  Document::from_typed(format!("question_{}", q.question_id), q).unwrap()
}

pub fn tagged(id: &str, org: &str, program: &str) -> Document {
  let mut doc = Document::new(id);
  doc.fields.insert("Organization".into(), json!(org));
  doc.fields.insert("Program".into(), json!(program));
  doc
}

pub fn view_of(questions: Vec<Question>) -> SharedView {
  let view = SurveyView {
    bank: surveyor_core::bank::QuestionBank::new(questions, vec![]),
    ..SurveyView::default()
  };
  Arc::new(RwLock::new(view))
}

/// A device database plus a fake server, wired into a [`StoreContext`].
pub struct Harness {
  pub device: SqliteStore,
  pub server: SqliteStore,
  pub ctx:    Arc<StoreContext<SqliteCollection, FaultyStore>>,
}

impl Harness {
  pub async fn new() -> Self {
    let device = sqlite().await;
    let server = sqlite().await;
    let local = CollectionSet::from_fn(|c| device.collection(c));
    let remote = CollectionSet::from_fn(|c| FaultyStore::new(server.collection(c)));
    let ctx = StoreContext::new(local, device.collection(Collection::Finalized), remote);
    Self { device, server, ctx: Arc::new(ctx) }
  }

  pub fn faults(&self, collection: Collection) -> &Faults {
    &self.ctx.remote.get(collection).expect("replicated").faults
  }

  /// Write straight into the server, bypassing fault injection.
  pub async fn seed(&self, collection: Collection, docs: Vec<Document>) {
    let results = self.server.collection(collection).bulk_write(docs).await.unwrap();
    assert!(results.iter().all(|r| r.revision().is_some()));
  }
}
