//! The store handles and in-memory view shared by every operation.
//!
//! A [`StoreContext`] is built once at process start and passed explicitly
//! to the orchestrator and the response manager.

use std::sync::Arc;

use surveyor_core::{
  Collection, Document,
  bank::QuestionBank,
  response::Response,
  store::DocumentStore,
  survey::{Choice, Question},
};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{Error, Result};

// ─── Collection set ──────────────────────────────────────────────────────────

/// One value per replicated collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSet<S> {
  pub survey:    S,
  pub choices:   S,
  pub responses: S,
  pub backup:    S,
}

impl<S> CollectionSet<S> {
  pub fn from_fn(mut f: impl FnMut(Collection) -> S) -> Self {
    Self {
      survey:    f(Collection::Survey),
      choices:   f(Collection::Choices),
      responses: f(Collection::Responses),
      backup:    f(Collection::Backup),
    }
  }

  pub fn try_from_fn<E>(mut f: impl FnMut(Collection) -> Result<S, E>) -> Result<Self, E> {
    Ok(Self {
      survey:    f(Collection::Survey)?,
      choices:   f(Collection::Choices)?,
      responses: f(Collection::Responses)?,
      backup:    f(Collection::Backup)?,
    })
  }

  /// `None` for [`Collection::Finalized`], which is never replicated.
  pub fn get(&self, collection: Collection) -> Option<&S> {
    match collection {
      Collection::Survey => Some(&self.survey),
      Collection::Choices => Some(&self.choices),
      Collection::Responses => Some(&self.responses),
      Collection::Backup => Some(&self.backup),
      Collection::Finalized => None,
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (Collection, &S)> {
    [
      (Collection::Survey, &self.survey),
      (Collection::Choices, &self.choices),
      (Collection::Responses, &self.responses),
      (Collection::Backup, &self.backup),
    ]
    .into_iter()
  }
}

// ─── Survey view ─────────────────────────────────────────────────────────────

/// What the device currently shows: the question bank, the draft responses,
/// and where the interviewer is in the survey.
#[derive(Debug, Clone, Default)]
pub struct SurveyView {
  pub bank:      QuestionBank,
  pub responses: Vec<Response>,
  /// Question the interviewer is positioned on.
  pub cursor:    Option<String>,
}

impl SurveyView {
  /// Replace the draft for the same `(case, question)` or add it.
  pub fn upsert_response(&mut self, response: Response) {
    match self
      .responses
      .iter_mut()
      .find(|r| r.case_id == response.case_id && r.question_id == response.question_id)
    {
      Some(existing) => *existing = response,
      None => self.responses.push(response),
    }
  }

  pub fn remove_case(&mut self, case_id: &str) {
    self.responses.retain(|r| r.case_id != case_id);
  }
}

pub type SharedView = Arc<RwLock<SurveyView>>;

fn decode_all<T: DeserializeOwned>(collection: Collection, docs: &[Document]) -> Vec<T> {
  docs
    .iter()
    .filter_map(|doc| match doc.decode::<T>() {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(%collection, id = %doc.id, error = %e, "skipping undecodable document");
        None
      }
    })
    .collect()
}

/// Rebuild the view from the local collections, cursor on the first
/// question.
pub async fn load_view<S: DocumentStore>(local: &CollectionSet<S>) -> Result<SurveyView> {
  let questions: Vec<Question> = decode_all(
    Collection::Survey,
    &local.survey.all_docs().await.map_err(Error::store)?,
  );
  let choices: Vec<Choice> = decode_all(
    Collection::Choices,
    &local.choices.all_docs().await.map_err(Error::store)?,
  );
  let responses: Vec<Response> = decode_all(
    Collection::Responses,
    &local.responses.all_docs().await.map_err(Error::store)?,
  );

  let bank = QuestionBank::new(questions, choices);
  let cursor = bank.first().map(|q| q.question_id.clone());
  debug!(
    questions = bank.questions().len(),
    choices = bank.choices().len(),
    responses = responses.len(),
    "loaded survey view"
  );
  Ok(SurveyView { bank, responses, cursor })
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// Every store handle the process uses, plus the shared view.
pub struct StoreContext<L, R> {
  pub local:     CollectionSet<L>,
  /// Submitted records. Local only.
  pub finalized: L,
  pub remote:    CollectionSet<R>,
  pub view:      SharedView,
}

impl<L, R> StoreContext<L, R> {
  pub fn new(local: CollectionSet<L>, finalized: L, remote: CollectionSet<R>) -> Self {
    Self { local, finalized, remote, view: SharedView::default() }
  }
}
