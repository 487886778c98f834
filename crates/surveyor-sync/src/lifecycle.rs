//! Draft responses, finalized records, and the path from one to the other.
//!
//! Every write goes through a read-modify-write loop: the latest revision is
//! read immediately before each attempt and a conflict triggers a fresh read.

use std::collections::BTreeMap;

use chrono::Utc;
use surveyor_core::{
  Attachment, Document, Revision,
  depends::{CaseAnswers, Comparison},
  response::{AnswerValue, AttachmentRef, CaseRef, FinalizedRecord, RecordPatch, Response},
  store::{DocumentStore, FieldQuery, WriteStatus},
  survey::{Choice, Question},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  context::{SharedView, StoreContext},
};

/// Fields copied onto a draft's tombstone so that filtered replication still
/// routes the deletion.
const TOMBSTONE_FIELDS: [&str; 3] = ["CaseID", "Organization", "Program"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOptions {
  /// Conflict retries after the first attempt.
  pub max_retries: u32,
  pub comparison:  Comparison,
}

impl Default for LifecycleOptions {
  fn default() -> Self { Self { max_retries: 3, comparison: Comparison::default() } }
}

/// What [`ResponseManager::finalize`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
  pub case_id:        String,
  /// Responses bundled into the record.
  pub responses:      usize,
  pub drafts_removed: usize,
  pub drafts_total:   usize,
  /// Drafts that could not be read as responses. They are left in place.
  pub unreadable:     Vec<String>,
  /// Revision of the written record. `None` when there was nothing to
  /// finalize.
  pub revision:       Option<Revision>,
}

impl FinalizeReport {
  pub fn is_noop(&self) -> bool { self.revision.is_none() }
}

/// Answers questions, finalizes cases, and amends finalized records.
pub struct ResponseManager<S> {
  working:   S,
  finalized: S,
  view:      SharedView,
  options:   LifecycleOptions,
}

impl<S: DocumentStore> ResponseManager<S> {
  pub fn new(working: S, finalized: S, view: SharedView, options: LifecycleOptions) -> Self {
    Self { working, finalized, view, options }
  }

  /// Drafts live in the local responses collection, records in the local
  /// finalized store.
  pub fn from_context<R>(ctx: &StoreContext<S, R>, options: LifecycleOptions) -> Self
  where
    S: Clone,
  {
    Self::new(
      ctx.local.responses.clone(),
      ctx.finalized.clone(),
      ctx.view.clone(),
      options,
    )
  }

  // ─── Answering ─────────────────────────────────────────────────────────────

  /// Record `value` as the answer to `question_id` for `case`.
  ///
  /// Answering again overwrites the draft but keeps its `ResponseID`.
  pub async fn answer(
    &self,
    case: &CaseRef,
    question_id: &str,
    value: AnswerValue,
  ) -> Result<Response> {
    self.store_answer(case, question_id, value, BTreeMap::new()).await
  }

  /// Answer a file question. The payload is stored as an attachment on the
  /// draft under `name`.
  pub async fn answer_file(
    &self,
    case: &CaseRef,
    question_id: &str,
    name: &str,
    content_type: &str,
    bytes: &[u8],
  ) -> Result<Response> {
    let value = AnswerValue::Attachment(AttachmentRef {
      name:         name.to_owned(),
      content_type: content_type.to_owned(),
    });
    let attachments = BTreeMap::from([(
      name.to_owned(),
      Attachment::from_bytes(content_type, bytes),
    )]);
    self.store_answer(case, question_id, value, attachments).await
  }

  async fn store_answer(
    &self,
    case: &CaseRef,
    question_id: &str,
    value: AnswerValue,
    attachments: BTreeMap<String, Attachment>,
  ) -> Result<Response> {
    let question = self.question(question_id).await?;
    if question.required && value.is_empty() {
      return Err(Error::Validation { question_id: question_id.to_owned() });
    }

    let id = Response::doc_id(&case.case_id, question_id);
    let previous = self.working.get(&id).await.map_err(Error::store)?;
    let response_id = previous
      .and_then(|doc| doc.decode::<Response>().ok())
      .map_or_else(Uuid::new_v4, |r| r.response_id);

    let response = Response {
      case_id: case.case_id.clone(),
      parent_case_id: case.parent_case_id.clone(),
      question_id: question_id.to_owned(),
      index: question.index,
      response_id,
      answer: value,
      answered_at: Utc::now(),
      organization: question.organization,
      program: question.program,
    };
    self.write_response(&response, &attachments).await?;
    self.view.write().await.upsert_response(response.clone());
    Ok(response)
  }

  /// Write `response` as its draft document, replacing whatever is stored.
  pub async fn save_or_update(&self, response: &Response) -> Result<Revision> {
    self.write_response(response, &BTreeMap::new()).await
  }

  async fn write_response(
    &self,
    response: &Response,
    attachments: &BTreeMap<String, Attachment>,
  ) -> Result<Revision> {
    let id = response.id();
    let rev = read_modify_write(&self.working, &id, self.options.max_retries, |current| {
      if let Some(current) = current {
        let case_id = current.str_field("CaseID");
        let question_id = current.str_field("QuestionID");
        if case_id != Some(response.case_id.as_str())
          || question_id != Some(response.question_id.as_str())
        {
          return Err(Error::DraftMismatch {
            id:          id.clone(),
            case_id:     case_id.map(str::to_owned),
            question_id: question_id.map(str::to_owned),
          });
        }
      }
      let mut doc = Document::from_typed(&id, response)?;
      doc.attachments = attachments.clone();
      Ok(doc)
    })
    .await?;
    debug!(%id, %rev, "saved response");
    Ok(rev)
  }

  // ─── Finalizing ────────────────────────────────────────────────────────────

  /// Bundle the case's drafts into one finalized record and delete the
  /// drafts.
  ///
  /// Finalizing a case again overwrites the record but keeps its notes. Only
  /// drafts that made it into the record are deleted. A case without
  /// readable drafts is left alone.
  pub async fn finalize(&self, case_id: &str) -> Result<FinalizeReport> {
    let drafts = self
      .working
      .find(&FieldQuery::new().eq("CaseID", case_id))
      .await
      .map_err(Error::store)?;

    let mut responses: Vec<(Response, &Document)> = Vec::with_capacity(drafts.len());
    let mut unreadable = Vec::new();
    for doc in &drafts {
      match doc.decode::<Response>() {
        Ok(response) => responses.push((response, doc)),
        Err(e) => {
          warn!(id = %doc.id, error = %e, "draft is not a response, keeping it");
          unreadable.push(doc.id.clone());
        }
      }
    }
    if responses.is_empty() {
      debug!(case_id, drafts = drafts.len(), "nothing to finalize");
      return Ok(FinalizeReport {
        case_id: case_id.to_owned(),
        responses: 0,
        drafts_removed: 0,
        drafts_total: drafts.len(),
        unreadable,
        revision: None,
      });
    }
    responses.sort_by(|(a, _), (b, _)| {
      a.index
        .cmp(&b.index)
        .then_with(|| a.question_id.cmp(&b.question_id))
    });

    let mut attachments = BTreeMap::new();
    for (response, doc) in &responses {
      for (name, attachment) in &doc.attachments {
        attachments.insert(format!("{}/{name}", response.question_id), attachment.clone());
      }
    }

    let first = responses.first().map(|(r, _)| r);
    let record = FinalizedRecord {
      case_id:      case_id.to_owned(),
      organization: first.map(|r| r.organization.clone()).unwrap_or_default(),
      program:      first.map(|r| r.program.clone()).unwrap_or_default(),
      responses:    responses.iter().map(|(r, _)| r.clone()).collect(),
      completed_at: Utc::now(),
      notes:        Vec::new(),
      location:     None,
    };

    let revision = read_modify_write(
      &self.finalized,
      case_id,
      self.options.max_retries,
      |current| {
        let mut record = record.clone();
        if let Some(previous) = current.and_then(|d| d.decode::<FinalizedRecord>().ok()) {
          record.notes = previous.notes;
          record.location = previous.location;
        }
        let mut doc = Document::from_typed(case_id, &record)?;
        doc.attachments = attachments.clone();
        Ok(doc)
      },
    )
    .await?;

    let tombstones = responses
      .iter()
      .map(|(_, draft)| {
        let mut tombstone = Document::tombstone(&draft.id, draft.rev.clone());
        for field in TOMBSTONE_FIELDS {
          if let Some(value) = draft.field(field) {
            tombstone.fields.insert(field.to_owned(), value.clone());
          }
        }
        tombstone
      })
      .collect();
    let results = self
      .working
      .bulk_write(tombstones)
      .await
      .map_err(Error::store)?;
    let drafts_removed = results.iter().filter(|r| r.revision().is_some()).count();
    for failed in results.iter().filter(|r| r.revision().is_none()) {
      warn!(id = %failed.id, status = ?failed.status, "draft not removed");
    }

    self.view.write().await.remove_case(case_id);
    info!(case_id, %revision, drafts_removed, drafts_total = drafts.len(), "case finalized");
    Ok(FinalizeReport {
      case_id: case_id.to_owned(),
      responses: record.responses.len(),
      drafts_removed,
      drafts_total: drafts.len(),
      unreadable,
      revision: Some(revision),
    })
  }

  /// Amend the finalized record `record_id`.
  pub async fn update(&self, record_id: &str, patch: RecordPatch) -> Result<Revision> {
    let now = Utc::now();
    read_modify_write(&self.finalized, record_id, self.options.max_retries, |current| {
      let current = current.ok_or_else(|| Error::NotFound(record_id.to_owned()))?;
      let mut record: FinalizedRecord = current.decode()?;
      if !record.apply(&patch, now) {
        let question_id = match &patch {
          RecordPatch::CorrectAnswer { question_id, .. } => question_id.clone(),
          _ => record_id.to_owned(),
        };
        return Err(Error::UnknownQuestion(question_id));
      }
      let mut doc = Document::from_typed(record_id, &record)?;
      doc.attachments = current.attachments;
      Ok(doc)
    })
    .await
  }

  pub async fn record(&self, record_id: &str) -> Result<Option<FinalizedRecord>> {
    match self.finalized.get(record_id).await.map_err(Error::store)? {
      Some(doc) => Ok(Some(doc.decode()?)),
      None => Ok(None),
    }
  }

  // ─── Navigation ────────────────────────────────────────────────────────────

  /// Answers currently stored for the case.
  pub async fn case_answers(&self, case_id: &str) -> Result<CaseAnswers> {
    let docs = self
      .working
      .find(&FieldQuery::new().eq("CaseID", case_id))
      .await
      .map_err(Error::store)?;
    let responses: Vec<Response> = docs
      .iter()
      .filter_map(|doc| doc.decode::<Response>().ok())
      .collect();
    Ok(CaseAnswers::from_responses(&responses))
  }

  /// The first question after `after` whose dependency holds for the case.
  pub async fn next_question(&self, case_id: &str, after: Option<&str>) -> Result<Option<Question>> {
    let answers = self.case_answers(case_id).await?;
    let view = self.view.read().await;
    Ok(
      view
        .bank
        .next_question(after, &answers, self.options.comparison)
        .cloned(),
    )
  }

  /// The question under the cursor.
  pub async fn current_question(&self) -> Option<Question> {
    let view = self.view.read().await;
    view
      .cursor
      .as_deref()
      .and_then(|id| view.bank.question(id))
      .cloned()
  }

  /// Move the cursor to the next eligible question and return it. At the end
  /// of the survey the cursor stays put and `None` is returned.
  pub async fn advance(&self, case_id: &str) -> Result<Option<Question>> {
    let cursor = self.view.read().await.cursor.clone();
    let next = self.next_question(case_id, cursor.as_deref()).await?;
    if let Some(question) = &next {
      self.view.write().await.cursor = Some(question.question_id.clone());
    }
    Ok(next)
  }

  pub async fn eligible_choices(&self, case_id: &str, question_id: &str) -> Result<Vec<Choice>> {
    let answers = self.case_answers(case_id).await?;
    let view = self.view.read().await;
    if view.bank.question(question_id).is_none() {
      return Err(Error::UnknownQuestion(question_id.to_owned()));
    }
    Ok(
      view
        .bank
        .eligible_choices(question_id, &answers, self.options.comparison)
        .into_iter()
        .cloned()
        .collect(),
    )
  }

  async fn question(&self, question_id: &str) -> Result<Question> {
    self
      .view
      .read()
      .await
      .bank
      .question(question_id)
      .cloned()
      .ok_or_else(|| Error::UnknownQuestion(question_id.to_owned()))
  }
}

/// Write the document `build` produces from the current one, retrying on
/// conflict up to `max_retries` times.
///
/// `build` receives the live document (if any) and returns the new content;
/// its revision is overwritten with the one just read.
async fn read_modify_write<S, F>(
  store: &S,
  id: &str,
  max_retries: u32,
  mut build: F,
) -> Result<Revision>
where
  S: DocumentStore,
  F: FnMut(Option<Document>) -> Result<Document>,
{
  let max_attempts = max_retries + 1;
  for attempt in 1..=max_attempts {
    let current = store.get(id).await.map_err(Error::store)?;
    let rev = current.as_ref().and_then(|d| d.rev.clone());
    let mut doc = build(current)?;
    doc.rev = rev;

    let result = store.put(doc).await.map_err(|e| Error::Persistence {
      id:       id.to_owned(),
      attempts: attempt,
      reason:   e.to_string(),
    })?;
    match result.status {
      WriteStatus::Written(rev) => return Ok(rev),
      WriteStatus::Conflict => {
        warn!(id, attempt, "revision conflict, re-reading");
      }
      WriteStatus::Failed { reason, .. } => {
        return Err(Error::Persistence { id: id.to_owned(), attempts: attempt, reason });
      }
    }
  }
  Err(Error::Persistence {
    id:       id.to_owned(),
    attempts: max_attempts,
    reason:   "revision conflict".to_owned(),
  })
}
