//! Responses, finalized records, and the patches applied to them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Answer values ───────────────────────────────────────────────────────────

/// Reference to a binary payload stored as a document attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
  pub name:         String,
  pub content_type: String,
}

/// The typed payload of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
  Text(String),
  MultiChoice(Vec<String>),
  Date(NaiveDate),
  Attachment(AttachmentRef),
}

impl AnswerValue {
  /// An empty string or an empty selection. Dates and attachments are never
  /// empty.
  pub fn is_empty(&self) -> bool {
    match self {
      Self::Text(s) => s.is_empty(),
      Self::MultiChoice(items) => items.is_empty(),
      Self::Date(_) | Self::Attachment(_) => false,
    }
  }

  /// The text used when a dependency expression compares this answer.
  ///
  /// Multi-choice selections compare as their comma-joined text, the way a
  /// loosely typed comparison would render a list. Attachments have no
  /// comparable text.
  pub fn comparable_text(&self) -> Option<String> {
    match self {
      Self::Text(s) => Some(s.clone()),
      Self::MultiChoice(items) => Some(items.join(",")),
      Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
      Self::Attachment(_) => None,
    }
  }

  /// Whether `option` is the answer or one of the selected options.
  pub fn selects(&self, option: &str) -> bool {
    match self {
      Self::Text(s) => s == option,
      Self::MultiChoice(items) => items.iter().any(|i| i == option),
      Self::Date(_) | Self::Attachment(_) => false,
    }
  }
}

// ─── Response ────────────────────────────────────────────────────────────────

/// One answer to one question within a case.
///
/// The revision token lives on the enclosing
/// [`Document`](crate::document::Document), not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
  #[serde(rename = "CaseID")]
  pub case_id:        String,
  #[serde(rename = "ParentCaseID", default, skip_serializing_if = "Option::is_none")]
  pub parent_case_id: Option<String>,
  #[serde(rename = "QuestionID")]
  pub question_id:    String,
  pub index:          u32,
  #[serde(rename = "ResponseID")]
  pub response_id:    Uuid,
  pub answer:         AnswerValue,
  pub answered_at:    DateTime<Utc>,
  #[serde(default)]
  pub organization:   String,
  #[serde(default)]
  pub program:        String,
}

impl Response {
  /// Document id of the draft for `(case_id, question_id)`. One draft per
  /// pair: answering again overwrites it.
  ///
  /// The parts are joined with `_`. A `_` or `%` inside either part is
  /// percent-encoded, so distinct pairs never share an id.
  pub fn doc_id(case_id: &str, question_id: &str) -> String {
    format!("{}_{}", escape_id_part(case_id), escape_id_part(question_id))
  }

  pub fn id(&self) -> String { Self::doc_id(&self.case_id, &self.question_id) }
}

fn escape_id_part(part: &str) -> String {
  let mut out = String::with_capacity(part.len());
  for c in part.chars() {
    match c {
      '%' => out.push_str("%25"),
      '_' => out.push_str("%5F"),
      c => out.push(c),
    }
  }
  out
}

/// Identifies the case a response belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseRef {
  pub case_id:        String,
  pub parent_case_id: Option<String>,
}

impl CaseRef {
  pub fn new(case_id: impl Into<String>) -> Self {
    Self { case_id: case_id.into(), parent_case_id: None }
  }

  pub fn with_parent(mut self, parent_case_id: impl Into<String>) -> Self {
    self.parent_case_id = Some(parent_case_id.into());
    self
  }
}

impl From<&str> for CaseRef {
  fn from(case_id: &str) -> Self { Self::new(case_id) }
}

// ─── Finalized record ────────────────────────────────────────────────────────

/// Free-text note appended to a finalized case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaseNote {
  pub text:     String,
  pub added_at: DateTime<Utc>,
}

/// A completed survey submission. Keyed by its case id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FinalizedRecord {
  #[serde(rename = "CaseID")]
  pub case_id:      String,
  /// Constituent responses in question order.
  pub responses:    Vec<Response>,
  pub completed_at: DateTime<Utc>,
  /// Append-only.
  #[serde(default)]
  pub notes:        Vec<CaseNote>,
  /// GeoJSON-like location payload.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub location:     Option<serde_json::Value>,
  #[serde(default)]
  pub organization: String,
  #[serde(default)]
  pub program:      String,
}

/// Amendment to an already finalized record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPatch {
  /// Append a timestamped note.
  AppendNote(String),
  /// Replace the answer to one question.
  CorrectAnswer { question_id: String, value: AnswerValue },
  SetLocation(serde_json::Value),
}

impl FinalizedRecord {
  /// Apply `patch` in place. Returns `false` when a correction names a
  /// question the record has no response for.
  pub fn apply(&mut self, patch: &RecordPatch, now: DateTime<Utc>) -> bool {
    match patch {
      RecordPatch::AppendNote(text) => {
        self.notes.push(CaseNote { text: text.clone(), added_at: now });
        true
      }
      RecordPatch::CorrectAnswer { question_id, value } => {
        match self.responses.iter_mut().find(|r| &r.question_id == question_id) {
          Some(response) => {
            response.answer = value.clone();
            response.answered_at = now;
            true
          }
          None => false,
        }
      }
      RecordPatch::SetLocation(location) => {
        self.location = Some(location.clone());
        true
      }
    }
  }
}
