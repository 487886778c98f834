//! Error type for `surveyor-sync`.

use std::fmt;

use surveyor_core::Collection;
use thiserror::Error;

/// A collection whose replication failed permanently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFailure {
  pub collection: Collection,
  pub attempts:   u32,
  pub message:    String,
}

impl fmt::Display for CollectionFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} ({} attempt{}): {}",
      self.collection,
      self.attempts,
      if self.attempts == 1 { "" } else { "s" },
      self.message
    )
  }
}

fn join_failures(failures: &[CollectionFailure]) -> String {
  failures
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("; ")
}

#[derive(Debug, Error)]
pub enum Error {
  /// A required question was answered with an empty value. Nothing was
  /// written.
  #[error("question {question_id} requires an answer")]
  Validation { question_id: String },

  #[error("unknown question {0}")]
  UnknownQuestion(String),

  /// A write was rejected, or kept conflicting after every allowed retry.
  #[error("could not persist {id} after {attempts} attempt(s): {reason}")]
  Persistence {
    id:       String,
    attempts: u32,
    reason:   String,
  },

  /// The draft document at `id` holds another case's answer.
  #[error("draft {id} belongs to case {case_id:?}, question {question_id:?}")]
  DraftMismatch {
    id:          String,
    case_id:     Option<String>,
    question_id: Option<String>,
  },

  #[error("document not found: {0}")]
  NotFound(String),

  #[error("sync failed: {}", join_failures(.failures))]
  SyncFailed { failures: Vec<CollectionFailure> },

  #[error("configuration error: {0}")]
  Configuration(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("core error: {0}")]
  Core(#[from] surveyor_core::Error),
}

impl Error {
  pub(crate) fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
