//! Error types for `surveyor-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("document {id} is not a {expected}: {source}")]
  Decode {
    id:       String,
    expected: &'static str,
    #[source]
    source:   serde_json::Error,
  },

  #[error("value of type {0} does not serialise to a JSON object")]
  NotAnObject(&'static str),

  #[error("invalid revision token: {0:?}")]
  InvalidRevision(String),

  #[error("invalid dependency expression {expr:?}: {reason}")]
  InvalidExpression { expr: String, reason: String },

  #[error("attachment {0:?} is not valid base64")]
  AttachmentEncoding(String),

  #[error("attachment body was not fetched")]
  AttachmentStub,

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
