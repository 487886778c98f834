//! Error type for `surveyor-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] surveyor_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// Collection, index, or field names end up in SQL text and are limited to
  /// ASCII letters, digits, and underscores.
  #[error("invalid name: {0:?}")]
  InvalidName(String),

  #[error("invalid change sequence: {0:?}")]
  InvalidSeq(String),

  #[error("filter {0:?} is not installed")]
  UnknownFilter(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
