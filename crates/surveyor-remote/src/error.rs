//! Error type for `surveyor-remote`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] surveyor_core::Error),

  /// The request never produced a usable response: connection refused,
  /// timeout, TLS failure, or an undecodable body.
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("{method} {path} returned {status}: {body}")]
  Status {
    method: &'static str,
    path:   String,
    status: u16,
    body:   String,
  },

  #[error("invalid server url {0:?}")]
  InvalidUrl(String),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

impl Error {
  /// HTTP status code, when the server answered.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Status { status, .. } => Some(*status),
      Self::Transport(e) => e.status().map(|s| s.as_u16()),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
