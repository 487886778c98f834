//! Pushes finalized records to the server one at a time.

use std::collections::BTreeMap;

use surveyor_core::store::{DocumentStore, WriteStatus};
use thiserror::Error;
use tracing::{info, warn};

use crate::{Error, Result};

/// Why the server refused one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportFailure {
  #[error("unauthorized (401)")]
  Unauthorized,
  #[error("forbidden (403)")]
  Forbidden,
  #[error("not found (404)")]
  NotFound,
  #[error("conflict (409)")]
  Conflict,
  #[error("precondition failed (412)")]
  PreconditionFailed,
  #[error("server error (500)")]
  ServerError,
  #[error("service unavailable (503)")]
  Unavailable,
  #[error("unexpected status {0}")]
  Other(u16),
  /// No response was received.
  #[error("network error")]
  Network,
}

impl TransportFailure {
  pub fn from_status(status: u16) -> Self {
    match status {
      401 => Self::Unauthorized,
      403 => Self::Forbidden,
      404 => Self::NotFound,
      409 => Self::Conflict,
      412 => Self::PreconditionFailed,
      500 => Self::ServerError,
      503 => Self::Unavailable,
      other => Self::Other(other),
    }
  }
}

/// Tally of an upload run. `log` has one line per record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
  pub success_count: usize,
  pub error_count:   usize,
  pub failures:      BTreeMap<String, TransportFailure>,
  pub log:           Vec<String>,
}

/// Write every record in `local` to `remote`.
///
/// Records leave without their revision and `_local*` fields; attachments go
/// with them. A rejected record is logged and counted, and the run carries on
/// with the next one. Only failing to list `local` is an error.
pub async fn upload_all<L, R>(local: &L, remote: &R) -> Result<UploadReport>
where
  L: DocumentStore,
  R: DocumentStore,
{
  let records = local.all_docs().await.map_err(Error::store)?;
  let mut report = UploadReport::default();

  for record in records {
    let doc = record.without_local_identity();
    let id = doc.id.clone();
    let outcome = match remote.put(doc).await {
      Ok(result) => match result.status {
        WriteStatus::Written(rev) => Ok(rev),
        WriteStatus::Conflict => Err((TransportFailure::Conflict, "revision conflict".to_owned())),
        WriteStatus::Failed { status, reason } => Err((
          status.map_or(TransportFailure::Network, TransportFailure::from_status),
          reason,
        )),
      },
      Err(e) => Err((TransportFailure::Network, e.to_string())),
    };

    match outcome {
      Ok(rev) => {
        report.success_count += 1;
        report.log.push(format!("{id}: uploaded as {rev}"));
      }
      Err((failure, reason)) => {
        warn!(%id, %failure, %reason, "upload rejected");
        report.error_count += 1;
        report.log.push(format!("{id}: {failure}: {reason}"));
        report.failures.insert(id, failure);
      }
    }
  }

  info!(
    uploaded = report.success_count,
    failed = report.error_count,
    "upload finished"
  );
  Ok(report)
}
