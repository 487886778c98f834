//! One-shot filtered replication of a single collection.

use serde::{Deserialize, Serialize};
use surveyor_core::{
  Collection, Document,
  filter::FilterSpec,
  store::{ChangesRequest, DocumentStore, SEQ_START},
};
use thiserror::Error;
use tracing::{debug, info};

/// Which way documents flow between the device and the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  /// Remote to local.
  #[default]
  Pull,
  /// Local to remote.
  Push,
}

/// Outcome of a completed replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
  pub collection:   Collection,
  /// Feed rows that passed the filter.
  pub docs_read:    usize,
  /// Documents the target did not already have.
  pub docs_written: usize,
  pub last_seq:     String,
}

/// Which side of the replication failed.
#[derive(Debug, Error)]
pub enum ReplicationError {
  #[error("reading {collection} from source: {source}")]
  Source {
    collection: Collection,
    #[source]
    source:     Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("writing {collection} to target: {source}")]
  Target {
    collection: Collection,
    #[source]
    source:     Box<dyn std::error::Error + Send + Sync>,
  },
}

/// `done / total` as a whole percentage clamped to `0..=100`. An unknown
/// (zero) total counts as finished.
pub fn percent(done: u64, total: u64) -> u8 {
  if total == 0 {
    return 100;
  }
  let pct = done.saturating_mul(100) / total;
  u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Copy every change in `source` that passes `filter` into `target`, reading
/// the feed in pages of `batch_size`.
///
/// Always reads from the start of the feed. Re-running after a partial
/// transfer is safe because the target keeps only winning revisions.
/// `progress` reports the position in the source's change feed: feed rows
/// read so far, including rows the filter rejected, over the source's change
/// count at the start of the call.
pub async fn replicate_collection<S, T>(
  source: &S,
  target: &T,
  collection: Collection,
  filter: &FilterSpec,
  batch_size: usize,
  progress: &(dyn Fn(u8) + Send + Sync),
) -> Result<SyncResult, ReplicationError>
where
  S: DocumentStore,
  T: DocumentStore,
{
  let source_err = |e: S::Error| ReplicationError::Source { collection, source: Box::new(e) };
  let target_err = |e: T::Error| ReplicationError::Target { collection, source: Box::new(e) };

  let total = source.info().await.map_err(source_err)?.change_count();
  let batch_size = batch_size.max(1);
  progress(0);

  let mut since = SEQ_START.to_owned();
  let mut scanned: u64 = 0;
  let mut docs_read = 0;
  let mut docs_written = 0;
  loop {
    let request = ChangesRequest {
      since:  since.clone(),
      limit:  batch_size,
      filter: Some(filter.clone()),
    };
    let batch = source.changes(&request).await.map_err(source_err)?;
    scanned += batch.scanned as u64;

    let docs: Vec<Document> = batch
      .docs
      .into_iter()
      .filter(|d| !d.is_design())
      .collect();
    docs_read += docs.len();
    let fetched = docs.len();
    if !docs.is_empty() {
      docs_written += target.apply_replicated(docs).await.map_err(target_err)?;
    }

    debug!(%collection, since = %since, fetched, scanned, total, "replicated batch");
    since = batch.last_seq;
    progress(percent(scanned, total));
    if batch.scanned < batch_size {
      break;
    }
  }

  progress(100);
  info!(%collection, docs_read, docs_written, "replication complete");
  Ok(SyncResult { collection, docs_read, docs_written, last_seq: since })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn percent_is_clamped() {
    assert_eq!(percent(0, 10), 0);
    assert_eq!(percent(5, 10), 50);
    assert_eq!(percent(15, 10), 100);
    assert_eq!(percent(0, 0), 100);
    assert_eq!(percent(u64::MAX, 3), 100);
  }
}
