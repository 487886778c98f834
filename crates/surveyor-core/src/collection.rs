//! Named document collections.
//!
//! Every collection exists both locally and (except the submitted-record
//! store) remotely, one database per collection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named collection of documents.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
  /// Question definitions.
  Survey,
  /// Choice lists for choice-type questions.
  Choices,
  /// Working (draft) responses.
  Responses,
  /// Server-side backup of submitted records.
  Backup,
  /// Submitted, finalized records. Local only.
  Finalized,
}

impl Collection {
  /// The four collections that take part in `sync_all`, in a fixed order.
  pub const REPLICATED: [Collection; 4] = [
    Collection::Survey,
    Collection::Choices,
    Collection::Responses,
    Collection::Backup,
  ];

  /// Database / table name used by both stores.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Survey => "survey",
      Self::Choices => "choices",
      Self::Responses => "responses",
      Self::Backup => "backup",
      Self::Finalized => "final_db",
    }
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
