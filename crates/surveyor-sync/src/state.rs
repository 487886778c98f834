//! Per-collection sync progress as shown to the user.

use std::collections::BTreeMap;

use serde::Serialize;
use surveyor_core::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
  #[default]
  Pending,
  InProgress,
  Completed,
  Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncState {
  pub phase:      Phase,
  /// Estimated percentage, `0..=100`.
  pub progress:   u8,
  pub attempts:   u32,
  pub last_error: Option<String>,
}

/// Snapshot of a `sync_all` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
  pub is_syncing:  bool,
  pub collections: BTreeMap<Collection, SyncState>,
}

impl SyncStatus {
  /// Every replicated collection back to `Pending`.
  pub fn reset(&mut self) {
    self.is_syncing = false;
    self.collections = Collection::REPLICATED
      .into_iter()
      .map(|c| (c, SyncState::default()))
      .collect();
  }

  pub fn get(&self, collection: Collection) -> Option<&SyncState> {
    self.collections.get(&collection)
  }

  pub fn entry(&mut self, collection: Collection) -> &mut SyncState {
    self.collections.entry(collection).or_default()
  }

  pub fn failed(&self) -> impl Iterator<Item = Collection> + '_ {
    self
      .collections
      .iter()
      .filter(|(_, s)| s.phase == Phase::Failed)
      .map(|(c, _)| *c)
  }
}
