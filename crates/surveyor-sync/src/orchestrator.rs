//! Runs one replication per collection concurrently and tracks their state.

use std::{
  collections::BTreeMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
};

use surveyor_core::{
  Collection,
  filter::{FilterDesign, FilterParams, FilterSpec},
  store::{DocumentStore, IndexDef},
};
use tracing::{debug, info, warn};

use crate::{
  CollectionFailure, Error, Result,
  context::{StoreContext, load_view},
  notify::{Notification, Notifier},
  replicate::{Direction, SyncResult, replicate_collection},
  retry::{RetryPolicy, Sleeper, TokioSleeper, with_retry},
  state::{Phase, SyncStatus},
};

/// Local secondary indexes, per collection.
fn local_indexes(collection: Collection) -> Vec<IndexDef> {
  match collection {
    Collection::Survey => vec![IndexDef::new("org_program", &["Organization", "Program"])],
    Collection::Choices => vec![IndexDef::new("question", &["QuestionID"])],
    Collection::Responses => vec![
      IndexDef::new("org_program", &["Organization", "Program"]),
      IndexDef::new("case", &["CaseID"]),
    ],
    Collection::Backup | Collection::Finalized => Vec::new(),
  }
}

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SyncOptions {
  pub retry:      RetryPolicy,
  pub batch_size: usize,
  /// Collections not listed pull from the server.
  pub directions: BTreeMap<Collection, Direction>,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      retry:      RetryPolicy::default(),
      batch_size: 100,
      directions: BTreeMap::new(),
    }
  }
}

impl SyncOptions {
  pub fn direction(&self, collection: Collection) -> Direction {
    self
      .directions
      .get(&collection)
      .copied()
      .unwrap_or_default()
  }
}

/// Per-collection results of a fully successful `sync_all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub results: Vec<SyncResult>,
}

impl SyncReport {
  pub fn docs_written(&self) -> usize { self.results.iter().map(|r| r.docs_written).sum() }
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct SyncOrchestrator<L, R, Z = TokioSleeper> {
  ctx:         Arc<StoreContext<L, R>>,
  options:     SyncOptions,
  notifier:    Arc<dyn Notifier>,
  sleeper:     Z,
  provisioned: AtomicBool,
  status:      Mutex<SyncStatus>,
}

impl<L, R> SyncOrchestrator<L, R, TokioSleeper>
where
  L: DocumentStore,
  R: DocumentStore,
{
  pub fn new(
    ctx: Arc<StoreContext<L, R>>,
    options: SyncOptions,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    Self::with_sleeper(ctx, options, notifier, TokioSleeper)
  }
}

impl<L, R, Z> SyncOrchestrator<L, R, Z>
where
  L: DocumentStore,
  R: DocumentStore,
  Z: Sleeper,
{
  pub fn with_sleeper(
    ctx: Arc<StoreContext<L, R>>,
    options: SyncOptions,
    notifier: Arc<dyn Notifier>,
    sleeper: Z,
  ) -> Self {
    let mut status = SyncStatus::default();
    status.reset();
    Self {
      ctx,
      options,
      notifier,
      sleeper,
      provisioned: AtomicBool::new(false),
      status: Mutex::new(status),
    }
  }

  /// Snapshot of the current sync state.
  pub fn status(&self) -> SyncStatus {
    match self.status.lock() {
      Ok(guard) => guard.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
    let mut guard = match self.status.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard);
  }

  pub fn is_provisioned(&self) -> bool { self.provisioned.load(Ordering::Acquire) }

  /// Install the replication filter on every store and the local indexes.
  ///
  /// Runs once per orchestrator. A failure on the server is logged and leaves
  /// provisioning to be retried by the next `sync_all`; a local failure is
  /// returned.
  pub async fn provision(&self) -> Result<()> {
    if self.is_provisioned() {
      return Ok(());
    }
    let design = FilterDesign::org_program();
    let mut complete = true;

    for (collection, local) in self.ctx.local.iter() {
      local.install_filter(&design).await.map_err(Error::store)?;
      for index in local_indexes(collection) {
        let name = index.name.clone();
        let outcome = local.ensure_index(index).await.map_err(Error::store)?;
        debug!(%collection, index = %name, ?outcome, "local index");
      }
    }

    for (collection, remote) in self.ctx.remote.iter() {
      match remote.install_filter(&design).await {
        Ok(created) => debug!(%collection, created, "remote filter"),
        Err(e) => {
          warn!(%collection, error = %e, "could not install remote filter");
          complete = false;
        }
      }
    }

    if complete {
      self.provisioned.store(true, Ordering::Release);
      info!("stores provisioned");
    }
    Ok(())
  }

  /// Replicate all four collections for `organization` (and `program`, when
  /// given).
  ///
  /// Collections run concurrently and fail independently. The view is
  /// reloaded only when every collection succeeded. Callers must not start a
  /// second run while [`SyncStatus::is_syncing`] is set.
  pub async fn sync_all(&self, organization: &str, program: Option<&str>) -> Result<SyncReport> {
    self.provision().await?;

    self.update(|s| {
      s.reset();
      s.is_syncing = true;
    });
    let filter = FilterSpec::org_program(FilterParams::new(organization, program));
    let ctx = &*self.ctx;
    info!(organization, program, "sync started");

    let (survey, choices, responses, backup) = tokio::join!(
      self.sync_one(Collection::Survey, &ctx.local.survey, &ctx.remote.survey, &filter),
      self.sync_one(Collection::Choices, &ctx.local.choices, &ctx.remote.choices, &filter),
      self.sync_one(
        Collection::Responses,
        &ctx.local.responses,
        &ctx.remote.responses,
        &filter
      ),
      self.sync_one(Collection::Backup, &ctx.local.backup, &ctx.remote.backup, &filter),
    );
    self.update(|s| s.is_syncing = false);

    let mut results = Vec::new();
    let mut failures = Vec::new();
    for outcome in [survey, choices, responses, backup] {
      match outcome {
        Ok(result) => results.push(result),
        Err(failure) => failures.push(failure),
      }
    }

    if !failures.is_empty() {
      let names = failures
        .iter()
        .map(|f| f.collection.as_str())
        .collect::<Vec<_>>()
        .join(", ");
      self
        .notifier
        .notify(Notification::error(format!("Sync failed for {names}")));
      return Err(Error::SyncFailed { failures });
    }

    let view = load_view(&ctx.local).await?;
    *ctx.view.write().await = view;

    let report = SyncReport { results };
    info!(docs_written = report.docs_written(), "sync complete");
    self.notifier.notify(Notification::success(format!(
      "Sync complete: {} document(s) updated",
      report.docs_written()
    )));
    Ok(report)
  }

  async fn sync_one(
    &self,
    collection: Collection,
    local: &L,
    remote: &R,
    filter: &FilterSpec,
  ) -> Result<SyncResult, CollectionFailure> {
    let direction = self.options.direction(collection);
    let batch_size = self.options.batch_size;
    let progress: &(dyn Fn(u8) + Send + Sync) =
      &|pct: u8| self.update(|s| s.entry(collection).progress = pct);
    let label = format!("sync {collection}");

    let outcome = with_retry(&self.options.retry, &self.sleeper, &label, |attempt| {
      self.update(|s| {
        let state = s.entry(collection);
        state.phase = Phase::InProgress;
        state.attempts = attempt + 1;
      });
      async move {
        match direction {
          Direction::Pull => {
            replicate_collection(remote, local, collection, filter, batch_size, progress).await
          }
          Direction::Push => {
            replicate_collection(local, remote, collection, filter, batch_size, progress).await
          }
        }
      }
    })
    .await;

    match outcome {
      Ok(result) => {
        self.update(|s| {
          let state = s.entry(collection);
          state.phase = Phase::Completed;
          state.progress = 100;
          state.last_error = None;
        });
        Ok(result)
      }
      Err(e) => {
        let message = e.error.to_string();
        self.update(|s| {
          let state = s.entry(collection);
          state.phase = Phase::Failed;
          state.attempts = e.attempts;
          state.last_error = Some(message.clone());
        });
        Err(CollectionFailure { collection, attempts: e.attempts, message })
      }
    }
  }
}
