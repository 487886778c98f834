//! `surveyor`: offline survey collection from the command line.
//!
//! Reads `surveyor.toml` (or the path given with `--config`) and
//! `SURVEYOR_*` environment variables, opens the device database, and runs
//! one command against it.
//!
//! ```
//! surveyor sync --organization Mercy --program PT
//! surveyor answer case-1 Q1 3
//! surveyor next case-1 --after Q1
//! surveyor finalize case-1
//! surveyor upload
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::{Context as _, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use surveyor_core::{
  Collection,
  response::{AnswerValue, CaseRef, RecordPatch},
  store::DocumentStore,
};
use surveyor_remote::{BasicAuth, RemoteStore};
use surveyor_store_sqlite::{SqliteCollection, SqliteStore};
use surveyor_sync::{
  CollectionSet, ResponseManager, StoreContext, SyncOrchestrator,
  config::SyncConfig,
  context::{SharedView, load_view},
  lifecycle::LifecycleOptions,
  notify::{Level, Notification, Notifier},
  orchestrator::SyncOptions,
  upload::upload_all,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Offline survey collection and sync")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "surveyor.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Replicate survey, choices, responses and backup with the server.
  Sync {
    #[arg(long)]
    organization: Option<String>,
    #[arg(long)]
    program:      Option<String>,
  },
  /// Answer one question for a case.
  Answer {
    case:     String,
    question: String,
    value:    String,
    #[arg(long, value_enum, default_value_t = Kind::Text)]
    kind:     Kind,
    /// Case this one belongs to, e.g. a household.
    #[arg(long)]
    parent:   Option<String>,
  },
  /// Answer a file question with the contents of `path`.
  Attach {
    case:         String,
    question:     String,
    path:         PathBuf,
    #[arg(long, default_value = "application/octet-stream")]
    content_type: String,
  },
  /// Show the next question for a case.
  Next {
    case:  String,
    #[arg(long)]
    after: Option<String>,
  },
  /// List the selectable choices of a question for a case.
  Choices { case: String, question: String },
  /// Submit a case.
  Finalize { case: String },
  /// Append a note to a submitted case.
  Note { case: String, text: String },
  /// Upload submitted cases to the server backup.
  Upload,
  /// Show local collection sizes.
  Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
  Text,
  /// Comma-separated option ids.
  Multi,
  /// `YYYY-MM-DD`.
  Date,
}

/// Prints notifications for the person at the terminal.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn notify(&self, n: Notification) {
    match n.level {
      Level::Error => eprintln!("error: {}", n.message),
      Level::Info | Level::Success => println!("{}", n.message),
    }
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("SURVEYOR"))
    .build()
    .context("failed to read config file")?;
  let cfg: SyncConfig = settings
    .try_deserialize()
    .context("failed to deserialise SyncConfig")?;

  let device = Device::open(&cfg).await?;
  let manager = device.manager(LifecycleOptions {
    max_retries: cfg.conflict_retries(),
    comparison:  cfg.comparison(),
  });

  match cli.command {
    Command::Sync { organization, program } => {
      let Some(organization) = organization.or_else(|| cfg.organization.clone()) else {
        bail!("no organization given; pass --organization or set SURVEYOR_ORGANIZATION");
      };
      let program = program.or_else(|| cfg.program.clone());
      let ctx = Arc::new(device.into_context(remote_stores(&cfg)?));
      let options = SyncOptions {
        retry: cfg.retry_policy(),
        batch_size: cfg.batch_size(),
        directions: cfg.directions.clone(),
      };
      let orchestrator = SyncOrchestrator::new(ctx.clone(), options, Arc::new(ConsoleNotifier));
      let result = orchestrator
        .sync_all(&organization, program.as_deref())
        .await;
      println!("{}", serde_json::to_string_pretty(&orchestrator.status())?);
      result?;
    }
    Command::Answer { case, question, value, kind, parent } => {
      let mut case = CaseRef::new(case);
      if let Some(parent) = parent {
        case = case.with_parent(parent);
      }
      let value = parse_value(&value, kind)?;
      let response = manager.answer(&case, &question, value).await?;
      println!("saved {}", response.id());
    }
    Command::Attach { case, question, path, content_type } => {
      let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {path:?}"))?;
      let name = file_name(&path)?;
      let response = manager
        .answer_file(&CaseRef::new(case), &question, &name, &content_type, &bytes)
        .await?;
      println!("saved {} ({} bytes)", response.id(), bytes.len());
    }
    Command::Next { case, after } => {
      match manager.next_question(&case, after.as_deref()).await? {
        Some(q) => println!("{}: {}", q.question_id, q.text),
        None => println!("no further questions"),
      }
    }
    Command::Choices { case, question } => {
      for choice in manager.eligible_choices(&case, &question).await? {
        println!("{}: {}", choice.option_id, choice.text);
      }
    }
    Command::Finalize { case } => {
      let report = manager.finalize(&case).await?;
      if report.is_noop() {
        println!("{case}: no drafts to finalize");
      } else {
        println!(
          "{case}: {} response(s) submitted, {}/{} drafts removed",
          report.responses, report.drafts_removed, report.drafts_total
        );
      }
      for id in &report.unreadable {
        eprintln!("{case}: draft {id} could not be read and was kept");
      }
    }
    Command::Note { case, text } => {
      let rev = manager.update(&case, RecordPatch::AppendNote(text)).await?;
      println!("{case}: note added ({rev})");
    }
    Command::Upload => {
      let remote = remote_stores(&cfg)?;
      let backup = &remote.backup;
      backup
        .ensure_database()
        .await
        .with_context(|| format!("failed to prepare remote database {}", backup.database()))?;
      let report = upload_all(&device.finalized, backup).await?;
      for line in &report.log {
        println!("{line}");
      }
      println!(
        "{} uploaded, {} failed",
        report.success_count, report.error_count
      );
      if report.error_count > 0 {
        bail!("{} record(s) were not uploaded", report.error_count);
      }
    }
    Command::Status => print_status(&device).await?,
  }

  Ok(())
}

/// The device database. Opening it needs no server settings.
struct Device {
  local:     CollectionSet<SqliteCollection>,
  finalized: SqliteCollection,
  view:      SharedView,
}

impl Device {
  async fn open(cfg: &SyncConfig) -> anyhow::Result<Self> {
    let path = expand_tilde(&cfg.database_path());
    let store = SqliteStore::open(&path)
      .await
      .with_context(|| format!("failed to open store at {path:?}"))?;
    Self::from_store(&store).await
  }

  async fn from_store(store: &SqliteStore) -> anyhow::Result<Self> {
    let local = CollectionSet::from_fn(|c| store.collection(c));
    let view = SharedView::default();
    *view.write().await = load_view(&local)
      .await
      .context("failed to load survey view")?;
    Ok(Self { local, finalized: store.collection(Collection::Finalized), view })
  }

  fn manager(&self, options: LifecycleOptions) -> ResponseManager<SqliteCollection> {
    ResponseManager::new(
      self.local.responses.clone(),
      self.finalized.clone(),
      self.view.clone(),
      options,
    )
  }

  fn into_context(
    self,
    remote: CollectionSet<RemoteStore>,
  ) -> StoreContext<SqliteCollection, RemoteStore> {
    StoreContext { local: self.local, finalized: self.finalized, remote, view: self.view }
  }
}

/// One remote store per replicated collection. Fails, naming every missing
/// `SURVEYOR_*` variable, before any request is made.
fn remote_stores(cfg: &SyncConfig) -> anyhow::Result<CollectionSet<RemoteStore>> {
  let settings = cfg.remote_settings()?;
  CollectionSet::try_from_fn(|collection| {
    let credential = settings
      .credentials
      .get(collection)
      .context("collection has no remote database")?;
    let auth = BasicAuth::new(&credential.username, credential.password.expose());
    RemoteStore::new(&settings.base_url, collection.as_str(), auth)
      .with_context(|| format!("invalid remote settings for {collection}"))
  })
}

async fn print_status(device: &Device) -> anyhow::Result<()> {
  let collections = device
    .local
    .iter()
    .chain(std::iter::once((Collection::Finalized, &device.finalized)));
  for (collection, store) in collections {
    let info = store
      .info()
      .await
      .with_context(|| format!("failed to read {collection}"))?;
    println!(
      "{:<10} {:>6} docs  seq {}",
      collection.as_str(),
      info.doc_count,
      info.update_seq
    );
  }
  let view = device.view.read().await;
  println!(
    "{} question(s), {} draft response(s)",
    view.bank.questions().len(),
    view.responses.len()
  );
  Ok(())
}

fn parse_value(raw: &str, kind: Kind) -> anyhow::Result<AnswerValue> {
  Ok(match kind {
    Kind::Text => AnswerValue::Text(raw.to_owned()),
    Kind::Multi => AnswerValue::MultiChoice(
      raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect(),
    ),
    Kind::Date => AnswerValue::Date(
      NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("{raw:?} is not a YYYY-MM-DD date"))?,
    ),
  })
}

fn file_name(path: &Path) -> anyhow::Result<String> {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .with_context(|| format!("{path:?} has no file name"))
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
