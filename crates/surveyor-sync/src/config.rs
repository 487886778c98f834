//! Settings for the sync engine, deserialised by the binary from a config
//! file and `SURVEYOR_*` environment variables.

use std::{collections::BTreeMap, fmt, path::PathBuf, time::Duration};

use serde::Deserialize;
use surveyor_core::{Collection, depends::Comparison};

use crate::{Error, Result, context::CollectionSet, replicate::Direction, retry::RetryPolicy};

/// A password that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
  pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

  pub fn expose(&self) -> &str { &self.0 }
}

impl fmt::Debug for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("<redacted>") }
}

/// Username and password for one remote database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
  pub username: String,
  pub password: Secret,
}

/// Validated connection settings for the remote server.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
  pub base_url:    String,
  pub credentials: CollectionSet<Credential>,
}

/// Raw settings. Every field is optional here so that a missing value is
/// reported by [`SyncConfig::remote_settings`] together with all the others,
/// before any network call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub remote_url:           Option<String>,
  pub survey_key:           Option<String>,
  pub survey_password:      Option<Secret>,
  pub choices_key:          Option<String>,
  pub choices_password:     Option<Secret>,
  pub responses_key:        Option<String>,
  pub responses_password:   Option<Secret>,
  pub backup_key:           Option<String>,
  pub backup_password:      Option<Secret>,
  pub database_path:        Option<PathBuf>,
  pub max_attempts:         Option<u32>,
  pub base_delay_ms:        Option<u64>,
  pub batch_size:           Option<usize>,
  pub conflict_retries:     Option<u32>,
  pub numeric_dependencies: bool,
  /// Organization and program used when a command does not name them.
  pub organization:         Option<String>,
  pub program:              Option<String>,
  /// Per-collection replication direction, e.g. `backup = "push"`.
  pub directions:           BTreeMap<Collection, Direction>,
}

const DEFAULT_DATABASE: &str = "surveyor.db";
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_CONFLICT_RETRIES: u32 = 3;

fn present(value: Option<&str>) -> Option<String> {
  value
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_owned)
}

impl SyncConfig {
  /// Check the server URL and all four credential pairs. The error names
  /// every missing option by its environment variable.
  pub fn remote_settings(&self) -> Result<RemoteSettings> {
    let mut missing: Vec<&'static str> = Vec::new();

    let base_url = present(self.remote_url.as_deref());
    if base_url.is_none() {
      missing.push("SURVEYOR_REMOTE_URL");
    }

    let mut credential = |collection: Collection| {
      let (key, password, key_name, password_name) = match collection {
        Collection::Survey => (
          &self.survey_key,
          &self.survey_password,
          "SURVEYOR_SURVEY_KEY",
          "SURVEYOR_SURVEY_PASSWORD",
        ),
        Collection::Choices => (
          &self.choices_key,
          &self.choices_password,
          "SURVEYOR_CHOICES_KEY",
          "SURVEYOR_CHOICES_PASSWORD",
        ),
        Collection::Responses => (
          &self.responses_key,
          &self.responses_password,
          "SURVEYOR_RESPONSES_KEY",
          "SURVEYOR_RESPONSES_PASSWORD",
        ),
        Collection::Backup | Collection::Finalized => (
          &self.backup_key,
          &self.backup_password,
          "SURVEYOR_BACKUP_KEY",
          "SURVEYOR_BACKUP_PASSWORD",
        ),
      };
      let username = present(key.as_deref());
      let password = present(password.as_ref().map(Secret::expose));
      if username.is_none() {
        missing.push(key_name);
      }
      if password.is_none() {
        missing.push(password_name);
      }
      Credential {
        username: username.unwrap_or_default(),
        password: Secret::new(password.unwrap_or_default()),
      }
    };
    let credentials = CollectionSet::from_fn(&mut credential);

    if !missing.is_empty() {
      return Err(Error::Configuration(format!(
        "missing required settings: {}",
        missing.join(", ")
      )));
    }

    let base_url = base_url.unwrap_or_default();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
      return Err(Error::Configuration(format!(
        "SURVEYOR_REMOTE_URL must be an http(s) URL, got {base_url:?}"
      )));
    }
    Ok(RemoteSettings { base_url, credentials })
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    let default = RetryPolicy::default();
    RetryPolicy {
      max_attempts: self.max_attempts.unwrap_or(default.max_attempts),
      base_delay:   self
        .base_delay_ms
        .map_or(default.base_delay, Duration::from_millis),
    }
  }

  pub fn batch_size(&self) -> usize {
    self
      .batch_size
      .filter(|b| *b > 0)
      .unwrap_or(DEFAULT_BATCH_SIZE)
  }

  pub fn conflict_retries(&self) -> u32 {
    self.conflict_retries.unwrap_or(DEFAULT_CONFLICT_RETRIES)
  }

  pub fn comparison(&self) -> Comparison {
    if self.numeric_dependencies {
      Comparison::NumericAware
    } else {
      Comparison::Verbatim
    }
  }

  pub fn database_path(&self) -> PathBuf {
    self
      .database_path
      .clone()
      .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE))
  }
}
