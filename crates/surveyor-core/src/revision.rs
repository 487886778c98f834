//! Revision tokens for optimistic concurrency.
//!
//! A revision is `"<generation>-<digest>"`. The generation counts accepted
//! writes to a document id; the digest is a truncated SHA-256 over the
//! document content. Every write to an existing document must present the
//! current revision, and stores reject stale ones.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Number of hex characters kept from the content hash.
const DIGEST_LEN: usize = 32;

/// An opaque, totally ordered revision token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision {
  generation: u64,
  digest:     String,
}

impl Revision {
  /// Build the revision that follows `previous` for content hashing to
  /// `digest`. A document with no previous revision starts at generation 1.
  pub fn next(previous: Option<&Revision>, digest: &str) -> Self {
    Self {
      generation: previous.map_or(0, Revision::generation) + 1,
      digest:     digest.to_owned(),
    }
  }

  pub fn generation(&self) -> u64 { self.generation }

  pub fn digest(&self) -> &str { &self.digest }

  /// Whether `self` should replace `other` when both versions of a document
  /// meet during replication. Higher generation wins; ties are broken by the
  /// digest so that every replica picks the same winner.
  pub fn wins_over(&self, other: &Revision) -> bool { self.cmp(other) == Ordering::Greater }
}

/// Hash arbitrary content bytes into a revision digest.
pub fn content_digest(bytes: &[u8]) -> String {
  let hash = Sha256::digest(bytes);
  let mut hex = hex::encode(hash);
  hex.truncate(DIGEST_LEN);
  hex
}

impl Ord for Revision {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .generation
      .cmp(&other.generation)
      .then_with(|| self.digest.cmp(&other.digest))
  }
}

impl PartialOrd for Revision {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl fmt::Display for Revision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.generation, self.digest)
  }
}

impl FromStr for Revision {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let (generation, digest) = s
      .split_once('-')
      .ok_or_else(|| Error::InvalidRevision(s.to_owned()))?;
    let generation: u64 = generation
      .parse()
      .map_err(|_| Error::InvalidRevision(s.to_owned()))?;
    if generation == 0 || digest.is_empty() {
      return Err(Error::InvalidRevision(s.to_owned()));
    }
    Ok(Self { generation, digest: digest.to_owned() })
  }
}

impl TryFrom<String> for Revision {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { value.parse() }
}

impl From<Revision> for String {
  fn from(value: Revision) -> Self { value.to_string() }
}
