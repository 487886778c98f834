//! Conversions between [`Document`] and the plain-text columns of the
//! `documents` table.
//!
//! Fields and attachments are stored as compact JSON; revisions as their
//! display form.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use surveyor_core::{Attachment, Document, Revision};

use crate::{Error, Result};

/// Column list matching [`RawDocument::from_row`].
pub const DOC_COLUMNS: &str = "doc_id, rev, deleted, body_json, attachments_json";

// ─── Names ───────────────────────────────────────────────────────────────────

/// Reject anything that is not a plain SQL-safe identifier.
pub fn validate_name(name: &str) -> Result<()> {
  let ok = !name.is_empty()
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '_');
  if ok { Ok(()) } else { Err(Error::InvalidName(name.to_owned())) }
}

// ─── Sequences ───────────────────────────────────────────────────────────────

pub fn decode_seq(since: &str) -> Result<i64> {
  since
    .parse::<i64>()
    .ok()
    .filter(|s| *s >= 0)
    .ok_or_else(|| Error::InvalidSeq(since.to_owned()))
}

// ─── Documents ───────────────────────────────────────────────────────────────

/// A document flattened into column values, ready to move into a
/// `Connection::call` closure.
#[derive(Debug, Clone)]
pub struct EncodedDocument {
  pub id:               String,
  pub rev:              Option<Revision>,
  pub deleted:          bool,
  pub body_json:        String,
  pub attachments_json: String,
  pub digest:           String,
}

pub fn encode_document(doc: &Document) -> Result<EncodedDocument> {
  Ok(EncodedDocument {
    id:               doc.id.clone(),
    rev:              doc.rev.clone(),
    deleted:          doc.deleted,
    body_json:        serde_json::to_string(&doc.fields)?,
    attachments_json: serde_json::to_string(&doc.attachments)?,
    digest:           doc.content_digest(),
  })
}

/// One row of `documents`, undecoded.
#[derive(Debug)]
pub struct RawDocument {
  pub doc_id:           String,
  pub rev:              String,
  pub deleted:          bool,
  pub body_json:        String,
  pub attachments_json: String,
}

impl RawDocument {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      doc_id:           row.get(0)?,
      rev:              row.get(1)?,
      deleted:          row.get(2)?,
      body_json:        row.get(3)?,
      attachments_json: row.get(4)?,
    })
  }

  pub fn into_document(self) -> Result<Document> {
    let fields: Map<String, Value> = serde_json::from_str(&self.body_json)?;
    let attachments: BTreeMap<String, Attachment> =
      serde_json::from_str(&self.attachments_json)?;
    Ok(Document {
      id: self.doc_id,
      rev: Some(self.rev.parse()?),
      deleted: self.deleted,
      attachments,
      fields,
    })
  }
}
