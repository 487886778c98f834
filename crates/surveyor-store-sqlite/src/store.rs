//! [`SqliteStore`] and its per-collection [`DocumentStore`] handle.

use std::path::Path;

use rusqlite::{OptionalExtension as _, Transaction, params};
use serde_json::Value;
use surveyor_core::{
  Collection, Document, Revision,
  filter::FilterDesign,
  store::{
    ChangesBatch, ChangesRequest, DocumentStore, FieldQuery, IndexDef, IndexOutcome,
    StoreInfo, WriteResult,
  },
};
use tracing::{debug, warn};

use crate::{
  Error, Result,
  encode::{
    DOC_COLUMNS, EncodedDocument, RawDocument, decode_seq, encode_document, validate_name,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// The device-local database holding every collection.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Handle for one of the well-known collections.
  pub fn collection(&self, collection: Collection) -> SqliteCollection {
    SqliteCollection {
      conn: self.conn.clone(),
      name: collection.as_str().to_owned(),
    }
  }

  /// Handle for an arbitrarily named collection.
  pub fn named(&self, name: &str) -> Result<SqliteCollection> {
    validate_name(name)?;
    Ok(SqliteCollection { conn: self.conn.clone(), name: name.to_owned() })
  }
}

/// One collection inside a [`SqliteStore`].
#[derive(Clone)]
pub struct SqliteCollection {
  conn: tokio_rusqlite::Connection,
  name: String,
}

impl std::fmt::Debug for SqliteCollection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SqliteCollection").field("name", &self.name).finish()
  }
}

impl SqliteCollection {
  pub fn name(&self) -> &str { &self.name }

  async fn has_filter(&self, qualified_name: &str) -> Result<bool> {
    let collection = self.name.clone();
    let name = qualified_name.to_owned();
    let found = self
      .conn
      .call(move |conn| {
        let found = conn
          .query_row(
            "SELECT 1 FROM filters WHERE collection = ?1 AND name = ?2",
            params![collection, name],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        Ok(found)
      })
      .await?;
    Ok(found)
  }
}

// ─── Write helpers ───────────────────────────────────────────────────────────

fn parse_rev(s: &str) -> tokio_rusqlite::Result<Revision> {
  s.parse::<Revision>()
    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))
}

/// Current revision and deletion flag of `id`, if it was ever written.
fn current_rev(
  tx: &Transaction<'_>,
  collection: &str,
  id: &str,
) -> tokio_rusqlite::Result<Option<(Revision, bool)>> {
  let row: Option<(String, bool)> = tx
    .query_row(
      "SELECT rev, deleted FROM documents WHERE collection = ?1 AND doc_id = ?2",
      params![collection, id],
      |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()?;
  row
    .map(|(rev, deleted)| Ok((parse_rev(&rev)?, deleted)))
    .transpose()
}

fn write_row(
  tx: &Transaction<'_>,
  collection: &str,
  doc: &EncodedDocument,
  rev: &Revision,
) -> tokio_rusqlite::Result<()> {
  let seq: i64 = tx.query_row(
    "SELECT COALESCE(MAX(seq), 0) + 1 FROM documents WHERE collection = ?1",
    params![collection],
    |r| r.get(0),
  )?;
  tx.execute(
    "INSERT INTO documents
       (collection, doc_id, rev, deleted, body_json, attachments_json, seq)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT (collection, doc_id) DO UPDATE SET
       rev              = excluded.rev,
       deleted          = excluded.deleted,
       body_json        = excluded.body_json,
       attachments_json = excluded.attachments_json,
       seq              = excluded.seq",
    params![
      collection,
      doc.id,
      rev.to_string(),
      doc.deleted,
      doc.body_json,
      doc.attachments_json,
      seq,
    ],
  )?;
  Ok(())
}

/// Apply the optimistic-concurrency rules to one write.
///
/// A live document only accepts its exact current revision. A tombstoned
/// document also accepts a write without a revision, which recreates it. A
/// revision presented for an id that was never written is stale.
fn put_in_tx(
  tx: &Transaction<'_>,
  collection: &str,
  doc: &EncodedDocument,
) -> tokio_rusqlite::Result<WriteResult> {
  let current = current_rev(tx, collection, &doc.id)?;
  let accepted = match (&current, &doc.rev) {
    (None, None) => true,
    (None, Some(_)) => false,
    (Some((cur, _)), Some(presented)) => presented == cur,
    (Some((_, deleted)), None) => *deleted,
  };
  if !accepted {
    return Ok(WriteResult::conflict(&doc.id));
  }

  let rev = Revision::next(current.as_ref().map(|(r, _)| r), &doc.digest);
  write_row(tx, collection, doc, &rev)?;
  Ok(WriteResult::written(&doc.id, rev))
}

fn json_path(field: &str) -> String { format!("json_extract(body_json, '$.\"{field}\"')") }

// ─── DocumentStore impl ──────────────────────────────────────────────────────

impl DocumentStore for SqliteCollection {
  type Error = Error;

  async fn get(&self, id: &str) -> Result<Option<Document>> {
    let collection = self.name.clone();
    let id = id.to_owned();
    let raw = self
      .conn
      .call(move |conn| {
        let raw = conn
          .query_row(
            &format!(
              "SELECT {DOC_COLUMNS} FROM documents
               WHERE collection = ?1 AND doc_id = ?2 AND deleted = 0"
            ),
            params![collection, id],
            RawDocument::from_row,
          )
          .optional()?;
        Ok(raw)
      })
      .await?;
    raw.map(RawDocument::into_document).transpose()
  }

  async fn put(&self, doc: Document) -> Result<WriteResult> {
    let encoded = encode_document(&doc)?;
    let collection = self.name.clone();
    let result = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let result = put_in_tx(&tx, &collection, &encoded)?;
        tx.commit()?;
        Ok(result)
      })
      .await?;
    Ok(result)
  }

  async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<WriteResult>> {
    let encoded = docs
      .iter()
      .map(encode_document)
      .collect::<Result<Vec<_>>>()?;
    let collection = self.name.clone();
    let results = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let results = encoded
          .iter()
          .map(|doc| put_in_tx(&tx, &collection, doc))
          .collect::<tokio_rusqlite::Result<Vec<_>>>()?;
        tx.commit()?;
        Ok(results)
      })
      .await?;
    Ok(results)
  }

  async fn find(&self, query: &FieldQuery) -> Result<Vec<Document>> {
    // String predicates are pushed down so they can hit an expression index;
    // every predicate is re-checked on the decoded document.
    let mut sql = format!(
      "SELECT {DOC_COLUMNS} FROM documents WHERE collection = ?1 AND deleted = 0"
    );
    let mut args = vec![self.name.clone()];
    for (field, value) in &query.equals {
      validate_name(field)?;
      if let Value::String(s) = value {
        args.push(s.clone());
        sql.push_str(&format!(" AND {} = ?{}", json_path(field), args.len()));
      }
    }
    sql.push_str(" ORDER BY doc_id");

    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(args.iter()), RawDocument::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut docs = Vec::with_capacity(rows.len());
    for raw in rows {
      let doc = raw.into_document()?;
      if query.matches(&doc) {
        docs.push(doc);
      }
    }
    Ok(docs)
  }

  async fn ensure_index(&self, index: IndexDef) -> Result<IndexOutcome> {
    validate_name(&index.name)?;
    if index.fields.is_empty() {
      return Err(Error::InvalidName(index.name));
    }
    for field in &index.fields {
      validate_name(field)?;
    }

    let columns = index
      .fields
      .iter()
      .map(|f| json_path(f))
      .collect::<Vec<_>>()
      .join(", ");
    let ddl = format!(
      "CREATE INDEX IF NOT EXISTS \"{}__{}\" ON documents(collection, {columns})",
      self.name, index.name
    );
    let fields_json = serde_json::to_string(&index.fields)?;
    let collection = self.name.clone();
    let name = index.name.clone();

    let created = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let inserted = tx.execute(
          "INSERT OR IGNORE INTO indexes (collection, name, fields_json)
           VALUES (?1, ?2, ?3)",
          params![collection, name, fields_json],
        )?;
        if inserted == 1 {
          tx.execute_batch(&ddl)?;
        }
        tx.commit()?;
        Ok(inserted == 1)
      })
      .await?;

    debug!(collection = %self.name, index = %index.name, created, "ensure_index");
    Ok(if created { IndexOutcome::Created } else { IndexOutcome::Exists })
  }

  async fn all_docs(&self) -> Result<Vec<Document>> {
    let collection = self.name.clone();
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {DOC_COLUMNS} FROM documents
           WHERE collection = ?1 AND deleted = 0 ORDER BY doc_id"
        ))?;
        let rows = stmt
          .query_map(params![collection], RawDocument::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut docs = Vec::with_capacity(rows.len());
    for raw in rows {
      let doc = raw.into_document()?;
      if !doc.is_design() {
        docs.push(doc);
      }
    }
    Ok(docs)
  }

  async fn changes(&self, request: &ChangesRequest) -> Result<ChangesBatch> {
    let since = decode_seq(&request.since)?;
    let params = match &request.filter {
      None => None,
      Some(spec) => {
        if !self.has_filter(&spec.name).await? {
          return Err(Error::UnknownFilter(spec.name.clone()));
        }
        Some(spec.params.clone())
      }
    };

    let collection = self.name.clone();
    let limit = i64::try_from(request.limit).unwrap_or(i64::MAX);
    let (rows, last) = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {DOC_COLUMNS}, seq FROM documents
           WHERE collection = ?1 AND seq > ?2 ORDER BY seq LIMIT ?3"
        ))?;
        let mut cursor = stmt.query(params![collection, since, limit])?;
        let mut rows = Vec::new();
        let mut last: Option<i64> = None;
        while let Some(row) = cursor.next()? {
          rows.push(RawDocument::from_row(row)?);
          last = Some(row.get(5)?);
        }
        Ok((rows, last))
      })
      .await?;

    let scanned = rows.len();
    let mut docs = Vec::with_capacity(scanned);
    for raw in rows {
      let doc = raw.into_document()?;
      if params.as_ref().is_none_or(|p| p.matches(&doc)) {
        docs.push(doc);
      }
    }

    debug!(
      collection = %self.name,
      since,
      scanned,
      matched = docs.len(),
      "read change batch"
    );
    Ok(ChangesBatch {
      docs,
      last_seq: last.unwrap_or(since).to_string(),
      scanned,
    })
  }

  async fn apply_replicated(&self, docs: Vec<Document>) -> Result<usize> {
    let mut encoded = Vec::with_capacity(docs.len());
    for doc in &docs {
      if doc.is_design() {
        continue;
      }
      if doc.rev.is_none() {
        warn!(collection = %self.name, id = %doc.id, "skipping replicated document without revision");
        continue;
      }
      encoded.push(encode_document(doc)?);
    }

    let collection = self.name.clone();
    let changed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut changed: usize = 0;
        for doc in &encoded {
          let Some(incoming) = &doc.rev else { continue };
          let current = current_rev(&tx, &collection, &doc.id)?;
          if current.as_ref().is_none_or(|(cur, _)| incoming.wins_over(cur)) {
            write_row(&tx, &collection, doc, incoming)?;
            changed += 1;
          }
        }
        tx.commit()?;
        Ok(changed)
      })
      .await?;

    debug!(collection = %self.name, received = docs.len(), changed, "applied replicated documents");
    Ok(changed)
  }

  async fn install_filter(&self, filter: &FilterDesign) -> Result<bool> {
    let collection = self.name.clone();
    let name = filter.qualified_name();
    let source = filter.source.clone();
    let inserted = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT OR IGNORE INTO filters (collection, name, source) VALUES (?1, ?2, ?3)",
          params![collection, name, source],
        )?;
        Ok(inserted == 1)
      })
      .await?;
    Ok(inserted)
  }

  async fn info(&self) -> Result<StoreInfo> {
    let collection = self.name.clone();
    let (doc_count, max_seq): (i64, Option<i64>) = self
      .conn
      .call(move |conn| {
        let row = conn.query_row(
          "SELECT COUNT(*) FILTER (WHERE deleted = 0), MAX(seq)
           FROM documents WHERE collection = ?1",
          params![collection],
          |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(row)
      })
      .await?;
    Ok(StoreInfo {
      doc_count:  u64::try_from(doc_count).unwrap_or(0),
      update_seq: max_seq.unwrap_or(0).to_string(),
    })
  }
}
