//! [`RemoteStore`], the HTTP implementation of [`DocumentStore`].

use std::{collections::BTreeMap, fmt, time::Duration};

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use surveyor_core::{
  Document,
  document::DESIGN_PREFIX,
  filter::FilterDesign,
  store::{
    ChangesBatch, ChangesRequest, DocumentStore, FieldQuery, IndexDef, IndexOutcome,
    StoreInfo, WriteResult, WriteStatus,
  },
};
use tracing::debug;

use crate::{
  Error, Result,
  wire::{
    AllDocsResponse, BulkDocsRequest, BulkItem, ChangesResponse, DbInfo, ErrorBody,
    FindRequest, FindResponse, IndexFields, IndexRequest, IndexResponse, PutResponse,
    RevsDiffResponse, seq_string,
  },
};

/// Page size for `_find` requests; the server caps unpaged queries.
const FIND_PAGE: usize = 500;

// ─── Credentials ─────────────────────────────────────────────────────────────

/// HTTP basic-auth credentials for one database.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
  pub username: String,
  pub password: String,
}

impl BasicAuth {
  pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
    Self { username: username.into(), password: password.into() }
  }
}

impl fmt::Debug for BasicAuth {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BasicAuth")
      .field("username", &self.username)
      .field("password", &"<redacted>")
      .finish()
  }
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// One database on the remote document server.
///
/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct RemoteStore {
  client:   Client,
  base_url: Url,
  db:       String,
  auth:     BasicAuth,
}

impl fmt::Debug for RemoteStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RemoteStore")
      .field("base_url", &self.base_url.as_str())
      .field("db", &self.db)
      .field("auth", &self.auth)
      .finish()
  }
}

impl RemoteStore {
  pub fn new(base_url: &str, db: impl Into<String>, auth: BasicAuth) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()?;
    Self::with_client(client, base_url, db, auth)
  }

  /// Share an existing HTTP client (and its connection pool) across
  /// databases.
  pub fn with_client(
    client: Client,
    base_url: &str,
    db: impl Into<String>,
    auth: BasicAuth,
  ) -> Result<Self> {
    let parsed = Url::parse(base_url).map_err(|_| Error::InvalidUrl(base_url.to_owned()))?;
    if parsed.cannot_be_a_base() {
      return Err(Error::InvalidUrl(base_url.to_owned()));
    }
    Ok(Self { client, base_url: parsed, db: db.into(), auth })
  }

  pub fn database(&self) -> &str { &self.db }

  /// Create the database if it does not exist. Returns `false` when it
  /// already did.
  pub async fn ensure_database(&self) -> Result<bool> {
    let url = self.url(&[])?;
    let resp = self.request(Method::PUT, url).send().await?;
    if resp.status() == StatusCode::PRECONDITION_FAILED {
      return Ok(false);
    }
    let _: Value = Self::json(resp, "PUT").await?;
    debug!(db = %self.db, "created database");
    Ok(true)
  }

  fn url(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|()| Error::InvalidUrl(self.base_url.to_string()))?
      .pop_if_empty()
      .push(&self.db)
      .extend(segments);
    Ok(url)
  }

  /// Design document ids keep their slash; every other id is one segment.
  fn doc_url(&self, id: &str) -> Result<Url> {
    match id.strip_prefix(DESIGN_PREFIX) {
      Some(name) => self.url(&["_design", name]),
      None => self.url(&[id]),
    }
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let req = self.client.request(method, url);
    if self.auth.username.is_empty() {
      req
    } else {
      req.basic_auth(&self.auth.username, Some(&self.auth.password))
    }
  }

  /// Decode a successful response, or turn any other status into
  /// [`Error::Status`].
  async fn json<T: DeserializeOwned>(resp: Response, method: &'static str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
      let path = resp.url().path().to_owned();
      let body = resp.text().await.unwrap_or_default();
      return Err(Error::Status { method, path, status: status.as_u16(), body });
    }
    Ok(resp.json().await?)
  }
}

fn failure_reason(status: StatusCode, body: &str) -> String {
  serde_json::from_str::<ErrorBody>(body)
    .map(|b| b.describe())
    .ok()
    .filter(|s| !s.is_empty())
    .unwrap_or_else(|| status.to_string())
}

fn bulk_result(item: BulkItem) -> WriteResult {
  match (item.rev, item.error.as_deref()) {
    (Some(rev), None) => WriteResult::written(item.id, rev),
    (_, Some("conflict")) => WriteResult::conflict(item.id),
    (_, error) => {
      let reason = item
        .reason
        .or_else(|| error.map(str::to_owned))
        .unwrap_or_default();
      WriteResult { id: item.id, status: WriteStatus::Failed { status: None, reason } }
    }
  }
}

// ─── DocumentStore impl ──────────────────────────────────────────────────────

impl DocumentStore for RemoteStore {
  type Error = Error;

  async fn get(&self, id: &str) -> Result<Option<Document>> {
    let url = self.doc_url(id)?;
    let resp = self
      .request(Method::GET, url)
      .query(&[("attachments", "true")])
      .send()
      .await?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    let doc: Document = Self::json(resp, "GET").await?;
    Ok((!doc.deleted).then_some(doc))
  }

  async fn put(&self, doc: Document) -> Result<WriteResult> {
    let url = self.doc_url(&doc.id)?;
    let resp = self.request(Method::PUT, url).json(&doc).send().await?;
    let status = resp.status();

    if status.is_success() {
      let body: PutResponse = resp.json().await?;
      debug!(db = %self.db, id = %doc.id, rev = %body.rev, "put document");
      return Ok(WriteResult::written(doc.id, body.rev));
    }
    if status == StatusCode::CONFLICT {
      return Ok(WriteResult::conflict(doc.id));
    }

    let body = resp.text().await.unwrap_or_default();
    Ok(WriteResult {
      id:     doc.id,
      status: WriteStatus::Failed {
        status: Some(status.as_u16()),
        reason: failure_reason(status, &body),
      },
    })
  }

  async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<WriteResult>> {
    let url = self.url(&["_bulk_docs"])?;
    let body = BulkDocsRequest { docs: &docs, new_edits: None };
    let resp = self.request(Method::POST, url).json(&body).send().await?;
    let items: Vec<BulkItem> = Self::json(resp, "POST").await?;
    Ok(items.into_iter().map(bulk_result).collect())
  }

  async fn find(&self, query: &FieldQuery) -> Result<Vec<Document>> {
    let url = self.url(&["_find"])?;
    let mut docs = Vec::new();
    let mut bookmark = None;
    loop {
      let body = FindRequest {
        selector: &query.equals,
        limit: FIND_PAGE,
        bookmark: bookmark.take(),
      };
      let resp = self
        .request(Method::POST, url.clone())
        .json(&body)
        .send()
        .await?;
      let page: FindResponse = Self::json(resp, "POST").await?;
      let fetched = page.docs.len();
      docs.extend(page.docs);
      if fetched < FIND_PAGE || page.bookmark.is_none() {
        break;
      }
      bookmark = page.bookmark;
    }
    Ok(docs)
  }

  async fn ensure_index(&self, index: IndexDef) -> Result<IndexOutcome> {
    let url = self.url(&["_index"])?;
    let body = IndexRequest {
      index: IndexFields { fields: &index.fields },
      name:  &index.name,
      kind:  "json",
    };
    let resp = self.request(Method::POST, url).json(&body).send().await?;
    let outcome: IndexResponse = Self::json(resp, "POST").await?;
    Ok(if outcome.result == "created" { IndexOutcome::Created } else { IndexOutcome::Exists })
  }

  async fn all_docs(&self) -> Result<Vec<Document>> {
    let url = self.url(&["_all_docs"])?;
    let resp = self
      .request(Method::GET, url)
      .query(&[("include_docs", "true"), ("attachments", "true")])
      .send()
      .await?;
    let body: AllDocsResponse = Self::json(resp, "GET").await?;
    Ok(
      body
        .rows
        .into_iter()
        .filter_map(|row| row.doc)
        .filter(|doc| !doc.deleted && !doc.is_design())
        .collect(),
    )
  }

  async fn changes(&self, request: &ChangesRequest) -> Result<ChangesBatch> {
    let url = self.url(&["_changes"])?;
    let mut query: Vec<(&str, String)> = vec![
      ("since", request.since.clone()),
      ("limit", request.limit.to_string()),
      ("include_docs", "true".to_owned()),
      ("attachments", "true".to_owned()),
    ];
    if let Some(filter) = &request.filter {
      query.push(("filter", filter.name.clone()));
      query.extend(filter.params.query_pairs());
    }

    let resp = self.request(Method::GET, url).query(&query).send().await?;
    let body: ChangesResponse = Self::json(resp, "GET").await?;
    let scanned = body.results.len();
    let docs: Vec<Document> = body
      .results
      .into_iter()
      .filter_map(|row| row.into_document())
      .collect();

    debug!(db = %self.db, since = %request.since, scanned, "read change batch");
    Ok(ChangesBatch { docs, last_seq: seq_string(&body.last_seq), scanned })
  }

  async fn apply_replicated(&self, docs: Vec<Document>) -> Result<usize> {
    let docs: Vec<Document> = docs
      .into_iter()
      .filter(|d| !d.is_design() && d.rev.is_some())
      .collect();
    if docs.is_empty() {
      return Ok(0);
    }

    // Ask which revisions the server lacks so replays send nothing.
    let diff: RevsDiffResponse = {
      let mut wanted: BTreeMap<&str, Vec<String>> = BTreeMap::new();
      for doc in &docs {
        if let Some(rev) = &doc.rev {
          wanted.entry(doc.id.as_str()).or_default().push(rev.to_string());
        }
      }
      let resp = self
        .request(Method::POST, self.url(&["_revs_diff"])?)
        .json(&wanted)
        .send()
        .await?;
      Self::json(resp, "POST").await?
    };

    let missing: Vec<Document> = docs
      .into_iter()
      .filter(|doc| {
        let Some(rev) = &doc.rev else { return false };
        diff
          .get(&doc.id)
          .is_some_and(|m| m.missing.contains(rev))
      })
      .collect();
    if missing.is_empty() {
      return Ok(0);
    }

    let body = BulkDocsRequest { docs: &missing, new_edits: Some(false) };
    let resp = self
      .request(Method::POST, self.url(&["_bulk_docs"])?)
      .json(&body)
      .send()
      .await?;
    let _: Value = Self::json(resp, "POST").await?;

    debug!(db = %self.db, written = missing.len(), "applied replicated documents");
    Ok(missing.len())
  }

  async fn install_filter(&self, filter: &FilterDesign) -> Result<bool> {
    let id = filter.document_id();
    let resp = self.request(Method::GET, self.doc_url(&id)?).send().await?;
    let mut design = if resp.status() == StatusCode::NOT_FOUND {
      Document::new(id.clone())
    } else {
      Self::json::<Document>(resp, "GET").await?
    };

    let mut filters = design
      .field("filters")
      .and_then(Value::as_object)
      .cloned()
      .unwrap_or_default();
    if filters.contains_key(&filter.name) {
      return Ok(false);
    }
    filters.insert(filter.name.clone(), Value::String(filter.source.clone()));
    design.fields.insert("filters".to_owned(), Value::Object(filters));

    let result = self.put(design).await?;
    match result.status {
      WriteStatus::Written(_) => {
        debug!(db = %self.db, filter = %filter.qualified_name(), "installed filter");
        Ok(true)
      }
      // Another device provisioned it between our read and write.
      WriteStatus::Conflict => Ok(false),
      WriteStatus::Failed { status, reason } => Err(Error::Status {
        method: "PUT",
        path:   id,
        status: status.unwrap_or_default(),
        body:   reason,
      }),
    }
  }

  async fn info(&self) -> Result<StoreInfo> {
    let resp = self.request(Method::GET, self.url(&[])?).send().await?;
    let info: DbInfo = Self::json(resp, "GET").await?;
    Ok(StoreInfo {
      doc_count:  info.doc_count,
      update_seq: seq_string(&info.update_seq),
    })
  }
}
