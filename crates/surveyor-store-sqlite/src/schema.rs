//! SQL schema for the Surveyor SQLite store.
//!
//! Executed once at connection startup. Every collection shares the same
//! tables, partitioned by the `collection` column.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- Latest version of every document, tombstones included.
-- `seq` is the collection's change counter at the last write.
CREATE TABLE IF NOT EXISTS documents (
    collection       TEXT    NOT NULL,
    doc_id           TEXT    NOT NULL,
    rev              TEXT    NOT NULL,   -- '<generation>-<digest>'
    deleted          INTEGER NOT NULL DEFAULT 0,
    body_json        TEXT    NOT NULL,   -- top-level fields as a JSON object
    attachments_json TEXT    NOT NULL DEFAULT '{}',
    seq              INTEGER NOT NULL,
    PRIMARY KEY (collection, doc_id)
);

CREATE INDEX IF NOT EXISTS documents_seq_idx ON documents(collection, seq);

-- Secondary indexes created through `ensure_index`.
CREATE TABLE IF NOT EXISTS indexes (
    collection  TEXT NOT NULL,
    name        TEXT NOT NULL,
    fields_json TEXT NOT NULL,
    PRIMARY KEY (collection, name)
);

-- Change-feed filters provisioned through `install_filter`.
CREATE TABLE IF NOT EXISTS filters (
    collection TEXT NOT NULL,
    name       TEXT NOT NULL,   -- '<design>/<filter>'
    source     TEXT NOT NULL,
    PRIMARY KEY (collection, name)
);

PRAGMA user_version = 1;
";
