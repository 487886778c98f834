//! SQLite backend for the Surveyor document collections.
//!
//! One database file holds every local collection; each
//! [`SqliteCollection`] is a cheap handle scoped to one of them. All access
//! goes through [`tokio_rusqlite`] so queries never block the async runtime.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{SqliteCollection, SqliteStore};
