//! HTTP client for the remote document server.
//!
//! Each [`RemoteStore`] addresses one database on a CouchDB-compatible server
//! (one database per collection) and implements
//! [`DocumentStore`](surveyor_core::store::DocumentStore), so the sync engine
//! can replicate to and from it exactly as it does with the local store.

mod client;
mod wire;

pub mod error;

pub use client::{BasicAuth, RemoteStore};
pub use error::{Error, Result};
