//! Core types and trait definitions for the Surveyor sync core.
//!
//! This crate has no HTTP or database dependencies. The local SQLite store,
//! the remote HTTP store, and the sync engine all depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod bank;
pub mod collection;
pub mod depends;
pub mod document;
pub mod error;
pub mod filter;
pub mod response;
pub mod revision;
pub mod store;
pub mod survey;

pub use collection::Collection;
pub use document::{Attachment, Document};
pub use error::{Error, Result};
pub use revision::Revision;
