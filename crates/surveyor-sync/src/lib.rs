//! Offline synchronisation and the response lifecycle.
//!
//! Everything here is generic over
//! [`DocumentStore`](surveyor_core::store::DocumentStore): the same code
//! replicates between the device database and the remote server, and the
//! tests drive it with in-memory stores and injected faults.

#![allow(async_fn_in_trait)]

pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod orchestrator;
pub mod replicate;
pub mod retry;
pub mod state;
pub mod upload;

pub use context::{CollectionSet, SharedView, StoreContext, SurveyView};
pub use error::{CollectionFailure, Error, Result};
pub use lifecycle::ResponseManager;
pub use orchestrator::SyncOrchestrator;

#[cfg(test)]
mod tests;
