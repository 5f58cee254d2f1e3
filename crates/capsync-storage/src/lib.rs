//! capsync storage library
//!
//! Persistence for the upload pipeline: the [`DurableStore`] trait that keeps
//! one upload intent per capture id, and the [`DraftStore`] trait that keeps the
//! single `active` capture draft.
//!
//! # Record layout
//!
//! The local backends write one JSON document per record, named after its key
//! (`{capture_id}.json` for intents, `active.json` for the draft). Payloads are
//! stored inline as base64 so a record is always complete on its own. Every
//! write goes to a temporary file that is fsynced and then renamed over the
//! target, so readers never observe a partially written record.
//!
//! Keys must be non-empty and must not contain path separators or `..`. Key
//! validation is centralized in the `keys` module.

pub mod draft;
pub mod factory;
pub(crate) mod keys;
pub mod local;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use capsync_core::StoreBackend;
pub use draft::{DraftStore, LocalDraftStore, MemoryDraftStore, ACTIVE_DRAFT_ID};
pub use factory::{create_draft_store, create_store};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use traits::{DurableStore, StoreError, StoreResult};
