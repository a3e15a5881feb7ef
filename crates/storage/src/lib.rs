//! Storage traits and shared types.
//!
//! This crate defines the storage surface the ledger engine consumes, along
//! with the staging overlay the engine executes batches against.
//!
//! # Design
//!
//! The engine never touches the byte-level storage engine. It reads through
//! [`SubstateReader`] and hands finished batches to [`EngineStore::commit`]:
//!
//! ```text
//! Engine ──reads──► SubstateOverlay ──miss──► EngineStore (committed state)
//!    │                   ▲
//!    │ per txn effects ──┘
//!    │
//!    └── CommitBatch ──► EngineStore::commit (single write section)
//! ```
//!
//! - `InMemoryEngineStore` (in `stratum-storage-memory`) is the reference backend.
//! - Persistent backends implement the same two traits.

#![warn(missing_docs)]

mod commit;
mod overlay;
mod store;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use commit::{CommitBatch, CommittedTxn, StateUpdate};
pub use overlay::SubstateOverlay;
pub use store::{EngineStore, SubstateCursor, SubstateIndex, SubstateReader};
