//! # In-Memory Engine Store
//!
//! Reference implementation of [`stratum_storage::EngineStore`].
//!
//! Uses `im::OrdMap` for O(1) structural-sharing clones, so
//! [`InMemoryEngineStore::snapshot`] hands out an isolated, consistent view
//! without copying the dataset. All reads and writes go through one coarse
//! lock; a committed batch becomes visible to readers all at once.

mod storage;

pub use storage::{InMemoryEngineStore, InMemorySnapshot};
