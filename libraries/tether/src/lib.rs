//! This is a library for keeping a handful of named JSON datasets in sync between an in-memory cache and a shared document store.
//! It was created for the party planner, so it doesn't include much that was not needed for that project.
//!
//! Syncing strategy:
//! 1. Every dataset is stored remotely as a single document carrying a version counter, a timestamp and the identity of the last writer.
//! 2. Local edits are applied to the cache immediately and pushed afterwards ("optimistic" writes). A failed push never rolls the cache back.
//! 3. Each process remembers the last version it saw for each dataset. Change notifications that are not newer than that are dropped,
//!    so a slow delivery can't overwrite a fresher local state.
//! 4. The first process to find an empty store claims it and seeds it from bundled defaults. Everyone else loads what's there.
//!
//! Versioned writes are read-then-write, not transactional. Two writers that read the same version will both write the next one,
//! and the later write wins. See [`store::DatasetStore::put`].

#[cfg(feature = "supabase")]
pub mod supabase;

pub mod data_model;
pub mod local_storage;
pub mod memory;
pub mod store;
pub mod sync;

pub use data_model::{
    DatasetId, HistoryStack, MetaDocument, MetaPatch, RemoteChange, RemoteDocument, Snapshot,
    SubscriptionKey, SyncPhase, VersionStamp, VersionTracker,
};
pub use store::{DataSource, DatasetStore, StoreError};
pub use sync::{
    DatasetCache, LoadOutcome, LoadReport, RemoteApply, SaveReport, SyncController, SyncHooks,
    SyncStatus,
};
