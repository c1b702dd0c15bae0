//! The types shared by every part of the sync engine, numbered roughly from the wire up.

use std::fmt::Debug;
use std::hash::Hash;

#[path = "1-remote-document.rs"]
mod remote_document;
pub use remote_document::*;

#[path = "2-version-tracker.rs"]
mod version_tracker;
pub use version_tracker::*;

#[path = "3-listeners.rs"]
mod listeners;
pub use listeners::*;

#[path = "4-history.rs"]
mod history;
pub use history::*;

/// Identifies one independently-synchronized dataset.
///
/// The set of datasets is fixed at compile time, so implementors are normally fieldless enums.
pub trait DatasetId: Copy + Ord + Hash + Debug + 'static {
    /// Every dataset, in the order they should be loaded and saved.
    fn all() -> &'static [Self];

    /// The key the dataset is stored under remotely.
    fn as_str(&self) -> &'static str;

    fn from_key(key: &str) -> Option<Self> {
        Self::all().iter().copied().find(|id| id.as_str() == key)
    }
}

/// Per-dataset lifecycle as seen by the sync controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Unloaded,
    /// Fixture content is in the cache, the remote store has not been reconciled yet.
    Loading,
    /// Reconciled with the remote store and subscribed to its changes.
    Live,
}
