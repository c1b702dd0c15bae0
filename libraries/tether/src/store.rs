//! The capability interface every backend implements, so the sync controller never needs to know which one it is talking to.

use crate::data_model::{
    ChangeCallback, DatasetId, MetaDocument, MetaPatch, RemoteDocument, SubscriptionKey,
    VersionStamp,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not authorized: {0}")]
    Auth(String),

    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Store is offline")]
    Offline,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this is one of the network/auth failures that are surfaced to the user and not retried.
    pub fn is_network_or_auth(&self) -> bool {
        !matches!(self, StoreError::Serialization(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DataSource {
    Memory,
    LocalStorage,
    Supabase,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Memory => write!(f, "Memory"),
            DataSource::LocalStorage => write!(f, "Local"),
            DataSource::Supabase => write!(f, "Supabase"),
        }
    }
}

/// A versioned document store holding one document per dataset plus a metadata document.
///
/// Implementations are single-threaded (they live on the page's event loop), hence no `Send` bounds.
#[allow(async_fn_in_trait)]
pub trait DatasetStore<K: DatasetId> {
    /// `None` if the dataset has never been written.
    async fn get(&self, key: K) -> Result<Option<RemoteDocument>, StoreError>;

    /// Read the current version (0 if absent), then write `version + 1` stamped with now and [`DatasetStore::identity`].
    ///
    /// The read and the write are separate operations. Two processes that read the same version both write the same
    /// next version and the later write silently wins. Nothing here pretends otherwise.
    async fn put(&self, key: K, data: &serde_json::Value) -> Result<VersionStamp, StoreError>;

    async fn get_meta(&self) -> Result<Option<MetaDocument>, StoreError>;

    /// Merge `patch` into the metadata document, creating it if needed.
    async fn put_meta(&self, patch: MetaPatch) -> Result<(), StoreError>;

    /// Atomically create the metadata document as a seeding claim.
    ///
    /// Returns `true` only for the caller that created it. If any metadata document already exists, nothing is written.
    async fn claim_seed(&self) -> Result<bool, StoreError>;

    /// Register `callback` for changes to `key`, including this process' own writes.
    /// Any earlier subscription for the same key is cancelled first.
    fn subscribe(
        &self,
        key: K,
        callback: ChangeCallback<K>,
    ) -> Result<SubscriptionKey, StoreError>;

    fn unsubscribe(&self, key: K);

    fn unsubscribe_all(&self);

    /// Who writes through this store (recorded as `updatedBy` / `seededBy`).
    fn identity(&self) -> &str;

    fn source(&self) -> DataSource;
}
