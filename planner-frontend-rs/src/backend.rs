use std::rc::Rc;

use tether::data_model::ChangeCallback;
use tether::local_storage::{KeyValueStorage, LocalStorageStore};
use tether::memory::{MemoryRemote, MemoryStore};
use tether::supabase::SupabaseStore;
use tether::{
    DataSource, DatasetStore, MetaDocument, MetaPatch, RemoteDocument, StoreError, SubscriptionKey,
    VersionStamp,
};

use crate::config::{BackendKind, PlannerConfig};
use crate::datasets::DatasetKey;

/// The store picked at startup. Everything downstream talks to it through [`DatasetStore`].
pub enum Backend {
    Memory(MemoryStore<DatasetKey>),
    LocalStorage(LocalStorageStore<DatasetKey>),
    Supabase(SupabaseStore<DatasetKey>),
}

impl Backend {
    pub fn from_config(config: &PlannerConfig) -> Result<Self, StoreError> {
        let identity = config.identity.clone();
        let backend = match (config.effective_backend(), &config.supabase) {
            (BackendKind::Supabase, Some(supabase)) => {
                let store = SupabaseStore::new(supabase.clone(), identity);
                let store = match &config.access_token {
                    Some(token) => store.with_access_token(token.clone()),
                    None => store,
                };
                Backend::Supabase(store)
            }
            (BackendKind::Memory, _) => Backend::Memory(MemoryRemote::new().connect(identity)),
            _ => Backend::LocalStorage(LocalStorageStore::new(browser_storage()?, identity)),
        };
        log::info!("Using {} backend", backend.source());
        Ok(backend)
    }

    /// Check the remote store for changes made elsewhere. Only Supabase needs this; the others deliver changes as they happen.
    pub async fn poll(&self) -> Result<usize, StoreError> {
        match self {
            Backend::Supabase(store) => store.poll().await,
            Backend::Memory(_) | Backend::LocalStorage(_) => Ok(0),
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn browser_storage() -> Result<Rc<dyn KeyValueStorage>, StoreError> {
    Ok(Rc::new(tether::local_storage::browser_local_storage()?))
}

#[cfg(not(target_arch = "wasm32"))]
fn browser_storage() -> Result<Rc<dyn KeyValueStorage>, StoreError> {
    log::warn!("No localStorage outside the browser, keeping data in memory");
    Ok(Rc::new(tether::local_storage::MemoryStorage::default()))
}

impl DatasetStore<DatasetKey> for Backend {
    async fn get(&self, key: DatasetKey) -> Result<Option<RemoteDocument>, StoreError> {
        match self {
            Backend::Memory(store) => store.get(key).await,
            Backend::LocalStorage(store) => store.get(key).await,
            Backend::Supabase(store) => store.get(key).await,
        }
    }

    async fn put(
        &self,
        key: DatasetKey,
        data: &serde_json::Value,
    ) -> Result<VersionStamp, StoreError> {
        match self {
            Backend::Memory(store) => store.put(key, data).await,
            Backend::LocalStorage(store) => store.put(key, data).await,
            Backend::Supabase(store) => store.put(key, data).await,
        }
    }

    async fn get_meta(&self) -> Result<Option<MetaDocument>, StoreError> {
        match self {
            Backend::Memory(store) => store.get_meta().await,
            Backend::LocalStorage(store) => store.get_meta().await,
            Backend::Supabase(store) => store.get_meta().await,
        }
    }

    async fn put_meta(&self, patch: MetaPatch) -> Result<(), StoreError> {
        match self {
            Backend::Memory(store) => store.put_meta(patch).await,
            Backend::LocalStorage(store) => store.put_meta(patch).await,
            Backend::Supabase(store) => store.put_meta(patch).await,
        }
    }

    async fn claim_seed(&self) -> Result<bool, StoreError> {
        match self {
            Backend::Memory(store) => store.claim_seed().await,
            Backend::LocalStorage(store) => store.claim_seed().await,
            Backend::Supabase(store) => store.claim_seed().await,
        }
    }

    fn subscribe(
        &self,
        key: DatasetKey,
        callback: ChangeCallback<DatasetKey>,
    ) -> Result<SubscriptionKey, StoreError> {
        match self {
            Backend::Memory(store) => store.subscribe(key, callback),
            Backend::LocalStorage(store) => store.subscribe(key, callback),
            Backend::Supabase(store) => store.subscribe(key, callback),
        }
    }

    fn unsubscribe(&self, key: DatasetKey) {
        match self {
            Backend::Memory(store) => store.unsubscribe(key),
            Backend::LocalStorage(store) => store.unsubscribe(key),
            Backend::Supabase(store) => store.unsubscribe(key),
        }
    }

    fn unsubscribe_all(&self) {
        match self {
            Backend::Memory(store) => store.unsubscribe_all(),
            Backend::LocalStorage(store) => store.unsubscribe_all(),
            Backend::Supabase(store) => store.unsubscribe_all(),
        }
    }

    fn identity(&self) -> &str {
        match self {
            Backend::Memory(store) => store.identity(),
            Backend::LocalStorage(store) => store.identity(),
            Backend::Supabase(store) => store.identity(),
        }
    }

    fn source(&self) -> DataSource {
        match self {
            Backend::Memory(store) => store.source(),
            Backend::LocalStorage(store) => store.source(),
            Backend::Supabase(store) => store.source(),
        }
    }
}
