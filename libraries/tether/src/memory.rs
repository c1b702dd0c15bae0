//! An in-process document store.
//!
//! [`MemoryRemote`] plays the role of the shared remote database, and each [`MemoryStore`] is one process (one browser tab)
//! connected to it with its own identity and its own subscriptions. This is what the tests use to stage several writers
//! against one store, and what the planner falls back to when it has nowhere to persist.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

use chrono::Utc;

use crate::data_model::{
    ChangeCallback, DatasetId, Listeners, MetaDocument, MetaPatch, RemoteChange, RemoteDocument,
    SubscriptionKey, VersionStamp,
};
use crate::store::{DataSource, DatasetStore, StoreError};

struct Backend<K> {
    documents: BTreeMap<K, RemoteDocument>,
    meta: Option<MetaDocument>,
    connections: Vec<Weak<RefCell<Listeners<K>>>>,
    offline: bool,
    failing_puts: BTreeSet<K>,
    puts: usize,
}

#[derive(Clone)]
pub struct MemoryRemote<K: DatasetId> {
    backend: Rc<RefCell<Backend<K>>>,
}

impl<K: DatasetId> Default for MemoryRemote<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: DatasetId> MemoryRemote<K> {
    pub fn new() -> Self {
        Self {
            backend: Rc::new(RefCell::new(Backend {
                documents: BTreeMap::new(),
                meta: None,
                connections: Vec::new(),
                offline: false,
                failing_puts: BTreeSet::new(),
                puts: 0,
            })),
        }
    }

    /// Open a connection that writes as `identity`.
    pub fn connect(&self, identity: impl Into<String>) -> MemoryStore<K> {
        let listeners = Rc::new(RefCell::new(Listeners::default()));
        {
            let mut backend = self.backend.borrow_mut();
            backend.connections.retain(|weak| weak.strong_count() > 0);
            backend.connections.push(Rc::downgrade(&listeners));
        }
        MemoryStore {
            backend: Rc::clone(&self.backend),
            listeners,
            identity: identity.into(),
        }
    }

    /// While offline every operation fails with [`StoreError::Offline`].
    pub fn set_offline(&self, offline: bool) {
        self.backend.borrow_mut().offline = offline;
    }

    /// Make every `put` of `key` fail with a network error until [`MemoryRemote::clear_failures`].
    pub fn fail_puts_for(&self, key: K) {
        self.backend.borrow_mut().failing_puts.insert(key);
    }

    pub fn clear_failures(&self) {
        let mut backend = self.backend.borrow_mut();
        backend.failing_puts.clear();
        backend.offline = false;
    }

    pub fn document(&self, key: K) -> Option<RemoteDocument> {
        self.backend.borrow().documents.get(&key).cloned()
    }

    pub fn meta(&self) -> Option<MetaDocument> {
        self.backend.borrow().meta.clone()
    }

    /// Number of successful dataset writes since creation.
    pub fn put_count(&self) -> usize {
        self.backend.borrow().puts
    }

    /// Deliver `change` to every subscriber of its dataset without touching the stored documents.
    /// Models a notification that arrives late or twice.
    pub fn redeliver(&self, change: RemoteChange<K>) {
        notify(&self.backend, change);
    }
}

pub struct MemoryStore<K: DatasetId> {
    backend: Rc<RefCell<Backend<K>>>,
    listeners: Rc<RefCell<Listeners<K>>>,
    identity: String,
}

impl<K: DatasetId> MemoryStore<K> {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.backend.borrow().offline {
            return Err(StoreError::Offline);
        }
        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

fn notify<K: DatasetId>(backend: &Rc<RefCell<Backend<K>>>, change: RemoteChange<K>) {
    // collect first, so no borrow is held while the callbacks run
    let callbacks: Vec<ChangeCallback<K>> = backend
        .borrow()
        .connections
        .iter()
        .filter_map(Weak::upgrade)
        .flat_map(|listeners| {
            let callbacks = listeners.borrow().callbacks_for(change.key);
            callbacks
        })
        .collect();

    for callback in callbacks {
        callback(change.clone());
    }
}

impl<K: DatasetId> DatasetStore<K> for MemoryStore<K> {
    async fn get(&self, key: K) -> Result<Option<RemoteDocument>, StoreError> {
        self.check_online()?;
        Ok(self.backend.borrow().documents.get(&key).cloned())
    }

    async fn put(&self, key: K, data: &serde_json::Value) -> Result<VersionStamp, StoreError> {
        self.check_online()?;
        if self.backend.borrow().failing_puts.contains(&key) {
            return Err(StoreError::Network(format!(
                "write of {} was rejected",
                key.as_str()
            )));
        }

        let current = self.get(key).await?;
        let document = RemoteDocument::next(current.as_ref(), data.clone(), &self.identity, Utc::now());
        {
            let mut backend = self.backend.borrow_mut();
            backend.documents.insert(key, document.clone());
            backend.puts += 1;
        }

        let stamp = document.stamp();
        notify(&self.backend, RemoteChange { key, document });
        Ok(stamp)
    }

    async fn get_meta(&self) -> Result<Option<MetaDocument>, StoreError> {
        self.check_online()?;
        Ok(self.backend.borrow().meta.clone())
    }

    async fn put_meta(&self, patch: MetaPatch) -> Result<(), StoreError> {
        self.check_online()?;
        self.backend
            .borrow_mut()
            .meta
            .get_or_insert_with(MetaDocument::default)
            .merge(patch);
        Ok(())
    }

    async fn claim_seed(&self) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut backend = self.backend.borrow_mut();
        if backend.meta.is_some() {
            return Ok(false);
        }
        backend.meta = Some(MetaDocument::claimed(&self.identity, Utc::now()));
        Ok(true)
    }

    fn subscribe(
        &self,
        key: K,
        callback: ChangeCallback<K>,
    ) -> Result<SubscriptionKey, StoreError> {
        self.check_online()?;
        Ok(self.listeners.borrow_mut().register(key, callback))
    }

    fn unsubscribe(&self, key: K) {
        self.listeners.borrow_mut().unregister(key);
    }

    fn unsubscribe_all(&self) {
        self.listeners.borrow_mut().clear();
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn source(&self) -> DataSource {
        DataSource::Memory
    }
}
