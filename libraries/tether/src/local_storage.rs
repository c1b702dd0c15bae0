//! The local-storage fallback, used when no remote store is configured.
//!
//! All datasets live in a single JSON blob under [`LOCAL_STORAGE_KEY`]. Every write reads the whole blob, replaces one
//! dataset and writes the whole blob back. Subscriptions only see writes made by this process; on the web other tabs
//! are told about writes through a `BroadcastChannel` and are expected to reload.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::data_model::{
    ChangeCallback, DatasetId, Listeners, MetaDocument, MetaPatch, RemoteChange, RemoteDocument,
    SubscriptionKey, VersionStamp,
};
use crate::store::{DataSource, DatasetStore, StoreError};

pub const LOCAL_STORAGE_KEY: &str = "appData";
pub const BROADCAST_CHANNEL_NAME: &str = "planner-local-sync";

/// The subset of the Web Storage API this backend needs.
pub trait KeyValueStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}

#[cfg(target_arch = "wasm32")]
impl KeyValueStorage for web_sys::Storage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        web_sys::Storage::get_item(self, key).map_err(|e| StoreError::Storage(format!("{e:?}")))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        web_sys::Storage::set_item(self, key, value)
            .map_err(|e| StoreError::Storage(format!("{e:?}")))
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        web_sys::Storage::remove_item(self, key).map_err(|e| StoreError::Storage(format!("{e:?}")))
    }
}

/// `window.localStorage`.
#[cfg(target_arch = "wasm32")]
pub fn browser_local_storage() -> Result<web_sys::Storage, StoreError> {
    let window = web_sys::window().ok_or_else(|| StoreError::Storage("no window".to_string()))?;
    window
        .local_storage()
        .map_err(|e| StoreError::Storage(format!("{e:?}")))?
        .ok_or_else(|| StoreError::Storage("localStorage is unavailable".to_string()))
}

/// Storage that forgets everything when dropped. Clones share the same items.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    items: Rc<RefCell<BTreeMap<String, String>>>,
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.items.borrow_mut().remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<MetaDocument>,
    #[serde(default)]
    datasets: BTreeMap<String, RemoteDocument>,
}

impl LocalBlob {
    /// Parse the stored blob, accepting the older layout where datasets sat directly at the top level without versions.
    fn parse<K: DatasetId>(text: &str) -> Result<Self, serde_json::Error> {
        Self::parse_with(text, |name| K::from_key(name).is_some())
    }

    /// Like [`LocalBlob::parse`], but a legacy blob's top-level entries are kept when `is_dataset` accepts their name.
    fn parse_with(
        text: &str,
        is_dataset: impl Fn(&str) -> bool,
    ) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let is_current_layout = value
            .as_object()
            .is_some_and(|object| object.contains_key("datasets") || object.contains_key("meta"));
        if is_current_layout {
            return serde_json::from_value(value);
        }

        let serde_json::Value::Object(object) = value else {
            return Ok(LocalBlob::default());
        };

        let now = Utc::now();
        let datasets: BTreeMap<String, RemoteDocument> = object
            .into_iter()
            .filter(|(name, _)| is_dataset(name))
            .map(|(name, data)| {
                let document = RemoteDocument {
                    data,
                    version: 1,
                    updated_at: now,
                    updated_by: "local".to_string(),
                };
                (name, document)
            })
            .collect();
        log::info!(
            "Upgrading legacy local data blob with {} dataset(s)",
            datasets.len()
        );

        let meta = (!datasets.is_empty()).then(|| MetaDocument {
            seeded: true,
            seeded_at: Some(now),
            seeded_by: Some("local".to_string()),
            last_updated: Some(now),
            ..Default::default()
        });
        Ok(LocalBlob { meta, datasets })
    }
}

/// What an exported blob holds, without the dataset contents.
#[derive(Debug)]
pub struct BlobSummary {
    pub meta: Option<MetaDocument>,
    pub datasets: Vec<DatasetSummary>,
}

#[derive(Debug)]
pub struct DatasetSummary {
    pub key: String,
    pub version: u64,
    pub updated_at: chrono::DateTime<Utc>,
    pub updated_by: String,
    /// Size of the serialized `data`.
    pub bytes: usize,
}

/// Summarize a blob as written by [`LocalStorageStore`].
///
/// A legacy unversioned blob is summarized as it would be upgraded on first read: every top-level entry becomes a v1
/// dataset written by `local`.
pub fn summarize_blob(text: &str) -> Result<BlobSummary, serde_json::Error> {
    let blob = LocalBlob::parse_with(text, |_| true)?;
    let datasets = blob
        .datasets
        .into_iter()
        .map(|(key, document)| {
            Ok(DatasetSummary {
                bytes: serde_json::to_string(&document.data)?.len(),
                key,
                version: document.version,
                updated_at: document.updated_at,
                updated_by: document.updated_by,
            })
        })
        .collect::<Result<Vec<_>, serde_json::Error>>()?;
    Ok(BlobSummary {
        meta: blob.meta,
        datasets,
    })
}

pub struct LocalStorageStore<K: DatasetId> {
    storage: Rc<dyn KeyValueStorage>,
    storage_key: String,
    listeners: RefCell<Listeners<K>>,
    identity: String,
}

impl<K: DatasetId> LocalStorageStore<K> {
    pub fn new(storage: Rc<dyn KeyValueStorage>, identity: impl Into<String>) -> Self {
        Self::with_key(storage, LOCAL_STORAGE_KEY, identity)
    }

    pub fn with_key(
        storage: Rc<dyn KeyValueStorage>,
        storage_key: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            storage_key: storage_key.into(),
            listeners: RefCell::new(Listeners::default()),
            identity: identity.into(),
        }
    }

    fn read_blob(&self) -> Result<LocalBlob, StoreError> {
        let Some(text) = self.storage.get_item(&self.storage_key)? else {
            return Ok(LocalBlob::default());
        };
        match LocalBlob::parse::<K>(&text) {
            Ok(blob) => Ok(blob),
            Err(e) => {
                log::error!(
                    "Local data under {} is unreadable, starting from empty: {e}",
                    self.storage_key
                );
                Ok(LocalBlob::default())
            }
        }
    }

    fn write_blob(&self, blob: &LocalBlob) -> Result<(), StoreError> {
        let text = serde_json::to_string(blob)?;
        self.storage.set_item(&self.storage_key, &text)
    }

    /// Remove everything this store has written.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.storage.remove_item(&self.storage_key)
    }

    fn notify(&self, change: RemoteChange<K>) {
        let callbacks = self.listeners.borrow().callbacks_for(change.key);
        for callback in callbacks {
            callback(change.clone());
        }
    }

    #[cfg(target_arch = "wasm32")]
    fn broadcast_write(&self, key: K) {
        match web_sys::BroadcastChannel::new(BROADCAST_CHANNEL_NAME) {
            Ok(channel) => {
                let message = js_sys::Object::new();
                let set_type =
                    js_sys::Reflect::set(&message, &"type".into(), &"dataset-written".into());
                let set_dataset =
                    js_sys::Reflect::set(&message, &"dataset".into(), &key.as_str().into());
                if set_type.is_err() || set_dataset.is_err() {
                    log::error!("Failed to build dataset-written message for {}", key.as_str());
                    return;
                }
                if let Err(e) = channel.post_message(&message) {
                    log::error!("Failed to post dataset-written message: {e:?}");
                }
                channel.close();
            }
            Err(e) => {
                log::error!("Failed to create BroadcastChannel: {e:?}");
            }
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn broadcast_write(&self, _key: K) {}
}

impl<K: DatasetId> DatasetStore<K> for LocalStorageStore<K> {
    async fn get(&self, key: K) -> Result<Option<RemoteDocument>, StoreError> {
        let mut blob = self.read_blob()?;
        Ok(blob.datasets.remove(key.as_str()))
    }

    async fn put(&self, key: K, data: &serde_json::Value) -> Result<VersionStamp, StoreError> {
        let mut blob = self.read_blob()?;
        let document = RemoteDocument::next(
            blob.datasets.get(key.as_str()),
            data.clone(),
            &self.identity,
            Utc::now(),
        );
        blob.datasets
            .insert(key.as_str().to_string(), document.clone());
        if let Some(meta) = blob.meta.as_mut() {
            meta.last_updated = Some(document.updated_at);
        }
        self.write_blob(&blob)?;

        let stamp = document.stamp();
        self.notify(RemoteChange { key, document });
        self.broadcast_write(key);
        Ok(stamp)
    }

    async fn get_meta(&self) -> Result<Option<MetaDocument>, StoreError> {
        Ok(self.read_blob()?.meta)
    }

    async fn put_meta(&self, patch: MetaPatch) -> Result<(), StoreError> {
        let mut blob = self.read_blob()?;
        blob.meta
            .get_or_insert_with(MetaDocument::default)
            .merge(patch);
        self.write_blob(&blob)
    }

    async fn claim_seed(&self) -> Result<bool, StoreError> {
        // localStorage writes are synchronous, so nothing can interleave between this read and write
        let mut blob = self.read_blob()?;
        if blob.meta.is_some() {
            return Ok(false);
        }
        blob.meta = Some(MetaDocument::claimed(&self.identity, Utc::now()));
        self.write_blob(&blob)?;
        Ok(true)
    }

    fn subscribe(
        &self,
        key: K,
        callback: ChangeCallback<K>,
    ) -> Result<SubscriptionKey, StoreError> {
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
        DataSource::LocalStorage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::test_ids::TestId;
    use futures::executor::block_on;
    use serde_json::json;

    fn store(storage: &MemoryStorage) -> LocalStorageStore<TestId> {
        LocalStorageStore::new(Rc::new(storage.clone()), "tester")
    }

    #[test]
    fn test_all_datasets_share_one_blob() {
        let storage = MemoryStorage::default();
        let store = store(&storage);

        block_on(async {
            store.put(TestId::Guests, &json!([{"id": "g1"}])).await.unwrap();
            store.put(TestId::Menu, &json!({"menuItems": []})).await.unwrap();
        });

        let raw = storage.get_item(LOCAL_STORAGE_KEY).unwrap().unwrap();
        let blob: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(blob["datasets"]["guests"]["version"], 1);
        assert_eq!(blob["datasets"]["menu"]["data"], json!({"menuItems": []}));
    }

    #[test]
    fn test_state_survives_a_new_session() {
        let storage = MemoryStorage::default();
        block_on(async {
            let first = store(&storage);
            assert!(first.claim_seed().await.unwrap());
            first.put(TestId::Guests, &json!(["a"])).await.unwrap();
            first.put(TestId::Guests, &json!(["a", "b"])).await.unwrap();

            let second = store(&storage);
            assert!(!second.claim_seed().await.unwrap());
            let doc = second.get(TestId::Guests).await.unwrap().unwrap();
            assert_eq!(doc.version, 2);
            assert_eq!(doc.data, json!(["a", "b"]));
        });
    }

    #[test]
    fn test_meta_patch_merges() {
        let storage = MemoryStorage::default();
        let store = store(&storage);
        block_on(async {
            assert!(store.claim_seed().await.unwrap());
            store
                .put_meta(MetaPatch::seeded("tester", Utc::now()))
                .await
                .unwrap();
            let meta = store.get_meta().await.unwrap().unwrap();
            assert!(meta.seeded);
            assert_eq!(meta.claimed_by.as_deref(), Some("tester"));
        });
    }

    #[test]
    fn test_legacy_blob_is_upgraded() {
        let storage = MemoryStorage::default();
        storage
            .set_item(
                LOCAL_STORAGE_KEY,
                r#"{"guests": [{"id": "g1", "name": "Audrey"}], "decorFavorites": []}"#,
            )
            .unwrap();
        let store = store(&storage);

        block_on(async {
            let meta = store.get_meta().await.unwrap().unwrap();
            assert!(meta.seeded);
            let guests = store.get(TestId::Guests).await.unwrap().unwrap();
            assert_eq!(guests.data[0]["name"], "Audrey");
            assert_eq!(store.get(TestId::Menu).await.unwrap(), None);
        });
    }

    #[test]
    fn test_summary_lists_versions() {
        let storage = MemoryStorage::default();
        let store = store(&storage);
        block_on(async {
            store.put(TestId::Menu, &json!({"menuItems": []})).await.unwrap();
            store.put(TestId::Menu, &json!({"menuItems": [1]})).await.unwrap();
        });

        let raw = storage.get_item(LOCAL_STORAGE_KEY).unwrap().unwrap();
        let summary = summarize_blob(&raw).unwrap();
        assert!(summary.meta.is_none());
        assert_eq!(summary.datasets.len(), 1);
        assert_eq!(summary.datasets[0].key, "menu");
        assert_eq!(summary.datasets[0].version, 2);
        assert_eq!(summary.datasets[0].bytes, r#"{"menuItems":[1]}"#.len());
    }

    #[test]
    fn test_summary_of_legacy_blob() {
        let raw = r#"{"guests": [{"id": "g1"}], "decorFavorites": ["candles"]}"#;

        let summary = summarize_blob(raw).unwrap();

        let meta = summary.meta.unwrap();
        assert!(meta.seeded);
        assert_eq!(meta.seeded_by.as_deref(), Some("local"));
        let keys: Vec<&str> = summary.datasets.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["decorFavorites", "guests"]);
        assert!(summary.datasets.iter().all(|d| d.version == 1 && d.updated_by == "local"));
        assert_eq!(summary.datasets[1].bytes, r#"[{"id":"g1"}]"#.len());
    }

    #[test]
    fn test_corrupt_blob_reads_as_empty() {
        let storage = MemoryStorage::default();
        storage.set_item(LOCAL_STORAGE_KEY, "{not json").unwrap();
        let store = store(&storage);

        block_on(async {
            assert_eq!(store.get_meta().await.unwrap(), None);
            assert_eq!(store.get(TestId::Guests).await.unwrap(), None);
        });
    }
}
