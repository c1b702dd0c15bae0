//! A [`DatasetStore`] backed by two Supabase (PostgREST) tables.
//!
//! ```sql
//! create table datasets (id text primary key, data jsonb not null, version bigint not null,
//!                        updated_at timestamptz not null, updated_by text not null);
//! create table meta (id text primary key, seeded boolean not null default false, seeded_at timestamptz,
//!                    seeded_by text, last_updated timestamptz, claimed_at timestamptz, claimed_by text);
//! ```
//!
//! There is no push channel. Subscribers hear about this process' own writes right away, and about everyone else's when
//! the host calls [`SupabaseStore::poll`].
use std::{cell::RefCell, collections::BTreeMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_model::{
    ChangeCallback, DatasetId, Listeners, MetaDocument, MetaPatch, RemoteChange, RemoteDocument,
    SubscriptionKey, VersionStamp,
};
use crate::store::{DataSource, DatasetStore, StoreError};

const META_ROW_ID: &str = "app";

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatasetRow {
    id: String,
    data: serde_json::Value,
    version: u64,
    updated_at: DateTime<Utc>,
    updated_by: String,
}

impl From<DatasetRow> for RemoteDocument {
    fn from(row: DatasetRow) -> Self {
        RemoteDocument {
            data: row.data,
            version: row.version,
            updated_at: row.updated_at,
            updated_by: row.updated_by,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetaRow {
    #[serde(default)]
    seeded: bool,
    #[serde(default)]
    seeded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    seeded_by: Option<String>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    claimed_by: Option<String>,
}

impl From<MetaRow> for MetaDocument {
    fn from(row: MetaRow) -> Self {
        MetaDocument {
            seeded: row.seeded,
            seeded_at: row.seeded_at,
            seeded_by: row.seeded_by,
            last_updated: row.last_updated,
            claimed_at: row.claimed_at,
            claimed_by: row.claimed_by,
        }
    }
}

/// The upsert body for a metadata patch. Columns the patch leaves unset are omitted so PostgREST keeps their stored values.
fn meta_patch_body(patch: &MetaPatch) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert("id".to_string(), META_ROW_ID.into());

    let MetaPatch {
        seeded,
        seeded_at,
        seeded_by,
        last_updated,
        claimed_at,
        claimed_by,
    } = patch;
    if let Some(seeded) = seeded {
        body.insert("seeded".to_string(), (*seeded).into());
    }
    let timestamps = [
        ("seeded_at", seeded_at),
        ("last_updated", last_updated),
        ("claimed_at", claimed_at),
    ];
    for (column, value) in timestamps {
        if let Some(value) = value {
            body.insert(column.to_string(), value.to_rfc3339().into());
        }
    }
    for (column, value) in [("seeded_by", seeded_by), ("claimed_by", claimed_by)] {
        if let Some(value) = value {
            body.insert(column.to_string(), value.clone().into());
        }
    }
    serde_json::Value::Object(body)
}

fn network_error(e: fetch_happen::Error) -> StoreError {
    StoreError::Network(format!("{e:?}"))
}

async fn check_response(
    response: fetch_happen::Response,
    what: &str,
) -> Result<fetch_happen::Response, StoreError> {
    if response.ok() {
        return Ok(response);
    }
    let status = u16::from(response.status());
    let body = response.text().await.unwrap_or_default();
    log::error!("{what} failed with status {status}: {body}");
    match status {
        401 | 403 => Err(StoreError::Auth(format!("{what}: {body}"))),
        _ => Err(StoreError::Status { status, body }),
    }
}

pub struct SupabaseStore<K: DatasetId> {
    config: SupabaseConfig,
    access_token: Option<String>,
    identity: String,
    listeners: RefCell<Listeners<K>>,
    /// The last version delivered to subscribers, per dataset.
    seen: RefCell<BTreeMap<K, u64>>,
}

impl<K: DatasetId> SupabaseStore<K> {
    pub fn new(config: SupabaseConfig, identity: impl Into<String>) -> Self {
        Self {
            config,
            access_token: None,
            identity: identity.into(),
            listeners: RefCell::new(Listeners::default()),
            seen: RefCell::new(BTreeMap::new()),
        }
    }

    /// Authenticate as a signed-in user instead of with the anon key.
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/v1/{path}", self.config.supabase_url)
    }

    fn bearer(&self) -> String {
        let token = self
            .access_token
            .as_deref()
            .unwrap_or(&self.config.supabase_anon_key);
        format!("Bearer {token}")
    }

    async fn fetch_rows<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        what: &str,
    ) -> Result<Vec<T>, StoreError> {
        let client = fetch_happen::Client;
        let response = client
            .get(self.url(path))
            .header("apikey", &self.config.supabase_anon_key)
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(network_error)?;
        let response = check_response(response, what).await?;

        let text = response.text().await.map_err(network_error)?;
        let rows = serde_json::from_str(&text)?;
        Ok(rows)
    }

    async fn upsert(
        &self,
        table: &str,
        body: &serde_json::Value,
        prefer: &str,
        what: &str,
    ) -> Result<fetch_happen::Response, StoreError> {
        let client = fetch_happen::Client;
        let response = client
            .post(self.url(table))
            .header("apikey", &self.config.supabase_anon_key)
            .header("Authorization", self.bearer())
            .header("Prefer", prefer)
            .json(body)
            .map_err(network_error)?
            .send()
            .await
            .map_err(network_error)?;
        check_response(response, what).await
    }

    /// Deliver `document` to the subscriber of `key` unless it has already seen this version.
    fn deliver(&self, key: K, document: RemoteDocument) {
        {
            let mut seen = self.seen.borrow_mut();
            if seen.get(&key) == Some(&document.version) {
                return;
            }
            seen.insert(key, document.version);
        }
        let callbacks = self.listeners.borrow().callbacks_for(key);
        for callback in callbacks {
            callback(RemoteChange {
                key,
                document: document.clone(),
            });
        }
    }

    /// Re-read every subscribed dataset and deliver the ones that changed since the last delivery.
    ///
    /// Returns how many changes were delivered.
    pub async fn poll(&self) -> Result<usize, StoreError> {
        let subscribed: Vec<K> = self.listeners.borrow().subscribed().collect();
        let mut delivered = 0;
        for key in subscribed {
            let Some(document) = self.get(key).await? else {
                continue;
            };
            let is_new = self.seen.borrow().get(&key) != Some(&document.version);
            if is_new {
                self.deliver(key, document);
                delivered += 1;
            }
        }
        if delivered > 0 {
            log::info!("Poll picked up {delivered} remote change(s)");
        }
        Ok(delivered)
    }
}

impl<K: DatasetId> DatasetStore<K> for SupabaseStore<K> {
    async fn get(&self, key: K) -> Result<Option<RemoteDocument>, StoreError> {
        let rows: Vec<DatasetRow> = self
            .fetch_rows(
                &format!("datasets?id=eq.{}&select=*", key.as_str()),
                "Reading dataset",
            )
            .await?;
        Ok(rows.into_iter().next().map(RemoteDocument::from))
    }

    async fn put(&self, key: K, data: &serde_json::Value) -> Result<VersionStamp, StoreError> {
        let current = self.get(key).await?;
        let document = RemoteDocument::next(current.as_ref(), data.clone(), &self.identity, Utc::now());
        let row = DatasetRow {
            id: key.as_str().to_string(),
            data: document.data.clone(),
            version: document.version,
            updated_at: document.updated_at,
            updated_by: document.updated_by.clone(),
        };
        let body = serde_json::to_value(&row)?;
        self.upsert(
            "datasets",
            &body,
            "resolution=merge-duplicates,return=minimal",
            "Writing dataset",
        )
        .await?;

        let stamp = document.stamp();
        self.deliver(key, document);
        Ok(stamp)
    }

    async fn get_meta(&self) -> Result<Option<MetaDocument>, StoreError> {
        let rows: Vec<MetaRow> = self
            .fetch_rows(&format!("meta?id=eq.{META_ROW_ID}&select=*"), "Reading meta")
            .await?;
        Ok(rows.into_iter().next().map(MetaDocument::from))
    }

    async fn put_meta(&self, patch: MetaPatch) -> Result<(), StoreError> {
        self.upsert(
            "meta",
            &meta_patch_body(&patch),
            "resolution=merge-duplicates,return=minimal",
            "Writing meta",
        )
        .await?;
        Ok(())
    }

    async fn claim_seed(&self) -> Result<bool, StoreError> {
        let claim = MetaDocument::claimed(&self.identity, Utc::now());
        let patch = MetaPatch {
            seeded: Some(claim.seeded),
            last_updated: claim.last_updated,
            claimed_at: claim.claimed_at,
            claimed_by: claim.claimed_by,
            ..Default::default()
        };
        let response = self
            .upsert(
                "meta",
                &meta_patch_body(&patch),
                "resolution=ignore-duplicates,return=representation",
                "Claiming seed",
            )
            .await?;

        // an ignored duplicate comes back as an empty array
        let text = response.text().await.map_err(network_error)?;
        let inserted: Vec<MetaRow> = serde_json::from_str(&text)?;
        Ok(!inserted.is_empty())
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
        self.seen.borrow_mut().clear();
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn source(&self) -> DataSource {
        DataSource::Supabase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meta_patch_body_only_has_set_columns() {
        let at = "2024-05-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let body = meta_patch_body(&MetaPatch::seeded("tab-a", at));

        assert_eq!(
            body,
            json!({
                "id": "app",
                "seeded": true,
                "seeded_at": at.to_rfc3339(),
                "last_updated": at.to_rfc3339(),
                "seeded_by": "tab-a",
            })
        );
    }

    #[test]
    fn test_rows_decode_from_postgrest() {
        let rows: Vec<DatasetRow> = serde_json::from_value(json!([{
            "id": "guests",
            "data": [{"id": "g1"}],
            "version": 4,
            "updated_at": "2024-05-01T12:00:00+00:00",
            "updated_by": "tab-b",
        }]))
        .unwrap();
        let document = RemoteDocument::from(rows.into_iter().next().unwrap());
        assert_eq!(document.version, 4);
        assert_eq!(document.updated_by, "tab-b");

        let meta: Vec<MetaRow> =
            serde_json::from_value(json!([{"id": "app", "seeded": true, "seeded_by": "tab-a"}]))
                .unwrap();
        let meta = MetaDocument::from(meta.into_iter().next().unwrap());
        assert!(meta.seeded);
        assert_eq!(meta.claimed_by, None);
    }
}
