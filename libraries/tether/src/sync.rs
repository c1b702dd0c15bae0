//! The sync controller: reconciles the in-memory cache with a [`DatasetStore`].
//!
//! The controller is cheap to clone; clones share the same state. Subscription callbacks hold only a weak reference to that
//! state, so dropping every controller handle also stops change delivery even if the store outlives it.
//!
//! Remember that all of this runs on a single-threaded event loop. Never hold a borrow across an `.await`, and never hold one
//! while calling into the store: stores may deliver change notifications synchronously from inside `put`.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_model::{
    ChangeCallback, DatasetId, MetaPatch, RemoteChange, SyncPhase, VersionStamp, VersionTracker,
};
use crate::store::{DataSource, DatasetStore, StoreError};

/// Where the controller reads the current value of a dataset from and writes accepted remote values to.
pub trait DatasetCache<K: DatasetId> {
    /// An owned copy of the dataset's current value.
    fn read(&self, key: K) -> serde_json::Value;

    fn write(&mut self, key: K, value: serde_json::Value);
}

/// UI callbacks. All of them default to doing nothing.
pub trait SyncHooks<K: DatasetId> {
    fn notify_save_start(&self, _key: K) {}

    fn notify_save_success(&self, _key: K, _stamp: VersionStamp) {}

    fn notify_save_error(&self, _key: K, _error: &StoreError) {}

    /// Called whenever the cache changed underneath the UI.
    fn render_current_page(&self) {}
}

impl<K: DatasetId> SyncHooks<K> for () {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    /// This process won the seeding claim and wrote the fixtures to the store.
    Seeded,
    /// The store already held data (or someone else is seeding it) and it was read into the cache.
    Loaded,
    /// The store could not be reached. The cache holds the fixtures.
    Unreachable,
}

#[derive(Debug)]
pub struct LoadReport<K> {
    pub outcome: LoadOutcome,
    /// Datasets whose cached value now comes from the store.
    pub loaded: Vec<K>,
    /// Datasets the seeding pass wrote.
    pub seeded: Vec<K>,
    pub failed: Vec<(K, StoreError)>,
    /// The error that stopped reconciliation before any dataset was touched.
    pub error: Option<StoreError>,
}

impl<K> LoadReport<K> {
    fn new() -> Self {
        Self {
            outcome: LoadOutcome::Loaded,
            loaded: Vec::new(),
            seeded: Vec::new(),
            failed: Vec::new(),
            error: None,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.failed.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteApply {
    Accepted,
    /// Not newer than what this process already has. The cache was left alone.
    Discarded,
}

#[derive(Debug)]
pub struct SaveReport<K> {
    pub saved: Vec<(K, VersionStamp)>,
    pub failed: Vec<(K, StoreError)>,
}

impl<K> Default for SaveReport<K> {
    fn default() -> Self {
        Self {
            saved: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<K> SaveReport<K> {
    pub fn all_saved(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub source: DataSource,
    pub seeded: bool,
    pub seeded_at: Option<DateTime<Utc>>,
    pub seeded_by: Option<String>,
    /// When this process last wrote to or accepted a value from the store.
    pub last_sync: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

struct SyncState<K: DatasetId> {
    tracker: VersionTracker<K>,
    phases: BTreeMap<K, SyncPhase>,
    defaults: BTreeMap<K, serde_json::Value>,
    last_sync: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// Saves started but not yet finished, per dataset.
    pending_saves: BTreeMap<K, usize>,
}

/// Counts a save of `key` as in flight until dropped.
struct PendingSave<'a, K: DatasetId> {
    state: &'a RefCell<SyncState<K>>,
    key: K,
}

impl<'a, K: DatasetId> PendingSave<'a, K> {
    fn start(state: &'a RefCell<SyncState<K>>, key: K) -> Self {
        *state.borrow_mut().pending_saves.entry(key).or_default() += 1;
        Self { state, key }
    }
}

impl<K: DatasetId> Drop for PendingSave<'_, K> {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        let remaining = state
            .pending_saves
            .get(&self.key)
            .map_or(0, |count| count.saturating_sub(1));
        if remaining == 0 {
            state.pending_saves.remove(&self.key);
        } else {
            state.pending_saves.insert(self.key, remaining);
        }
    }
}

struct Inner<K: DatasetId, S, C, H> {
    store: S,
    cache: Rc<RefCell<C>>,
    hooks: H,
    state: RefCell<SyncState<K>>,
}

pub struct SyncController<K: DatasetId, S, C, H> {
    inner: Rc<Inner<K, S, C, H>>,
}

impl<K: DatasetId, S, C, H> Clone for SyncController<K, S, C, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, S, C, H> Inner<K, S, C, H>
where
    K: DatasetId,
    S: DatasetStore<K>,
    C: DatasetCache<K>,
    H: SyncHooks<K>,
{
    fn apply_remote_change(&self, change: RemoteChange<K>) -> RemoteApply {
        let RemoteChange { key, document } = change;
        let own_write = document.updated_by == self.store.identity();

        let (accepted, overtaken) = {
            let mut state = self.state.borrow_mut();
            if state
                .tracker
                .should_accept(key, document.version, document.updated_at)
            {
                state
                    .tracker
                    .record(key, document.version, document.updated_at);
                state.last_sync = Some(Utc::now());
                // another save of this dataset is still running, so the cache already holds something newer
                let overtaken =
                    own_write && state.pending_saves.get(&key).copied().unwrap_or(0) > 1;
                (true, overtaken)
            } else {
                (false, false)
            }
        };

        if !accepted {
            log::debug!(
                "Discarding stale update for {} (v{} from {})",
                key.as_str(),
                document.version,
                document.updated_by
            );
            return RemoteApply::Discarded;
        }

        if overtaken {
            log::debug!(
                "Recorded own write of {} v{}, keeping the newer local edit",
                key.as_str(),
                document.version
            );
            return RemoteApply::Accepted;
        }

        log::info!(
            "Received {} v{} from {}",
            key.as_str(),
            document.version,
            document.updated_by
        );
        self.cache.borrow_mut().write(key, document.data);
        self.hooks.render_current_page();
        RemoteApply::Accepted
    }

    fn set_phase(&self, key: K, phase: SyncPhase) {
        self.state.borrow_mut().phases.insert(key, phase);
    }
}

impl<K, S, C, H> SyncController<K, S, C, H>
where
    K: DatasetId,
    S: DatasetStore<K> + 'static,
    C: DatasetCache<K> + 'static,
    H: SyncHooks<K> + 'static,
{
    pub fn new(store: S, cache: Rc<RefCell<C>>, hooks: H) -> Self {
        Self {
            inner: Rc::new(Inner {
                store,
                cache,
                hooks,
                state: RefCell::new(SyncState {
                    tracker: VersionTracker::default(),
                    phases: BTreeMap::new(),
                    defaults: BTreeMap::new(),
                    last_sync: None,
                    last_error: None,
                    pending_saves: BTreeMap::new(),
                }),
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn cache(&self) -> &Rc<RefCell<C>> {
        &self.inner.cache
    }

    pub fn hooks(&self) -> &H {
        &self.inner.hooks
    }

    /// Put `fixtures` into the cache and render them, reconcile with the store (seeding it if this process is the first to
    /// arrive), then subscribe to every dataset and render again.
    ///
    /// Never fails: whatever the store could not provide stays at its fixture value and is listed in the report.
    pub async fn load(
        &self,
        fixtures: impl IntoIterator<Item = (K, serde_json::Value)>,
    ) -> LoadReport<K> {
        let fixtures: BTreeMap<K, serde_json::Value> = fixtures.into_iter().collect();
        {
            let mut cache = self.inner.cache.borrow_mut();
            for (key, value) in &fixtures {
                cache.write(*key, value.clone());
            }
        }
        self.inner.hooks.render_current_page();
        {
            let mut state = self.inner.state.borrow_mut();
            state.defaults = fixtures;
            for key in K::all() {
                state.phases.insert(*key, SyncPhase::Loading);
            }
        }
        log::info!(
            "Loading {} datasets from {}",
            K::all().len(),
            self.inner.store.source()
        );

        let mut report = LoadReport::new();
        match self.reconcile(&mut report).await {
            Ok(outcome) => report.outcome = outcome,
            Err(e) => {
                log::error!("Could not reach the store, keeping bundled data: {e}");
                self.inner.state.borrow_mut().last_error = Some(e.to_string());
                report.outcome = LoadOutcome::Unreachable;
                report.error = Some(e);
            }
        }

        for key in K::all() {
            match self.subscribe(*key) {
                Ok(()) => self.inner.set_phase(*key, SyncPhase::Live),
                Err(e) => {
                    log::error!("Failed to subscribe to {}: {e}", key.as_str());
                    report.failed.push((*key, e));
                }
            }
        }

        self.inner.hooks.render_current_page();
        report
    }

    async fn reconcile(&self, report: &mut LoadReport<K>) -> Result<LoadOutcome, StoreError> {
        let store = &self.inner.store;
        let meta = store.get_meta().await?;
        let seeded = meta.as_ref().is_some_and(|meta| meta.seeded);

        if !seeded {
            if store.claim_seed().await? {
                self.seed(report).await?;
                return Ok(LoadOutcome::Seeded);
            }
            let claimed_by = meta
                .as_ref()
                .and_then(|meta| meta.claimed_by.clone())
                .unwrap_or_else(|| "another process".to_string());
            log::warn!("Store is being seeded by {claimed_by}, loading whatever is there");
        }

        self.pull_all(report).await;
        Ok(LoadOutcome::Loaded)
    }

    async fn seed(&self, report: &mut LoadReport<K>) -> Result<(), StoreError> {
        let defaults = self.defaults();
        log::info!("Seeding store with {} datasets", defaults.len());

        for (key, value) in defaults {
            match self.inner.store.put(key, &value).await {
                Ok(stamp) => {
                    self.inner
                        .state
                        .borrow_mut()
                        .tracker
                        .record(key, stamp.version, stamp.updated_at);
                    report.seeded.push(key);
                }
                Err(e) => {
                    log::error!("Failed to seed {}: {e}", key.as_str());
                    report.failed.push((key, e));
                }
            }
        }

        if !report.failed.is_empty() {
            log::error!(
                "Seeding incomplete ({} failed), leaving the store unmarked",
                report.failed.len()
            );
            return Ok(());
        }

        let now = Utc::now();
        self.inner
            .store
            .put_meta(MetaPatch::seeded(self.inner.store.identity(), now))
            .await?;
        self.inner.state.borrow_mut().last_sync = Some(now);
        log::info!("Store seeded");
        Ok(())
    }

    /// Read every dataset and overwrite the cache with whatever the store has.
    async fn pull_all(&self, report: &mut LoadReport<K>) {
        for key in K::all() {
            match self.inner.store.get(*key).await {
                Ok(Some(document)) => {
                    {
                        let mut state = self.inner.state.borrow_mut();
                        state
                            .tracker
                            .record(*key, document.version, document.updated_at);
                        state.last_sync = Some(Utc::now());
                    }
                    self.inner.cache.borrow_mut().write(*key, document.data);
                    report.loaded.push(*key);
                }
                Ok(None) => {
                    log::warn!("{} is missing from the store, keeping bundled data", key.as_str());
                }
                Err(e) => {
                    log::error!("Failed to load {}: {e}", key.as_str());
                    report.failed.push((*key, e));
                }
            }
        }
    }

    fn subscribe(&self, key: K) -> Result<(), StoreError> {
        let weak: Weak<Inner<K, S, C, H>> = Rc::downgrade(&self.inner);
        let callback: ChangeCallback<K> = Rc::new(move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_remote_change(change);
            }
        });
        self.inner.store.subscribe(key, callback)?;
        Ok(())
    }

    /// Run a change notification through the version tracker, and into the cache if it is newer than what we have.
    pub fn apply_remote_change(&self, change: RemoteChange<K>) -> RemoteApply {
        self.inner.apply_remote_change(change)
    }

    /// Push the cached value of `key` to the store.
    ///
    /// The cache is the source of truth for this process: a failed save leaves it as it is, and the failure is only reported.
    /// While a later save of the same dataset is in flight, this save's own change notification updates the tracker but
    /// not the cache.
    pub async fn save(&self, key: K) -> Result<VersionStamp, StoreError> {
        let data = self.inner.cache.borrow().read(key);
        self.inner.hooks.notify_save_start(key);

        let pending = PendingSave::start(&self.inner.state, key);
        let result = self.inner.store.put(key, &data).await;
        drop(pending);

        match result {
            Ok(stamp) => {
                {
                    let mut state = self.inner.state.borrow_mut();
                    state.tracker.record(key, stamp.version, stamp.updated_at);
                    state.last_sync = Some(stamp.updated_at);
                    state.last_error = None;
                }
                log::info!("Saved {} v{}", key.as_str(), stamp.version);
                self.inner.hooks.notify_save_success(key, stamp);
                Ok(stamp)
            }
            Err(e) => {
                log::error!("Failed to save {}: {e}", key.as_str());
                self.inner.state.borrow_mut().last_error = Some(e.to_string());
                self.inner.hooks.notify_save_error(key, &e);
                Err(e)
            }
        }
    }

    /// Save every key in `keys`, attempting all of them even if some fail.
    pub async fn save_many(&self, keys: impl IntoIterator<Item = K>) -> SaveReport<K> {
        let keys: Vec<K> = keys.into_iter().collect();
        let results = futures::future::join_all(keys.iter().map(|key| self.save(*key))).await;

        let mut report = SaveReport::default();
        for (key, result) in keys.into_iter().zip(results) {
            match result {
                Ok(stamp) => report.saved.push((key, stamp)),
                Err(e) => report.failed.push((key, e)),
            }
        }
        report
    }

    /// Forget local versions and overwrite the cache with whatever the store holds now.
    pub async fn reload_from_remote(&self) -> LoadReport<K> {
        log::info!("Reloading every dataset from {}", self.inner.store.source());
        self.inner.state.borrow_mut().tracker.clear();

        let mut report = LoadReport::new();
        self.pull_all(&mut report).await;
        if report.loaded.is_empty() && !report.failed.is_empty() {
            report.outcome = LoadOutcome::Unreachable;
        }
        self.inner.hooks.render_current_page();
        report
    }

    /// Owned copies of the fixtures passed to [`SyncController::load`].
    pub fn defaults(&self) -> BTreeMap<K, serde_json::Value> {
        self.inner.state.borrow().defaults.clone()
    }

    pub fn default_for(&self, key: K) -> Option<serde_json::Value> {
        self.inner.state.borrow().defaults.get(&key).cloned()
    }

    pub async fn status(&self) -> SyncStatus {
        let (last_sync, last_error) = {
            let state = self.inner.state.borrow();
            (state.last_sync, state.last_error.clone())
        };
        let mut status = SyncStatus {
            source: self.inner.store.source(),
            seeded: false,
            seeded_at: None,
            seeded_by: None,
            last_sync,
            error: last_error,
        };
        match self.inner.store.get_meta().await {
            Ok(Some(meta)) => {
                status.seeded = meta.seeded;
                status.seeded_at = meta.seeded_at;
                status.seeded_by = meta.seeded_by;
            }
            Ok(None) => {}
            Err(e) => status.error = Some(e.to_string()),
        }
        status
    }

    pub fn phase(&self, key: K) -> SyncPhase {
        self.inner
            .state
            .borrow()
            .phases
            .get(&key)
            .copied()
            .unwrap_or_default()
    }

    /// A read-only view of the version tracker. Drop it before awaiting anything.
    pub fn tracker(&self) -> Ref<'_, VersionTracker<K>> {
        Ref::map(self.inner.state.borrow(), |state| &state.tracker)
    }

    /// Cancel every subscription. A later [`SyncController::load`] starts over.
    pub fn shutdown(&self) {
        self.inner.store.unsubscribe_all();
        let mut state = self.inner.state.borrow_mut();
        state.tracker.clear();
        state.phases.clear();
        log::info!("Sync controller shut down");
    }
}
