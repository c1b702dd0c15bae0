use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use chrono::{DateTime, TimeZone, Utc};
use futures::FutureExt;
use futures::executor::block_on;
use serde_json::{Value, json};
use tether::data_model::ChangeCallback;
use tether::local_storage::{LocalStorageStore, MemoryStorage};
use tether::memory::{MemoryRemote, MemoryStore};
use tether::{
    DataSource, DatasetCache, DatasetId, DatasetStore, LoadOutcome, MetaDocument, MetaPatch,
    RemoteApply, RemoteChange, RemoteDocument, StoreError, SubscriptionKey, SyncController,
    SyncHooks, SyncPhase, VersionStamp,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Key {
    Guests,
    Menu,
    PageNotes,
}

impl DatasetId for Key {
    fn all() -> &'static [Self] {
        &[Key::Guests, Key::Menu, Key::PageNotes]
    }

    fn as_str(&self) -> &'static str {
        match self {
            Key::Guests => "guests",
            Key::Menu => "menu",
            Key::PageNotes => "pageNotes",
        }
    }
}

#[derive(Default)]
struct Cache(BTreeMap<Key, Value>);

impl DatasetCache<Key> for Cache {
    fn read(&self, key: Key) -> Value {
        self.0.get(&key).cloned().unwrap_or(Value::Null)
    }

    fn write(&mut self, key: Key, value: Value) {
        self.0.insert(key, value);
    }
}

#[derive(Clone, Default)]
struct Renders(Rc<Cell<usize>>);

impl SyncHooks<Key> for Renders {
    fn render_current_page(&self) {
        self.0.set(self.0.get() + 1);
    }
}

type Controller<S> = SyncController<Key, S, Cache, Renders>;

fn fixtures() -> Vec<(Key, Value)> {
    vec![
        (Key::Guests, json!([{"id": "g1", "name": "Colonel Mustard"}])),
        (Key::Menu, json!({"menuItems": [{"id": "m1", "name": "Punch"}]})),
        (Key::PageNotes, json!({})),
    ]
}

fn tab(
    remote: &MemoryRemote<Key>,
    name: &str,
) -> (Controller<MemoryStore<Key>>, Rc<RefCell<Cache>>, Renders) {
    let cache = Rc::new(RefCell::new(Cache::default()));
    let renders = Renders::default();
    let controller = SyncController::new(remote.connect(name), Rc::clone(&cache), renders.clone());
    (controller, cache, renders)
}

/// Returns `Pending` once (waking itself straight away), so whatever else the executor is polling gets a turn.
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            return Poll::Ready(());
        }
        self.0 = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// A connection whose writes take a moment: every `put` yields before it reaches the store. One chosen `put` call can be
/// made to fail, and `get_meta` can be made to never answer.
struct Staged {
    inner: MemoryStore<Key>,
    puts: Cell<usize>,
    fail_put: Cell<Option<usize>>,
    stall_meta: Cell<bool>,
}

impl Staged {
    fn new(inner: MemoryStore<Key>) -> Self {
        Self {
            inner,
            puts: Cell::new(0),
            fail_put: Cell::new(None),
            stall_meta: Cell::new(false),
        }
    }

    /// Make the `put` after the next one fail.
    fn fail_second_put_from_now(&self) {
        self.fail_put.set(Some(self.puts.get() + 1));
    }
}

impl DatasetStore<Key> for Staged {
    async fn get(&self, key: Key) -> Result<Option<RemoteDocument>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: Key, data: &Value) -> Result<VersionStamp, StoreError> {
        let call = self.puts.get();
        self.puts.set(call + 1);
        YieldOnce(false).await;
        if self.fail_put.get() == Some(call) {
            return Err(StoreError::Network("connection reset".to_string()));
        }
        self.inner.put(key, data).await
    }

    async fn get_meta(&self) -> Result<Option<MetaDocument>, StoreError> {
        if self.stall_meta.get() {
            futures::future::pending::<()>().await;
        }
        self.inner.get_meta().await
    }

    async fn put_meta(&self, patch: MetaPatch) -> Result<(), StoreError> {
        self.inner.put_meta(patch).await
    }

    async fn claim_seed(&self) -> Result<bool, StoreError> {
        self.inner.claim_seed().await
    }

    fn subscribe(
        &self,
        key: Key,
        callback: ChangeCallback<Key>,
    ) -> Result<SubscriptionKey, StoreError> {
        self.inner.subscribe(key, callback)
    }

    fn unsubscribe(&self, key: Key) {
        self.inner.unsubscribe(key);
    }

    fn unsubscribe_all(&self) {
        self.inner.unsubscribe_all();
    }

    fn identity(&self) -> &str {
        self.inner.identity()
    }

    fn source(&self) -> DataSource {
        self.inner.source()
    }
}

fn staged_tab(
    remote: &MemoryRemote<Key>,
    name: &str,
) -> (Controller<Staged>, Rc<RefCell<Cache>>, Renders) {
    let cache = Rc::new(RefCell::new(Cache::default()));
    let renders = Renders::default();
    let store = Staged::new(remote.connect(name));
    let controller = SyncController::new(store, Rc::clone(&cache), renders.clone());
    (controller, cache, renders)
}

/// A fixed instant well after anything the seeding pass stamps with `Utc::now()`.
fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(4_000_000_000 + seconds, 0).unwrap()
}

#[test]
fn test_fresh_store_is_seeded_from_fixtures() {
    let _ = env_logger::builder().is_test(true).try_init();
    let remote = MemoryRemote::new();
    let (controller, cache, renders) = tab(&remote, "tab-a");

    let report = block_on(controller.load(fixtures()));

    assert_eq!(report.outcome, LoadOutcome::Seeded);
    assert!(report.is_clean());
    assert_eq!(report.seeded, vec![Key::Guests, Key::Menu, Key::PageNotes]);
    // once for the fixtures, once after reconciling
    assert_eq!(renders.0.get(), 2);

    for (key, value) in fixtures() {
        let document = remote.document(key).unwrap();
        assert_eq!(document.version, 1);
        assert_eq!(document.updated_by, "tab-a");
        assert_eq!(document.data, value);
        assert_eq!(cache.borrow().read(key), value);
        assert_eq!(controller.phase(key), SyncPhase::Live);
        assert_eq!(controller.tracker().tracked(key).unwrap().version, 1);
    }

    let meta = remote.meta().unwrap();
    assert!(meta.seeded);
    assert_eq!(meta.seeded_by.as_deref(), Some("tab-a"));
    assert!(meta.seeded_at.is_some());
}

#[test]
fn test_seeding_happens_once() {
    let remote = MemoryRemote::new();
    let (first, _, _) = tab(&remote, "tab-a");
    block_on(first.load(fixtures()));
    let writes_after_seed = remote.put_count();

    // tab-a edits the guest list before tab-b arrives
    block_on(
        remote
            .connect("tab-a")
            .put(Key::Guests, &json!([{"id": "g2", "name": "Mrs. Peacock"}])),
    )
    .unwrap();

    let (second, cache, _) = tab(&remote, "tab-b");
    let report = block_on(second.load(fixtures()));

    assert_eq!(report.outcome, LoadOutcome::Loaded);
    assert!(report.seeded.is_empty());
    assert_eq!(remote.put_count(), writes_after_seed + 1);
    assert_eq!(remote.meta().unwrap().seeded_by.as_deref(), Some("tab-a"));
    assert_eq!(
        cache.borrow().read(Key::Guests),
        json!([{"id": "g2", "name": "Mrs. Peacock"}])
    );
    assert_eq!(second.tracker().tracked(Key::Guests).unwrap().version, 2);
}

#[test]
fn test_stale_push_is_discarded() {
    let remote = MemoryRemote::new();
    let (controller, cache, _) = tab(&remote, "tab-a");
    block_on(controller.load(fixtures()));

    let change = |version, seconds, name: &str| RemoteChange {
        key: Key::Guests,
        document: RemoteDocument {
            data: json!([{"id": "g1", "name": name}]),
            version,
            updated_at: at(seconds),
            updated_by: "tab-b".to_string(),
        },
    };

    // seeding left us at v1, bring the tracker to v2 at t=50
    assert_eq!(
        controller.apply_remote_change(change(2, 50, "Professor Plum")),
        RemoteApply::Accepted
    );

    remote.redeliver(change(3, 100, "Miss Scarlet"));
    assert_eq!(cache.borrow().read(Key::Guests)[0]["name"], "Miss Scarlet");

    remote.redeliver(change(2, 90, "Reverend Green"));
    assert_eq!(cache.borrow().read(Key::Guests)[0]["name"], "Miss Scarlet");

    let tracked = controller.tracker().tracked(Key::Guests).unwrap();
    assert_eq!(tracked.version, 3);
    assert_eq!(tracked.updated_at, at(100));
}

#[test]
fn test_newer_version_with_older_timestamp_is_discarded() {
    let remote = MemoryRemote::new();
    let (controller, cache, _) = tab(&remote, "tab-a");
    block_on(controller.load(fixtures()));
    let tracked = controller.tracker().tracked(Key::Menu).unwrap();

    let outcome = controller.apply_remote_change(RemoteChange {
        key: Key::Menu,
        document: RemoteDocument {
            data: json!({"menuItems": []}),
            version: tracked.version + 1,
            updated_at: tracked.updated_at - chrono::Duration::seconds(30),
            updated_by: "tab-b".to_string(),
        },
    });

    assert_eq!(outcome, RemoteApply::Discarded);
    assert_eq!(
        cache.borrow().read(Key::Menu),
        json!({"menuItems": [{"id": "m1", "name": "Punch"}]})
    );
}

#[test]
fn test_edits_reach_the_other_tab() {
    let remote = MemoryRemote::new();
    let (a, a_cache, _) = tab(&remote, "tab-a");
    let (b, b_cache, b_renders) = tab(&remote, "tab-b");
    block_on(a.load(fixtures()));
    block_on(b.load(fixtures()));
    let renders_after_load = b_renders.0.get();

    a_cache
        .borrow_mut()
        .write(Key::Menu, json!({"menuItems": [{"id": "m2", "name": "Cake"}]}));
    let stamp = block_on(a.save(Key::Menu)).unwrap();

    assert_eq!(stamp.version, 2);
    assert_eq!(
        b_cache.borrow().read(Key::Menu),
        json!({"menuItems": [{"id": "m2", "name": "Cake"}]})
    );
    assert_eq!(b.tracker().tracked(Key::Menu).unwrap(), stamp);
    assert_eq!(b_renders.0.get(), renders_after_load + 1);
}

#[test]
fn test_unfinished_seed_claim_loads_what_exists() {
    let remote = MemoryRemote::new();
    let claimer = remote.connect("tab-a");
    assert!(block_on(claimer.claim_seed()).unwrap());
    block_on(claimer.put(Key::Guests, &json!([]))).unwrap();

    let (controller, cache, _) = tab(&remote, "tab-b");
    let report = block_on(controller.load(fixtures()));

    assert_eq!(report.outcome, LoadOutcome::Loaded);
    assert_eq!(report.loaded, vec![Key::Guests]);
    assert_eq!(cache.borrow().read(Key::Guests), json!([]));
    // not written remotely yet, so the fixture stays
    assert_eq!(cache.borrow().read(Key::PageNotes), json!({}));
    assert!(!remote.meta().unwrap().seeded);
}

#[test]
fn test_partial_save_failure_is_reported() {
    let remote = MemoryRemote::new();
    let (controller, _, _) = tab(&remote, "tab-a");
    block_on(controller.load(fixtures()));

    remote.fail_puts_for(Key::Menu);
    let report = block_on(controller.save_many(Key::all().iter().copied()));

    assert!(!report.all_saved());
    assert_eq!(report.saved.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, Key::Menu);
    assert!(report.failed[0].1.is_network_or_auth());
}

#[test]
fn test_local_storage_backend_round_trip() {
    let storage = MemoryStorage::default();
    {
        let cache = Rc::new(RefCell::new(Cache::default()));
        let store = LocalStorageStore::new(Rc::new(storage.clone()), "local");
        let controller = SyncController::new(store, Rc::clone(&cache), ());
        assert_eq!(block_on(controller.load(fixtures())).outcome, LoadOutcome::Seeded);

        cache.borrow_mut().write(Key::PageNotes, json!({"guests": "Seat the butler last"}));
        block_on(controller.save(Key::PageNotes)).unwrap();
    }

    let cache = Rc::new(RefCell::new(Cache::default()));
    let store = LocalStorageStore::new(Rc::new(storage), "local");
    let controller = SyncController::new(store, Rc::clone(&cache), ());
    let report = block_on(controller.load(fixtures()));

    assert_eq!(report.outcome, LoadOutcome::Loaded);
    assert_eq!(
        cache.borrow().read(Key::PageNotes),
        json!({"guests": "Seat the butler last"})
    );
    assert_eq!(controller.tracker().tracked(Key::PageNotes).unwrap().version, 2);
}

#[test]
fn test_shutdown_stops_delivery() {
    let remote = MemoryRemote::new();
    let (controller, cache, _) = tab(&remote, "tab-a");
    block_on(controller.load(fixtures()));
    controller.shutdown();

    block_on(remote.connect("tab-b").put(Key::Guests, &json!([]))).unwrap();
    assert_eq!(
        cache.borrow().read(Key::Guests),
        json!([{"id": "g1", "name": "Colonel Mustard"}])
    );
    assert_eq!(controller.phase(Key::Guests), SyncPhase::Unloaded);
}

#[test]
fn test_fixtures_render_before_the_store_answers() {
    let remote = MemoryRemote::new();
    let (controller, cache, renders) = staged_tab(&remote, "tab-a");
    controller.store().stall_meta.set(true);

    assert!(controller.load(fixtures()).now_or_never().is_none());

    assert_eq!(renders.0.get(), 1);
    assert_eq!(
        cache.borrow().read(Key::Guests),
        json!([{"id": "g1", "name": "Colonel Mustard"}])
    );
    assert_eq!(controller.phase(Key::Guests), SyncPhase::Loading);
}

#[test]
fn test_slow_save_does_not_undo_a_newer_edit() {
    let _ = env_logger::builder().is_test(true).try_init();
    let remote = MemoryRemote::new();
    let (controller, cache, _) = staged_tab(&remote, "tab-a");
    block_on(controller.load(fixtures()));

    cache.borrow_mut().write(Key::Guests, json!(["A", "X"]));
    controller.store().fail_second_put_from_now();

    // the second edit lands in the cache while the first save is still on its way
    let first = controller.save(Key::Guests);
    let second = async {
        cache.borrow_mut().write(Key::Guests, json!(["A", "X", "Y"]));
        controller.save(Key::Guests).await
    };
    let (first, second) = block_on(futures::future::join(first, second));

    assert_eq!(first.unwrap().version, 2);
    assert!(second.is_err());
    assert_eq!(cache.borrow().read(Key::Guests), json!(["A", "X", "Y"]));
    assert_eq!(remote.document(Key::Guests).unwrap().data, json!(["A", "X"]));
    assert_eq!(controller.tracker().tracked(Key::Guests).unwrap().version, 2);

    // retrying pushes the edit that was kept
    let stamp = block_on(controller.save(Key::Guests)).unwrap();
    assert_eq!(stamp.version, 3);
    assert_eq!(remote.document(Key::Guests).unwrap().data, json!(["A", "X", "Y"]));
    assert_eq!(cache.borrow().read(Key::Guests), json!(["A", "X", "Y"]));
}

#[test]
fn test_overlapping_saves_end_on_the_latest_edit() {
    let remote = MemoryRemote::new();
    let (controller, cache, _) = staged_tab(&remote, "tab-a");
    let (other, other_cache, _) = tab(&remote, "tab-b");
    block_on(controller.load(fixtures()));
    block_on(other.load(fixtures()));

    cache.borrow_mut().write(Key::Menu, json!({"menuItems": ["tea"]}));
    let first = controller.save(Key::Menu);
    let second = async {
        cache.borrow_mut().write(Key::Menu, json!({"menuItems": ["tea", "scones"]}));
        controller.save(Key::Menu).await
    };
    let (first, second) = block_on(futures::future::join(first, second));

    assert_eq!(first.unwrap().version, 2);
    assert_eq!(second.unwrap().version, 3);
    let latest = json!({"menuItems": ["tea", "scones"]});
    assert_eq!(cache.borrow().read(Key::Menu), latest);
    assert_eq!(remote.document(Key::Menu).unwrap().data, latest);
    assert_eq!(other_cache.borrow().read(Key::Menu), latest);
}
