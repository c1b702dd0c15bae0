//! # Listeners
//! Change subscriptions, at most one live subscription per dataset per process.

use std::collections::BTreeMap;
use std::rc::Rc;

use slotmap::SlotMap;

use crate::data_model::RemoteChange;

slotmap::new_key_type! {
    pub struct SubscriptionKey;
}

pub type ChangeCallback<K> = Rc<dyn Fn(RemoteChange<K>)>;

pub struct Listeners<K> {
    callbacks: SlotMap<SubscriptionKey, (K, ChangeCallback<K>)>,
    by_dataset: BTreeMap<K, SubscriptionKey>,
}

impl<K> Default for Listeners<K> {
    fn default() -> Self {
        Self {
            callbacks: SlotMap::with_key(),
            by_dataset: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy + std::fmt::Debug> Listeners<K> {
    /// Register a callback for `key`, cancelling whatever was registered for it before.
    pub fn register(&mut self, key: K, callback: ChangeCallback<K>) -> SubscriptionKey {
        if self.unregister(key) {
            log::info!("Replaced existing subscription for {key:?}");
        }
        let subscription = self.callbacks.insert((key, callback));
        self.by_dataset.insert(key, subscription);
        subscription
    }

    /// Returns whether there was a subscription to cancel.
    pub fn unregister(&mut self, key: K) -> bool {
        match self.by_dataset.remove(&key) {
            Some(subscription) => self.callbacks.remove(subscription).is_some(),
            None => false,
        }
    }

    pub fn unregister_subscription(&mut self, subscription: SubscriptionKey) -> bool {
        let Some((key, _)) = self.callbacks.remove(subscription) else {
            return false;
        };
        self.by_dataset.remove(&key);
        true
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
        self.by_dataset.clear();
    }

    /// Clone out the callbacks interested in `key`.
    ///
    /// Callers must drop any `RefCell` borrow guarding `self` before invoking them, as callbacks are free to call back into the store.
    pub fn callbacks_for(&self, key: K) -> Vec<ChangeCallback<K>> {
        self.by_dataset
            .get(&key)
            .and_then(|subscription| self.callbacks.get(*subscription))
            .map(|(_, callback)| vec![Rc::clone(callback)])
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, key: K) -> bool {
        self.by_dataset.contains_key(&key)
    }

    pub fn subscribed(&self) -> impl Iterator<Item = K> + '_ {
        self.by_dataset.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}
