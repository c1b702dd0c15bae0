//! # HistoryStack
//! A bounded stack of snapshots taken before each mutation, used for undo. Never persisted.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

pub const HISTORY_CAPACITY: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<T> {
    pub captured_at: DateTime<Utc>,
    pub state: T,
}

#[derive(Clone, Debug)]
pub struct HistoryStack<T> {
    snapshots: VecDeque<Snapshot<T>>,
    capacity: usize,
}

impl<T> Default for HistoryStack<T> {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl<T> HistoryStack<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an already deep-copied state. Evicts the oldest snapshot when full.
    pub fn push(&mut self, state: T) {
        self.push_snapshot(Snapshot {
            captured_at: Utc::now(),
            state,
        });
    }

    pub fn push_snapshot(&mut self, snapshot: Snapshot<T>) {
        if self.snapshots.len() >= self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
        log::debug!("Action saved to history ({} entries)", self.snapshots.len());
    }

    pub fn pop(&mut self) -> Option<Snapshot<T>> {
        self.snapshots.pop_back()
    }

    pub fn peek(&self) -> Option<&Snapshot<T>> {
        self.snapshots.back()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}
