use std::collections::BTreeMap;

use serde_json::Value;
use tether::DatasetCache;

use crate::datasets::{DatasetKey, DatasetKeyMap};

/// Deep copies of the editable datasets, as captured before a mutation.
pub type EditableSnapshot = BTreeMap<DatasetKey, Value>;

/// The in-memory copy of every dataset. Pages read from here. Edits land here first and are pushed afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct AppData {
    datasets: DatasetKeyMap<Value>,
}

impl Default for AppData {
    fn default() -> Self {
        Self {
            datasets: DatasetKeyMap::from_fn(DatasetKey::empty_value),
        }
    }
}

impl AppData {
    pub fn get(&self, key: DatasetKey) -> &Value {
        self.datasets.get(&key)
    }

    pub fn get_mut(&mut self, key: DatasetKey) -> &mut Value {
        self.datasets.get_mut(&key)
    }

    /// Replace a dataset, returning the old value.
    pub fn replace(&mut self, key: DatasetKey, value: Value) -> Value {
        self.datasets.set(&key, value)
    }

    pub fn snapshot(&self) -> EditableSnapshot {
        DatasetKey::EDITABLE
            .into_iter()
            .map(|key| (key, self.get(key).clone()))
            .collect()
    }

    /// Put back every dataset held by `snapshot`. Returns the keys that were restored.
    pub fn restore(&mut self, snapshot: EditableSnapshot) -> Vec<DatasetKey> {
        snapshot
            .into_iter()
            .map(|(key, value)| {
                self.replace(key, value);
                key
            })
            .collect()
    }

    /// The whole cache as one JSON object keyed by dataset name.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.datasets
                .iter()
                .map(|(key, value)| (key.as_str().to_string(), value.clone()))
                .collect(),
        )
    }
}

impl DatasetCache<DatasetKey> for AppData {
    fn read(&self, key: DatasetKey) -> Value {
        self.get(key).clone()
    }

    fn write(&mut self, key: DatasetKey, value: Value) {
        self.replace(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_covers_only_editable_datasets() {
        let data = AppData::default();
        let snapshot = data.snapshot();
        assert_eq!(snapshot.len(), DatasetKey::EDITABLE.len());
        assert!(!snapshot.contains_key(&DatasetKey::Roles));
        assert_eq!(snapshot[&DatasetKey::Guests], json!([]));
        assert_eq!(snapshot[&DatasetKey::Menu], json!({}));
    }

    #[test]
    fn test_restore_is_not_aliased() {
        let mut data = AppData::default();
        data.replace(DatasetKey::Guests, json!([{"id": "g1"}]));
        data.replace(DatasetKey::Roles, json!({"assignments": {"g1": "c1"}}));
        let snapshot = data.snapshot();

        data.get_mut(DatasetKey::Guests)
            .as_array_mut()
            .unwrap()
            .push(json!({"id": "g2"}));
        data.replace(DatasetKey::Roles, json!({}));

        let restored = data.restore(snapshot);
        assert_eq!(restored.len(), DatasetKey::EDITABLE.len());
        assert_eq!(data.get(DatasetKey::Guests), &json!([{"id": "g1"}]));
        // roles are outside the history and keep their latest value
        assert_eq!(data.get(DatasetKey::Roles), &json!({}));
    }
}
