//! Where the list of items lives inside each dataset, and generic item edits on top of that.

use serde_json::Value;

use crate::datasets::DatasetKey;
use crate::error::PlannerError;

/// The location of an item list within a dataset's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemShape {
    /// The dataset is itself an array of items.
    TopLevel,
    /// The items are the array under this field of the dataset object.
    Nested(&'static str),
}

impl DatasetKey {
    /// The item list generic edits address by default, or `None` for datasets that are not collections.
    pub fn item_shape(self) -> Option<ItemShape> {
        match self {
            DatasetKey::Guests
            | DatasetKey::Characters
            | DatasetKey::Vendors
            | DatasetKey::Clues
            | DatasetKey::Packets => Some(ItemShape::TopLevel),
            DatasetKey::Menu => Some(ItemShape::Nested("menuItems")),
            DatasetKey::Schedule => Some(ItemShape::Nested("timeline")),
            DatasetKey::Decor => Some(ItemShape::Nested("moodBoard")),
            DatasetKey::Story | DatasetKey::Settings | DatasetKey::Roles | DatasetKey::PageNotes => {
                None
            }
        }
    }

    pub(crate) fn require_shape(self) -> Result<ItemShape, PlannerError> {
        self.item_shape().ok_or_else(|| PlannerError::NotAList {
            dataset: self.to_string(),
        })
    }
}

/// The item list named by `list`, or the dataset's default list when `list` is `None`.
pub fn resolve_shape(key: DatasetKey, list: Option<&str>) -> Result<ItemShape, PlannerError> {
    let default = key.require_shape()?;
    match (list, default) {
        (None, shape) => Ok(shape),
        (Some(list), ItemShape::Nested(field)) if list == field => Ok(default),
        (Some("shoppingList"), _) if key == DatasetKey::Decor => {
            Ok(ItemShape::Nested("shoppingList"))
        }
        _ => Err(PlannerError::NotAList {
            dataset: format!("{key}.{}", list.unwrap_or_default()),
        }),
    }
}

pub fn items_mut<'a>(
    key: DatasetKey,
    value: &'a mut Value,
    shape: ItemShape,
) -> Result<&'a mut Vec<Value>, PlannerError> {
    let list = match shape {
        ItemShape::TopLevel => Some(value),
        ItemShape::Nested(field) => value.get_mut(field),
    };
    match list {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(PlannerError::NotAList {
            dataset: key.to_string(),
        }),
    }
}

fn has_id(item: &Value, id: &str) -> bool {
    match item.get("id") {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

pub fn add_item(
    key: DatasetKey,
    value: &mut Value,
    shape: ItemShape,
    item: Value,
) -> Result<(), PlannerError> {
    items_mut(key, value, shape)?.push(item);
    Ok(())
}

/// Shallow-merge the fields of `updates` into the item whose `id` is `id`.
pub fn update_item(
    key: DatasetKey,
    value: &mut Value,
    shape: ItemShape,
    id: &str,
    updates: &Value,
) -> Result<(), PlannerError> {
    let items = items_mut(key, value, shape)?;
    let not_found = || PlannerError::ItemNotFound {
        dataset: key.to_string(),
        id: id.to_string(),
    };
    let item = items
        .iter_mut()
        .find(|item| has_id(item, id))
        .ok_or_else(not_found)?;

    let Value::Object(fields) = item else {
        return Err(not_found());
    };
    if let Value::Object(updates) = updates {
        for (field, update) in updates {
            fields.insert(field.clone(), update.clone());
        }
    }
    Ok(())
}

/// Remove every item whose `id` is `id`. Returns how many were removed.
pub fn delete_item(
    key: DatasetKey,
    value: &mut Value,
    shape: ItemShape,
    id: &str,
) -> Result<usize, PlannerError> {
    let items = items_mut(key, value, shape)?;
    let before = items.len();
    items.retain(|item| !has_id(item, id));
    let removed = before - items.len();
    if removed == 0 {
        return Err(PlannerError::ItemNotFound {
            dataset: key.to_string(),
            id: id.to_string(),
        });
    }
    Ok(removed)
}
