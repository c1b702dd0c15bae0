use serde_json::Value;

use crate::datasets::DatasetKey;
use crate::error::PlannerError;

fn has_fields(value: &Value, fields: &[&str]) -> bool {
    value
        .as_object()
        .is_some_and(|object| fields.iter().all(|field| object.contains_key(*field)))
}

fn every_item_has(value: &Value, fields: &[&str]) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().all(|item| has_fields(item, fields)))
}

fn array_field(value: &Value, field: &str) -> bool {
    value.get(field).is_some_and(Value::is_array)
}

/// A structural check of imported data. Only the fields the planner pages rely on are checked.
pub fn validate_import_schema(key: DatasetKey, value: &Value) -> bool {
    match key {
        DatasetKey::Guests => every_item_has(value, &["id", "name"]),
        DatasetKey::Characters => every_item_has(value, &["id", "name", "role"]),
        DatasetKey::Vendors => every_item_has(value, &["name", "type"]),
        DatasetKey::Menu => value.is_object() && array_field(value, "menuItems"),
        DatasetKey::Decor => has_fields(value, &["moodBoard", "shoppingList"]),
        DatasetKey::Schedule => value.is_object() && array_field(value, "timeline"),
        DatasetKey::Story => has_fields(value, &["title", "theMurder", "theMurderer"]),
        DatasetKey::Clues => every_item_has(value, &["id", "type", "text"]),
        DatasetKey::Packets => {
            every_item_has(value, &["character_id", "intro_profile", "envelopes"])
        }
        DatasetKey::Settings | DatasetKey::Roles | DatasetKey::PageNotes => true,
    }
}

/// Parse and validate the contents of an imported file.
pub fn parse_import(key: DatasetKey, text: &str) -> Result<Value, PlannerError> {
    let invalid = |reason: String| PlannerError::ImportSchemaInvalid {
        dataset: key.to_string(),
        reason,
    };

    if text.trim().is_empty() {
        return Err(invalid("file is empty".to_string()));
    }
    let value: Value =
        serde_json::from_str(text).map_err(|e| invalid(format!("failed to parse JSON: {e}")))?;
    if value.is_null() {
        return Err(invalid("file is empty".to_string()));
    }
    if !validate_import_schema(key, &value) {
        return Err(invalid("missing required fields".to_string()));
    }
    Ok(value)
}
