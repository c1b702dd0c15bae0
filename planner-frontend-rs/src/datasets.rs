use std::fmt;
use std::str::FromStr;

use enumap::EnuMap;
use serde::{Deserialize, Serialize};
use tether::DatasetId;

use crate::error::PlannerError;

/// Every dataset the planner keeps. Each one is stored and synced as a single document.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnuMap,
    Serialize,
    Deserialize,
    tsify::Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub enum DatasetKey {
    Guests,
    Characters,
    Decor,
    Vendors,
    Menu,
    Schedule,
    Story,
    Clues,
    Packets,
    Settings,
    Roles,
    PageNotes,
}

impl DatasetKey {
    /// The datasets captured by the undo history. `characters`, `vendors` and `roles` are not.
    pub const EDITABLE: [DatasetKey; 9] = [
        DatasetKey::Guests,
        DatasetKey::Decor,
        DatasetKey::Menu,
        DatasetKey::Schedule,
        DatasetKey::Story,
        DatasetKey::Clues,
        DatasetKey::Packets,
        DatasetKey::Settings,
        DatasetKey::PageNotes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKey::Guests => "guests",
            DatasetKey::Characters => "characters",
            DatasetKey::Decor => "decor",
            DatasetKey::Vendors => "vendors",
            DatasetKey::Menu => "menu",
            DatasetKey::Schedule => "schedule",
            DatasetKey::Story => "story",
            DatasetKey::Clues => "clues",
            DatasetKey::Packets => "packets",
            DatasetKey::Settings => "settings",
            DatasetKey::Roles => "roles",
            DatasetKey::PageNotes => "pageNotes",
        }
    }

    /// Path of the bundled default, relative to the page.
    pub fn fixture_file(self) -> String {
        format!("data/{}.json", self.as_str())
    }

    pub fn is_editable(self) -> bool {
        Self::EDITABLE.contains(&self)
    }

    /// What the dataset looks like when there is nothing in it.
    pub fn empty_value(self) -> serde_json::Value {
        match self {
            DatasetKey::Guests
            | DatasetKey::Characters
            | DatasetKey::Vendors
            | DatasetKey::Clues
            | DatasetKey::Packets => serde_json::Value::Array(Vec::new()),
            DatasetKey::Decor
            | DatasetKey::Menu
            | DatasetKey::Schedule
            | DatasetKey::Story
            | DatasetKey::Settings
            | DatasetKey::Roles
            | DatasetKey::PageNotes => serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

impl DatasetId for DatasetKey {
    fn all() -> &'static [Self] {
        &DatasetKey::ALL
    }

    fn as_str(&self) -> &'static str {
        DatasetKey::as_str(*self)
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKey {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <DatasetKey as DatasetId>::from_key(s)
            .ok_or_else(|| PlannerError::UnknownDataset(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_round_trip_through_strings() {
        for key in DatasetKey::ALL {
            assert_eq!(key.as_str().parse::<DatasetKey>().unwrap(), key);
            assert_eq!(
                serde_json::to_value(key).unwrap(),
                serde_json::Value::String(key.to_string())
            );
        }
        assert_eq!(DatasetKey::PageNotes.fixture_file(), "data/pageNotes.json");
        assert!(matches!(
            "page_notes".parse::<DatasetKey>(),
            Err(PlannerError::UnknownDataset(_))
        ));
    }

    #[test]
    fn test_editable_subset() {
        assert!(DatasetKey::Settings.is_editable());
        assert!(!DatasetKey::Characters.is_editable());
        assert!(!DatasetKey::Vendors.is_editable());
        assert!(!DatasetKey::Roles.is_editable());
    }
}
