//! The planner's state for one page: the cache, the sync controller and the undo history, bundled so they can be passed
//! around explicitly.
//!
//! Every edit follows the same steps: capture the editable datasets, apply the edit to the cache, push the capture onto the
//! history (only if the edit succeeded), then write the changed datasets to the store. A failed write never undoes the edit.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::Utc;
use serde_json::Value;
use tether::{
    DatasetStore, HistoryStack, LoadReport, SaveReport, SyncController, SyncHooks, SyncStatus,
    VersionStamp,
};

use crate::app_data::{AppData, EditableSnapshot};
use crate::datasets::DatasetKey;
use crate::error::PlannerError;
use crate::fixtures::Fixtures;
use crate::import::parse_import;
use crate::shape::{self, ItemShape};
use crate::utils::note_timestamp;

/// The user's answer to an "are you sure?" prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

impl From<bool> for Confirmation {
    fn from(confirmed: bool) -> Self {
        if confirmed {
            Confirmation::Confirmed
        } else {
            Confirmation::Declined
        }
    }
}

impl Confirmation {
    fn require(self) -> Result<(), PlannerError> {
        match self {
            Confirmation::Confirmed => Ok(()),
            Confirmation::Declined => {
                log::info!("Cancelled by user");
                Err(PlannerError::Cancelled)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetTarget {
    All,
    Dataset(DatasetKey),
}

impl ResetTarget {
    fn keys(self) -> Vec<DatasetKey> {
        match self {
            ResetTarget::All => DatasetKey::ALL.to_vec(),
            ResetTarget::Dataset(key) => vec![key],
        }
    }
}

#[derive(Debug)]
pub struct UndoReport {
    pub restored: Vec<DatasetKey>,
    pub save: SaveReport<DatasetKey>,
}

impl UndoReport {
    /// The cache was restored but at least one dataset could not be written back.
    pub fn is_partial(&self) -> bool {
        !self.save.all_saved()
    }
}

pub type PlannerController<S, H> = SyncController<DatasetKey, S, AppData, H>;

pub struct Session<S, H>
where
    S: DatasetStore<DatasetKey> + 'static,
    H: SyncHooks<DatasetKey> + 'static,
{
    data: Rc<RefCell<AppData>>,
    controller: PlannerController<S, H>,
    history: RefCell<HistoryStack<EditableSnapshot>>,
}

impl<S, H> Session<S, H>
where
    S: DatasetStore<DatasetKey> + 'static,
    H: SyncHooks<DatasetKey> + 'static,
{
    pub fn new(store: S, hooks: H) -> Self {
        Self::with_history(store, hooks, HistoryStack::default())
    }

    pub fn with_history(store: S, hooks: H, history: HistoryStack<EditableSnapshot>) -> Self {
        let data = Rc::new(RefCell::new(AppData::default()));
        let controller = SyncController::new(store, Rc::clone(&data), hooks);
        Self {
            data,
            controller,
            history: RefCell::new(history),
        }
    }

    pub fn controller(&self) -> &PlannerController<S, H> {
        &self.controller
    }

    /// Show the fixtures right away, then reconcile with the store.
    pub async fn load(&self, fixtures: &Fixtures) -> LoadReport<DatasetKey> {
        self.controller.load(fixtures.entries()).await
    }

    /// An owned copy of the dataset's current value.
    pub fn dataset(&self, key: DatasetKey) -> Value {
        self.data.borrow().get(key).clone()
    }

    pub fn data(&self) -> AppData {
        self.data.borrow().clone()
    }

    pub fn can_undo(&self) -> bool {
        !self.history.borrow().is_empty()
    }

    pub fn history_len(&self) -> usize {
        self.history.borrow().len()
    }

    /// Apply `edit` to the cache, recording the prior state in the history if it succeeds.
    fn edit<T>(
        &self,
        edit: impl FnOnce(&mut AppData) -> Result<T, PlannerError>,
    ) -> Result<T, PlannerError> {
        let before = self.data.borrow().snapshot();
        let result = edit(&mut *self.data.borrow_mut())?;
        self.history.borrow_mut().push(before);
        Ok(result)
    }

    fn is_rehearsal(&self) -> bool {
        self.data
            .borrow()
            .get(DatasetKey::Settings)
            .get("rehearsalMode")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    async fn save(&self, key: DatasetKey) -> Result<VersionStamp, PlannerError> {
        Ok(self.controller.save(key).await?)
    }

    pub async fn add_item(
        &self,
        key: DatasetKey,
        list: ItemShape,
        item: Value,
    ) -> Result<VersionStamp, PlannerError> {
        self.edit(|data| shape::add_item(key, data.get_mut(key), list, item))?;
        self.save(key).await
    }

    pub async fn update_item(
        &self,
        key: DatasetKey,
        list: ItemShape,
        id: &str,
        updates: &Value,
    ) -> Result<VersionStamp, PlannerError> {
        self.edit(|data| shape::update_item(key, data.get_mut(key), list, id, updates))?;
        self.save(key).await
    }

    pub async fn delete_item(
        &self,
        key: DatasetKey,
        list: ItemShape,
        id: &str,
        confirmation: Confirmation,
    ) -> Result<VersionStamp, PlannerError> {
        confirmation.require()?;
        self.edit(|data| shape::delete_item(key, data.get_mut(key), list, id))?;
        self.save(key).await
    }

    pub async fn replace_dataset(
        &self,
        key: DatasetKey,
        value: Value,
    ) -> Result<VersionStamp, PlannerError> {
        self.edit(|data| {
            data.replace(key, value);
            Ok(())
        })?;
        self.save(key).await
    }

    /// Validate the text of an imported file and, only if it is valid, replace the dataset with it.
    pub async fn import_dataset(
        &self,
        key: DatasetKey,
        text: &str,
    ) -> Result<VersionStamp, PlannerError> {
        let value = parse_import(key, text).inspect_err(|e| {
            log::warn!("Rejected import: {e}");
        })?;
        self.replace_dataset(key, value).await
    }

    /// Put the bundled defaults back. Datasets without a default are left alone.
    pub async fn reset_to_defaults(
        &self,
        target: ResetTarget,
        confirmation: Confirmation,
    ) -> Result<SaveReport<DatasetKey>, PlannerError> {
        confirmation.require()?;

        let defaults: Vec<(DatasetKey, Value)> = target
            .keys()
            .into_iter()
            .filter_map(|key| Some((key, self.controller.default_for(key)?)))
            .collect();
        let keys: Vec<DatasetKey> = defaults.iter().map(|(key, _)| *key).collect();

        self.edit(|data| {
            for (key, value) in defaults {
                data.replace(key, value);
            }
            Ok(())
        })?;
        log::info!("Reset {} dataset(s) to defaults", keys.len());
        Ok(self.controller.save_many(keys).await)
    }

    /// Restore the most recent history entry and write every restored dataset back.
    pub async fn undo(&self) -> Result<UndoReport, PlannerError> {
        let snapshot = self
            .history
            .borrow_mut()
            .pop()
            .ok_or(PlannerError::NothingToUndo)?;

        let restored = self.data.borrow_mut().restore(snapshot.state);
        let save = self.controller.save_many(restored.iter().copied()).await;
        self.controller.hooks().render_current_page();

        if save.all_saved() {
            log::info!("Undid last action");
        } else {
            log::error!(
                "Undo partial success: {} dataset(s) failed to sync",
                save.failed.len()
            );
        }
        Ok(UndoReport { restored, save })
    }

    pub async fn save_all(&self) -> SaveReport<DatasetKey> {
        self.controller.save_many(DatasetKey::ALL).await
    }

    /// Throw away local state and take whatever the store has.
    pub async fn reload_from_remote(
        &self,
        confirmation: Confirmation,
    ) -> Result<LoadReport<DatasetKey>, PlannerError> {
        confirmation.require()?;
        Ok(self.controller.reload_from_remote().await)
    }

    pub async fn status(&self) -> SyncStatus {
        self.controller.status().await
    }

    pub async fn save_page_note(
        &self,
        page: &str,
        content: &str,
    ) -> Result<VersionStamp, PlannerError> {
        let identity = self.controller.store().identity().to_string();
        let note = serde_json::json!({
            "content": content,
            "lastUpdatedBy": identity,
            "lastUpdatedAt": note_timestamp(Utc::now()),
        });
        self.edit(|data| {
            let notes = data.get_mut(DatasetKey::PageNotes);
            if !notes.is_object() {
                *notes = DatasetKey::PageNotes.empty_value();
            }
            if let Value::Object(notes) = notes {
                notes.insert(page.to_string(), note);
            }
            Ok(())
        })?;
        self.save(DatasetKey::PageNotes).await
    }

    /// Write `keys` unless rehearsal mode is on, in which case the edit stays local.
    async fn save_host_edit(&self, keys: &[DatasetKey]) -> SaveReport<DatasetKey> {
        if self.is_rehearsal() {
            log::info!("Rehearsal mode, not saving {keys:?}");
            return SaveReport::default();
        }
        self.controller.save_many(keys.iter().copied()).await
    }

    /// Shallow-merge `patch` into the settings.
    pub async fn update_settings(
        &self,
        patch: &Value,
    ) -> Result<SaveReport<DatasetKey>, PlannerError> {
        self.edit(|data| {
            let settings = data.get_mut(DatasetKey::Settings);
            if !settings.is_object() {
                *settings = DatasetKey::Settings.empty_value();
            }
            if let (Value::Object(settings), Value::Object(patch)) = (settings, patch) {
                for (field, value) in patch {
                    settings.insert(field.clone(), value.clone());
                }
            }
            Ok(())
        })?;
        Ok(self.save_host_edit(&[DatasetKey::Settings]).await)
    }

    pub async fn assign_role(
        &self,
        guest_id: &str,
        character_id: &str,
    ) -> Result<SaveReport<DatasetKey>, PlannerError> {
        self.edit(|data| {
            let character = Value::String(character_id.to_string());
            set_assigned_character(data, guest_id, Some(character.clone()))?;
            record_assignment(data, guest_id, Some(character));
            Ok(())
        })?;
        Ok(self
            .save_host_edit(&[DatasetKey::Guests, DatasetKey::Roles])
            .await)
    }

    pub async fn swap_roles(
        &self,
        guest_a: &str,
        guest_b: &str,
    ) -> Result<SaveReport<DatasetKey>, PlannerError> {
        self.edit(|data| {
            let a = assigned_character(data, guest_a)?;
            let b = assigned_character(data, guest_b)?;
            set_assigned_character(data, guest_a, b.clone())?;
            set_assigned_character(data, guest_b, a.clone())?;
            record_assignment(data, guest_a, b);
            record_assignment(data, guest_b, a);
            Ok(())
        })?;
        Ok(self
            .save_host_edit(&[DatasetKey::Guests, DatasetKey::Roles])
            .await)
    }
}

fn guest_mut<'a>(data: &'a mut AppData, guest_id: &str) -> Result<&'a mut Value, PlannerError> {
    let guests = shape::items_mut(
        DatasetKey::Guests,
        data.get_mut(DatasetKey::Guests),
        ItemShape::TopLevel,
    )?;
    guests
        .iter_mut()
        .find(|guest| guest.get("id").and_then(Value::as_str) == Some(guest_id))
        .ok_or_else(|| PlannerError::ItemNotFound {
            dataset: DatasetKey::Guests.to_string(),
            id: guest_id.to_string(),
        })
}

fn assigned_character(data: &mut AppData, guest_id: &str) -> Result<Option<Value>, PlannerError> {
    Ok(guest_mut(data, guest_id)?
        .get("assignedCharacter")
        .filter(|character| !character.is_null())
        .cloned())
}

fn set_assigned_character(
    data: &mut AppData,
    guest_id: &str,
    character: Option<Value>,
) -> Result<(), PlannerError> {
    if let Value::Object(guest) = guest_mut(data, guest_id)? {
        match character {
            Some(character) => guest.insert("assignedCharacter".to_string(), character),
            None => guest.remove("assignedCharacter"),
        };
    }
    Ok(())
}

/// Mirror an assignment into `roles.assignments`.
fn record_assignment(data: &mut AppData, guest_id: &str, character: Option<Value>) {
    let roles = data.get_mut(DatasetKey::Roles);
    if !roles.is_object() {
        *roles = DatasetKey::Roles.empty_value();
    }
    let Value::Object(roles) = roles else {
        return;
    };
    let assignments = roles
        .entry("assignments")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if !assignments.is_object() {
        *assignments = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(assignments) = assignments {
        match character {
            Some(character) => assignments.insert(guest_id.to_string(), character),
            None => assignments.remove(guest_id),
        };
    }
}
