pub mod app_data;
pub mod backend;
pub mod config;
pub mod datasets;
pub mod error;
pub mod fixtures;
pub mod hooks;
pub mod import;
pub mod session;
pub mod shape;
mod utils;

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use tether::{DatasetStore as _, LoadOutcome, LoadReport, SaveReport};
use wasm_bindgen::prelude::*;

pub use crate::app_data::AppData;
pub use crate::backend::Backend;
pub use crate::config::{BackendKind, PlannerConfig};
pub use crate::datasets::{DatasetKey, DatasetKeyMap};
pub use crate::error::PlannerError;
pub use crate::fixtures::{FixtureError, Fixtures};
pub use crate::hooks::JsHooks;
pub use crate::session::{Confirmation, ResetTarget, Session, UndoReport};

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
#[allow(clippy::declare_interior_mutable_const)]
const LOGGER: LazyLock<()> = LazyLock::new(|| {
    utils::set_panic_hook();

    wasm_logger::init(wasm_logger::Config::default());
    log::info!("Logging initialized");
});

#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct FailedDataset {
    pub dataset: DatasetKey,
    pub error: String,
}

/// What a multi-dataset operation did, in a form the page can show.
#[derive(Clone, Debug, Default, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// `seeded`, `loaded` or `unreachable` for loads, absent otherwise.
    pub outcome: Option<String>,
    pub synced: Vec<DatasetKey>,
    pub failed: Vec<FailedDataset>,
    pub error: Option<String>,
}

impl SyncSummary {
    /// Some datasets went through and some didn't.
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

fn failures(failed: &[(DatasetKey, tether::StoreError)]) -> Vec<FailedDataset> {
    failed
        .iter()
        .map(|(dataset, error)| FailedDataset {
            dataset: *dataset,
            error: error.to_string(),
        })
        .collect()
}

impl From<&SaveReport<DatasetKey>> for SyncSummary {
    fn from(report: &SaveReport<DatasetKey>) -> Self {
        SyncSummary {
            outcome: None,
            synced: report.saved.iter().map(|(key, _)| *key).collect(),
            failed: failures(&report.failed),
            error: None,
        }
    }
}

impl From<&LoadReport<DatasetKey>> for SyncSummary {
    fn from(report: &LoadReport<DatasetKey>) -> Self {
        let outcome = match report.outcome {
            LoadOutcome::Seeded => "seeded",
            LoadOutcome::Loaded => "loaded",
            LoadOutcome::Unreachable => "unreachable",
        };
        SyncSummary {
            outcome: Some(outcome.to_string()),
            synced: report
                .seeded
                .iter()
                .chain(&report.loaded)
                .copied()
                .collect(),
            failed: failures(&report.failed),
            error: report.error.as_ref().map(|e| e.to_string()),
        }
    }
}

fn to_js_error(e: PlannerError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {e:?}")))
}

fn from_js(value: JsValue) -> Result<serde_json::Value, JsValue> {
    serde_wasm_bindgen::from_value(value)
        .map_err(|e| JsValue::from_str(&format!("Deserialization error: {e:?}")))
}

#[wasm_bindgen]
pub struct Planner {
    // we should never hold a borrow across an .await. the session only borrows its cells inside synchronous sections
    session: Session<Backend, JsHooks>,
    config: PlannerConfig,
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl Planner {
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen(constructor))]
    pub fn new(config: Option<PlannerConfig>, hooks: JsValue) -> Result<Planner, JsValue> {
        // used to only initialize the logger once
        #[allow(clippy::borrow_interior_mutable_const)]
        *LOGGER;

        let config = config.unwrap_or_default();
        let backend = Backend::from_config(&config)
            .inspect_err(|e| {
                log::error!("Error opening backend: {e}");
            })
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        let session =
            Session::with_history(backend, JsHooks::from_object(&hooks), config.new_history());

        Ok(Self { session, config })
    }

    /// Fetch the bundled datasets, show them, then reconcile with the store.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn load(&self) -> Result<JsValue, JsValue> {
        let fixtures = fixtures::fetch_fixtures(&self.config.fixtures_base_url)
            .await
            .inspect_err(|e| {
                log::error!("Error loading fixtures: {e}");
            })
            .map_err(|e| to_js_error(e.into()))?;
        let report = self.session.load(&fixtures).await;
        to_js(&SyncSummary::from(&report))
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn dataset(&self, key: DatasetKey) -> Result<JsValue, JsValue> {
        to_js(&self.session.dataset(key))
    }

    /// Every dataset, keyed by name.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn all_data(&self) -> Result<JsValue, JsValue> {
        to_js(&self.session.data().to_json())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn add_item(
        &self,
        key: DatasetKey,
        item: JsValue,
        list: Option<String>,
    ) -> Result<(), JsValue> {
        let shape = shape::resolve_shape(key, list.as_deref()).map_err(to_js_error)?;
        self.session
            .add_item(key, shape, from_js(item)?)
            .await
            .map_err(to_js_error)?;
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn update_item(
        &self,
        key: DatasetKey,
        id: String,
        updates: JsValue,
        list: Option<String>,
    ) -> Result<(), JsValue> {
        let shape = shape::resolve_shape(key, list.as_deref()).map_err(to_js_error)?;
        self.session
            .update_item(key, shape, &id, &from_js(updates)?)
            .await
            .map_err(to_js_error)?;
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn delete_item(
        &self,
        key: DatasetKey,
        id: String,
        confirmed: bool,
        list: Option<String>,
    ) -> Result<(), JsValue> {
        let shape = shape::resolve_shape(key, list.as_deref()).map_err(to_js_error)?;
        self.session
            .delete_item(key, shape, &id, confirmed.into())
            .await
            .map_err(to_js_error)?;
        Ok(())
    }

    /// Import the text of a JSON file into `key`. Invalid files are rejected before anything changes.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn import_dataset(&self, key: DatasetKey, text: String) -> Result<(), JsValue> {
        self.session
            .import_dataset(key, &text)
            .await
            .map_err(to_js_error)?;
        Ok(())
    }

    /// Pretty-printed JSON of one dataset, for download.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn export_dataset(&self, key: DatasetKey) -> Result<String, JsValue> {
        serde_json::to_string_pretty(&self.session.dataset(key))
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {e}")))
    }

    /// Reset one dataset, or every dataset when `key` is omitted.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn reset_to_defaults(
        &self,
        key: Option<DatasetKey>,
        confirmed: bool,
    ) -> Result<JsValue, JsValue> {
        let target = key.map_or(ResetTarget::All, ResetTarget::Dataset);
        let report = self
            .session
            .reset_to_defaults(target, confirmed.into())
            .await
            .map_err(to_js_error)?;
        to_js(&SyncSummary::from(&report))
    }

    /// Fails with "Nothing to undo!" when the history is empty. Check `is_partial` on the result.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn undo(&self) -> Result<JsValue, JsValue> {
        let report = self.session.undo().await.map_err(to_js_error)?;
        to_js(&SyncSummary::from(&report.save))
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn can_undo(&self) -> bool {
        self.session.can_undo()
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn save_all(&self) -> Result<JsValue, JsValue> {
        to_js(&SyncSummary::from(&self.session.save_all().await))
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn reload_from_remote(&self, confirmed: bool) -> Result<JsValue, JsValue> {
        let report = self
            .session
            .reload_from_remote(confirmed.into())
            .await
            .map_err(to_js_error)?;
        to_js(&SyncSummary::from(&report))
    }

    /// Pick up changes other devices made. Call this on an interval.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn poll_remote(&self) -> Result<usize, JsValue> {
        self.session
            .controller()
            .store()
            .poll()
            .await
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn sync_status(&self) -> Result<JsValue, JsValue> {
        to_js(&self.session.status().await)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn identity(&self) -> String {
        self.session.controller().store().identity().to_string()
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn save_page_note(&self, page: String, content: String) -> Result<(), JsValue> {
        self.session
            .save_page_note(&page, &content)
            .await
            .map_err(to_js_error)?;
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn update_settings(&self, patch: JsValue) -> Result<JsValue, JsValue> {
        let report = self
            .session
            .update_settings(&from_js(patch)?)
            .await
            .map_err(to_js_error)?;
        to_js(&SyncSummary::from(&report))
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn assign_role(
        &self,
        guest_id: String,
        character_id: String,
    ) -> Result<JsValue, JsValue> {
        let report = self
            .session
            .assign_role(&guest_id, &character_id)
            .await
            .map_err(to_js_error)?;
        to_js(&SyncSummary::from(&report))
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn swap_roles(
        &self,
        guest_a: String,
        guest_b: String,
    ) -> Result<JsValue, JsValue> {
        let report = self
            .session
            .swap_roles(&guest_a, &guest_b)
            .await
            .map_err(to_js_error)?;
        to_js(&SyncSummary::from(&report))
    }
}

impl Drop for Planner {
    fn drop(&mut self) {
        self.session.controller().shutdown();
    }
}
