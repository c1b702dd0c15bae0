use serde::{Deserialize, Serialize};
use tether::HistoryStack;
use tether::data_model::HISTORY_CAPACITY;
use tether::supabase::SupabaseConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub enum BackendKind {
    Memory,
    #[default]
    LocalStorage,
    Supabase,
}

/// Startup options passed in by the host page. Every field is optional.
#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerConfig {
    pub backend: BackendKind,
    /// Recorded as the writer of everything this page saves. Usually the signed-in user's email.
    pub identity: String,
    pub supabase: Option<SupabaseConfig>,
    pub access_token: Option<String>,
    pub fixtures_base_url: String,
    pub history_capacity: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let supabase = compiled_supabase_config();
        Self {
            backend: if supabase.is_some() {
                BackendKind::Supabase
            } else {
                BackendKind::LocalStorage
            },
            identity: "unknown".to_string(),
            supabase,
            access_token: None,
            fixtures_base_url: ".".to_string(),
            history_capacity: HISTORY_CAPACITY,
        }
    }
}

impl PlannerConfig {
    /// The backend that will actually be used. Supabase without credentials falls back to local storage.
    pub fn effective_backend(&self) -> BackendKind {
        match self.backend {
            BackendKind::Supabase if self.supabase.is_none() => {
                log::warn!("Supabase selected but not configured, using local storage");
                BackendKind::LocalStorage
            }
            backend => backend,
        }
    }

    pub fn new_history<T>(&self) -> HistoryStack<T> {
        HistoryStack::new(self.history_capacity)
    }
}

/// Credentials baked in at build time through `PLANNER_SUPABASE_URL` and `PLANNER_SUPABASE_ANON_KEY`.
pub fn compiled_supabase_config() -> Option<SupabaseConfig> {
    let supabase_url = option_env!("PLANNER_SUPABASE_URL")?;
    let supabase_anon_key = option_env!("PLANNER_SUPABASE_ANON_KEY")?;
    Some(SupabaseConfig {
        supabase_url: supabase_url.to_string(),
        supabase_anon_key: supabase_anon_key.to_string(),
    })
}
