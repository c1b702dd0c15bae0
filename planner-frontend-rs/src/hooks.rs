use tether::{StoreError, SyncHooks, VersionStamp};
use wasm_bindgen::JsValue;

use crate::datasets::DatasetKey;

/// Forwards sync events to optional JS callbacks:
/// `notifySaveStart(dataset)`, `notifySaveSuccess(dataset, version)`, `notifySaveError(dataset, message)` and
/// `renderCurrentPage()`.
#[derive(Default)]
pub struct JsHooks {
    notify_save_start: Option<js_sys::Function>,
    notify_save_success: Option<js_sys::Function>,
    notify_save_error: Option<js_sys::Function>,
    render_current_page: Option<js_sys::Function>,
}

impl JsHooks {
    /// Pick the callbacks out of a JS object. Missing or non-function properties are ignored.
    pub fn from_object(hooks: &JsValue) -> Self {
        if hooks.is_undefined() || hooks.is_null() {
            return Self::default();
        }
        Self {
            notify_save_start: function_property(hooks, "notifySaveStart"),
            notify_save_success: function_property(hooks, "notifySaveSuccess"),
            notify_save_error: function_property(hooks, "notifySaveError"),
            render_current_page: function_property(hooks, "renderCurrentPage"),
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn function_property(object: &JsValue, name: &str) -> Option<js_sys::Function> {
    use wasm_bindgen::JsCast;

    js_sys::Reflect::get(object, &JsValue::from_str(name))
        .ok()?
        .dyn_into::<js_sys::Function>()
        .ok()
}

#[cfg(not(target_arch = "wasm32"))]
fn function_property(_object: &JsValue, _name: &str) -> Option<js_sys::Function> {
    None
}

fn call(function: &Option<js_sys::Function>, args: &[JsValue]) {
    let Some(function) = function else {
        return;
    };
    #[cfg(target_arch = "wasm32")]
    {
        let this = JsValue::null();
        let result = match args {
            [] => function.call0(&this),
            [a] => function.call1(&this, a),
            [a, b, ..] => function.call2(&this, a, b),
        };
        if let Err(e) = result {
            log::error!("Hook threw: {e:?}");
        }
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        let _ = (function, args);
    }
}

impl SyncHooks<DatasetKey> for JsHooks {
    fn notify_save_start(&self, key: DatasetKey) {
        call(&self.notify_save_start, &[JsValue::from_str(key.as_str())]);
    }

    fn notify_save_success(&self, key: DatasetKey, stamp: VersionStamp) {
        call(
            &self.notify_save_success,
            &[
                JsValue::from_str(key.as_str()),
                JsValue::from_f64(stamp.version as f64),
            ],
        );
    }

    fn notify_save_error(&self, key: DatasetKey, error: &StoreError) {
        call(
            &self.notify_save_error,
            &[
                JsValue::from_str(key.as_str()),
                JsValue::from_str(&error.to_string()),
            ],
        );
    }

    fn render_current_page(&self) {
        call(&self.render_current_page, &[]);
    }
}
