//! WebAssembly bindings for DomShift
//!
//! Exposes the `DomChanges` class to JavaScript. The plugin lives in a shared
//! slot; platform observer callbacks hold a weak reference to it, so a
//! destroyed or dropped plugin silently ignores late callbacks.

pub mod dom;
pub mod host;
pub mod logger;
pub mod observers;

use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::prelude::*;

use ds_core::{DomChangesPlugin, PluginConfig};
use ds_extract::{decode_change, decode_url_filter, ExtractKeys};

use crate::dom::WebDocument;
use crate::host::JsHost;
use crate::observers::WebObservers;

pub type WebPlugin = DomChangesPlugin<WebDocument, WebObservers, JsHost>;
pub type PluginSlot = RefCell<Option<WebPlugin>>;

#[wasm_bindgen]
pub struct DomChanges {
    slot: Rc<PluginSlot>,
}

#[wasm_bindgen]
impl DomChanges {
    /// Build a plugin for the current page. An invalid config falls back to
    /// the defaults; only a missing DOM is an error.
    #[wasm_bindgen(constructor)]
    pub fn new(host: JsValue, config_json: Option<String>, url: Option<String>) -> Result<DomChanges, JsValue> {
        let config = match PluginConfig::from_json(config_json.as_deref().unwrap_or("")) {
            Ok(config) => config,
            Err(e) => {
                logger::init(log::LevelFilter::Warn);
                log::warn!("{}; using defaults", e);
                PluginConfig::default()
            }
        };
        logger::init(config.log_level());

        let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window available"))?;
        let document = window
            .document()
            .ok_or_else(|| JsValue::from_str("No document available"))?;
        let url = match url {
            Some(url) => url,
            None => window.location().href()?,
        };

        let slot: Rc<PluginSlot> = Rc::new(RefCell::new(None));
        let observers = WebObservers::new(Rc::downgrade(&slot), config.visibility_threshold)?;
        let host = JsHost::new(host, ExtractKeys::from(&config));
        let plugin = DomChangesPlugin::new(WebDocument::new(document), observers, host, config, url);
        *slot.borrow_mut() = Some(plugin);

        Ok(DomChanges { slot })
    }

    fn with_plugin<T>(&self, fallback: T, f: impl FnOnce(&mut WebPlugin) -> T) -> T {
        match self.slot.try_borrow_mut() {
            Ok(mut guard) => guard.as_mut().map_or(fallback, f),
            Err(_) => {
                log::warn!("re-entrant call ignored");
                fallback
            }
        }
    }

    pub fn initialize(&self) {
        self.with_plugin((), |plugin| plugin.initialize());
    }

    /// Apply one directive given as JSON. Invalid directives are rejected
    /// with `false`.
    #[wasm_bindgen(js_name = applyChange)]
    pub fn apply_change(&self, change_json: &str, experiment: &str) -> bool {
        let change = match serde_json::from_str(change_json)
            .map_err(|e| e.to_string())
            .and_then(|value| decode_change(&value).map_err(|e| e.to_string()))
        {
            Ok(change) => change,
            Err(e) => {
                log::warn!("[{}] change rejected: {}", experiment, e);
                return false;
            }
        };
        self.with_plugin(false, |plugin| plugin.apply_change(&change, experiment))
    }

    pub fn navigate(&self, url: String) {
        self.with_plugin((), |plugin| plugin.navigate(url));
    }

    #[wasm_bindgen(js_name = removeExperiment)]
    pub fn remove_experiment(&self, name: &str) -> bool {
        self.with_plugin(false, |plugin| plugin.remove_experiment(name))
    }

    #[wasm_bindgen(js_name = triggerExposure)]
    pub fn trigger_exposure(&self, name: &str) -> bool {
        self.with_plugin(false, |plugin| plugin.trigger_exposure(name))
    }

    #[wasm_bindgen(js_name = pendingCount)]
    pub fn pending_count(&self) -> u32 {
        self.with_plugin(0, |plugin| plugin.pending_count() as u32)
    }

    #[wasm_bindgen(js_name = isLive)]
    pub fn is_live(&self) -> bool {
        self.with_plugin(false, |plugin| plugin.is_live())
    }

    /// Disconnect observers and release the plugin. Idempotent.
    pub fn destroy(&self) {
        let plugin = match self.slot.try_borrow_mut() {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                log::warn!("destroy during a callback ignored");
                None
            }
        };
        if let Some(mut plugin) = plugin {
            plugin.destroy();
        }
    }
}

/// Test a URL against a filter given as JSON (pattern, pattern list or
/// filter object). Malformed filters match nothing.
#[wasm_bindgen(js_name = urlMatches)]
pub fn url_matches(filter_json: &str, url: &str) -> bool {
    let value: serde_json::Value = match serde_json::from_str(filter_json) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("invalid filter JSON: {}", e);
            return false;
        }
    };
    match decode_url_filter(&value) {
        Ok(filter) => filter.matches(url),
        Err(e) => {
            log::debug!("invalid filter: {}", e);
            false
        }
    }
}
