//! `ExperimentHost` over a JS SDK object.

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use ds_core::host::ExperimentHost;
use ds_core::types::Experiment;
use ds_extract::{extract_experiments, ExtractKeys};

use crate::dom::describe;

/// Wraps an object exposing `getExperiments()`, `peekAssignedVariant(name)`,
/// `recordExposure(name)` and `overrideAssignment(name, index)`.
pub struct JsHost {
    sdk: JsValue,
    keys: ExtractKeys,
}

impl JsHost {
    pub fn new(sdk: JsValue, keys: ExtractKeys) -> Self {
        Self { sdk, keys }
    }

    fn call(&self, method: &str, args: &[JsValue]) -> Result<JsValue, JsValue> {
        let function: js_sys::Function = js_sys::Reflect::get(&self.sdk, &JsValue::from_str(method))?
            .dyn_into()
            .map_err(|_| JsValue::from_str(&format!("host has no {method}()")))?;
        let args: js_sys::Array = args.iter().collect();
        function.apply(&self.sdk, &args)
    }

    fn call_logged(&self, method: &str, args: &[JsValue]) -> Option<JsValue> {
        match self.call(method, args) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("host {} failed: {}", method, describe(&e));
                None
            }
        }
    }
}

impl ExperimentHost for JsHost {
    fn experiments(&self) -> Vec<Experiment> {
        let Some(raw) = self.call_logged("getExperiments", &[]) else {
            return Vec::new();
        };
        if raw.is_undefined() || raw.is_null() {
            return Vec::new();
        }

        let json = match js_sys::JSON::stringify(&raw) {
            Ok(json) => String::from(json),
            Err(e) => {
                log::warn!("experiments are not serializable: {}", describe(&e));
                return Vec::new();
            }
        };
        let value: serde_json::Value = match serde_json::from_str(&json) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("experiments are not valid JSON: {}", e);
                return Vec::new();
            }
        };

        match extract_experiments(&value, &self.keys) {
            Ok(extraction) => {
                for issue in &extraction.issues {
                    log::debug!("{}", issue);
                }
                extraction.experiments
            }
            Err(e) => {
                log::warn!("cannot read experiments: {}", e);
                Vec::new()
            }
        }
    }

    fn peek_assignment(&self, experiment: &str) -> Option<usize> {
        let value = self.call_logged("peekAssignedVariant", &[JsValue::from_str(experiment)])?;
        let index = value.as_f64()?;
        (index.is_finite() && index >= 0.0 && index.fract() == 0.0).then_some(index as usize)
    }

    fn record_exposure(&self, experiment: &str) {
        self.call_logged("recordExposure", &[JsValue::from_str(experiment)]);
    }

    fn override_assignment(&self, experiment: &str, variant: usize) {
        self.call_logged(
            "overrideAssignment",
            &[JsValue::from_str(experiment), JsValue::from(variant as u32)],
        );
    }
}
