//! Platform observers: one `MutationObserver` per insertion root, one shared
//! `IntersectionObserver`, and a `setTimeout` flush. Every callback reaches
//! the plugin through a weak slot and is dropped if the plugin is gone or
//! already borrowed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Weak;
use std::time::Duration;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    IntersectionObserver, IntersectionObserverEntry, IntersectionObserverInit, MutationObserver,
    MutationObserverInit, MutationRecord,
};

use ds_core::dom::Observers;

use crate::dom::{describe, WebNode};
use crate::PluginSlot;

type MutationCallback = Closure<dyn FnMut(js_sys::Array, MutationObserver)>;
type IntersectionCallback = Closure<dyn FnMut(js_sys::Array, IntersectionObserver)>;

pub struct WebObservers {
    mutation_observers: RefCell<HashMap<WebNode, MutationObserver>>,
    intersection: IntersectionObserver,
    timer: RefCell<Option<i32>>,
    on_mutation: MutationCallback,
    // Referenced by `intersection`; kept alive with it.
    _on_intersection: IntersectionCallback,
    on_flush: Closure<dyn FnMut()>,
}

fn with_plugin(slot: &Weak<PluginSlot>, f: impl FnOnce(&mut crate::WebPlugin)) {
    let Some(slot) = slot.upgrade() else {
        return;
    };
    let Ok(mut guard) = slot.try_borrow_mut() else {
        log::debug!("plugin busy, dropping callback");
        return;
    };
    if let Some(plugin) = guard.as_mut() {
        f(plugin);
    }
}

impl WebObservers {
    pub fn new(slot: Weak<PluginSlot>, threshold: f64) -> Result<Self, JsValue> {
        let mutation_slot = slot.clone();
        let on_mutation: MutationCallback = Closure::new(move |records: js_sys::Array, _: MutationObserver| {
            let inserted = records.iter().any(|record| {
                record
                    .dyn_into::<MutationRecord>()
                    .map_or(false, |record| record.added_nodes().length() > 0)
            });
            if inserted {
                with_plugin(&mutation_slot, |plugin| plugin.on_mutations());
            }
        });

        let intersection_slot = slot.clone();
        let on_intersection: IntersectionCallback =
            Closure::new(move |entries: js_sys::Array, _: IntersectionObserver| {
                with_plugin(&intersection_slot, |plugin| {
                    for entry in entries.iter() {
                        let Ok(entry) = entry.dyn_into::<IntersectionObserverEntry>() else {
                            continue;
                        };
                        let node = WebNode::wrap(entry.target().into());
                        plugin.on_intersection(&node, entry.intersection_ratio());
                    }
                });
            });

        let flush_slot = slot;
        let on_flush: Closure<dyn FnMut()> = Closure::new(move || {
            with_plugin(&flush_slot, |plugin| {
                plugin.observers().timer.borrow_mut().take();
                let resolved = plugin.flush();
                if resolved > 0 {
                    log::debug!("flush resolved {} pending changes", resolved);
                }
            });
        });

        let options = IntersectionObserverInit::new();
        options.set_threshold(&JsValue::from_f64(threshold));
        let intersection =
            IntersectionObserver::new_with_options(on_intersection.as_ref().unchecked_ref(), &options)?;

        Ok(Self {
            mutation_observers: RefCell::new(HashMap::new()),
            intersection,
            timer: RefCell::new(None),
            on_mutation,
            _on_intersection: on_intersection,
            on_flush,
        })
    }

    fn disconnect_all(&self) {
        for (_, observer) in self.mutation_observers.borrow_mut().drain() {
            observer.disconnect();
        }
        self.intersection.disconnect();
        if let Some(handle) = self.timer.borrow_mut().take() {
            if let Some(window) = web_sys::window() {
                window.clear_timeout_with_handle(handle);
            }
        }
    }
}

impl Observers<WebNode> for WebObservers {
    fn observe_insertions(&self, root: &WebNode) {
        let mut observers = self.mutation_observers.borrow_mut();
        if observers.contains_key(root) {
            return;
        }
        let observer = match MutationObserver::new(self.on_mutation.as_ref().unchecked_ref()) {
            Ok(observer) => observer,
            Err(e) => {
                log::warn!("MutationObserver unavailable: {}", describe(&e));
                return;
            }
        };
        let options = MutationObserverInit::new();
        options.set_child_list(true);
        options.set_subtree(true);
        match observer.observe_with_options(root.node(), &options) {
            Ok(()) => {
                observers.insert(root.clone(), observer);
            }
            Err(e) => log::warn!("cannot observe insertions: {}", describe(&e)),
        }
    }

    fn disconnect_insertions(&self, root: &WebNode) {
        if let Some(observer) = self.mutation_observers.borrow_mut().remove(root) {
            observer.disconnect();
        }
    }

    fn observe_visibility(&self, node: &WebNode) {
        if let Some(element) = node.element() {
            self.intersection.observe(element);
        }
    }

    fn unobserve_visibility(&self, node: &WebNode) {
        if let Some(element) = node.element() {
            self.intersection.unobserve(element);
        }
    }

    fn request_flush(&self, delay: Duration) {
        let Some(window) = web_sys::window() else {
            return;
        };
        let mut timer = self.timer.borrow_mut();
        if timer.is_some() {
            return;
        }
        let millis = i32::try_from(delay.as_millis()).unwrap_or(i32::MAX);
        match window.set_timeout_with_callback_and_timeout_and_arguments_0(
            self.on_flush.as_ref().unchecked_ref(),
            millis,
        ) {
            Ok(handle) => *timer = Some(handle),
            Err(e) => log::warn!("cannot schedule flush: {}", describe(&e)),
        }
    }
}

impl Drop for WebObservers {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}
