#![cfg(target_arch = "wasm32")]

use wasm_bindgen::prelude::*;
use wasm_bindgen_test::*;

use ds_core::dom::Document;
use ds_core::types::Position;
use ds_wasm::dom::{WebDocument, WebNode};
use ds_wasm::{url_matches, DomChanges};

wasm_bindgen_test_configure!(run_in_browser);

fn document() -> web_sys::Document {
    web_sys::window()
        .expect("window")
        .document()
        .expect("document")
}

fn fixture(html: &str) -> web_sys::Element {
    let doc = document();
    let body = doc.body().expect("body");
    body.set_inner_html(html);
    body.into()
}

/// Host object with one experiment whose variant 1 rewrites `.hero`.
fn host(assigned: u32) -> (JsValue, js_sys::Array) {
    let exposures = js_sys::Array::new();
    let host = js_sys::Object::new();
    let experiments = js_sys::JSON::parse(
        r#"[{"name": "hero", "variants": [
            {"variables": {"__dom_changes": [{"selector": ".hero", "type": "style", "value": {"color": "red"}}]}},
            {"variables": {"__dom_changes": [{"selector": ".hero", "type": "text", "value": "B"}]}}
        ]}]"#,
    )
    .expect("experiments");

    let get = js_sys::Function::new_with_args("", "return this.__experiments;");
    let peek = js_sys::Function::new_with_args("name", &format!("return {assigned};"));
    let record = js_sys::Function::new_with_args("name", "this.__exposures.push(name);");
    let noop = js_sys::Function::new_no_args("");

    js_sys::Reflect::set(&host, &"__experiments".into(), &experiments).expect("set");
    js_sys::Reflect::set(&host, &"__exposures".into(), &exposures).expect("set");
    js_sys::Reflect::set(&host, &"getExperiments".into(), &get).expect("set");
    js_sys::Reflect::set(&host, &"peekAssignedVariant".into(), &peek).expect("set");
    js_sys::Reflect::set(&host, &"recordExposure".into(), &record).expect("set");
    js_sys::Reflect::set(&host, &"overrideAssignment".into(), &noop).expect("set");
    (host.into(), exposures)
}

#[wasm_bindgen_test]
fn node_identity_survives_rewrapping() {
    let body = fixture("<p id='a'></p>");
    let doc = WebDocument::new(document());
    let found = doc
        .query_first(&WebNode::wrap(body.into()), "#a")
        .expect("query")
        .expect("element");
    let again = WebNode::wrap(document().get_element_by_id("a").expect("a").into());
    assert_eq!(found, again);
}

#[wasm_bindgen_test]
fn fragments_insert_in_order() {
    fixture("<div id='slot'></div>");
    let doc = WebDocument::new(document());
    let slot = WebNode::wrap(document().get_element_by_id("slot").expect("slot").into());
    for node in doc.parse_fragment("<i>1</i><i>2</i>").expect("fragment") {
        doc.insert(&node, &slot, Position::LastChild).expect("insert");
    }
    assert_eq!(doc.text_content(&slot), "12");
    assert!(doc.query_all(&slot, "i[").is_err());
}

#[wasm_bindgen_test]
fn script_errors_are_reported() {
    let body = fixture("<p></p>");
    let doc = WebDocument::new(document());
    let node = WebNode::wrap(body.into());
    assert!(doc.run_script(&node, "element.dataset.ran = '1';").is_ok());
    assert!(doc.run_script(&node, "throw new Error('boom');").is_err());
    assert!(doc.run_script(&node, "this is not js").is_err());
}

#[wasm_bindgen_test]
fn initialize_applies_and_exposes_immediately() {
    fixture("<h1 class='hero'>A</h1>");
    let (host, exposures) = host(1);
    let plugin = DomChanges::new(host, None, Some("https://shop.test/".into())).expect("plugin");
    plugin.initialize();

    let hero = document().query_selector(".hero").expect("query").expect("hero");
    assert_eq!(hero.text_content().as_deref(), Some("B"));
    assert_eq!(exposures.length(), 1);

    assert!(plugin.remove_experiment("hero"));
    assert_eq!(hero.text_content().as_deref(), Some("A"));

    plugin.destroy();
    plugin.destroy();
    assert!(!plugin.is_live());
    assert!(!plugin.apply_change(r#"{"selector": ".hero", "type": "delete"}"#, "hero"));
}

#[wasm_bindgen_test]
fn invalid_input_never_throws() {
    fixture("<p></p>");
    let (host, _) = host(0);
    let plugin = DomChanges::new(host, Some("{not json".into()), Some("https://a.test/".into())).expect("plugin");
    plugin.initialize();
    assert!(!plugin.apply_change("{", "x"));
    assert!(!plugin.apply_change(r#"{"type": "text"}"#, "x"));
    assert_eq!(plugin.pending_count(), 0);
}

#[wasm_bindgen_test]
fn url_matches_accepts_every_filter_form() {
    assert!(url_matches(r#""*/checkout""#, "https://a.test/checkout"));
    assert!(url_matches(r#"{"include": ["/p/*"], "matchType": "path"}"#, "https://a.test/p/1"));
    assert!(!url_matches(r#"{"include": ["*"], "exclude": ["*admin*"]}"#, "https://a.test/admin"));
    assert!(!url_matches("not json", "https://a.test/"));
}
