//! `Document` over `web-sys`.

use std::cell::Cell;
use std::hash::{Hash, Hasher};

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Element, HtmlElement, Node};

use ds_core::dom::{Document, DomError};
use ds_core::types::Position;

/// Expando property carrying a node's identity across wrapper objects.
const NODE_ID_KEY: &str = "__dsxId";

thread_local! {
    static NEXT_NODE_ID: Cell<u32> = const { Cell::new(1) };
}

/// A DOM node with a stable identity, so it can key hash maps.
#[derive(Debug, Clone)]
pub struct WebNode {
    id: u32,
    node: Node,
}

impl WebNode {
    pub fn wrap(node: Node) -> Self {
        let key = JsValue::from_str(NODE_ID_KEY);
        let existing = js_sys::Reflect::get(&node, &key)
            .ok()
            .and_then(|value| value.as_f64());
        let id = match existing {
            Some(id) => id as u32,
            None => {
                let id = NEXT_NODE_ID.with(|next| {
                    let id = next.get();
                    next.set(id.wrapping_add(1));
                    id
                });
                let _ = js_sys::Reflect::set(&node, &key, &JsValue::from(id));
                id
            }
        };
        Self { id, node }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn element(&self) -> Option<&Element> {
        self.node.dyn_ref::<Element>()
    }

    fn html_element(&self) -> Option<&HtmlElement> {
        self.node.dyn_ref::<HtmlElement>()
    }
}

impl PartialEq for WebNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WebNode {}

impl Hash for WebNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Best-effort message of a thrown JS value.
pub fn describe(error: &JsValue) -> String {
    if let Some(text) = error.as_string() {
        return text;
    }
    js_sys::Reflect::get(error, &"message".into())
        .ok()
        .and_then(|message| message.as_string())
        .unwrap_or_else(|| format!("{:?}", error))
}

fn invalid(error: JsValue) -> DomError {
    DomError::InvalidOperation(describe(&error))
}

pub struct WebDocument {
    document: web_sys::Document,
}

impl WebDocument {
    pub fn new(document: web_sys::Document) -> Self {
        Self { document }
    }

    fn wrap_all(list: web_sys::NodeList) -> Vec<WebNode> {
        (0..list.length())
            .filter_map(|i| list.get(i))
            .map(WebNode::wrap)
            .collect()
    }
}

impl Document for WebDocument {
    type Node = WebNode;

    fn root(&self) -> WebNode {
        match self.document.document_element() {
            Some(element) => WebNode::wrap(element.into()),
            None => WebNode::wrap(self.document.clone().into()),
        }
    }

    fn head(&self) -> Option<WebNode> {
        self.document.head().map(|head| WebNode::wrap(head.into()))
    }

    fn body(&self) -> Option<WebNode> {
        self.document.body().map(|body| WebNode::wrap(body.into()))
    }

    fn query_all(&self, scope: &WebNode, selector: &str) -> Result<Vec<WebNode>, DomError> {
        let list = match scope.element() {
            Some(element) => element.query_selector_all(selector),
            None => self.document.query_selector_all(selector),
        };
        list.map(Self::wrap_all)
            .map_err(|_| DomError::UnsupportedSelector(selector.to_string()))
    }

    fn query_first(&self, scope: &WebNode, selector: &str) -> Result<Option<WebNode>, DomError> {
        let found = match scope.element() {
            Some(element) => element.query_selector(selector),
            None => self.document.query_selector(selector),
        };
        found
            .map(|element| element.map(|element| WebNode::wrap(element.into())))
            .map_err(|_| DomError::UnsupportedSelector(selector.to_string()))
    }

    fn is_connected(&self, node: &WebNode) -> bool {
        node.node.is_connected()
    }

    fn is_element(&self, node: &WebNode) -> bool {
        node.node.node_type() == Node::ELEMENT_NODE
    }

    fn parent(&self, node: &WebNode) -> Option<WebNode> {
        node.node.parent_node().map(WebNode::wrap)
    }

    fn next_sibling(&self, node: &WebNode) -> Option<WebNode> {
        node.node.next_sibling().map(WebNode::wrap)
    }

    fn text_content(&self, node: &WebNode) -> String {
        node.node.text_content().unwrap_or_default()
    }

    fn set_text_content(&self, node: &WebNode, text: &str) {
        node.node.set_text_content(Some(text));
    }

    fn inner_html(&self, node: &WebNode) -> String {
        node.element().map(Element::inner_html).unwrap_or_default()
    }

    fn set_inner_html(&self, node: &WebNode, html: &str) -> Result<(), DomError> {
        let element = node
            .element()
            .ok_or_else(|| DomError::InvalidOperation("innerHTML on a non-element".into()))?;
        element.set_inner_html(html);
        Ok(())
    }

    fn style_property(&self, node: &WebNode, name: &str) -> Option<String> {
        let value = node.html_element()?.style().get_property_value(name).ok()?;
        (!value.is_empty()).then_some(value)
    }

    fn set_style_property(&self, node: &WebNode, name: &str, value: &str) {
        if let Some(element) = node.html_element() {
            if let Err(e) = element.style().set_property(name, value) {
                log::debug!("set style {} failed: {}", name, describe(&e));
            }
        }
    }

    fn remove_style_property(&self, node: &WebNode, name: &str) {
        if let Some(element) = node.html_element() {
            let _ = element.style().remove_property(name);
        }
    }

    fn has_class(&self, node: &WebNode, class: &str) -> bool {
        node.element()
            .map_or(false, |element| element.class_list().contains(class))
    }

    fn add_class(&self, node: &WebNode, class: &str) {
        if let Some(element) = node.element() {
            if let Err(e) = element.class_list().add_1(class) {
                log::debug!("add class {} failed: {}", class, describe(&e));
            }
        }
    }

    fn remove_class(&self, node: &WebNode, class: &str) {
        if let Some(element) = node.element() {
            let _ = element.class_list().remove_1(class);
        }
    }

    fn attribute(&self, node: &WebNode, name: &str) -> Option<String> {
        node.element()?.get_attribute(name)
    }

    fn set_attribute(&self, node: &WebNode, name: &str, value: &str) {
        if let Some(element) = node.element() {
            if let Err(e) = element.set_attribute(name, value) {
                log::debug!("set attribute {} failed: {}", name, describe(&e));
            }
        }
    }

    fn remove_attribute(&self, node: &WebNode, name: &str) {
        if let Some(element) = node.element() {
            let _ = element.remove_attribute(name);
        }
    }

    fn create_element(&self, tag: &str) -> WebNode {
        match self.document.create_element(tag) {
            Ok(element) => WebNode::wrap(element.into()),
            Err(e) => {
                log::warn!("cannot create <{}>: {}", tag, describe(&e));
                WebNode::wrap(self.document.create_document_fragment().into())
            }
        }
    }

    /// Parsed through a contextual fragment so injected scripts run once
    /// inserted.
    fn parse_fragment(&self, markup: &str) -> Result<Vec<WebNode>, DomError> {
        let range = self.document.create_range().map_err(invalid)?;
        let fragment = range
            .create_contextual_fragment(markup)
            .map_err(|e| DomError::Markup(describe(&e)))?;

        let mut nodes = Vec::new();
        while let Some(child) = fragment.first_child() {
            fragment.remove_child(&child).map_err(invalid)?;
            nodes.push(WebNode::wrap(child));
        }
        Ok(nodes)
    }

    fn insert(&self, node: &WebNode, reference: &WebNode, position: Position) -> Result<(), DomError> {
        if node.node.contains(Some(&reference.node)) {
            return Err(DomError::InvalidOperation("cannot insert a node into itself".into()));
        }
        let parent_of = |reference: &Node| {
            reference
                .parent_node()
                .ok_or_else(|| DomError::InvalidOperation("reference node has no parent".into()))
        };

        match position {
            Position::Before => {
                parent_of(&reference.node)?
                    .insert_before(&node.node, Some(&reference.node))
                    .map_err(invalid)?;
            }
            Position::After => {
                let next = reference.node.next_sibling();
                parent_of(&reference.node)?
                    .insert_before(&node.node, next.as_ref())
                    .map_err(invalid)?;
            }
            Position::FirstChild => {
                let first = reference.node.first_child();
                reference
                    .node
                    .insert_before(&node.node, first.as_ref())
                    .map_err(invalid)?;
            }
            Position::LastChild => {
                reference.node.append_child(&node.node).map_err(invalid)?;
            }
        }
        Ok(())
    }

    fn replace(&self, old: &WebNode, replacement: &WebNode) -> Result<(), DomError> {
        let parent = old
            .node
            .parent_node()
            .ok_or_else(|| DomError::InvalidOperation("replaced node has no parent".into()))?;
        parent
            .replace_child(&replacement.node, &old.node)
            .map_err(invalid)?;
        Ok(())
    }

    fn remove(&self, node: &WebNode) {
        if let Some(parent) = node.node.parent_node() {
            let _ = parent.remove_child(&node.node);
        }
    }

    fn run_script(&self, node: &WebNode, body: &str) -> Result<(), DomError> {
        let script = |e: JsValue| DomError::Script(describe(&e));
        let constructor: js_sys::Function = js_sys::Reflect::get(&js_sys::global(), &"Function".into())
            .map_err(script)?
            .dyn_into()
            .map_err(script)?;
        let args = js_sys::Array::of2(&"element".into(), &JsValue::from_str(body));
        let function: js_sys::Function = js_sys::Reflect::construct(&constructor, &args)
            .map_err(script)?
            .dyn_into()
            .map_err(script)?;
        function.call1(&JsValue::UNDEFINED, &node.node).map_err(script)?;
        Ok(())
    }
}
