//! In-memory [`Document`] implementation.
//!
//! An arena of nodes addressed by [`NodeId`]. Used by the test-suite and the
//! CLI simulator; behaves like a browser DOM for everything the change engine
//! touches (queries, markup, inline styles, classes, attributes, insertion).

use std::cell::RefCell;

use super::html::{self, ParsedNode};
use super::selector::{parse_selector, SelectorTree};
use super::{Document, DomError};
use crate::types::Position;

/// Node handle into a [`MemoryDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeKind {
    Document,
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
    document: NodeId,
    html: NodeId,
    head: NodeId,
    body: NodeId,
}

impl Tree {
    fn new() -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            document: NodeId(0),
            html: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
        };
        tree.document = tree.alloc(NodeKind::Document);
        tree.html = tree.create_element("html");
        tree.head = tree.create_element("head");
        tree.body = tree.create_element("body");
        tree.append_child(tree.document, tree.html);
        tree.append_child(tree.html, tree.head);
        tree.append_child(tree.html, tree.body);
        tree
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            kind,
        });
        id
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        })
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_string()))
    }

    fn adopt(&mut self, parsed: &ParsedNode) -> NodeId {
        match parsed {
            ParsedNode::Text(text) => self.create_text(text),
            ParsedNode::Element(element) => {
                let id = self.alloc(NodeKind::Element {
                    tag: element.tag.clone(),
                    attrs: element.attrs.clone(),
                });
                for child in &element.children {
                    let child_id = self.adopt(child);
                    self.append_child(id, child_id);
                }
                id
            }
        }
    }

    // -------------------------------------------------------------------------
    // Structure
    // -------------------------------------------------------------------------

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            self.node_mut(parent).children.retain(|&child| child != id);
            self.node_mut(id).parent = None;
        }
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.node_mut(parent).children.push(child);
        self.node_mut(child).parent = Some(parent);
    }

    fn insert_at(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        let children = &mut self.node_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.node_mut(child).parent = Some(parent);
    }

    fn index_in_parent(&self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.node(id).parent?;
        let index = self.node(parent).children.iter().position(|&c| c == id)?;
        Some((parent, index))
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).parent;
        }
        false
    }

    fn clear_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.node_mut(id).children);
        for child in children {
            self.node_mut(child).parent = None;
        }
    }

    fn element_descendants(&self, scope: NodeId, out: &mut Vec<NodeId>) {
        for &child in &self.node(scope).children {
            if self.is_element_node(child) {
                out.push(child);
            }
            self.element_descendants(child, out);
        }
    }

    fn is_element_node(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Element { .. })
    }

    fn sibling_element(&self, id: NodeId, forward: bool) -> Option<NodeId> {
        let (parent, index) = self.index_in_parent(id)?;
        let siblings = &self.node(parent).children;
        if forward {
            siblings[index + 1..]
                .iter()
                .copied()
                .find(|&s| self.is_element_node(s))
        } else {
            siblings[..index]
                .iter()
                .rev()
                .copied()
                .find(|&s| self.is_element_node(s))
        }
    }

    // -------------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------------

    fn get_attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeKind::Element { attrs, .. } = &mut self.node_mut(id).kind {
            let name = name.to_ascii_lowercase();
            match attrs.iter_mut().find(|(n, _)| *n == name) {
                Some((_, existing)) => *existing = value.to_string(),
                None => attrs.push((name, value.to_string())),
            }
        }
    }

    fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let NodeKind::Element { attrs, .. } = &mut self.node_mut(id).kind {
            attrs.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        }
    }

    // -------------------------------------------------------------------------
    // Serialization
    // -------------------------------------------------------------------------

    fn text_of(&self, id: NodeId, out: &mut String) {
        match &self.node(id).kind {
            NodeKind::Text(text) => out.push_str(text),
            _ => {
                for &child in &self.node(id).children {
                    self.text_of(child, out);
                }
            }
        }
    }

    fn serialize_children(&self, id: NodeId, out: &mut String) {
        let raw = matches!(
            &self.node(id).kind,
            NodeKind::Element { tag, .. } if matches!(tag.as_str(), "script" | "style")
        );
        for &child in &self.node(id).children {
            match &self.node(child).kind {
                NodeKind::Text(text) if raw => out.push_str(text),
                _ => self.serialize(child, out),
            }
        }
    }

    fn serialize(&self, id: NodeId, out: &mut String) {
        match &self.node(id).kind {
            NodeKind::Document => self.serialize_children(id, out),
            NodeKind::Text(text) => out.push_str(&html::escape_text(text)),
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&html::escape_attr(value));
                    out.push('"');
                }
                out.push('>');
                if html::is_void_tag(tag) {
                    return;
                }
                self.serialize_children(id, out);
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

impl SelectorTree for Tree {
    type Id = NodeId;

    fn tag_name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.get_attr(id, name)
    }

    fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent.filter(|&p| self.is_element_node(p))
    }

    fn previous_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.sibling_element(id, false)
    }

    fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.sibling_element(id, true)
    }
}

// =============================================================================
// Inline Style
// =============================================================================

fn parse_style_declarations(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            let name = name.trim();
            let value = value.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

fn serialize_style_declarations(decls: &[(String, String)]) -> String {
    decls
        .iter()
        .map(|(name, value)| format!("{name}: {value};"))
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// MemoryDocument
// =============================================================================

/// In-memory document with `<html>`, `<head>` and `<body>`.
#[derive(Debug)]
pub struct MemoryDocument {
    tree: RefCell<Tree>,
    scripts: RefCell<Vec<(NodeId, String)>>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// Empty document skeleton.
    pub fn new() -> Self {
        Self {
            tree: RefCell::new(Tree::new()),
            scripts: RefCell::new(Vec::new()),
        }
    }

    /// Build a document from page markup. A full document (`<html>`,
    /// `<head>`, `<body>`) is mapped onto the skeleton; a bare fragment
    /// becomes the body content.
    pub fn from_html(markup: &str) -> Result<Self, DomError> {
        let parsed = html::parse_fragment(markup)?;
        let doc = Self::new();
        {
            let mut tree = doc.tree.borrow_mut();
            let (head, body) = (tree.head, tree.body);
            let place = |tree: &mut Tree, node: &ParsedNode| match node {
                ParsedNode::Element(el) if el.tag == "head" => {
                    for child in &el.children {
                        let id = tree.adopt(child);
                        tree.append_child(head, id);
                    }
                }
                ParsedNode::Element(el) if el.tag == "body" => {
                    for (name, value) in &el.attrs {
                        tree.set_attr(body, name, value);
                    }
                    for child in &el.children {
                        let id = tree.adopt(child);
                        tree.append_child(body, id);
                    }
                }
                ParsedNode::Text(text) if text.trim().is_empty() => {}
                other => {
                    let id = tree.adopt(other);
                    tree.append_child(body, id);
                }
            };

            for node in &parsed {
                match node {
                    ParsedNode::Element(el) if el.tag == "html" => {
                        for child in &el.children {
                            place(&mut tree, child);
                        }
                    }
                    other => place(&mut tree, other),
                }
            }
        }
        Ok(doc)
    }

    /// Parse `markup` and append every top-level node to `parent`.
    pub fn append_html(&self, parent: NodeId, markup: &str) -> Result<Vec<NodeId>, DomError> {
        let nodes = self.parse_fragment(markup)?;
        let mut tree = self.tree.borrow_mut();
        for &node in &nodes {
            tree.append_child(parent, node);
        }
        Ok(nodes)
    }

    /// First element matching `selector` anywhere in the document.
    pub fn find(&self, selector: &str) -> Option<NodeId> {
        let root = self.root();
        self.query_first(&root, selector).ok().flatten()
    }

    /// Elements matching `selector` anywhere in the document.
    pub fn find_all(&self, selector: &str) -> Vec<NodeId> {
        let root = self.root();
        self.query_all(&root, selector).unwrap_or_default()
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.tree.borrow().serialize(node, &mut out);
        out
    }

    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        self.tree.borrow().tag_name(node).map(str::to_string)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree.borrow().node(node).children.clone()
    }

    /// `(element, body)` of every script run so far.
    pub fn script_log(&self) -> Vec<(NodeId, String)> {
        self.scripts.borrow().clone()
    }
}

impl Document for MemoryDocument {
    type Node = NodeId;

    fn root(&self) -> NodeId {
        self.tree.borrow().html
    }

    fn head(&self) -> Option<NodeId> {
        Some(self.tree.borrow().head)
    }

    fn body(&self) -> Option<NodeId> {
        Some(self.tree.borrow().body)
    }

    fn query_all(&self, scope: &NodeId, selector: &str) -> Result<Vec<NodeId>, DomError> {
        let list = parse_selector(selector)?;
        let tree = self.tree.borrow();
        let mut candidates = Vec::new();
        tree.element_descendants(*scope, &mut candidates);
        Ok(candidates
            .into_iter()
            .filter(|&id| list.matches(&*tree, id))
            .collect())
    }

    fn is_connected(&self, node: &NodeId) -> bool {
        let tree = self.tree.borrow();
        tree.is_inclusive_ancestor(tree.document, *node)
    }

    fn is_element(&self, node: &NodeId) -> bool {
        self.tree.borrow().is_element_node(*node)
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.tree.borrow().node(*node).parent
    }

    fn next_sibling(&self, node: &NodeId) -> Option<NodeId> {
        let tree = self.tree.borrow();
        let (parent, index) = tree.index_in_parent(*node)?;
        tree.node(parent).children.get(index + 1).copied()
    }

    fn text_content(&self, node: &NodeId) -> String {
        let mut out = String::new();
        self.tree.borrow().text_of(*node, &mut out);
        out
    }

    fn set_text_content(&self, node: &NodeId, text: &str) {
        let mut tree = self.tree.borrow_mut();
        if let NodeKind::Text(existing) = &mut tree.node_mut(*node).kind {
            *existing = text.to_string();
            return;
        }
        tree.clear_children(*node);
        if !text.is_empty() {
            let text_node = tree.create_text(text);
            tree.append_child(*node, text_node);
        }
    }

    fn inner_html(&self, node: &NodeId) -> String {
        let mut out = String::new();
        self.tree.borrow().serialize_children(*node, &mut out);
        out
    }

    fn set_inner_html(&self, node: &NodeId, markup: &str) -> Result<(), DomError> {
        let parsed = html::parse_fragment(markup)?;
        let mut tree = self.tree.borrow_mut();
        tree.clear_children(*node);
        for item in &parsed {
            let child = tree.adopt(item);
            tree.append_child(*node, child);
        }
        Ok(())
    }

    fn style_property(&self, node: &NodeId, name: &str) -> Option<String> {
        let tree = self.tree.borrow();
        let style = tree.get_attr(*node, "style")?;
        parse_style_declarations(style)
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    fn set_style_property(&self, node: &NodeId, name: &str, value: &str) {
        let mut tree = self.tree.borrow_mut();
        let mut decls = parse_style_declarations(tree.get_attr(*node, "style").unwrap_or(""));
        let name = name.to_ascii_lowercase();
        match decls.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => decls.push((name, value.to_string())),
        }
        tree.set_attr(*node, "style", &serialize_style_declarations(&decls));
    }

    fn remove_style_property(&self, node: &NodeId, name: &str) {
        let mut tree = self.tree.borrow_mut();
        let Some(style) = tree.get_attr(*node, "style") else {
            return;
        };
        let mut decls = parse_style_declarations(style);
        decls.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        tree.set_attr(*node, "style", &serialize_style_declarations(&decls));
    }

    fn has_class(&self, node: &NodeId, class: &str) -> bool {
        self.tree
            .borrow()
            .get_attr(*node, "class")
            .is_some_and(|value| value.split_ascii_whitespace().any(|c| c == class))
    }

    fn add_class(&self, node: &NodeId, class: &str) {
        if self.has_class(node, class) {
            return;
        }
        let mut tree = self.tree.borrow_mut();
        let mut tokens: Vec<String> = tree
            .get_attr(*node, "class")
            .unwrap_or("")
            .split_ascii_whitespace()
            .map(str::to_string)
            .collect();
        tokens.push(class.to_string());
        tree.set_attr(*node, "class", &tokens.join(" "));
    }

    fn remove_class(&self, node: &NodeId, class: &str) {
        let mut tree = self.tree.borrow_mut();
        let Some(value) = tree.get_attr(*node, "class") else {
            return;
        };
        let tokens: Vec<&str> = value
            .split_ascii_whitespace()
            .filter(|&c| c != class)
            .collect();
        let joined = tokens.join(" ");
        tree.set_attr(*node, "class", &joined);
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        self.tree.borrow().get_attr(*node, name).map(str::to_string)
    }

    fn set_attribute(&self, node: &NodeId, name: &str, value: &str) {
        self.tree.borrow_mut().set_attr(*node, name, value);
    }

    fn remove_attribute(&self, node: &NodeId, name: &str) {
        self.tree.borrow_mut().remove_attr(*node, name);
    }

    fn create_element(&self, tag: &str) -> NodeId {
        self.tree.borrow_mut().create_element(tag)
    }

    fn parse_fragment(&self, markup: &str) -> Result<Vec<NodeId>, DomError> {
        let parsed = html::parse_fragment(markup)?;
        let mut tree = self.tree.borrow_mut();
        Ok(parsed.iter().map(|node| tree.adopt(node)).collect())
    }

    fn insert(&self, node: &NodeId, reference: &NodeId, position: Position) -> Result<(), DomError> {
        let mut tree = self.tree.borrow_mut();
        let (node, reference) = (*node, *reference);
        if tree.is_inclusive_ancestor(node, reference) {
            return Err(DomError::InvalidOperation(
                "cannot insert a node relative to itself or its descendant".into(),
            ));
        }

        match position {
            Position::FirstChild => tree.insert_at(reference, 0, node),
            Position::LastChild => tree.append_child(reference, node),
            Position::Before | Position::After => {
                tree.detach(node);
                let (parent, index) = tree.index_in_parent(reference).ok_or_else(|| {
                    DomError::InvalidOperation("reference node has no parent".into())
                })?;
                let index = if position == Position::After { index + 1 } else { index };
                tree.insert_at(parent, index, node);
            }
        }
        Ok(())
    }

    fn replace(&self, old: &NodeId, replacement: &NodeId) -> Result<(), DomError> {
        let mut tree = self.tree.borrow_mut();
        if old == replacement {
            return Ok(());
        }
        if tree.is_inclusive_ancestor(*replacement, *old) {
            return Err(DomError::InvalidOperation(
                "replacement contains the node being replaced".into(),
            ));
        }
        let (parent, _) = tree
            .index_in_parent(*old)
            .ok_or_else(|| DomError::InvalidOperation("replaced node has no parent".into()))?;
        tree.detach(*replacement);
        let (_, index) = tree
            .index_in_parent(*old)
            .ok_or_else(|| DomError::InvalidOperation("replaced node has no parent".into()))?;
        tree.detach(*old);
        tree.insert_at(parent, index, *replacement);
        Ok(())
    }

    fn remove(&self, node: &NodeId) {
        self.tree.borrow_mut().detach(*node);
    }

    fn run_script(&self, node: &NodeId, body: &str) -> Result<(), DomError> {
        self.scripts.borrow_mut().push((*node, body.to_string()));
        if body.trim_start().starts_with("throw") {
            return Err(DomError::Script(body.trim().to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(markup: &str) -> MemoryDocument {
        MemoryDocument::from_html(markup).expect("fixture should parse")
    }

    #[test]
    fn fragment_becomes_body_content() {
        let d = doc(r#"<div id="a">x</div>"#);
        let body = d.body().expect("body");
        assert_eq!(d.inner_html(&body), r#"<div id="a">x</div>"#);
    }

    #[test]
    fn full_document_maps_head_and_body() {
        let d = doc("<!DOCTYPE html><html><head><title>t</title></head><body class=\"home\"><p>x</p></body></html>");
        let head = d.head().expect("head");
        assert_eq!(d.inner_html(&head), "<title>t</title>");
        assert_eq!(d.attribute(&d.body().expect("body"), "class").as_deref(), Some("home"));
        assert!(d.find("body > p").is_some());
    }

    #[test]
    fn query_respects_scope_and_order() {
        let d = doc(r#"<ul id="a"><li>1</li><li>2</li></ul><ul id="b"><li>3</li></ul>"#);
        let a = d.find("#a").expect("#a");
        let items = d.query_all(&a, "li").expect("query");
        assert_eq!(items.len(), 2);
        assert_eq!(d.text_content(&items[1]), "2");
        assert_eq!(d.find_all("li").len(), 3);
    }

    #[test]
    fn selector_combinators_and_pseudos() {
        let d = doc(r#"<div class="card"><h2>t</h2><p class="x">a</p><p>b</p></div><p>c</p>"#);
        assert_eq!(d.find_all(".card > p").len(), 2);
        assert_eq!(d.find_all("h2 + p").len(), 1);
        assert_eq!(d.find_all("h2 ~ p").len(), 2);
        assert_eq!(d.find_all("div p:last-child").len(), 1);
        assert_eq!(d.find_all("p:not(.x)").len(), 2);
        assert_eq!(d.find_all("p, h2").len(), 4);
    }

    #[test]
    fn unsupported_selector_is_an_error() {
        let d = doc("<p>x</p>");
        let root = d.root();
        assert!(matches!(
            d.query_all(&root, "p:hover"),
            Err(DomError::UnsupportedSelector(_))
        ));
    }

    #[test]
    fn style_classes_and_attributes() {
        let d = doc(r#"<p class="a" style="color: red">x</p>"#);
        let p = d.find("p").expect("p");
        d.set_style_property(&p, "font-size", "12px");
        d.set_style_property(&p, "color", "blue");
        assert_eq!(d.style_property(&p, "color").as_deref(), Some("blue"));
        assert_eq!(
            d.attribute(&p, "style").as_deref(),
            Some("color: blue; font-size: 12px;")
        );
        d.remove_style_property(&p, "color");
        assert_eq!(d.style_property(&p, "color"), None);

        d.add_class(&p, "b");
        d.add_class(&p, "b");
        d.remove_class(&p, "a");
        assert_eq!(d.attribute(&p, "class").as_deref(), Some("b"));

        d.set_attribute(&p, "data-x", "1");
        d.remove_attribute(&p, "data-x");
        assert_eq!(d.attribute(&p, "data-x"), None);
    }

    #[test]
    fn insert_positions() {
        let d = doc(r#"<div id="t"><span>m</span></div><b id="n">n</b>"#);
        let t = d.find("#t").expect("#t");
        let n = d.find("#n").expect("#n");

        d.insert(&n, &t, Position::FirstChild).expect("insert");
        assert_eq!(d.inner_html(&t), r#"<b id="n">n</b><span>m</span>"#);

        d.insert(&n, &t, Position::After).expect("insert");
        let body = d.body().expect("body");
        assert_eq!(
            d.inner_html(&body),
            r#"<div id="t"><span>m</span></div><b id="n">n</b>"#
        );

        d.insert(&n, &t, Position::Before).expect("insert");
        assert_eq!(d.next_sibling(&n), Some(t));

        assert!(d.insert(&t, &t, Position::LastChild).is_err());
    }

    #[test]
    fn replace_and_connectivity() {
        let d = doc(r#"<p id="old">x</p>"#);
        let old = d.find("#old").expect("#old");
        let span = d.create_element("span");
        assert!(!d.is_connected(&span));
        d.replace(&old, &span).expect("replace");
        assert!(d.is_connected(&span));
        assert!(!d.is_connected(&old));
        assert!(d.replace(&old, &span).is_err());
    }

    #[test]
    fn text_and_inner_html() {
        let d = doc("<p>a <b>b</b></p>");
        let p = d.find("p").expect("p");
        assert_eq!(d.text_content(&p), "a b");
        d.set_text_content(&p, "<safe>");
        assert_eq!(d.inner_html(&p), "&lt;safe&gt;");
        d.set_inner_html(&p, "<i>i</i>").expect("markup");
        assert_eq!(d.find_all("p > i").len(), 1);
    }

    #[test]
    fn scripts_are_recorded() {
        let d = doc("<p>x</p>");
        let p = d.find("p").expect("p");
        d.run_script(&p, "element.dataset.ok = 1").expect("script");
        assert!(d.run_script(&p, "throw new Error('x')").is_err());
        assert_eq!(d.script_log().len(), 2);
    }
}
