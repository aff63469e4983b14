//! DOM seam
//!
//! The change engine never talks to a concrete DOM. It works against the
//! [`Document`] trait, which the wasm bindings implement over `web-sys` and
//! [`MemoryDocument`] implements over an in-memory tree for tests and tooling.
//! Platform observers (mutation, intersection, timers) sit behind
//! [`Observers`]; their callbacks are routed back into the plugin.

pub mod html;
pub mod memory;
pub mod observe;
pub mod selector;

use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use crate::types::Position;

pub use memory::{MemoryDocument, NodeId};
pub use observe::RecordingObservers;

/// Error type for document operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("Unsupported selector: {0}")]
    UnsupportedSelector(String),
    #[error("Markup parse error: {0}")]
    Markup(String),
    #[error("Invalid node operation: {0}")]
    InvalidOperation(String),
    #[error("Script error: {0}")]
    Script(String),
}

/// A live document the change engine can query and mutate.
///
/// Methods take `&self`: the DOM is a shared, single-threaded resource and
/// implementations use interior mutability.
pub trait Document {
    /// Node handle. Equality is node identity.
    type Node: Clone + Eq + Hash + Debug;

    /// The document element (`<html>`).
    fn root(&self) -> Self::Node;
    fn head(&self) -> Option<Self::Node>;
    fn body(&self) -> Option<Self::Node>;

    /// Elements under `scope` (excluding `scope`) matching `selector`, in
    /// document order.
    fn query_all(&self, scope: &Self::Node, selector: &str) -> Result<Vec<Self::Node>, DomError>;

    fn query_first(&self, scope: &Self::Node, selector: &str) -> Result<Option<Self::Node>, DomError> {
        Ok(self.query_all(scope, selector)?.into_iter().next())
    }

    /// Whether the node is attached to the document.
    fn is_connected(&self, node: &Self::Node) -> bool;
    fn is_element(&self, node: &Self::Node) -> bool;
    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;
    fn next_sibling(&self, node: &Self::Node) -> Option<Self::Node>;

    fn text_content(&self, node: &Self::Node) -> String;
    fn set_text_content(&self, node: &Self::Node, text: &str);
    fn inner_html(&self, node: &Self::Node) -> String;
    fn set_inner_html(&self, node: &Self::Node, html: &str) -> Result<(), DomError>;

    /// Inline style property (kebab-case name).
    fn style_property(&self, node: &Self::Node, name: &str) -> Option<String>;
    fn set_style_property(&self, node: &Self::Node, name: &str, value: &str);
    fn remove_style_property(&self, node: &Self::Node, name: &str);

    fn has_class(&self, node: &Self::Node, class: &str) -> bool;
    fn add_class(&self, node: &Self::Node, class: &str);
    fn remove_class(&self, node: &Self::Node, class: &str);

    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;
    fn set_attribute(&self, node: &Self::Node, name: &str, value: &str);
    fn remove_attribute(&self, node: &Self::Node, name: &str);

    /// Create a detached element.
    fn create_element(&self, tag: &str) -> Self::Node;
    /// Parse markup into detached top-level nodes.
    fn parse_fragment(&self, markup: &str) -> Result<Vec<Self::Node>, DomError>;

    /// Insert (or move) `node` relative to `reference`.
    fn insert(&self, node: &Self::Node, reference: &Self::Node, position: Position) -> Result<(), DomError>;
    /// Put `replacement` where `old` is and detach `old`.
    fn replace(&self, old: &Self::Node, replacement: &Self::Node) -> Result<(), DomError>;
    /// Detach a node; detached nodes are left alone.
    fn remove(&self, node: &Self::Node);

    /// Run author code with `node` bound to `element`.
    fn run_script(&self, node: &Self::Node, body: &str) -> Result<(), DomError>;
}

/// Platform observer hub.
///
/// The engine asks for observation; the platform delivers the callbacks by
/// calling `on_mutations`, `flush` and `on_intersection` on the plugin.
pub trait Observers<N> {
    /// Start observing subtree insertions under `root`.
    fn observe_insertions(&self, root: &N);
    fn disconnect_insertions(&self, root: &N);
    /// Start reporting viewport intersection of `node`.
    fn observe_visibility(&self, node: &N);
    fn unobserve_visibility(&self, node: &N);
    /// Call `flush` once after `delay`.
    fn request_flush(&self, delay: Duration);
}

/// Convert a camelCase style key to its kebab-case CSS property name.
/// Keys that are already kebab-case (or custom properties) pass through.
pub fn css_property_name(key: &str) -> String {
    if key.starts_with("--") {
        return key.to_string();
    }
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
