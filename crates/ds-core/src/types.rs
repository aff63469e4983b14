//! Core type definitions for DomShift
//!
//! These types are the validated, typed form of the experiment payloads that
//! the extractor decodes. Every change kind carries only the fields it needs,
//! so the applicator matches on them exhaustively.

use std::collections::BTreeMap;

use crate::inject::InjectionSet;
use crate::url::UrlFilter;

// =============================================================================
// Bookkeeping Markers
// =============================================================================

/// Attribute set on the placeholder that replaces a deleted element.
/// Value: owning experiment name.
pub const PLACEHOLDER_ATTR: &str = "data-dsx-placeholder";
/// Attribute on a placeholder holding the selector of the deleted element.
pub const PLACEHOLDER_SELECTOR_ATTR: &str = "data-dsx-selector";
/// Attribute set on every element created by a `create` change.
pub const CREATED_ATTR: &str = "data-dsx-created";
/// Attribute set on top-level nodes inserted by the code injector.
pub const INJECTED_ATTR: &str = "data-dsx-injected";
/// Attribute set on the managed `<style>` element of an experiment.
pub const STYLES_ATTR: &str = "data-dsx-styles";

/// Inline style of the delete placeholder: in flow, zero-size, invisible.
pub const PLACEHOLDER_STYLE: &str =
    "display:block;width:0;height:0;margin:0;padding:0;border:0;overflow:hidden;visibility:hidden";

// =============================================================================
// Capabilities
// =============================================================================

bitflags::bitflags! {
    /// Capabilities granted to the change engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// `javascript` directives may run author code
        const SCRIPTS = 1 << 0;
        /// Code injections may insert raw markup into head/body
        const INJECTION = 1 << 1;
        /// All capabilities
        const ALL = Self::SCRIPTS.bits() | Self::INJECTION.bits();
    }
}

// =============================================================================
// Insert Position
// =============================================================================

/// Where a moved or created node goes relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Position {
    /// Immediately before the target, as a sibling
    Before,
    /// Immediately after the target, as a sibling
    After,
    /// First child of the target
    FirstChild,
    /// Last child of the target
    #[default]
    LastChild,
}

impl Position {
    /// Parse the wire name of a position.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "before" => Some(Self::Before),
            "after" => Some(Self::After),
            "firstChild" | "first-child" | "prepend" => Some(Self::FirstChild),
            "lastChild" | "last-child" | "append" => Some(Self::LastChild),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::FirstChild => "firstChild",
            Self::LastChild => "lastChild",
        }
    }
}

// =============================================================================
// Style Rules
// =============================================================================

/// Declarations for `styleRules` changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleRules {
    /// Raw CSS text, inserted verbatim
    Css(String),
    /// State name (`normal`, `hover`, `active`, `focus`, ...) to declarations
    States(BTreeMap<String, BTreeMap<String, String>>),
}

// =============================================================================
// Change Kinds
// =============================================================================

/// The mutation a [`DomChange`] performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// Replace text content
    Text(String),
    /// Replace inner markup
    Html(String),
    /// Set inline style properties (camelCase or kebab-case keys)
    Style(BTreeMap<String, String>),
    /// Add, then remove, class names
    Class { add: Vec<String>, remove: Vec<String> },
    /// Set attributes; `None` removes the attribute
    Attribute(BTreeMap<String, Option<String>>),
    /// Author code run with the matched element bound to `element`
    Javascript(String),
    /// Move matched elements next to / into the target
    Move { target: String, position: Position },
    /// Parse markup and insert every top-level node at the target
    Create {
        markup: String,
        target: String,
        position: Position,
    },
    /// Remove matched elements, leaving a tracking placeholder
    Delete,
    /// Upsert a rule into the experiment's managed stylesheet
    StyleRules { rules: StyleRules, important: bool },
}

impl ChangeKind {
    /// Wire name of the change type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Html(_) => "html",
            Self::Style(_) => "style",
            Self::Class { .. } => "class",
            Self::Attribute(_) => "attribute",
            Self::Javascript(_) => "javascript",
            Self::Move { .. } => "move",
            Self::Create { .. } => "create",
            Self::Delete => "delete",
            Self::StyleRules { .. } => "styleRules",
        }
    }
}

// =============================================================================
// DOM Change
// =============================================================================

/// One validated mutation directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomChange {
    /// CSS selector of the elements to mutate (empty for `create`)
    pub selector: String,
    pub kind: ChangeKind,
    /// Exposure waits for a target to become visible
    pub trigger_on_view: bool,
    /// Defer application until the selector matches, even outside SPA mode
    pub wait_for_element: bool,
    /// Scope the insertion observer to this subtree
    pub observer_root: Option<String>,
    /// Directive-level URL filter
    pub url_filter: Option<UrlFilter>,
    /// Disabled directives are inert
    pub enabled: bool,
}

impl DomChange {
    pub fn new(selector: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            selector: selector.into(),
            kind,
            trigger_on_view: false,
            wait_for_element: false,
            observer_root: None,
            url_filter: None,
            enabled: true,
        }
    }

    pub fn on_view(mut self) -> Self {
        self.trigger_on_view = true;
        self
    }

    pub fn waiting(mut self) -> Self {
        self.wait_for_element = true;
        self
    }

    pub fn within(mut self, root: impl Into<String>) -> Self {
        self.observer_root = Some(root.into());
        self
    }

    pub fn with_url_filter(mut self, filter: UrlFilter) -> Self {
        self.url_filter = Some(filter);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Selector that must match before the change can be applied.
    /// For `create` this is the insertion target.
    pub fn anchor_selector(&self) -> &str {
        match &self.kind {
            ChangeKind::Create { target, .. } => target,
            _ => &self.selector,
        }
    }

    /// Whether the directive is active on `url`.
    pub fn is_active_on(&self, url: &str) -> bool {
        self.enabled
            && self
                .url_filter
                .as_ref()
                .map_or(true, |filter| filter.matches(url))
    }
}

// =============================================================================
// Experiments and Variants
// =============================================================================

/// The DOM change payload of one variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantChanges {
    /// Variant-level URL filter; `None` means in scope everywhere
    pub url_filter: Option<UrlFilter>,
    pub changes: Vec<DomChange>,
}

impl VariantChanges {
    pub fn new(changes: Vec<DomChange>) -> Self {
        Self {
            url_filter: None,
            changes,
        }
    }

    pub fn filtered(url_filter: UrlFilter, changes: Vec<DomChange>) -> Self {
        Self {
            url_filter: Some(url_filter),
            changes,
        }
    }

    /// A variant is in scope when its filter matches `url` (or it has none).
    pub fn in_scope(&self, url: &str) -> bool {
        self.url_filter
            .as_ref()
            .map_or(true, |filter| filter.matches(url))
    }

    /// Changes that are enabled and whose own filter matches `url`.
    pub fn active_changes<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a DomChange> + 'a {
        self.changes.iter().filter(move |change| change.is_active_on(url))
    }
}

/// Everything DomShift reads from one variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variant {
    pub changes: VariantChanges,
    pub injections: InjectionSet,
}

impl Variant {
    pub fn with_changes(changes: VariantChanges) -> Self {
        Self {
            changes,
            injections: InjectionSet::default(),
        }
    }
}

/// An experiment with its ordered variants (index = variant number).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Experiment {
    pub name: String,
    pub variants: Vec<Variant>,
}

impl Experiment {
    pub fn new(name: impl Into<String>, variants: Vec<Variant>) -> Self {
        Self {
            name: name.into(),
            variants,
        }
    }

    /// Whether any variant declares DOM changes at all.
    pub fn has_dom_changes(&self) -> bool {
        self.variants.iter().any(|v| !v.changes.changes.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::UrlFilter;

    #[test]
    fn test_position_parse() {
        assert_eq!(Position::parse("before"), Some(Position::Before));
        assert_eq!(Position::parse("firstChild"), Some(Position::FirstChild));
        assert_eq!(Position::parse("lastChild"), Some(Position::LastChild));
        assert_eq!(Position::parse("middle"), None);
    }

    #[test]
    fn test_anchor_selector_for_create() {
        let change = DomChange::new(
            "",
            ChangeKind::Create {
                markup: "<p>hi</p>".into(),
                target: "#main".into(),
                position: Position::FirstChild,
            },
        );
        assert_eq!(change.anchor_selector(), "#main");

        let text = DomChange::new(".title", ChangeKind::Text("x".into()));
        assert_eq!(text.anchor_selector(), ".title");
    }

    #[test]
    fn test_disabled_change_is_inactive() {
        let change = DomChange::new(".a", ChangeKind::Delete).disabled();
        assert!(!change.is_active_on("https://example.com/"));
    }

    #[test]
    fn test_change_url_filter() {
        let change = DomChange::new(".a", ChangeKind::Delete)
            .with_url_filter(UrlFilter::glob(["*/checkout*"]));
        assert!(change.is_active_on("https://shop.test/checkout/step1"));
        assert!(!change.is_active_on("https://shop.test/cart"));
    }

    #[test]
    fn test_variant_scope() {
        let everywhere = VariantChanges::new(Vec::new());
        assert!(everywhere.in_scope("https://a.test/"));

        let scoped = VariantChanges::filtered(UrlFilter::glob(["https://a.test/*"]), Vec::new());
        assert!(scoped.in_scope("https://a.test/x"));
        assert!(!scoped.in_scope("https://b.test/x"));
    }
}
