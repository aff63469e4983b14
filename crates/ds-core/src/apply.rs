//! Change applicator
//!
//! Applies one typed [`DomChange`] to every matching element, deferring it to
//! the [`PendingResolver`] when nothing matches and deferral is allowed.
//! Every edit is recorded in the [`ChangeLedger`] so it can be reverted.

use std::time::Duration;

use crate::dom::{css_property_name, Document, Observers};
use crate::ledger::{ChangeLedger, Undo};
use crate::pending::PendingResolver;
use crate::styles::StyleScopes;
use crate::types::{
    Capabilities, ChangeKind, DomChange, Position, CREATED_ATTR, PLACEHOLDER_ATTR,
    PLACEHOLDER_SELECTOR_ATTR, PLACEHOLDER_STYLE,
};

#[derive(Debug)]
pub struct ChangeApplicator<N> {
    capabilities: Capabilities,
    spa_mode: bool,
    pending: PendingResolver<N>,
    styles: StyleScopes<N>,
    ledger: ChangeLedger<N>,
}

impl<N: Clone + Eq + std::hash::Hash + std::fmt::Debug> ChangeApplicator<N> {
    pub fn new(capabilities: Capabilities, spa_mode: bool, debounce: Duration) -> Self {
        Self {
            capabilities,
            spa_mode,
            pending: PendingResolver::new(debounce),
            styles: StyleScopes::new(),
            ledger: ChangeLedger::new(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn pending(&self) -> &PendingResolver<N> {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingResolver<N> {
        &mut self.pending
    }

    pub fn ledger(&self) -> &ChangeLedger<N> {
        &self.ledger
    }

    /// Apply `change` for `experiment`.
    ///
    /// Returns false when the change is disabled, or when nothing matched and
    /// deferral is not allowed. A deferred change returns true.
    pub fn apply<D, O>(&mut self, doc: &D, observers: &O, change: &DomChange, experiment: &str) -> bool
    where
        D: Document<Node = N>,
        O: Observers<N> + ?Sized,
    {
        if !change.enabled {
            log::debug!("[{}] skipping disabled {} change", experiment, change.kind.name());
            return false;
        }

        if let ChangeKind::StyleRules { rules, important } = &change.kind {
            return match self
                .styles
                .upsert(doc, experiment, &change.selector, rules, *important)
            {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("[{}] styleRules for {:?} failed: {}", experiment, change.selector, e);
                    false
                }
            };
        }

        let nodes = match doc.query_all(&doc.root(), change.anchor_selector()) {
            Ok(nodes) => nodes,
            Err(e) => {
                log::warn!("[{}] {} change not applied: {}", experiment, change.kind.name(), e);
                return false;
            }
        };

        if nodes.is_empty() {
            if change.wait_for_element || self.spa_mode {
                self.pending.defer(doc, observers, change, experiment);
                return true;
            }
            log::debug!(
                "[{}] no element matches {:?}",
                experiment,
                change.anchor_selector()
            );
            return false;
        }

        self.apply_to(doc, change, experiment, &nodes);
        true
    }

    /// Apply `change` to already-resolved anchor elements. For `create`,
    /// `nodes` are insertion targets and the first one is used.
    pub fn apply_to<D>(&mut self, doc: &D, change: &DomChange, experiment: &str, nodes: &[N]) -> usize
    where
        D: Document<Node = N>,
    {
        match &change.kind {
            ChangeKind::Text(text) => {
                for node in nodes {
                    let old = doc.inner_html(node);
                    doc.set_text_content(node, text);
                    self.ledger.record(experiment, Undo::Markup { node: node.clone(), old });
                }
                nodes.len()
            }
            ChangeKind::Html(markup) => {
                let mut applied = 0;
                for node in nodes {
                    let old = doc.inner_html(node);
                    match doc.set_inner_html(node, markup) {
                        Ok(()) => {
                            self.ledger.record(experiment, Undo::Markup { node: node.clone(), old });
                            applied += 1;
                        }
                        Err(e) => log::warn!("[{}] html change failed: {}", experiment, e),
                    }
                }
                applied
            }
            ChangeKind::Style(declarations) => {
                for node in nodes {
                    let mut props = Vec::with_capacity(declarations.len());
                    for (key, value) in declarations {
                        let name = css_property_name(key);
                        props.push((name.clone(), doc.style_property(node, &name)));
                        doc.set_style_property(node, &name, value);
                    }
                    self.ledger.record(experiment, Undo::Style { node: node.clone(), props });
                }
                nodes.len()
            }
            ChangeKind::Class { add, remove } => {
                for node in nodes {
                    let mut added = Vec::new();
                    for class in add {
                        if !doc.has_class(node, class) {
                            doc.add_class(node, class);
                            added.push(class.clone());
                        }
                    }
                    let mut removed = Vec::new();
                    for class in remove {
                        if doc.has_class(node, class) {
                            doc.remove_class(node, class);
                            removed.push(class.clone());
                        }
                    }
                    self.ledger.record(
                        experiment,
                        Undo::Class {
                            node: node.clone(),
                            added,
                            removed,
                        },
                    );
                }
                nodes.len()
            }
            ChangeKind::Attribute(attributes) => {
                for node in nodes {
                    let mut old = Vec::with_capacity(attributes.len());
                    for (name, value) in attributes {
                        old.push((name.clone(), doc.attribute(node, name)));
                        match value {
                            Some(value) => doc.set_attribute(node, name, value),
                            None => doc.remove_attribute(node, name),
                        }
                    }
                    self.ledger.record(experiment, Undo::Attributes { node: node.clone(), old });
                }
                nodes.len()
            }
            ChangeKind::Javascript(body) => {
                if !self.capabilities.contains(Capabilities::SCRIPTS) {
                    log::warn!(
                        "[{}] javascript change for {:?} blocked: scripts are disabled",
                        experiment,
                        change.selector
                    );
                    return 0;
                }
                let mut ran = 0;
                for node in nodes {
                    match doc.run_script(node, body) {
                        Ok(()) => ran += 1,
                        Err(e) => log::error!(
                            "[{}] javascript change for {:?} threw: {}",
                            experiment,
                            change.selector,
                            e
                        ),
                    }
                }
                ran
            }
            ChangeKind::Move { target, position } => {
                self.move_nodes(doc, experiment, nodes, target, *position)
            }
            ChangeKind::Create {
                markup, position, ..
            } => match nodes.first() {
                Some(target) => self.create_nodes(doc, experiment, target, markup, *position),
                None => 0,
            },
            ChangeKind::Delete => {
                let mut deleted = 0;
                for node in nodes {
                    if self.delete_node(doc, experiment, &change.selector, node) {
                        deleted += 1;
                    }
                }
                deleted
            }
            ChangeKind::StyleRules { rules, important } => {
                match self
                    .styles
                    .upsert(doc, experiment, &change.selector, rules, *important)
                {
                    Ok(()) => 1,
                    Err(e) => {
                        log::warn!("[{}] styleRules failed: {}", experiment, e);
                        0
                    }
                }
            }
        }
    }

    fn move_nodes<D>(&mut self, doc: &D, experiment: &str, nodes: &[N], target: &str, position: Position) -> usize
    where
        D: Document<Node = N>,
    {
        let target_node = match doc.query_first(&doc.root(), target) {
            Ok(Some(node)) => node,
            Ok(None) => {
                log::debug!("[{}] move target {:?} not found, leaving elements in place", experiment, target);
                return 0;
            }
            Err(e) => {
                log::warn!("[{}] move target {:?}: {}", experiment, target, e);
                return 0;
            }
        };

        let mut moved = 0;
        for node in nodes {
            let Some(parent) = doc.parent(node) else {
                continue;
            };
            let next = doc.next_sibling(node);
            match doc.insert(node, &target_node, position) {
                Ok(()) => {
                    self.ledger.record(
                        experiment,
                        Undo::Moved {
                            node: node.clone(),
                            parent,
                            next,
                        },
                    );
                    moved += 1;
                }
                Err(e) => log::warn!("[{}] move failed: {}", experiment, e),
            }
        }
        moved
    }

    fn create_nodes<D>(&mut self, doc: &D, experiment: &str, target: &N, markup: &str, position: Position) -> usize
    where
        D: Document<Node = N>,
    {
        let created = match doc.parse_fragment(markup) {
            Ok(nodes) => nodes,
            Err(e) => {
                log::warn!("[{}] create markup rejected: {}", experiment, e);
                return 0;
            }
        };

        // First-child and after insertion at a fixed anchor reverse the
        // sequence, so walk those backwards to keep document order.
        let ordered: Vec<&N> = match position {
            Position::FirstChild | Position::After => created.iter().rev().collect(),
            Position::Before | Position::LastChild => created.iter().collect(),
        };

        let mut inserted = 0;
        for node in ordered {
            if doc.is_element(node) {
                doc.set_attribute(node, CREATED_ATTR, experiment);
            }
            match doc.insert(node, target, position) {
                Ok(()) => {
                    self.ledger.record(experiment, Undo::Created { node: node.clone() });
                    inserted += 1;
                }
                Err(e) => log::warn!("[{}] create insert failed: {}", experiment, e),
            }
        }
        inserted
    }

    fn delete_node<D>(&mut self, doc: &D, experiment: &str, selector: &str, node: &N) -> bool
    where
        D: Document<Node = N>,
    {
        let placeholder = doc.create_element("span");
        doc.set_attribute(&placeholder, PLACEHOLDER_ATTR, experiment);
        doc.set_attribute(&placeholder, PLACEHOLDER_SELECTOR_ATTR, selector);
        doc.set_attribute(&placeholder, "aria-hidden", "true");
        doc.set_attribute(&placeholder, "style", PLACEHOLDER_STYLE);

        match doc.replace(node, &placeholder) {
            Ok(()) => {
                self.ledger.record(
                    experiment,
                    Undo::Deleted {
                        node: node.clone(),
                        placeholder,
                    },
                );
                true
            }
            Err(e) => {
                log::warn!("[{}] delete of {:?} failed: {}", experiment, selector, e);
                false
            }
        }
    }

    /// Apply every pending change whose anchor now exists. Returns the
    /// number of changes resolved.
    pub fn resolve_pending<D>(&mut self, doc: &D) -> usize
    where
        D: Document<Node = N>,
    {
        let ready = self.pending.take_ready(doc);
        for (entry, nodes) in &ready {
            log::debug!(
                "[{}] resolved pending {} change for {:?}",
                entry.experiment,
                entry.change.kind.name(),
                entry.change.anchor_selector()
            );
            self.apply_to(doc, &entry.change, &entry.experiment, nodes);
        }
        ready.len()
    }

    /// Undo everything `experiment` did and forget its pending changes.
    pub fn revert<D>(&mut self, doc: &D, experiment: &str) -> usize
    where
        D: Document<Node = N>,
    {
        self.pending.remove_all_pending(experiment);
        self.styles.remove(doc, experiment);
        self.ledger.revert(doc, experiment)
    }

    /// Disconnect observers and drop all bookkeeping. The document keeps
    /// whatever was applied.
    pub fn destroy<O>(&mut self, observers: &O)
    where
        O: Observers<N> + ?Sized,
    {
        self.pending.destroy(observers);
        self.styles = StyleScopes::new();
        self.ledger.clear();
    }
}
