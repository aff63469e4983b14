//! Edit ledger
//!
//! Every edit the applicator makes records enough to undo it. Reverting an
//! experiment replays its undo records newest first, which restores the page
//! for SPA navigation and experiment removal.

use crate::dom::Document;
use crate::types::Position;

/// Undo data for one applied edit on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Undo<N> {
    /// Previous inner markup (text and html changes)
    Markup { node: N, old: String },
    /// Previous inline values of the properties that were set
    Style {
        node: N,
        props: Vec<(String, Option<String>)>,
    },
    /// Classes actually added and actually removed
    Class {
        node: N,
        added: Vec<String>,
        removed: Vec<String>,
    },
    /// Previous values of the attributes that were touched
    Attributes {
        node: N,
        old: Vec<(String, Option<String>)>,
    },
    /// Original position of a moved element
    Moved { node: N, parent: N, next: Option<N> },
    /// A node inserted by `create`
    Created { node: N },
    /// A deleted element and the placeholder standing in for it
    Deleted { node: N, placeholder: N },
}

#[derive(Debug)]
struct Entry<N> {
    experiment: String,
    undo: Undo<N>,
}

#[derive(Debug)]
pub struct ChangeLedger<N> {
    entries: Vec<Entry<N>>,
}

impl<N> Default for ChangeLedger<N> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<N: Clone + Eq + std::hash::Hash + std::fmt::Debug> ChangeLedger<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, experiment: &str, undo: Undo<N>) {
        self.entries.push(Entry {
            experiment: experiment.to_string(),
            undo,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn edits_for(&self, experiment: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.experiment == experiment)
            .count()
    }

    /// Undo every edit of `experiment`, newest first. Returns the number of
    /// edits reverted.
    pub fn revert<D>(&mut self, doc: &D, experiment: &str) -> usize
    where
        D: Document<Node = N>,
    {
        let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.experiment == experiment);
        self.entries = rest;

        let count = mine.len();
        for entry in mine.into_iter().rev() {
            undo(doc, entry.undo);
        }
        if count > 0 {
            log::debug!("[{}] reverted {} edits", experiment, count);
        }
        count
    }

    /// Forget everything without touching the document.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn undo<D: Document>(doc: &D, record: Undo<D::Node>) {
    match record {
        Undo::Markup { node, old } => {
            if let Err(e) = doc.set_inner_html(&node, &old) {
                log::warn!("failed to restore markup: {}", e);
            }
        }
        Undo::Style { node, props } => {
            for (name, old) in props {
                match old {
                    Some(value) => doc.set_style_property(&node, &name, &value),
                    None => doc.remove_style_property(&node, &name),
                }
            }
        }
        Undo::Class {
            node,
            added,
            removed,
        } => {
            for class in &added {
                doc.remove_class(&node, class);
            }
            for class in &removed {
                doc.add_class(&node, class);
            }
        }
        Undo::Attributes { node, old } => {
            for (name, value) in old {
                match value {
                    Some(value) => doc.set_attribute(&node, &name, &value),
                    None => doc.remove_attribute(&node, &name),
                }
            }
        }
        Undo::Moved { node, parent, next } => {
            let result = match next {
                Some(next) if doc.parent(&next).as_ref() == Some(&parent) => {
                    doc.insert(&node, &next, Position::Before)
                }
                _ => doc.insert(&node, &parent, Position::LastChild),
            };
            if let Err(e) = result {
                log::warn!("failed to restore moved element: {}", e);
            }
        }
        Undo::Created { node } => doc.remove(&node),
        Undo::Deleted { node, placeholder } => {
            if doc.is_connected(&placeholder) {
                if let Err(e) = doc.replace(&placeholder, &node) {
                    log::warn!("failed to restore deleted element: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{MemoryDocument, NodeId};

    #[test]
    fn reverts_in_reverse_order_per_experiment() {
        let doc = MemoryDocument::from_html(r#"<p id="p" class="a">old</p>"#).expect("fixture");
        let p = doc.find("#p").expect("#p");
        let mut ledger: ChangeLedger<NodeId> = ChangeLedger::new();

        ledger.record(
            "exp",
            Undo::Markup {
                node: p,
                old: doc.inner_html(&p),
            },
        );
        doc.set_text_content(&p, "first");
        ledger.record(
            "exp",
            Undo::Markup {
                node: p,
                old: doc.inner_html(&p),
            },
        );
        doc.set_text_content(&p, "second");

        ledger.record(
            "other",
            Undo::Class {
                node: p,
                added: vec!["b".into()],
                removed: Vec::new(),
            },
        );
        doc.add_class(&p, "b");

        assert_eq!(ledger.revert(&doc, "exp"), 2);
        assert_eq!(doc.text_content(&p), "old");
        assert!(doc.has_class(&p, "b"));
        assert_eq!(ledger.edits_for("other"), 1);
    }

    #[test]
    fn restores_moved_and_deleted_elements() {
        let doc = MemoryDocument::from_html(r#"<ul><li id="a">a</li><li id="b">b</li></ul><div id="t"></div>"#)
            .expect("fixture");
        let a = doc.find("#a").expect("#a");
        let b = doc.find("#b").expect("#b");
        let ul = doc.find("ul").expect("ul");
        let t = doc.find("#t").expect("#t");
        let mut ledger: ChangeLedger<NodeId> = ChangeLedger::new();

        ledger.record(
            "exp",
            Undo::Moved {
                node: a,
                parent: ul,
                next: Some(b),
            },
        );
        doc.insert(&a, &t, Position::LastChild).expect("move");

        let placeholder = doc.create_element("span");
        doc.replace(&b, &placeholder).expect("replace");
        ledger.record("exp", Undo::Deleted { node: b, placeholder });

        ledger.revert(&doc, "exp");
        assert_eq!(
            doc.inner_html(&ul),
            r#"<li id="a">a</li><li id="b">b</li>"#
        );
        assert!(!doc.is_connected(&placeholder));
    }
}
