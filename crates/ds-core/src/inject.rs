//! Code injector
//!
//! Inserts raw markup at the four page anchors. Injection keys have the form
//! `<location><optional integer priority>`, e.g. `headStart`, `bodyEnd10`.
//! Within a location higher priorities come first in document order.

use std::collections::HashMap;

use crate::dom::Document;
use crate::types::{Position, INJECTED_ATTR};
use crate::url::UrlFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InjectionLocation {
    HeadStart,
    HeadEnd,
    BodyStart,
    BodyEnd,
}

impl InjectionLocation {
    pub const ALL: [InjectionLocation; 4] = [
        InjectionLocation::HeadStart,
        InjectionLocation::HeadEnd,
        InjectionLocation::BodyStart,
        InjectionLocation::BodyEnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeadStart => "headStart",
            Self::HeadEnd => "headEnd",
            Self::BodyStart => "bodyStart",
            Self::BodyEnd => "bodyEnd",
        }
    }

    fn is_start(&self) -> bool {
        matches!(self, Self::HeadStart | Self::BodyStart)
    }
}

/// Split an injection key into location and priority (default 0).
pub fn parse_injection_key(key: &str) -> Option<(InjectionLocation, i64)> {
    InjectionLocation::ALL.iter().find_map(|&location| {
        let rest = key.strip_prefix(location.as_str())?;
        if rest.is_empty() {
            return Some((location, 0));
        }
        rest.parse::<i64>().ok().map(|priority| (location, priority))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub location: InjectionLocation,
    pub priority: i64,
    pub markup: String,
}

/// Injections declared by one variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionSet {
    pub url_filter: Option<UrlFilter>,
    pub items: Vec<Injection>,
}

impl InjectionSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn in_scope(&self, url: &str) -> bool {
        self.url_filter
            .as_ref()
            .map_or(true, |filter| filter.matches(url))
    }

    /// Items of `location`, highest priority first (stable for ties).
    pub fn ordered(&self, location: InjectionLocation) -> Vec<&Injection> {
        let mut items: Vec<&Injection> = self
            .items
            .iter()
            .filter(|item| item.location == location)
            .collect();
        items.sort_by(|a, b| b.priority.cmp(&a.priority));
        items
    }
}

#[derive(Debug)]
pub struct CodeInjector<N> {
    /// Experiment to `(container id, node)` of everything it inserted
    injected: HashMap<String, Vec<(String, N)>>,
    next_id: usize,
}

impl<N> Default for CodeInjector<N> {
    fn default() -> Self {
        Self {
            injected: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<N: Clone + Eq + std::hash::Hash + std::fmt::Debug> CodeInjector<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert every in-scope item of `set`. Returns the number of nodes
    /// inserted.
    pub fn inject<D>(&mut self, doc: &D, experiment: &str, set: &InjectionSet, url: &str) -> usize
    where
        D: Document<Node = N>,
    {
        if set.is_empty() {
            return 0;
        }
        if !set.in_scope(url) {
            log::debug!("[{}] injections out of scope for {}", experiment, url);
            return 0;
        }

        let mut inserted = 0;
        for location in InjectionLocation::ALL {
            let mut items = set.ordered(location);
            if items.is_empty() {
                continue;
            }
            let anchor = match location {
                InjectionLocation::HeadStart | InjectionLocation::HeadEnd => doc.head(),
                InjectionLocation::BodyStart | InjectionLocation::BodyEnd => doc.body(),
            };
            let Some(anchor) = anchor else {
                log::warn!("[{}] no anchor for {}", experiment, location.as_str());
                continue;
            };

            // Repeated first-child insertion reverses order.
            let position = if location.is_start() {
                items.reverse();
                Position::FirstChild
            } else {
                Position::LastChild
            };

            for item in items {
                inserted += self.insert_item(doc, experiment, &anchor, item, position);
            }
        }
        inserted
    }

    fn insert_item<D>(&mut self, doc: &D, experiment: &str, anchor: &N, item: &Injection, position: Position) -> usize
    where
        D: Document<Node = N>,
    {
        let mut nodes = match doc.parse_fragment(&item.markup) {
            Ok(nodes) => nodes,
            Err(e) => {
                log::warn!("[{}] {} injection rejected: {}", experiment, item.location.as_str(), e);
                return 0;
            }
        };
        if position == Position::FirstChild {
            nodes.reverse();
        }

        let id = format!("dsx-inject-{}-{}", experiment, self.next_id);
        self.next_id += 1;

        let mut inserted = 0;
        for node in nodes {
            if doc.is_element(&node) {
                doc.set_attribute(&node, INJECTED_ATTR, &id);
            }
            match doc.insert(&node, anchor, position) {
                Ok(()) => {
                    self.injected
                        .entry(experiment.to_string())
                        .or_default()
                        .push((id.clone(), node));
                    inserted += 1;
                }
                Err(e) => log::warn!("[{}] injection failed: {}", experiment, e),
            }
        }
        inserted
    }

    /// Remove everything injected for `experiment`.
    pub fn remove<D>(&mut self, doc: &D, experiment: &str) -> usize
    where
        D: Document<Node = N>,
    {
        let nodes = self.injected.remove(experiment).unwrap_or_default();
        for (_, node) in &nodes {
            doc.remove(node);
        }
        nodes.len()
    }

    pub fn injected_ids(&self, experiment: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .injected
            .get(experiment)
            .map(|nodes| nodes.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default();
        ids.dedup();
        ids
    }

    /// Drop bookkeeping; injected markup stays in the page.
    pub fn destroy(&mut self) {
        self.injected.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{MemoryDocument, NodeId};

    fn item(location: InjectionLocation, priority: i64, markup: &str) -> Injection {
        Injection {
            location,
            priority,
            markup: markup.to_string(),
        }
    }

    #[test]
    fn test_parse_injection_key() {
        assert_eq!(parse_injection_key("headStart"), Some((InjectionLocation::HeadStart, 0)));
        assert_eq!(parse_injection_key("bodyEnd10"), Some((InjectionLocation::BodyEnd, 10)));
        assert_eq!(parse_injection_key("bodyStart-2"), Some((InjectionLocation::BodyStart, -2)));
        assert_eq!(parse_injection_key("bodyEndish"), None);
        assert_eq!(parse_injection_key("footer"), None);
    }

    #[test]
    fn start_and_end_keep_descending_priority_order() {
        let doc = MemoryDocument::from_html("<p>page</p>").expect("fixture");
        let mut injector: CodeInjector<NodeId> = CodeInjector::new();
        let set = InjectionSet {
            url_filter: None,
            items: vec![
                item(InjectionLocation::BodyStart, 1, "<i>low</i>"),
                item(InjectionLocation::BodyStart, 5, "<i>high</i>"),
                item(InjectionLocation::BodyEnd, 0, "<b>end-low</b>"),
                item(InjectionLocation::BodyEnd, 9, "<b>end-high</b>"),
            ],
        };

        assert_eq!(injector.inject(&doc, "exp", &set, "https://a.test/"), 4);
        let body = doc.body().expect("body");
        let texts: Vec<String> = doc
            .children(body)
            .iter()
            .map(|node| doc.text_content(node))
            .collect();
        assert_eq!(texts, vec!["high", "low", "page", "end-high", "end-low"]);
        assert_eq!(doc.find_all("[data-dsx-injected]").len(), 4);
    }

    #[test]
    fn multi_node_item_keeps_its_order_at_start() {
        let doc = MemoryDocument::new();
        let mut injector: CodeInjector<NodeId> = CodeInjector::new();
        let set = InjectionSet {
            url_filter: None,
            items: vec![item(InjectionLocation::HeadStart, 0, "<meta name=a><meta name=b>")],
        };
        injector.inject(&doc, "exp", &set, "https://a.test/");
        let head = doc.head().expect("head");
        let names: Vec<Option<String>> = doc
            .children(head)
            .iter()
            .map(|node| doc.attribute(node, "name"))
            .collect();
        assert_eq!(names, vec![Some("a".into()), Some("b".into())]);
    }

    #[test]
    fn url_filter_and_removal() {
        let doc = MemoryDocument::new();
        let mut injector: CodeInjector<NodeId> = CodeInjector::new();
        let set = InjectionSet {
            url_filter: Some(UrlFilter::glob(["*/checkout"])),
            items: vec![item(InjectionLocation::HeadEnd, 0, "<style>.x{}</style>")],
        };

        assert_eq!(injector.inject(&doc, "exp", &set, "https://a.test/home"), 0);
        assert_eq!(injector.inject(&doc, "exp", &set, "https://a.test/checkout"), 1);
        assert_eq!(injector.injected_ids("exp"), vec!["dsx-inject-exp-0".to_string()]);
        assert_eq!(injector.remove(&doc, "exp"), 1);
        assert!(doc.find("style").is_none());
    }
}
