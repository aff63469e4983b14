//! Pending change resolver
//!
//! Changes whose anchor selector matched nothing are parked here. The
//! resolver owns one insertion observer per distinct observer root (the
//! document root by default) and a [`FlushScheduler`] that coalesces bursts
//! of mutations into a single resolution pass.

use std::collections::HashMap;
use std::time::Duration;

use crate::dom::{Document, Observers};
use crate::types::DomChange;

/// Key of the document-root observer in the root map.
const DOCUMENT_ROOT: &str = "";

// =============================================================================
// Scheduler
// =============================================================================

/// Debounces mutation notifications into one flush per window.
///
/// The first notification asks the platform for a flush after `delay`; later
/// notifications are absorbed until [`FlushScheduler::begin_flush`] closes
/// the window.
#[derive(Debug, Clone)]
pub struct FlushScheduler {
    delay: Duration,
    scheduled: bool,
}

impl FlushScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            scheduled: false,
        }
    }

    /// Returns true when this call requested a new flush.
    pub fn notify<N, O>(&mut self, observers: &O) -> bool
    where
        O: Observers<N> + ?Sized,
    {
        if self.scheduled {
            return false;
        }
        self.scheduled = true;
        observers.request_flush(self.delay);
        true
    }

    /// Close the current window.
    pub fn begin_flush(&mut self) {
        self.scheduled = false;
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

// =============================================================================
// Pending Resolver
// =============================================================================

/// A change waiting for its anchor element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub change: DomChange,
    pub experiment: String,
    pub observer_root: Option<String>,
}

impl PendingChange {
    fn same_scope(&self, change: &DomChange, experiment: &str) -> bool {
        self.experiment == experiment
            && self.change.anchor_selector() == change.anchor_selector()
            && self.observer_root == change.observer_root
    }
}

#[derive(Debug)]
pub struct PendingResolver<N> {
    entries: Vec<PendingChange>,
    /// Observer root selector ("" = document root) to observed node.
    roots: HashMap<String, N>,
    scheduler: FlushScheduler,
}

impl<N: Clone + Eq + std::hash::Hash + std::fmt::Debug> PendingResolver<N> {
    pub fn new(debounce: Duration) -> Self {
        Self {
            entries: Vec::new(),
            roots: HashMap::new(),
            scheduler: FlushScheduler::new(debounce),
        }
    }

    /// Park `change` until its anchor appears. Returns false when an
    /// identical change is already pending for the same scope.
    pub fn defer<D, O>(&mut self, doc: &D, observers: &O, change: &DomChange, experiment: &str) -> bool
    where
        D: Document<Node = N>,
        O: Observers<N> + ?Sized,
    {
        let duplicate = self
            .entries
            .iter()
            .any(|entry| entry.same_scope(change, experiment) && entry.change == *change);
        if duplicate {
            return false;
        }

        self.watch(doc, observers, change.observer_root.as_deref());
        log::debug!(
            "[{}] deferring {} change for {:?}",
            experiment,
            change.kind.name(),
            change.anchor_selector()
        );
        self.entries.push(PendingChange {
            change: change.clone(),
            experiment: experiment.to_string(),
            observer_root: change.observer_root.clone(),
        });
        true
    }

    /// Make sure insertions under `root` (or the document root) are
    /// observed. A root selector that matches nothing falls back to the
    /// document root.
    pub fn watch<D, O>(&mut self, doc: &D, observers: &O, root: Option<&str>)
    where
        D: Document<Node = N>,
        O: Observers<N> + ?Sized,
    {
        let key = root.unwrap_or(DOCUMENT_ROOT);
        if self.roots.contains_key(key) {
            return;
        }

        let node = match root {
            Some(selector) => match doc.query_first(&doc.root(), selector) {
                Ok(Some(node)) => node,
                Ok(None) | Err(_) => {
                    log::debug!(
                        "observer root {:?} not found, observing the document root",
                        selector
                    );
                    self.watch(doc, observers, None);
                    return;
                }
            },
            None => doc.root(),
        };

        observers.observe_insertions(&node);
        self.roots.insert(key.to_string(), node);
    }

    /// A mutation batch was observed. Schedules one flush per window.
    pub fn notify_mutation<O>(&mut self, observers: &O) -> bool
    where
        O: Observers<N> + ?Sized,
    {
        self.scheduler.notify(observers)
    }

    /// Remove and return every pending change whose anchor now matches,
    /// together with the matched elements. Changes whose selector can never
    /// match are dropped.
    pub fn take_ready<D>(&mut self, doc: &D) -> Vec<(PendingChange, Vec<N>)>
    where
        D: Document<Node = N>,
    {
        self.scheduler.begin_flush();

        let mut ready = Vec::new();
        let mut remaining = Vec::with_capacity(self.entries.len());

        for entry in self.entries.drain(..) {
            let scope = entry
                .observer_root
                .as_deref()
                .and_then(|root| doc.query_first(&doc.root(), root).ok().flatten())
                .unwrap_or_else(|| doc.root());

            match doc.query_all(&scope, entry.change.anchor_selector()) {
                Ok(nodes) if nodes.is_empty() => remaining.push(entry),
                Ok(nodes) => ready.push((entry, nodes)),
                Err(e) => {
                    log::warn!(
                        "[{}] dropping pending {} change: {}",
                        entry.experiment,
                        entry.change.kind.name(),
                        e
                    );
                }
            }
        }

        self.entries = remaining;
        ready
    }

    /// Drop every pending change of `experiment`. Returns how many were removed.
    pub fn remove_all_pending(&mut self, experiment: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.experiment != experiment);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_for(&self, experiment: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.experiment == experiment)
            .count()
    }

    pub fn entries(&self) -> &[PendingChange] {
        &self.entries
    }

    /// Stop observing insertions once nothing is pending. [`watch`] observes
    /// again on demand. Returns the number of roots disconnected.
    ///
    /// [`watch`]: PendingResolver::watch
    pub fn release_idle_roots<O>(&mut self, observers: &O) -> usize
    where
        O: Observers<N> + ?Sized,
    {
        if !self.entries.is_empty() {
            return 0;
        }
        let released = self.roots.len();
        for (_, root) in self.roots.drain() {
            observers.disconnect_insertions(&root);
        }
        if released > 0 {
            log::debug!("nothing pending, released {} insertion roots", released);
        }
        released
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Disconnect every observer and clear all state.
    pub fn destroy<O>(&mut self, observers: &O)
    where
        O: Observers<N> + ?Sized,
    {
        for (_, root) in self.roots.drain() {
            observers.disconnect_insertions(&root);
        }
        self.entries.clear();
        self.scheduler.begin_flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{MemoryDocument, NodeId, RecordingObservers};
    use crate::types::{ChangeKind, DomChange};

    fn setup(markup: &str) -> (MemoryDocument, RecordingObservers<NodeId>, PendingResolver<NodeId>) {
        (
            MemoryDocument::from_html(markup).expect("fixture should parse"),
            RecordingObservers::new(),
            PendingResolver::new(Duration::from_millis(50)),
        )
    }

    #[test]
    fn scheduler_coalesces_until_flush() {
        let observers: RecordingObservers<NodeId> = RecordingObservers::new();
        let mut scheduler = FlushScheduler::new(Duration::from_millis(20));
        assert!(scheduler.notify(&observers));
        assert!(!scheduler.notify(&observers));
        assert!(!scheduler.notify(&observers));
        scheduler.begin_flush();
        assert!(scheduler.notify(&observers));
        assert_eq!(observers.flush_requests(), vec![Duration::from_millis(20); 2]);
    }

    #[test]
    fn defer_observes_document_root_and_dedupes() {
        let (doc, observers, mut resolver) = setup("<main></main>");
        let change = DomChange::new(".late", ChangeKind::Text("x".into()));

        assert!(resolver.defer(&doc, &observers, &change, "exp"));
        assert!(!resolver.defer(&doc, &observers, &change, "exp"));
        assert!(resolver.defer(&doc, &observers, &change, "other"));

        assert_eq!(resolver.len(), 2);
        assert!(observers.is_observing_insertions(&doc.root()));
        assert_eq!(observers.insertion_root_count(), 1);
    }

    #[test]
    fn observer_root_scopes_resolution() {
        let (doc, observers, mut resolver) = setup(r#"<div id="app"></div><div id="other"></div>"#);
        let app = doc.find("#app").expect("#app");
        let change = DomChange::new(".late", ChangeKind::Delete).within("#app");

        resolver.defer(&doc, &observers, &change, "exp");
        assert!(observers.is_observing_insertions(&app));

        let other = doc.find("#other").expect("#other");
        doc.append_html(other, r#"<p class="late"></p>"#).expect("append");
        assert!(resolver.take_ready(&doc).is_empty());

        doc.append_html(app, r#"<p class="late"></p>"#).expect("append");
        let ready = resolver.take_ready(&doc);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].1.len(), 1);
        assert!(resolver.is_empty());
    }

    #[test]
    fn missing_observer_root_falls_back_to_document() {
        let (doc, observers, mut resolver) = setup("<main></main>");
        let change = DomChange::new(".late", ChangeKind::Delete).within("#nowhere");
        resolver.defer(&doc, &observers, &change, "exp");
        assert!(observers.is_observing_insertions(&doc.root()));
    }

    #[test]
    fn take_ready_resolves_each_change_once() {
        let (doc, observers, mut resolver) = setup("<main></main>");
        let change = DomChange::new(".late", ChangeKind::Text("x".into()));
        resolver.defer(&doc, &observers, &change, "exp");

        assert!(resolver.take_ready(&doc).is_empty());
        let main = doc.find("main").expect("main");
        doc.append_html(main, r#"<span class="late"></span>"#).expect("append");

        assert_eq!(resolver.take_ready(&doc).len(), 1);
        assert!(resolver.take_ready(&doc).is_empty());
    }

    #[test]
    fn unsupported_selector_is_dropped() {
        let (doc, observers, mut resolver) = setup("<main></main>");
        let change = DomChange::new("p:hover", ChangeKind::Delete);
        resolver.defer(&doc, &observers, &change, "exp");
        assert!(resolver.take_ready(&doc).is_empty());
        assert!(resolver.is_empty());
    }

    #[test]
    fn remove_all_pending_by_experiment() {
        let (doc, observers, mut resolver) = setup("<main></main>");
        resolver.defer(&doc, &observers, &DomChange::new(".a", ChangeKind::Delete), "one");
        resolver.defer(&doc, &observers, &DomChange::new(".b", ChangeKind::Delete), "one");
        resolver.defer(&doc, &observers, &DomChange::new(".a", ChangeKind::Delete), "two");

        assert_eq!(resolver.remove_all_pending("one"), 2);
        assert_eq!(resolver.pending_for("two"), 1);
    }

    #[test]
    fn destroy_is_safe_when_empty_and_disconnects() {
        let (doc, observers, mut resolver) = setup("<main></main>");
        resolver.destroy(&observers);

        resolver.defer(&doc, &observers, &DomChange::new(".a", ChangeKind::Delete), "exp");
        resolver.notify_mutation(&observers);
        resolver.destroy(&observers);
        assert!(resolver.is_empty());
        assert_eq!(observers.insertion_root_count(), 0);

        resolver.destroy(&observers);
    }

    #[test]
    fn idle_roots_are_released_and_rewatched_on_demand() {
        let (doc, observers, mut resolver) = setup("<main></main>");
        let change = DomChange::new(".late", ChangeKind::Text("x".into()));
        resolver.defer(&doc, &observers, &change, "exp");
        assert_eq!(resolver.release_idle_roots(&observers), 0);
        assert_eq!(observers.insertion_root_count(), 1);

        let main = doc.find("main").expect("main");
        doc.append_html(main, r#"<p class="late"></p>"#).expect("append");
        assert_eq!(resolver.take_ready(&doc).len(), 1);
        assert_eq!(resolver.release_idle_roots(&observers), 1);
        assert_eq!(observers.insertion_root_count(), 0);
        assert_eq!(resolver.root_count(), 0);

        resolver.defer(&doc, &observers, &change, "exp");
        assert_eq!(observers.insertion_root_count(), 1);
    }
}
