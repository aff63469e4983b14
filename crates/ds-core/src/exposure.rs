//! Exposure tracker
//!
//! Decides when a user counts as exposed to an experiment. The policy is
//! derived from every variant of the experiment, never from the assigned one,
//! so all assignments of an experiment fire at the same life-cycle point:
//!
//! - variants whose URL filter does not match are ignored entirely
//! - no in-scope active change: the experiment is skipped on this page
//! - any in-scope change without `trigger_on_view`: fire once the plugin
//!   has initialized
//! - otherwise: watch every in-scope target of every variant and fire on the
//!   first intersection
//!
//! Firing is idempotent: the host is called once, then every visibility
//! observation of the experiment is dropped.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use crate::dom::{Document, Observers};
use crate::host::ExperimentHost;
use crate::types::{Experiment, PLACEHOLDER_ATTR, PLACEHOLDER_SELECTOR_ATTR};

// =============================================================================
// Plan
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Immediate,
    Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposurePhase {
    /// Nothing in scope on this page view
    Skipped,
    ImmediatePending,
    ViewportPending,
    /// Terminal for the page view
    Triggered,
}

/// An element selector to watch for visibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewportTarget {
    pub selector: String,
    pub observer_root: Option<String>,
}

/// Cross-variant exposure policy for one experiment on one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposurePlan {
    /// `None` when the experiment is skipped
    pub mode: Option<TriggerMode>,
    pub in_scope_variants: Vec<usize>,
    /// Viewport targets; empty unless `mode` is `Viewport`
    pub targets: Vec<ViewportTarget>,
}

impl ExposurePlan {
    pub fn phase(&self) -> ExposurePhase {
        match self.mode {
            None => ExposurePhase::Skipped,
            Some(TriggerMode::Immediate) => ExposurePhase::ImmediatePending,
            Some(TriggerMode::Viewport) => ExposurePhase::ViewportPending,
        }
    }
}

/// Compute the exposure policy of `experiment` on `url` from all variants.
pub fn plan_exposure(experiment: &Experiment, url: &str) -> ExposurePlan {
    let in_scope_variants: Vec<usize> = experiment
        .variants
        .iter()
        .enumerate()
        .filter(|(_, variant)| variant.changes.in_scope(url))
        .map(|(index, _)| index)
        .collect();

    let mut any_change = false;
    let mut any_immediate = false;
    let mut targets = BTreeSet::new();

    for &index in &in_scope_variants {
        for change in experiment.variants[index].changes.active_changes(url) {
            any_change = true;
            if !change.trigger_on_view {
                any_immediate = true;
                continue;
            }
            targets.insert(ViewportTarget {
                selector: change.anchor_selector().to_string(),
                observer_root: change.observer_root.clone(),
            });
        }
    }

    let mode = if !any_change {
        None
    } else if any_immediate {
        Some(TriggerMode::Immediate)
    } else {
        Some(TriggerMode::Viewport)
    };

    ExposurePlan {
        mode,
        in_scope_variants,
        targets: if mode == Some(TriggerMode::Viewport) {
            targets.into_iter().collect()
        } else {
            Vec::new()
        },
    }
}

// =============================================================================
// Tracker
// =============================================================================

#[derive(Debug)]
pub struct ExposureState<N> {
    pub phase: ExposurePhase,
    pub plan: ExposurePlan,
    observed: HashSet<N>,
}

impl<N> ExposureState<N> {
    pub fn observed_count(&self) -> usize {
        self.observed.len()
    }
}

#[derive(Debug)]
pub struct ExposureTracker<N> {
    /// Ordered so firing order is deterministic.
    states: BTreeMap<String, ExposureState<N>>,
    /// Observed node to the experiments watching it.
    watchers: HashMap<N, BTreeSet<String>>,
    threshold: f64,
    live: bool,
}

impl<N: Clone + Eq + Hash + std::fmt::Debug> ExposureTracker<N> {
    pub fn new(threshold: f64) -> Self {
        Self {
            states: BTreeMap::new(),
            watchers: HashMap::new(),
            threshold,
            live: true,
        }
    }

    /// Evaluate `experiment` once. Later calls return the existing phase.
    pub fn evaluate(&mut self, experiment: &Experiment, url: &str) -> ExposurePhase {
        if let Some(state) = self.states.get(&experiment.name) {
            return state.phase;
        }

        let plan = plan_exposure(experiment, url);
        let phase = plan.phase();
        log::debug!(
            "[{}] exposure {:?} (in-scope variants {:?}, {} viewport targets)",
            experiment.name,
            phase,
            plan.in_scope_variants,
            plan.targets.len()
        );
        self.states.insert(
            experiment.name.clone(),
            ExposureState {
                phase,
                plan,
                observed: HashSet::new(),
            },
        );
        phase
    }

    /// Re-evaluate an experiment that was skipped, e.g. after SPA navigation.
    /// Other phases are kept.
    pub fn reevaluate_if_skipped(&mut self, experiment: &Experiment, url: &str) -> ExposurePhase {
        if self.phase(&experiment.name) == Some(ExposurePhase::Skipped) {
            self.states.remove(&experiment.name);
        }
        self.evaluate(experiment, url)
    }

    pub fn phase(&self, experiment: &str) -> Option<ExposurePhase> {
        self.states.get(experiment).map(|state| state.phase)
    }

    pub fn state(&self, experiment: &str) -> Option<&ExposureState<N>> {
        self.states.get(experiment)
    }

    /// Observer roots of every target still waiting for visibility.
    pub fn viewport_roots(&self) -> BTreeSet<Option<String>> {
        self.states
            .values()
            .filter(|state| state.phase == ExposurePhase::ViewportPending)
            .flat_map(|state| state.plan.targets.iter().map(|t| t.observer_root.clone()))
            .collect()
    }

    /// Attach visibility observation to every present target of every
    /// viewport-pending experiment, including delete placeholders. Drops
    /// observation of nodes that left the document. Returns the number of
    /// newly observed (experiment, node) pairs.
    pub fn discover<D, O>(&mut self, doc: &D, observers: &O) -> usize
    where
        D: Document<Node = N>,
        O: Observers<N> + ?Sized,
    {
        if !self.live {
            return 0;
        }

        self.prune_disconnected(doc, observers);

        let placeholder_selector = format!("[{PLACEHOLDER_ATTR}]");

        let mut added = 0;
        for (name, state) in self.states.iter_mut() {
            if state.phase != ExposurePhase::ViewportPending {
                continue;
            }

            for target in &state.plan.targets {
                let scope = target
                    .observer_root
                    .as_deref()
                    .and_then(|root| doc.query_first(&doc.root(), root).ok().flatten())
                    .unwrap_or_else(|| doc.root());

                let mut found = match doc.query_all(&scope, &target.selector) {
                    Ok(nodes) => nodes,
                    Err(e) => {
                        log::debug!("[{}] viewport target {:?}: {}", name, target.selector, e);
                        Vec::new()
                    }
                };
                let placeholders = doc.query_all(&scope, &placeholder_selector).unwrap_or_default();
                found.extend(placeholders.into_iter().filter(|node| {
                    doc.attribute(node, PLACEHOLDER_SELECTOR_ATTR).as_deref()
                        == Some(target.selector.as_str())
                }));

                for node in found {
                    if !state.observed.insert(node.clone()) {
                        continue;
                    }
                    let watchers = self.watchers.entry(node.clone()).or_default();
                    if watchers.is_empty() {
                        observers.observe_visibility(&node);
                    }
                    watchers.insert(name.clone());
                    added += 1;
                }
            }
        }
        added
    }

    fn prune_disconnected<D, O>(&mut self, doc: &D, observers: &O)
    where
        D: Document<Node = N>,
        O: Observers<N> + ?Sized,
    {
        let gone: Vec<N> = self
            .watchers
            .keys()
            .filter(|node| !doc.is_connected(node))
            .cloned()
            .collect();
        for node in gone {
            observers.unobserve_visibility(&node);
            if let Some(names) = self.watchers.remove(&node) {
                for name in names {
                    if let Some(state) = self.states.get_mut(&name) {
                        state.observed.remove(&node);
                    }
                }
            }
        }
    }

    /// Fire every experiment waiting for initialization to finish.
    pub fn fire_ready<H, O>(&mut self, host: &H, observers: &O) -> Vec<String>
    where
        H: ExperimentHost + ?Sized,
        O: Observers<N> + ?Sized,
    {
        let ready: Vec<String> = self
            .states
            .iter()
            .filter(|(_, state)| state.phase == ExposurePhase::ImmediatePending)
            .map(|(name, _)| name.clone())
            .collect();
        ready
            .into_iter()
            .filter(|name| self.trigger(name, host, observers))
            .collect()
    }

    /// A watched node intersected the viewport. Returns the experiments that
    /// fired.
    pub fn handle_intersection<H, O>(&mut self, node: &N, ratio: f64, host: &H, observers: &O) -> Vec<String>
    where
        H: ExperimentHost + ?Sized,
        O: Observers<N> + ?Sized,
    {
        if !self.live || ratio <= 0.0 || ratio < self.threshold {
            return Vec::new();
        }
        let names: Vec<String> = match self.watchers.get(node) {
            Some(names) => names.iter().cloned().collect(),
            None => return Vec::new(),
        };
        names
            .into_iter()
            .filter(|name| self.trigger(name, host, observers))
            .collect()
    }

    /// Record exposure for `experiment` unless it already fired or is not
    /// pending. Returns true when the host was called.
    pub fn trigger<H, O>(&mut self, experiment: &str, host: &H, observers: &O) -> bool
    where
        H: ExperimentHost + ?Sized,
        O: Observers<N> + ?Sized,
    {
        if !self.live {
            return false;
        }
        let Some(state) = self.states.get_mut(experiment) else {
            return false;
        };
        match state.phase {
            ExposurePhase::ImmediatePending | ExposurePhase::ViewportPending => {}
            ExposurePhase::Skipped | ExposurePhase::Triggered => return false,
        }

        state.phase = ExposurePhase::Triggered;
        host.record_exposure(experiment);
        log::debug!("[{}] exposure recorded", experiment);

        let observed: Vec<N> = state.observed.drain().collect();
        self.release(experiment, observed, observers);
        true
    }

    fn release<O>(&mut self, experiment: &str, nodes: Vec<N>, observers: &O)
    where
        O: Observers<N> + ?Sized,
    {
        for node in nodes {
            let now_unwatched = match self.watchers.get_mut(&node) {
                Some(names) => {
                    names.remove(experiment);
                    names.is_empty()
                }
                None => false,
            };
            if now_unwatched {
                self.watchers.remove(&node);
                observers.unobserve_visibility(&node);
            }
        }
    }

    /// Forget an experiment entirely (it can be evaluated again).
    pub fn forget<O>(&mut self, experiment: &str, observers: &O)
    where
        O: Observers<N> + ?Sized,
    {
        if let Some(mut state) = self.states.remove(experiment) {
            let observed: Vec<N> = state.observed.drain().collect();
            self.release(experiment, observed, observers);
        }
    }

    pub fn watched_nodes(&self) -> usize {
        self.watchers.len()
    }

    /// Stop observing everything. Later calls are no-ops.
    pub fn destroy<O>(&mut self, observers: &O)
    where
        O: Observers<N> + ?Sized,
    {
        for (node, _) in self.watchers.drain() {
            observers.unobserve_visibility(&node);
        }
        self.states.clear();
        self.live = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{MemoryDocument, NodeId, RecordingObservers};
    use crate::host::StaticHost;
    use crate::types::{ChangeKind, DomChange, Variant, VariantChanges};
    use crate::url::UrlFilter;

    fn text(selector: &str) -> DomChange {
        DomChange::new(selector, ChangeKind::Text("X".into()))
    }

    fn variant(changes: Vec<DomChange>) -> Variant {
        Variant::with_changes(VariantChanges::new(changes))
    }

    fn scoped(filter: &str, changes: Vec<DomChange>) -> Variant {
        Variant::with_changes(VariantChanges::filtered(UrlFilter::glob([filter]), changes))
    }

    const URL: &str = "https://shop.test/product/1";

    #[test]
    fn empty_control_with_immediate_treatment_is_immediate() {
        let exp = Experiment::new("E", vec![variant(Vec::new()), variant(vec![text(".t")])]);
        let plan = plan_exposure(&exp, URL);
        assert_eq!(plan.mode, Some(TriggerMode::Immediate));
        assert_eq!(plan.in_scope_variants, vec![0, 1]);
    }

    #[test]
    fn viewport_targets_are_the_union_of_variants() {
        let exp = Experiment::new(
            "E",
            vec![variant(vec![text(".a").on_view()]), variant(vec![text(".b").on_view()])],
        );
        let plan = plan_exposure(&exp, URL);
        assert_eq!(plan.mode, Some(TriggerMode::Viewport));
        let selectors: Vec<_> = plan.targets.iter().map(|t| t.selector.as_str()).collect();
        assert_eq!(selectors, vec![".a", ".b"]);
    }

    #[test]
    fn out_of_scope_immediate_does_not_force_immediate() {
        let exp = Experiment::new(
            "E",
            vec![
                scoped("*/checkout*", vec![text(".a")]),
                variant(vec![text(".b").on_view()]),
            ],
        );
        let plan = plan_exposure(&exp, URL);
        assert_eq!(plan.mode, Some(TriggerMode::Viewport));
        assert_eq!(plan.in_scope_variants, vec![1]);
    }

    #[test]
    fn in_scope_immediate_beats_out_of_scope_viewport() {
        let exp = Experiment::new(
            "E",
            vec![
                scoped("*/product/*", vec![text(".a")]),
                scoped("*/checkout*", vec![text(".b").on_view()]),
            ],
        );
        assert_eq!(plan_exposure(&exp, URL).mode, Some(TriggerMode::Immediate));
    }

    #[test]
    fn nothing_in_scope_is_skipped() {
        let exp = Experiment::new("E", vec![scoped("*/cart", vec![text(".a")])]);
        let plan = plan_exposure(&exp, URL);
        assert_eq!(plan.mode, None);
        assert_eq!(plan.phase(), ExposurePhase::Skipped);

        let disabled = Experiment::new("E", vec![variant(vec![text(".a").disabled()])]);
        assert_eq!(plan_exposure(&disabled, URL).mode, None);
    }

    #[test]
    fn create_targets_the_insertion_anchor() {
        let create = DomChange::new(
            "",
            ChangeKind::Create {
                markup: "<p>x</p>".into(),
                target: "#slot".into(),
                position: crate::types::Position::LastChild,
            },
        )
        .on_view();
        let plan = plan_exposure(&Experiment::new("E", vec![variant(vec![create])]), URL);
        assert_eq!(plan.targets[0].selector, "#slot");
    }

    #[test]
    fn trigger_is_idempotent() {
        let exp = Experiment::new("E", vec![variant(vec![text(".t")])]);
        let host = StaticHost::default();
        let observers: RecordingObservers<NodeId> = RecordingObservers::new();
        let mut tracker: ExposureTracker<NodeId> = ExposureTracker::new(0.0);

        tracker.evaluate(&exp, URL);
        assert_eq!(tracker.fire_ready(&host, &observers), vec!["E".to_string()]);
        assert!(!tracker.trigger("E", &host, &observers));
        assert!(tracker.fire_ready(&host, &observers).is_empty());
        assert_eq!(host.exposure_count("E"), 1);
        assert_eq!(tracker.phase("E"), Some(ExposurePhase::Triggered));
    }

    #[test]
    fn intersection_fires_and_releases_observers() {
        let doc = MemoryDocument::from_html(r#"<p class="a">a</p><p class="b">b</p>"#).expect("fixture");
        let exp = Experiment::new(
            "E",
            vec![variant(vec![text(".a").on_view()]), variant(vec![text(".b").on_view()])],
        );
        let host = StaticHost::default();
        let observers = RecordingObservers::new();
        let mut tracker = ExposureTracker::new(0.0);

        tracker.evaluate(&exp, URL);
        assert_eq!(tracker.discover(&doc, &observers), 2);
        assert_eq!(tracker.discover(&doc, &observers), 0);
        assert!(tracker.fire_ready(&host, &observers).is_empty());

        let b = doc.find(".b").expect(".b");
        assert!(tracker.handle_intersection(&b, 0.0, &host, &observers).is_empty());
        assert_eq!(tracker.handle_intersection(&b, 0.4, &host, &observers), vec!["E".to_string()]);
        assert_eq!(observers.watched_count(), 0);
        assert_eq!(host.exposure_count("E"), 1);
    }

    #[test]
    fn threshold_is_respected() {
        let doc = MemoryDocument::from_html(r#"<p class="a">a</p>"#).expect("fixture");
        let exp = Experiment::new("E", vec![variant(vec![text(".a").on_view()])]);
        let host = StaticHost::default();
        let observers = RecordingObservers::new();
        let mut tracker = ExposureTracker::new(0.5);

        tracker.evaluate(&exp, URL);
        tracker.discover(&doc, &observers);
        let a = doc.find(".a").expect(".a");
        assert!(tracker.handle_intersection(&a, 0.25, &host, &observers).is_empty());
        assert_eq!(tracker.handle_intersection(&a, 0.5, &host, &observers).len(), 1);
    }

    #[test]
    fn observer_root_scopes_viewport_targets() {
        let doc = MemoryDocument::from_html(
            r#"<div id="app"><p class="t">in</p><span data-dsx-placeholder="E" data-dsx-selector=".t"></span></div>
               <p class="t">out</p><span data-dsx-placeholder="E" data-dsx-selector=".t"></span>"#,
        )
        .expect("fixture");
        let exp = Experiment::new("E", vec![variant(vec![text(".t").on_view().within("#app")])]);
        let host = StaticHost::default();
        let observers = RecordingObservers::new();
        let mut tracker = ExposureTracker::new(0.0);

        tracker.evaluate(&exp, URL);
        assert_eq!(tracker.discover(&doc, &observers), 2);

        let inside = doc.find("#app > p.t").expect("inside");
        let inside_placeholder = doc.find("#app > span").expect("inside placeholder");
        let outside = doc.find("body > p.t").expect("outside");
        let outside_placeholder = doc.find("body > span").expect("outside placeholder");
        assert!(observers.is_watching(&inside));
        assert!(observers.is_watching(&inside_placeholder));
        assert!(!observers.is_watching(&outside));
        assert!(!observers.is_watching(&outside_placeholder));

        assert!(tracker.handle_intersection(&outside, 1.0, &host, &observers).is_empty());
        assert_eq!(host.exposure_count("E"), 0);
        assert_eq!(tracker.handle_intersection(&inside, 1.0, &host, &observers).len(), 1);
    }

    #[test]
    fn shared_node_stays_observed_for_other_experiment() {
        let doc = MemoryDocument::from_html(r#"<p class="a">a</p>"#).expect("fixture");
        let one = Experiment::new("one", vec![variant(vec![text(".a").on_view()])]);
        let two = Experiment::new("two", vec![variant(vec![text(".a").on_view()])]);
        let host = StaticHost::default();
        let observers = RecordingObservers::new();
        let mut tracker = ExposureTracker::new(0.0);

        tracker.evaluate(&one, URL);
        tracker.evaluate(&two, URL);
        tracker.discover(&doc, &observers);
        let a = doc.find(".a").expect(".a");

        assert!(tracker.trigger("one", &host, &observers));
        assert!(observers.is_watching(&a));
        assert_eq!(
            tracker.handle_intersection(&a, 1.0, &host, &observers),
            vec!["two".to_string()]
        );
        assert!(!observers.is_watching(&a));
    }

    #[test]
    fn disconnected_nodes_are_pruned() {
        let doc = MemoryDocument::from_html(r#"<p class="a">a</p>"#).expect("fixture");
        let exp = Experiment::new("E", vec![variant(vec![text(".a").on_view()])]);
        let observers = RecordingObservers::new();
        let mut tracker = ExposureTracker::new(0.0);

        tracker.evaluate(&exp, URL);
        tracker.discover(&doc, &observers);
        let a = doc.find(".a").expect(".a");
        doc.remove(&a);
        tracker.discover(&doc, &observers);
        assert!(!observers.is_watching(&a));
        assert_eq!(tracker.state("E").map(ExposureState::observed_count), Some(0));
    }

    #[test]
    fn destroy_makes_callbacks_inert() {
        let doc = MemoryDocument::from_html(r#"<p class="a">a</p>"#).expect("fixture");
        let exp = Experiment::new("E", vec![variant(vec![text(".a").on_view()])]);
        let host = StaticHost::default();
        let observers = RecordingObservers::new();
        let mut tracker = ExposureTracker::new(0.0);

        tracker.evaluate(&exp, URL);
        tracker.discover(&doc, &observers);
        let a = doc.find(".a").expect(".a");
        tracker.destroy(&observers);

        assert!(tracker.handle_intersection(&a, 1.0, &host, &observers).is_empty());
        assert_eq!(tracker.discover(&doc, &observers), 0);
        assert!(host.exposures().is_empty());
        assert_eq!(observers.watched_count(), 0);
    }
}
