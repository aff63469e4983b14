//! Plugin orchestrator
//!
//! Wires the applicator, pending resolver, exposure tracker and code injector
//! to a document, an observer hub and a host SDK, all injected through the
//! constructor. Platform callbacks (`on_mutations`, `flush`,
//! `on_intersection`) are routed here by the embedding layer.

use crate::apply::ChangeApplicator;
use crate::config::PluginConfig;
use crate::dom::{Document, Observers};
use crate::exposure::{ExposurePhase, ExposureTracker};
use crate::host::ExperimentHost;
use crate::inject::CodeInjector;
use crate::types::{Capabilities, DomChange, Experiment};

pub struct DomChangesPlugin<D, O, H>
where
    D: Document,
    O: Observers<D::Node>,
    H: ExperimentHost,
{
    doc: D,
    observers: O,
    host: H,
    config: PluginConfig,
    url: String,
    applicator: ChangeApplicator<D::Node>,
    tracker: ExposureTracker<D::Node>,
    injector: CodeInjector<D::Node>,
    experiments: Vec<Experiment>,
    initialized: bool,
    live: bool,
}

impl<D, O, H> DomChangesPlugin<D, O, H>
where
    D: Document,
    O: Observers<D::Node>,
    H: ExperimentHost,
{
    pub fn new(doc: D, observers: O, host: H, config: PluginConfig, url: impl Into<String>) -> Self {
        let applicator = ChangeApplicator::new(config.capabilities(), config.spa_mode, config.debounce());
        let tracker = ExposureTracker::new(config.visibility_threshold);
        Self {
            doc,
            observers,
            host,
            config,
            url: url.into(),
            applicator,
            tracker,
            injector: CodeInjector::new(),
            experiments: Vec::new(),
            initialized: false,
            live: true,
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Read experiments and apply them. Runs once; later calls are no-ops.
    ///
    /// Exposure is evaluated for every experiment before any change is
    /// applied, and immediate exposures fire last.
    pub fn initialize(&mut self) {
        if !self.live || self.initialized {
            return;
        }
        self.initialized = true;

        for (name, variant) in &self.config.overrides {
            log::debug!("[{}] overriding assignment to variant {}", name, variant);
            self.host.override_assignment(name, *variant);
        }

        self.experiments = self.host.experiments();
        log::debug!("initializing with {} experiments on {}", self.experiments.len(), self.url);

        for experiment in &self.experiments {
            self.tracker.evaluate(experiment, &self.url);
        }
        self.apply_all();
        self.settle();
    }

    /// SPA navigation: undo every applied edit, re-apply the assigned
    /// variants for `url` and re-evaluate experiments that were skipped.
    /// Experiments that already triggered or are waiting keep their state.
    pub fn navigate(&mut self, url: impl Into<String>) {
        if !self.live {
            return;
        }
        self.url = url.into();
        if !self.initialized {
            return;
        }
        log::debug!("navigating to {}", self.url);

        for experiment in &self.experiments {
            self.applicator.revert(&self.doc, &experiment.name);
            self.injector.remove(&self.doc, &experiment.name);
            self.tracker.reevaluate_if_skipped(experiment, &self.url);
        }
        self.apply_all();
        self.settle();
    }

    /// Tear everything down. Idempotent; every later call is a no-op.
    pub fn destroy(&mut self) {
        if !self.live {
            return;
        }
        self.live = false;
        self.applicator.destroy(&self.observers);
        self.tracker.destroy(&self.observers);
        self.injector.destroy();
        self.experiments.clear();
        log::debug!("plugin destroyed");
    }

    fn apply_all(&mut self) {
        for experiment in &self.experiments {
            let Some(index) = self.host.peek_assignment(&experiment.name) else {
                log::debug!("[{}] no assignment", experiment.name);
                continue;
            };
            let Some(variant) = experiment.variants.get(index) else {
                log::debug!("[{}] assigned variant {} does not exist", experiment.name, index);
                continue;
            };

            if variant.changes.in_scope(&self.url) {
                for change in variant.changes.active_changes(&self.url) {
                    self.applicator
                        .apply(&self.doc, &self.observers, change, &experiment.name);
                }
            }

            if self.config.capabilities().contains(Capabilities::INJECTION) {
                self.injector
                    .inject(&self.doc, &experiment.name, &variant.injections, &self.url);
            }
        }
    }

    /// Watch viewport target roots, attach visibility observation and fire
    /// the immediate exposures.
    fn settle(&mut self) {
        for root in self.tracker.viewport_roots() {
            self.applicator
                .pending_mut()
                .watch(&self.doc, &self.observers, root.as_deref());
        }
        self.tracker.discover(&self.doc, &self.observers);
        self.tracker.fire_ready(&self.host, &self.observers);
        self.release_if_idle();
    }

    /// Disconnect insertion observers once nothing is pending and no
    /// experiment waits for visibility.
    fn release_if_idle(&mut self) {
        if self.applicator.pending().is_empty() && self.tracker.viewport_roots().is_empty() {
            self.applicator
                .pending_mut()
                .release_idle_roots(&self.observers);
        }
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Apply one change for `experiment` outside the initial pass.
    pub fn apply_change(&mut self, change: &DomChange, experiment: &str) -> bool {
        if !self.live {
            return false;
        }
        let applied = self
            .applicator
            .apply(&self.doc, &self.observers, change, experiment);
        self.tracker.discover(&self.doc, &self.observers);
        self.release_if_idle();
        applied
    }

    /// Revert and forget one experiment.
    pub fn remove_experiment(&mut self, experiment: &str) -> bool {
        if !self.live {
            return false;
        }
        let known = self.experiments.iter().any(|e| e.name == experiment);
        self.applicator.revert(&self.doc, experiment);
        self.injector.remove(&self.doc, experiment);
        self.tracker.forget(experiment, &self.observers);
        self.experiments.retain(|e| e.name != experiment);
        self.release_if_idle();
        known
    }

    /// Record exposure now, if the experiment is still waiting for it.
    pub fn trigger_exposure(&mut self, experiment: &str) -> bool {
        if !self.live {
            return false;
        }
        let fired = self.tracker.trigger(experiment, &self.host, &self.observers);
        self.release_if_idle();
        fired
    }

    // -------------------------------------------------------------------------
    // Platform callbacks
    // -------------------------------------------------------------------------

    /// Insertions were observed; schedules one debounced flush.
    pub fn on_mutations(&mut self) {
        if !self.live || self.applicator.pending().root_count() == 0 {
            return;
        }
        self.applicator
            .pending_mut()
            .notify_mutation(&self.observers);
    }

    /// Debounced flush: apply pending changes whose element appeared, then
    /// pick up new viewport targets. Returns the number of changes resolved.
    pub fn flush(&mut self) -> usize {
        if !self.live {
            return 0;
        }
        let resolved = self.applicator.resolve_pending(&self.doc);
        self.tracker.discover(&self.doc, &self.observers);
        self.release_if_idle();
        resolved
    }

    /// A watched node intersected the viewport.
    pub fn on_intersection(&mut self, node: &D::Node, ratio: f64) -> Vec<String> {
        if !self.live {
            return Vec::new();
        }
        let fired = self
            .tracker
            .handle_intersection(node, ratio, &self.host, &self.observers);
        self.release_if_idle();
        fired
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn doc(&self) -> &D {
        &self.doc
    }

    pub fn observers(&self) -> &O {
        &self.observers
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    pub fn pending_count(&self) -> usize {
        self.applicator.pending().len()
    }

    pub fn exposure_phase(&self, experiment: &str) -> Option<ExposurePhase> {
        self.tracker.phase(experiment)
    }
}
