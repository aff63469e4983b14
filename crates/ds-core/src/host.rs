//! Host experimentation SDK seam.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::types::Experiment;

/// What the engine needs from the host SDK. Injected into the plugin; the
/// engine never assigns variants itself.
pub trait ExperimentHost {
    /// Experiment definitions, already decoded.
    fn experiments(&self) -> Vec<Experiment>;
    /// Assigned variant index, read without recording exposure.
    fn peek_assignment(&self, experiment: &str) -> Option<usize>;
    /// Record that the current user was exposed to `experiment`.
    fn record_exposure(&self, experiment: &str);
    /// Force the variant for `experiment`.
    fn override_assignment(&self, experiment: &str, variant: usize);
}

/// In-memory host with fixed experiments and assignments. Records every
/// exposure call, including duplicates.
#[derive(Debug, Default)]
pub struct StaticHost {
    experiments: Vec<Experiment>,
    assignments: RefCell<HashMap<String, usize>>,
    exposures: RefCell<Vec<String>>,
}

impl StaticHost {
    pub fn new(experiments: Vec<Experiment>) -> Self {
        Self {
            experiments,
            ..Self::default()
        }
    }

    pub fn assign(self, experiment: &str, variant: usize) -> Self {
        self.assignments
            .borrow_mut()
            .insert(experiment.to_string(), variant);
        self
    }

    pub fn exposures(&self) -> Vec<String> {
        self.exposures.borrow().clone()
    }

    pub fn exposure_count(&self, experiment: &str) -> usize {
        self.exposures
            .borrow()
            .iter()
            .filter(|name| *name == experiment)
            .count()
    }
}

impl ExperimentHost for StaticHost {
    fn experiments(&self) -> Vec<Experiment> {
        self.experiments.clone()
    }

    fn peek_assignment(&self, experiment: &str) -> Option<usize> {
        self.assignments.borrow().get(experiment).copied()
    }

    fn record_exposure(&self, experiment: &str) {
        self.exposures.borrow_mut().push(experiment.to_string());
    }

    fn override_assignment(&self, experiment: &str, variant: usize) {
        self.assignments
            .borrow_mut()
            .insert(experiment.to_string(), variant);
    }
}
