//! Recording [`Observers`] for tests and the CLI simulator.

use std::cell::RefCell;
use std::collections::HashSet;
use std::hash::Hash;
use std::time::Duration;

use super::Observers;

/// Keeps track of what the engine asked the platform to observe. Nothing is
/// delivered automatically: the driver calls `flush` / `on_intersection`
/// on the plugin itself.
#[derive(Debug)]
pub struct RecordingObservers<N> {
    insertion_roots: RefCell<HashSet<N>>,
    visibility: RefCell<HashSet<N>>,
    flush_requests: RefCell<Vec<Duration>>,
}

impl<N> Default for RecordingObservers<N> {
    fn default() -> Self {
        Self {
            insertion_roots: RefCell::new(HashSet::new()),
            visibility: RefCell::new(HashSet::new()),
            flush_requests: RefCell::new(Vec::new()),
        }
    }
}

impl<N: Clone + Eq + Hash> RecordingObservers<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_observing_insertions(&self, root: &N) -> bool {
        self.insertion_roots.borrow().contains(root)
    }

    pub fn insertion_root_count(&self) -> usize {
        self.insertion_roots.borrow().len()
    }

    pub fn is_watching(&self, node: &N) -> bool {
        self.visibility.borrow().contains(node)
    }

    pub fn watched(&self) -> Vec<N> {
        self.visibility.borrow().iter().cloned().collect()
    }

    pub fn watched_count(&self) -> usize {
        self.visibility.borrow().len()
    }

    pub fn flush_requests(&self) -> Vec<Duration> {
        self.flush_requests.borrow().clone()
    }
}

impl<N: Clone + Eq + Hash> Observers<N> for RecordingObservers<N> {
    fn observe_insertions(&self, root: &N) {
        self.insertion_roots.borrow_mut().insert(root.clone());
    }

    fn disconnect_insertions(&self, root: &N) {
        self.insertion_roots.borrow_mut().remove(root);
    }

    fn observe_visibility(&self, node: &N) {
        self.visibility.borrow_mut().insert(node.clone());
    }

    fn unobserve_visibility(&self, node: &N) {
        self.visibility.borrow_mut().remove(node);
    }

    fn request_flush(&self, delay: Duration) {
        self.flush_requests.borrow_mut().push(delay);
    }
}
