//! DomShift Core Library
//!
//! This crate applies A/B-test DOM changes to a live document and decides,
//! identically for every variant of an experiment, when a user counts as
//! exposed. It never talks to a browser directly: the DOM, the platform
//! observers and the host experimentation SDK are traits, implemented over
//! `web-sys` by `ds-wasm` and in memory here for tests and tooling.
//!
//! # Architecture
//!
//! The plugin evaluates every experiment's exposure policy from all of its
//! variants first, then applies the assigned variant's in-scope changes.
//! Changes whose target is missing are parked in the pending resolver and
//! applied when the element is inserted; viewport targets appearing later are
//! picked up in the same flush, so a change always lands before the next
//! visibility check of its element.
//!
//! # Modules
//!
//! - `types`: Typed experiments, variants and change directives
//! - `url`: URL slicing and include/exclude URL filters
//! - `dom`: Document and observer seams, in-memory document
//! - `apply`: Change applicator
//! - `pending`: Pending change resolver and flush scheduler
//! - `styles`: Per-experiment managed stylesheets
//! - `ledger`: Undo records for applied edits
//! - `exposure`: Cross-variant exposure tracker
//! - `inject`: Code injector
//! - `host`: Host SDK seam
//! - `config`: Plugin configuration
//! - `plugin`: Orchestrator

pub mod apply;
pub mod config;
pub mod dom;
pub mod exposure;
pub mod host;
pub mod inject;
pub mod ledger;
pub mod pending;
pub mod plugin;
pub mod styles;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use config::{ConfigError, PluginConfig};
pub use dom::{Document, DomError, MemoryDocument, NodeId, Observers, RecordingObservers};
pub use exposure::{plan_exposure, ExposurePhase, ExposurePlan, TriggerMode};
pub use host::{ExperimentHost, StaticHost};
pub use inject::{parse_injection_key, Injection, InjectionLocation, InjectionSet};
pub use plugin::DomChangesPlugin;
pub use types::{
    Capabilities, ChangeKind, DomChange, Experiment, Position, StyleRules, Variant, VariantChanges,
};
pub use url::{MatchMode, MatchTarget, UrlFilter};
