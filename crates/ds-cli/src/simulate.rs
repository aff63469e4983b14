//! Assignment simulation
//!
//! Runs every variant assignment of an experiment against the same page in a
//! `MemoryDocument` and records when exposure fires. An experiment is
//! SRM-safe when every assignment fires at the same moment.

use ds_core::dom::{Document, MemoryDocument, RecordingObservers};
use ds_core::host::StaticHost;
use ds_core::types::{Experiment, PLACEHOLDER_ATTR, PLACEHOLDER_SELECTOR_ATTR};
use ds_core::{DomChangesPlugin, NodeId, PluginConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Exposure recorded during initialization
    OnInit,
    /// Exposure recorded once visible elements intersected
    OnView,
    Never,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnInit => "on-init",
            Self::OnView => "on-view",
            Self::Never => "never",
        }
    }
}

/// Which watched elements are scrolled into view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    /// Every watched element
    All,
    /// Watched elements matching any of these selectors
    Matching(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentReport {
    pub name: String,
    /// Outcome per variant index
    pub outcomes: Vec<Outcome>,
}

impl ExperimentReport {
    pub fn is_consistent(&self) -> bool {
        self.outcomes.windows(2).all(|pair| pair[0] == pair[1])
    }
}

/// Simulate one assignment. Pending changes are flushed before visibility is
/// delivered, as a live page would.
pub fn simulate_assignment(
    html: &str,
    experiment: &Experiment,
    assignment: usize,
    url: &str,
    config: &PluginConfig,
    visibility: &Visibility,
) -> Result<Outcome, String> {
    let doc = MemoryDocument::from_html(html).map_err(|e| format!("Failed to parse page: {}", e))?;
    let host = StaticHost::new(vec![experiment.clone()]).assign(&experiment.name, assignment);
    let mut plugin = DomChangesPlugin::new(doc, RecordingObservers::new(), host, config.clone(), url);

    plugin.initialize();
    if plugin.host().exposure_count(&experiment.name) > 0 {
        return Ok(Outcome::OnInit);
    }

    plugin.flush();
    for node in visible_nodes(&plugin, visibility) {
        plugin.on_intersection(&node, 1.0);
    }

    Ok(match plugin.host().exposure_count(&experiment.name) {
        0 => Outcome::Never,
        _ => Outcome::OnView,
    })
}

fn visible_nodes(
    plugin: &DomChangesPlugin<MemoryDocument, RecordingObservers<NodeId>, StaticHost>,
    visibility: &Visibility,
) -> Vec<NodeId> {
    let watched = plugin.observers().watched();
    match visibility {
        Visibility::All => watched,
        Visibility::Matching(selectors) => {
            let doc = plugin.doc();
            let placeholders = doc.find_all(&format!("[{PLACEHOLDER_ATTR}]"));
            let mut nodes: Vec<NodeId> = Vec::new();
            for selector in selectors {
                // A deleted element is seen through its placeholder.
                let stand_ins = placeholders.iter().copied().filter(|node| {
                    doc.attribute(node, PLACEHOLDER_SELECTOR_ATTR).as_deref() == Some(selector.as_str())
                });
                for node in doc.find_all(selector).into_iter().chain(stand_ins) {
                    if watched.contains(&node) && !nodes.contains(&node) {
                        nodes.push(node);
                    }
                }
            }
            nodes
        }
    }
}

/// Simulate every assignment of `experiment`.
pub fn simulate_experiment(
    html: &str,
    experiment: &Experiment,
    url: &str,
    config: &PluginConfig,
    visibility: &Visibility,
) -> Result<ExperimentReport, String> {
    let outcomes = (0..experiment.variants.len())
        .map(|assignment| simulate_assignment(html, experiment, assignment, url, config, visibility))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ExperimentReport {
        name: experiment.name.clone(),
        outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_extract::{extract_experiments_json, ExtractKeys};

    const PAGE: &str = r#"<h1 class="hero">Hi</h1><section><p class="a">a</p><p class="b">b</p></section>"#;

    fn experiment(json: &str) -> Experiment {
        extract_experiments_json(json, &ExtractKeys::default())
            .expect("experiments")
            .experiments
            .into_iter()
            .next()
            .expect("one experiment")
    }

    #[test]
    fn immediate_change_in_one_variant_fires_everywhere_on_init() {
        let exp = experiment(
            r#"[{"name": "hero", "variants": [
                {"variables": {}},
                {"variables": {"__dom_changes": [{"selector": ".hero", "type": "text", "value": "B"}]}}
            ]}]"#,
        );
        let report = simulate_experiment(PAGE, &exp, "https://a.test/", &PluginConfig::default(), &Visibility::All)
            .expect("report");
        assert_eq!(report.outcomes, vec![Outcome::OnInit, Outcome::OnInit]);
        assert!(report.is_consistent());
    }

    #[test]
    fn viewport_targets_union_across_variants() {
        let exp = experiment(
            r#"[{"name": "below", "variants": [
                {"variables": {"__dom_changes": [{"selector": ".a", "type": "text", "value": "A", "triggerOnView": true}]}},
                {"variables": {"__dom_changes": [{"selector": ".b", "type": "text", "value": "B", "triggerOnView": true}]}}
            ]}]"#,
        );
        let config = PluginConfig::default();

        let only_b = Visibility::Matching(vec![".b".into()]);
        let report = simulate_experiment(PAGE, &exp, "https://a.test/", &config, &only_b).expect("report");
        assert_eq!(report.outcomes, vec![Outcome::OnView, Outcome::OnView]);

        let nothing = Visibility::Matching(vec![".hero".into()]);
        let report = simulate_experiment(PAGE, &exp, "https://a.test/", &config, &nothing).expect("report");
        assert_eq!(report.outcomes, vec![Outcome::Never, Outcome::Never]);
    }

    #[test]
    fn deleted_target_is_visible_through_its_placeholder() {
        let exp = experiment(
            r#"[{"name": "gone", "variants": [
                {"variables": {"__dom_changes": [{"selector": ".a", "type": "delete", "triggerOnView": true}]}},
                {"variables": {"__dom_changes": [{"selector": ".a", "type": "text", "value": "A", "triggerOnView": true}]}}
            ]}]"#,
        );
        let visible = Visibility::Matching(vec![".a".into()]);
        let report = simulate_experiment(PAGE, &exp, "https://a.test/", &PluginConfig::default(), &visible)
            .expect("report");
        assert_eq!(report.outcomes, vec![Outcome::OnView, Outcome::OnView]);
        assert!(report.is_consistent());
    }

    #[test]
    fn out_of_scope_experiment_never_fires() {
        let exp = experiment(
            r#"[{"name": "checkout", "variants": [
                {"variables": {}},
                {"variables": {"__dom_changes": {"urlFilter": "*/checkout", "changes": [
                    {"selector": ".hero", "type": "delete"}
                ]}}}
            ]}]"#,
        );
        let report = simulate_experiment(PAGE, &exp, "https://a.test/home", &PluginConfig::default(), &Visibility::All)
            .expect("report");
        assert_eq!(report.outcomes, vec![Outcome::Never, Outcome::Never]);
    }

    #[test]
    fn inconsistent_reports_are_detected() {
        let report = ExperimentReport {
            name: "x".into(),
            outcomes: vec![Outcome::OnInit, Outcome::Never],
        };
        assert!(!report.is_consistent());
    }
}
