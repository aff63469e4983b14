//! Experiment extraction
//!
//! Reads the host SDK's experiment list and turns each variant's variables
//! into typed changes and injections. Variants carry their variables either as
//! a `variables` object or as a `config` JSON string.

use serde::Deserialize;
use serde_json::{Map, Value};

use ds_core::config::PluginConfig;
use ds_core::types::{Experiment, Variant};

use crate::payload::{decode_injections, decode_payload, DroppedChange};
use crate::PayloadError;

/// Variable names holding the change and injection payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractKeys {
    pub variable_key: String,
    pub injection_key: String,
}

impl Default for ExtractKeys {
    fn default() -> Self {
        Self::from(&PluginConfig::default())
    }
}

impl From<&PluginConfig> for ExtractKeys {
    fn from(config: &PluginConfig) -> Self {
        Self {
            variable_key: config.variable_key.clone(),
            injection_key: config.injection_key.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawExperiment {
    name: String,
    #[serde(default)]
    variants: Vec<RawVariant>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVariant {
    variables: Option<Map<String, Value>>,
    config: Option<Value>,
}

impl RawVariant {
    fn variables(&self) -> Result<Map<String, Value>, PayloadError> {
        if let Some(variables) = &self.variables {
            return Ok(variables.clone());
        }
        match &self.config {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(object)) => Ok(object.clone()),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(Map::new()),
            Some(Value::String(text)) => match serde_json::from_str::<Value>(text)? {
                Value::Object(object) => Ok(object),
                _ => Err(PayloadError::Shape("variant config must be a JSON object".into())),
            },
            Some(_) => Err(PayloadError::Shape("variant config must be a JSON object".into())),
        }
    }
}

/// Something skipped while extracting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueDetail {
    /// The experiment entry itself could not be read
    Experiment(String),
    /// The variant's variables or payload were malformed; it has no changes
    Payload(String),
    /// One directive was dropped
    Dropped(DroppedChange),
    Injections(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub experiment: String,
    pub variant: Option<usize>,
    pub detail: IssueDetail,
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.variant {
            Some(variant) => write!(f, "{}[{}]: ", self.experiment, variant)?,
            None => write!(f, "{}: ", self.experiment)?,
        }
        match &self.detail {
            IssueDetail::Experiment(reason) => write!(f, "experiment skipped: {reason}"),
            IssueDetail::Payload(reason) => write!(f, "payload ignored: {reason}"),
            IssueDetail::Dropped(dropped) => {
                write!(f, "directive {} dropped: {}", dropped.index, dropped.reason)
            }
            IssueDetail::Injections(reason) => write!(f, "injections ignored: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub experiments: Vec<Experiment>,
    pub issues: Vec<Issue>,
}

/// Extract experiments from the host's experiment list: an array of
/// experiments or an object with an `experiments` array.
pub fn extract_experiments(value: &Value, keys: &ExtractKeys) -> Result<Extraction, PayloadError> {
    let entries = match value {
        Value::Null => return Ok(Extraction::default()),
        Value::Array(entries) => entries,
        Value::Object(object) => match object.get("experiments") {
            Some(Value::Array(entries)) => entries,
            _ => return Err(PayloadError::Shape("expected an experiments array".into())),
        },
        _ => return Err(PayloadError::Shape("expected an experiments array".into())),
    };

    let mut extraction = Extraction::default();
    for (index, entry) in entries.iter().enumerate() {
        match RawExperiment::deserialize(entry) {
            Ok(raw) if !raw.name.is_empty() => {
                let experiment = extract_experiment(raw, keys, &mut extraction.issues);
                extraction.experiments.push(experiment);
            }
            Ok(_) => skip_experiment(&mut extraction, index, "empty name".into()),
            Err(e) => skip_experiment(&mut extraction, index, e.to_string()),
        }
    }
    Ok(extraction)
}

/// [`extract_experiments`] over JSON text.
pub fn extract_experiments_json(json: &str, keys: &ExtractKeys) -> Result<Extraction, PayloadError> {
    let value: Value = serde_json::from_str(json)?;
    extract_experiments(&value, keys)
}

fn skip_experiment(extraction: &mut Extraction, index: usize, reason: String) {
    log::debug!("Skipping experiment #{}: {}", index, reason);
    extraction.issues.push(Issue {
        experiment: format!("#{index}"),
        variant: None,
        detail: IssueDetail::Experiment(reason),
    });
}

fn extract_experiment(raw: RawExperiment, keys: &ExtractKeys, issues: &mut Vec<Issue>) -> Experiment {
    let mut variants = Vec::with_capacity(raw.variants.len());

    for (index, raw_variant) in raw.variants.iter().enumerate() {
        let mut issue = |detail: IssueDetail| {
            issues.push(Issue {
                experiment: raw.name.clone(),
                variant: Some(index),
                detail,
            })
        };

        let variables = match raw_variant.variables() {
            Ok(variables) => variables,
            Err(e) => {
                log::debug!("[{}] variant {} variables ignored: {}", raw.name, index, e);
                issue(IssueDetail::Payload(e.to_string()));
                variants.push(Variant::default());
                continue;
            }
        };

        let mut variant = Variant::default();

        if let Some(payload) = variables.get(&keys.variable_key) {
            match decode_payload(payload) {
                Ok(decoded) => {
                    for dropped in decoded.dropped {
                        issue(IssueDetail::Dropped(dropped));
                    }
                    variant.changes = decoded.changes;
                }
                Err(e) => {
                    log::debug!("[{}] variant {} payload ignored: {}", raw.name, index, e);
                    issue(IssueDetail::Payload(e.to_string()));
                }
            }
        }

        if let Some(injections) = variables.get(&keys.injection_key) {
            match decode_injections(injections) {
                Ok(set) => variant.injections = set,
                Err(e) => {
                    log::debug!("[{}] variant {} injections ignored: {}", raw.name, index, e);
                    issue(IssueDetail::Injections(e.to_string()));
                }
            }
        }

        variants.push(variant);
    }

    Experiment::new(raw.name, variants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::types::ChangeKind;
    use serde_json::json;

    #[test]
    fn variables_and_config_forms() {
        let config = json!({"__dom_changes": [{"selector": ".b", "type": "delete"}]}).to_string();
        let extraction = extract_experiments(
            &json!([{
                "name": "hero",
                "variants": [
                    {"variables": {}},
                    {"variables": {"__dom_changes": [{"selector": ".a", "type": "text", "value": "B"}]}},
                    {"config": config}
                ]
            }]),
            &ExtractKeys::default(),
        )
        .expect("extraction");

        assert!(extraction.issues.is_empty());
        let hero = &extraction.experiments[0];
        assert_eq!(hero.name, "hero");
        assert_eq!(hero.variants.len(), 3);
        assert!(hero.variants[0].changes.changes.is_empty());
        assert_eq!(hero.variants[1].changes.changes[0].kind, ChangeKind::Text("B".into()));
        assert_eq!(hero.variants[2].changes.changes[0].kind, ChangeKind::Delete);
    }

    #[test]
    fn issues_are_reported_without_losing_variants() {
        let extraction = extract_experiments(
            &json!({"experiments": [
                {"variants": []},
                {
                    "name": "cta",
                    "variants": [
                        {"config": "{broken"},
                        {"variables": {"__dom_changes": [
                            {"selector": ".a", "type": "class"},
                            {"selector": ".a", "type": "class", "add": ["x"]}
                        ]}},
                        {"variables": {"__dom_changes": "[{"}}
                    ]
                }
            ]}),
            &ExtractKeys::default(),
        )
        .expect("extraction");

        assert_eq!(extraction.experiments.len(), 1);
        let cta = &extraction.experiments[0];
        assert_eq!(cta.variants.len(), 3);
        assert_eq!(cta.variants[1].changes.changes.len(), 1);
        assert!(cta.variants[2].changes.changes.is_empty());

        let details: Vec<&IssueDetail> = extraction.issues.iter().map(|i| &i.detail).collect();
        assert!(matches!(details[0], IssueDetail::Experiment(_)));
        assert!(matches!(details[1], IssueDetail::Payload(_)));
        assert!(matches!(details[2], IssueDetail::Dropped(DroppedChange { index: 0, .. })));
        assert!(matches!(details[3], IssueDetail::Payload(_)));
        assert!(extraction.issues[2].to_string().starts_with("cta[1]: directive 0 dropped"));
    }

    #[test]
    fn custom_keys_and_injections() {
        let keys = ExtractKeys {
            variable_key: "dom".into(),
            injection_key: "code".into(),
        };
        let extraction = extract_experiments_json(
            r#"[{"name": "x", "variants": [{"variables": {
                "dom": [{"selector": "p", "type": "html", "value": "<i>hi</i>"}],
                "__dom_changes": [{"selector": "q", "type": "delete"}],
                "code": {"headEnd": "<style>p{}</style>"}
            }}]}]"#,
            &keys,
        )
        .expect("extraction");

        let variant = &extraction.experiments[0].variants[0];
        assert_eq!(variant.changes.changes.len(), 1);
        assert_eq!(variant.changes.changes[0].selector, "p");
        assert_eq!(variant.injections.items.len(), 1);
    }

    #[test]
    fn rejects_wrong_top_level_shape() {
        assert!(matches!(
            extract_experiments(&json!({"nope": true}), &ExtractKeys::default()),
            Err(PayloadError::Shape(_))
        ));
        assert!(matches!(
            extract_experiments_json("{", &ExtractKeys::default()),
            Err(PayloadError::Json(_))
        ));
        assert_eq!(
            extract_experiments(&Value::Null, &ExtractKeys::default()).expect("empty"),
            Extraction::default()
        );
    }
}
