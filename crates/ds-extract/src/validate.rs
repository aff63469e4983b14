//! Directive validation: raw wire directive to typed [`DomChange`].

use std::collections::BTreeMap;

use serde_json::Value;

use ds_core::types::{ChangeKind, DomChange, Position, StyleRules};

use crate::payload::{decode_url_filter, RawChange};

/// Why a directive was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing selector")]
    MissingSelector,
    #[error("missing type")]
    MissingType,
    #[error("unknown change type '{0}'")]
    UnknownType(String),
    #[error("{0} change requires a value")]
    MissingValue(&'static str),
    #[error("{kind} change has an invalid value: {reason}")]
    InvalidValue { kind: &'static str, reason: String },
    #[error("class change needs a non-empty add or remove list")]
    EmptyClassList,
    #[error("{0} change requires targetSelector")]
    MissingTarget(&'static str),
    #[error("create change requires element markup")]
    MissingElement,
    #[error("invalid position '{0}'")]
    InvalidPosition(String),
    #[error("invalid urlFilter: {0}")]
    InvalidUrlFilter(String),
}

impl RawChange {
    /// Check the fields required by the directive's type and build the typed
    /// change.
    pub fn validate(self) -> Result<DomChange, ValidationError> {
        let change_type = self
            .change_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ValidationError::MissingType)?;
        let selector = self.selector.clone().unwrap_or_default();

        let kind = match change_type {
            "text" => ChangeKind::Text(string_value("text", self.value.as_ref())?),
            "html" => ChangeKind::Html(string_value("html", self.value.as_ref())?),
            "javascript" => ChangeKind::Javascript(string_value("javascript", self.value.as_ref())?),
            "style" => ChangeKind::Style(style_map("style", self.value.as_ref())?),
            "attribute" => ChangeKind::Attribute(attribute_map(self.value.as_ref())?),
            "class" => {
                let add = class_list(self.add.as_ref())?;
                let remove = class_list(self.remove.as_ref())?;
                if add.is_empty() && remove.is_empty() {
                    return Err(ValidationError::EmptyClassList);
                }
                ChangeKind::Class { add, remove }
            }
            "move" => ChangeKind::Move {
                target: required_target("move", self.target_selector.as_deref())?,
                position: position(self.position.as_deref())?,
            },
            "create" => {
                let markup = self
                    .element
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .ok_or(ValidationError::MissingElement)?;
                ChangeKind::Create {
                    markup,
                    target: required_target("create", self.target_selector.as_deref())?,
                    position: position(self.position.as_deref())?,
                }
            }
            "delete" => ChangeKind::Delete,
            "styleRules" => ChangeKind::StyleRules {
                rules: style_rules(self.value.as_ref(), self.states.as_ref())?,
                important: self.important.unwrap_or(true),
            },
            other => return Err(ValidationError::UnknownType(other.to_string())),
        };

        if selector.trim().is_empty() && !matches!(kind, ChangeKind::Create { .. }) {
            return Err(ValidationError::MissingSelector);
        }

        let url_filter = match &self.url_filter {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                decode_url_filter(raw).map_err(|e| ValidationError::InvalidUrlFilter(e.to_string()))?,
            ),
        };

        Ok(DomChange {
            selector,
            kind,
            trigger_on_view: self.trigger_on_view.unwrap_or(false),
            wait_for_element: self.wait_for_element.unwrap_or(false),
            observer_root: self.observer_root.filter(|root| !root.trim().is_empty()),
            url_filter,
            enabled: self.enabled.unwrap_or(true),
        })
    }
}

/// Strings verbatim, numbers and booleans stringified.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_value(kind: &'static str, value: Option<&Value>) -> Result<String, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::MissingValue(kind)),
        Some(v) => scalar_string(v).ok_or_else(|| ValidationError::InvalidValue {
            kind,
            reason: "expected a string".into(),
        }),
    }
}

fn style_map(kind: &'static str, value: Option<&Value>) -> Result<BTreeMap<String, String>, ValidationError> {
    let object = match value {
        None | Some(Value::Null) => return Err(ValidationError::MissingValue(kind)),
        Some(Value::Object(object)) => object,
        Some(_) => {
            return Err(ValidationError::InvalidValue {
                kind,
                reason: "expected an object".into(),
            })
        }
    };

    object
        .iter()
        .map(|(key, value)| {
            scalar_string(value)
                .map(|value| (key.clone(), value))
                .ok_or_else(|| ValidationError::InvalidValue {
                    kind,
                    reason: format!("property '{key}' must be a string"),
                })
        })
        .collect()
}

fn attribute_map(value: Option<&Value>) -> Result<BTreeMap<String, Option<String>>, ValidationError> {
    let object = match value {
        None | Some(Value::Null) => return Err(ValidationError::MissingValue("attribute")),
        Some(Value::Object(object)) => object,
        Some(_) => {
            return Err(ValidationError::InvalidValue {
                kind: "attribute",
                reason: "expected an object".into(),
            })
        }
    };

    object
        .iter()
        .map(|(name, value)| match value {
            Value::Null => Ok((name.clone(), None)),
            other => scalar_string(other)
                .map(|value| (name.clone(), Some(value)))
                .ok_or_else(|| ValidationError::InvalidValue {
                    kind: "attribute",
                    reason: format!("attribute '{name}' must be a scalar"),
                }),
        })
        .collect()
}

/// A class list may be an array of names or one space-separated string.
fn class_list(value: Option<&Value>) -> Result<Vec<String>, ValidationError> {
    let invalid = || ValidationError::InvalidValue {
        kind: "class",
        reason: "class lists must contain strings".into(),
    };
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s.split_whitespace().map(str::to_string).collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .filter(|item| item.as_ref().map_or(true, |s| !s.trim().is_empty()))
            .collect(),
        Some(_) => Err(invalid()),
    }
}

fn required_target(kind: &'static str, target: Option<&str>) -> Result<String, ValidationError> {
    target
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(ValidationError::MissingTarget(kind))
}

fn position(value: Option<&str>) -> Result<Position, ValidationError> {
    match value {
        None => Ok(Position::default()),
        Some(s) => Position::parse(s).ok_or_else(|| ValidationError::InvalidPosition(s.to_string())),
    }
}

fn style_rules(value: Option<&Value>, states: Option<&Value>) -> Result<StyleRules, ValidationError> {
    let source = match (value, states) {
        (Some(Value::String(css)), _) if !css.trim().is_empty() => {
            return Ok(StyleRules::Css(css.clone()));
        }
        (Some(v @ Value::Object(_)), _) => v,
        (_, Some(v @ Value::Object(_))) => v,
        (None | Some(Value::Null), None | Some(Value::Null)) => {
            return Err(ValidationError::MissingValue("styleRules"))
        }
        _ => {
            return Err(ValidationError::InvalidValue {
                kind: "styleRules",
                reason: "expected CSS text or a state map".into(),
            })
        }
    };

    let Value::Object(map) = source else {
        return Err(ValidationError::MissingValue("styleRules"));
    };

    let mut rules = BTreeMap::new();
    for (state, declarations) in map {
        rules.insert(state.clone(), style_map("styleRules", Some(declarations))?);
    }
    if rules.values().all(BTreeMap::is_empty) {
        return Err(ValidationError::MissingValue("styleRules"));
    }
    Ok(StyleRules::States(rules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(value: Value) -> Result<DomChange, ValidationError> {
        let raw: RawChange = serde_json::from_value(value).expect("raw change should deserialize");
        raw.validate()
    }

    #[test]
    fn text_change_with_defaults() {
        let change = validate(json!({"selector": ".t", "type": "text", "value": "Hi"})).expect("valid");
        assert_eq!(change.kind, ChangeKind::Text("Hi".into()));
        assert!(!change.trigger_on_view);
        assert!(!change.wait_for_element);
        assert!(change.enabled);
    }

    #[test]
    fn flags_and_filters_are_carried() {
        let change = validate(json!({
            "selector": ".t",
            "type": "delete",
            "triggerOnView": true,
            "waitForElement": true,
            "observerRoot": "#app",
            "enabled": false,
            "urlFilter": ["*/checkout"]
        }))
        .expect("valid");
        assert!(change.trigger_on_view && change.wait_for_element && !change.enabled);
        assert_eq!(change.observer_root.as_deref(), Some("#app"));
        assert!(change.url_filter.is_some());
    }

    #[test]
    fn missing_fields_per_type() {
        assert_eq!(
            validate(json!({"selector": ".a", "type": "class"})),
            Err(ValidationError::EmptyClassList)
        );
        assert_eq!(
            validate(json!({"selector": ".a", "type": "move"})),
            Err(ValidationError::MissingTarget("move"))
        );
        assert_eq!(
            validate(json!({"type": "create", "targetSelector": "#t"})),
            Err(ValidationError::MissingElement)
        );
        assert_eq!(
            validate(json!({"type": "create", "element": "<p/>"})),
            Err(ValidationError::MissingTarget("create"))
        );
        assert!(matches!(
            validate(json!({"selector": ".a", "type": "style", "value": "color: red"})),
            Err(ValidationError::InvalidValue { kind: "style", .. })
        ));
        assert_eq!(
            validate(json!({"selector": ".a", "type": "attribute"})),
            Err(ValidationError::MissingValue("attribute"))
        );
        assert_eq!(
            validate(json!({"type": "text", "value": "x"})),
            Err(ValidationError::MissingSelector)
        );
        assert_eq!(
            validate(json!({"selector": ".a", "type": "sparkle"})),
            Err(ValidationError::UnknownType("sparkle".into()))
        );
        assert_eq!(
            validate(json!({"selector": ".a", "type": "move", "targetSelector": "#t", "position": "inside"})),
            Err(ValidationError::InvalidPosition("inside".into()))
        );
    }

    #[test]
    fn create_needs_no_selector() {
        let change = validate(json!({
            "type": "create",
            "element": "<p>a</p><p>b</p>",
            "targetSelector": "#slot",
            "position": "firstChild"
        }))
        .expect("valid");
        assert_eq!(change.anchor_selector(), "#slot");
    }

    #[test]
    fn attribute_values_are_stringified() {
        let change = validate(json!({
            "selector": "input",
            "type": "attribute",
            "value": {"maxlength": 10, "disabled": true, "placeholder": "x", "title": null}
        }))
        .expect("valid");
        let ChangeKind::Attribute(attrs) = change.kind else {
            panic!("expected attribute change");
        };
        assert_eq!(attrs["maxlength"].as_deref(), Some("10"));
        assert_eq!(attrs["disabled"].as_deref(), Some("true"));
        assert_eq!(attrs["title"], None);
    }

    #[test]
    fn class_lists_accept_strings() {
        let change = validate(json!({"selector": ".a", "type": "class", "add": "x y", "remove": ["z"]}))
            .expect("valid");
        assert_eq!(
            change.kind,
            ChangeKind::Class {
                add: vec!["x".into(), "y".into()],
                remove: vec!["z".into()]
            }
        );
    }

    #[test]
    fn style_rules_forms() {
        let css = validate(json!({"selector": ".b", "type": "styleRules", "value": "color: red;"})).expect("valid");
        assert!(matches!(css.kind, ChangeKind::StyleRules { rules: StyleRules::Css(_), important: true }));

        let states = validate(json!({
            "selector": ".b",
            "type": "styleRules",
            "states": {"normal": {"color": "red"}, "hover": {"color": "blue"}},
            "important": false
        }))
        .expect("valid");
        let ChangeKind::StyleRules { rules: StyleRules::States(map), important } = states.kind else {
            panic!("expected state rules");
        };
        assert!(!important);
        assert_eq!(map["hover"]["color"], "blue");

        assert_eq!(
            validate(json!({"selector": ".b", "type": "styleRules"})),
            Err(ValidationError::MissingValue("styleRules"))
        );
    }
}
