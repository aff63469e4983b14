//! Payload decoding
//!
//! A variant's change payload is either a JSON array of directives or an
//! object `{ "urlFilter": ..., "changes": [...] }`, pre-parsed or as a JSON
//! string. Directives are decoded one at a time so a bad directive only drops
//! itself.

use serde::Deserialize;
use serde_json::Value;

use ds_core::inject::{parse_injection_key, Injection, InjectionSet};
use ds_core::types::{DomChange, VariantChanges};
use ds_core::url::{MatchMode, MatchTarget, UrlFilter};

use crate::validate::ValidationError;
use crate::PayloadError;

// =============================================================================
// Raw directive
// =============================================================================

/// Directive as it appears on the wire. Every field is optional here;
/// [`RawChange::validate`] enforces what each type needs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawChange {
    pub selector: Option<String>,
    #[serde(rename = "type")]
    pub change_type: Option<String>,
    pub value: Option<Value>,
    pub add: Option<Value>,
    pub remove: Option<Value>,
    pub target_selector: Option<String>,
    pub position: Option<String>,
    pub element: Option<String>,
    pub states: Option<Value>,
    pub important: Option<bool>,
    pub trigger_on_view: Option<bool>,
    pub wait_for_element: Option<bool>,
    pub observer_root: Option<String>,
    pub url_filter: Option<Value>,
    pub enabled: Option<bool>,
}

/// A directive that failed to decode or validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedChange {
    pub index: usize,
    pub reason: String,
}

/// Decoded variant payload plus what was dropped on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPayload {
    pub changes: VariantChanges,
    pub dropped: Vec<DroppedChange>,
}

// =============================================================================
// URL filters
// =============================================================================

/// Decode a URL filter: a bare pattern, a pattern list, or an object with
/// `include`, `exclude`, `mode` and `matchType`.
pub fn decode_url_filter(value: &Value) -> Result<UrlFilter, PayloadError> {
    match value {
        Value::String(_) | Value::Array(_) => Ok(UrlFilter::glob(pattern_list(value, "urlFilter")?)),
        Value::Object(object) => {
            let mut filter = UrlFilter::default();
            if let Some(include) = object.get("include") {
                filter.include = pattern_list(include, "include")?;
            }
            if let Some(exclude) = object.get("exclude") {
                filter.exclude = pattern_list(exclude, "exclude")?;
            }
            if let Some(mode) = object.get("mode").and_then(Value::as_str) {
                filter.mode = MatchMode::parse(mode)
                    .ok_or_else(|| PayloadError::Shape(format!("unknown match mode '{mode}'")))?;
            }
            if let Some(target) = object.get("matchType").and_then(Value::as_str) {
                filter.target = MatchTarget::parse(target)
                    .ok_or_else(|| PayloadError::Shape(format!("unknown matchType '{target}'")))?;
            }
            Ok(filter)
        }
        other => Err(PayloadError::Shape(format!("urlFilter cannot be {}", kind_of(other)))),
    }
}

fn pattern_list(value: &Value, field: &str) -> Result<Vec<String>, PayloadError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(pattern) => Ok(vec![pattern.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| PayloadError::Shape(format!("{field} patterns must be strings")))
            })
            .collect(),
        other => Err(PayloadError::Shape(format!("{field} cannot be {}", kind_of(other)))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Values stored as JSON text are parsed first.
fn unwrap_json_string(value: &Value) -> Result<Value, PayloadError> {
    match value {
        Value::String(text) if text.trim().is_empty() => Ok(Value::Null),
        Value::String(text) => Ok(serde_json::from_str(text)?),
        other => Ok(other.clone()),
    }
}

// =============================================================================
// Change payloads
// =============================================================================

/// Decode one directive.
pub fn decode_change(value: &Value) -> Result<DomChange, ValidationError> {
    let raw = RawChange::deserialize(value).map_err(|e| ValidationError::InvalidValue {
        kind: "directive",
        reason: e.to_string(),
    })?;
    raw.validate()
}

/// Decode a variant's change payload. Invalid directives are skipped and
/// reported; only a payload whose overall shape is wrong is an error.
pub fn decode_payload(value: &Value) -> Result<DecodedPayload, PayloadError> {
    let value = unwrap_json_string(value)?;

    let (url_filter, items) = match &value {
        Value::Null => return Ok(DecodedPayload::default()),
        Value::Array(items) => (None, items.as_slice()),
        Value::Object(object) => {
            let items = match object.get("changes") {
                Some(Value::Array(items)) => items.as_slice(),
                Some(other) => {
                    return Err(PayloadError::Shape(format!("changes cannot be {}", kind_of(other))))
                }
                None => return Err(PayloadError::Shape("object payload without changes".into())),
            };
            let url_filter = match object.get("urlFilter") {
                None | Some(Value::Null) => None,
                Some(raw) => Some(decode_url_filter(raw)?),
            };
            (url_filter, items)
        }
        other => return Err(PayloadError::Shape(format!("payload cannot be {}", kind_of(other)))),
    };

    let mut decoded = DecodedPayload::default();
    decoded.changes.url_filter = url_filter;

    for (index, item) in items.iter().enumerate() {
        match decode_change(item) {
            Ok(change) => decoded.changes.changes.push(change),
            Err(e) => {
                log::debug!("Dropping directive {}: {}", index, e);
                decoded.dropped.push(DroppedChange {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(decoded)
}

/// Lenient form of [`decode_payload`]: a malformed payload means no changes.
pub fn decode_payload_lossy(value: &Value) -> VariantChanges {
    match decode_payload(value) {
        Ok(decoded) => decoded.changes,
        Err(e) => {
            log::debug!("Ignoring malformed payload: {}", e);
            VariantChanges::default()
        }
    }
}

// =============================================================================
// Injection payloads
// =============================================================================

/// Decode code injections: an object whose keys are injection locations
/// (`headStart`, `bodyEnd10`, ...) mapping to markup, plus an optional
/// `urlFilter`. Unknown keys and non-string markup are skipped.
pub fn decode_injections(value: &Value) -> Result<InjectionSet, PayloadError> {
    let value = unwrap_json_string(value)?;
    let object = match &value {
        Value::Null => return Ok(InjectionSet::default()),
        Value::Object(object) => object,
        other => {
            return Err(PayloadError::Shape(format!("injections cannot be {}", kind_of(other))))
        }
    };

    let mut set = InjectionSet::default();
    for (key, entry) in object {
        if key == "urlFilter" {
            if !entry.is_null() {
                set.url_filter = Some(decode_url_filter(entry)?);
            }
            continue;
        }
        let Some((location, priority)) = parse_injection_key(key) else {
            log::debug!("Skipping unknown injection key '{}'", key);
            continue;
        };
        let Some(markup) = entry.as_str().filter(|m| !m.trim().is_empty()) else {
            log::debug!("Skipping empty injection '{}'", key);
            continue;
        };
        set.items.push(Injection {
            location,
            priority,
            markup: markup.to_string(),
        });
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::inject::InjectionLocation;
    use ds_core::types::ChangeKind;
    use serde_json::json;

    #[test]
    fn array_payload_drops_only_bad_items() {
        let decoded = decode_payload(&json!([
            {"selector": ".a", "type": "text", "value": "A"},
            {"selector": ".b", "type": "bogus"},
            "not a directive",
            {"selector": ".c", "type": "delete"}
        ]))
        .expect("payload");

        assert_eq!(decoded.changes.changes.len(), 2);
        assert!(decoded.changes.url_filter.is_none());
        let dropped: Vec<usize> = decoded.dropped.iter().map(|d| d.index).collect();
        assert_eq!(dropped, vec![1, 2]);
        assert!(decoded.dropped[0].reason.contains("bogus"));
    }

    #[test]
    fn wrapped_payload_and_json_string() {
        let text = r#"{"urlFilter": {"include": ["/shop/*"], "matchType": "path"},
                      "changes": [{"selector": "h1", "type": "html", "value": "<b>x</b>"}]}"#;
        let decoded = decode_payload(&Value::String(text.into())).expect("payload");
        let filter = decoded.changes.url_filter.clone().expect("filter");
        assert_eq!(filter.target, MatchTarget::Path);
        assert!(decoded.changes.in_scope("https://a.test/shop/shoes"));
        assert!(!decoded.changes.in_scope("https://a.test/blog"));
        assert_eq!(decoded.changes.changes[0].kind, ChangeKind::Html("<b>x</b>".into()));
    }

    #[test]
    fn malformed_payloads() {
        assert!(matches!(
            decode_payload(&Value::String("[{".into())),
            Err(PayloadError::Json(_))
        ));
        assert!(matches!(decode_payload(&json!(42)), Err(PayloadError::Shape(_))));
        assert!(matches!(decode_payload(&json!({"urlFilter": "*"})), Err(PayloadError::Shape(_))));
        assert_eq!(decode_payload_lossy(&Value::String("nope".into())), VariantChanges::default());
        assert_eq!(decode_payload(&Value::Null).expect("empty"), DecodedPayload::default());
    }

    #[test]
    fn url_filter_forms() {
        let bare = decode_url_filter(&json!("*/checkout")).expect("filter");
        assert_eq!(bare, UrlFilter::glob(["*/checkout"]));

        let object = decode_url_filter(&json!({
            "include": "*",
            "exclude": ["*/admin*"],
            "mode": "simple"
        }))
        .expect("filter");
        assert!(object.matches("https://a.test/home"));
        assert!(!object.matches("https://a.test/admin/users"));

        let regex = decode_url_filter(&json!({"include": ["^https://a\\.test/p/\\d+$"], "mode": "regex"}))
            .expect("filter");
        assert_eq!(regex.mode, MatchMode::Regex);
        assert!(regex.matches("https://a.test/p/12"));

        assert!(decode_url_filter(&json!({"mode": "fuzzy"})).is_err());
        assert!(decode_url_filter(&json!(7)).is_err());
    }

    #[test]
    fn injection_keys() {
        let set = decode_injections(&json!({
            "headEnd": "<style>.x{}</style>",
            "bodyEnd5": "<script>1</script>",
            "footer": "<p>ignored</p>",
            "bodyStart": "",
            "urlFilter": "*/checkout"
        }))
        .expect("injections");

        assert_eq!(set.items.len(), 2);
        assert!(set
            .items
            .iter()
            .any(|item| item.location == InjectionLocation::BodyEnd && item.priority == 5));
        assert!(set.in_scope("https://a.test/checkout"));
        assert!(!set.in_scope("https://a.test/"));
        assert!(decode_injections(&json!([1])).is_err());
    }
}
