//! Per-experiment managed stylesheets for `styleRules` changes.

use std::collections::HashMap;

use crate::dom::{css_property_name, Document, DomError};
use crate::types::{Position, StyleRules, STYLES_ATTR};

#[derive(Debug)]
struct Scope<N> {
    element: N,
    /// `selector::states` key to rendered CSS, in insertion order
    rules: Vec<(String, String)>,
}

/// One `<style>` element per experiment, holding its upserted rules.
#[derive(Debug)]
pub struct StyleScopes<N> {
    scopes: HashMap<String, Scope<N>>,
}

impl<N> Default for StyleScopes<N> {
    fn default() -> Self {
        Self {
            scopes: HashMap::new(),
        }
    }
}

impl<N: Clone + Eq + std::hash::Hash + std::fmt::Debug> StyleScopes<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the rule for `selector` in the experiment's sheet.
    pub fn upsert<D>(
        &mut self,
        doc: &D,
        experiment: &str,
        selector: &str,
        rules: &StyleRules,
        important: bool,
    ) -> Result<(), DomError>
    where
        D: Document<Node = N>,
    {
        let key = format!("{selector}::states");
        let css = render_rule(selector, rules, important);

        let stale = self
            .scopes
            .get(experiment)
            .is_some_and(|scope| !doc.is_connected(&scope.element));
        if stale {
            self.scopes.remove(experiment);
        }

        if !self.scopes.contains_key(experiment) {
            let element = doc.create_element("style");
            doc.set_attribute(&element, STYLES_ATTR, experiment);
            let parent = doc.head().unwrap_or_else(|| doc.root());
            doc.insert(&element, &parent, Position::LastChild)?;
            self.scopes.insert(
                experiment.to_string(),
                Scope {
                    element,
                    rules: Vec::new(),
                },
            );
        }

        let Some(scope) = self.scopes.get_mut(experiment) else {
            return Ok(());
        };
        match scope.rules.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = css,
            None => scope.rules.push((key, css)),
        }

        let text = scope
            .rules
            .iter()
            .map(|(_, css)| css.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        doc.set_text_content(&scope.element, &text);
        Ok(())
    }

    /// Drop the experiment's stylesheet. Returns whether one existed.
    pub fn remove<D>(&mut self, doc: &D, experiment: &str) -> bool
    where
        D: Document<Node = N>,
    {
        match self.scopes.remove(experiment) {
            Some(scope) => {
                doc.remove(&scope.element);
                true
            }
            None => false,
        }
    }

    pub fn clear<D>(&mut self, doc: &D)
    where
        D: Document<Node = N>,
    {
        for (_, scope) in self.scopes.drain() {
            doc.remove(&scope.element);
        }
    }

    pub fn rule_count(&self, experiment: &str) -> usize {
        self.scopes.get(experiment).map_or(0, |scope| scope.rules.len())
    }
}

/// Compile rules for `selector` into CSS text.
///
/// Raw CSS containing a block is used verbatim; bare declarations are wrapped
/// in a rule for `selector`. State maps produce one rule per state, `normal`
/// first, other states as pseudo-classes.
pub fn render_rule(selector: &str, rules: &StyleRules, important: bool) -> String {
    match rules {
        StyleRules::Css(css) if css.contains('{') => css.trim().to_string(),
        StyleRules::Css(css) => format!("{} {{ {} }}", selector, css.trim()),
        StyleRules::States(states) => {
            let normal = states.get("normal").map(|decls| ("normal", decls));
            let others = states
                .iter()
                .filter(|(state, _)| state.as_str() != "normal")
                .map(|(state, decls)| (state.as_str(), decls));

            normal
                .into_iter()
                .chain(others)
                .filter(|(_, decls)| !decls.is_empty())
                .map(|(state, decls)| {
                    let body = decls
                        .iter()
                        .map(|(prop, value)| {
                            let suffix = if important && !value.contains("!important") {
                                " !important"
                            } else {
                                ""
                            };
                            format!("{}: {}{};", css_property_name(prop), value, suffix)
                        })
                        .collect::<Vec<_>>()
                        .join(" ");
                    format!("{} {{ {} }}", state_selector(selector, state), body)
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

fn state_selector(selector: &str, state: &str) -> String {
    if state == "normal" {
        return selector.to_string();
    }
    selector
        .split(',')
        .map(|part| format!("{}:{}", part.trim(), state))
        .collect::<Vec<_>>()
        .join(", ")
}
