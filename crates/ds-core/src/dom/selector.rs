//! CSS selector engine for [`MemoryDocument`].
//!
//! Supported: type, `*`, `#id`, `.class`, attribute conditions
//! (`[a]`, `=`, `^=`, `$=`, `*=`, `~=`, `|=`), `:first-child`,
//! `:last-child`, `:only-child`, `:not(...)`, selector groups and the four
//! combinators. Anything else is reported as
//! [`DomError::UnsupportedSelector`] instead of silently matching nothing.
//!
//! [`MemoryDocument`]: super::MemoryDocument

use super::DomError;

/// Read-only element view the matcher walks.
pub trait SelectorTree {
    type Id: Copy + Eq;

    /// Lowercase tag name; `None` for non-element nodes.
    fn tag_name(&self, id: Self::Id) -> Option<&str>;
    fn attr(&self, id: Self::Id, name: &str) -> Option<&str>;
    fn parent_element(&self, id: Self::Id) -> Option<Self::Id>;
    fn previous_element_sibling(&self, id: Self::Id) -> Option<Self::Id>;
    fn next_element_sibling(&self, id: Self::Id) -> Option<Self::Id>;
}

// =============================================================================
// Selector AST
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList(pub Vec<ComplexSelector>);

/// Compound selectors joined by combinators, left to right. The first step's
/// combinator is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexSelector {
    pub steps: Vec<(Option<Combinator>, Compound)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Descendant,
    Child,
    AdjacentSibling,
    GeneralSibling,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<AttrCondition>,
    pub pseudos: Vec<Pseudo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrCondition {
    pub name: String,
    pub op: AttrOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrOp {
    Exists,
    Eq(String),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    Includes(String),
    DashMatch(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pseudo {
    FirstChild,
    LastChild,
    OnlyChild,
    Not(SelectorList),
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse a selector group.
pub fn parse_selector(src: &str) -> Result<SelectorList, DomError> {
    let mut parser = Parser {
        src,
        chars: src.chars().collect(),
        pos: 0,
    };
    let list = parser.parse_list(None)?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(parser.unsupported());
    }
    Ok(list)
}

struct Parser<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn unsupported(&self) -> DomError {
        DomError::UnsupportedSelector(self.src.to_string())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse_list(&mut self, terminator: Option<char>) -> Result<SelectorList, DomError> {
        let mut groups = Vec::new();
        loop {
            self.skip_ws();
            groups.push(self.parse_complex()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                None => break,
                Some(ch) if Some(ch) == terminator => break,
                Some(_) => return Err(self.unsupported()),
            }
        }
        Ok(SelectorList(groups))
    }

    fn parse_complex(&mut self) -> Result<ComplexSelector, DomError> {
        let mut steps = Vec::new();
        let mut combinator = None;
        loop {
            let compound = self.parse_compound()?;
            steps.push((combinator, compound));

            let had_ws = self.skip_ws();
            combinator = match self.peek() {
                None | Some(',') | Some(')') => break,
                Some('>') => Some(Combinator::Child),
                Some('+') => Some(Combinator::AdjacentSibling),
                Some('~') => Some(Combinator::GeneralSibling),
                Some(_) if had_ws => Some(Combinator::Descendant),
                Some(_) => return Err(self.unsupported()),
            };
            if combinator != Some(Combinator::Descendant) {
                self.pos += 1;
                self.skip_ws();
            }
        }
        Ok(ComplexSelector { steps })
    }

    fn parse_compound(&mut self) -> Result<Compound, DomError> {
        let mut compound = Compound::default();
        let start = self.pos;

        if self.eat('*') {
            // universal: no tag constraint
        } else if self.peek().is_some_and(is_ident_start) {
            compound.tag = Some(self.parse_ident()?.to_ascii_lowercase());
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.parse_ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.parse_ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attrs.push(self.parse_attr()?);
                }
                Some(':') => {
                    self.pos += 1;
                    compound.pseudos.push(self.parse_pseudo()?);
                }
                _ => break,
            }
        }

        if self.pos == start {
            return Err(self.unsupported());
        }
        Ok(compound)
    }

    fn parse_ident(&mut self) -> Result<String, DomError> {
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            if ch == '\\' {
                self.pos += 1;
                match self.bump() {
                    Some(escaped) => out.push(escaped),
                    None => return Err(self.unsupported()),
                }
            } else if is_ident_char(ch) {
                out.push(ch);
                self.pos += 1;
            } else {
                break;
            }
        }
        if out.is_empty() {
            return Err(self.unsupported());
        }
        Ok(out)
    }

    fn parse_attr(&mut self) -> Result<AttrCondition, DomError> {
        self.skip_ws();
        let name = self.parse_ident()?.to_ascii_lowercase();
        self.skip_ws();

        if self.eat(']') {
            return Ok(AttrCondition {
                name,
                op: AttrOp::Exists,
            });
        }

        let prefix = match self.peek() {
            Some('=') => None,
            Some(ch @ ('^' | '$' | '*' | '~' | '|')) => {
                self.pos += 1;
                Some(ch)
            }
            _ => return Err(self.unsupported()),
        };
        if !self.eat('=') {
            return Err(self.unsupported());
        }
        self.skip_ws();

        let value = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                let mut value = String::new();
                loop {
                    match self.bump() {
                        Some(ch) if ch == quote => break,
                        Some('\\') => match self.bump() {
                            Some(escaped) => value.push(escaped),
                            None => return Err(self.unsupported()),
                        },
                        Some(ch) => value.push(ch),
                        None => return Err(self.unsupported()),
                    }
                }
                value
            }
            _ => self.parse_ident()?,
        };

        self.skip_ws();
        if !self.eat(']') {
            return Err(self.unsupported());
        }

        let op = match prefix {
            None => AttrOp::Eq(value),
            Some('^') => AttrOp::StartsWith(value),
            Some('$') => AttrOp::EndsWith(value),
            Some('*') => AttrOp::Contains(value),
            Some('~') => AttrOp::Includes(value),
            Some('|') => AttrOp::DashMatch(value),
            Some(_) => return Err(self.unsupported()),
        };
        Ok(AttrCondition { name, op })
    }

    fn parse_pseudo(&mut self) -> Result<Pseudo, DomError> {
        if self.peek() == Some(':') {
            // pseudo-elements never match elements
            return Err(self.unsupported());
        }
        let name = self.parse_ident()?.to_ascii_lowercase();
        match name.as_str() {
            "first-child" => Ok(Pseudo::FirstChild),
            "last-child" => Ok(Pseudo::LastChild),
            "only-child" => Ok(Pseudo::OnlyChild),
            "not" => {
                if !self.eat('(') {
                    return Err(self.unsupported());
                }
                let inner = self.parse_list(Some(')'))?;
                if !self.eat(')') {
                    return Err(self.unsupported());
                }
                Ok(Pseudo::Not(inner))
            }
            _ => Err(self.unsupported()),
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '-' || ch == '\\' || !ch.is_ascii()
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '-' || !ch.is_ascii()
}

// =============================================================================
// Matching
// =============================================================================

impl SelectorList {
    pub fn matches<T: SelectorTree>(&self, tree: &T, id: T::Id) -> bool {
        tree.tag_name(id).is_some() && self.0.iter().any(|complex| complex.matches(tree, id))
    }
}

impl ComplexSelector {
    pub fn matches<T: SelectorTree>(&self, tree: &T, id: T::Id) -> bool {
        match self.steps.len() {
            0 => false,
            n => matches_from(tree, id, &self.steps, n - 1),
        }
    }
}

fn matches_from<T: SelectorTree>(
    tree: &T,
    id: T::Id,
    steps: &[(Option<Combinator>, Compound)],
    idx: usize,
) -> bool {
    let (combinator, compound) = &steps[idx];
    if !compound.matches(tree, id) {
        return false;
    }
    if idx == 0 {
        return true;
    }

    match combinator.unwrap_or(Combinator::Descendant) {
        Combinator::Descendant => {
            let mut current = tree.parent_element(id);
            while let Some(ancestor) = current {
                if matches_from(tree, ancestor, steps, idx - 1) {
                    return true;
                }
                current = tree.parent_element(ancestor);
            }
            false
        }
        Combinator::Child => tree
            .parent_element(id)
            .is_some_and(|parent| matches_from(tree, parent, steps, idx - 1)),
        Combinator::AdjacentSibling => tree
            .previous_element_sibling(id)
            .is_some_and(|prev| matches_from(tree, prev, steps, idx - 1)),
        Combinator::GeneralSibling => {
            let mut current = tree.previous_element_sibling(id);
            while let Some(sibling) = current {
                if matches_from(tree, sibling, steps, idx - 1) {
                    return true;
                }
                current = tree.previous_element_sibling(sibling);
            }
            false
        }
    }
}

impl Compound {
    fn matches<T: SelectorTree>(&self, tree: &T, id: T::Id) -> bool {
        let Some(tag) = tree.tag_name(id) else {
            return false;
        };

        if let Some(expected) = &self.tag {
            if !tag.eq_ignore_ascii_case(expected) {
                return false;
            }
        }

        if let Some(expected) = &self.id {
            if tree.attr(id, "id") != Some(expected.as_str()) {
                return false;
            }
        }

        if !self.classes.is_empty() {
            let class_attr = tree.attr(id, "class").unwrap_or("");
            if !self
                .classes
                .iter()
                .all(|class| class_attr.split_ascii_whitespace().any(|c| c == class))
            {
                return false;
            }
        }

        if !self.attrs.iter().all(|cond| cond.matches(tree.attr(id, &cond.name))) {
            return false;
        }

        self.pseudos.iter().all(|pseudo| match pseudo {
            Pseudo::FirstChild => tree.previous_element_sibling(id).is_none(),
            Pseudo::LastChild => tree.next_element_sibling(id).is_none(),
            Pseudo::OnlyChild => {
                tree.previous_element_sibling(id).is_none() && tree.next_element_sibling(id).is_none()
            }
            Pseudo::Not(inner) => !inner.matches(tree, id),
        })
    }
}

impl AttrCondition {
    fn matches(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match &self.op {
            AttrOp::Exists => true,
            AttrOp::Eq(expected) => value == expected,
            AttrOp::StartsWith(expected) => !expected.is_empty() && value.starts_with(expected.as_str()),
            AttrOp::EndsWith(expected) => !expected.is_empty() && value.ends_with(expected.as_str()),
            AttrOp::Contains(expected) => !expected.is_empty() && value.contains(expected.as_str()),
            AttrOp::Includes(expected) => value.split_ascii_whitespace().any(|token| token == expected),
            AttrOp::DashMatch(expected) => {
                value == expected
                    || value
                        .strip_prefix(expected.as_str())
                        .is_some_and(|rest| rest.starts_with('-'))
            }
        }
    }
}
