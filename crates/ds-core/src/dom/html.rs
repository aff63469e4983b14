//! Lenient HTML fragment parser and serializer for [`MemoryDocument`].
//!
//! Covers what experiment payloads and test fixtures use: nested elements,
//! quoted/unquoted/bare attributes, void elements, comments, doctype, raw-text
//! `script`/`style`/`textarea`, and basic character references. Unclosed
//! elements are closed at the end of input; stray end tags are ignored.
//!
//! [`MemoryDocument`]: super::MemoryDocument

use super::DomError;

/// A parsed node, before it is adopted into a document arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedNode {
    Element(ParsedElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<ParsedNode>,
}

/// Parse markup into top-level nodes.
pub fn parse_fragment(html: &str) -> Result<Vec<ParsedNode>, DomError> {
    let bytes = html.as_bytes();
    let mut stack: Vec<ParsedElement> = Vec::new();
    let mut top: Vec<ParsedNode> = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            let end = find_subslice(bytes, i + 4, b"-->")
                .ok_or_else(|| DomError::Markup("unclosed HTML comment".into()))?;
            i = end + 3;
            continue;
        }

        if starts_with_at(bytes, i, b"<!") || starts_with_at(bytes, i, b"<?") {
            // Doctype / processing instruction: skipped.
            let end = find_subslice(bytes, i, b">")
                .ok_or_else(|| DomError::Markup("unclosed declaration".into()))?;
            i = end + 1;
            continue;
        }

        if starts_with_at(bytes, i, b"</") {
            let (tag, next) = parse_end_tag(html, i)?;
            i = next;
            close_element(&mut stack, &mut top, &tag);
            continue;
        }

        if bytes[i] == b'<' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_alphabetic()) {
            let (tag, attrs, self_closing, next) = parse_start_tag(html, i)?;
            i = next;

            let mut element = ParsedElement {
                tag,
                attrs,
                children: Vec::new(),
            };

            if is_raw_text_tag(&element.tag) && !self_closing {
                let close = find_case_insensitive_end_tag(bytes, i, element.tag.as_bytes())
                    .ok_or_else(|| DomError::Markup(format!("unclosed <{}>", element.tag)))?;
                if close > i {
                    element.children.push(ParsedNode::Text(html[i..close].to_string()));
                }
                let (_, after_end) = parse_end_tag(html, close)?;
                i = after_end;
                push_node(&mut stack, &mut top, ParsedNode::Element(element));
                continue;
            }

            if self_closing || is_void_tag(&element.tag) {
                push_node(&mut stack, &mut top, ParsedNode::Element(element));
            } else {
                stack.push(element);
            }
            continue;
        }

        // Text run up to the next '<' (a lone '<' is text).
        let text_start = i;
        i += 1;
        while i < bytes.len() && bytes[i] != b'<' {
            i += 1;
        }
        let text = decode_character_references(&html[text_start..i]);
        push_node(&mut stack, &mut top, ParsedNode::Text(text));
    }

    while let Some(element) = stack.pop() {
        push_node(&mut stack, &mut top, ParsedNode::Element(element));
    }

    Ok(top)
}

fn push_node(stack: &mut [ParsedElement], top: &mut Vec<ParsedNode>, node: ParsedNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => top.push(node),
    }
}

fn close_element(stack: &mut Vec<ParsedElement>, top: &mut Vec<ParsedNode>, tag: &str) {
    if !stack.iter().any(|el| el.tag.eq_ignore_ascii_case(tag)) {
        return;
    }
    while let Some(element) = stack.pop() {
        let matched = element.tag.eq_ignore_ascii_case(tag);
        push_node(stack, top, ParsedNode::Element(element));
        if matched {
            break;
        }
    }
}

fn parse_start_tag(
    html: &str,
    at: usize,
) -> Result<(String, Vec<(String, String)>, bool, usize), DomError> {
    let bytes = html.as_bytes();
    let mut i = at + 1;

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }
    let tag = html[tag_start..i].to_ascii_lowercase();
    if tag.is_empty() {
        return Err(DomError::Markup("empty tag name".into()));
    }

    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            return Err(DomError::Markup(format!("unclosed start tag <{tag}")));
        }

        if bytes[i] == b'>' {
            i += 1;
            break;
        }

        if bytes[i] == b'/' {
            if bytes.get(i + 1) == Some(&b'>') {
                self_closing = true;
                i += 2;
                break;
            }
            i += 1;
            continue;
        }

        let name_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }
        if name_start == i {
            return Err(DomError::Markup(format!("invalid attribute in <{tag}>")));
        }
        let name = html[name_start..i].to_ascii_lowercase();

        skip_ws(bytes, &mut i);
        let value = if bytes.get(i) == Some(&b'=') {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, &mut i)?
        } else {
            String::new()
        };

        if !attrs.iter().any(|(existing, _)| *existing == name) {
            attrs.push((name, value));
        }
    }

    Ok((tag, attrs, self_closing, i))
}

fn parse_end_tag(html: &str, at: usize) -> Result<(String, usize), DomError> {
    let bytes = html.as_bytes();
    let mut i = at + 2;
    skip_ws(bytes, &mut i);

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }
    let tag = html[tag_start..i].to_ascii_lowercase();

    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(DomError::Markup("unclosed end tag".into()));
    }

    Ok((tag, i + 1))
}

fn parse_attr_value(html: &str, i: &mut usize) -> Result<String, DomError> {
    let bytes = html.as_bytes();
    if *i >= bytes.len() {
        return Err(DomError::Markup("missing attribute value".into()));
    }

    if bytes[*i] == b'\'' || bytes[*i] == b'"' {
        let quote = bytes[*i];
        *i += 1;
        let start = *i;
        while *i < bytes.len() && bytes[*i] != quote {
            *i += 1;
        }
        if *i >= bytes.len() {
            return Err(DomError::Markup("unclosed quoted attribute value".into()));
        }
        let value = decode_character_references(&html[start..*i]);
        *i += 1;
        return Ok(value);
    }

    let start = *i;
    while *i < bytes.len()
        && !bytes[*i].is_ascii_whitespace()
        && bytes[*i] != b'>'
        && !(bytes[*i] == b'/' && bytes.get(*i + 1) == Some(&b'>'))
    {
        *i += 1;
    }
    Ok(decode_character_references(&html[start..*i]))
}

fn find_case_insensitive_end_tag(bytes: &[u8], from: usize, tag: &[u8]) -> Option<usize> {
    let mut i = from;
    while i + 2 + tag.len() <= bytes.len() {
        if bytes[i] == b'<'
            && bytes[i + 1] == b'/'
            && bytes[i + 2..i + 2 + tag.len()].eq_ignore_ascii_case(tag)
        {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    at + needle.len() <= bytes.len() && &bytes[at..at + needle.len()] == needle
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn is_attr_name_char(b: u8) -> bool {
    !b.is_ascii_whitespace() && !matches!(b, b'=' | b'>' | b'/' | b'"' | b'\'' | b'<')
}

fn is_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "textarea" | "title")
}

pub fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

/// Decode the common named references and numeric references.
pub fn decode_character_references(src: &str) -> String {
    if !src.contains('&') {
        return src.to_string();
    }

    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';').filter(|&pos| pos <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn escape_text(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for ch in src.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attr(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for ch in src.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
