//! URL filters for experiment and directive scoping
//!
//! The slicing helpers avoid allocations and work directly on string slices;
//! [`UrlFilter`] decides whether a variant, directive or injection is in
//! scope for the current page.

use std::sync::OnceLock;

use regex::Regex;

// =============================================================================
// URL Slicing
// =============================================================================

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();

    // Find ':'
    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    // Check for "://"
    if bytes.len() > colon_pos + 2
        && bytes[colon_pos + 1] == b'/'
        && bytes[colon_pos + 2] == b'/'
    {
        return Some(colon_pos + 3);
    }

    None
}

/// Get the start and end positions of the hostname in a URL.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let bytes = url.as_bytes();

    // Skip userinfo
    let mut host_start = scheme_end;
    for (i, &b) in bytes.iter().enumerate().skip(scheme_end) {
        if b == b'@' {
            host_start = i + 1;
            break;
        }
        if b == b'/' {
            break;
        }
    }

    // Find host end
    let mut host_end = bytes.len();
    for (i, &b) in bytes.iter().enumerate().skip(host_start) {
        if b == b'/' || b == b'?' || b == b'#' || b == b':' {
            host_end = i;
            break;
        }
    }

    Some((host_start, host_end))
}

/// Host of a URL without port or userinfo.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (host_start, host_end) = get_host_position(url)?;
    Some(&url[host_start..host_end])
}

/// Path of a URL; "/" when absent.
#[inline]
pub fn extract_path(url: &str) -> &str {
    let scheme_end = match get_scheme_end(url) {
        Some(pos) => pos,
        None => return "/",
    };

    let bytes = url.as_bytes();

    // Find path start (first '/' after host)
    let mut path_start = None;
    for (i, &b) in bytes[scheme_end..].iter().enumerate() {
        if b == b'/' {
            path_start = Some(scheme_end + i);
            break;
        }
        if b == b'?' || b == b'#' {
            return "/";
        }
    }

    let path_start = match path_start {
        Some(pos) => pos,
        None => return "/",
    };

    // Find path end
    let mut path_end = bytes.len();
    for (i, &b) in bytes[path_start..].iter().enumerate() {
        if b == b'?' || b == b'#' {
            path_end = path_start + i;
            break;
        }
    }

    &url[path_start..path_end]
}

/// Query string including the leading '?', or "" when absent.
#[inline]
pub fn extract_query(url: &str) -> &str {
    let fragment_start = url.find('#').unwrap_or(url.len());
    match url[..fragment_start].find('?') {
        Some(q_pos) => &url[q_pos..fragment_start],
        None => "",
    }
}

/// Fragment including the leading '#', or "" when absent.
#[inline]
pub fn extract_fragment(url: &str) -> &str {
    match url.find('#') {
        Some(pos) => &url[pos..],
        None => "",
    }
}

// =============================================================================
// URL Filter
// =============================================================================

/// How filter patterns are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// `*` = any run of characters, `?` = exactly one, the rest literal
    #[default]
    Glob,
    /// Each pattern is an unanchored regular expression
    Regex,
}

impl MatchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "glob" | "simple" => Some(Self::Glob),
            "regex" => Some(Self::Regex),
            _ => None,
        }
    }
}

/// Which part of the URL the patterns are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchTarget {
    #[default]
    FullUrl,
    Path,
    Domain,
    Query,
    Hash,
}

impl MatchTarget {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full-url" | "fullUrl" | "url" => Some(Self::FullUrl),
            "path" => Some(Self::Path),
            "domain" | "host" => Some(Self::Domain),
            "query" => Some(Self::Query),
            "hash" => Some(Self::Hash),
            _ => None,
        }
    }

    fn select<'a>(&self, url: &'a str) -> &'a str {
        match self {
            Self::FullUrl => url,
            Self::Path => extract_path(url),
            Self::Domain => extract_host(url).unwrap_or(""),
            Self::Query => extract_query(url),
            Self::Hash => extract_fragment(url),
        }
    }
}

/// Include/exclude pattern set. A bare pattern or a pattern list decode to
/// an include-only glob filter.
///
/// Patterns are compiled on the first [`matches`] call and reused after that,
/// so set the fields before matching.
///
/// [`matches`]: UrlFilter::matches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub mode: MatchMode,
    pub target: MatchTarget,
    compiled: CompiledPatterns,
}

/// Compiled include and exclude patterns; `None` for a pattern that failed
/// to compile. Ignored by equality.
#[derive(Debug, Clone, Default)]
struct CompiledPatterns(OnceLock<(Vec<Option<Regex>>, Vec<Option<Regex>>)>);

impl PartialEq for CompiledPatterns {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for CompiledPatterns {}

impl UrlFilter {
    /// Include-only glob filter.
    pub fn glob<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: patterns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Include-only regex filter.
    pub fn regex<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: patterns.into_iter().map(Into::into).collect(),
            mode: MatchMode::Regex,
            ..Self::default()
        }
    }

    pub fn excluding<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn against(mut self, target: MatchTarget) -> Self {
        self.target = target;
        self
    }

    /// Whether `url` passes the filter. Exclude is checked after include and
    /// always wins; an empty include list admits everything not excluded.
    pub fn matches(&self, url: &str) -> bool {
        let subject = self.target.select(url);
        let (include, exclude) = self.compiled.0.get_or_init(|| {
            (
                compile_patterns(&self.include, self.mode),
                compile_patterns(&self.exclude, self.mode),
            )
        });

        let hit = |re: &Option<Regex>| re.as_ref().is_some_and(|re| re.is_match(subject));
        let included = include.is_empty() || include.iter().any(hit);
        included && !exclude.iter().any(hit)
    }
}

fn compile_patterns(patterns: &[String], mode: MatchMode) -> Vec<Option<Regex>> {
    patterns.iter().map(|pattern| compile_pattern(pattern, mode)).collect()
}

/// Compile one pattern. Invalid regexes yield `None` and match nothing.
pub fn compile_pattern(pattern: &str, mode: MatchMode) -> Option<Regex> {
    let source = match mode {
        MatchMode::Glob => glob_to_regex(pattern),
        MatchMode::Regex => pattern.to_string(),
    };
    match Regex::new(&source) {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("URL pattern {:?} failed to compile: {}", pattern, e);
            None
        }
    }
}

/// Translate a glob into an anchored regex source.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(ch.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}
