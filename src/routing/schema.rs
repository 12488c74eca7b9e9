//! Route path compilation.
//!
//! A textual route path is split on `/` and every piece is classified into a
//! [`PathSegment`]:
//!
//! ```text
//! users          static literal
//! :id            named parameter, matches one path component
//! :id(num)       named parameter constrained by a preset or a pattern
//! (\d{4})        anonymous constraint, nothing is bound
//! :id?           any of the above followed by `?` is optional
//! ```
//!
//! The presets `num`, `str` and `*` expand to `^\d+$`, `^\D+$` and `.*`.
//! From the segment list a single anchored regex is built once; it is the
//! authoritative matcher for every non-absolute route.

use crate::error::{Result, TrellisError};
use regex::Regex;
use std::fmt;

/// A route path as declared on a controller.
#[derive(Debug, Clone)]
pub enum RoutePath {
    Text(String),
    Pattern(Regex),
}

impl RoutePath {
    /// Key used for duplicate detection and for absolute lookups.
    pub fn canonical(&self) -> String {
        match self {
            RoutePath::Text(text) => normalize_path(text),
            RoutePath::Pattern(regex) => format!("regex:{}", regex.as_str()),
        }
    }

    /// Join a controller prefix and a route path.
    ///
    /// Raw patterns are never prefixed: the expression is matched against the
    /// whole request path as written.
    pub fn prefixed(self, prefix: &str) -> RoutePath {
        match self {
            RoutePath::Text(text) => RoutePath::Text(join_paths(prefix, &text)),
            pattern @ RoutePath::Pattern(_) => pattern,
        }
    }
}

impl From<&str> for RoutePath {
    fn from(value: &str) -> Self {
        RoutePath::Text(value.to_string())
    }
}

impl From<String> for RoutePath {
    fn from(value: String) -> Self {
        RoutePath::Text(value)
    }
}

impl From<Regex> for RoutePath {
    fn from(value: Regex) -> Self {
        RoutePath::Pattern(value)
    }
}

impl fmt::Display for RoutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutePath::Text(text) => f.write_str(text),
            RoutePath::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

/// Constraint attached to a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentPattern {
    /// `num`
    Numeric,
    /// `str`
    NonNumeric,
    /// `*`
    Wildcard,
    Custom(String),
}

impl SegmentPattern {
    fn from_source(source: &str) -> Self {
        match source {
            "num" => SegmentPattern::Numeric,
            "str" => SegmentPattern::NonNumeric,
            "*" => SegmentPattern::Wildcard,
            other => SegmentPattern::Custom(other.to_string()),
        }
    }

    /// The pattern as a standalone expression.
    pub fn as_source(&self) -> &str {
        match self {
            SegmentPattern::Numeric => r"^\d+$",
            SegmentPattern::NonNumeric => r"^\D+$",
            SegmentPattern::Wildcard => ".*",
            SegmentPattern::Custom(source) => source,
        }
    }

    /// The pattern with its anchors removed, ready to be spliced into a
    /// larger expression.
    fn body(&self) -> &str {
        let source = self.as_source();
        let source = source.strip_prefix('^').unwrap_or(source);
        match source.strip_suffix('$') {
            Some(stripped) if !stripped.ends_with('\\') => stripped,
            _ => source,
        }
    }
}

/// One `/`-delimited unit of a compiled route path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    /// Literal text for static segments, the parameter name for dynamic
    /// ones, `None` for anonymous constraints.
    pub name: Option<String>,
    pub is_parameter: bool,
    pub regex: Option<SegmentPattern>,
    pub is_optional: bool,
}

impl PathSegment {
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            name: Some(text.into()),
            is_parameter: false,
            regex: None,
            is_optional: false,
        }
    }

    pub fn parameter(name: impl Into<String>, regex: Option<SegmentPattern>) -> Self {
        Self {
            name: Some(name.into()),
            is_parameter: true,
            regex,
            is_optional: false,
        }
    }

    pub fn anonymous(regex: SegmentPattern) -> Self {
        Self {
            name: None,
            is_parameter: false,
            regex: Some(regex),
            is_optional: false,
        }
    }

    fn optional(mut self, optional: bool) -> Self {
        self.is_optional = optional;
        self
    }

    /// Static segments are matched by plain string comparison.
    pub fn is_static(&self) -> bool {
        !self.is_parameter && self.regex.is_none()
    }
}

/// Output of [`compile_path`].
#[derive(Debug, Clone)]
pub struct CompiledPath {
    pub canonical: String,
    pub segments: Vec<PathSegment>,
    pub match_pattern: Regex,
    /// `(capture group, parameter name)` pairs, in path order.
    pub captures: Vec<(String, String)>,
    /// True for raw regex routes: their segment count says nothing about how
    /// many path components they accept.
    pub raw: bool,
}

impl CompiledPath {
    pub fn is_absolute(&self) -> bool {
        !self.raw && self.segments.iter().all(PathSegment::is_static)
    }

    /// Every concrete path an absolute route answers to, in normalized form.
    ///
    /// Optional static segments expand into one key with and one without the
    /// segment, so `/help/about?` yields `/help` and `/help/about`. Empty for
    /// non-absolute routes.
    pub fn absolute_keys(&self) -> Vec<String> {
        if !self.is_absolute() {
            return Vec::new();
        }
        let mut keys = vec![Vec::<&str>::new()];
        for segment in &self.segments {
            let Some(text) = segment.name.as_deref().filter(|text| !text.is_empty()) else {
                continue;
            };
            if segment.is_optional {
                let with: Vec<Vec<&str>> = keys
                    .iter()
                    .map(|key| key.iter().copied().chain([text]).collect())
                    .collect();
                keys.extend(with);
            } else {
                keys.iter_mut().for_each(|key| key.push(text));
            }
        }
        keys.into_iter().map(|parts| normalize_path(&parts.join("/"))).collect()
    }

    pub fn has_optional(&self) -> bool {
        self.segments.iter().any(|segment| segment.is_optional)
    }

    pub fn has_regex(&self) -> bool {
        self.raw || self.segments.iter().any(|segment| segment.regex.is_some())
    }
}

/// Compile a declared route path into segments and a matcher.
///
/// # Errors
///
/// Returns [`TrellisError::InvalidPath`] when a segment contains characters
/// outside `A-Za-z0-9_.~-`, declares an empty constraint, or declares a
/// constraint that is not a valid regular expression.
pub fn compile_path(path: &RoutePath) -> Result<CompiledPath> {
    match path {
        RoutePath::Text(text) => compile_text(text),
        RoutePath::Pattern(regex) => Ok(compile_raw(regex)),
    }
}

fn compile_raw(regex: &Regex) -> CompiledPath {
    let captures = regex
        .capture_names()
        .flatten()
        .map(|name| (name.to_string(), name.to_string()))
        .collect();

    CompiledPath {
        canonical: RoutePath::Pattern(regex.clone()).canonical(),
        segments: vec![PathSegment::anonymous(SegmentPattern::Custom(
            regex.as_str().to_string(),
        ))],
        match_pattern: regex.clone(),
        captures,
        raw: true,
    }
}

fn compile_text(path: &str) -> Result<CompiledPath> {
    let canonical = normalize_path(path);

    if canonical == "/" {
        let match_pattern = build_regex(path, r"^\/?$")?;
        return Ok(CompiledPath {
            canonical,
            segments: vec![PathSegment::literal("")],
            match_pattern,
            captures: Vec::new(),
            raw: false,
        });
    }

    let segments = split_path(path)
        .map(|raw| parse_segment(path, raw))
        .collect::<Result<Vec<_>>>()?;

    let mut source = String::from(r"^\/?");
    let mut captures = Vec::new();

    for (position, segment) in segments.iter().enumerate() {
        let piece = segment_source(segment, &mut captures);
        if segment.is_optional {
            source.push_str(r"(?:\/");
            source.push_str(&piece);
            source.push_str(")?");
        } else {
            if position > 0 {
                source.push_str(r"\/");
            }
            source.push_str(&piece);
        }
    }
    source.push_str(r"\/?$");

    let match_pattern = build_regex(path, &source)?;

    Ok(CompiledPath {
        canonical,
        segments,
        match_pattern,
        captures,
        raw: false,
    })
}

fn segment_source(segment: &PathSegment, captures: &mut Vec<(String, String)>) -> String {
    match (&segment.name, segment.is_parameter, &segment.regex) {
        (Some(name), true, regex) => {
            let group = format!("p{}", captures.len());
            let body = regex.as_ref().map_or("[^/]+", SegmentPattern::body);
            captures.push((group.clone(), name.clone()));
            format!("(?P<{group}>{body})")
        }
        (_, _, Some(regex)) => format!("(?:{})", regex.body()),
        (Some(name), false, None) => regex::escape(name),
        (None, _, None) => String::new(),
    }
}

fn build_regex(path: &str, source: &str) -> Result<Regex> {
    Regex::new(source).map_err(|e| {
        TrellisError::invalid_path(path, source, format!("does not compile to a matcher: {e}"))
    })
}

fn parse_segment(path: &str, raw: &str) -> Result<PathSegment> {
    let (body, optional) = match raw.strip_suffix('?') {
        Some(stripped) => (stripped, true),
        None => (raw, false),
    };

    if body.is_empty() {
        return Err(TrellisError::invalid_path(path, raw, "is empty"));
    }

    if let Some(rest) = body.strip_prefix(':') {
        return match rest.find('(') {
            None => {
                if !is_url_safe(rest) {
                    return Err(TrellisError::invalid_path(
                        path,
                        raw,
                        "has a parameter name outside [A-Za-z0-9_.~-]",
                    ));
                }
                Ok(PathSegment::parameter(rest, None).optional(optional))
            }
            Some(open) => {
                let name = &rest[..open];
                let constraint = rest[open..]
                    .strip_prefix('(')
                    .and_then(|c| c.strip_suffix(')'))
                    .ok_or_else(|| {
                        TrellisError::invalid_path(path, raw, "has an unterminated constraint")
                    })?;
                if name.is_empty() || !is_url_safe(name) {
                    return Err(TrellisError::invalid_path(
                        path,
                        raw,
                        "has a parameter name outside [A-Za-z0-9_.~-]",
                    ));
                }
                let pattern = parse_constraint(path, raw, constraint)?;
                Ok(PathSegment::parameter(name, Some(pattern)).optional(optional))
            }
        };
    }

    if let Some(constraint) = body.strip_prefix('(').and_then(|b| b.strip_suffix(')')) {
        let pattern = parse_constraint(path, raw, constraint)?;
        return Ok(PathSegment::anonymous(pattern).optional(optional));
    }

    if !is_url_safe(body) {
        return Err(TrellisError::invalid_path(
            path,
            raw,
            "contains characters outside [A-Za-z0-9_.~-]",
        ));
    }

    Ok(PathSegment::literal(body).optional(optional))
}

fn parse_constraint(path: &str, raw: &str, constraint: &str) -> Result<SegmentPattern> {
    if constraint.is_empty() {
        return Err(TrellisError::invalid_path(path, raw, "has an empty regex body"));
    }
    let pattern = SegmentPattern::from_source(constraint);
    Regex::new(&format!("^(?:{})$", pattern.body())).map_err(|e| {
        TrellisError::invalid_path(path, raw, format!("has an invalid constraint: {e}"))
    })?;
    Ok(pattern)
}

fn is_url_safe(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '~' | '-'))
}

/// Non-empty `/`-delimited components of a path.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|component| !component.is_empty())
}

/// Collapse a path to `/a/b` form: one leading slash, no trailing slash, no
/// empty components.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for component in split_path(path) {
        normalized.push('/');
        normalized.push_str(component);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Join two path fragments with exactly one `/` between them.
pub fn join_paths(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => {
            if prefix.starts_with('/') {
                prefix.to_string()
            } else {
                format!("/{prefix}")
            }
        }
        (false, false) => {
            let prefix = prefix.trim_start_matches('/');
            format!("/{prefix}/{path}")
        }
    }
}
