//! URL pattern matching for strategy lists.
//!
//! # Design Decisions
//! - Patterns are paths (`/api/*`), absolute URLs (`https://cdn.test/*`) or `*`
//! - `*` or `:name` matches exactly one segment; a trailing `*` matches the rest
//! - Paths are case-sensitive, origins compare in their serialized form
//! - No regex: matching is a single pass over segments

use std::fmt;

use url::Url;

/// Something a URL can be tested against.
pub trait Matcher: Send + Sync + fmt::Debug {
    fn matches(&self, url: &Url) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    source: String,
    origin: Option<String>,
    segments: Vec<Segment>,
    /// Trailing `*`: zero or more further segments.
    rest: bool,
}

impl UrlPattern {
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let pattern = pattern.trim();
        if pattern == "*" {
            return Ok(Self {
                source: pattern.to_string(),
                origin: None,
                segments: Vec::new(),
                rest: true,
            });
        }

        let (origin, path) = if pattern.contains("://") {
            let url = Url::parse(pattern).map_err(|e| format!("{:?}: {}", pattern, e))?;
            (Some(url.origin().ascii_serialization()), url.path().to_string())
        } else if pattern.starts_with('/') {
            (None, pattern.to_string())
        } else {
            return Err(format!("{:?} is neither a path nor an absolute URL", pattern));
        };

        let mut segments: Vec<Segment> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "*" || s.starts_with(':') {
                    Segment::Any
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();

        let rest = path.ends_with("/*") || path == "*";
        if rest {
            segments.pop();
        }

        Ok(Self {
            source: pattern.to_string(),
            origin,
            segments,
            rest,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Matcher for UrlPattern {
    fn matches(&self, url: &Url) -> bool {
        if let Some(origin) = &self.origin {
            if url.origin().ascii_serialization() != *origin {
                return false;
            }
        }
        let path: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();
        let length_ok = if self.rest {
            path.len() >= self.segments.len()
        } else {
            path.len() == self.segments.len()
        };
        length_ok
            && self.segments.iter().zip(&path).all(|(pattern, segment)| match pattern {
                Segment::Any => true,
                Segment::Literal(literal) => literal == segment,
            })
    }
}

/// Matches when any member matches.
#[derive(Debug, Default)]
pub struct AnyMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AnyMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }

    /// Parse a pattern list, skipping (and logging) malformed entries.
    pub fn from_patterns(patterns: &[String]) -> Self {
        let matchers = patterns
            .iter()
            .filter_map(|p| match UrlPattern::parse(p) {
                Ok(pattern) => Some(Box::new(pattern) as Box<dyn Matcher>),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed URL pattern");
                    None
                }
            })
            .collect();
        Self { matchers }
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl Matcher for AnyMatcher {
    fn matches(&self, url: &Url) -> bool {
        self.matchers.iter().any(|m| m.matches(url))
    }
}
