//! Cookie storage bound to the `Cookie` / `Set-Cookie` header pair.
//!
//! # Design Decisions
//! - The registry is the parsed request `Cookie` header; it is never written back
//! - Commit renders only added and deleted keys as `Set-Cookie` lines
//! - Deleted keys are expired with `Max-Age=0`
//! - String values are emitted raw, everything else as JSON, both form-encoded

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue};
use serde_json::Value;
use url::form_urlencoded;

use crate::storage::diff::{Registry, StorageDiff, Store};

/// Cookies sent by the client, parsed once.
pub struct CookieJar {
    cookies: Store,
}

impl CookieJar {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cookies = Store::new();
        for value in headers.get_all(header::COOKIE) {
            if let Ok(value) = value.to_str() {
                cookies.extend(parse_cookie_header(value));
            }
        }
        Self { cookies }
    }
}

impl Registry for CookieJar {
    fn load(&self, _key: Option<&str>) -> Store {
        self.cookies.clone()
    }

    // Cookies are persisted through Set-Cookie headers, not the jar.
    fn save(&self, _key: Option<&str>, _store: &Store) {}
}

/// Parse a `Cookie` header into a store. Values that parse as non-string JSON
/// (numbers, booleans, objects) are kept typed.
pub fn parse_cookie_header(header: &str) -> Store {
    let mut store = Store::new();
    for pair in header.split(';') {
        let pair = pair.trim();
        let Some((name, raw)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = decode(raw.trim());
        let value = match serde_json::from_str::<Value>(&value) {
            Ok(parsed) if !parsed.is_string() => parsed,
            _ => Value::String(value),
        };
        store.insert(name.to_string(), value);
    }
    store
}

/// Does any outgoing `Set-Cookie` line already set `name`?
pub fn set_cookie_contains(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|line| {
            line.split(';')
                .next()
                .and_then(|pair| pair.split_once('='))
                .map_or(false, |(n, _)| n.trim() == name)
        })
}

/// Percent-encode; spaces become `%20` so a literal `+` survives other parsers.
fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Percent-decode a single cookie value. `&` and `+` are literal here.
fn decode(value: &str) -> String {
    let escaped = value.replace('+', "%2B").replace('&', "%26");
    form_urlencoded::parse(format!("v={}", escaped).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Attributes rendered after the `name=value` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: String,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }
}

impl CookieOptions {
    /// `Path=/; Secure; HttpOnly; SameSite=Lax`, used for the session id cookie.
    pub fn session() -> Self {
        Self {
            secure: true,
            http_only: true,
            same_site: Some("Lax".to_string()),
            ..Default::default()
        }
    }

    pub fn render(&self, name: &str, value: &str) -> String {
        let mut line = format!("{}={}; Path={}", encode(name), encode(value), self.path);
        if let Some(domain) = &self.domain {
            line.push_str(&format!("; Domain={}", domain));
        }
        if let Some(max_age) = self.max_age {
            line.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.secure {
            line.push_str("; Secure");
        }
        if self.http_only {
            line.push_str("; HttpOnly");
        }
        if let Some(same_site) = &self.same_site {
            line.push_str(&format!("; SameSite={}", same_site));
        }
        line
    }
}

pub struct CookieStorage {
    diff: StorageDiff,
    options: HashMap<String, CookieOptions>,
}

impl CookieStorage {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            diff: StorageDiff::new(Arc::new(CookieJar::from_headers(headers)), None),
            options: HashMap::new(),
        }
    }

    /// Set a cookie with explicit attributes.
    pub fn set_with(&mut self, name: impl Into<String>, value: impl Into<Value>, options: CookieOptions) {
        let name = name.into();
        self.options.insert(name.clone(), options);
        self.diff.set(name, value);
    }

    /// `Set-Cookie` lines for the current diff.
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for name in self.diff.get_added() {
            let value = match self.diff.changes().get(&name).and_then(|c| c.current.as_ref()) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => continue,
            };
            let options = self.options.get(&name).cloned().unwrap_or_default();
            lines.push(options.render(&name, &value));
        }
        for name in self.diff.get_deleted() {
            let mut options = self.options.get(&name).cloned().unwrap_or_default();
            options.max_age = Some(0);
            lines.push(options.render(&name, ""));
        }
        lines
    }

    /// Append the diff to the outgoing headers. Returns the number of lines written.
    pub fn commit(&mut self, headers: &mut HeaderMap) -> usize {
        let lines = self.render();
        let mut written = 0;
        for line in &lines {
            match HeaderValue::from_str(line) {
                Ok(value) => {
                    headers.append(header::SET_COOKIE, value);
                    written += 1;
                }
                Err(e) => tracing::warn!(error = %e, "Dropping unrepresentable Set-Cookie line"),
            }
        }
        self.diff.mark_committed();
        written
    }
}

impl Deref for CookieStorage {
    type Target = StorageDiff;

    fn deref(&self) -> &StorageDiff {
        &self.diff
    }
}

impl DerefMut for CookieStorage {
    fn deref_mut(&mut self) -> &mut StorageDiff {
        &mut self.diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    fn set_cookies(headers: &HeaderMap) -> Vec<String> {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_parse_cookie_header() {
        let store = parse_cookie_header("a=1; name=John%20Doe; flag=true; junk; empty=");
        assert_eq!(store["a"], json!(1));
        assert_eq!(store["name"], json!("John Doe"));
        assert_eq!(store["flag"], json!(true));
        assert_eq!(store["empty"], json!(""));
        assert!(!store.contains_key("junk"));
    }

    #[test]
    fn test_third_party_values_kept_whole() {
        let store = parse_cookie_header("tracker=a=1&b=2; sig=ab+cd/ef==; enc=x%26y");
        assert_eq!(store["tracker"], json!("a=1&b=2"));
        assert_eq!(store["sig"], json!("ab+cd/ef=="));
        assert_eq!(store["enc"], json!("x&y"));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_commit_renders_only_diff() {
        let mut cookies = CookieStorage::from_headers(&headers("b=2; untouched=3"));
        cookies.set("a", 1);
        cookies.delete("b");

        let mut out = HeaderMap::new();
        assert_eq!(cookies.commit(&mut out), 2);
        let lines = set_cookies(&out);
        assert_eq!(lines, vec!["a=1; Path=/".to_string(), "b=; Path=/; Max-Age=0".to_string()]);
        assert!(!lines.iter().any(|l| l.starts_with("untouched")));

        let mut again = HeaderMap::new();
        assert_eq!(cookies.commit(&mut again), 0);
    }

    #[test]
    fn test_set_with_options() {
        let mut cookies = CookieStorage::from_headers(&HeaderMap::new());
        cookies.set_with(
            "theme",
            "dark mode",
            CookieOptions {
                max_age: Some(3600),
                ..CookieOptions::session()
            },
        );
        assert_eq!(
            cookies.render(),
            vec!["theme=dark%20mode; Path=/; Max-Age=3600; Secure; HttpOnly; SameSite=Lax".to_string()]
        );
    }

    #[test]
    fn test_set_cookie_contains() {
        let mut out = HeaderMap::new();
        out.append(header::SET_COOKIE, HeaderValue::from_static("__sessid=abc; Path=/"));
        assert!(set_cookie_contains(&out, "__sessid"));
        assert!(!set_cookie_contains(&out, "sessid"));
    }
}
