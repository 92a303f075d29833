//! `X-Background-Messaging` header codec.

use std::fmt;
use std::str::FromStr;

use axum::http::{HeaderMap, HeaderValue};

use crate::config::TransportKind;

pub const X_BACKGROUND_MESSAGING: &str = "x-background-messaging";

/// Transport tag plus port id, e.g. `ch:3f2a...` or `ws:3f2a...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortTag {
    Channel(String),
    Socket(String),
}

impl PortTag {
    pub fn new(transport: TransportKind, id: impl Into<String>) -> Self {
        match transport {
            TransportKind::Channel => PortTag::Channel(id.into()),
            TransportKind::Socket => PortTag::Socket(id.into()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            PortTag::Channel(id) | PortTag::Socket(id) => id,
        }
    }

    /// Read the tag from response headers, if present and well-formed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(X_BACKGROUND_MESSAGING)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    pub fn write_to(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.to_string()) {
            headers.insert(X_BACKGROUND_MESSAGING, value);
        }
    }
}

impl fmt::Display for PortTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortTag::Channel(id) => write!(f, "ch:{}", id),
            PortTag::Socket(id) => write!(f, "ws:{}", id),
        }
    }
}

impl FromStr for PortTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, id) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("missing transport tag in {:?}", s))?;
        if id.is_empty() {
            return Err(format!("missing port id in {:?}", s));
        }
        match tag {
            "ch" => Ok(PortTag::Channel(id.to_string())),
            "ws" => Ok(PortTag::Socket(id.to_string())),
            other => Err(format!("unknown transport tag {:?}", other)),
        }
    }
}
