//! The route tree: normalized paths → handler modules.

use std::collections::BTreeMap;

use crate::routing::handler::HandlerModule;
use crate::routing::path::normalize;

/// Immutable once handed to a `PathRouter`.
#[derive(Debug, Clone, Default)]
pub struct RouteTree {
    nodes: BTreeMap<String, HandlerModule>,
}

impl RouteTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module at `path` (`/`, `/a/b`, `/a/-`).
    pub fn route(mut self, path: &str, module: HandlerModule) -> Self {
        self.insert(path, module);
        self
    }

    pub fn insert(&mut self, path: &str, module: HandlerModule) {
        self.nodes.insert(normalize(path), module);
    }

    pub fn get(&self, path: &str) -> Option<&HandlerModule> {
        self.nodes.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
