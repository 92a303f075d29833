//! Route walking and the `next()` continuation.
//!
//! # Responsibilities
//! - Walk the tree from the root outward, one segment per depth
//! - Pick, per depth, the exact node over the wildcard node
//! - Hand each handler a `Next` that resumes the walk
//! - Fall through to the caller's default handler when nothing matched
//!
//! # Design Decisions
//! - A node lacking the requested export does not stop the walk
//! - Exact node with the export > wildcard node with the export >
//!   exact node as a path step > wildcard node as a path step
//! - `Next::run_at` resumes from the common prefix so ancestors never rerun
//! - Traversal above the root fails synchronously, before any await

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::http::HttpEvent;
use crate::routing::handler::{HandlerFuture, HandlerKind, Outcome};
use crate::routing::path::{self, WILDCARD};
use crate::routing::tree::RouteTree;

/// Context handed to the default handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteContext {
    /// The full path walked without finding an export.
    pub pathname: String,
}

/// Called when no node along the path exports a requested kind.
pub type DefaultHandler =
    Arc<dyn Fn(HttpEvent, Value, RouteContext) -> BoxFuture<'static, EngineResult<Outcome>> + Send + Sync>;

/// Wrap an async closure as a `DefaultHandler`.
pub fn default_handler<F, Fut>(f: F) -> DefaultHandler
where
    F: Fn(HttpEvent, Value, RouteContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = EngineResult<Outcome>> + Send + 'static,
{
    Arc::new(move |event, input, context| Box::pin(f(event, input, context)))
}

struct Walk {
    tree: Arc<RouteTree>,
    kinds: Vec<HandlerKind>,
    default: Option<DefaultHandler>,
}

/// Position of a walk between two depths.
#[derive(Clone)]
struct Cursor {
    /// Literal segments consumed; `None` until the root was visited.
    trail: Option<Vec<String>>,
    /// Tree-key segments consumed (`-` where a wildcard node matched).
    file_trail: Vec<String>,
    remaining: VecDeque<String>,
}

impl Walk {
    fn step(self: Arc<Self>, event: HttpEvent, input: Value, mut cursor: Cursor) -> HandlerFuture {
        loop {
            let (segment, exact_key, wildcard_key) = match cursor.trail.as_mut() {
                None => {
                    cursor.trail = Some(Vec::new());
                    (None, "/".to_string(), None)
                }
                Some(trail) => match cursor.remaining.pop_front() {
                    Some(segment) => {
                        trail.push(segment.clone());
                        let mut exact = cursor.file_trail.clone();
                        exact.push(segment.clone());
                        let mut wildcard = cursor.file_trail.clone();
                        wildcard.push(WILDCARD.to_string());
                        (Some(segment), path::join(&exact), Some(path::join(&wildcard)))
                    }
                    None => return self.fall_through(event, input, trail),
                },
            };

            let exact = self.tree.get(&exact_key);
            let wildcard = wildcard_key.as_deref().and_then(|k| self.tree.get(k));

            let picked = exact
                .and_then(|m| m.pick(&self.kinds))
                .map(|h| (h, segment.clone()))
                .or_else(|| {
                    wildcard
                        .and_then(|m| m.pick(&self.kinds))
                        .map(|h| (h, Some(WILDCARD.to_string())))
                });

            if let Some(((kind, handler), file_segment)) = picked {
                cursor.file_trail.extend(file_segment);
                let trail = cursor.trail.clone().unwrap_or_default();
                tracing::trace!(path = %path::join(&trail), %kind, "Route matched");
                let next = Next {
                    walk: self.clone(),
                    event: event.clone(),
                    cursor,
                    trail,
                };
                return handler(event, input, next);
            }

            if let Some(segment) = segment {
                let step = if exact.is_none() && wildcard.is_some() {
                    WILDCARD.to_string()
                } else {
                    segment
                };
                cursor.file_trail.push(step);
            }
        }
    }

    fn fall_through(&self, event: HttpEvent, input: Value, trail: &[String]) -> HandlerFuture {
        let pathname = path::join(trail);
        match &self.default {
            Some(default) => {
                tracing::debug!(%pathname, "No export found, using default handler");
                default(event, input, RouteContext { pathname })
            }
            None => {
                tracing::debug!(%pathname, "No export found");
                Box::pin(async { Ok(Outcome::Undefined) })
            }
        }
    }
}

/// Continuation handed to every handler.
#[derive(Clone)]
pub struct Next {
    walk: Arc<Walk>,
    event: HttpEvent,
    cursor: Cursor,
    /// Literal path of the handler holding this continuation.
    trail: Vec<String>,
}

impl Next {
    /// Continue one depth further with the same event.
    pub fn run(self, input: Value) -> HandlerFuture {
        self.walk.step(self.event, input, self.cursor)
    }

    /// Jump to `target`, relative to this handler's own path.
    ///
    /// Fails immediately when `target` climbs above the root.
    pub fn run_at(self, input: Value, target: &str) -> EngineResult<HandlerFuture> {
        let (target_path, query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (target, None),
        };
        let resolved =
            path::resolve(&self.trail, target_path).ok_or_else(|| EngineError::RedirectTraversal {
                from: path::join(&self.trail),
                target: target.to_string(),
            })?;

        let mut path_and_query = path::join(&resolved);
        if let Some(query) = query {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }
        let event = self.event.retarget(&path_and_query)?;

        let common = path::common_prefix_len(&self.trail, &resolved);
        let cursor = Cursor {
            trail: Some(resolved[..common].to_vec()),
            file_trail: self.cursor.file_trail[..common.min(self.cursor.file_trail.len())].to_vec(),
            remaining: resolved[common..].iter().cloned().collect(),
        };
        tracing::debug!(from = %path::join(&self.trail), to = %path_and_query, "Routing sideways");
        Ok(self.walk.step(event, input, cursor))
    }

    /// Path of the handler holding this continuation.
    pub fn pathname(&self) -> String {
        path::join(&self.trail)
    }

    pub fn event(&self) -> &HttpEvent {
        &self.event
    }
}

/// Resolves events against a `RouteTree`.
#[derive(Clone)]
pub struct PathRouter {
    tree: Arc<RouteTree>,
}

impl PathRouter {
    pub fn new(tree: RouteTree) -> Self {
        Self { tree: Arc::new(tree) }
    }

    pub fn tree(&self) -> &RouteTree {
        &self.tree
    }

    /// Walk the event's path looking for the first of `kinds`.
    pub fn route(
        &self,
        kinds: &[HandlerKind],
        event: HttpEvent,
        input: Value,
        default: Option<DefaultHandler>,
    ) -> HandlerFuture {
        let walk = Arc::new(Walk {
            tree: self.tree.clone(),
            kinds: kinds.to_vec(),
            default,
        });
        let cursor = Cursor {
            trail: None,
            file_trail: Vec::new(),
            remaining: path::segments(event.url().path()).into(),
        };
        walk.step(event, input, cursor)
    }
}
