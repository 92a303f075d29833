//! Handler modules: typed export tables keyed by `HandlerKind`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::Method;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::EngineResult;
use crate::http::{EngineResponse, HttpEvent};
use crate::routing::router::Next;

/// Named exports a handler module can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Get,
    Post,
    Put,
    Patch,
    Del,
    Default,
    Render,
    Deploy,
    PostMessage,
    Push,
    NotificationClick,
    NotificationClose,
}

impl HandlerKind {
    /// Candidate exports for an HTTP method, most specific first.
    pub fn for_method(method: &Method) -> Vec<HandlerKind> {
        let specific = match *method {
            Method::GET | Method::HEAD => Some(HandlerKind::Get),
            Method::POST => Some(HandlerKind::Post),
            Method::PUT => Some(HandlerKind::Put),
            Method::PATCH => Some(HandlerKind::Patch),
            Method::DELETE => Some(HandlerKind::Del),
            _ => None,
        };
        specific
            .into_iter()
            .chain(std::iter::once(HandlerKind::Default))
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Get => "get",
            HandlerKind::Post => "post",
            HandlerKind::Put => "put",
            HandlerKind::Patch => "patch",
            HandlerKind::Del => "del",
            HandlerKind::Default => "default",
            HandlerKind::Render => "render",
            HandlerKind::Deploy => "deploy",
            HandlerKind::PostMessage => "postmessage",
            HandlerKind::Push => "push",
            HandlerKind::NotificationClick => "notificationclick",
            HandlerKind::NotificationClose => "notificationclose",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handler produced.
#[derive(Debug, Default)]
pub enum Outcome {
    /// Nothing; becomes a 404 at the dispatcher.
    #[default]
    Undefined,
    /// A plain value, normalized into JSON or rendered HTML.
    Value(Value),
    /// A finished response, passed through.
    Response(EngineResponse),
}

impl Outcome {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Outcome::Undefined)
    }
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Outcome::Value(value)
    }
}

impl From<EngineResponse> for Outcome {
    fn from(response: EngineResponse) -> Self {
        Outcome::Response(response)
    }
}

impl From<()> for Outcome {
    fn from(_: ()) -> Self {
        Outcome::Undefined
    }
}

pub type HandlerFuture = BoxFuture<'static, EngineResult<Outcome>>;

/// `(event, input, next) -> outcome`
pub type HandlerFn = Arc<dyn Fn(HttpEvent, Value, Next) -> HandlerFuture + Send + Sync>;

/// A route tree node: the exports registered at one path.
#[derive(Clone, Default)]
pub struct HandlerModule {
    exports: HashMap<HandlerKind, HandlerFn>,
}

impl HandlerModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F, Fut>(mut self, kind: HandlerKind, handler: F) -> Self
    where
        F: Fn(HttpEvent, Value, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<Outcome>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |event, input, next| Box::pin(handler(event, input, next)));
        self.exports.insert(kind, handler);
        self
    }

    pub fn get<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(HttpEvent, Value, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<Outcome>> + Send + 'static,
    {
        self.with(HandlerKind::Get, handler)
    }

    pub fn post<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(HttpEvent, Value, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<Outcome>> + Send + 'static,
    {
        self.with(HandlerKind::Post, handler)
    }

    pub fn default_handler<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(HttpEvent, Value, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<Outcome>> + Send + 'static,
    {
        self.with(HandlerKind::Default, handler)
    }

    pub fn render<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(HttpEvent, Value, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<Outcome>> + Send + 'static,
    {
        self.with(HandlerKind::Render, handler)
    }

    pub fn export(&self, kind: HandlerKind) -> Option<&HandlerFn> {
        self.exports.get(&kind)
    }

    /// First of `kinds` this module exports.
    pub fn pick(&self, kinds: &[HandlerKind]) -> Option<(HandlerKind, HandlerFn)> {
        kinds
            .iter()
            .find_map(|kind| self.exports.get(kind).map(|h| (*kind, h.clone())))
    }

    pub fn has_any(&self, kinds: &[HandlerKind]) -> bool {
        kinds.iter().any(|k| self.exports.contains_key(k))
    }
}

impl fmt::Debug for HandlerModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.exports.keys().map(HandlerKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerModule").field("exports", &kinds).finish()
    }
}
