//! Onion middleware around the router.
//!
//! Each middleware gets the event, a handle to the router and the rest of
//! the chain. The innermost layer routes the event by its method.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineResult;
use crate::http::HttpEvent;
use crate::routing::{DefaultHandler, HandlerFuture, HandlerKind, Outcome, PathRouter};

/// Router bound to the dispatcher's default handler.
#[derive(Clone)]
pub struct RouteHandle {
    router: PathRouter,
    default: Option<DefaultHandler>,
}

impl RouteHandle {
    pub fn new(router: PathRouter, default: Option<DefaultHandler>) -> Self {
        Self { router, default }
    }

    /// Route `event` looking for any of `kinds`.
    pub fn route(&self, kinds: &[HandlerKind], event: HttpEvent, input: Value) -> HandlerFuture {
        self.router.route(kinds, event, input, self.default.clone())
    }

    /// Route by the request method (`get` then `default`, ...).
    pub fn route_method(&self, event: HttpEvent, input: Value) -> HandlerFuture {
        let kinds = HandlerKind::for_method(event.request().method());
        self.route(&kinds, event, input)
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, event: HttpEvent, router: RouteHandle, next: MiddlewareNext) -> EngineResult<Outcome>;
}

/// The remainder of the chain.
#[derive(Clone)]
pub struct MiddlewareNext {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    router: RouteHandle,
}

impl MiddlewareNext {
    pub(crate) fn start(chain: Arc<[Arc<dyn Middleware>]>, router: RouteHandle) -> Self {
        Self {
            chain,
            index: 0,
            router,
        }
    }

    pub fn run(self, event: HttpEvent) -> HandlerFuture {
        match self.chain.get(self.index).cloned() {
            Some(middleware) => {
                let router = self.router.clone();
                let next = MiddlewareNext {
                    index: self.index + 1,
                    ..self
                };
                Box::pin(async move { middleware.handle(event, router, next).await })
            }
            None => self.router.route_method(event, Value::Null),
        }
    }
}

struct FnMiddleware<F>(F);

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(HttpEvent, RouteHandle, MiddlewareNext) -> Fut + Send + Sync,
    Fut: Future<Output = EngineResult<Outcome>> + Send + 'static,
{
    async fn handle(&self, event: HttpEvent, router: RouteHandle, next: MiddlewareNext) -> EngineResult<Outcome> {
        (self.0)(event, router, next).await
    }
}

/// Wrap an async closure as middleware.
pub fn middleware_fn<F, Fut>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(HttpEvent, RouteHandle, MiddlewareNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EngineResult<Outcome>> + Send + 'static,
{
    Arc::new(FnMiddleware(f))
}
