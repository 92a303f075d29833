//! Middleware → router → normalize → commit.
//!
//! # Responsibilities
//! - Run the middleware chain down to the router
//! - Prefer a response given through `respond_with` over the return value
//! - Normalize outcomes (404, JSON, rendered HTML, 406)
//! - Apply the caller's redirect policy
//! - Commit cookies, user and session into the response
//! - Open the background channel when work is still pending
//! - Turn non-fatal errors into 500s
//!
//! # Data Flow
//! ```text
//! HttpEvent
//!     → middleware[0] → ... → middleware[n] → router(method kinds)
//!     → primary slot | outcome
//!     → normalize → redirect policy → commit storages
//!     → pending wait_until? → X-Background-Messaging + closer task
//!     → EngineResponse
//! ```

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, StatusCode};
use serde_json::Value;

use crate::dispatch::middleware::{Middleware, MiddlewareNext, RouteHandle};
use crate::error::EngineResult;
use crate::http::response::{
    accepts_json, apply_redirect_policy, error_response, html_response, json_response, negotiate,
    not_acceptable, not_found, Negotiated,
};
use crate::http::{EngineResponse, HttpEvent, Renderer, SpaRootPredicate};
use crate::observability::metrics;
use crate::routing::{DefaultHandler, HandlerKind, Outcome, PathRouter, RouteTree};

pub struct DispatcherBuilder {
    tree: RouteTree,
    middleware: Vec<Arc<dyn Middleware>>,
    default: Option<DefaultHandler>,
    renderer: Option<Arc<dyn Renderer>>,
    spa: Option<Arc<dyn SpaRootPredicate>>,
}

impl DispatcherBuilder {
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Called when no node exports the requested handler.
    pub fn default_handler(mut self, handler: DefaultHandler) -> Self {
        self.default = Some(handler);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn spa_roots(mut self, predicate: Arc<dyn SpaRootPredicate>) -> Self {
        self.spa = Some(predicate);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            router: PathRouter::new(self.tree),
            middleware: self.middleware.into(),
            default: self.default,
            renderer: self.renderer,
            spa: self.spa,
        }
    }
}

pub struct Dispatcher {
    router: PathRouter,
    middleware: Arc<[Arc<dyn Middleware>]>,
    default: Option<DefaultHandler>,
    renderer: Option<Arc<dyn Renderer>>,
    spa: Option<Arc<dyn SpaRootPredicate>>,
}

impl Dispatcher {
    pub fn builder(tree: RouteTree) -> DispatcherBuilder {
        DispatcherBuilder {
            tree,
            middleware: Vec::new(),
            default: None,
            renderer: None,
            spa: None,
        }
    }

    pub fn router(&self) -> &PathRouter {
        &self.router
    }

    pub fn route_handle(&self) -> RouteHandle {
        RouteHandle::new(self.router.clone(), self.default.clone())
    }

    /// Dispatch one event into a committed response.
    ///
    /// Only fatal configuration errors escape; everything else becomes a 500.
    pub async fn dispatch(&self, event: &HttpEvent) -> EngineResult<EngineResponse> {
        let start = Instant::now();
        let method = event.request().method().clone();
        let path = event.url().path().to_string();

        let response = match self.run(event).await {
            Ok(response) => response,
            Err(e) if e.is_fatal() => {
                tracing::error!(%method, %path, error = %e, "Fatal routing configuration error");
                return Err(e);
            }
            Err(e) => {
                tracing::error!(%method, %path, error = %e, "Handler failed");
                error_response(&e)
            }
        };

        tracing::debug!(%method, %path, status = response.status().as_u16(), "Dispatched");
        metrics::record_dispatch(method.as_str(), response.status().as_u16(), start);
        Ok(response)
    }

    async fn run(&self, event: &HttpEvent) -> EngineResult<EngineResponse> {
        let outcome = MiddlewareNext::start(self.middleware.clone(), self.route_handle())
            .run(event.clone())
            .await?;

        let response = match event.take_primary() {
            Some(primary) => {
                if !outcome.is_undefined() {
                    tracing::debug!("Return value ignored, respond_with already answered");
                }
                primary
            }
            None => self.normalize(event, outcome).await?,
        };

        let mut response = apply_redirect_policy(
            event.request().headers(),
            event.url(),
            response,
            self.spa.as_deref(),
        );

        event.storages().commit(response.headers_mut());

        if event.in_background() || event.has_pending_tasks() {
            let tag = event.enter_background();
            tag.write_to(response.headers_mut());
            let background = event.clone();
            tokio::spawn(async move {
                background.settled().await;
                // Background work may still have touched session or user.
                background.storages().commit(&mut HeaderMap::new());
                background.close_port();
            });
        }

        Ok(response)
    }

    async fn normalize(&self, event: &HttpEvent, outcome: Outcome) -> EngineResult<EngineResponse> {
        match outcome {
            Outcome::Undefined => Ok(not_found()),
            Outcome::Response(response) => Ok(response),
            Outcome::Value(value) => match negotiate(event.request().headers()) {
                Negotiated::Json => json_response(StatusCode::OK, &value),
                Negotiated::Html => match self.render(event, &value).await? {
                    Some(html) => Ok(html),
                    None if accepts_json(event.request().headers()) => json_response(StatusCode::OK, &value),
                    None => Ok(not_acceptable()),
                },
                Negotiated::NotAcceptable => Ok(not_acceptable()),
            },
        }
    }

    /// Render through the tree's `render` export, then the injected renderer.
    async fn render(&self, event: &HttpEvent, data: &Value) -> EngineResult<Option<EngineResponse>> {
        let outcome = self
            .router
            .route(&[HandlerKind::Render], event.clone(), data.clone(), None)
            .await?;
        match outcome {
            Outcome::Response(response) => return Ok(Some(response)),
            Outcome::Value(Value::String(html)) => return html_response(html).map(Some),
            Outcome::Value(other) => {
                tracing::debug!(kind = ?other, "render export returned a non-string value");
            }
            Outcome::Undefined => {}
        }
        match &self.renderer {
            Some(renderer) => {
                let html = renderer.render(event, data).await?;
                html_response(html).map(Some)
            }
            None => Ok(None),
        }
    }
}
