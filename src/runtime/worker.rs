//! Offline fetch proxy.
//!
//! Same-origin requests run through the local route tree; everything else is
//! fetched under the caching strategy selected for its URL. Push, postMessage
//! and notification events are routed to the matching handler exports.

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderMap, Request};
use serde_json::Value;
use url::Url;

use crate::caching::CachingStrategyEngine;
use crate::error::{EngineError, EngineResult};
use crate::http::request::request_url;
use crate::http::response::not_found;
use crate::http::{EngineRequest, EngineResponse, EventDetail};
use crate::routing::{HandlerKind, Outcome};
use crate::runtime::Runtime;

/// A non-fetch event delivered to the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Push(Value),
    PostMessage(Value),
    NotificationClick(Value),
    NotificationClose(Value),
}

impl WorkerMessage {
    pub fn kind(&self) -> HandlerKind {
        match self {
            WorkerMessage::Push(_) => HandlerKind::Push,
            WorkerMessage::PostMessage(_) => HandlerKind::PostMessage,
            WorkerMessage::NotificationClick(_) => HandlerKind::NotificationClick,
            WorkerMessage::NotificationClose(_) => HandlerKind::NotificationClose,
        }
    }

    fn into_data(self) -> Value {
        match self {
            WorkerMessage::Push(data)
            | WorkerMessage::PostMessage(data)
            | WorkerMessage::NotificationClick(data)
            | WorkerMessage::NotificationClose(data) => data,
        }
    }
}

pub struct WorkerProxy {
    runtime: Runtime,
    caching: Arc<CachingStrategyEngine>,
    scope: Url,
}

impl WorkerProxy {
    pub fn new(runtime: Runtime, caching: Arc<CachingStrategyEngine>, scope: &str) -> EngineResult<Self> {
        let scope = Url::parse(scope).map_err(|e| EngineError::InvalidRequest(format!("scope {:?}: {}", scope, e)))?;
        Ok(Self {
            runtime,
            caching,
            scope,
        })
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Same origin, and the path lies under the scope path segment-wise:
    /// `/app` covers `/app` and `/app/x` but not `/application`.
    fn in_scope(&self, url: &Url) -> bool {
        if url.origin() != self.scope.origin() {
            return false;
        }
        let scope = self.scope.path().trim_end_matches('/');
        match url.path().strip_prefix(scope) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Answer an intercepted fetch.
    pub async fn handle_fetch(&self, request: EngineRequest) -> EngineResult<EngineResponse> {
        let url = request_url(&request);
        if self.in_scope(&url) {
            tracing::debug!(%url, "Worker dispatching locally");
            return self.runtime.serve(request).await;
        }

        let strategy = self.caching.strategy_for(&request);
        tracing::debug!(%url, %strategy, "Worker fetching through cache");
        Ok(self
            .caching
            .fetch_with(request, strategy)
            .await?
            .unwrap_or_else(not_found))
    }

    /// Route a push/message/notification event to `path`'s handler.
    ///
    /// Storage changes are committed once the handler and its `wait_until`
    /// work finish.
    pub async fn handle_message(&self, path: &str, message: WorkerMessage) -> EngineResult<Outcome> {
        let url = self
            .scope
            .join(path)
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        let request = Request::post(url.as_str()).body(Bytes::new())?;
        let event = self.runtime.event_for(request, EventDetail::default());
        let kind = message.kind();

        tracing::debug!(%url, %kind, "Worker message");
        let outcome = self
            .runtime
            .dispatcher()
            .route_handle()
            .route(&[kind], event.clone(), message.into_data())
            .await?;
        event.settled().await;
        event.storages().commit(&mut HeaderMap::new());
        Ok(outcome)
    }
}
