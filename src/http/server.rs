//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router: background sockets plus a dispatch fallback
//! - Wire up middleware (tracing, timeout, request ID)
//! - Buffer request bodies (bounded) and hand them to the runtime
//! - Apply hot-reloaded caching configuration
//! - Stop on the shutdown broadcast

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::caching::CachingStrategyEngine;
use crate::config::EngineConfig;
use crate::http::request::X_REQUEST_ID;
use crate::http::response::error_response;
use crate::http::websocket::background_handler;
use crate::http::EngineResponse;
use crate::runtime::Runtime;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Runtime,
    pub max_body_size: usize,
}

/// HTTP server adapter for a server runtime.
pub struct HttpServer {
    router: Router,
    runtime: Runtime,
    caching: Option<Arc<CachingStrategyEngine>>,
}

impl HttpServer {
    pub fn new(config: &EngineConfig, runtime: Runtime) -> Self {
        let state = AppState {
            runtime: runtime.clone(),
            max_body_size: config.security.max_body_size,
        };
        let router = Self::build_router(config, state);
        Self {
            router,
            runtime,
            caching: None,
        }
    }

    /// Engine whose strategy lists follow config reloads.
    pub fn with_caching(mut self, caching: Arc<CachingStrategyEngine>) -> Self {
        self.caching = Some(caching);
        self
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &EngineConfig, state: AppState) -> Router {
        Router::new()
            .route("/.background/{port_id}", get(background_handler))
            .fallback(dispatch_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<EngineConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            context = self.runtime.context().as_str(),
            "HTTP server starting"
        );

        let caching = self.caching.clone();
        let reloader = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                match &caching {
                    Some(engine) => engine.reload(&config.caching),
                    None => tracing::debug!("Config reloaded, no caching engine attached"),
                }
            }
        });

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        reloader.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn into_axum(response: EngineResponse) -> Response {
    response.map(Body::from)
}

/// Buffer the request and dispatch it through the runtime.
async fn dispatch_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let bytes = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        path = %parts.uri.path(),
        "Dispatching request"
    );

    match state.runtime.serve(Request::from_parts(parts, bytes)).await {
        Ok(response) => into_axum(response),
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Dispatch failed");
            into_axum(error_response(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::http::HttpEvent;
    use crate::routing::{HandlerModule, Outcome, RouteTree};
    use serde_json::json;
    use tower::ServiceExt;

    fn server(config: &EngineConfig) -> HttpServer {
        let tree = RouteTree::new().route(
            "/echo",
            HandlerModule::new().post(|event: HttpEvent, _input, _next| async move {
                let size = event.request().body().len();
                Ok(Outcome::Value(json!({ "size": size })))
            }),
        );
        HttpServer::new(config, Runtime::server(config, Dispatcher::builder(tree).build()))
    }

    #[tokio::test]
    async fn test_dispatch_stamps_request_id() {
        let app = server(&EngineConfig::default()).router();
        let response = app
            .oneshot(Request::post("/echo").body(Body::from("abc")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap(), json!({ "size": 3 }));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let mut config = EngineConfig::default();
        config.security.max_body_size = 4;
        let app = server(&config).router();
        let response = app
            .oneshot(Request::post("/echo").body(Body::from("too large")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_unknown_background_port_is_404() {
        let app = server(&EngineConfig::default()).router();
        let response = app
            .oneshot(Request::get("/.background/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        // Not a websocket handshake: the upgrade extractor rejects it first.
        assert!(response.status().is_client_error());
    }
}
