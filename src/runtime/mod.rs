//! Execution contexts sharing one dispatcher.
//!
//! # Responsibilities
//! - Turn transport requests into `HttpEvent`s with the right storages
//! - Run the retry-after loop around dispatch
//! - Own the periodic sweepers (idle sessions, unclaimed ports)
//!
//! # Data Flow
//! ```text
//! Server adapter ──┐
//! Navigator ───────┼→ Runtime::handle → HttpEvent → dispatch_with_retry → response
//! WorkerProxy ─────┘
//! ```
//!
//! # Design Decisions
//! - The server binds sessions to a signed cookie; client and worker
//!   contexts use a single local session
//! - The route tree is identical in every context

pub mod navigation;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::{EngineConfig, TransportKind};
use crate::dispatch::{dispatch_with_retry, AbortSignal, Dispatcher, RetryOutcome, RetryPolicy};
use crate::error::{EngineError, EngineResult};
use crate::http::{EngineRequest, EngineResponse, EventDetail, EventInit, HttpEvent, RequestCloner};
use crate::lifecycle::Shutdown;
use crate::messaging::PortRegistry;
use crate::observability::metrics;
use crate::storage::{MemorySessionStore, StorageContext};

pub use navigation::{FollowUp, FollowUps, NavigationOutcome, Navigator};
pub use worker::{WorkerMessage, WorkerProxy};

/// Where the engine is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    Server,
    Client,
    Worker,
}

impl ExecutionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionContext::Server => "server",
            ExecutionContext::Client => "client",
            ExecutionContext::Worker => "worker",
        }
    }

    /// Port transport a caller in this context can attach to.
    pub fn default_transport(&self) -> TransportKind {
        match self {
            ExecutionContext::Server => TransportKind::Socket,
            ExecutionContext::Client | ExecutionContext::Worker => TransportKind::Channel,
        }
    }
}

pub struct RuntimeBuilder {
    context: ExecutionContext,
    dispatcher: Dispatcher,
    storage: Option<StorageContext>,
    ports: Option<PortRegistry>,
    retry: RetryPolicy,
    cloner: Option<RequestCloner>,
    sweep_interval: Duration,
}

impl RuntimeBuilder {
    pub fn storage(mut self, storage: StorageContext) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn ports(mut self, ports: PortRegistry) -> Self {
        self.ports = Some(ports);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Custom request cloning for `clone_event`.
    pub fn cloner(mut self, cloner: RequestCloner) -> Self {
        self.cloner = Some(cloner);
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn build(self) -> Runtime {
        let storage = self.storage.unwrap_or_else(|| {
            let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(24 * 3600)));
            StorageContext::local(sessions)
        });
        let ports = self
            .ports
            .unwrap_or_else(|| PortRegistry::new(self.context.default_transport(), Duration::from_secs(30)));
        Runtime {
            inner: Arc::new(RuntimeInner {
                context: self.context,
                dispatcher: self.dispatcher,
                storage,
                ports,
                retry: self.retry,
                cloner: self.cloner,
                sweep_interval: self.sweep_interval,
            }),
        }
    }
}

struct RuntimeInner {
    context: ExecutionContext,
    dispatcher: Dispatcher,
    storage: StorageContext,
    ports: PortRegistry,
    retry: RetryPolicy,
    cloner: Option<RequestCloner>,
    sweep_interval: Duration,
}

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn builder(context: ExecutionContext, dispatcher: Dispatcher) -> RuntimeBuilder {
        RuntimeBuilder {
            context,
            dispatcher,
            storage: None,
            ports: None,
            retry: RetryPolicy::disabled(),
            cloner: None,
            sweep_interval: Duration::from_secs(60),
        }
    }

    /// Server runtime wired from configuration: cookie-bound in-memory
    /// sessions, configured port transport and retry policy.
    pub fn server(config: &EngineConfig, dispatcher: Dispatcher) -> Self {
        Self::builder(ExecutionContext::Server, dispatcher)
            .storage(StorageContext::in_memory(&config.session))
            .ports(PortRegistry::from_config(&config.messaging))
            .retry(RetryPolicy::from_config(&config.retry))
            .sweep_interval(Duration::from_secs(config.session.sweep_interval_secs.max(1)))
            .build()
    }

    pub fn context(&self) -> ExecutionContext {
        self.inner.context
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn ports(&self) -> &PortRegistry {
        &self.inner.ports
    }

    pub fn storage(&self) -> &StorageContext {
        &self.inner.storage
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// A fresh event with storages read from the request headers.
    pub fn event_for(&self, request: EngineRequest, detail: EventDetail) -> HttpEvent {
        let storages = self.inner.storage.storages_for(request.headers());
        HttpEvent::new(EventInit {
            request,
            detail,
            storages,
            ports: self.inner.ports.clone(),
            cloner: self.inner.cloner.clone(),
        })
    }

    /// Dispatch with retry-after handling until a final response or abort.
    pub async fn handle(
        &self,
        request: EngineRequest,
        detail: EventDetail,
        signal: &AbortSignal,
    ) -> EngineResult<RetryOutcome> {
        let event = self.event_for(request, detail);
        tracing::debug!(
            context = self.inner.context.as_str(),
            method = %event.request().method(),
            path = %event.url().path(),
            "Handling request"
        );
        dispatch_with_retry(&self.inner.dispatcher, &event, &self.inner.retry, signal).await
    }

    /// Handle a request that cannot be superseded.
    pub async fn serve(&self, request: EngineRequest) -> EngineResult<EngineResponse> {
        match self.handle(request, EventDetail::default(), &AbortSignal::never()).await? {
            RetryOutcome::Response(response) => Ok(response),
            RetryOutcome::Aborted => Err(EngineError::handler("request aborted")),
        }
    }

    /// Start the idle-session and unclaimed-port sweepers.
    pub fn spawn_sweepers(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let sessions = self.inner.storage.sessions().clone();
        let session_sweeper = shutdown.spawn_periodic("session-sweeper", self.inner.sweep_interval, move || {
            let evicted = sessions.evict_expired();
            if evicted > 0 {
                tracing::info!(evicted, "Evicted idle sessions");
            }
            metrics::record_session_count(sessions.len());
        });

        let ports = self.inner.ports.clone();
        let idle = self.inner.ports.idle_timeout().max(Duration::from_millis(10));
        let port_sweeper = shutdown.spawn_periodic("port-sweeper", idle, move || {
            ports.sweep();
        });

        vec![session_sweeper, port_sweeper]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::get;
    use crate::messaging::PortTag;
    use crate::routing::{HandlerModule, Outcome, RouteTree};
    use axum::http::header;
    use serde_json::json;

    fn runtime(context: ExecutionContext, storage: StorageContext) -> Runtime {
        let tree = RouteTree::new().route(
            "/count",
            HandlerModule::new().get(|event: HttpEvent, _input, _next| async move {
                let mut session = event.session();
                let n = session.get("n").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
                session.set("n", json!(n));
                Ok(Outcome::Value(json!({ "n": n })))
            }),
        );
        Runtime::builder(context, Dispatcher::builder(tree).build())
            .storage(storage)
            .ports(PortRegistry::new(TransportKind::Channel, Duration::from_millis(20)))
            .sweep_interval(Duration::from_millis(20))
            .build()
    }

    fn body(response: &EngineResponse) -> serde_json::Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn test_server_sessions_follow_cookie() {
        let runtime = runtime(ExecutionContext::Server, StorageContext::in_memory(&Default::default()));
        let first = runtime.serve(get("http://a.test/count").unwrap()).await.unwrap();
        assert_eq!(body(&first), json!({ "n": 1 }));
        let cookie = first.headers()[header::SET_COOKIE].to_str().unwrap();
        let pair = cookie.split(';').next().unwrap().to_string();

        let request = axum::http::Request::get("http://a.test/count")
            .header(header::COOKIE, pair)
            .body(axum::body::Bytes::new())
            .unwrap();
        let second = runtime.serve(request).await.unwrap();
        assert_eq!(body(&second), json!({ "n": 2 }));
        assert!(second.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_local_context_shares_one_session() {
        let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let runtime = runtime(ExecutionContext::Client, StorageContext::local(sessions));
        runtime.serve(get("http://a.test/count").unwrap()).await.unwrap();
        let second = runtime.serve(get("http://a.test/count").unwrap()).await.unwrap();
        assert_eq!(body(&second), json!({ "n": 2 }));
        assert_eq!(runtime.context().as_str(), "client");
    }

    #[tokio::test]
    async fn test_server_advertises_socket_ports() {
        let tree = RouteTree::new().route(
            "/job",
            HandlerModule::new().post(|event: HttpEvent, _input, _next| async move {
                event.defer().unwrap();
                Ok(Outcome::Undefined)
            }),
        );
        let job = || {
            axum::http::Request::post("http://a.test/job")
                .body(axum::body::Bytes::new())
                .unwrap()
        };

        let server = Runtime::server(&EngineConfig::default(), Dispatcher::builder(tree.clone()).build());
        let response = server.serve(job()).await.unwrap();
        let tag = PortTag::from_headers(response.headers()).unwrap();
        assert!(matches!(tag, PortTag::Socket(_)), "server tag was {}", tag);

        let client = Runtime::builder(ExecutionContext::Client, Dispatcher::builder(tree).build()).build();
        let response = client.serve(job()).await.unwrap();
        assert!(matches!(PortTag::from_headers(response.headers()), Some(PortTag::Channel(_))));
    }

    #[tokio::test]
    async fn test_sweepers_expire_ports() {
        let runtime = runtime(ExecutionContext::Server, StorageContext::in_memory(&Default::default()));
        let _port = runtime.ports().open();
        assert_eq!(runtime.ports().len(), 1);

        let shutdown = Shutdown::new();
        let handles = runtime.spawn_sweepers(&shutdown);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(runtime.ports().is_empty());

        shutdown.trigger();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
