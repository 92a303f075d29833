//! The per-request unit of work.
//!
//! # Responsibilities
//! - Bundle one request with its cookie, session and user storages
//! - Own the single-assignment primary response slot
//! - Register `wait_until` work and report when it has settled
//! - Route late responses onto the background port
//!
//! # Design Decisions
//! - `HttpEvent` is a cheap `Arc` handle; clones share everything
//! - `clone_event` forks the request and response channel but shares storages
//! - `retarget` keeps the response channel: it is the same logical request
//! - The primary slot moves unset → set once; after the background phase
//!   begins, further responses become follow-up messages

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Response, StatusCode, Uri};
use serde_json::Value;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::TransportKind;
use crate::error::{EngineError, EngineResult};
use crate::http::request::{default_cloner, request_url, EventDetail, RequestCloner};
use crate::http::{EngineRequest, EngineResponse};
use crate::messaging::{BackgroundMessage, BackgroundPort, PortRegistry, PortTag};
use crate::storage::require::{redirect_message_key, REDIRECT_MESSAGE_PARAM};
use crate::storage::{
    CookieStorage, MemorySessionStore, SessionStorage, StorageContext, Storages, UserStorage,
};

#[derive(Default)]
struct ChannelState {
    primary: Option<EngineResponse>,
    /// The dispatcher took the primary response.
    finalized: bool,
    port: Option<Arc<BackgroundPort>>,
}

/// Primary response slot plus the background port that replaces it later.
#[derive(Default)]
struct ResponseChannel {
    state: Mutex<ChannelState>,
}

impl ResponseChannel {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().expect("response channel mutex poisoned")
    }
}

/// Background work registered through `wait_until`.
#[derive(Default)]
struct TaskSet {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskSet {
    fn push(&self, handle: JoinHandle<()>) {
        self.handles.lock().expect("task set mutex poisoned").push(handle);
    }

    fn take(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.handles.lock().expect("task set mutex poisoned"))
    }

    fn has_pending(&self) -> bool {
        self.handles
            .lock()
            .expect("task set mutex poisoned")
            .iter()
            .any(|h| !h.is_finished())
    }
}

/// Everything needed to create an event.
pub struct EventInit {
    pub request: EngineRequest,
    pub detail: EventDetail,
    pub storages: Storages,
    pub ports: PortRegistry,
    pub cloner: Option<RequestCloner>,
}

struct EventInner {
    request: EngineRequest,
    url: OnceLock<Url>,
    detail: EventDetail,
    storages: Storages,
    channel: Arc<ResponseChannel>,
    tasks: Arc<TaskSet>,
    cloner: RequestCloner,
    ports: PortRegistry,
}

#[derive(Clone)]
pub struct HttpEvent {
    inner: Arc<EventInner>,
}

impl HttpEvent {
    pub fn new(init: EventInit) -> Self {
        Self {
            inner: Arc::new(EventInner {
                request: init.request,
                url: OnceLock::new(),
                detail: init.detail,
                storages: init.storages,
                channel: Arc::new(ResponseChannel::default()),
                tasks: Arc::new(TaskSet::default()),
                cloner: init.cloner.unwrap_or_else(default_cloner),
                ports: init.ports,
            }),
        }
    }

    /// An event with private in-memory storages and in-process ports.
    pub fn standalone(request: EngineRequest) -> Self {
        let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(3600)));
        let storages = StorageContext::local(sessions).storages_for(request.headers());
        Self::new(EventInit {
            request,
            detail: EventDetail::default(),
            storages,
            ports: PortRegistry::new(TransportKind::Channel, Duration::from_secs(30)),
            cloner: None,
        })
    }

    fn derive(&self, request: EngineRequest, channel: Arc<ResponseChannel>, tasks: Arc<TaskSet>) -> Self {
        Self {
            inner: Arc::new(EventInner {
                request,
                url: OnceLock::new(),
                detail: self.inner.detail.clone(),
                storages: self.inner.storages.clone(),
                channel,
                tasks,
                cloner: self.inner.cloner.clone(),
                ports: self.inner.ports.clone(),
            }),
        }
    }

    pub fn request(&self) -> &EngineRequest {
        &self.inner.request
    }

    /// Absolute request URL, computed on first use.
    pub fn url(&self) -> &Url {
        self.inner.url.get_or_init(|| request_url(&self.inner.request))
    }

    pub fn detail(&self) -> &EventDetail {
        &self.inner.detail
    }

    pub fn storages(&self) -> &Storages {
        &self.inner.storages
    }

    pub fn cookies(&self) -> MutexGuard<'_, CookieStorage> {
        self.inner
            .storages
            .cookies
            .lock()
            .expect("cookie storage mutex poisoned")
    }

    pub fn session(&self) -> MutexGuard<'_, SessionStorage> {
        self.inner
            .storages
            .session
            .lock()
            .expect("session storage mutex poisoned")
    }

    /// Never hold this together with `session()`: user locks before session.
    pub fn user(&self) -> MutexGuard<'_, UserStorage> {
        self.inner
            .storages
            .user
            .lock()
            .expect("user storage mutex poisoned")
    }

    pub fn ports(&self) -> &PortRegistry {
        &self.inner.ports
    }

    /// Complete the primary response, or push a follow-up once in the
    /// background phase.
    pub fn respond_with(&self, response: EngineResponse) -> EngineResult<()> {
        let mut state = self.inner.channel.lock();
        if let Some(port) = &state.port {
            port.send(BackgroundMessage::from_response(&response));
            return Ok(());
        }
        if state.primary.is_some() || state.finalized {
            return Err(EngineError::FinalResponseConflict);
        }
        state.primary = Some(response);
        Ok(())
    }

    /// Answer 202 now and enter the background phase.
    ///
    /// Responses given later (typically from `wait_until` work) travel over
    /// the background port.
    pub fn defer(&self) -> EngineResult<PortTag> {
        let accepted = Response::builder()
            .status(StatusCode::ACCEPTED)
            .body(Bytes::new())?;
        self.respond_with(accepted)?;
        Ok(self.enter_background())
    }

    /// Keep the logical request alive until `work` completes.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tasks.push(tokio::spawn(work));
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.inner.tasks.has_pending()
    }

    /// Wait for every `wait_until` task, including ones registered meanwhile.
    pub async fn settled(&self) {
        loop {
            let handles = self.inner.tasks.take();
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Background task failed");
                }
            }
        }
    }

    /// A new event over a cloned request, sharing storages only.
    pub fn clone_event(&self) -> Self {
        let request = (self.inner.cloner)(&self.inner.request);
        self.derive(request, Arc::default(), Arc::default())
    }

    /// The same logical request pointed at another path (`/x?y=1`).
    pub fn retarget(&self, path_and_query: &str) -> EngineResult<Self> {
        let mut request = (self.inner.cloner)(&self.inner.request);
        let target = if self.inner.request.uri().scheme().is_some() {
            self.url()
                .join(path_and_query)
                .map_err(|e| EngineError::InvalidRequest(e.to_string()))?
                .to_string()
        } else {
            path_and_query.to_string()
        };
        *request.uri_mut() = target
            .parse::<Uri>()
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        Ok(self.derive(request, self.inner.channel.clone(), self.inner.tasks.clone()))
    }

    /// Take the one-shot message referenced by `?redirect-message=<id>`.
    pub fn redirect_message(&self) -> Option<Value> {
        let id = self
            .url()
            .query_pairs()
            .find(|(k, _)| k == REDIRECT_MESSAGE_PARAM)
            .map(|(_, v)| v.into_owned())?;
        self.session().delete(&redirect_message_key(&id))
    }

    /// Hand the primary response to the dispatcher.
    ///
    /// With `wait_until` work still running the port opens here, under the
    /// same lock, so a late `respond_with` becomes a follow-up. Otherwise
    /// later assignments fail until the background phase begins.
    pub fn take_primary(&self) -> Option<EngineResponse> {
        let mut state = self.inner.channel.lock();
        state.finalized = true;
        if state.port.is_none() && self.inner.tasks.has_pending() {
            state.port = Some(Arc::new(self.inner.ports.open()));
        }
        state.primary.take()
    }

    /// Open the background port if needed and return its tag.
    pub fn enter_background(&self) -> PortTag {
        let mut state = self.inner.channel.lock();
        if let Some(port) = &state.port {
            return port.tag().clone();
        }
        let port = Arc::new(self.inner.ports.open());
        let tag = port.tag().clone();
        state.port = Some(port);
        tag
    }

    pub fn background_port(&self) -> Option<Arc<BackgroundPort>> {
        self.inner.channel.lock().port.clone()
    }

    pub fn in_background(&self) -> bool {
        self.inner.channel.lock().port.is_some()
    }

    /// Release this event's handle on the port; the caller sees end-of-stream
    /// once every holder is gone.
    pub fn close_port(&self) {
        self.inner.channel.lock().port = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::get;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ok(body: &'static str) -> EngineResponse {
        Response::new(Bytes::from_static(body.as_bytes()))
    }

    #[tokio::test]
    async fn test_single_response_invariant() {
        let event = HttpEvent::standalone(get("http://x.test/").unwrap());
        event.respond_with(ok("first")).unwrap();
        let err = event.respond_with(ok("second")).unwrap_err();
        assert!(matches!(err, EngineError::FinalResponseConflict));

        assert_eq!(event.take_primary().unwrap().body(), "first");
        assert!(matches!(
            event.respond_with(ok("late")),
            Err(EngineError::FinalResponseConflict)
        ));
    }

    #[tokio::test]
    async fn test_background_phase_routes_to_port() {
        let event = HttpEvent::standalone(get("http://x.test/").unwrap());
        let tag = event.defer().unwrap();
        assert_eq!(event.take_primary().unwrap().status(), StatusCode::ACCEPTED);

        let mut receiver = event.ports().claim(tag.id()).unwrap();
        event.respond_with(ok("done")).unwrap();
        event.respond_with(ok("again")).unwrap();
        event.close_port();

        assert_eq!(receiver.recv().await.unwrap().body, "done");
        assert_eq!(receiver.recv().await.unwrap().body, "again");
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_pending_work_opens_port_when_primary_taken() {
        let event = HttpEvent::standalone(get("http://x.test/").unwrap());
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let worker = event.clone();
        event.wait_until(async move {
            let _ = gate.await;
            worker.respond_with(ok("late")).unwrap();
        });

        assert!(event.take_primary().is_none());
        assert!(event.in_background());
        let tag = event.enter_background();
        let mut receiver = event.ports().claim(tag.id()).unwrap();

        release.send(()).unwrap();
        event.settled().await;
        event.close_port();
        assert_eq!(receiver.recv().await.unwrap().body, "late");
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_settled_waits_for_nested_tasks() {
        let event = HttpEvent::standalone(get("http://x.test/").unwrap());
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let inner = event.clone();
        event.wait_until(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            inner.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                flag.store(true, Ordering::SeqCst);
            });
        });

        event.settled().await;
        assert!(done.load(Ordering::SeqCst));
        assert!(!event.has_pending_tasks());
    }

    #[tokio::test]
    async fn test_clone_shares_storages_not_channel() {
        let event = HttpEvent::standalone(get("http://x.test/a").unwrap());
        event.respond_with(ok("primary")).unwrap();
        event.cookies().set("k", "v");

        let clone = event.clone_event();
        assert_eq!(clone.cookies().get("k"), Some(Value::from("v")));
        clone.respond_with(ok("clone")).unwrap();

        let moved = event.retarget("/b?x=1").unwrap();
        assert_eq!(moved.url().as_str(), "http://x.test/b?x=1");
        assert!(matches!(
            moved.respond_with(ok("retargeted")),
            Err(EngineError::FinalResponseConflict)
        ));
    }

    #[tokio::test]
    async fn test_redirect_message_is_taken_once() {
        let event = HttpEvent::standalone(get("http://x.test/login?redirect-message=abc").unwrap());
        event.session().set(redirect_message_key("abc"), "Please sign in");
        assert_eq!(event.redirect_message(), Some(Value::from("Please sign in")));
        assert_eq!(event.redirect_message(), None);
    }
}
