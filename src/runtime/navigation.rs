//! Client-side navigation controller.
//!
//! # Responsibilities
//! - Abort the in-flight navigation when a new one starts
//! - Ask the dispatcher to hand cross-SPA redirects back (`X-Redirect-Policy`)
//! - Follow same-origin redirects locally, up to a bound
//! - Attach to the background port announced by a response
//!
//! # Design Decisions
//! - Follow-up messages are classified exactly like primary responses
//! - Interactions (confirm/prompt) surface to the caller, who replies

use std::sync::Mutex;

use axum::body::Bytes;
use axum::http::{header, HeaderValue, Request, StatusCode};
use url::Url;

use crate::dispatch::{AbortController, AbortSignal, RetryOutcome};
use crate::error::{EngineError, EngineResult};
use crate::http::response::{X_REDIRECT_CODE, X_REDIRECT_POLICY};
use crate::http::{EngineRequest, EngineResponse, EventDetail, NavigationType};
use crate::messaging::{BackgroundMessage, BackgroundReceiver, MessageKind, PortTag};
use crate::runtime::Runtime;

const DEFAULT_MAX_REDIRECTS: usize = 10;

/// What the caller should do after a navigation.
#[derive(Debug)]
pub enum NavigationOutcome {
    /// Render this response.
    Render(EngineResponse),
    /// Leave the app: hard navigation to `location`.
    Redirect { location: Url, status: u16 },
    /// Superseded by a newer navigation.
    Aborted,
}

/// A message from the background port.
#[derive(Debug)]
pub enum FollowUp {
    Outcome(NavigationOutcome),
    /// Confirm or prompt; answer with `FollowUps::reply`.
    Interaction { kind: MessageKind, message: String },
}

/// Receiver of follow-up responses for one navigation.
#[derive(Debug)]
pub struct FollowUps {
    base: Url,
    receiver: BackgroundReceiver,
}

impl FollowUps {
    pub fn id(&self) -> &str {
        self.receiver.id()
    }

    /// Next follow-up; `None` once the port closed.
    pub async fn next(&mut self) -> Option<EngineResult<FollowUp>> {
        let message = self.receiver.recv().await?;
        Some(self.classify(message))
    }

    fn classify(&self, message: BackgroundMessage) -> EngineResult<FollowUp> {
        if message.is_interaction() {
            return Ok(FollowUp::Interaction {
                kind: message.kind,
                message: message.body,
            });
        }
        let response = message.into_response()?;
        Ok(FollowUp::Outcome(match redirect_target(&self.base, &response) {
            Some((location, status)) => NavigationOutcome::Redirect { location, status },
            None => NavigationOutcome::Render(response),
        }))
    }

    pub fn reply(&self, value: serde_json::Value) -> bool {
        self.receiver.reply(value)
    }
}

/// Location and effective status of a redirect response.
fn redirect_target(base: &Url, response: &EngineResponse) -> Option<(Url, u16)> {
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|l| base.join(l).ok())?;
    let manual = response
        .headers()
        .get(X_REDIRECT_CODE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u16>().ok());
    match manual {
        Some(code) => Some((location, code)),
        None if response.status().is_redirection() => Some((location, response.status().as_u16())),
        None => None,
    }
}

pub struct Navigator {
    runtime: Runtime,
    current: Mutex<Option<AbortController>>,
    policy: HeaderValue,
    max_redirects: usize,
}

impl Navigator {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            current: Mutex::new(None),
            policy: HeaderValue::from_static("manual-when-cross-spa"),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Abort whatever is in flight and install a new controller.
    fn begin(&self) -> AbortSignal {
        let controller = AbortController::new();
        let signal = controller.signal();
        let previous = self
            .current
            .lock()
            .expect("navigation mutex poisoned")
            .replace(controller);
        if let Some(previous) = previous {
            if !previous.is_aborted() {
                tracing::debug!("Aborting superseded navigation");
            }
            previous.abort();
        }
        signal
    }

    fn request_for(&self, url: &Url) -> EngineResult<EngineRequest> {
        Ok(Request::get(url.as_str())
            .header(header::ACCEPT, "application/json")
            .header(X_REDIRECT_POLICY, self.policy.clone())
            .body(Bytes::new())?)
    }

    /// Navigate to `url`, following in-app redirects.
    pub async fn navigate(&self, url: &str, navigation_type: NavigationType) -> EngineResult<NavigationOutcome> {
        let signal = self.begin();
        let mut target = Url::parse(url).map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        let mut detail = EventDetail::user(navigation_type);
        detail.navigation_origin = Some(target.origin().ascii_serialization());

        for hop in 0..=self.max_redirects {
            detail.destination_origin = Some(target.origin().ascii_serialization());
            let request = self.request_for(&target)?;
            let response = match self.runtime.handle(request, detail.clone(), &signal).await? {
                RetryOutcome::Response(response) => response,
                RetryOutcome::Aborted => return Ok(NavigationOutcome::Aborted),
            };

            let Some((location, status)) = redirect_target(&target, &response) else {
                return Ok(NavigationOutcome::Render(response));
            };
            let manual = response.headers().contains_key(X_REDIRECT_CODE);
            if manual || location.origin() != target.origin() {
                tracing::debug!(%location, status, "Redirect leaves the app");
                return Ok(NavigationOutcome::Redirect { location, status });
            }
            tracing::debug!(from = %target, to = %location, hop, "Following in-app redirect");
            target = location;
            detail = EventDetail {
                navigation_type: NavigationType::Redirect,
                user_initiated: false,
                ..detail
            };
        }

        tracing::warn!(url = %target, max = self.max_redirects, "Too many redirects");
        Err(EngineError::handler(format!("too many redirects at {}", target)))
    }

    /// Attach to the in-process port announced by `response`, if any.
    pub fn follow_ups(&self, base: &Url, response: &EngineResponse) -> Option<FollowUps> {
        match PortTag::from_headers(response.headers())? {
            PortTag::Channel(id) => {
                let receiver = self.runtime.ports().claim(&id)?;
                Some(FollowUps {
                    base: base.clone(),
                    receiver,
                })
            }
            PortTag::Socket(id) => {
                tracing::debug!(port_id = %id, "Socket ports are served by the server adapter");
                None
            }
        }
    }

    /// Abort the current navigation without starting another.
    pub fn abort(&self) {
        if let Some(controller) = self.current.lock().expect("navigation mutex poisoned").take() {
            controller.abort();
        }
    }
}

/// Whether the response is a plain success the caller can render as-is.
pub fn is_renderable(response: &EngineResponse) -> bool {
    response.status() == StatusCode::OK || response.status() == StatusCode::ACCEPTED
}
