//! Request handling and transformation.
//!
//! # Responsibilities
//! - Clone buffered requests (retries, retargeting, proxying)
//! - Derive the absolute URL of a request
//! - Carry navigation metadata alongside the request
//!
//! # Design Decisions
//! - Bodies are `Bytes`, so cloning is a refcount bump
//! - Extensions are not cloned; they belong to the transport

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{header, Request, Uri};
use url::Url;

use crate::http::EngineRequest;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Injectable request clone callback used by `HttpEvent::clone_event`.
pub type RequestCloner = Arc<dyn Fn(&EngineRequest) -> EngineRequest + Send + Sync>;

/// Copy method, URI, version, headers and body into a new request.
pub fn clone_request(request: &EngineRequest) -> EngineRequest {
    let mut clone = Request::new(request.body().clone());
    *clone.method_mut() = request.method().clone();
    *clone.uri_mut() = request.uri().clone();
    *clone.version_mut() = request.version();
    *clone.headers_mut() = request.headers().clone();
    clone
}

pub fn default_cloner() -> RequestCloner {
    Arc::new(clone_request)
}

/// Resolve the absolute URL of a request.
///
/// Origin-form URIs are completed from the `Host` header, falling back to
/// `http://localhost`.
pub fn request_url(request: &EngineRequest) -> Url {
    let uri = request.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        if let Ok(url) = Url::parse(&uri.to_string()) {
            return url;
        }
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    Url::parse(&format!("http://{}{}", host, path))
        .or_else(|_| Url::parse(&format!("http://localhost{}", path)))
        .unwrap_or_else(|_| Url::parse("http://localhost/").expect("static URL parses"))
}

/// Convert a URL back into a request URI.
pub fn url_to_uri(url: &Url) -> Option<Uri> {
    url.as_str().parse().ok()
}

/// Build a GET request for an absolute URL.
pub fn get(url: &str) -> Result<EngineRequest, axum::http::Error> {
    Request::get(url).body(Bytes::new())
}

/// How a navigation was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavigationType {
    #[default]
    Push,
    Replace,
    Reload,
    Traverse,
    /// Follow-up navigation produced by an in-app redirect.
    Redirect,
}

/// Navigation metadata attached to an event.
#[derive(Debug, Clone, Default)]
pub struct EventDetail {
    pub navigation_type: NavigationType,
    /// Origin of the document that started the navigation.
    pub navigation_origin: Option<String>,
    /// Origin the navigation is heading to.
    pub destination_origin: Option<String>,
    pub user_initiated: bool,
}

impl EventDetail {
    pub fn user(navigation_type: NavigationType) -> Self {
        Self {
            navigation_type,
            user_initiated: true,
            ..Default::default()
        }
    }
}
