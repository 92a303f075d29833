//! Response construction, normalization and redirect policy.
//!
//! # Responsibilities
//! - Build canonical responses (JSON, HTML, redirects, 404, 500)
//! - Negotiate JSON vs HTML against the request's `Accept` header
//! - Apply `X-Redirect-Policy` so callers can handle redirects manually
//! - Read `Retry-After`
//!
//! # Design Decisions
//! - Plain values always normalize to JSON unless HTML was negotiated
//! - 500s carry the error message both as body and as reason phrase
//! - Manual redirects answer with the caller's `X-Redirect-Code` (default 200)
//!   and move the real status into the response's `X-Redirect-Code`

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Response, StatusCode};
use serde_json::Value;
use url::Url;

use crate::error::{EngineError, EngineResult};
use crate::http::{EngineResponse, HttpEvent};

pub const X_REDIRECT_CODE: &str = "x-redirect-code";
pub const X_REDIRECT_POLICY: &str = "x-redirect-policy";

/// Render collaborator: turns handler data into an HTML document.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, event: &HttpEvent, data: &Value) -> EngineResult<String>;
}

/// Decides whether two URLs belong to the same single-page-app root.
pub trait SpaRootPredicate: Send + Sync {
    fn same_spa(&self, from: &Url, to: &Url) -> bool;
}

impl<F> SpaRootPredicate for F
where
    F: Fn(&Url, &Url) -> bool + Send + Sync,
{
    fn same_spa(&self, from: &Url, to: &Url) -> bool {
        self(from, to)
    }
}

pub fn not_found() -> EngineResponse {
    let mut response = Response::new(Bytes::from_static(b"Not Found"));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

pub fn not_acceptable() -> EngineResponse {
    let mut response = Response::new(Bytes::from_static(b"Not Acceptable"));
    *response.status_mut() = StatusCode::NOT_ACCEPTABLE;
    response
}

pub fn json_response(status: StatusCode, value: &Value) -> EngineResult<EngineResponse> {
    let body = serde_json::to_vec(value)?;
    Ok(Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Bytes::from(body))?)
}

pub fn html_response(html: String) -> EngineResult<EngineResponse> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Bytes::from(html))?)
}

pub fn redirect(location: &str, status: StatusCode) -> EngineResult<EngineResponse> {
    Ok(Response::builder()
        .status(status)
        .header(header::LOCATION, location)
        .body(Bytes::new())?)
}

/// 500 with the error message as body and reason phrase.
pub fn error_response(error: &EngineError) -> EngineResponse {
    let message = error.to_string();
    let mut response = Response::new(Bytes::from(message.clone()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    match hyper::ext::ReasonPhrase::try_from(message.into_bytes()) {
        Ok(reason) => {
            response.extensions_mut().insert(reason);
        }
        Err(_) => tracing::debug!("Error message is not a valid reason phrase"),
    }
    response
}

/// Representation chosen for a plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated {
    Json,
    Html,
    NotAcceptable,
}

/// Highest `q` any range in `accept` gives `mime`.
fn quality(accept: &str, mime: &str) -> (f32, bool) {
    let (kind, _) = mime.split_once('/').unwrap_or((mime, ""));
    let mut best = 0.0f32;
    let mut explicit = false;
    for range in accept.split(',') {
        let mut parts = range.split(';');
        let media = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let q = parts
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0);
        let matches = media == mime || media == format!("{}/*", kind) || media == "*/*";
        if matches && q > best {
            best = q;
        }
        if media == mime && q > 0.0 {
            explicit = true;
        }
    }
    (best, explicit)
}

/// Pick JSON or HTML for a plain value.
pub fn negotiate(headers: &HeaderMap) -> Negotiated {
    let accept = match headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) {
        Some(accept) if !accept.trim().is_empty() => accept,
        _ => return Negotiated::Json,
    };
    let (json, json_explicit) = quality(accept, "application/json");
    let (html, html_explicit) = quality(accept, "text/html");
    if json <= 0.0 && html <= 0.0 {
        return Negotiated::NotAcceptable;
    }
    if html > json || (html == json && html_explicit && !json_explicit) {
        Negotiated::Html
    } else {
        Negotiated::Json
    }
}

/// Whether JSON is acceptable at all.
pub fn accepts_json(headers: &HeaderMap) -> bool {
    match headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) {
        Some(accept) if !accept.trim().is_empty() => quality(accept, "application/json").0 > 0.0,
        _ => true,
    }
}

/// Rewrite a redirect for callers that asked to handle it themselves.
pub fn apply_redirect_policy(
    request_headers: &HeaderMap,
    request_url: &Url,
    mut response: EngineResponse,
    spa: Option<&dyn SpaRootPredicate>,
) -> EngineResponse {
    let status = response.status();
    if !status.is_redirection() {
        return response;
    }
    let Some(policy) = request_headers
        .get(X_REDIRECT_POLICY)
        .and_then(|v| v.to_str().ok())
    else {
        return response;
    };
    let Some(target) = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|l| request_url.join(l).ok())
    else {
        return response;
    };

    let cross_origin = target.origin() != request_url.origin();
    let manual = match policy.trim() {
        "manual" => true,
        "manual-when-cross-origin" => cross_origin,
        "manual-when-cross-spa" => {
            cross_origin || spa.map_or(false, |p| !p.same_spa(request_url, &target))
        }
        other => {
            tracing::debug!(policy = other, "Unknown redirect policy");
            false
        }
    };
    if !manual {
        return response;
    }

    let code = request_headers
        .get(X_REDIRECT_CODE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u16>().ok())
        .and_then(|c| StatusCode::from_u16(c).ok())
        .unwrap_or(StatusCode::OK);
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(X_REDIRECT_CODE, HeaderValue::from(status.as_u16()));
    response
}

/// Seconds requested by a `Retry-After` header.
pub fn retry_after(response: &EngineResponse) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
