//! The require-with-fallback protocol shared by every storage.
//!
//! # Responsibilities
//! - Keep an ordered list of fallback resolvers per attribute
//! - Resolve missing attributes by walking those resolvers in order
//! - Short-circuit with a redirect response (plus optional one-shot message)
//!
//! # Data Flow
//! ```text
//! handler → require(event, scope, ["id"])
//!     → present? collect
//!     → missing? resolvers in order:
//!         Callback → Value (stored) | Respond (short-circuit) | Skip
//!         Redirect → 302 <url>?success-redirect=<original>[&redirect-message=<id>]
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use rand::Rng;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::http::response::redirect;
use crate::http::{EngineResponse, HttpEvent};
use crate::storage::diff::{StorageDiff, Store};

pub const SUCCESS_REDIRECT_PARAM: &str = "success-redirect";
pub const REDIRECT_MESSAGE_PARAM: &str = "redirect-message";

/// Session key under which a redirect message is stashed.
pub fn redirect_message_key(id: &str) -> String {
    format!("{}:{}", REDIRECT_MESSAGE_PARAM, id)
}

/// What a callback resolver produced.
pub enum Resolution {
    /// Adopt and store this value.
    Value(Value),
    /// Stop the dispatch with this response.
    Respond(EngineResponse),
    /// Try the next resolver.
    Skip,
}

pub type FallbackFn =
    Arc<dyn Fn(HttpEvent, String) -> BoxFuture<'static, EngineResult<Resolution>> + Send + Sync>;

#[derive(Clone)]
pub enum Fallback {
    Callback(FallbackFn),
    Redirect { url: String, message: Option<Value> },
}

impl Fallback {
    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: Fn(HttpEvent, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<Resolution>> + Send + 'static,
    {
        Fallback::Callback(Arc::new(move |event, attr| Box::pin(f(event, attr))))
    }

    pub fn redirect(url: impl Into<String>) -> Self {
        Fallback::Redirect {
            url: url.into(),
            message: None,
        }
    }

    /// Attach a one-shot message to a redirect resolver.
    pub fn with_message(self, message: impl Into<Value>) -> Self {
        match self {
            Fallback::Redirect { url, .. } => Fallback::Redirect {
                url,
                message: Some(message.into()),
            },
            other => other,
        }
    }
}

/// Attribute → ordered resolvers.
#[derive(Clone, Default)]
pub struct Fallbacks {
    handlers: HashMap<String, Vec<Fallback>>,
}

impl Fallbacks {
    pub fn define(&mut self, attr: impl Into<String>, fallback: Fallback) {
        self.handlers.entry(attr.into()).or_default().push(fallback);
    }

    pub fn get(&self, attr: &str) -> Vec<Fallback> {
        self.handlers.get(attr).cloned().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Which of the event's storages to resolve against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Cookies,
    Session,
    User,
}

#[derive(Debug)]
pub enum Required {
    /// Every attribute is present.
    Resolved(Store),
    /// A resolver asked to end the dispatch with this response.
    Respond(EngineResponse),
    /// Every resolver for this attribute skipped.
    Unresolved(String),
}

fn with_storage<R>(event: &HttpEvent, scope: Scope, f: impl FnOnce(&mut StorageDiff) -> R) -> R {
    match scope {
        Scope::Cookies => f(&mut event.cookies()),
        Scope::Session => f(&mut event.session()),
        Scope::User => f(&mut event.user()),
    }
}

/// Resolve `attrs` against a storage, consulting fallbacks for missing ones.
///
/// Fails with `StorageHandlerMissing` when a missing attribute has no resolver.
pub async fn require(
    event: &HttpEvent,
    scope: Scope,
    attrs: &[&str],
    no_nulls: bool,
) -> EngineResult<Required> {
    let mut resolved = Store::new();

    for &attr in attrs {
        let (current, fallbacks) =
            with_storage(event, scope, |s| (s.get(attr), s.fallbacks().get(attr)));
        match current {
            Some(value) if !(no_nulls && value.is_null()) => {
                resolved.insert(attr.to_string(), value);
                continue;
            }
            _ => {}
        }

        if fallbacks.is_empty() {
            return Err(EngineError::StorageHandlerMissing(attr.to_string()));
        }

        let mut value = None;
        for fallback in fallbacks {
            match fallback {
                Fallback::Callback(f) => match f(event.clone(), attr.to_string()).await? {
                    Resolution::Value(v) => {
                        value = Some(v);
                        break;
                    }
                    Resolution::Respond(response) => return Ok(Required::Respond(response)),
                    Resolution::Skip => continue,
                },
                Fallback::Redirect { url, message } => {
                    return redirect_for(event, &url, message).map(Required::Respond);
                }
            }
        }

        match value {
            Some(v) => {
                with_storage(event, scope, |s| s.set(attr, v.clone()));
                resolved.insert(attr.to_string(), v);
            }
            None => {
                tracing::debug!(attr, ?scope, "All resolvers skipped");
                return Ok(Required::Unresolved(attr.to_string()));
            }
        }
    }

    Ok(Required::Resolved(resolved))
}

/// 302 to `target` carrying a back-link to the current request.
fn redirect_for(event: &HttpEvent, target: &str, message: Option<Value>) -> EngineResult<EngineResponse> {
    let current = event.url();
    let mut location = current
        .join(target)
        .map_err(|e| EngineError::InvalidRequest(format!("redirect target {:?}: {}", target, e)))?;

    let back = match current.query() {
        Some(query) => format!("{}?{}", current.path(), query),
        None => current.path().to_string(),
    };
    {
        let mut query = location.query_pairs_mut();
        query.append_pair(SUCCESS_REDIRECT_PARAM, &back);
        if let Some(message) = message {
            let id = format!("{:016x}", rand::thread_rng().gen::<u64>());
            event.session().set(redirect_message_key(&id), message);
            query.append_pair(REDIRECT_MESSAGE_PARAM, &id);
        }
    }

    // Same-origin targets keep a relative Location.
    let location = if location.origin() == current.origin() {
        match location.query() {
            Some(query) => format!("{}?{}", location.path(), query),
            None => location.path().to_string(),
        }
    } else {
        location.to_string()
    };
    tracing::debug!(%location, "Require fallback redirect");
    redirect(&location, StatusCode::FOUND)
}
