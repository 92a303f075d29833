//! HTTP event subsystem.
//!
//! # Data Flow
//! ```text
//! Transport adapter (server.rs / navigator / worker)
//!     → request.rs (buffer body, clone helpers, navigation detail)
//!     → event.rs (HttpEvent: request + storages + response channel)
//!     → [dispatch: middleware → router → handler]
//!     → response.rs (normalize, negotiate, redirect policy)
//!     → storages commit into the response
//!     → Send to caller
//! ```

pub mod event;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

use axum::body::Bytes;
use axum::http::{Request, Response};

/// Requests are fully buffered so they can be cloned for retries and retargeting.
pub type EngineRequest = Request<Bytes>;

/// Responses are buffered so they can be cached, committed into and re-sent.
pub type EngineResponse = Response<Bytes>;

pub use event::{EventInit, HttpEvent};
pub use request::{clone_request, EventDetail, NavigationType, RequestCloner};
pub use response::{Renderer, SpaRootPredicate};
pub use server::HttpServer;
