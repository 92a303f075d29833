//! HTTP event dispatch and storage commit engine.
//!
//! One route tree, three execution contexts: a server process, a client
//! navigation controller and an offline worker proxy.

pub mod caching;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod messaging;
pub mod observability;
pub mod routing;
pub mod runtime;
pub mod storage;

pub use config::schema::EngineConfig;
pub use dispatch::Dispatcher;
pub use error::{EngineError, EngineResult};
pub use http::{HttpEvent, HttpServer};
pub use lifecycle::Shutdown;
pub use runtime::{ExecutionContext, Runtime};
