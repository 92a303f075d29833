//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! HttpEvent
//!     → retry.rs (Retry-After loop, abortable)
//!     → dispatcher.rs (middleware chain → router → normalize → commit)
//!     → middleware.rs (onion composition, innermost layer routes by method)
//!     → EngineResponse (+ X-Background-Messaging when work continues)
//! ```

pub mod dispatcher;
pub mod middleware;
pub mod retry;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use middleware::{middleware_fn, Middleware, MiddlewareNext, RouteHandle};
pub use retry::{dispatch_with_retry, AbortController, AbortSignal, RetryOutcome, RetryPolicy, Sleeper, TokioSleeper};
