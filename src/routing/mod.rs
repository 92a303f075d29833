//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Event URL path
//!     → path.rs (segments)
//!     → router.rs (walk root → leaf over tree.rs, exact before wildcard)
//!     → handler.rs (pick the first requested export at each depth)
//!     → handler(event, input, next)
//!         → next.run(input)          continue one depth deeper
//!         → next.run_at(input, "x")  jump sideways from the common prefix
//!     → Nothing exported anywhere: default handler or Outcome::Undefined
//! ```
//!
//! # Design Decisions
//! - Trees are built once and shared immutably behind an `Arc`
//! - Exports are looked up by enum, never by name
//! - Deterministic: same tree and path always reach the same handler

pub mod handler;
pub mod path;
pub mod router;
pub mod tree;

pub use handler::{HandlerFn, HandlerFuture, HandlerKind, HandlerModule, Outcome};
pub use router::{default_handler, DefaultHandler, Next, PathRouter, RouteContext};
pub use tree::RouteTree;
