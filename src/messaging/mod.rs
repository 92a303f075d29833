//! Background messaging subsystem.
//!
//! # Data Flow
//! ```text
//! Handler defers / keeps working under waitUntil
//!     → port.rs (PortRegistry::open → BackgroundPort)
//!     → header.rs (X-Background-Messaging: ch:<id> | ws:<id>)
//!     → primary response leaves with the header
//!
//! Caller:
//!     → header.rs (parse tag)
//!     → PortRegistry::claim (ch:) or GET /.background/<id> (ws:)
//!     → BackgroundReceiver yields follow-up responses/redirects
//! ```
//!
//! # Design Decisions
//! - One port per logical request, opened lazily
//! - Messages sent before the caller attaches are buffered
//! - Unclaimed ports expire after an idle window (swept periodically)
//! - The port closes when its sender is dropped after all waitUntil work settles

pub mod header;
pub mod port;

pub use header::{PortTag, X_BACKGROUND_MESSAGING};
pub use port::{BackgroundMessage, BackgroundPort, BackgroundReceiver, MessageKind, PortRegistry};
