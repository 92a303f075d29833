//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop sweepers → Exit
//! ```
//!
//! # Design Decisions
//! - One broadcast channel fans shutdown out to the server and every sweeper
//! - Background tasks subscribe before they are spawned

pub mod shutdown;

pub use shutdown::Shutdown;
