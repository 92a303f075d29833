//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → shared via Arc to runtimes
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps the caching selector atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only strategy lists hot-reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CacheConfig, EngineConfig, ListenerConfig, MessagingConfig, ObservabilityConfig,
    RetryConfig, SessionConfig, TransportKind,
};
