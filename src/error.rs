//! Engine error taxonomy.
//!
//! # Design Decisions
//! - Routing misses and cache-only misses are NOT errors; they surface as
//!   `Outcome::Undefined` / `None` and become 404s at the dispatcher.
//! - Configuration mistakes (`RedirectTraversal`, `StorageHandlerMissing`)
//!   are fatal and escape the dispatcher instead of becoming a 500.
//! - Everything else is converted into a 500 whose body is the message.

use thiserror::Error;

/// Errors raised while dispatching an `HttpEvent`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A `next()` redirect resolved above the routing root.
    #[error("Routing beyond the root: {target} from {from}")]
    RedirectTraversal { from: String, target: String },

    /// A required storage attribute has no registered fallback.
    #[error("No handler defined for required attribute \"{0}\"")]
    StorageHandlerMissing(String),

    /// The primary response was assigned twice outside the background phase.
    #[error("Final response already set")]
    FinalResponseConflict,

    /// A route handler failed.
    #[error("{0}")]
    Handler(String),

    /// A remote fetch failed (network error, bad upstream).
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The inbound request could not be turned into an event.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The render collaborator failed.
    #[error("Render failed: {0}")]
    Render(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] axum::http::Error),
}

impl EngineError {
    /// Shorthand for handler failures.
    pub fn handler(message: impl Into<String>) -> Self {
        EngineError::Handler(message.into())
    }

    /// Fatal errors indicate a route/handler configuration bug and are never
    /// converted into a response.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::RedirectTraversal { .. } | EngineError::StorageHandlerMissing(_)
        )
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err = EngineError::RedirectTraversal {
            from: "/a".into(),
            target: "../../x".into(),
        };
        assert!(err.is_fatal());
        assert!(EngineError::StorageHandlerMissing("id".into()).is_fatal());
        assert!(!EngineError::handler("boom").is_fatal());
        assert!(!EngineError::FinalResponseConflict.is_fatal());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(EngineError::handler("boom").to_string(), "boom");
        let err = EngineError::StorageHandlerMissing("id".into());
        assert!(err.to_string().contains("\"id\""));
    }
}
