//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempts > 0, timeouts > 0)
//! - Reject malformed strategy patterns and upstream origins
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>

use crate::config::schema::{EngineConfig, TransportKind};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check an `EngineConfig` for semantic errors.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.session.cookie_name.trim().is_empty() {
        errors.push(ValidationError::new("session.cookie_name", "must not be empty"));
    }
    if matches!(&config.session.secret, Some(secret) if secret.is_empty()) {
        errors.push(ValidationError::new("session.secret", "must not be an empty string"));
    }
    if config.session.ttl_secs == 0 {
        errors.push(ValidationError::new("session.ttl_secs", "must be greater than 0"));
    }
    if config.caching.cache_name.trim().is_empty() {
        errors.push(ValidationError::new("caching.cache_name", "must not be empty"));
    }
    if config.caching.max_entries == 0 {
        errors.push(ValidationError::new("caching.max_entries", "must be greater than 0"));
    }
    if config.caching.ttl_secs == 0 {
        errors.push(ValidationError::new("caching.ttl_secs", "must be greater than 0"));
    }
    if config.retry.max_attempts == 0 {
        errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
    }
    if config.messaging.transport == TransportKind::Channel {
        errors.push(ValidationError::new(
            "messaging.transport",
            "\"channel\" ports cannot be claimed over HTTP; use \"socket\"",
        ));
    }
    if config.messaging.idle_timeout_secs == 0 {
        errors.push(ValidationError::new("messaging.idle_timeout_secs", "must be greater than 0"));
    }

    let lists = [
        ("caching.cache_only", &config.caching.cache_only),
        ("caching.network_only", &config.caching.network_only),
        ("caching.cache_first", &config.caching.cache_first),
        ("caching.network_first", &config.caching.network_first),
    ];
    for (field, patterns) in lists {
        for pattern in patterns {
            if !(pattern.starts_with('/') || pattern.contains("://") || pattern == "*") {
                errors.push(ValidationError::new(
                    field,
                    format!("pattern {:?} must be a path, an absolute URL or \"*\"", pattern),
                ));
            }
        }
    }

    if let Some(origin) = &config.upstream.origin {
        match url::Url::parse(origin) {
            Ok(url) if url.has_host() => {}
            _ => errors.push(ValidationError::new(
                "upstream.origin",
                format!("{:?} is not an absolute http(s) origin", origin),
            )),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = EngineConfig::default();
        config.retry.max_attempts = 0;
        config.caching.cache_name = String::new();
        config.caching.cache_first.push("assets/*".into());
        config.upstream.origin = Some("not a url".into());
        config.messaging.transport = TransportKind::Channel;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "caching.cache_name",
                "retry.max_attempts",
                "messaging.transport",
                "caching.cache_first",
                "upstream.origin"
            ]
        );
    }
}
