//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::caching::Strategy;

/// Root configuration for the event engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Session cookie and store settings.
    pub session: SessionConfig,

    /// Fetch strategy lists and cache naming.
    pub caching: CacheConfig,

    /// Background messaging settings.
    pub messaging: MessagingConfig,

    /// Retry-After handling.
    pub retry: RetryConfig,

    /// Upstream origin for the reverse-proxy fallthrough.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for dispatch) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session id cookie.
    pub cookie_name: String,

    /// HMAC key for signing session ids. Unsigned random ids when absent.
    pub secret: Option<String>,

    /// Idle lifetime of a session record in seconds.
    pub ttl_secs: u64,

    /// How often idle sessions are swept, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "__sessid".to_string(),
            secret: None,
            ttl_secs: 24 * 3600,
            sweep_interval_secs: 60,
        }
    }
}

/// Caching strategy configuration.
///
/// Pattern lists are consulted in the order cache-only, network-only,
/// cache-first, network-first; the first list with a match wins.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Logical cache name; JSON responses go to `<cache_name>_json`.
    pub cache_name: String,

    /// Strategy applied when no pattern list matches.
    pub default_strategy: Strategy,

    pub cache_only: Vec<String>,
    pub network_only: Vec<String>,
    pub cache_first: Vec<String>,
    pub network_first: Vec<String>,

    /// Entries kept per physical cache before the oldest is evicted.
    pub max_entries: usize,

    /// Cached responses older than this are treated as misses.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_name: "webflo_v1".to_string(),
            default_strategy: Strategy::NetworkFirst,
            cache_only: Vec::new(),
            network_only: Vec::new(),
            cache_first: Vec::new(),
            network_first: Vec::new(),
            max_entries: 1024,
            ttl_secs: 3600,
        }
    }
}

/// Transport used for background ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// In-process channel (`ch:` tag).
    Channel,
    /// WebSocket stream served by the server adapter (`ws:` tag).
    Socket,
}

/// Background messaging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Transport advertised in `X-Background-Messaging`. Remote callers can
    /// only attach to `socket` ports.
    pub transport: TransportKind,

    /// Unclaimed or idle ports expire after this many seconds.
    pub idle_timeout_secs: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Socket,
            idle_timeout_secs: 30,
        }
    }
}

/// Retry-After configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Honor `Retry-After` on outgoing responses.
    pub enabled: bool,

    /// Maximum number of dispatch attempts (including the first).
    pub max_attempts: u32,

    /// Upper bound for a single Retry-After wait in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            max_delay_secs: 30,
        }
    }
}

/// Upstream configuration for the reverse-proxy fallthrough.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Origin that unrouted requests are forwarded to (e.g. "http://127.0.0.1:3000").
    pub origin: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the pretty format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}
