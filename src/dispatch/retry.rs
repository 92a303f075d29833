//! Retry-After re-dispatch.
//!
//! # Design Decisions
//! - A bounded loop, not recursion: at most `max_attempts` dispatches
//! - Sleeping goes through an injected `Sleeper` so tests control time
//! - An `AbortSignal` stops the loop once a newer navigation supersedes it,
//!   including a dispatch that is still running
//! - Every attempt dispatches a fresh clone of the original event

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderValue};
use tokio::sync::watch;

use crate::config::RetryConfig;
use crate::dispatch::Dispatcher;
use crate::error::EngineResult;
use crate::http::response::retry_after;
use crate::http::{EngineResponse, HttpEvent};
use crate::observability::metrics;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Owner side of a cancellation token.
pub struct AbortController {
    tx: watch::Sender<bool>,
}

/// Observer side; cheap to clone.
#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        AbortController::new().signal()
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once aborted. Pends forever if the controller is dropped
    /// without aborting.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_delay: Duration,
    pub sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: if config.enabled { config.max_attempts.max(1) } else { 1 },
            max_delay: Duration::from_secs(config.max_delay_secs),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Never re-dispatch.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            max_delay: Duration::ZERO,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

/// Result of a retried dispatch.
#[derive(Debug)]
pub enum RetryOutcome {
    Response(EngineResponse),
    /// The signal fired before a final response was produced.
    Aborted,
}

/// Dispatch `event`, re-dispatching a clone while the response asks for
/// `Retry-After` and attempts remain.
pub async fn dispatch_with_retry(
    dispatcher: &Dispatcher,
    event: &HttpEvent,
    policy: &RetryPolicy,
    signal: &AbortSignal,
) -> EngineResult<RetryOutcome> {
    let mut current = event.clone();
    let mut attempt = 1;
    // Storages commit on every attempt; keep cookies from discarded responses.
    let mut carried: Vec<HeaderValue> = Vec::new();
    loop {
        if signal.is_aborted() {
            return Ok(RetryOutcome::Aborted);
        }
        let mut waiter = signal.clone();
        let mut response = tokio::select! {
            result = dispatcher.dispatch(&current) => result?,
            _ = waiter.aborted() => {
                tracing::debug!(path = %current.url().path(), attempt, "Dispatch superseded");
                return Ok(RetryOutcome::Aborted);
            }
        };
        if signal.is_aborted() {
            return Ok(RetryOutcome::Aborted);
        }

        let delay = match retry_after(&response) {
            Some(delay) if attempt < policy.max_attempts => delay.min(policy.max_delay),
            _ => {
                for cookie in carried {
                    response.headers_mut().append(header::SET_COOKIE, cookie);
                }
                return Ok(RetryOutcome::Response(response));
            }
        };
        carried.extend(response.headers().get_all(header::SET_COOKIE).iter().cloned());

        tracing::info!(
            path = %current.url().path(),
            attempt,
            delay = ?delay,
            "Retry-After received, re-dispatching"
        );
        metrics::record_retry(attempt);

        let mut waiter = signal.clone();
        tokio::select! {
            _ = policy.sleeper.sleep(delay) => {}
            _ = waiter.aborted() => return Ok(RetryOutcome::Aborted),
        }
        current = event.clone_event();
        attempt += 1;
    }
}
