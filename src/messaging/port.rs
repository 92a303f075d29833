//! Background ports and their registry.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{header, HeaderName, HeaderValue, Response, StatusCode};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{MessagingConfig, TransportKind};
use crate::error::{EngineError, EngineResult};
use crate::http::response::X_REDIRECT_CODE;
use crate::http::EngineResponse;
use crate::messaging::header::PortTag;
use crate::observability::metrics;

/// What a follow-up message asks the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Render like a primary response.
    Response,
    /// Navigate like a primary redirect.
    Redirect,
    /// Ask the user a yes/no question; reply is a JSON bool.
    Confirm,
    /// Ask the user for a value; reply is any JSON value.
    Prompt,
}

/// A follow-up response shaped like the primary one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundMessage {
    pub kind: MessageKind,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl BackgroundMessage {
    pub fn from_response(response: &EngineResponse) -> Self {
        let is_redirect = response.headers().contains_key(header::LOCATION)
            && (response.status().is_redirection()
                || response.headers().contains_key(X_REDIRECT_CODE));

        Self {
            kind: if is_redirect {
                MessageKind::Redirect
            } else {
                MessageKind::Response
            },
            status: response.status().as_u16(),
            headers: response
                .headers()
                .iter()
                .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
                .collect(),
            body: String::from_utf8_lossy(response.body()).into_owned(),
        }
    }

    pub fn interaction(kind: MessageKind, message: &str) -> Self {
        Self {
            kind,
            status: StatusCode::OK.as_u16(),
            headers: vec![("content-type".into(), "text/plain".into())],
            body: message.to_string(),
        }
    }

    pub fn is_interaction(&self) -> bool {
        matches!(self.kind, MessageKind::Confirm | MessageKind::Prompt)
    }

    /// Rebuild the response so the caller can feed it through its normal path.
    pub fn into_response(self) -> EngineResult<EngineResponse> {
        let mut response = Response::new(Bytes::from(self.body));
        *response.status_mut() = StatusCode::from_u16(self.status)
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
            response.headers_mut().append(name, value);
        }
        Ok(response)
    }
}

/// Sending half, held by the event's response channel.
pub struct BackgroundPort {
    tag: PortTag,
    outbound: mpsc::UnboundedSender<BackgroundMessage>,
    replies: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    touched: Arc<Mutex<Instant>>,
}

impl BackgroundPort {
    pub fn id(&self) -> &str {
        self.tag.id()
    }

    pub fn tag(&self) -> &PortTag {
        &self.tag
    }

    /// Push a message. Returns false once the receiver is gone.
    pub fn send(&self, message: BackgroundMessage) -> bool {
        *self.touched.lock().expect("port activity mutex poisoned") = Instant::now();
        let sent = self.outbound.send(message).is_ok();
        if !sent {
            tracing::debug!(port_id = %self.id(), "Background receiver gone, message dropped");
        }
        sent
    }

    /// Send an interaction and wait for the caller's reply.
    pub async fn request(&self, message: BackgroundMessage, timeout: Duration) -> Option<Value> {
        let mut replies = self.replies.lock().await;
        if !self.send(message) {
            return None;
        }
        match tokio::time::timeout(timeout, replies.recv()).await {
            Ok(reply) => reply,
            Err(_) => {
                tracing::warn!(port_id = %self.id(), "No reply to background interaction");
                None
            }
        }
    }
}

impl Drop for BackgroundPort {
    fn drop(&mut self) {
        metrics::record_background_port("closed");
        tracing::debug!(port_id = %self.id(), "Background port closed");
    }
}

/// Receiving half, claimed by the caller.
#[derive(Debug)]
pub struct BackgroundReceiver {
    id: String,
    inbound: mpsc::UnboundedReceiver<BackgroundMessage>,
    replies: mpsc::UnboundedSender<Value>,
}

impl BackgroundReceiver {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next follow-up; `None` once the port closed and the buffer drained.
    pub async fn recv(&mut self) -> Option<BackgroundMessage> {
        self.inbound.recv().await
    }

    /// Answer a `Confirm`/`Prompt` message.
    pub fn reply(&self, value: Value) -> bool {
        self.replies.send(value).is_ok()
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedReceiver<BackgroundMessage>,
        mpsc::UnboundedSender<Value>,
    ) {
        (self.inbound, self.replies)
    }
}

struct PortEntry {
    receiver: BackgroundReceiver,
    touched: Arc<Mutex<Instant>>,
}

struct RegistryInner {
    ports: DashMap<String, PortEntry>,
    transport: TransportKind,
    idle_timeout: Duration,
}

/// Registry of unclaimed ports, keyed by port id.
#[derive(Clone)]
pub struct PortRegistry {
    inner: Arc<RegistryInner>,
}

impl PortRegistry {
    pub fn new(transport: TransportKind, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                ports: DashMap::new(),
                transport,
                idle_timeout,
            }),
        }
    }

    pub fn from_config(config: &MessagingConfig) -> Self {
        Self::new(config.transport, Duration::from_secs(config.idle_timeout_secs))
    }

    pub fn transport(&self) -> TransportKind {
        self.inner.transport
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Open a port with a fresh random id.
    pub fn open(&self) -> BackgroundPort {
        let id = Uuid::new_v4().simple().to_string();
        let (outbound, inbound) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let touched = Arc::new(Mutex::new(Instant::now()));

        self.inner.ports.insert(
            id.clone(),
            PortEntry {
                receiver: BackgroundReceiver {
                    id: id.clone(),
                    inbound,
                    replies: reply_tx,
                },
                touched: touched.clone(),
            },
        );
        metrics::record_background_port("opened");
        tracing::debug!(port_id = %id, transport = ?self.inner.transport, "Background port opened");

        BackgroundPort {
            tag: PortTag::new(self.inner.transport, id),
            outbound,
            replies: tokio::sync::Mutex::new(reply_rx),
            touched,
        }
    }

    /// Take the receiving half. Each port can be claimed once.
    pub fn claim(&self, id: &str) -> Option<BackgroundReceiver> {
        let claimed = self.inner.ports.remove(id).map(|(_, entry)| entry.receiver);
        if claimed.is_some() {
            metrics::record_background_port("claimed");
        }
        claimed
    }

    /// Drop unclaimed ports idle for longer than the timeout.
    pub fn sweep(&self) -> usize {
        let idle_timeout = self.inner.idle_timeout;
        let before = self.inner.ports.len();
        self.inner.ports.retain(|_, entry| {
            entry
                .touched
                .lock()
                .expect("port activity mutex poisoned")
                .elapsed()
                < idle_timeout
        });
        let expired = before.saturating_sub(self.inner.ports.len());
        if expired > 0 {
            tracing::info!(expired, "Expired unclaimed background ports");
            for _ in 0..expired {
                metrics::record_background_port("expired");
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.inner.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.ports.is_empty()
    }
}
