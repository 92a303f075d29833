//! User storage: a bag nested in the session under `"user"`.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::http::HttpEvent;
use crate::messaging::{BackgroundMessage, MessageKind};
use crate::storage::diff::{Registry, StorageDiff, Store};
use crate::storage::require::Fallbacks;
use crate::storage::session::SessionStorage;

pub const USER_KEY: &str = "user";

/// Reads and writes the `"user"` entry of the parent session.
///
/// Lock order is always user → session.
struct NestedRegistry {
    parent: Arc<Mutex<SessionStorage>>,
}

impl Registry for NestedRegistry {
    fn load(&self, key: Option<&str>) -> Store {
        let mut session = self.parent.lock().expect("session storage mutex poisoned");
        match session.get(key.unwrap_or(USER_KEY)) {
            Some(Value::Object(map)) => map,
            _ => Store::new(),
        }
    }

    fn save(&self, key: Option<&str>, store: &Store) {
        let mut session = self.parent.lock().expect("session storage mutex poisoned");
        let key = key.unwrap_or(USER_KEY);
        if store.is_empty() {
            session.delete(key);
        } else {
            session.set(key, Value::Object(store.clone()));
        }
    }
}

pub struct UserStorage {
    diff: StorageDiff,
}

impl UserStorage {
    pub fn new(session: Arc<Mutex<SessionStorage>>, fallbacks: Fallbacks) -> Self {
        let registry = Arc::new(NestedRegistry { parent: session });
        Self {
            diff: StorageDiff::new(registry, Some(USER_KEY)).with_fallbacks(fallbacks),
        }
    }

    pub fn is_signed_in(&mut self) -> bool {
        self.diff.has("id")
    }

    /// Record a signed-in identity plus any profile fields.
    pub fn sign_in(&mut self, id: impl Into<Value>, profile: Store) {
        for (key, value) in profile {
            self.diff.set(key, value);
        }
        self.diff.set("id", id);
    }

    pub fn sign_out(&mut self) {
        self.diff.clear();
    }

    /// Ask the caller a yes/no question over the event's background port.
    ///
    /// `None` when no port is open or the caller never answered.
    pub async fn confirm(event: &HttpEvent, message: &str) -> Option<bool> {
        Self::interact(event, MessageKind::Confirm, message)
            .await
            .and_then(|reply| reply.as_bool())
    }

    /// Ask the caller for a value over the event's background port.
    pub async fn prompt(event: &HttpEvent, message: &str) -> Option<Value> {
        Self::interact(event, MessageKind::Prompt, message).await
    }

    async fn interact(event: &HttpEvent, kind: MessageKind, message: &str) -> Option<Value> {
        let port = event.background_port()?;
        let timeout = event.ports().idle_timeout();
        port.request(BackgroundMessage::interaction(kind, message), timeout)
            .await
    }

    /// Persist into the parent session. The session must commit afterwards.
    pub fn commit(&mut self) -> bool {
        self.diff.commit(false)
    }
}

impl Deref for UserStorage {
    type Target = StorageDiff;

    fn deref(&self) -> &StorageDiff {
        &self.diff
    }
}

impl DerefMut for UserStorage {
    fn deref_mut(&mut self) -> &mut StorageDiff {
        &mut self.diff
    }
}
