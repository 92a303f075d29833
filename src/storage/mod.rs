//! Diff-tracked storages attached to every event.
//!
//! # Data Flow
//! ```text
//! Inbound headers
//!     → StorageContext::storages_for
//!         → CookieStorage (Cookie header)
//!         → SessionStorage (session store, keyed by __sessid)
//!         → UserStorage ("user" bag inside the session)
//!     → handlers mutate through HttpEvent accessors
//!     → dispatcher commits: cookies → user → session
//! ```

pub mod cookies;
pub mod diff;
pub mod require;
pub mod session;
pub mod user;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::HeaderMap;

use crate::config::SessionConfig;
use crate::storage::require::{Fallback, Fallbacks};

pub use cookies::{CookieOptions, CookieStorage};
pub use diff::{Change, Mutation, ObserverId, Registry, StorageDiff, Store};
pub use require::{require, Required, Resolution, Scope};
pub use session::{MemorySessionStore, SessionBinding, SessionIdSigner, SessionStorage, SessionStore};
pub use user::UserStorage;

pub type Shared<T> = Arc<Mutex<T>>;

/// The three storages of one event.
#[derive(Clone)]
pub struct Storages {
    pub cookies: Shared<CookieStorage>,
    pub session: Shared<SessionStorage>,
    pub user: Shared<UserStorage>,
}

/// Process-wide storage wiring: session backend, id binding, fallbacks.
#[derive(Clone)]
pub struct StorageContext {
    sessions: Arc<dyn SessionStore>,
    binding: SessionBinding,
    session_fallbacks: Fallbacks,
    user_fallbacks: Fallbacks,
}

impl StorageContext {
    /// Server binding: the session id travels in a signed cookie.
    pub fn new(config: &SessionConfig, sessions: Arc<dyn SessionStore>) -> Self {
        let signer = SessionIdSigner::new(config.secret.as_deref());
        if !signer.is_signing() {
            tracing::warn!(
                cookie = %config.cookie_name,
                "No session secret configured, session ids are unsigned"
            );
        }
        Self {
            sessions,
            binding: SessionBinding::Cookie {
                name: config.cookie_name.clone(),
                signer,
            },
            session_fallbacks: Fallbacks::default(),
            user_fallbacks: Fallbacks::default(),
        }
    }

    /// Client/worker binding: one local session, no cookie.
    pub fn local(sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            sessions,
            binding: SessionBinding::Local("local".to_string()),
            session_fallbacks: Fallbacks::default(),
            user_fallbacks: Fallbacks::default(),
        }
    }

    /// In-memory sessions with the configured TTL.
    pub fn in_memory(config: &SessionConfig) -> Self {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(config.ttl_secs)));
        Self::new(config, store)
    }

    pub fn with_session_fallback(mut self, attr: impl Into<String>, fallback: Fallback) -> Self {
        self.session_fallbacks.define(attr, fallback);
        self
    }

    pub fn with_user_fallback(mut self, attr: impl Into<String>, fallback: Fallback) -> Self {
        self.user_fallbacks.define(attr, fallback);
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Fresh storages for one inbound request.
    pub fn storages_for(&self, headers: &HeaderMap) -> Storages {
        let session = Arc::new(Mutex::new(SessionStorage::from_headers(
            headers,
            self.sessions.clone(),
            self.binding.clone(),
            self.session_fallbacks.clone(),
        )));
        let user = UserStorage::new(session.clone(), self.user_fallbacks.clone());
        Storages {
            cookies: Arc::new(Mutex::new(CookieStorage::from_headers(headers))),
            session,
            user: Arc::new(Mutex::new(user)),
        }
    }
}

impl Storages {
    /// Flush every storage into the outgoing headers.
    ///
    /// User writes land in the session record, so the user bag commits first.
    pub fn commit(&self, headers: &mut HeaderMap) {
        self.cookies
            .lock()
            .expect("cookie storage mutex poisoned")
            .commit(headers);
        self.user
            .lock()
            .expect("user storage mutex poisoned")
            .commit();
        self.session
            .lock()
            .expect("session storage mutex poisoned")
            .commit(headers);
    }
}
