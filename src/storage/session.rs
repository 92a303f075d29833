//! Session storage over an injected session store.
//!
//! # Responsibilities
//! - Derive the session id from the request cookie (HMAC-validated when signed)
//! - Load/save the session record through a `SessionStore`
//! - Emit the session id cookie once for freshly created sessions
//!
//! # Design Decisions
//! - The store is injected; `MemorySessionStore` evicts idle records after a TTL
//! - Without a secret, ids are unsigned random UUIDs (logged once at startup)
//! - Concurrent requests sharing an id race at the store: last commit wins

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap, HeaderValue};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::storage::cookies::{parse_cookie_header, set_cookie_contains, CookieOptions};
use crate::storage::diff::{Registry, StorageDiff, Store};
use crate::storage::require::Fallbacks;

type HmacSha256 = Hmac<Sha256>;

/// Pluggable session backend keyed by session id.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Store>;
    fn set(&self, id: &str, value: Store);
    fn remove(&self, id: &str);
    /// Drop records past their lifetime. Returns how many were removed.
    fn evict_expired(&self) -> usize;
    fn len(&self) -> usize;
}

struct SessionRecord {
    data: Store,
    last_access: Instant,
}

/// In-process session store with idle expiry.
pub struct MemorySessionStore {
    records: DashMap<String, SessionRecord>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, id: &str) -> Option<Store> {
        let mut record = self.records.get_mut(id)?;
        if record.last_access.elapsed() >= self.ttl {
            drop(record);
            self.records.remove(id);
            return None;
        }
        record.last_access = Instant::now();
        Some(record.data.clone())
    }

    fn set(&self, id: &str, value: Store) {
        self.records.insert(
            id.to_string(),
            SessionRecord {
                data: value,
                last_access: Instant::now(),
            },
        );
    }

    fn remove(&self, id: &str) {
        self.records.remove(id);
    }

    fn evict_expired(&self) -> usize {
        let before = self.records.len();
        let ttl = self.ttl;
        self.records.retain(|_, r| r.last_access.elapsed() < ttl);
        before.saturating_sub(self.records.len())
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Signs and verifies session id cookie values: `<id>.<hex hmac>`.
#[derive(Clone, Default)]
pub struct SessionIdSigner {
    key: Option<Arc<Vec<u8>>>,
}

impl SessionIdSigner {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            key: secret.map(|s| Arc::new(s.as_bytes().to_vec())),
        }
    }

    pub fn is_signing(&self) -> bool {
        self.key.is_some()
    }

    fn signature(&self, key: &[u8], id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Cookie value for an id.
    pub fn sign(&self, id: &str) -> String {
        match &self.key {
            Some(key) => format!("{}.{}", id, self.signature(key, id)),
            None => id.to_string(),
        }
    }

    /// Session id carried by a cookie value, if it is valid.
    pub fn verify(&self, value: &str) -> Option<String> {
        if value.is_empty() {
            return None;
        }
        match &self.key {
            None => Some(value.to_string()),
            Some(key) => {
                let (id, sig) = value.rsplit_once('.')?;
                let expected = self.signature(key, id);
                constant_time_eq(sig.as_bytes(), expected.as_bytes()).then(|| id.to_string())
            }
        }
    }
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Registry adapter binding a session id to a store.
struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    id: String,
}

impl Registry for SessionRegistry {
    fn load(&self, _key: Option<&str>) -> Store {
        self.store.get(&self.id).unwrap_or_default()
    }

    fn save(&self, _key: Option<&str>, store: &Store) {
        self.store.set(&self.id, store.clone());
    }
}

/// How the session id is transported.
#[derive(Clone)]
pub enum SessionBinding {
    /// Server: id travels in a signed cookie.
    Cookie {
        name: String,
        signer: SessionIdSigner,
    },
    /// Client/worker: a fixed local id, no cookie (browser storage semantics).
    Local(String),
}

pub struct SessionStorage {
    diff: StorageDiff,
    id: String,
    binding: SessionBinding,
    /// True when the id did not arrive with the request.
    is_new: bool,
}

impl SessionStorage {
    pub fn from_headers(
        headers: &HeaderMap,
        store: Arc<dyn SessionStore>,
        binding: SessionBinding,
        fallbacks: Fallbacks,
    ) -> Self {
        let (id, is_new) = match &binding {
            SessionBinding::Local(id) => (id.clone(), false),
            SessionBinding::Cookie { name, signer } => {
                let incoming = headers
                    .get_all(header::COOKIE)
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .find_map(|v| parse_cookie_header(v).get(name).cloned())
                    .and_then(|v| v.as_str().map(str::to_string))
                    .and_then(|v| signer.verify(&v));
                match incoming {
                    Some(id) => (id, false),
                    None => (Uuid::new_v4().to_string(), true),
                }
            }
        };

        let registry = Arc::new(SessionRegistry {
            store,
            id: id.clone(),
        });
        Self {
            diff: StorageDiff::new(registry, None).with_fallbacks(fallbacks),
            id,
            binding,
            is_new,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Flush the record, then write the id cookie if this session is new and
    /// nothing else already set it. Returns whether the store was written.
    pub fn commit(&mut self, headers: &mut HeaderMap) -> bool {
        let written = self.diff.commit(false);
        if let SessionBinding::Cookie { name, signer } = &self.binding {
            if self.is_new && !set_cookie_contains(headers, name) {
                let line = CookieOptions::session().render(name, &signer.sign(&self.id));
                if let Ok(value) = HeaderValue::from_str(&line) {
                    headers.append(header::SET_COOKIE, value);
                    self.is_new = false;
                }
            }
        }
        written
    }
}

impl Deref for SessionStorage {
    type Target = StorageDiff;

    fn deref(&self) -> &StorageDiff {
        &self.diff
    }
}

impl DerefMut for SessionStorage {
    fn deref_mut(&mut self) -> &mut StorageDiff {
        &mut self.diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Arc<dyn SessionStore> {
        Arc::new(MemorySessionStore::new(Duration::from_secs(60)))
    }

    fn cookie_binding(secret: Option<&str>) -> SessionBinding {
        SessionBinding::Cookie {
            name: "__sessid".into(),
            signer: SessionIdSigner::new(secret),
        }
    }

    fn cookie_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_signer() {
        let signer = SessionIdSigner::new(Some("s3cret"));
        let value = signer.sign("abc");
        assert!(value.starts_with("abc."));
        assert_eq!(signer.verify(&value), Some("abc".to_string()));
        assert_eq!(signer.verify("abc.deadbeef"), None);
        assert_eq!(signer.verify("abc"), None);

        let unsigned = SessionIdSigner::new(None);
        assert_eq!(unsigned.sign("abc"), "abc");
        assert_eq!(unsigned.verify("abc"), Some("abc".to_string()));
    }

    #[test]
    fn test_new_session_sets_cookie_once() {
        let store = store();
        let mut session = SessionStorage::from_headers(
            &HeaderMap::new(),
            store.clone(),
            cookie_binding(Some("k")),
            Fallbacks::default(),
        );
        assert!(session.is_new());
        session.set("cart", json!([1, 2]));

        let mut out = HeaderMap::new();
        assert!(session.commit(&mut out));
        let line = out[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(line.starts_with(&format!("__sessid={}.", session.id())));
        assert!(line.ends_with("Path=/; Secure; HttpOnly; SameSite=Lax"));
        assert_eq!(store.get(session.id()).unwrap()["cart"], json!([1, 2]));

        let mut again = HeaderMap::new();
        assert!(!session.commit(&mut again));
        assert!(again.get(header::SET_COOKIE).is_none());
    }

    #[test]
    fn test_existing_session_is_resumed() {
        let store = store();
        let signer = SessionIdSigner::new(Some("k"));
        let mut record = Store::new();
        record.insert("visits".into(), json!(3));
        store.set("sid-1", record);

        let headers = cookie_headers(&format!("__sessid={}", signer.sign("sid-1")));
        let mut session =
            SessionStorage::from_headers(&headers, store.clone(), cookie_binding(Some("k")), Fallbacks::default());
        assert!(!session.is_new());
        assert_eq!(session.id(), "sid-1");
        assert_eq!(session.get("visits"), Some(json!(3)));

        let mut out = HeaderMap::new();
        session.commit(&mut out);
        assert!(out.get(header::SET_COOKIE).is_none());
    }

    #[test]
    fn test_forged_cookie_gets_fresh_id() {
        let headers = cookie_headers("__sessid=sid-1.0000");
        let session =
            SessionStorage::from_headers(&headers, store(), cookie_binding(Some("k")), Fallbacks::default());
        assert!(session.is_new());
        assert_ne!(session.id(), "sid-1");
    }

    #[test]
    fn test_memory_store_eviction() {
        let store = MemorySessionStore::new(Duration::from_millis(20));
        store.set("a", Store::new());
        assert_eq!(store.len(), 1);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.evict_expired(), 1);
        assert!(store.get("a").is_none());
    }
}
