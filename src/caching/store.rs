//! Named caches and their partitioning.
//!
//! # Design Decisions
//! - Entries are keyed by absolute URL; only the last response per URL is kept
//! - Responses are stored as parts because `Response` is not `Clone`
//! - One logical cache name maps to two physical caches:
//!   `<name>` and `<name>_json`, chosen by the request's `Accept`
//! - Each physical cache is bounded: entries expire after a TTL, and a put
//!   past `max_entries` evicts the oldest entry

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, Response, StatusCode};
use dashmap::DashMap;

use crate::config::CacheConfig;
use crate::http::request::request_url;
use crate::http::{EngineRequest, EngineResponse};

/// Where a response came from, as far as caching is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Basic,
    Cors,
    Opaque,
    Error,
}

impl ResponseType {
    /// Read from response extensions; untagged responses are `Basic`.
    pub fn of(response: &EngineResponse) -> Self {
        response.extensions().get::<ResponseType>().copied().unwrap_or_default()
    }

    pub fn is_cacheable(&self) -> bool {
        matches!(self, ResponseType::Basic | ResponseType::Cors)
    }
}

/// Physical cache for a request: JSON representations get their own.
pub fn partition_name(base: &str, request: &EngineRequest) -> String {
    let wants_json = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |accept| accept.contains("application/json"));
    if wants_json {
        format!("{}_json", base)
    } else {
        base.to_string()
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn lookup(&self, request: &EngineRequest) -> Option<EngineResponse>;
    async fn put(&self, request: &EngineRequest, response: &EngineResponse);
    async fn delete(&self, request: &EngineRequest) -> bool;
}

/// Opens caches by name.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn open(&self, name: &str) -> Arc<dyn CacheStore>;
}

#[derive(Clone)]
struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    stored_at: Instant,
}

impl CachedResponse {
    fn to_response(&self) -> EngineResponse {
        let mut response = Response::new(self.body.clone());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Size and age bounds for one physical cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl CacheLimits {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

pub struct MemoryCache {
    entries: DashMap<String, CachedResponse>,
    limits: CacheLimits,
}

impl MemoryCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            entries: DashMap::new(),
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, then the oldest ones until under `max_entries`.
    fn enforce_limits(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.limits.ttl;
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);

        while self.entries.len() > self.limits.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.stored_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
        before.saturating_sub(self.entries.len())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(CacheLimits::default())
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn lookup(&self, request: &EngineRequest) -> Option<EngineResponse> {
        let key = request_url(request);
        let entry = self.entries.get(key.as_str())?;
        if entry.stored_at.elapsed() >= self.limits.ttl {
            drop(entry);
            self.entries.remove(key.as_str());
            return None;
        }
        Some(entry.to_response())
    }

    async fn put(&self, request: &EngineRequest, response: &EngineResponse) {
        self.entries.insert(
            request_url(request).to_string(),
            CachedResponse {
                status: response.status(),
                headers: response.headers().clone(),
                body: response.body().clone(),
                stored_at: Instant::now(),
            },
        );
        let evicted = self.enforce_limits();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.entries.len(), "Cache entries evicted");
        }
    }

    async fn delete(&self, request: &EngineRequest) -> bool {
        self.entries.remove(request_url(request).as_str()).is_some()
    }
}

#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: DashMap<String, Arc<MemoryCache>>,
    limits: CacheLimits,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: CacheLimits) -> Self {
        Self {
            caches: DashMap::new(),
            limits,
        }
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Arc<dyn CacheStore> {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::new(self.limits)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::get;
    use axum::http::Request;

    #[test]
    fn test_partition_name() {
        let html = get("http://a.test/post").unwrap();
        assert_eq!(partition_name("webflo_v1", &html), "webflo_v1");

        let json = Request::get("http://a.test/post")
            .header(header::ACCEPT, "application/json")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(partition_name("webflo_v1", &json), "webflo_v1_json");
    }

    #[tokio::test]
    async fn test_memory_cache_roundtrip() {
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("c").await;
        let request = get("http://a.test/x").unwrap();
        assert!(cache.lookup(&request).await.is_none());

        let response = Response::builder()
            .status(200)
            .header("etag", "v1")
            .body(Bytes::from("body"))
            .unwrap();
        cache.put(&request, &response).await;

        let again = storage.open("c").await;
        let hit = again.lookup(&request).await.unwrap();
        assert_eq!(hit.headers()["etag"], "v1");
        assert_eq!(hit.body(), "body");
        assert!(again.delete(&request).await);
        assert!(storage.open("other").await.lookup(&request).await.is_none());
    }

    fn page(body: &'static str) -> EngineResponse {
        Response::new(Bytes::from_static(body.as_bytes()))
    }

    #[tokio::test]
    async fn test_put_evicts_oldest_past_max_entries() {
        let cache = MemoryCache::new(CacheLimits {
            max_entries: 2,
            ttl: Duration::from_secs(60),
        });
        for path in ["a", "b", "c"] {
            let request = get(&format!("http://a.test/{}", path)).unwrap();
            cache.put(&request, &page("x")).await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&get("http://a.test/a").unwrap()).await.is_none());
        assert!(cache.lookup(&get("http://a.test/c").unwrap()).await.is_some());
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let storage = MemoryCacheStorage::with_limits(CacheLimits {
            max_entries: 10,
            ttl: Duration::from_millis(20),
        });
        let cache = storage.open("c").await;
        let request = get("http://a.test/x").unwrap();
        cache.put(&request, &page("x")).await;
        assert!(cache.lookup(&request).await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.lookup(&request).await.is_none());
    }
}
