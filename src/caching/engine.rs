//! The caching strategy engine.
//!
//! # Responsibilities
//! - Select a strategy per request from the pattern lists
//! - Consult the partitioned cache, the network, or both
//! - Write through successful GETs; refresh cache-first hits in the background
//!
//! # Design Decisions
//! - A cache-only miss is `Ok(None)`, not an error
//! - Only GET + 200 + basic/cors responses are ever written
//! - The selector lives in an `ArcSwap` so config reloads never block fetches

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;

use crate::caching::fetch::RemoteFetch;
use crate::caching::store::{partition_name, CacheStorage, CacheStore, ResponseType};
use crate::caching::strategy::{Strategy, StrategySelector};
use crate::config::CacheConfig;
use crate::error::EngineResult;
use crate::http::request::{clone_request, request_url};
use crate::http::{EngineRequest, EngineResponse, HttpEvent};
use crate::observability::metrics;
use crate::routing::{default_handler, DefaultHandler, Outcome, RouteContext};

struct Settings {
    selector: StrategySelector,
    cache_name: String,
}

pub struct CachingStrategyEngine {
    settings: ArcSwap<Settings>,
    caches: Arc<dyn CacheStorage>,
    remote: Arc<dyn RemoteFetch>,
}

fn is_cacheable(request: &EngineRequest, response: &EngineResponse) -> bool {
    request.method() == axum::http::Method::GET
        && response.status() == axum::http::StatusCode::OK
        && ResponseType::of(response).is_cacheable()
}

/// Fetch and, when allowed, write the response through to `cache`.
async fn fetch_and_store(
    remote: &dyn RemoteFetch,
    cache: &dyn CacheStore,
    request: &EngineRequest,
) -> EngineResult<EngineResponse> {
    let response = remote.fetch(clone_request(request)).await?;
    if is_cacheable(request, &response) {
        cache.put(request, &response).await;
    }
    Ok(response)
}

impl CachingStrategyEngine {
    pub fn new(config: &CacheConfig, caches: Arc<dyn CacheStorage>, remote: Arc<dyn RemoteFetch>) -> Self {
        Self {
            settings: ArcSwap::from_pointee(Settings {
                selector: StrategySelector::from_config(config),
                cache_name: config.cache_name.clone(),
            }),
            caches,
            remote,
        }
    }

    /// Swap in new pattern lists and cache name.
    pub fn reload(&self, config: &CacheConfig) {
        self.settings.store(Arc::new(Settings {
            selector: StrategySelector::from_config(config),
            cache_name: config.cache_name.clone(),
        }));
        tracing::info!(cache = %config.cache_name, "Caching strategies reloaded");
    }

    pub fn strategy_for(&self, request: &EngineRequest) -> Strategy {
        self.settings.load().selector.select(&request_url(request))
    }

    async fn open_cache(&self, request: &EngineRequest) -> Arc<dyn CacheStore> {
        let name = partition_name(&self.settings.load().cache_name, request);
        self.caches.open(&name).await
    }

    /// Fetch under the strategy selected for this request.
    pub async fn fetch(&self, request: EngineRequest) -> EngineResult<Option<EngineResponse>> {
        let strategy = self.strategy_for(&request);
        self.fetch_with(request, strategy).await
    }

    pub async fn fetch_with(
        &self,
        request: EngineRequest,
        strategy: Strategy,
    ) -> EngineResult<Option<EngineResponse>> {
        tracing::debug!(url = %request.uri(), %strategy, "Strategy fetch");
        match strategy {
            Strategy::NetworkOnly => {
                metrics::record_cache_lookup(strategy.as_str(), "network");
                self.remote.fetch(request).await.map(Some)
            }
            Strategy::CacheOnly => {
                let cache = self.open_cache(&request).await;
                let hit = cache.lookup(&request).await;
                metrics::record_cache_lookup(strategy.as_str(), if hit.is_some() { "hit" } else { "miss" });
                Ok(hit)
            }
            Strategy::NetworkFirst => self.network_first(&request).await.map(Some),
            Strategy::CacheFirst => {
                let cache = self.open_cache(&request).await;
                match cache.lookup(&request).await {
                    Some(hit) => {
                        metrics::record_cache_lookup(strategy.as_str(), "hit");
                        let remote = self.remote.clone();
                        tokio::spawn(async move {
                            if let Err(e) = fetch_and_store(remote.as_ref(), cache.as_ref(), &request).await {
                                tracing::debug!(url = %request.uri(), error = %e, "Background cache refresh failed");
                            }
                        });
                        Ok(Some(hit))
                    }
                    None => {
                        metrics::record_cache_lookup(strategy.as_str(), "miss");
                        self.network_first(&request).await.map(Some)
                    }
                }
            }
        }
    }

    async fn network_first(&self, request: &EngineRequest) -> EngineResult<EngineResponse> {
        let cache = self.open_cache(request).await;
        match fetch_and_store(self.remote.as_ref(), cache.as_ref(), request).await {
            Ok(response) => {
                metrics::record_cache_lookup(Strategy::NetworkFirst.as_str(), "network");
                Ok(response)
            }
            Err(e) => match cache.lookup(request).await {
                Some(cached) => {
                    tracing::warn!(url = %request.uri(), error = %e, "Network failed, serving cached response");
                    metrics::record_cache_lookup(Strategy::NetworkFirst.as_str(), "fallback");
                    Ok(cached)
                }
                None => {
                    metrics::record_cache_lookup(Strategy::NetworkFirst.as_str(), "error");
                    Err(e)
                }
            },
        }
    }
}

/// Default handler that answers unmatched routes through the engine.
///
/// A cache-only miss becomes `Outcome::Undefined`, hence a 404.
pub fn remote_fallthrough(engine: Arc<CachingStrategyEngine>) -> DefaultHandler {
    default_handler(move |event: HttpEvent, _input: Value, context: RouteContext| {
        let engine = engine.clone();
        async move {
            tracing::debug!(pathname = %context.pathname, "Falling through to remote");
            let request = clone_request(event.request());
            Ok(match engine.fetch(request).await? {
                Some(response) => Outcome::Response(response),
                None => Outcome::Undefined,
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::fetch::fetch_fn;
    use crate::caching::store::MemoryCacheStorage;
    use crate::error::EngineError;
    use crate::http::request::get;
    use axum::body::Bytes;
    use axum::http::{Request, Response};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Remote that counts calls and can be switched offline.
    fn remote(calls: Arc<AtomicUsize>, online: Arc<AtomicBool>) -> Arc<dyn RemoteFetch> {
        fetch_fn(move |_request: EngineRequest| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let up = online.load(Ordering::SeqCst);
            async move {
                if !up {
                    return Err(EngineError::Fetch("offline".into()));
                }
                Ok(Response::new(Bytes::from(format!("v{}", n))))
            }
        })
    }

    struct Fixture {
        engine: CachingStrategyEngine,
        caches: Arc<MemoryCacheStorage>,
        calls: Arc<AtomicUsize>,
        online: Arc<AtomicBool>,
    }

    fn fixture(config: CacheConfig) -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let online = Arc::new(AtomicBool::new(true));
        let caches = Arc::new(MemoryCacheStorage::new());
        let engine = CachingStrategyEngine::new(&config, caches.clone(), remote(calls.clone(), online.clone()));
        Fixture {
            engine,
            caches,
            calls,
            online,
        }
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let fx = fixture(CacheConfig::default());
        let first = fx.engine.fetch(get("http://a.test/post").unwrap()).await.unwrap().unwrap();
        assert_eq!(first.body(), "v1");

        fx.online.store(false, Ordering::SeqCst);
        let cached = fx.engine.fetch(get("http://a.test/post").unwrap()).await.unwrap().unwrap();
        assert_eq!(cached.body(), "v1");

        let err = fx.engine.fetch(get("http://a.test/never-seen").unwrap()).await;
        assert!(matches!(err, Err(EngineError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_network_first_only_caches_get_200() {
        let fx = fixture(CacheConfig::default());
        let post = Request::post("http://a.test/form").body(Bytes::new()).unwrap();
        fx.engine.fetch(post).await.unwrap();

        let cache = fx.caches.open("webflo_v1").await;
        assert!(cache.lookup(&get("http://a.test/form").unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_first_serves_hit_and_refreshes() {
        let fx = fixture(CacheConfig {
            cache_first: vec!["/assets/*".into()],
            ..Default::default()
        });
        let request = || get("http://a.test/assets/app.js").unwrap();

        // Miss: behaves like network-first and fills the cache.
        assert_eq!(fx.engine.fetch(request()).await.unwrap().unwrap().body(), "v1");

        // Hit: returned immediately, refresh runs behind it.
        assert_eq!(fx.engine.fetch(request()).await.unwrap().unwrap().body(), "v1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fx.engine.fetch(request()).await.unwrap().unwrap().body(), "v2");
    }

    #[tokio::test]
    async fn test_cache_only_miss_is_none() {
        let fx = fixture(CacheConfig {
            cache_only: vec!["*".into()],
            ..Default::default()
        });
        assert!(fx.engine.fetch(get("http://a.test/x").unwrap()).await.unwrap().is_none());
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_json_partition_and_reload() {
        let fx = fixture(CacheConfig::default());
        let json = Request::get("http://a.test/data")
            .header("accept", "application/json")
            .body(Bytes::new())
            .unwrap();
        fx.engine.fetch(json).await.unwrap();
        let probe = get("http://a.test/data").unwrap();
        assert!(fx.caches.open("webflo_v1_json").await.lookup(&probe).await.is_some());
        assert!(fx.caches.open("webflo_v1").await.lookup(&probe).await.is_none());

        fx.engine.reload(&CacheConfig {
            network_only: vec!["/data".into()],
            ..Default::default()
        });
        assert_eq!(fx.engine.strategy_for(&probe), Strategy::NetworkOnly);
    }
}
