//! Remote fetch collaborator.
//!
//! `HyperFetcher` forwards buffered requests through a pooled hyper client,
//! optionally rewriting every request onto a fixed upstream origin.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::uri::{Authority, Scheme};
use axum::http::{Request, Response, Uri};
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::{EngineError, EngineResult};
use crate::http::{EngineRequest, EngineResponse};

#[async_trait]
pub trait RemoteFetch: Send + Sync {
    async fn fetch(&self, request: EngineRequest) -> EngineResult<EngineResponse>;
}

type FetchFn = dyn Fn(EngineRequest) -> BoxFuture<'static, EngineResult<EngineResponse>> + Send + Sync;

struct FnFetch(Arc<FetchFn>);

#[async_trait]
impl RemoteFetch for FnFetch {
    async fn fetch(&self, request: EngineRequest) -> EngineResult<EngineResponse> {
        (self.0)(request).await
    }
}

/// Wrap an async closure as a `RemoteFetch`.
pub fn fetch_fn<F, Fut>(f: F) -> Arc<dyn RemoteFetch>
where
    F: Fn(EngineRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EngineResult<EngineResponse>> + Send + 'static,
{
    Arc::new(FnFetch(Arc::new(move |request| Box::pin(f(request)))))
}

pub struct HyperFetcher {
    client: Client<HttpConnector, Body>,
    upstream: Option<(Scheme, Authority)>,
    max_body_size: usize,
}

impl HyperFetcher {
    pub fn new(max_body_size: usize) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            upstream: None,
            max_body_size,
        }
    }

    /// Send every request to `origin` (`http://host:port`) instead of its own authority.
    pub fn with_upstream(mut self, origin: &str) -> EngineResult<Self> {
        let uri = Uri::from_str(origin).map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        let scheme = uri.scheme().cloned().unwrap_or(Scheme::HTTP);
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| EngineError::InvalidRequest(format!("upstream {:?} has no authority", origin)))?;
        self.upstream = Some((scheme, authority));
        Ok(self)
    }

    fn target_uri(&self, uri: &Uri) -> EngineResult<Uri> {
        let mut parts = uri.clone().into_parts();
        match &self.upstream {
            Some((scheme, authority)) => {
                parts.scheme = Some(scheme.clone());
                parts.authority = Some(authority.clone());
            }
            None if parts.authority.is_none() => {
                return Err(EngineError::Fetch(format!("no authority to fetch {}", uri)));
            }
            None => {}
        }
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some("/".parse().map_err(|e: axum::http::uri::InvalidUri| {
                EngineError::InvalidRequest(e.to_string())
            })?);
        }
        Uri::from_parts(parts).map_err(|e| EngineError::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl RemoteFetch for HyperFetcher {
    async fn fetch(&self, request: EngineRequest) -> EngineResult<EngineResponse> {
        let (mut parts, body) = request.into_parts();
        parts.uri = self.target_uri(&parts.uri)?;
        let uri = parts.uri.clone();
        let outbound = Request::from_parts(parts, Body::from(body));

        let response = self.client.request(outbound).await.map_err(|e| {
            tracing::error!(%uri, error = %e, "Upstream request failed");
            EngineError::Fetch(e.to_string())
        })?;

        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(Body::new(body), self.max_body_size)
            .await
            .map_err(|e| EngineError::Fetch(e.to_string()))?;
        tracing::debug!(%uri, status = parts.status.as_u16(), "Fetched upstream");
        Ok(Response::from_parts(parts, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_uri_rewrite() {
        let fetcher = HyperFetcher::new(1024).with_upstream("http://127.0.0.1:9000").unwrap();
        let uri = fetcher.target_uri(&"/blog?x=1".parse().unwrap()).unwrap();
        assert_eq!(uri, "http://127.0.0.1:9000/blog?x=1");

        let direct = HyperFetcher::new(1024);
        assert!(direct.target_uri(&"/blog".parse().unwrap()).is_err());
        let uri = direct.target_uri(&"http://a.test/x".parse().unwrap()).unwrap();
        assert_eq!(uri, "http://a.test/x");
    }

    #[test]
    fn test_upstream_requires_authority() {
        assert!(HyperFetcher::new(1024).with_upstream("/relative").is_err());
    }
}
