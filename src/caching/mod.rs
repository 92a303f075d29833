//! Fetch strategies over named caches.
//!
//! # Data Flow
//! ```text
//! Unrouted request (worker fetch or default handler)
//!     → strategy.rs (pattern lists → Strategy)
//!     → store.rs (partition: <name> or <name>_json)
//!     → engine.rs (cache / network / both)
//!     → fetch.rs (hyper client to the upstream)
//! ```

pub mod engine;
pub mod fetch;
pub mod pattern;
pub mod store;
pub mod strategy;

pub use engine::{remote_fallthrough, CachingStrategyEngine};
pub use fetch::{fetch_fn, HyperFetcher, RemoteFetch};
pub use pattern::{AnyMatcher, Matcher, UrlPattern};
pub use store::{
    partition_name, CacheLimits, CacheStorage, CacheStore, MemoryCache, MemoryCacheStorage, ResponseType,
};
pub use strategy::{Strategy, StrategySelector};
