//! Strategy names and per-request selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::caching::pattern::{AnyMatcher, Matcher};
use crate::config::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    NetworkFirst,
    CacheFirst,
    NetworkOnly,
    CacheOnly,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::NetworkFirst => "network-first",
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkOnly => "network-only",
            Strategy::CacheOnly => "cache-only",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "network-first" => Ok(Strategy::NetworkFirst),
            "cache-first" => Ok(Strategy::CacheFirst),
            "network-only" => Ok(Strategy::NetworkOnly),
            "cache-only" => Ok(Strategy::CacheOnly),
            other => Err(format!("unknown caching strategy {:?}", other)),
        }
    }
}

/// Ordered pattern lists plus the default strategy.
#[derive(Debug)]
pub struct StrategySelector {
    lists: Vec<(Strategy, AnyMatcher)>,
    default: Strategy,
}

impl StrategySelector {
    /// Lists are consulted cache-only, network-only, cache-first, network-first.
    pub fn from_config(config: &CacheConfig) -> Self {
        let lists = vec![
            (Strategy::CacheOnly, AnyMatcher::from_patterns(&config.cache_only)),
            (Strategy::NetworkOnly, AnyMatcher::from_patterns(&config.network_only)),
            (Strategy::CacheFirst, AnyMatcher::from_patterns(&config.cache_first)),
            (Strategy::NetworkFirst, AnyMatcher::from_patterns(&config.network_first)),
        ];
        Self {
            lists,
            default: config.default_strategy,
        }
    }

    pub fn select(&self, url: &Url) -> Strategy {
        self.lists
            .iter()
            .find(|(_, matcher)| matcher.matches(url))
            .map(|(strategy, _)| *strategy)
            .unwrap_or(self.default)
    }

    pub fn default_strategy(&self) -> Strategy {
        self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_order() {
        let config = CacheConfig {
            cache_only: vec!["/offline/*".into()],
            network_only: vec!["/api/*".into()],
            cache_first: vec!["/assets/*".into(), "/api/static/*".into()],
            network_first: vec!["*".into()],
            default_strategy: Strategy::NetworkOnly,
            ..Default::default()
        };
        let selector = StrategySelector::from_config(&config);
        let select = |path: &str| selector.select(&Url::parse(&format!("http://a.test{}", path)).unwrap());

        assert_eq!(select("/offline/page"), Strategy::CacheOnly);
        // network-only is consulted before cache-first.
        assert_eq!(select("/api/static/logo.png"), Strategy::NetworkOnly);
        assert_eq!(select("/assets/app.css"), Strategy::CacheFirst);
        assert_eq!(select("/anything"), Strategy::NetworkFirst);
    }

    #[test]
    fn test_default_and_parse() {
        let selector = StrategySelector::from_config(&CacheConfig::default());
        assert_eq!(
            selector.select(&Url::parse("http://a.test/x").unwrap()),
            Strategy::NetworkFirst
        );
        assert_eq!("cache-first".parse::<Strategy>().unwrap(), Strategy::CacheFirst);
        assert!("stale".parse::<Strategy>().is_err());
        assert_eq!(Strategy::CacheOnly.to_string(), "cache-only");
    }
}
