use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::base_classes::types::{DepthView, OhlcSeries, Price};
use crate::exchanges::binance::{ChartCache, DepthCache};

pub type SharedCache<C> = Arc<RwLock<C>>;

/// Caller-owned map from key to a shared cache.
///
/// Clones share the same map. Each cache sits behind its own lock, so readers of one symbol
/// never wait on another symbol's loop.
pub struct CacheRegistry<K, C> {
    caches: Arc<RwLock<HashMap<K, SharedCache<C>>>>,
}

impl<K, C> Clone for CacheRegistry<K, C> {
    fn clone(&self) -> Self {
        Self {
            caches: self.caches.clone(),
        }
    }
}

impl<K, C> Default for CacheRegistry<K, C> {
    fn default() -> Self {
        Self {
            caches: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K, C> CacheRegistry<K, C>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a fresh cache under `key`, replacing any previous one.
    pub fn insert(&self, key: K, cache: C) -> SharedCache<C> {
        let shared = Arc::new(RwLock::new(cache));
        self.caches.write().insert(key, shared.clone());
        shared
    }

    pub fn get(&self, key: &K) -> Option<SharedCache<C>> {
        self.caches.read().get(key).cloned()
    }

    pub fn remove(&self, key: &K) -> Option<SharedCache<C>> {
        self.caches.write().remove(key)
    }

    /// Removes `key` only while it still maps to `cache`.
    pub fn remove_if_same(&self, key: &K, cache: &SharedCache<C>) -> bool {
        let mut caches = self.caches.write();
        match caches.get(key) {
            Some(current) if Arc::ptr_eq(current, cache) => {
                caches.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.caches.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.caches.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    /// Runs `f` against the cache under a read lock.
    pub fn with<R>(&self, key: &K, f: impl FnOnce(&C) -> R) -> Option<R> {
        let cache = self.get(key)?;
        let guard = cache.read();
        Some(f(&guard))
    }
}

/// Depth caches keyed by upper-case symbol.
pub type DepthCaches = CacheRegistry<String, DepthCache>;

impl CacheRegistry<String, DepthCache> {
    pub fn sorted_view(&self, symbol: &str, limit: usize) -> Option<DepthView> {
        self.with(&symbol.to_uppercase(), |c| c.sorted_view(limit))
    }

    pub fn cumulative_view(&self, symbol: &str) -> Option<DepthView> {
        self.with(&symbol.to_uppercase(), |c| c.cumulative_view())
    }

    pub fn best_bid(&self, symbol: &str) -> Option<Price> {
        self.with(&symbol.to_uppercase(), |c| c.best_bid()).flatten()
    }

    pub fn best_ask(&self, symbol: &str) -> Option<Price> {
        self.with(&symbol.to_uppercase(), |c| c.best_ask()).flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartKey {
    pub symbol: String,
    pub interval: String,
}

impl ChartKey {
    pub fn new(symbol: &str, interval: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            interval: interval.to_string(),
        }
    }
}

impl fmt::Display for ChartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.interval)
    }
}

pub type ChartCaches = CacheRegistry<ChartKey, ChartCache>;

impl CacheRegistry<ChartKey, ChartCache> {
    pub fn ohlc(&self, symbol: &str, interval: &str) -> Option<OhlcSeries> {
        self.with(&ChartKey::new(symbol, interval), |c| c.ohlc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::binance::messages::DepthSnapshot;
    use rust_decimal_macros::dec;

    #[test]
    fn test_remove_if_same_ignores_replacement() {
        let caches = DepthCaches::new();
        let first = caches.insert("BTCUSDT".into(), DepthCache::new("BTCUSDT"));
        let second = caches.insert("BTCUSDT".into(), DepthCache::new("BTCUSDT"));

        assert!(!caches.remove_if_same(&"BTCUSDT".to_string(), &first));
        assert!(caches.contains(&"BTCUSDT".to_string()));
        assert!(caches.remove_if_same(&"BTCUSDT".to_string(), &second));
        assert!(caches.is_empty());
    }

    #[test]
    fn test_sorted_view_by_symbol() {
        let caches = DepthCaches::new();
        let cache = caches.insert("ETHBTC".into(), DepthCache::new("ETHBTC"));
        cache.write().apply_snapshot(&DepthSnapshot {
            last_update_id: 5,
            bids: vec![(dec!(0.05), dec!(10))],
            asks: vec![(dec!(0.06), dec!(5))],
        });

        let view = caches.sorted_view("ethbtc", 1).unwrap();
        assert_eq!(view.bids, vec![(dec!(0.05), dec!(10))]);
        assert_eq!(caches.best_ask("ETHBTC"), Some(dec!(0.06)));
        assert!(caches.sorted_view("BTCUSDT", 1).is_none());
    }

    #[test]
    fn test_chart_keys() {
        let charts = ChartCaches::new();
        charts.insert(ChartKey::new("btcusdt", "1m"), ChartCache::new("BTCUSDT", "1m"));
        assert!(charts.contains(&ChartKey::new("BTCUSDT", "1m")));
        assert!(!charts.contains(&ChartKey::new("BTCUSDT", "5m")));
        assert_eq!(ChartKey::new("btcusdt", "1m").to_string(), "BTCUSDT:1m");
        assert_eq!(charts.ohlc("BTCUSDT", "1m"), Some(OhlcSeries::default()));
    }
}
