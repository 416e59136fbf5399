#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipgate::restrict::backend::{CacheBackend, MemoryBackend};
use ipgate::restrict::decision_cache::DecisionCache;
use ipgate::restrict::geo::{Geo, GeoResolver, StaticGeoEntry, StaticGeoResolver};
use ipgate::restrict::rule_cache::{RuleCache, RuleCacheConfig};
use ipgate::restrict::store::{RuleStore, StaticRuleStore};
use ipgate::restrict::{RestrictError, RestrictionEngine, Rule};

/// Rule store that counts fetches.
pub struct CountingStore {
    inner: StaticRuleStore,
    fetches: AtomicUsize,
}

impl CountingStore {
    pub fn new(rules: Vec<Rule>) -> Arc<Self> {
        Arc::new(Self {
            inner: StaticRuleStore::new(rules),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuleStore for CountingStore {
    async fn list_enabled_rules(&self) -> Result<Vec<Rule>, RestrictError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.list_enabled_rules().await
    }
}

/// Geography resolver that counts lookups.
pub struct CountingGeo {
    inner: StaticGeoResolver,
    lookups: AtomicUsize,
}

impl CountingGeo {
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeoResolver for CountingGeo {
    async fn resolve(&self, addr: &str) -> Option<Geo> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(addr).await
    }
}

fn geo_entry(cidr: &str, country: &str, continent: &str) -> StaticGeoEntry {
    StaticGeoEntry {
        cidr: cidr.into(),
        country: country.into(),
        continent: continent.into(),
    }
}

/// 8.8.0.0/16 is US/NA, 5.0.0.0/8 is DE/EU, 203.0.113.0/24 is US/NA.
pub fn test_geo() -> Arc<CountingGeo> {
    Arc::new(CountingGeo {
        inner: StaticGeoResolver::new(&[
            geo_entry("8.8.0.0/16", "US", "NA"),
            geo_entry("203.0.113.0/24", "US", "NA"),
            geo_entry("5.0.0.0/8", "DE", "EU"),
        ]),
        lookups: AtomicUsize::new(0),
    })
}

pub fn engine_with_geo(
    store: Arc<CountingStore>,
    geo: Arc<CountingGeo>,
    decision_cache: bool,
) -> RestrictionEngine {
    let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new());
    let rules = Arc::new(RuleCache::new(store, Some(backend.clone()), RuleCacheConfig::default()));
    let decisions = decision_cache
        .then(|| DecisionCache::new(backend, Duration::from_secs(300), Duration::from_millis(100)));
    RestrictionEngine::new(rules, decisions, geo, Duration::from_millis(200))
}

pub fn engine_with(store: Arc<CountingStore>, decision_cache: bool) -> RestrictionEngine {
    engine_with_geo(store, test_geo(), decision_cache)
}

pub fn engine(rules: Vec<Rule>) -> RestrictionEngine {
    engine_with(CountingStore::new(rules), true)
}
