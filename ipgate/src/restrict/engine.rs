use std::sync::Arc;
use std::time::Duration;

use super::decision_cache::{CachedResolution, DecisionCache};
use super::error::RestrictError;
use super::geo::{Geo, GeoResolver};
use super::rule_cache::RuleCache;
use super::ruleset::Subject;
use super::types::{Action, Decision};
use crate::metrics::counters;

/// Resolves (address, action) pairs into decisions.
///
/// Lookup order: decision cache, then rule cache + geography + matching.
/// Only a rule store failure with no usable rule set is returned as an error.
pub struct RestrictionEngine {
    rules: Arc<RuleCache>,
    decisions: Option<DecisionCache>,
    geo: Arc<dyn GeoResolver>,
    geo_timeout: Duration,
}

impl RestrictionEngine {
    pub fn new(
        rules: Arc<RuleCache>,
        decisions: Option<DecisionCache>,
        geo: Arc<dyn GeoResolver>,
        geo_timeout: Duration,
    ) -> Self {
        Self {
            rules,
            decisions,
            geo,
            geo_timeout,
        }
    }

    pub fn rule_cache(&self) -> &Arc<RuleCache> {
        &self.rules
    }

    /// `addr` is expected to be normalized already (see `restrict::address`).
    pub async fn evaluate(&self, addr: &str, action: Action) -> Result<Decision, RestrictError> {
        if let Some(dc) = &self.decisions {
            if let Some(cached) = dc.get(addr).await {
                let d = Decision::from_match(cached.into_match(), action);
                self.record(addr, action, &d, "cache");
                return Ok(d);
            }
        }

        let rs = self.rules.get().await?;
        let (geo, geo_degraded) = self.resolve_geo(addr).await;

        let subject = Subject::new(addr, &geo.country, &geo.continent);
        if subject.ip.is_none() && rs.has_subnet_rules() {
            tracing::warn!(client_ip = %addr, "unparseable client address, ip_subnet rules skipped");
        }

        let resolution = CachedResolution::from_match(rs.resolve(&subject));
        // a verdict reached without geography must not outlive the lookup failure
        if let Some(dc) = self.decisions.as_ref().filter(|_| !geo_degraded) {
            dc.put(addr, &resolution).await;
        }

        let d = Decision::from_match(resolution.into_match(), action);
        self.record(addr, action, &d, "rules");
        Ok(d)
    }

    /// Geography for `addr`, and whether it is degraded (the lookup timed out).
    async fn resolve_geo(&self, addr: &str) -> (Geo, bool) {
        match tokio::time::timeout(self.geo_timeout, self.geo.resolve(addr)).await {
            Ok(Some(g)) => (g, false),
            Ok(None) => (Geo::default(), false),
            Err(_) => {
                counters::inc_geo_timeout();
                tracing::warn!(client_ip = %addr, timeout = ?self.geo_timeout, "geo lookup timed out, continuing without geography");
                (Geo::default(), true)
            }
        }
    }

    fn record(&self, addr: &str, action: Action, d: &Decision, source: &str) {
        let category = d.matched().map(|m| m.category.as_str()).unwrap_or("none");
        counters::inc_decision(d.kind_str(), category, source);

        if let Some(m) = d.matched().filter(|_| d.is_terminal()) {
            tracing::info!(
                client_ip = %addr,
                action = action.as_str(),
                decision = d.kind_str(),
                category = %m.category,
                scope = %m.scope,
                value = %m.value,
                status = d.status().unwrap_or_default(),
                source,
                "request restricted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::restrict::backend::{CacheBackend, MemoryBackend};
    use crate::restrict::geo::{StaticGeoEntry, StaticGeoResolver};
    use crate::restrict::rule_cache::RuleCacheConfig;
    use crate::restrict::store::{RuleStore, StaticRuleStore};
    use crate::restrict::types::{Category, Rule, Scope};

    struct SlowGeo;

    #[async_trait]
    impl GeoResolver for SlowGeo {
        async fn resolve(&self, _addr: &str) -> Option<Geo> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Some(Geo {
                country: "US".into(),
                continent: "NA".into(),
            })
        }
    }

    /// Stalls on the first lookup only, then answers US/NA.
    #[derive(Default)]
    struct SlowOnceGeo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GeoResolver for SlowOnceGeo {
        async fn resolve(&self, _addr: &str) -> Option<Geo> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Some(Geo {
                country: "US".into(),
                continent: "NA".into(),
            })
        }
    }

    struct DownStore;

    #[async_trait]
    impl RuleStore for DownStore {
        async fn list_enabled_rules(&self) -> Result<Vec<Rule>, RestrictError> {
            Err(RestrictError::store("connection refused"))
        }
    }

    fn engine_with_ttl(
        store: Arc<dyn RuleStore>,
        geo: Arc<dyn GeoResolver>,
        with_decisions: bool,
        rule_ttl: Duration,
    ) -> RestrictionEngine {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new());
        let cfg = RuleCacheConfig {
            ttl: rule_ttl,
            ..RuleCacheConfig::default()
        };
        let rules = Arc::new(RuleCache::new(store, Some(backend.clone()), cfg));
        let decisions = with_decisions
            .then(|| DecisionCache::new(backend, Duration::from_secs(300), Duration::from_millis(100)));
        RestrictionEngine::new(rules, decisions, geo, Duration::from_millis(50))
    }

    fn engine(store: Arc<dyn RuleStore>, geo: Arc<dyn GeoResolver>, with_decisions: bool) -> RestrictionEngine {
        engine_with_ttl(store, geo, with_decisions, Duration::from_secs(300))
    }

    fn no_geo() -> Arc<StaticGeoResolver> {
        Arc::new(StaticGeoResolver::new(&[] as &[StaticGeoEntry]))
    }

    #[tokio::test]
    async fn geo_timeout_degrades_to_unknown() {
        let store = Arc::new(StaticRuleStore::new(vec![
            Rule::new(Category::Blacklist, Scope::Country, "US", Some(403)),
        ]));
        let e = engine(store, Arc::new(SlowGeo), false);

        let d = e.evaluate("8.8.8.8", Action::Generic).await.unwrap();
        assert_eq!(d, Decision::allow());
    }

    #[tokio::test]
    async fn geo_timeout_verdict_is_not_cached() {
        let store = Arc::new(StaticRuleStore::new(vec![
            Rule::new(Category::Blacklist, Scope::Country, "US", Some(403)),
        ]));
        let e = engine(store, Arc::new(SlowOnceGeo::default()), true);

        let first = e.evaluate("8.8.8.8", Action::Generic).await.unwrap();
        assert_eq!(first, Decision::allow());

        let second = e.evaluate("8.8.8.8", Action::Generic).await.unwrap();
        assert_eq!(second.kind_str(), "deny");
        assert_eq!(second.status(), Some(403));
    }

    #[tokio::test]
    async fn cached_generic_allow_does_not_hide_login_denial() {
        let store = Arc::new(StaticRuleStore::new(vec![
            Rule::new(Category::Blocklogin, Scope::IpSubnet, "192.168.1.0/24", Some(403)),
        ]));
        let e = engine_with_ttl(store.clone(), no_geo(), true, Duration::from_millis(1));

        let generic = e.evaluate("192.168.1.50", Action::Generic).await.unwrap();
        assert_eq!(generic, Decision::allow());

        // rule set has expired and the store is empty: only the cached resolution knows the rule
        store.replace(vec![]);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let login = e.evaluate("192.168.1.50", Action::Login).await.unwrap();
        assert_eq!(login.kind_str(), "login_deny");
        assert_eq!(login.status(), Some(403));
    }

    #[tokio::test]
    async fn without_decision_cache_expired_rules_are_refetched() {
        let store = Arc::new(StaticRuleStore::new(vec![
            Rule::new(Category::Blocklogin, Scope::IpSubnet, "192.168.1.0/24", Some(403)),
        ]));
        let e = engine_with_ttl(store.clone(), no_geo(), false, Duration::from_millis(1));

        let login = e.evaluate("192.168.1.50", Action::Login).await.unwrap();
        assert_eq!(login.kind_str(), "login_deny");

        store.replace(vec![]);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let login = e.evaluate("192.168.1.50", Action::Login).await.unwrap();
        assert_eq!(login, Decision::allow());
    }

    #[tokio::test]
    async fn store_failure_without_rule_set_is_an_error() {
        let e = engine(Arc::new(DownStore), no_geo(), true);

        let err = e.evaluate("8.8.8.8", Action::Generic).await.unwrap_err();
        assert!(matches!(err, RestrictError::StoreUnavailable(_)));
    }
}
