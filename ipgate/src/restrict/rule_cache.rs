use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use tokio::sync::Mutex;

use super::backend::CacheBackend;
use super::error::RestrictError;
use super::ruleset::RuleSet;
use super::store::RuleStore;
use crate::metrics::counters;

/// Shared-backend key holding the serialized RuleSet.
pub const RULESET_CACHE_KEY: &str = "restrictions";

#[derive(Debug, Clone, Copy)]
pub struct RuleCacheConfig {
    pub ttl: Duration,
    /// How long past `ttl` a previous RuleSet may be served when a refresh
    /// fails. Zero means refresh failures always surface.
    pub stale_grace: Duration,
    pub store_timeout: Duration,
    pub backend_timeout: Duration,
}

impl Default for RuleCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            stale_grace: Duration::ZERO,
            store_timeout: Duration::from_secs(2),
            backend_timeout: Duration::from_millis(100),
        }
    }
}

/// TTL'd cache of the grouped rule set.
///
/// The in-process snapshot is swapped atomically; refreshes are serialized
/// so concurrent misses trigger a single store fetch.
pub struct RuleCache {
    store: Arc<dyn RuleStore>,
    backend: Option<Arc<dyn CacheBackend>>,
    current: ArcSwapOption<RuleSet>,
    refresh_lock: Mutex<()>,
    cfg: RuleCacheConfig,
}

impl RuleCache {
    pub fn new(
        store: Arc<dyn RuleStore>,
        backend: Option<Arc<dyn CacheBackend>>,
        cfg: RuleCacheConfig,
    ) -> Self {
        Self {
            store,
            backend,
            current: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
            cfg,
        }
    }

    pub fn config(&self) -> &RuleCacheConfig {
        &self.cfg
    }

    /// Current snapshot regardless of age.
    pub fn snapshot(&self) -> Option<Arc<RuleSet>> {
        self.current.load_full()
    }

    pub async fn get(&self) -> Result<Arc<RuleSet>, RestrictError> {
        if let Some(rs) = self.fresh_snapshot() {
            return Ok(rs);
        }

        let _guard = self.refresh_lock.lock().await;
        // a concurrent caller may have refreshed while we waited
        if let Some(rs) = self.fresh_snapshot() {
            return Ok(rs);
        }

        if let Some(rs) = self.load_from_backend().await {
            counters::inc_rule_cache_refresh("backend");
            self.current.store(Some(rs.clone()));
            return Ok(rs);
        }

        self.rebuild_locked().await
    }

    /// Rebuild from the store, bypassing both the snapshot and the backend.
    pub async fn refresh(&self) -> Result<Arc<RuleSet>, RestrictError> {
        let _guard = self.refresh_lock.lock().await;
        self.rebuild_locked().await
    }

    /// Release the store's connections. The current snapshot stays readable.
    pub async fn close(&self) {
        self.store.close().await;
    }

    fn fresh_snapshot(&self) -> Option<Arc<RuleSet>> {
        let rs = self.current.load_full()?;
        (rs.age(Utc::now()) < self.cfg.ttl).then_some(rs)
    }

    async fn rebuild_locked(&self) -> Result<Arc<RuleSet>, RestrictError> {
        match self.fetch_from_store().await {
            Ok(rs) => {
                counters::inc_rule_cache_refresh("store");
                tracing::debug!(rules = rs.len(), "rule set rebuilt from store");
                self.write_to_backend(&rs).await;
                self.current.store(Some(rs.clone()));
                Ok(rs)
            }
            Err(e) => {
                counters::inc_rule_cache_refresh("error");
                if let Some(old) = self.stale_within_grace() {
                    tracing::warn!(error = %e, built_at = %old.built_at(), "rule store refresh failed, serving previous rule set");
                    return Ok(old);
                }
                tracing::error!(error = %e, "rule store refresh failed");
                Err(e)
            }
        }
    }

    fn stale_within_grace(&self) -> Option<Arc<RuleSet>> {
        if self.cfg.stale_grace.is_zero() {
            return None;
        }
        let rs = self.current.load_full()?;
        (rs.age(Utc::now()) < self.cfg.ttl + self.cfg.stale_grace).then_some(rs)
    }

    async fn fetch_from_store(&self) -> Result<Arc<RuleSet>, RestrictError> {
        let rules = tokio::time::timeout(self.cfg.store_timeout, self.store.list_enabled_rules())
            .await
            .map_err(|_| {
                RestrictError::StoreUnavailable(format!(
                    "fetch timed out after {:?}",
                    self.cfg.store_timeout
                ))
            })??;

        Ok(Arc::new(RuleSet::from_rules(Utc::now(), rules)))
    }

    async fn load_from_backend(&self) -> Option<Arc<RuleSet>> {
        let backend = self.backend.as_ref()?;

        let bytes = match tokio::time::timeout(self.cfg.backend_timeout, backend.get(RULESET_CACHE_KEY)).await {
            Ok(Ok(Some(b))) => b,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "rule set backend read failed");
                return None;
            }
            Err(_) => {
                tracing::debug!("rule set backend read timed out");
                return None;
            }
        };

        let rs: RuleSet = match serde_json::from_slice(&bytes) {
            Ok(rs) => rs,
            Err(e) => {
                tracing::warn!(error = %e, "cached rule set undecodable, ignoring");
                return None;
            }
        };

        // the entry carries its own build time, never extend its life
        (rs.age(Utc::now()) < self.cfg.ttl).then(|| Arc::new(rs))
    }

    async fn write_to_backend(&self, rs: &RuleSet) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let bytes = match serde_json::to_vec(rs) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "rule set encode failed");
                return;
            }
        };

        match tokio::time::timeout(self.cfg.backend_timeout, backend.set(RULESET_CACHE_KEY, bytes, self.cfg.ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "rule set backend write failed"),
            Err(_) => tracing::debug!("rule set backend write timed out"),
        }
    }
}
