use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pingora::server::ShutdownWatch;
use pingora_core::services::background::BackgroundService;

use super::backend::MemoryBackend;
use super::rule_cache::RuleCache;

/// Rebuilds the rule set on an interval so requests rarely pay for a refresh.
/// A failed rebuild keeps the previous snapshot. Closes the rule store on shutdown.
pub struct RuleCacheRefresher {
    cache: Arc<RuleCache>,
    interval: Duration,
}

impl RuleCacheRefresher {
    pub fn new(cache: Arc<RuleCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }
}

#[async_trait]
impl BackgroundService for RuleCacheRefresher {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_secs(1)));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("rule cache refresher shutdown");
                    self.cache.close().await;
                    return;
                }
                _ = ticker.tick() => {
                    match self.cache.refresh().await {
                        Ok(rs) => tracing::info!(rules = rs.len(), "rule set refreshed"),
                        Err(e) => tracing::error!("rule set refresh failed (keep old): {}", e),
                    }
                }
            }
        }
    }
}

/// Evicts expired entries from the in-process cache backend.
pub struct BackendPruner {
    backend: Arc<MemoryBackend>,
    interval: Duration,
}

impl BackendPruner {
    pub fn new(backend: Arc<MemoryBackend>, interval: Duration) -> Self {
        Self { backend, interval }
    }
}

#[async_trait]
impl BackgroundService for BackendPruner {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_secs(1)));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("cache pruner shutdown");
                    return;
                }
                _ = ticker.tick() => {
                    let removed = self.backend.prune_expired();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.backend.len(), "cache entries pruned");
                    }
                }
            }
        }
    }
}
