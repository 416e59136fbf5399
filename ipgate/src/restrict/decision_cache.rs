use std::sync::Arc;
use std::time::Duration;

use super::backend::CacheBackend;
use super::types::MatchedRule;
use crate::metrics::counters;

/// Stored for addresses that matched nothing.
const NONE_SENTINEL: &[u8] = b"none";

/// What the decision cache remembers about one address.
///
/// The action-independent resolution is stored rather than the final
/// verdict, so a cached generic allow never hides a login denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedResolution {
    Unrestricted,
    Matched(MatchedRule),
}

impl CachedResolution {
    pub fn from_match(m: Option<MatchedRule>) -> Self {
        match m {
            Some(m) => Self::Matched(m),
            None => Self::Unrestricted,
        }
    }

    pub fn into_match(self) -> Option<MatchedRule> {
        match self {
            Self::Unrestricted => None,
            Self::Matched(m) => Some(m),
        }
    }

    fn encode(&self) -> Option<Vec<u8>> {
        match self {
            Self::Unrestricted => Some(NONE_SENTINEL.to_vec()),
            Self::Matched(m) => serde_json::to_vec(m).ok(),
        }
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes == NONE_SENTINEL {
            return Some(Self::Unrestricted);
        }
        serde_json::from_slice(bytes).ok().map(Self::Matched)
    }
}

/// Per-address memo of resolutions, keyed `restriction:<address>`.
pub struct DecisionCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    timeout: Duration,
}

impl DecisionCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration, timeout: Duration) -> Self {
        Self { backend, ttl, timeout }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(addr: &str) -> String {
        format!("restriction:{addr}")
    }

    /// `None` is a miss. Backend failures and undecodable entries are misses too.
    pub async fn get(&self, addr: &str) -> Option<CachedResolution> {
        let key = Self::key(addr);
        let hit = match tokio::time::timeout(self.timeout, self.backend.get(&key)).await {
            Ok(Ok(Some(bytes))) => {
                let decoded = CachedResolution::decode(&bytes);
                if decoded.is_none() {
                    tracing::warn!(%key, "undecodable decision cache entry");
                }
                decoded
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                tracing::debug!(%key, error = %e, "decision cache read failed");
                None
            }
            Err(_) => {
                tracing::debug!(%key, "decision cache read timed out");
                None
            }
        };

        counters::inc_decision_cache(if hit.is_some() { "hit" } else { "miss" });
        hit
    }

    pub async fn put(&self, addr: &str, resolution: &CachedResolution) {
        let Some(bytes) = resolution.encode() else {
            return;
        };
        let key = Self::key(addr);
        match tokio::time::timeout(self.timeout, self.backend.set(&key, bytes, self.ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(%key, error = %e, "decision cache write failed"),
            Err(_) => tracing::debug!(%key, "decision cache write timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::restrict::backend::MemoryBackend;
    use crate::restrict::error::RestrictError;
    use crate::restrict::types::{Category, Scope};

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, RestrictError> {
            Err(RestrictError::backend("connection reset"))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), RestrictError> {
            Err(RestrictError::backend("connection reset"))
        }
    }

    fn cache(backend: Arc<dyn CacheBackend>) -> DecisionCache {
        DecisionCache::new(backend, Duration::from_secs(300), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn sentinel_distinguishes_unrestricted_from_absent() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new());
        let c = cache(backend.clone());

        assert_eq!(c.get("198.51.100.4").await, None);
        c.put("198.51.100.4", &CachedResolution::Unrestricted).await;
        assert_eq!(c.get("198.51.100.4").await, Some(CachedResolution::Unrestricted));
        assert_eq!(
            backend.get("restriction:198.51.100.4").await.unwrap().as_deref(),
            Some(&b"none"[..])
        );
    }

    #[tokio::test]
    async fn matched_rule_survives_the_backend() {
        let c = cache(Arc::new(MemoryBackend::new()));
        let m = MatchedRule {
            category: Category::Maintenance,
            scope: Scope::Continent,
            value: "EU".into(),
            status_code: Some(503),
        };
        c.put("5.6.7.8", &CachedResolution::Matched(m.clone())).await;
        assert_eq!(c.get("5.6.7.8").await, Some(CachedResolution::Matched(m)));
    }

    #[tokio::test]
    async fn backend_errors_are_misses() {
        let c = cache(Arc::new(BrokenBackend));
        c.put("1.1.1.1", &CachedResolution::Unrestricted).await;
        assert_eq!(c.get("1.1.1.1").await, None);
    }

    #[tokio::test]
    async fn garbage_entry_is_a_miss() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new());
        backend
            .set("restriction:2.2.2.2", b"{\"category\":".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache(backend).get("2.2.2.2").await, None);
    }
}
