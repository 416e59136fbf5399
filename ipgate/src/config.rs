use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::IpNet;

use crate::restrict::address::{ForwardedTrust, DEFAULT_LOOPBACK_PLACEHOLDER};
use crate::restrict::geo::StaticGeoEntry;
use crate::restrict::rule_cache::RuleCacheConfig;

pub const DEFAULT_BYPASS_PATH: &str = "/api/v2/barong/identity/users/access";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub metrics_listen: Option<String>,
    pub http_listen: Option<String>,

    /// Directory to write JSONL logs (app/access/events).
    /// Default: ./logs
    pub log_dir: Option<PathBuf>,

    /// Filter directives used when RUST_LOG is unset. Default: info
    pub log_level: Option<String>,

    /// Protected service, round-robin when several are listed.
    pub upstreams: Vec<String>,

    pub store: StoreConfig,

    #[serde(default)]
    pub geo: GeoConfig,

    /// Backing store for the rule set and per-address decisions.
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub restrict: RestrictConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StoreConfig {
    /// `restrictions` table. URL falls back to $DATABASE_URL.
    Sql {
        database_url: Option<String>,
        max_connections: Option<u32>,
        connect_timeout_ms: Option<u64>,
    },

    /// YAML rule list, re-read on every rule cache refresh.
    File { path: PathBuf },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum GeoConfig {
    #[default]
    None,

    /// MaxMind country/city database. Path falls back to $GEOIP_DB.
    Maxmind { path: Option<PathBuf> },

    /// Fixed CIDR table (local testing).
    Static { entries: Vec<StaticGeoEntry> },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CacheConfig {
    /// Per-process map; each gate instance keeps its own.
    #[default]
    Memory,

    /// Shared across gate instances. URL falls back to $REDIS_URL.
    Redis { url: Option<String> },
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RestrictConfig {
    pub rule_cache_ttl_secs: Option<u64>,
    pub rule_cache_stale_grace_secs: Option<u64>,
    /// Background rebuild interval. Default: rule cache TTL.
    pub rule_refresh_secs: Option<u64>,

    pub decision_cache_enabled: Option<bool>,
    pub decision_cache_ttl_secs: Option<u64>,

    pub store_timeout_ms: Option<u64>,
    pub geo_timeout_ms: Option<u64>,
    pub cache_timeout_ms: Option<u64>,

    /// Paths never subject to restriction checks.
    pub bypass_paths: Option<Vec<String>>,
    /// Paths treated as login requests (blocklogin applies).
    pub login_paths: Option<Vec<String>>,

    /// Believe X-Forwarded-For / X-Real-IP. Default: false (socket peer only).
    pub trust_forwarded_headers: Option<bool>,
    /// Peers allowed to set forwarding headers; empty means any peer.
    pub trusted_proxies: Option<Vec<IpNet>>,
    pub loopback_placeholder: Option<IpAddr>,
}

impl RestrictConfig {
    pub fn rule_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.rule_cache_ttl_secs.unwrap_or(300))
    }

    pub fn rule_refresh_interval(&self) -> Duration {
        self.rule_refresh_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.rule_cache_ttl())
    }

    pub fn decision_cache_enabled(&self) -> bool {
        self.decision_cache_enabled.unwrap_or(true)
    }

    pub fn decision_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.decision_cache_ttl_secs.unwrap_or(300))
    }

    pub fn geo_timeout(&self) -> Duration {
        Duration::from_millis(self.geo_timeout_ms.unwrap_or(200))
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms.unwrap_or(100))
    }

    pub fn rule_cache_config(&self) -> RuleCacheConfig {
        RuleCacheConfig {
            ttl: self.rule_cache_ttl(),
            stale_grace: Duration::from_secs(self.rule_cache_stale_grace_secs.unwrap_or(0)),
            store_timeout: Duration::from_millis(self.store_timeout_ms.unwrap_or(2000)),
            backend_timeout: self.cache_timeout(),
        }
    }

    pub fn bypass_paths(&self) -> Vec<String> {
        self.bypass_paths
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_BYPASS_PATH.to_string()])
    }

    pub fn login_paths(&self) -> Vec<String> {
        self.login_paths
            .clone()
            .unwrap_or_else(|| vec!["/login".to_string()])
    }

    pub fn trust_forwarded_headers(&self) -> bool {
        self.trust_forwarded_headers.unwrap_or(false)
    }

    pub fn forwarded_trust(&self) -> ForwardedTrust {
        if !self.trust_forwarded_headers() {
            return ForwardedTrust::disabled();
        }
        ForwardedTrust::from_proxies(self.trusted_proxies.clone().unwrap_or_default())
    }

    pub fn loopback_placeholder(&self) -> IpAddr {
        self.loopback_placeholder.unwrap_or(DEFAULT_LOOPBACK_PLACEHOLDER)
    }
}

impl AppConfig {
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = serde_yaml::from_str(text)?;
        if cfg.upstreams.is_empty() {
            anyhow::bail!("upstreams cannot be empty");
        }
        Ok(cfg)
    }

    pub fn metrics_addr(&self) -> String {
        self.metrics_listen
            .clone()
            .unwrap_or_else(|| "0.0.0.0:9100".to_string())
    }

    pub fn listen_http_addr(&self) -> String {
        self.http_listen
            .clone()
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(crate::telemetry::DEFAULT_LOG_LEVEL)
    }

    pub fn log_dir_path(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("logs"))
    }

    /// Resolve all relative paths in config based on the directory containing the config file.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        if let Some(p) = &self.log_dir {
            self.log_dir = Some(resolve_path(base_dir, p));
        }

        if let StoreConfig::File { path } = &mut self.store {
            *path = resolve_path(base_dir, path);
        }
        if let GeoConfig::Maxmind { path: Some(p) } = &mut self.geo {
            *p = resolve_path(base_dir, p);
        }
    }

    /// Fill values left out of the file from the environment.
    pub fn apply_env(&mut self) {
        if let StoreConfig::Sql { database_url, .. } = &mut self.store {
            if database_url.is_none() {
                *database_url = std::env::var("DATABASE_URL").ok();
            }
        }
        if let GeoConfig::Maxmind { path } = &mut self.geo {
            if path.is_none() {
                *path = std::env::var_os("GEOIP_DB").map(PathBuf::from);
            }
        }
        if let CacheConfig::Redis { url } = &mut self.cache {
            if url.is_none() {
                *url = std::env::var("REDIS_URL").ok();
            }
        }
    }
}

fn resolve_path(base_dir: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}
