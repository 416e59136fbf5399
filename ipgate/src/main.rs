use clap::Parser;
use pingora::prelude::*;
use pingora_proxy::http_proxy_service;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ipgate::config::{AppConfig, CacheConfig, GeoConfig, StoreConfig};
use ipgate::metrics::service::MetricsSvc;
use ipgate::obs::ObsSink;
use ipgate::restrict::backend::{CacheBackend, MemoryBackend, RedisBackend};
use ipgate::restrict::decision_cache::DecisionCache;
use ipgate::restrict::geo::{GeoResolver, MaxmindGeoResolver, NoGeoResolver, StaticGeoResolver};
use ipgate::restrict::rule_cache::RuleCache;
use ipgate::restrict::store::{FileRuleStore, RuleStore, SqlRuleStore, SqlStoreConfig};
use ipgate::restrict::update::{BackendPruner, RuleCacheRefresher};
use ipgate::restrict::RestrictionEngine;
use ipgate::server::context::AddrPolicy;
use ipgate::server::proxy::GateProxy;
use ipgate::server::routes::RouteTable;
use ipgate::upstream::pool::UpstreamPool;
use ipgate::{server, telemetry};

#[derive(Debug, Parser)]
#[command(name = "ipgate", version, about = "IP restriction gate (Pingora based)")]
struct Args {
    /// Path to config.yaml (relative paths inside config are resolved against this file's directory)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

fn locate_config(p: PathBuf) -> PathBuf {
    if p.exists() {
        return p;
    }

    // default name not in cwd: try next to the binary
    if p == Path::new("config.yaml") {
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let cand = dir.join("config.yaml");
                if cand.exists() {
                    return cand;
                }
            }
        }
    }

    p
}

fn build_geo(cfg: &GeoConfig) -> anyhow::Result<Arc<dyn GeoResolver>> {
    Ok(match cfg {
        GeoConfig::None => Arc::new(NoGeoResolver),
        GeoConfig::Static { entries } => Arc::new(StaticGeoResolver::new(entries)),
        GeoConfig::Maxmind { path: Some(path) } => Arc::new(MaxmindGeoResolver::from_file(path)?),
        GeoConfig::Maxmind { path: None } => {
            anyhow::bail!("geo.mode=maxmind needs geo.path or GEOIP_DB")
        }
    })
}

async fn build_store(cfg: &StoreConfig) -> anyhow::Result<Arc<dyn RuleStore>> {
    Ok(match cfg {
        StoreConfig::File { path } => Arc::new(FileRuleStore::new(path.clone())),
        StoreConfig::Sql {
            database_url,
            max_connections,
            connect_timeout_ms,
        } => {
            let Some(url) = database_url else {
                anyhow::bail!("store.mode=sql needs store.database_url or DATABASE_URL");
            };
            let mut sql_cfg = SqlStoreConfig::new(url.clone());
            if let Some(n) = max_connections {
                sql_cfg = sql_cfg.max_connections(*n);
            }
            if let Some(ms) = connect_timeout_ms {
                sql_cfg = sql_cfg.connect_timeout(Duration::from_millis(*ms));
            }
            Arc::new(SqlRuleStore::connect(sql_cfg).await?)
        }
    })
}

/// Backend for both cache tiers; the memory map is returned separately so it can be pruned.
async fn build_backend(cfg: &CacheConfig) -> anyhow::Result<(Arc<dyn CacheBackend>, Option<Arc<MemoryBackend>>)> {
    Ok(match cfg {
        CacheConfig::Memory => {
            let memory = Arc::new(MemoryBackend::new());
            (memory.clone(), Some(memory))
        }
        CacheConfig::Redis { url: Some(url) } => {
            let redis = RedisBackend::connect(url).await?;
            tracing::info!("redis cache backend connected");
            (Arc::new(redis), None)
        }
        CacheConfig::Redis { url: None } => {
            anyhow::bail!("cache.mode=redis needs cache.url or REDIS_URL")
        }
    })
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg_path = locate_config(args.config);
    let cfg_dir = cfg_path.parent().unwrap_or_else(|| Path::new("."));

    let cfg_text = fs::read_to_string(&cfg_path)?;
    let mut cfg = AppConfig::from_yaml(&cfg_text)?;
    cfg.resolve_paths(cfg_dir);
    cfg.apply_env();

    let log_dir = cfg.log_dir_path();
    telemetry::init_tracing("ipgate", &log_dir, cfg.log_level())?;
    let obs = ObsSink::new(&log_dir)?;

    let restrict_cfg = cfg.restrict.clone();
    let geo = build_geo(&cfg.geo)?;

    // Owns the SQL pool and Redis connection tasks; lives until the process exits.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("ipgate-store")
        .enable_all()
        .build()?;

    let store = rt.block_on(build_store(&cfg.store))?;

    let (backend, memory) = rt.block_on(build_backend(&cfg.cache))?;

    let rule_cache = Arc::new(RuleCache::new(
        store,
        Some(backend.clone()),
        restrict_cfg.rule_cache_config(),
    ));

    match rt.block_on(rule_cache.refresh()) {
        Ok(rs) => tracing::info!(rules = rs.len(), "rule set warmed"),
        Err(e) => tracing::warn!("rule set warm-up failed, will retry on demand: {}", e),
    }

    let decisions = restrict_cfg.decision_cache_enabled().then(|| {
        DecisionCache::new(
            backend.clone(),
            restrict_cfg.decision_cache_ttl(),
            restrict_cfg.cache_timeout(),
        )
    });

    let engine = Arc::new(RestrictionEngine::new(
        rule_cache.clone(),
        decisions,
        geo,
        restrict_cfg.geo_timeout(),
    ));

    let upstreams = Arc::new(UpstreamPool::new(cfg.upstreams.clone())?);
    tracing::info!(upstreams = upstreams.len(), "upstream pool ready");

    let mut my_server = Server::new(None)?;
    my_server.bootstrap();

    my_server.add_service(background_service(
        "metrics",
        MetricsSvc::new(cfg.metrics_addr(), rule_cache.clone()),
    ));

    my_server.add_service(background_service(
        "rule-cache-refresher",
        RuleCacheRefresher::new(rule_cache.clone(), restrict_cfg.rule_refresh_interval()),
    ));

    // redis expires keys itself
    if let Some(memory) = memory {
        my_server.add_service(background_service(
            "cache-pruner",
            BackendPruner::new(memory, Duration::from_secs(60)),
        ));
    }

    let proxy = GateProxy::new(
        engine,
        upstreams,
        RouteTable::new(restrict_cfg.bypass_paths(), restrict_cfg.login_paths()),
        AddrPolicy {
            forwarded: restrict_cfg.forwarded_trust(),
            loopback_placeholder: restrict_cfg.loopback_placeholder(),
        },
        obs,
    );

    let mut svc = http_proxy_service(&my_server.configuration, proxy);
    server::listener::add_http_listener(&mut svc, &cfg);
    my_server.add_service(svc);

    my_server.run_forever();
}
