//! Rule store adapters.
//!
//! Adapters only read enabled rules in a stable store order. Grouping,
//! caching and matching live elsewhere.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use super::error::RestrictError;
use super::types::{Category, Rule, Scope};

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All enabled rules, in store order.
    async fn list_enabled_rules(&self) -> Result<Vec<Rule>, RestrictError>;

    /// Release connections. Default does nothing.
    async fn close(&self) {}
}

#[async_trait]
impl<S: RuleStore + ?Sized> RuleStore for Arc<S> {
    async fn list_enabled_rules(&self) -> Result<Vec<Rule>, RestrictError> {
        (**self).list_enabled_rules().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

/// Database flavour, selects the query dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if url.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    fn list_enabled_query(&self) -> &'static str {
        match self {
            // category/scope/state are enum columns on postgres
            DatabaseType::PostgreSQL => {
                "SELECT category::text AS category, scope::text AS scope, value, code \
                 FROM restrictions WHERE state::text = 'enabled' ORDER BY id"
            }
            DatabaseType::MySQL | DatabaseType::SQLite => {
                "SELECT category, scope, value, code \
                 FROM restrictions WHERE state = 'enabled' ORDER BY id"
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqlStoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl SqlStoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 5,
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }

    pub fn connect_timeout(mut self, t: Duration) -> Self {
        self.connect_timeout = t;
        self
    }
}

/// `restrictions` table reader over a SQLx pool (Postgres, MySQL, SQLite).
pub struct SqlRuleStore {
    pool: AnyPool,
    db_type: DatabaseType,
}

impl SqlRuleStore {
    pub async fn connect(config: SqlStoreConfig) -> Result<Self, RestrictError> {
        sqlx::any::install_default_drivers();

        let db_type = DatabaseType::from_url(&config.database_url)
            .ok_or_else(|| RestrictError::store("unsupported database URL scheme"))?;

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.database_url)
            .await?;

        tracing::info!(?db_type, "rule store connected");
        Ok(Self { pool, db_type })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    fn parse_row(row: &AnyRow) -> Option<Rule> {
        let category: String = row.try_get("category").ok()?;
        let scope: String = row.try_get("scope").ok()?;

        let (category, scope) = match (category.parse::<Category>(), scope.parse::<Scope>()) {
            (Ok(c), Ok(s)) => (c, s),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "skipping restriction row");
                return None;
            }
        };

        let value: String = row
            .try_get::<Option<String>, _>("value")
            .ok()
            .flatten()
            .unwrap_or_default();

        let code = row
            .try_get::<Option<i64>, _>("code")
            .or_else(|_| row.try_get::<Option<i32>, _>("code").map(|v| v.map(i64::from)))
            .ok()
            .flatten()
            .and_then(|c| u16::try_from(c).ok());

        Some(Rule {
            category,
            scope,
            value,
            status_code: code,
            enabled: true,
        })
    }
}

#[async_trait]
impl RuleStore for SqlRuleStore {
    async fn list_enabled_rules(&self) -> Result<Vec<Rule>, RestrictError> {
        let rows = sqlx::query(self.db_type.list_enabled_query())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(Self::parse_row).collect())
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("rule store closed");
    }
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<Rule>,
}

/// YAML rule list, re-read on every fetch.
pub struct FileRuleStore {
    path: PathBuf,
}

impl FileRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RuleStore for FileRuleStore {
    async fn list_enabled_rules(&self) -> Result<Vec<Rule>, RestrictError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            RestrictError::StoreUnavailable(format!("read {} failed: {e}", self.path.display()))
        })?;
        let f: RulesFile = serde_yaml::from_slice(&bytes).map_err(|e| {
            RestrictError::StoreUnavailable(format!("parse {} failed: {e}", self.path.display()))
        })?;

        Ok(f.rules.into_iter().filter(|r| r.enabled).collect())
    }
}

/// In-memory rule list.
pub struct StaticRuleStore {
    rules: ArcSwap<Vec<Rule>>,
}

impl StaticRuleStore {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    pub fn replace(&self, rules: Vec<Rule>) {
        self.rules.store(Arc::new(rules));
    }
}

#[async_trait]
impl RuleStore for StaticRuleStore {
    async fn list_enabled_rules(&self) -> Result<Vec<Rule>, RestrictError> {
        Ok(self
            .rules
            .load()
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }
}
