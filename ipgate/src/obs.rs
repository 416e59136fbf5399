use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;

/// Two JSONL sinks: access + restriction events.
///
/// Active files (hourly rolling by tracing-appender):
/// - <log_dir>/access.jsonl
/// - <log_dir>/events.jsonl
#[derive(Clone)]
pub struct ObsSink {
    log_dir: PathBuf,
    access: NonBlocking,
    events: NonBlocking,
}

static ACCESS_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static EVENTS_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, Serialize)]
pub struct AccessLog {
    #[serde(rename = "@timestamp")]
    pub ts: DateTime<Utc>,
    pub request_id: String,
    /// generic | login | bypass
    pub action: String,
    /// allow | deny | login_deny | error | bypass
    pub decision: String,
    pub method: String,
    pub host: Option<String>,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    pub upstream: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub error: Option<String>,
}

/// One denied request and the rule that denied it.
#[derive(Debug, Clone, Serialize)]
pub struct RestrictionEvent {
    #[serde(rename = "@timestamp")]
    pub ts: DateTime<Utc>,
    pub request_id: String,
    pub client_ip: String,
    pub action: String,
    pub decision: String,
    pub category: String,
    pub scope: String,
    pub value: String,
    pub status: u16,
    pub method: String,
    pub path: String,
}

#[derive(Serialize)]
struct Line<'a, T> {
    dataset: &'static str,
    #[serde(flatten)]
    rec: &'a T,
}

impl ObsSink {
    pub fn new(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("create log_dir failed: {}", log_dir.display()))?;

        let access_appender = tracing_appender::rolling::hourly(log_dir, "access.jsonl");
        let events_appender = tracing_appender::rolling::hourly(log_dir, "events.jsonl");

        let (access, ag) = tracing_appender::non_blocking(access_appender);
        let (events, eg) = tracing_appender::non_blocking(events_appender);

        let _ = ACCESS_GUARD.set(ag);
        let _ = EVENTS_GUARD.set(eg);

        Ok(Self {
            log_dir: log_dir.to_path_buf(),
            access,
            events,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn write_access(&self, rec: &AccessLog) {
        write_line(&self.access, "access", rec);
    }

    pub fn write_event(&self, rec: &RestrictionEvent) {
        write_line(&self.events, "events", rec);
    }
}

fn write_line<T: Serialize>(sink: &NonBlocking, dataset: &'static str, rec: &T) {
    if let Ok(json) = serde_json::to_string(&Line { dataset, rec }) {
        let mut w = sink.make_writer();
        let _ = w.write_all(json.as_bytes());
        let _ = w.write_all(b"\n");
    }
}
