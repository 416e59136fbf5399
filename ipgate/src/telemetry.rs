use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Filter directives: `RUST_LOG` when set and non-empty, else the configured level.
///
/// A bad `RUST_LOG` falls back to the configured level; a bad configured
/// level is a startup error.
pub fn build_filter(rust_log: Option<&str>, configured: &str) -> Result<EnvFilter> {
    if let Some(env) = rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        match EnvFilter::try_new(env) {
            Ok(f) => return Ok(f),
            Err(e) => eprintln!("ignoring RUST_LOG={env:?}: {e}"),
        }
    }
    EnvFilter::try_new(configured).with_context(|| format!("invalid log_level {configured:?}"))
}

/// Gate logs go to stdout and to `<log_dir>/<service>.jsonl` (hourly rolling).
///
/// JSON events are flattened so restriction fields (`client_ip`, `category`,
/// `scope`, `status`) sit at the top level of each line.
pub fn init_tracing(service: &str, log_dir: &Path, log_level: &str) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(rust_log.as_deref(), log_level)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::hourly(log_dir, format!("{service}.jsonl")));
    let _ = TRACING_GUARD.set(guard);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_writer(file_writer),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing already initialized: {e}"))?;

    tracing::info!(service, log_dir = %log_dir.display(), level = log_level, "logging started");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_wins_over_configured_level() {
        let f = build_filter(Some("ipgate::restrict=debug"), "warn").unwrap();
        assert_eq!(f.to_string(), "ipgate::restrict=debug");
    }

    #[test]
    fn blank_or_bad_rust_log_uses_configured_level() {
        let f = build_filter(Some("  "), "info,ipgate::restrict=debug").unwrap();
        assert!(f.to_string().contains("ipgate::restrict=debug"));

        let f = build_filter(Some("ipgate=loud"), "warn").unwrap();
        assert_eq!(f.to_string(), "warn");
    }

    #[test]
    fn bad_configured_level_is_an_error() {
        let err = build_filter(None, "ipgate=loud").unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }
}
