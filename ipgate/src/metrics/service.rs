use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use pingora::server::ShutdownWatch;
use pingora_core::services::background::BackgroundService;
use tokio::net::TcpListener;

use crate::restrict::rule_cache::RuleCache;

/// Admin listener: `/metrics` (Prometheus) and `/healthz` (rule set loaded).
#[derive(Clone)]
pub struct MetricsSvc {
    listen: String,
    rules: Arc<RuleCache>,
}

impl MetricsSvc {
    pub fn new(listen: impl Into<String>, rules: Arc<RuleCache>) -> Self {
        Self { listen: listen.into(), rules }
    }
}

#[async_trait]
impl BackgroundService for MetricsSvc {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        let listener = match TcpListener::bind(&self.listen).await {
            Ok(l) => {
                tracing::info!("metrics listening on {}", self.listen);
                l
            }
            Err(e) => {
                tracing::error!("metrics bind {} failed: {}", self.listen, e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("metrics service shutdown");
                    return;
                }
                res = listener.accept() => {
                    let (stream, _peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!("metrics accept error: {}", e);
                            continue;
                        }
                    };

                    let rules = self.rules.clone();
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let svc = service_fn(move |req| handle(req, rules.clone()));

                        let builder = hyper::server::conn::http1::Builder::new();
                        if let Err(e) = builder.serve_connection(io, svc).await {
                            tracing::warn!("metrics conn error: {}", e);
                        }
                    });
                }
            }
        }
    }
}

fn text_response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static(content_type));
    resp
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    rules: Arc<RuleCache>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let resp = match req.uri().path() {
        "/metrics" => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            crate::metrics::registry::gather_as_text(),
        ),
        "/healthz" => match rules.snapshot() {
            Some(rs) => text_response(
                StatusCode::OK,
                "text/plain; charset=utf-8",
                format!("ok rules={} built_at={}\n", rs.len(), rs.built_at().to_rfc3339()),
            ),
            None => text_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "text/plain; charset=utf-8",
                Bytes::from_static(b"rule set not loaded\n"),
            ),
        },
        _ => text_response(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", Bytes::from_static(b"not found")),
    };
    Ok(resp)
}
