use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use pingora::prelude::*;
use pingora_proxy::{ProxyHttp, Session};

use crate::metrics::counters;
use crate::obs::{AccessLog, ObsSink, RestrictionEvent};
use crate::restrict::{Action, Decision, RestrictionEngine};
use crate::server::context::{AddrPolicy, RequestContext};
use crate::server::response::{write_json_error, INTERNAL_ERROR_CODE};
use crate::server::routes::{Route, RouteTable};
use crate::upstream::pool::UpstreamPool;

/// Evaluated in place of a missing client address; only address-independent rules can match it.
const UNKNOWN_ADDR: &str = "unknown";

static REQ_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

fn gen_request_id() -> String {
    let n = REQ_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = Utc::now().timestamp_millis();
    format!("req-{}-{:x}", ts, n)
}

/// Reverse proxy that asks the restriction engine before forwarding.
#[derive(Clone)]
pub struct GateProxy {
    engine: Arc<RestrictionEngine>,
    upstreams: Arc<UpstreamPool>,
    routes: RouteTable,
    addr_policy: AddrPolicy,
    obs: ObsSink,
}

impl GateProxy {
    pub fn new(
        engine: Arc<RestrictionEngine>,
        upstreams: Arc<UpstreamPool>,
        routes: RouteTable,
        addr_policy: AddrPolicy,
        obs: ObsSink,
    ) -> Self {
        Self {
            engine,
            upstreams,
            routes,
            addr_policy,
            obs,
        }
    }

    fn log_event(&self, ctx: &GateCtx, rc: &RequestContext, addr: &str, action: Action, d: &Decision) {
        let (Some(m), Some(status)) = (d.matched(), d.status()) else {
            return;
        };
        self.obs.write_event(&RestrictionEvent {
            ts: Utc::now(),
            request_id: ctx.request_id.clone(),
            client_ip: addr.to_string(),
            action: action.as_str().to_string(),
            decision: d.kind_str().to_string(),
            category: m.category.to_string(),
            scope: m.scope.to_string(),
            value: m.value.clone(),
            status,
            method: rc.method.clone(),
            path: rc.path.clone(),
        });
    }
}

pub struct GateCtx {
    pub request_id: String,
    pub start: Instant,
    pub req: Option<RequestContext>,
    pub route: Option<Route>,
    /// allow | deny | login_deny | error | bypass
    pub outcome: &'static str,
    /// Set when the gate answered the request itself.
    pub status: Option<u16>,
    pub upstream: Option<String>,
}

impl Default for GateCtx {
    fn default() -> Self {
        Self {
            request_id: gen_request_id(),
            start: Instant::now(),
            req: None,
            route: None,
            outcome: "allow",
            status: None,
            upstream: None,
        }
    }
}

fn route_label(route: Option<Route>) -> &'static str {
    match route {
        Some(Route::Bypass) => "bypass",
        Some(Route::Check(a)) => a.as_str(),
        None => "unknown",
    }
}

#[async_trait]
impl ProxyHttp for GateProxy {
    type CTX = GateCtx;

    fn new_ctx(&self) -> Self::CTX {
        GateCtx::default()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> pingora::Result<bool> {
        let rc = RequestContext::from_session(session, &self.addr_policy);
        let route = self.routes.classify(&rc.path);
        ctx.route = Some(route);
        counters::on_req_start(route_label(ctx.route));

        let action = match route {
            Route::Bypass => {
                ctx.outcome = "bypass";
                ctx.req = Some(rc);
                return Ok(false);
            }
            Route::Check(action) => action,
        };

        let addr = rc.client_addr.clone().unwrap_or_else(|| UNKNOWN_ADDR.to_string());

        let decision = match self.engine.evaluate(&addr, action).await {
            Ok(d) => d,
            Err(e) => {
                counters::inc_eval_error();
                tracing::error!(client_ip = %addr, action = action.as_str(), error = %e, "restriction evaluation failed");
                ctx.outcome = "error";
                ctx.status = Some(500);
                ctx.req = Some(rc);
                write_json_error(session, 500, INTERNAL_ERROR_CODE, &ctx.request_id).await?;
                return Ok(true);
            }
        };

        ctx.outcome = decision.kind_str();
        let blocked = match (decision.status(), decision.error_code()) {
            (Some(status), Some(code)) => {
                self.log_event(ctx, &rc, &addr, action, &decision);
                ctx.status = Some(status);
                write_json_error(session, status, &code, &ctx.request_id).await?;
                true
            }
            _ => false,
        };

        ctx.req = Some(rc);
        Ok(blocked)
    }

    async fn upstream_peer(&self, _session: &mut Session, ctx: &mut Self::CTX) -> pingora::Result<Box<HttpPeer>> {
        let selected = self.upstreams.pick();
        ctx.upstream = Some(selected.to_string());
        Ok(Box::new(UpstreamPool::build_peer(selected)))
    }

    async fn logging(&self, session: &mut Session, err: Option<&pingora::Error>, ctx: &mut Self::CTX) {
        let elapsed = ctx.start.elapsed();
        counters::on_req_end(ctx.outcome, elapsed.as_secs_f64());

        let status = ctx
            .status
            .or_else(|| session.response_written().map(|r| r.status.as_u16()))
            .unwrap_or(0);

        let req = session.req_header();
        let (method, path, host, client_ip, user_agent) = match ctx.req.take() {
            Some(rc) => (rc.method, rc.path, rc.host, rc.client_addr, rc.user_agent),
            None => (req.method.to_string(), req.uri.path().to_string(), None, None, None),
        };

        self.obs.write_access(&AccessLog {
            ts: Utc::now(),
            request_id: ctx.request_id.clone(),
            action: route_label(ctx.route).to_string(),
            decision: ctx.outcome.to_string(),
            method,
            host,
            path,
            status,
            latency_ms: elapsed.as_millis() as u64,
            upstream: ctx.upstream.clone(),
            client_ip,
            user_agent,
            error: err.map(|e| e.to_string()),
        });
    }
}
