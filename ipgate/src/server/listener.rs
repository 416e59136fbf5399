use pingora_core::services::listening::Service;
use pingora_proxy::HttpProxy;

use crate::config::AppConfig;
use crate::server::proxy::GateProxy;

/// Plain HTTP listener; TLS is terminated in front of the gate.
pub fn add_http_listener(svc: &mut Service<HttpProxy<GateProxy>>, cfg: &AppConfig) {
    let http_listen = cfg.listen_http_addr();
    tracing::info!(listen = %http_listen, "http listener");
    svc.add_tcp(&http_listen);
}
