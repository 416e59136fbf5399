use std::net::IpAddr;

use pingora::http::RequestHeader;
use pingora_proxy::Session;

use crate::restrict::address::{client_addr_from_headers, normalize_client_addr, ForwardedTrust};

/// Request attributes the gate logs and evaluates.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub host: Option<String>,
    pub user_agent: Option<String>,
    /// Normalized client address; `None` when the request carries none.
    pub client_addr: Option<String>,
}

/// Client address extraction knobs.
#[derive(Debug, Clone)]
pub struct AddrPolicy {
    pub forwarded: ForwardedTrust,
    pub loopback_placeholder: IpAddr,
}

impl RequestContext {
    pub fn from_session(session: &Session, policy: &AddrPolicy) -> Self {
        let req = session.req_header();

        let peer = session
            .client_addr()
            .and_then(|a| a.to_string().parse::<std::net::SocketAddr>().ok())
            .map(|sa| sa.ip());

        let raw = client_addr_from_headers(
            header_str(req, "x-forwarded-for"),
            header_str(req, "x-real-ip"),
            peer,
            &policy.forwarded,
        );

        Self {
            method: req.method.to_string(),
            path: req.uri.path().to_string(),
            host: extract_host(req),
            user_agent: header_str(req, "user-agent").map(str::to_string),
            client_addr: raw.map(|a| normalize_client_addr(&a, policy.loopback_placeholder)),
        }
    }
}

fn header_str<'a>(req: &'a RequestHeader, name: &str) -> Option<&'a str> {
    req.headers.get(name).and_then(|v| v.to_str().ok())
}

fn extract_host(req: &RequestHeader) -> Option<String> {
    header_str(req, "host")
        .map(str::to_string)
        .or_else(|| req.uri.authority().map(|a| a.as_str().to_string()))
        .map(|h| h.trim().to_ascii_lowercase())
}
