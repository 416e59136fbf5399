use std::sync::atomic::{AtomicUsize, Ordering};

use http::Uri;
use pingora::prelude::HttpPeer;

/// Protected service endpoints, picked round-robin.
pub struct UpstreamPool {
    upstreams: Vec<String>,
    rr: AtomicUsize,
}

impl UpstreamPool {
    pub fn new(upstreams: Vec<String>) -> anyhow::Result<Self> {
        if upstreams.is_empty() {
            anyhow::bail!("upstreams cannot be empty");
        }
        Ok(Self {
            upstreams,
            rr: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    pub fn pick(&self) -> &str {
        let i = self.rr.fetch_add(1, Ordering::Relaxed) % self.upstreams.len();
        &self.upstreams[i]
    }

    /// `host:port`, or a `http(s)://` URI with the port defaulted from the scheme.
    pub fn build_peer(upstream: &str) -> HttpPeer {
        if let Ok(uri) = upstream.parse::<Uri>() {
            if let Some(auth) = uri.authority() {
                let tls = uri
                    .scheme_str()
                    .map(|s| s.eq_ignore_ascii_case("https"))
                    .unwrap_or(false);
                let host = auth.host();

                let mut addr = auth.as_str().to_string();
                if auth.port_u16().is_none() {
                    addr.push_str(if tls { ":443" } else { ":80" });
                }

                // no SNI for IP literals
                let sni = match host.parse::<std::net::IpAddr>() {
                    Ok(_) => String::new(),
                    Err(_) => host.to_string(),
                };
                return HttpPeer::new(addr, tls, sni);
            }
        }
        HttpPeer::new(upstream.to_string(), false, String::new())
    }
}
