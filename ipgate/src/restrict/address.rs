use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

/// Reserved documentation address (TEST-NET-3) substituted for `::1`.
pub const DEFAULT_LOOPBACK_PLACEHOLDER: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1));

/// Canonical client address string used for caching, matching and geography.
///
/// - surrounding whitespace is trimmed;
/// - IPv4-mapped IPv6 addresses (`::ffff:1.2.3.4`, `::ffff:102:304`) become
///   plain IPv4;
/// - the IPv6 loopback `::1` becomes `placeholder`, so local requests still
///   exercise country/continent rules;
/// - anything unparseable is passed through trimmed.
pub fn normalize_client_addr(raw: &str, placeholder: IpAddr) -> String {
    let s = raw.trim();
    match s.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) if v6 == Ipv6Addr::LOCALHOST => placeholder.to_string(),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        Ok(IpAddr::V4(v4)) => v4.to_string(),
        Err(_) => s.to_string(),
    }
}

/// Which forwarding headers are believed.
///
/// Off by default: the socket peer is the client. When enabled, headers are
/// honoured only from a peer inside `proxies` (any peer if the list is
/// empty), and X-Forwarded-For is walked from the right, skipping hops that
/// are themselves trusted proxies. The leftmost hops are client-supplied.
#[derive(Debug, Clone, Default)]
pub struct ForwardedTrust {
    pub enabled: bool,
    pub proxies: Vec<IpNet>,
}

impl ForwardedTrust {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn any_peer() -> Self {
        Self {
            enabled: true,
            proxies: Vec::new(),
        }
    }

    pub fn from_proxies(proxies: Vec<IpNet>) -> Self {
        Self { enabled: true, proxies }
    }

    fn is_proxy(&self, ip: IpAddr) -> bool {
        self.proxies.iter().any(|n| n.contains(&ip))
    }

    fn trusts_peer(&self, peer: Option<IpAddr>) -> bool {
        if !self.enabled {
            return false;
        }
        if self.proxies.is_empty() {
            return true;
        }
        peer.is_some_and(|ip| self.is_proxy(ip))
    }

    /// Rightmost X-Forwarded-For hop that is not a trusted proxy.
    fn pick_forwarded<'a>(&self, xff: &'a str) -> Option<&'a str> {
        let hops: Vec<&str> = xff.split(',').map(str::trim).filter(|h| !h.is_empty()).collect();
        for &hop in hops.iter().rev() {
            match hop.parse::<IpAddr>() {
                Ok(ip) if self.is_proxy(ip) => continue,
                _ => return Some(hop),
            }
        }
        // every hop is a proxy of ours: the first one saw the client
        hops.first().copied()
    }
}

/// Pick the raw client address for a request; `None` when nothing usable
/// is available.
pub fn client_addr_from_headers(
    x_forwarded_for: Option<&str>,
    x_real_ip: Option<&str>,
    peer: Option<IpAddr>,
    trust: &ForwardedTrust,
) -> Option<String> {
    if trust.trusts_peer(peer) {
        if let Some(v) = x_forwarded_for.and_then(|v| trust.pick_forwarded(v)) {
            return Some(v.to_string());
        }

        if let Some(v) = x_real_ip.map(str::trim).filter(|v| !v.is_empty()) {
            return Some(v.to_string());
        }
    }

    peer.map(|ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn strips_v4_mapped_prefix() {
        assert_eq!(normalize_client_addr("::ffff:192.168.1.50", DEFAULT_LOOPBACK_PLACEHOLDER), "192.168.1.50");
        assert_eq!(normalize_client_addr(" ::FFFF:10.0.0.1 ", DEFAULT_LOOPBACK_PLACEHOLDER), "10.0.0.1");
    }

    #[test]
    fn hex_mapped_form_becomes_ipv4() {
        assert_eq!(normalize_client_addr("::ffff:7f00:1", DEFAULT_LOOPBACK_PLACEHOLDER), "127.0.0.1");
        assert_eq!(normalize_client_addr("::ffff:c0a8:132", DEFAULT_LOOPBACK_PLACEHOLDER), "192.168.1.50");
    }

    #[test]
    fn ipv6_loopback_becomes_placeholder() {
        assert_eq!(normalize_client_addr("::1", DEFAULT_LOOPBACK_PLACEHOLDER), "203.0.113.1");
        assert_eq!(normalize_client_addr("0:0:0:0:0:0:0:1", DEFAULT_LOOPBACK_PLACEHOLDER), "203.0.113.1");
        let custom: IpAddr = "198.51.100.9".parse().unwrap();
        assert_eq!(normalize_client_addr("::1", custom), "198.51.100.9");
    }

    #[test]
    fn other_addresses_pass_through() {
        assert_eq!(normalize_client_addr("2001:db8::1", DEFAULT_LOOPBACK_PLACEHOLDER), "2001:db8::1");
        assert_eq!(normalize_client_addr("127.0.0.1", DEFAULT_LOOPBACK_PLACEHOLDER), "127.0.0.1");
        assert_eq!(normalize_client_addr("unknown", DEFAULT_LOOPBACK_PLACEHOLDER), "unknown");
    }

    #[test]
    fn headers_ignored_unless_trusted() {
        let a = client_addr_from_headers(Some("192.168.1.1"), Some("5.6.7.8"), ip("8.8.8.8"), &ForwardedTrust::disabled());
        assert_eq!(a.as_deref(), Some("8.8.8.8"));
        assert_eq!(client_addr_from_headers(None, None, None, &ForwardedTrust::disabled()), None);
    }

    #[test]
    fn spoofed_leftmost_hop_is_not_used() {
        // client sent "X-Forwarded-For: 192.168.1.1", the load balancer appended the real peer
        let a = client_addr_from_headers(Some("192.168.1.1, 8.8.8.8"), None, ip("10.0.0.2"), &ForwardedTrust::any_peer());
        assert_eq!(a.as_deref(), Some("8.8.8.8"));
    }

    #[test]
    fn trusted_proxy_hops_are_skipped() {
        let trust = ForwardedTrust::from_proxies(vec!["10.0.0.0/8".parse().unwrap()]);

        let a = client_addr_from_headers(Some("1.1.1.1, 8.8.8.8, 10.0.0.7"), None, ip("10.0.0.2"), &trust);
        assert_eq!(a.as_deref(), Some("8.8.8.8"));

        let a = client_addr_from_headers(Some("  "), Some("5.6.7.8"), ip("10.0.0.2"), &trust);
        assert_eq!(a.as_deref(), Some("5.6.7.8"));
    }

    #[test]
    fn headers_from_untrusted_peer_are_ignored() {
        let trust = ForwardedTrust::from_proxies(vec!["10.0.0.0/8".parse().unwrap()]);
        let a = client_addr_from_headers(Some("192.168.1.1"), Some("192.168.1.1"), ip("8.8.8.8"), &trust);
        assert_eq!(a.as_deref(), Some("8.8.8.8"));
    }
}
