//! Geography resolution: address -> {country, continent}.
//!
//! Resolvers never fail. Anything they cannot answer is `None`, which the
//! engine treats as empty country/continent.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use maxminddb::{geoip2, Reader};
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Geo {
    /// ISO 3166-1 alpha-2, upper case.
    pub country: String,
    /// Two-letter continent code (EU, NA, AS, ...), upper case.
    pub continent: String,
}

#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, addr: &str) -> Option<Geo>;
}

#[async_trait]
impl<G: GeoResolver + ?Sized> GeoResolver for Arc<G> {
    async fn resolve(&self, addr: &str) -> Option<Geo> {
        (**self).resolve(addr).await
    }
}

/// MaxMind country or city database.
pub struct MaxmindGeoResolver {
    reader: Reader<Vec<u8>>,
}

impl MaxmindGeoResolver {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let reader = Reader::open_readfile(path)
            .map_err(|e| anyhow::anyhow!("failed to open GeoIP database {}: {e}", path.display()))?;
        Ok(Self { reader })
    }

    pub fn lookup(&self, ip: IpAddr) -> Option<Geo> {
        // Country and City records share the country/continent layout
        let (country, continent) = match self.reader.lookup::<geoip2::Country>(ip) {
            Ok(rec) => (
                rec.country.and_then(|c| c.iso_code),
                rec.continent.and_then(|c| c.code),
            ),
            Err(_) => {
                let rec = self.reader.lookup::<geoip2::City>(ip).ok()?;
                (
                    rec.country.and_then(|c| c.iso_code),
                    rec.continent.and_then(|c| c.code),
                )
            }
        };

        if country.is_none() && continent.is_none() {
            return None;
        }
        Some(Geo {
            country: country.unwrap_or_default().to_ascii_uppercase(),
            continent: continent.unwrap_or_default().to_ascii_uppercase(),
        })
    }
}

impl std::fmt::Debug for MaxmindGeoResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxmindGeoResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl GeoResolver for MaxmindGeoResolver {
    async fn resolve(&self, addr: &str) -> Option<Geo> {
        let ip = addr.trim().parse::<IpAddr>().ok()?;
        self.lookup(ip)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticGeoEntry {
    pub cidr: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub continent: String,
}

/// Fixed CIDR -> geography table, first match wins.
#[derive(Debug, Default)]
pub struct StaticGeoResolver {
    entries: Vec<(IpNet, Geo)>,
}

impl StaticGeoResolver {
    pub fn new(entries: &[StaticGeoEntry]) -> Self {
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            let net = e
                .cidr
                .parse::<IpNet>()
                .ok()
                .or_else(|| e.cidr.parse::<IpAddr>().ok().map(IpNet::from));
            let Some(net) = net else {
                tracing::warn!(cidr = %e.cidr, "static geo entry ignored: bad cidr");
                continue;
            };
            out.push((
                net,
                Geo {
                    country: e.country.to_ascii_uppercase(),
                    continent: e.continent.to_ascii_uppercase(),
                },
            ));
        }
        Self { entries: out }
    }
}

#[async_trait]
impl GeoResolver for StaticGeoResolver {
    async fn resolve(&self, addr: &str) -> Option<Geo> {
        let ip = addr.trim().parse::<IpAddr>().ok()?;
        self.entries
            .iter()
            .find(|(net, _)| net.contains(&ip))
            .map(|(_, g)| g.clone())
    }
}

/// Geography disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeoResolver;

#[async_trait]
impl GeoResolver for NoGeoResolver {
    async fn resolve(&self, _addr: &str) -> Option<Geo> {
        None
    }
}
