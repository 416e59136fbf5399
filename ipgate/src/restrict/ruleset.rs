use std::net::IpAddr;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use super::types::{Category, MatchedRule, Rule, Scope};

/// Stored `(value, status_code)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub value: String,
    pub status_code: Option<u16>,
}

/// `ip_subnet` entry with its network compiled once per build.
///
/// Serialized as the plain entry; the network is recompiled on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RuleEntry", into = "RuleEntry")]
pub struct SubnetEntry {
    entry: RuleEntry,
    net: Option<IpNet>,
}

impl SubnetEntry {
    fn contains(&self, ip: Option<IpAddr>) -> bool {
        match (self.net, ip) {
            (Some(net), Some(ip)) => net.contains(&ip),
            _ => false,
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.net.is_none()
    }
}

impl From<RuleEntry> for SubnetEntry {
    fn from(entry: RuleEntry) -> Self {
        let net = parse_subnet(&entry.value);
        Self { entry, net }
    }
}

impl From<SubnetEntry> for RuleEntry {
    fn from(s: SubnetEntry) -> Self {
        s.entry
    }
}

/// CIDR, or a bare address taken as a single-host network.
fn parse_subnet(value: &str) -> Option<IpNet> {
    let v = value.trim();
    v.parse::<IpNet>()
        .ok()
        .or_else(|| v.parse::<IpAddr>().ok().map(IpNet::from))
}

/// What a request is matched against: its address and derived geography.
#[derive(Debug, Clone)]
pub struct Subject<'a> {
    pub addr: &'a str,
    pub ip: Option<IpAddr>,
    pub country: &'a str,
    pub continent: &'a str,
}

impl<'a> Subject<'a> {
    pub fn new(addr: &'a str, country: &'a str, continent: &'a str) -> Self {
        Self {
            addr,
            ip: addr.trim().parse().ok(),
            country,
            continent,
        }
    }

    fn same_ip(&self, value: &str) -> bool {
        let v = value.trim();
        match (self.ip, v.parse::<IpAddr>()) {
            (Some(a), Ok(b)) => a == b,
            _ => v.eq_ignore_ascii_case(self.addr.trim()),
        }
    }
}

fn geo_eq(value: &str, geo: &str) -> bool {
    !geo.is_empty() && value.trim().eq_ignore_ascii_case(geo)
}

/// Rules of one category, one ordered list per scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryRules {
    pub all: Vec<RuleEntry>,
    pub ip: Vec<RuleEntry>,
    pub ip_subnet: Vec<SubnetEntry>,
    pub continent: Vec<RuleEntry>,
    pub country: Vec<RuleEntry>,
}

impl CategoryRules {
    fn push(&mut self, scope: Scope, entry: RuleEntry) {
        match scope {
            Scope::All => self.all.push(entry),
            Scope::Ip => self.ip.push(entry),
            Scope::IpSubnet => self.ip_subnet.push(SubnetEntry::from(entry)),
            Scope::Continent => self.continent.push(entry),
            Scope::Country => self.country.push(entry),
        }
    }

    /// First stored entry of `scope` matching `subject`.
    fn first_match(&self, scope: Scope, subject: &Subject<'_>) -> Option<&RuleEntry> {
        match scope {
            Scope::All => self.all.first(),
            Scope::Ip => self.ip.iter().find(|e| subject.same_ip(&e.value)),
            Scope::IpSubnet => self
                .ip_subnet
                .iter()
                .find(|e| e.contains(subject.ip))
                .map(|e| &e.entry),
            Scope::Continent => self.continent.iter().find(|e| geo_eq(&e.value, subject.continent)),
            Scope::Country => self.country.iter().find(|e| geo_eq(&e.value, subject.country)),
        }
    }

    fn len(&self) -> usize {
        self.all.len() + self.ip.len() + self.ip_subnet.len() + self.continent.len() + self.country.len()
    }
}

/// Materialized view of all enabled rules, grouped by category then scope.
///
/// Immutable once built; replaced wholesale on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    built_at: DateTime<Utc>,
    whitelist: CategoryRules,
    maintenance: CategoryRules,
    blacklist: CategoryRules,
    blocklogin: CategoryRules,
}

impl RuleSet {
    pub fn empty(built_at: DateTime<Utc>) -> Self {
        Self {
            built_at,
            whitelist: CategoryRules::default(),
            maintenance: CategoryRules::default(),
            blacklist: CategoryRules::default(),
            blocklogin: CategoryRules::default(),
        }
    }

    /// Group `rules` preserving store order. Disabled rules are dropped.
    pub fn from_rules(built_at: DateTime<Utc>, rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut rs = Self::empty(built_at);

        for r in rules {
            if !r.enabled {
                continue;
            }
            let entry = RuleEntry {
                value: r.value,
                status_code: r.status_code,
            };
            rs.category_mut(r.category).push(r.scope, entry);
        }

        for category in Category::PRIORITY {
            for s in rs.category(category).ip_subnet.iter().filter(|s| s.is_malformed()) {
                tracing::warn!(
                    category = %category,
                    value = %s.entry.value,
                    "malformed ip_subnet rule value, rule skipped"
                );
                crate::metrics::counters::inc_malformed_rule(category.as_str());
            }
        }

        rs
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Time since build, zero if the clock went backwards.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.built_at).to_std().unwrap_or_default()
    }

    pub fn category(&self, category: Category) -> &CategoryRules {
        match category {
            Category::Whitelist => &self.whitelist,
            Category::Maintenance => &self.maintenance,
            Category::Blacklist => &self.blacklist,
            Category::Blocklogin => &self.blocklogin,
        }
    }

    fn category_mut(&mut self, category: Category) -> &mut CategoryRules {
        match category {
            Category::Whitelist => &mut self.whitelist,
            Category::Maintenance => &mut self.maintenance,
            Category::Blacklist => &mut self.blacklist,
            Category::Blocklogin => &mut self.blocklogin,
        }
    }

    pub fn len(&self) -> usize {
        Category::PRIORITY.iter().map(|c| self.category(*c).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Matched rule of `category`: first scope (in priority order) with a
    /// matching entry, first stored entry within that scope.
    pub fn find_match(&self, category: Category, subject: &Subject<'_>) -> Option<MatchedRule> {
        let rules = self.category(category);
        Scope::PRIORITY.into_iter().find_map(|scope| {
            rules.first_match(scope, subject).map(|e| MatchedRule {
                category,
                scope,
                value: e.value.clone(),
                status_code: e.status_code,
            })
        })
    }

    /// Address-level resolution: the match of the first category (in
    /// priority order) that has one.
    pub fn resolve(&self, subject: &Subject<'_>) -> Option<MatchedRule> {
        Category::PRIORITY
            .into_iter()
            .find_map(|category| self.find_match(category, subject))
    }

    pub fn has_subnet_rules(&self) -> bool {
        Category::PRIORITY
            .iter()
            .any(|c| !self.category(*c).ip_subnet.is_empty())
    }
}
