use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DENY_STATUS: u16 = 403;

/// Policy intent of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Whitelist,
    Maintenance,
    Blacklist,
    Blocklogin,
}

impl Category {
    /// Evaluation order. The first category with a match decides.
    pub const PRIORITY: [Category; 4] = [
        Category::Whitelist,
        Category::Maintenance,
        Category::Blacklist,
        Category::Blocklogin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Whitelist => "whitelist",
            Category::Maintenance => "maintenance",
            Category::Blacklist => "blacklist",
            Category::Blocklogin => "blocklogin",
        }
    }
}

/// Dimension a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    All,
    Ip,
    IpSubnet,
    Continent,
    Country,
}

impl Scope {
    /// Most specific address scopes first, geography last.
    pub const PRIORITY: [Scope; 5] = [
        Scope::All,
        Scope::Ip,
        Scope::IpSubnet,
        Scope::Continent,
        Scope::Country,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::All => "all",
            Scope::Ip => "ip",
            Scope::IpSubnet => "ip_subnet",
            Scope::Continent => "continent",
            Scope::Country => "country",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Category {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = s.trim();
        Category::PRIORITY
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(v))
            .ok_or_else(|| UnknownVariant { kind: "category", value: s.to_string() })
    }
}

impl FromStr for Scope {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = s.trim();
        Scope::PRIORITY
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(v))
            .ok_or_else(|| UnknownVariant { kind: "scope", value: s.to_string() })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single administrator-defined restriction as read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub category: Category,
    pub scope: Scope,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn new(category: Category, scope: Scope, value: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            category,
            scope,
            value: value.into(),
            status_code,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// The rule that produced a verdict, kept for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRule {
    pub category: Category,
    pub scope: Scope,
    pub value: String,
    pub status_code: Option<u16>,
}

impl MatchedRule {
    /// Stored status, or 403 when absent, zero, or not a final HTTP status.
    pub fn effective_status(&self) -> u16 {
        match self.status_code {
            Some(code) if (200..=599).contains(&code) => code,
            _ => DEFAULT_DENY_STATUS,
        }
    }

    pub fn reason(&self) -> String {
        format!("{}/{}: {}", self.category, self.scope, self.value)
    }
}

/// What the client is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Generic,
    Login,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Generic => "generic",
            Action::Login => "login",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// `matched` is set when a whitelist rule granted access explicitly.
    Allow { matched: Option<MatchedRule> },

    Deny { status: u16, matched: MatchedRule },

    LoginDeny { status: u16, matched: MatchedRule },
}

impl Decision {
    pub fn allow() -> Self {
        Self::Allow { matched: None }
    }

    /// Turn an address-level match into the verdict for `action`.
    pub fn from_match(matched: Option<MatchedRule>, action: Action) -> Self {
        let Some(m) = matched else {
            return Self::allow();
        };

        match m.category {
            Category::Whitelist => Self::Allow { matched: Some(m) },
            Category::Maintenance | Category::Blacklist => Self::Deny {
                status: m.effective_status(),
                matched: m,
            },
            Category::Blocklogin => match action {
                Action::Login => Self::LoginDeny {
                    status: m.effective_status(),
                    matched: m,
                },
                // blocklogin is the last category, so falling through ends in allow
                Action::Generic => Self::allow(),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Decision::Deny { .. } | Decision::LoginDeny { .. })
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Decision::Allow { .. } => "allow",
            Decision::Deny { .. } => "deny",
            Decision::LoginDeny { .. } => "login_deny",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Decision::Allow { .. } => None,
            Decision::Deny { status, .. } | Decision::LoginDeny { status, .. } => Some(*status),
        }
    }

    pub fn matched(&self) -> Option<&MatchedRule> {
        match self {
            Decision::Allow { matched } => matched.as_ref(),
            Decision::Deny { matched, .. } | Decision::LoginDeny { matched, .. } => Some(matched),
        }
    }

    /// Machine-readable identifier for denial responses, e.g. `authz.restrict.blacklist`.
    pub fn error_code(&self) -> Option<String> {
        if !self.is_terminal() {
            return None;
        }
        self.matched()
            .map(|m| format!("authz.restrict.{}", m.category))
    }
}
