mod support;

use ipgate::restrict::{Action, Category, Decision, MatchedRule, Rule, Scope};
use support::{engine, engine_with_geo, test_geo, CountingStore};

#[tokio::test]
async fn whitelisted_ip_beats_global_blacklist() {
    let e = engine(vec![
        Rule::new(Category::Blacklist, Scope::All, "", Some(403)),
        Rule::new(Category::Whitelist, Scope::Ip, "8.8.8.8", None),
    ]);

    let d = e.evaluate("8.8.8.8", Action::Generic).await.unwrap();
    assert_eq!(d.kind_str(), "allow");
    assert_eq!(d.matched().map(|m| m.category), Some(Category::Whitelist));

    let d = e.evaluate("8.8.4.4", Action::Generic).await.unwrap();
    assert_eq!(d.kind_str(), "deny");
}

#[tokio::test]
async fn country_blacklist_denies_with_rule_status_or_403() {
    let e = engine(vec![Rule::new(Category::Blacklist, Scope::Country, "US", None)]);
    let d = e.evaluate("8.8.8.8", Action::Generic).await.unwrap();
    assert_eq!(d.status(), Some(403));
    assert_eq!(d.error_code().as_deref(), Some("authz.restrict.blacklist"));

    let e = engine(vec![Rule::new(Category::Blacklist, Scope::Country, "us", Some(451))]);
    let d = e.evaluate("8.8.8.8", Action::Login).await.unwrap();
    assert_eq!(d.kind_str(), "deny");
    assert_eq!(d.status(), Some(451));

    // DE address is untouched
    let d = e.evaluate("5.1.2.3", Action::Generic).await.unwrap();
    assert_eq!(d, Decision::allow());
}

#[tokio::test]
async fn blocklogin_subnet_only_blocks_login() {
    let e = engine(vec![Rule::new(
        Category::Blocklogin,
        Scope::IpSubnet,
        "192.168.1.0/24",
        Some(403),
    )]);

    let login = e.evaluate("192.168.1.50", Action::Login).await.unwrap();
    assert_eq!(login.kind_str(), "login_deny");
    assert_eq!(login.status(), Some(403));
    assert_eq!(login.error_code().as_deref(), Some("authz.restrict.blocklogin"));

    let generic = e.evaluate("192.168.1.50", Action::Generic).await.unwrap();
    assert_eq!(generic, Decision::allow());
}

#[tokio::test]
async fn disabled_rules_never_match() {
    let e = engine(vec![
        Rule::new(Category::Maintenance, Scope::All, "", Some(503)).disabled(),
        Rule::new(Category::Blacklist, Scope::Ip, "8.8.8.8", Some(403)).disabled(),
        Rule::new(Category::Blacklist, Scope::Continent, "EU", Some(403)),
    ]);

    assert_eq!(e.evaluate("8.8.8.8", Action::Generic).await.unwrap(), Decision::allow());
    assert_eq!(e.evaluate("5.6.7.8", Action::Generic).await.unwrap().kind_str(), "deny");
}

#[tokio::test]
async fn all_rules_disabled_allows_everything() {
    let e = engine(vec![
        Rule::new(Category::Maintenance, Scope::All, "", Some(503)).disabled(),
        Rule::new(Category::Blacklist, Scope::Country, "US", None).disabled(),
        Rule::new(Category::Blocklogin, Scope::IpSubnet, "0.0.0.0/0", None).disabled(),
    ]);

    for addr in ["8.8.8.8", "5.6.7.8", "10.0.0.1", "2001:db8::1", "unknown"] {
        for action in [Action::Generic, Action::Login] {
            assert_eq!(e.evaluate(addr, action).await.unwrap(), Decision::allow(), "{addr}");
        }
    }
}

#[tokio::test]
async fn repeated_evaluation_is_served_from_cache() {
    let store = CountingStore::new(vec![Rule::new(Category::Blacklist, Scope::Country, "US", Some(403))]);
    let geo = test_geo();
    let e = engine_with_geo(store.clone(), geo.clone(), true);

    let first = e.evaluate("8.8.8.8", Action::Generic).await.unwrap();
    let second = e.evaluate("8.8.8.8", Action::Generic).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.kind_str(), "deny");
    assert_eq!(store.fetches(), 1);
    // the second answer came from the decision cache, not a fresh resolution
    assert_eq!(geo.lookups(), 1);
}

#[tokio::test]
async fn without_decision_cache_every_evaluation_resolves() {
    let store = CountingStore::new(vec![Rule::new(Category::Blacklist, Scope::Country, "US", Some(403))]);
    let geo = test_geo();
    let e = engine_with_geo(store.clone(), geo.clone(), false);

    e.evaluate("8.8.8.8", Action::Generic).await.unwrap();
    e.evaluate("8.8.8.8", Action::Generic).await.unwrap();
    assert_eq!(store.fetches(), 1);
    assert_eq!(geo.lookups(), 2);
}

#[tokio::test]
async fn exact_match_reports_stored_rule() {
    let e = engine(vec![Rule::new(Category::Maintenance, Scope::Ip, "10.1.2.3", Some(503))]);

    let d = e.evaluate("10.1.2.3", Action::Generic).await.unwrap();
    assert_eq!(
        d.matched(),
        Some(&MatchedRule {
            category: Category::Maintenance,
            scope: Scope::Ip,
            value: "10.1.2.3".into(),
            status_code: Some(503),
        })
    );
}

#[tokio::test]
async fn malformed_subnet_falls_through() {
    let e = engine(vec![
        Rule::new(Category::Blacklist, Scope::IpSubnet, "not-a-cidr", Some(403)),
        Rule::new(Category::Blacklist, Scope::Country, "US", Some(451)),
    ]);

    let d = e.evaluate("8.8.8.8", Action::Generic).await.unwrap();
    assert_eq!(d.status(), Some(451));
    assert_eq!(d.matched().map(|m| m.scope), Some(Scope::Country));

    let d = e.evaluate("10.0.0.1", Action::Generic).await.unwrap();
    assert_eq!(d, Decision::allow());
}

#[tokio::test]
async fn global_maintenance_spares_whitelist() {
    let e = engine(vec![
        Rule::new(Category::Maintenance, Scope::All, "ignored", Some(503)),
        Rule::new(Category::Whitelist, Scope::IpSubnet, "10.0.0.0/8", None),
    ]);

    for addr in ["8.8.8.8", "5.6.7.8", "192.168.0.1", "unknown"] {
        let d = e.evaluate(addr, Action::Generic).await.unwrap();
        assert_eq!(d.kind_str(), "deny", "{addr}");
        assert_eq!(d.status(), Some(503));
        assert_eq!(d.error_code().as_deref(), Some("authz.restrict.maintenance"));
    }

    let d = e.evaluate("10.20.30.40", Action::Login).await.unwrap();
    assert_eq!(d.kind_str(), "allow");
}

#[tokio::test]
async fn continent_rules_apply() {
    let e = engine(vec![Rule::new(Category::Maintenance, Scope::Continent, "eu", Some(503))]);
    assert_eq!(e.evaluate("5.6.7.8", Action::Generic).await.unwrap().status(), Some(503));
    assert_eq!(e.evaluate("8.8.8.8", Action::Generic).await.unwrap(), Decision::allow());
}
