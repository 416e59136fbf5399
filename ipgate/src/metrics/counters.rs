use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

pub static REQ_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ipgate_http_requests_total",
        "Total HTTP requests seen by the gate",
        &["action"]
    )
        .expect("register ipgate_http_requests_total")
});

pub static INFLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "ipgate_http_inflight",
        "In-flight HTTP requests"
    )
        .expect("register ipgate_http_inflight")
});

pub static REQ_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0];
    register_histogram_vec!(
        "ipgate_http_request_duration_seconds",
        "End-to-end request duration in seconds",
        &["outcome"],
        buckets
    )
        .expect("register ipgate_http_request_duration_seconds")
});

pub static DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ipgate_decisions_total",
        "Decisions made by the restriction engine",
        &["outcome", "category", "source"]
    )
        .expect("register ipgate_decisions_total")
});

pub static RULE_CACHE_REFRESH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ipgate_rule_cache_refresh_total",
        "Rule set refresh attempts by source/result",
        &["result"]
    )
        .expect("register ipgate_rule_cache_refresh_total")
});

pub static DECISION_CACHE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ipgate_decision_cache_lookups_total",
        "Decision cache lookups",
        &["result"]
    )
        .expect("register ipgate_decision_cache_lookups_total")
});

pub static MALFORMED_RULES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ipgate_malformed_rules_total",
        "Rules skipped because their value cannot be parsed",
        &["category"]
    )
        .expect("register ipgate_malformed_rules_total")
});

pub static GEO_TIMEOUTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "ipgate_geo_timeouts_total",
        "Geography lookups abandoned after timeout"
    )
        .expect("register ipgate_geo_timeouts_total")
});

pub static EVAL_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "ipgate_evaluation_errors_total",
        "Requests answered with a server error because no rule set was available"
    )
        .expect("register ipgate_evaluation_errors_total")
});

#[inline]
pub fn on_req_start(action: &str) {
    REQ_TOTAL.with_label_values(&[action]).inc();
    INFLIGHT.inc();
}

#[inline]
pub fn on_req_end(outcome: &str, secs: f64) {
    INFLIGHT.dec();
    REQ_DURATION.with_label_values(&[outcome]).observe(secs);
}

#[inline]
pub fn inc_decision(outcome: &str, category: &str, source: &str) {
    DECISIONS_TOTAL
        .with_label_values(&[outcome, category, source])
        .inc();
}

#[inline]
pub fn inc_rule_cache_refresh(result: &str) {
    RULE_CACHE_REFRESH_TOTAL.with_label_values(&[result]).inc();
}

#[inline]
pub fn inc_decision_cache(result: &str) {
    DECISION_CACHE_TOTAL.with_label_values(&[result]).inc();
}

#[inline]
pub fn inc_malformed_rule(category: &str) {
    MALFORMED_RULES_TOTAL.with_label_values(&[category]).inc();
}

#[inline]
pub fn inc_geo_timeout() {
    GEO_TIMEOUTS_TOTAL.inc();
}

#[inline]
pub fn inc_eval_error() {
    EVAL_ERRORS_TOTAL.inc();
}
