//! Session layer metrics.
//!
//! # Metrics
//! - `session_refresh_total` (counter): refresh outcomes by `outcome`
//! - `session_dedup_total` (counter): outbound calls by `result` (issued/coalesced)
//! - `session_cache_lookup_total` (counter): cache reads by `result`
//! - `session_cache_heal_total` (counter): background heals by `outcome`
//! - `session_transport_retries_total` (counter): idempotent retries
//!
//! # Design Decisions
//! - Labels are static strings; identity ids never become label values

use metrics::counter;

const REFRESH_TOTAL: &str = "session_refresh_total";
const DEDUP_TOTAL: &str = "session_dedup_total";
const CACHE_LOOKUP_TOTAL: &str = "session_cache_lookup_total";
const CACHE_HEAL_TOTAL: &str = "session_cache_heal_total";
const TRANSPORT_RETRIES_TOTAL: &str = "session_transport_retries_total";

pub fn record_refresh(outcome: &'static str) {
    counter!(REFRESH_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_dedup(result: &'static str) {
    counter!(DEDUP_TOTAL, "result" => result).increment(1);
}

pub fn record_cache_lookup(result: &'static str) {
    counter!(CACHE_LOOKUP_TOTAL, "result" => result).increment(1);
}

pub fn record_heal(outcome: &'static str) {
    counter!(CACHE_HEAL_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_transport_retry() {
    counter!(TRANSPORT_RETRIES_TOTAL).increment(1);
}
