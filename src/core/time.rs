//! Shared timestamp and identifier helpers.

use ulid::Ulid;

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Epoch millis as seconds with a `Z` suffix, e.g. `1771220592.042Z`.
pub fn format_millis(ms: u64) -> String {
    format!("{}.{:03}Z", ms / 1000, ms % 1000)
}

/// A ULID with a short kind prefix, e.g. `pl-01J...`.
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new())
}

pub fn new_proposal_id() -> String {
    new_id("pl")
}

pub fn new_trace_id() -> String {
    new_id("tr")
}

pub fn new_decision_id() -> String {
    new_id("dc")
}
