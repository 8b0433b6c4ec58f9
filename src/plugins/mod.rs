//! Pluggable stages of the gate.

pub mod coordinator;
pub mod policy;
pub mod ratelimit;
