//! Shared primitives of the gate: records, errors, configuration and the
//! audit trail.

pub mod audit;
pub mod config;
pub mod error;
pub mod model;
pub mod redact;
pub mod schemas;
pub mod telemetry;
pub mod time;
