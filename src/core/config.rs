//! Gate configuration.
//!
//! Loaded once from TOML and handed to `Gate::new`; there is no runtime
//! mutation API. Missing sections fall back to fail-closed defaults: an empty
//! allowlist and no safe domains, so nothing is auto-approved until an
//! operator opts in.

use crate::core::error::GateError;
use crate::core::model::BlastRadius;
use crate::plugins::policy::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One allowlist entry. Both sides are [`Pattern`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowRule {
    pub action: String,
    pub resource: String,
}

impl AllowRule {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 5,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditBackend {
    Memory,
    Jsonl,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub backend: AuditBackend,
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: AuditBackend::Jsonl,
            path: PathBuf::from(".stewardgate/audit.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub allowlist: Vec<AllowRule>,
    pub safe_domains: BTreeSet<String>,
    pub rate_limit: RateLimitConfig,
    /// Approved decisions older than this are refused at execute time.
    pub decision_ttl_secs: Option<u64>,
    /// Actions that must carry an `expected_outcome` to be executed.
    pub require_expected_outcome: BTreeSet<String>,
    /// Enables the blast-radius policy when set.
    pub max_blast_radius: Option<BlastRadius>,
    pub audit: AuditConfig,
    pub log_level: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            allowlist: Vec::new(),
            safe_domains: BTreeSet::new(),
            rate_limit: RateLimitConfig::default(),
            decision_ttl_secs: None,
            require_expected_outcome: BTreeSet::new(),
            max_blast_radius: None,
            audit: AuditConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl GateConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, GateError> {
        let config: GateConfig =
            toml::from_str(content).map_err(|e| GateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, GateError> {
        let content = std::fs::read_to_string(path).map_err(GateError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, GateError> {
        toml::to_string_pretty(self).map_err(|e| GateError::Config(e.to_string()))
    }

    pub fn allow(mut self, action: &str, resource: &str) -> Self {
        self.allowlist.push(AllowRule::new(action, resource));
        self
    }

    pub fn safe_domain(mut self, domain: &str) -> Self {
        self.safe_domains.insert(domain.to_string());
        self
    }

    pub fn rate_limit(mut self, max_requests: usize, window_secs: u64) -> Self {
        self.rate_limit = RateLimitConfig {
            window_secs,
            max_requests,
        };
        self
    }

    pub fn decision_ttl_ms(&self) -> Option<u64> {
        self.decision_ttl_secs.map(|s| s.saturating_mul(1000))
    }

    pub fn validate(&self) -> Result<(), GateError> {
        for rule in &self.allowlist {
            Pattern::parse(&rule.action)?;
            Pattern::parse(&rule.resource)?;
        }
        if self.safe_domains.iter().any(|d| d.trim().is_empty()) {
            return Err(GateError::Config("safe_domains contains an empty entry".to_string()));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(GateError::Config("rate_limit.window_secs must be > 0".to_string()));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(GateError::Config("rate_limit.max_requests must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Annotated starting config written by `stewardgate config init`.
pub fn default_toml() -> &'static str {
    r#"# Stewardship gate configuration.
# Anything not listed here is routed to a human for approval.

safe_domains = ["lighting"]
log_level = "info"
# decision_ttl_secs = 300
# require_expected_outcome = ["toggle_entity"]
# max_blast_radius = "room"

# Patterns are exact strings or contain a single '*' (e.g. "light.*").
# A bare "*" is rejected.
[[allowlist]]
action = "turn_on"
resource = "porch_light"

[[allowlist]]
action = "turn_off"
resource = "porch_light"

[rate_limit]
window_secs = 60
max_requests = 5

[audit]
backend = "jsonl"
path = ".stewardgate/audit.jsonl"
"#
}
