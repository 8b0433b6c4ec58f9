//! Policy chain.
//!
//! Policies are pure predicates over a [`Proposal`]. The chain always runs
//! every policy, in a fixed order, so the explanation shown to a human lists
//! the complete picture even after the first failure. Auto-approval requires
//! every result to pass.
//!
//! Fixed order: `allowlist`, `safe_domain`, `reversible`, then `blast_radius`
//! when a cap is configured.

use crate::core::config::{AllowRule, GateConfig};
use crate::core::error::GateError;
use crate::core::model::{BlastRadius, Proposal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// An allowlist pattern.
///
/// Either an exact string, or a string with exactly one `*` that stands for
/// any (possibly empty) run of characters between an anchored prefix and
/// suffix. `light.*` matches `light.kitchen`; `*.kitchen` matches
/// `light.kitchen`. A bare `*` is refused so no entry can match everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Exact(String),
    Wildcard { prefix: String, suffix: String },
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, GateError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GateError::Config("allowlist pattern is empty".to_string()));
        }
        match raw.matches('*').count() {
            0 => Ok(Pattern::Exact(raw.to_string())),
            1 if raw == "*" => Err(GateError::Config(
                "allowlist pattern '*' would match everything".to_string(),
            )),
            1 => {
                let (prefix, suffix) = raw.split_once('*').unwrap_or((raw, ""));
                Ok(Pattern::Wildcard {
                    prefix: prefix.to_string(),
                    suffix: suffix.to_string(),
                })
            }
            _ => Err(GateError::Config(format!(
                "allowlist pattern '{}' has more than one '*'",
                raw
            ))),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            Pattern::Exact(s) => s == text,
            Pattern::Wildcard { prefix, suffix } => {
                text.len() >= prefix.len() + suffix.len()
                    && text.starts_with(prefix.as_str())
                    && text.ends_with(suffix.as_str())
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(s) => f.write_str(s),
            Pattern::Wildcard { prefix, suffix } => write!(f, "{}*{}", prefix, suffix),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl PolicyResult {
    fn pass(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail,
        }
    }

    fn fail(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail,
        }
    }
}

pub trait Policy: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, proposal: &Proposal) -> PolicyResult;
}

#[derive(Debug, Clone)]
pub struct AllowlistPolicy {
    rules: Vec<(Pattern, Pattern)>,
}

impl AllowlistPolicy {
    pub fn new(rules: &[AllowRule]) -> Result<Self, GateError> {
        let rules = rules
            .iter()
            .map(|r| -> Result<(Pattern, Pattern), GateError> {
                Ok((Pattern::parse(&r.action)?, Pattern::parse(&r.resource)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }
}

impl Policy for AllowlistPolicy {
    fn name(&self) -> &'static str {
        "allowlist"
    }

    fn evaluate(&self, proposal: &Proposal) -> PolicyResult {
        let hit = self
            .rules
            .iter()
            .find(|(action, resource)| {
                action.matches(proposal.action()) && resource.matches(proposal.resource())
            });
        match hit {
            Some((action, resource)) => PolicyResult::pass(
                self.name(),
                format!(
                    "({}, {}) matches allowlist entry ({}, {})",
                    proposal.action(),
                    proposal.resource(),
                    action,
                    resource
                ),
            ),
            None => PolicyResult::fail(
                self.name(),
                format!(
                    "({}, {}) is not allowlisted",
                    proposal.action(),
                    proposal.resource()
                ),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafeDomainPolicy {
    domains: BTreeSet<String>,
}

impl SafeDomainPolicy {
    pub fn new(domains: &BTreeSet<String>) -> Self {
        Self {
            domains: domains.clone(),
        }
    }
}

impl Policy for SafeDomainPolicy {
    fn name(&self) -> &'static str {
        "safe_domain"
    }

    fn evaluate(&self, proposal: &Proposal) -> PolicyResult {
        if self.domains.contains(proposal.domain()) {
            PolicyResult::pass(
                self.name(),
                format!("domain '{}' is a safe domain", proposal.domain()),
            )
        } else {
            PolicyResult::fail(
                self.name(),
                format!("domain '{}' requires confirmation", proposal.domain()),
            )
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReversibilityPolicy;

impl Policy for ReversibilityPolicy {
    fn name(&self) -> &'static str {
        "reversible"
    }

    fn evaluate(&self, proposal: &Proposal) -> PolicyResult {
        match proposal.rollback_plan() {
            Some(plan) if proposal.is_reversible() => {
                PolicyResult::pass(self.name(), format!("rollback available: {}", plan.trim()))
            }
            _ => PolicyResult::fail(self.name(), "missing rollback plan".to_string()),
        }
    }
}

/// Undeclared radius counts as the widest.
#[derive(Debug, Clone, Copy)]
pub struct BlastRadiusPolicy {
    max: BlastRadius,
}

impl BlastRadiusPolicy {
    pub fn new(max: BlastRadius) -> Self {
        Self { max }
    }
}

impl Policy for BlastRadiusPolicy {
    fn name(&self) -> &'static str {
        "blast_radius"
    }

    fn evaluate(&self, proposal: &Proposal) -> PolicyResult {
        match proposal.blast_radius() {
            Some(radius) if radius <= self.max => PolicyResult::pass(
                self.name(),
                format!("blast radius '{}' within cap '{}'", radius, self.max),
            ),
            Some(radius) => PolicyResult::fail(
                self.name(),
                format!("blast radius '{}' exceeds cap '{}'", radius, self.max),
            ),
            None => PolicyResult::fail(
                self.name(),
                format!("blast radius undeclared; cap is '{}'", self.max),
            ),
        }
    }
}

/// Per-policy results for one proposal, in chain order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyReport {
    pub results: Vec<PolicyResult>,
}

impl PolicyReport {
    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PolicyResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn get(&self, name: &str) -> Option<&PolicyResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// `name: detail; name: detail` summary line.
    pub fn summary(&self) -> String {
        self.results
            .iter()
            .map(|r| format!("{}: {}", r.name, r.detail))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub struct PolicyChain {
    policies: Vec<Box<dyn Policy>>,
}

impl PolicyChain {
    pub fn from_config(config: &GateConfig) -> Result<Self, GateError> {
        let mut policies: Vec<Box<dyn Policy>> = vec![
            Box::new(AllowlistPolicy::new(&config.allowlist)?),
            Box::new(SafeDomainPolicy::new(&config.safe_domains)),
            Box::new(ReversibilityPolicy),
        ];
        if let Some(max) = config.max_blast_radius {
            policies.push(Box::new(BlastRadiusPolicy::new(max)));
        }
        Ok(Self { policies })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Run every policy; never short-circuits.
    pub fn evaluate(&self, proposal: &Proposal) -> PolicyReport {
        PolicyReport {
            results: self.policies.iter().map(|p| p.evaluate(proposal)).collect(),
        }
    }
}
