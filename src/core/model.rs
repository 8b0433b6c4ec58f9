//! Lifecycle records: proposals, decisions, execution results and feedback.
//!
//! Proposals, decisions and results are immutable once built. Their fields are
//! private and exposed through accessors, so nothing downstream of the stage
//! that produced a record can rewrite it.

use crate::core::error::GateError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How far an action's effects can spread, narrowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlastRadius {
    SingleDevice,
    Room,
    WholeHome,
    NetworkWide,
}

impl BlastRadius {
    pub fn as_str(self) -> &'static str {
        match self {
            BlastRadius::SingleDevice => "single_device",
            BlastRadius::Room => "room",
            BlastRadius::WholeHome => "whole_home",
            BlastRadius::NetworkWide => "network_wide",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "single_device" => Some(BlastRadius::SingleDevice),
            "room" => Some(BlastRadius::Room),
            "whole_home" => Some(BlastRadius::WholeHome),
            "network_wide" => Some(BlastRadius::NetworkWide),
            _ => None,
        }
    }
}

impl fmt::Display for BlastRadius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the proposer expects the executor to report back.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    /// Executor details must equal this exactly for the run to count as a success.
    pub equals: Option<String>,
    pub description: Option<String>,
}

impl ExpectedOutcome {
    pub fn equals(value: impl Into<String>) -> Self {
        Self {
            equals: Some(value.into()),
            description: None,
        }
    }
}

/// Input to `Gate::propose`.
#[derive(Debug, Clone, Default)]
pub struct ProposalRequest {
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub domain: String,
    pub rationale: String,
    pub rollback_plan: Option<String>,
    pub blast_radius: Option<BlastRadius>,
    pub expected_outcome: Option<ExpectedOutcome>,
}

impl ProposalRequest {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        domain: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            domain: domain.into(),
            rationale: rationale.into(),
            ..Self::default()
        }
    }

    pub fn rollback_plan(mut self, plan: impl Into<String>) -> Self {
        self.rollback_plan = Some(plan.into());
        self
    }

    pub fn blast_radius(mut self, radius: BlastRadius) -> Self {
        self.blast_radius = Some(radius);
        self
    }

    pub fn expected_outcome(mut self, outcome: ExpectedOutcome) -> Self {
        self.expected_outcome = Some(outcome);
        self
    }

    /// Validate the request and mint a proposal with fresh ids.
    pub fn build(self) -> Result<Proposal, GateError> {
        for (field, value) in [
            ("actor", &self.actor),
            ("action", &self.action),
            ("resource", &self.resource),
            ("domain", &self.domain),
        ] {
            if value.trim().is_empty() {
                return Err(GateError::InvalidProposal(format!(
                    "required field '{}' is empty",
                    field
                )));
            }
        }

        Ok(Proposal {
            proposal_id: time::new_proposal_id(),
            trace_id: time::new_trace_id(),
            actor: self.actor,
            action: self.action,
            resource: self.resource,
            domain: self.domain,
            rationale: self.rationale,
            rollback_plan: self.rollback_plan,
            blast_radius: self.blast_radius,
            expected_outcome: self.expected_outcome,
            created_at: time::now_millis(),
        })
    }
}

/// A requested change. Never mutated after `propose`.
///
/// Only [`ProposalRequest::build`] creates one, so every proposal has passed
/// field validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proposal {
    proposal_id: String,
    trace_id: String,
    actor: String,
    action: String,
    resource: String,
    domain: String,
    rationale: String,
    rollback_plan: Option<String>,
    blast_radius: Option<BlastRadius>,
    expected_outcome: Option<ExpectedOutcome>,
    created_at: u64,
}

impl Proposal {
    pub fn proposal_id(&self) -> &str {
        &self.proposal_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn rollback_plan(&self) -> Option<&str> {
        self.rollback_plan.as_deref()
    }

    pub fn blast_radius(&self) -> Option<BlastRadius> {
        self.blast_radius
    }

    pub fn expected_outcome(&self) -> Option<&ExpectedOutcome> {
        self.expected_outcome.as_ref()
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// A rollback plan that is present and not blank.
    pub fn is_reversible(&self) -> bool {
        self.rollback_plan
            .as_deref()
            .is_some_and(|plan| !plan.trim().is_empty())
    }
}

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBasis {
    /// Every policy passed.
    Auto,
    /// The decision callback returned a verdict.
    Human,
    /// Nothing evaluated the proposal, or the callback declined to answer.
    NoDecision,
    /// The decision callback errored, panicked or timed out.
    CallbackError,
}

pub const SYSTEM_APPROVER: &str = "system";
pub const DECISION_FN_ERROR: &str = "decision_fn error";
pub const NO_DECISION: &str = "no decision";

/// The approve/deny verdict for one proposal.
///
/// Serialized into the audit trail but never read back: an approved decision
/// only comes out of `Gate::decide`.
///
/// ```compile_fail
/// let raw = r#"{"decision_id":"dc-x","proposal_id":"pl-x","approved":true}"#;
/// let _: stewardgate::core::model::Decision = serde_json::from_str(raw).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    decision_id: String,
    proposal_id: String,
    approved: bool,
    reason: String,
    approver: String,
    timestamp: u64,
    basis: DecisionBasis,
    expires_at: Option<u64>,
}

impl Decision {
    fn new(
        proposal: &Proposal,
        approved: bool,
        reason: impl Into<String>,
        approver: impl Into<String>,
        basis: DecisionBasis,
        ttl_ms: Option<u64>,
    ) -> Self {
        let timestamp = time::now_millis();
        Self {
            decision_id: time::new_decision_id(),
            proposal_id: proposal.proposal_id().to_string(),
            approved,
            reason: reason.into(),
            approver: approver.into(),
            timestamp,
            basis,
            expires_at: ttl_ms.map(|ttl| timestamp.saturating_add(ttl)),
        }
    }

    /// The fail-closed default for a proposal nobody has evaluated.
    pub fn deny_by_default(proposal: &Proposal) -> Self {
        Self::new(
            proposal,
            false,
            NO_DECISION,
            SYSTEM_APPROVER,
            DecisionBasis::NoDecision,
            None,
        )
    }

    pub(crate) fn auto_approved(proposal: &Proposal, ttl_ms: Option<u64>) -> Self {
        Self::new(
            proposal,
            true,
            "auto-approved: all policies passed",
            SYSTEM_APPROVER,
            DecisionBasis::Auto,
            ttl_ms,
        )
    }

    pub(crate) fn from_verdict(
        proposal: &Proposal,
        approver: &str,
        approved: bool,
        reason: String,
        ttl_ms: Option<u64>,
    ) -> Self {
        Self::new(
            proposal,
            approved,
            reason,
            approver,
            DecisionBasis::Human,
            ttl_ms,
        )
    }

    pub(crate) fn undecided(proposal: &Proposal, approver: &str) -> Self {
        Self::new(
            proposal,
            false,
            NO_DECISION,
            approver,
            DecisionBasis::NoDecision,
            None,
        )
    }

    pub(crate) fn callback_failed(proposal: &Proposal, approver: &str) -> Self {
        Self::new(
            proposal,
            false,
            DECISION_FN_ERROR,
            approver,
            DecisionBasis::CallbackError,
            None,
        )
    }

    pub fn decision_id(&self) -> &str {
        &self.decision_id
    }

    pub fn proposal_id(&self) -> &str {
        &self.proposal_id
    }

    pub fn approved(&self) -> bool {
        self.approved
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn approver(&self) -> &str {
        &self.approver
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn basis(&self) -> DecisionBasis {
        self.basis
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|deadline| now_ms >= deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Skipped,
    Expired,
    Rejected,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failure => "FAILURE",
            ExecutionStatus::Skipped => "SKIPPED",
            ExecutionStatus::Expired => "EXPIRED",
            ExecutionStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an `execute` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    proposal_id: String,
    decision_id: String,
    status: ExecutionStatus,
    details: String,
    started_at: u64,
    ended_at: u64,
}

impl ExecutionResult {
    pub(crate) fn new(
        proposal: &Proposal,
        decision: &Decision,
        status: ExecutionStatus,
        details: impl Into<String>,
        started_at: u64,
    ) -> Self {
        Self {
            proposal_id: proposal.proposal_id().to_string(),
            decision_id: decision.decision_id().to_string(),
            status,
            details: details.into(),
            started_at,
            ended_at: time::now_millis().max(started_at),
        }
    }

    pub fn proposal_id(&self) -> &str {
        &self.proposal_id
    }

    pub fn decision_id(&self) -> &str {
        &self.decision_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn ended_at(&self) -> u64 {
        self.ended_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A post-hoc observation about a proposal. Purely additive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub proposal_id: String,
    pub observation: String,
    pub severity: Severity,
    pub follow_up: Option<String>,
}

impl FeedbackEvent {
    pub fn new(proposal: &Proposal, observation: impl Into<String>, severity: Severity) -> Self {
        Self {
            proposal_id: proposal.proposal_id().to_string(),
            observation: observation.into(),
            severity,
            follow_up: None,
        }
    }

    pub fn with_follow_up(mut self, follow_up: impl Into<String>) -> Self {
        self.follow_up = Some(follow_up.into());
        self
    }
}
