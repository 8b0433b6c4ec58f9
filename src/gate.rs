//! The stewardship gate: Propose → Explain → Decide → Execute → Learn.
//!
//! A [`Gate`] owns the policy chain, the decision coordinator, the per-actor
//! rate limiter and a handle to the audit sink. It keeps no proposal-scoped
//! state, so one gate can be shared across threads behind an `Arc`.
//!
//! Every stage writes exactly one audit record. A failed audit write is the
//! only fault that escapes a stage as `Err`; decision and execution faults are
//! folded into deny decisions and `FAILURE` results.

use crate::core::audit::{AuditRecord, AuditSink, Stage};
use crate::core::config::GateConfig;
use crate::core::error::{ExecutionError, GateError, panic_message};
use crate::core::model::{
    Decision, ExecutionResult, ExecutionStatus, FeedbackEvent, Proposal,
};
use crate::core::redact;
use crate::core::time;
use crate::plugins::coordinator::{Decider, DecisionCoordinator, Explanation};
use crate::plugins::policy::{PolicyChain, PolicyReport};
use crate::plugins::ratelimit::RateLimiter;
use serde_json::{Value, json};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub use crate::core::model::ProposalRequest;

/// Details reported when the actor's rate-limit budget is exhausted.
pub const RATE_LIMITED: &str = "rate limited";

/// Carries out an approved proposal.
///
/// Called at most once per `execute`. The returned string becomes the result
/// details; an `Err` becomes a `FAILURE` result.
pub trait Executor {
    fn execute(&self, proposal: &Proposal) -> Result<String, ExecutionError>;
}

impl<F> Executor for F
where
    F: Fn(&Proposal) -> Result<String, ExecutionError>,
{
    fn execute(&self, proposal: &Proposal) -> Result<String, ExecutionError> {
        self(proposal)
    }
}

pub struct Gate {
    config: GateConfig,
    coordinator: DecisionCoordinator,
    limiter: RateLimiter,
    audit: Arc<dyn AuditSink>,
}

impl Gate {
    pub fn new(config: GateConfig, audit: Arc<dyn AuditSink>) -> Result<Self, GateError> {
        config.validate()?;
        let chain = PolicyChain::from_config(&config)?;
        let coordinator = DecisionCoordinator::new(chain, config.decision_ttl_ms());
        let limiter = RateLimiter::from_config(&config.rate_limit);
        info!(
            policies = ?coordinator.chain().names(),
            allowlist = config.allowlist.len(),
            safe_domains = config.safe_domains.len(),
            max_requests = config.rate_limit.max_requests,
            window_secs = config.rate_limit.window_secs,
            "gate ready"
        );
        Ok(Self {
            config,
            coordinator,
            limiter,
            audit,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn record(&self, proposal: &Proposal, stage: Stage, payload: Value) -> Result<(), GateError> {
        let record = AuditRecord::for_proposal(proposal, stage, payload);
        self.audit.append(&record).map_err(|e| {
            error!(
                proposal_id = proposal.proposal_id(),
                stage = %stage,
                error = %e,
                "audit write failed"
            );
            match e {
                GateError::AuditWrite(_) => e,
                other => GateError::AuditWrite(other.to_string()),
            }
        })
    }

    /// Validate the request, mint ids and record the `proposed` stage.
    pub fn propose(&self, request: ProposalRequest) -> Result<Proposal, GateError> {
        let proposal = request.build()?;
        self.record(&proposal, Stage::Proposed, serde_json::to_value(&proposal)?)?;
        info!(
            proposal_id = proposal.proposal_id(),
            trace_id = proposal.trace_id(),
            actor = proposal.actor(),
            action = proposal.action(),
            resource = proposal.resource(),
            "proposed"
        );
        Ok(proposal)
    }

    /// Run the policy chain. Pure; nothing is recorded.
    pub fn evaluate(&self, proposal: &Proposal) -> PolicyReport {
        self.coordinator.chain().evaluate(proposal)
    }

    /// Build the explanation a human would see. Pure; nothing is recorded.
    pub fn explain(&self, proposal: &Proposal) -> Explanation {
        self.coordinator.explain(proposal)
    }

    /// Explain, then auto-approve or ask `decider` exactly once.
    ///
    /// Records `explained` followed by `decided`.
    pub fn decide<D>(
        &self,
        proposal: &Proposal,
        approver: &str,
        decider: &D,
    ) -> Result<Decision, GateError>
    where
        D: Decider + ?Sized,
    {
        let explanation = self.coordinator.explain(proposal);
        self.record(
            proposal,
            Stage::Explained,
            json!({
                "summary": explanation.summary,
                "rendered": explanation.rendered,
                "policies": explanation.policies.results,
                "warnings": explanation.warnings,
                "auto_approvable": explanation.auto_approvable(),
            }),
        )?;

        let decision = self
            .coordinator
            .resolve(proposal, &explanation, approver, decider);
        self.record(proposal, Stage::Decided, serde_json::to_value(&decision)?)?;
        info!(
            proposal_id = proposal.proposal_id(),
            decision_id = decision.decision_id(),
            approved = decision.approved(),
            approver = decision.approver(),
            basis = ?decision.basis(),
            "decided"
        );
        Ok(decision)
    }

    /// Run `executor` if the decision allows it, and record `executed`.
    pub fn execute<E>(
        &self,
        proposal: &Proposal,
        decision: &Decision,
        executor: &E,
    ) -> Result<ExecutionResult, GateError>
    where
        E: Executor + ?Sized,
    {
        let result = self.run(proposal, decision, executor);
        self.record(proposal, Stage::Executed, serde_json::to_value(&result)?)?;
        info!(
            proposal_id = proposal.proposal_id(),
            decision_id = decision.decision_id(),
            status = %result.status(),
            "executed"
        );
        Ok(result)
    }

    fn run<E>(&self, proposal: &Proposal, decision: &Decision, executor: &E) -> ExecutionResult
    where
        E: Executor + ?Sized,
    {
        let now = time::now_millis();
        let done = |status: ExecutionStatus, details: String| {
            ExecutionResult::new(proposal, decision, status, details, now)
        };

        if decision.proposal_id() != proposal.proposal_id() {
            warn!(
                proposal_id = proposal.proposal_id(),
                decision_proposal_id = decision.proposal_id(),
                "decision does not belong to this proposal"
            );
            return done(
                ExecutionStatus::Skipped,
                format!(
                    "decision {} was issued for proposal {}",
                    decision.decision_id(),
                    decision.proposal_id()
                ),
            );
        }

        if !decision.approved() {
            return done(
                ExecutionStatus::Skipped,
                format!("not approved: {}", decision.reason()),
            );
        }

        if let Some(deadline) = decision.expires_at().filter(|_| decision.is_expired_at(now)) {
            debug!(decision_id = decision.decision_id(), deadline, "decision expired");
            return done(
                ExecutionStatus::Expired,
                format!(
                    "decision TTL elapsed: approval expired at {}",
                    time::format_millis(deadline)
                ),
            );
        }

        if self.config.require_expected_outcome.contains(proposal.action())
            && proposal.expected_outcome().is_none()
        {
            return done(
                ExecutionStatus::Rejected,
                format!(
                    "action '{}' requires an expected_outcome",
                    proposal.action()
                ),
            );
        }

        if !self.limiter.try_acquire(proposal.actor()) {
            return done(ExecutionStatus::Skipped, RATE_LIMITED.to_string());
        }

        let started_at = time::now_millis();
        let outcome = catch_unwind(AssertUnwindSafe(|| executor.execute(proposal)))
            .unwrap_or_else(|payload| Err(ExecutionError::Panicked(panic_message(&*payload))));

        let (status, details) = match outcome {
            Err(e) => {
                let text = redact::redact_text(&e.to_string());
                warn!(proposal_id = proposal.proposal_id(), error = %text, "executor failed");
                (ExecutionStatus::Failure, text)
            }
            Ok(details) => match proposal.expected_outcome().and_then(|o| o.equals.as_deref()) {
                Some(expected) if expected != details => (
                    ExecutionStatus::Failure,
                    format!(
                        "outcome verification failed: expected '{}', got '{}'",
                        expected, details
                    ),
                ),
                _ => (ExecutionStatus::Success, details),
            },
        };
        ExecutionResult::new(proposal, decision, status, details, started_at)
    }

    /// Record what happened, with an optional observation.
    pub fn learn(
        &self,
        proposal: &Proposal,
        result: &ExecutionResult,
        feedback: Option<&FeedbackEvent>,
    ) -> Result<(), GateError> {
        self.record(
            proposal,
            Stage::Learning,
            json!({
                "result": result,
                "feedback": feedback,
            }),
        )?;
        debug!(
            proposal_id = proposal.proposal_id(),
            feedback = feedback.is_some(),
            "learning recorded"
        );
        Ok(())
    }
}
