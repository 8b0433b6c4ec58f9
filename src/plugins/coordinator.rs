//! Decision coordination: explanation rendering, auto-approval, and the
//! single hand-off to a human (or other) decision channel.

use crate::core::error::{DecisionError, panic_message};
use crate::core::model::{Decision, Proposal};
use crate::plugins::policy::{PolicyChain, PolicyReport};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the decision channel answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub approved: bool,
    pub reason: String,
}

impl Verdict {
    pub fn approve(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
        }
    }
}

/// Everything a human needs to approve or deny a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub proposal_id: String,
    pub trace_id: String,
    pub summary: String,
    pub policies: PolicyReport,
    pub warnings: Vec<String>,
    pub rendered: String,
}

impl Explanation {
    pub fn auto_approvable(&self) -> bool {
        self.policies.all_passed()
    }
}

/// The approval channel.
///
/// Called at most once per `decide`, and only when some policy failed.
/// `Ok(None)` means the channel produced no decision, which denies.
/// Timeouts belong inside the implementation (see [`TimedDecider`]).
pub trait Decider {
    fn decide(&self, explanation: &Explanation) -> Result<Option<Verdict>, DecisionError>;
}

impl<F> Decider for F
where
    F: Fn(&Explanation) -> Result<Option<Verdict>, DecisionError>,
{
    fn decide(&self, explanation: &Explanation) -> Result<Option<Verdict>, DecisionError> {
        self(explanation)
    }
}

/// Runs an inner decider on a worker thread and gives up after `timeout`.
///
/// On timeout the worker is left to finish on its own; its answer is dropped.
pub struct TimedDecider<D> {
    inner: Arc<D>,
    timeout: Duration,
}

impl<D> TimedDecider<D>
where
    D: Decider + Send + Sync + 'static,
{
    pub fn new(inner: D, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }
}

impl<D> Decider for TimedDecider<D>
where
    D: Decider + Send + Sync + 'static,
{
    fn decide(&self, explanation: &Explanation) -> Result<Option<Verdict>, DecisionError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let explanation = explanation.clone();
        std::thread::spawn(move || {
            let _ = tx.send(inner.decide(&explanation));
        });
        match rx.recv_timeout(self.timeout) {
            Ok(answer) => answer,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(DecisionError::Timeout(self.timeout.as_millis() as u64))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(DecisionError::Panicked(
                "decision worker exited without answering".to_string(),
            )),
        }
    }
}

pub struct DecisionCoordinator {
    chain: PolicyChain,
    ttl_ms: Option<u64>,
}

impl DecisionCoordinator {
    pub fn new(chain: PolicyChain, ttl_ms: Option<u64>) -> Self {
        Self { chain, ttl_ms }
    }

    pub fn chain(&self) -> &PolicyChain {
        &self.chain
    }

    /// Evaluate the chain and render the explanation. Pure.
    pub fn explain(&self, proposal: &Proposal) -> Explanation {
        let policies = self.chain.evaluate(proposal);

        let summary = format!(
            "{} wants to {} {} in domain {}",
            proposal.actor(),
            proposal.action(),
            proposal.resource(),
            proposal.domain()
        );

        let mut warnings = Vec::new();
        if !proposal.is_reversible() {
            warnings.push("no rollback plan: this action cannot be undone".to_string());
        }

        let mut rendered = String::new();
        rendered.push_str(&format!("Proposal {}\n", proposal.proposal_id()));
        rendered.push_str(&format!("  {}\n", summary));
        rendered.push_str(&format!(
            "  Rationale: {}\n",
            if proposal.rationale().trim().is_empty() {
                "(none given)"
            } else {
                proposal.rationale()
            }
        ));
        rendered.push_str(&format!(
            "  Rollback: {}\n",
            proposal.rollback_plan().unwrap_or("none")
        ));
        if let Some(radius) = proposal.blast_radius() {
            rendered.push_str(&format!("  Blast radius: {}\n", radius));
        }
        rendered.push_str("Policies:\n");
        for r in &policies.results {
            rendered.push_str(&format!(
                "  [{}] {}: {}\n",
                if r.passed { "PASS" } else { "FAIL" },
                r.name,
                r.detail
            ));
        }
        for w in &warnings {
            rendered.push_str(&format!("WARNING: {}\n", w));
        }

        Explanation {
            proposal_id: proposal.proposal_id().to_string(),
            trace_id: proposal.trace_id().to_string(),
            summary,
            policies,
            warnings,
            rendered,
        }
    }

    /// Turn an explanation into a decision, consulting `decider` at most once.
    pub fn resolve<D>(
        &self,
        proposal: &Proposal,
        explanation: &Explanation,
        approver: &str,
        decider: &D,
    ) -> Decision
    where
        D: Decider + ?Sized,
    {
        if explanation.auto_approvable() {
            debug!(proposal_id = proposal.proposal_id(), "all policies passed");
            return Decision::auto_approved(proposal, self.ttl_ms);
        }

        let answer = catch_unwind(AssertUnwindSafe(|| decider.decide(explanation)))
            .unwrap_or_else(|payload| Err(DecisionError::Panicked(panic_message(&*payload))));

        match answer {
            Ok(Some(verdict)) => {
                info!(
                    proposal_id = proposal.proposal_id(),
                    approver,
                    approved = verdict.approved,
                    "decision received"
                );
                Decision::from_verdict(
                    proposal,
                    approver,
                    verdict.approved,
                    verdict.reason,
                    self.ttl_ms,
                )
            }
            Ok(None) => {
                info!(proposal_id = proposal.proposal_id(), approver, "no decision; denying");
                Decision::undecided(proposal, approver)
            }
            Err(e) => {
                warn!(proposal_id = proposal.proposal_id(), error = %e, "decision callback failed; denying");
                Decision::callback_failed(proposal, approver)
            }
        }
    }
}
