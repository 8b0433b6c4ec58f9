//! Stewardgate: a stewardship gate for agent-proposed actions.
//!
//! Every change an agent wants to make passes through the same lifecycle:
//!
//! 1. **Propose**: the agent describes the action, target, domain, rationale
//!    and (ideally) a rollback plan.
//! 2. **Explain**: a fixed policy chain judges the proposal and renders a
//!    human-readable explanation.
//! 3. **Decide**: if every policy passes the gate auto-approves; otherwise a
//!    [`Decider`](plugins::coordinator::Decider) is consulted exactly once.
//!    Anything other than an explicit approval denies.
//! 4. **Execute**: approved proposals run through an
//!    [`Executor`](gate::Executor), subject to a per-actor rate limit.
//! 5. **Learn**: the outcome and optional feedback are recorded.
//!
//! Each stage appends one record to an append-only audit sink, and all records
//! for one proposal share a trace id.
//!
//! # Crate Structure
//!
//! - [`core`]: records, errors, configuration, audit sinks, redaction
//! - [`plugins`]: policy chain, decision coordinator, rate limiter
//! - [`gate`]: the [`Gate`](gate::Gate) that ties the stages together
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stewardgate::core::audit::MemoryAuditLog;
//! use stewardgate::core::config::GateConfig;
//! use stewardgate::core::error::{DecisionError, ExecutionError};
//! use stewardgate::core::model::Proposal;
//! use stewardgate::gate::{Gate, ProposalRequest};
//! use stewardgate::plugins::coordinator::{Explanation, Verdict};
//!
//! let config = GateConfig::default()
//!     .allow("turn_on", "light.*")
//!     .safe_domain("lights");
//! let gate = Gate::new(config, Arc::new(MemoryAuditLog::new()))?;
//!
//! let proposal = gate.propose(
//!     ProposalRequest::new("agent", "turn_on", "light.kitchen", "lights", "sunset")
//!         .rollback_plan("turn_off light.kitchen"),
//! )?;
//! let ask = |_: &Explanation| -> Result<Option<Verdict>, DecisionError> { Ok(None) };
//! let decision = gate.decide(&proposal, "steward", &ask)?;
//! let run = |_: &Proposal| -> Result<String, ExecutionError> { Ok("ok".to_string()) };
//! let result = gate.execute(&proposal, &decision, &run)?;
//! gate.learn(&proposal, &result, None)?;
//! # Ok::<(), stewardgate::core::error::GateError>(())
//! ```

pub mod core;
pub mod gate;
pub mod plugins;

mod cli;

use crate::cli::{
    AuditCommand, Cli, Command, ConfigCommand, DemoCli, PolicyCommand, ProposalArgs,
};
use crate::core::audit::{self, AuditRecord, MemoryAuditLog, SqliteAuditLog, Stage};
use crate::core::config::{self, AuditBackend, GateConfig};
use crate::core::error::{DecisionError, ExecutionError, GateError};
use crate::core::model::{
    BlastRadius, ExecutionStatus, ExpectedOutcome, FeedbackEvent, Proposal, Severity,
};
use crate::core::{telemetry, time};
use crate::gate::{Gate, ProposalRequest};
use crate::plugins::coordinator::{Explanation, Verdict};

use anyhow::{Context, bail};
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "stewardgate.toml";

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    telemetry::init(&level);

    match cli.command {
        Command::Demo(demo) => run_demo(config, &demo),
        Command::Policy(policy) => match policy.command {
            PolicyCommand::Eval { proposal, format } => run_policy_eval(config, &proposal, &format),
        },
        Command::Audit(audit_cli) => match audit_cli.command {
            AuditCommand::Show {
                path,
                trace,
                format,
            } => run_audit_show(&config, path, trace.as_deref(), &format),
            AuditCommand::Verify { path } => run_audit_verify(&config, path),
        },
        Command::Config(config_cli) => match config_cli.command {
            ConfigCommand::Init { path, force } => run_config_init(&path, force),
            ConfigCommand::Check { path } => {
                let checked = match path {
                    Some(p) => load_config(Some(p.as_path()))?,
                    None => config,
                };
                print!("{}", checked.to_toml_string()?);
                Ok(())
            }
        },
    }
}

fn check_format(format: &str) -> Result<(), GateError> {
    match format {
        "text" | "json" => Ok(()),
        other => Err(GateError::ValidationError(format!(
            "unknown output format '{}' (expected 'text' or 'json')",
            other
        ))),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<GateConfig> {
    match path {
        Some(p) => GateConfig::load(p)
            .with_context(|| format!("failed to load config from {}", p.display())),
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_FILE);
            if fallback.exists() {
                GateConfig::load(fallback)
                    .with_context(|| format!("failed to load config from {}", fallback.display()))
            } else {
                Ok(GateConfig::default())
            }
        }
    }
}

fn build_request(args: &ProposalArgs) -> anyhow::Result<ProposalRequest> {
    let mut request = ProposalRequest::new(
        &args.actor,
        &args.action,
        &args.resource,
        &args.domain,
        &args.rationale,
    );
    if let Some(plan) = &args.rollback {
        request = request.rollback_plan(plan);
    }
    if let Some(raw) = &args.blast_radius {
        let Some(radius) = BlastRadius::parse(raw) else {
            bail!(
                "unknown blast radius '{}' (expected single_device, room, whole_home or network_wide)",
                raw
            );
        };
        request = request.blast_radius(radius);
    }
    if let Some(expected) = &args.expect {
        request = request.expected_outcome(ExpectedOutcome::equals(expected));
    }
    Ok(request)
}

fn prompt_operator(explanation: &Explanation) -> Result<Option<Verdict>, DecisionError> {
    println!("{}", explanation.rendered);
    print!("Approve? [y/N] ");
    std::io::stdout()
        .flush()
        .map_err(|e| DecisionError::Unavailable(e.to_string()))?;

    let mut line = String::new();
    let read = std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| DecisionError::Unavailable(e.to_string()))?;
    if read == 0 {
        return Ok(None);
    }
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Ok(Some(Verdict::approve("approved at the prompt"))),
        _ => Ok(Some(Verdict::deny("denied at the prompt"))),
    }
}

fn run_demo(config: GateConfig, demo: &DemoCli) -> anyhow::Result<()> {
    use colored::Colorize;

    let request = build_request(&demo.proposal)?;
    let sink = audit::open_sink(&config.audit).context("failed to open audit sink")?;
    let audit_path = config.audit.path.clone();
    let backend = config.audit.backend;
    let gate = Gate::new(config, sink)?;

    let proposal = gate.propose(request)?;
    println!(
        "{} proposal {} (trace {})",
        "▸".bright_cyan(),
        proposal.proposal_id().bright_white(),
        proposal.trace_id()
    );

    let decider = |explanation: &Explanation| -> Result<Option<Verdict>, DecisionError> {
        if demo.approve {
            println!("{}", explanation.rendered);
            Ok(Some(Verdict::approve("approved via --approve")))
        } else if demo.deny {
            println!("{}", explanation.rendered);
            Ok(Some(Verdict::deny("denied via --deny")))
        } else {
            prompt_operator(explanation)
        }
    };
    let decision = gate.decide(&proposal, &demo.approver, &decider)?;
    if decision.approved() {
        println!(
            "{} approved by {}: {}",
            "✓".bright_green(),
            decision.approver().bright_green(),
            decision.reason()
        );
    } else {
        println!(
            "{} denied by {}: {}",
            "✗".bright_red(),
            decision.approver().bright_red(),
            decision.reason()
        );
    }

    let executor = |p: &Proposal| -> Result<String, ExecutionError> {
        match &demo.fail_with {
            Some(msg) => Err(ExecutionError::from(msg.as_str())),
            None => Ok(format!("{} {}: ok", p.action(), p.resource())),
        }
    };
    let result = gate.execute(&proposal, &decision, &executor)?;
    let status = match result.status() {
        ExecutionStatus::Success => result.status().as_str().bright_green(),
        ExecutionStatus::Failure => result.status().as_str().bright_red().bold(),
        _ => result.status().as_str().bright_yellow(),
    };
    println!("{} {} {}", "▸".bright_cyan(), status, result.details());

    let feedback = demo
        .observe
        .as_ref()
        .map(|obs| FeedbackEvent::new(&proposal, obs, Severity::Info));
    gate.learn(&proposal, &result, feedback.as_ref())?;

    if backend != AuditBackend::Memory {
        println!("  audit: {}", audit_path.display().to_string().dimmed());
    }
    Ok(())
}

fn run_policy_eval(config: GateConfig, args: &ProposalArgs, format: &str) -> anyhow::Result<()> {
    use colored::Colorize;

    check_format(format)?;
    let gate = Gate::new(config, Arc::new(MemoryAuditLog::new()))?;
    let proposal = build_request(args)?.build()?;
    let explanation = gate.explain(&proposal);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&explanation)?);
        return Ok(());
    }

    println!("{}", explanation.summary.bold());
    for r in &explanation.policies.results {
        let mark = if r.passed {
            "PASS".bright_green()
        } else {
            "FAIL".bright_red()
        };
        println!("  [{}] {:<12} {}", mark, r.name, r.detail);
    }
    for w in &explanation.warnings {
        println!("  {} {}", "⚠".bright_yellow(), w);
    }
    if explanation.auto_approvable() {
        println!("{}", "would be auto-approved".bright_green());
    } else {
        println!("{}", "would be routed to a human".bright_yellow());
    }
    Ok(())
}

fn read_records(config: &GateConfig, path: Option<PathBuf>) -> anyhow::Result<Vec<AuditRecord>> {
    let (backend, path) = match path {
        Some(p) => {
            let sqlite = matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("db" | "sqlite" | "sqlite3")
            );
            let backend = if sqlite {
                AuditBackend::Sqlite
            } else {
                AuditBackend::Jsonl
            };
            (backend, p)
        }
        None => (config.audit.backend, config.audit.path.clone()),
    };
    match backend {
        AuditBackend::Memory => bail!("the memory audit backend keeps nothing on disk"),
        AuditBackend::Jsonl => audit::read_entries(&path)
            .with_context(|| format!("failed to read {}", path.display())),
        AuditBackend::Sqlite => Ok(SqliteAuditLog::open_read_only(&path)
            .with_context(|| format!("failed to open {}", path.display()))?
            .entries()?),
    }
}

fn record_summary(record: &AuditRecord) -> String {
    let field = |key: &str| {
        record
            .payload
            .get(key)
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };
    match record.stage {
        Stage::Proposed => format!("{} {} {}", field("actor"), field("action"), field("resource")),
        Stage::Explained => format!("auto_approvable={}", field("auto_approvable")),
        Stage::Decided => format!(
            "approved={} by {} ({})",
            field("approved"),
            field("approver"),
            field("reason")
        ),
        Stage::Executed => format!("{} {}", field("status"), field("details")),
        Stage::Learning => {
            if record.payload.get("feedback").is_some_and(|f| !f.is_null()) {
                "with feedback".to_string()
            } else {
                String::new()
            }
        }
    }
}

fn run_audit_show(
    config: &GateConfig,
    path: Option<PathBuf>,
    trace: Option<&str>,
    format: &str,
) -> anyhow::Result<()> {
    use colored::Colorize;

    check_format(format)?;
    let records: Vec<AuditRecord> = read_records(config, path)?
        .into_iter()
        .filter(|r| trace.is_none_or(|t| r.trace_id == t))
        .collect();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{}", "no audit records".dimmed());
        return Ok(());
    }
    for r in &records {
        let stage = match r.stage {
            Stage::Proposed => r.stage.as_str().bright_cyan(),
            Stage::Explained => r.stage.as_str().bright_blue(),
            Stage::Decided => r.stage.as_str().bright_magenta(),
            Stage::Executed => r.stage.as_str().bright_yellow(),
            Stage::Learning => r.stage.as_str().bright_green(),
        };
        println!(
            "{} {:<10} {} {}",
            time::format_millis(r.timestamp).dimmed(),
            stage,
            r.proposal_id,
            record_summary(r)
        );
    }
    Ok(())
}

/// Only JSONL logs carry a hash chain to verify.
fn chain_to_verify(config: &GateConfig, path: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(p) = path {
        return Ok(p);
    }
    if config.audit.backend != AuditBackend::Jsonl {
        bail!(
            "audit verify checks the jsonl hash chain, but the configured backend is {:?}; pass --path to a .jsonl file",
            config.audit.backend
        );
    }
    Ok(config.audit.path.clone())
}

fn run_audit_verify(config: &GateConfig, path: Option<PathBuf>) -> anyhow::Result<()> {
    use colored::Colorize;

    let path = chain_to_verify(config, path)?;
    match audit::verify_chain(&path) {
        Ok(n) => {
            println!(
                "{} {} records verified in {}",
                "✓".bright_green(),
                n,
                path.display()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".bright_red(), e.to_string().bright_red());
            Err(e.into())
        }
    }
}

fn run_config_init(path: &Path, force: bool) -> anyhow::Result<()> {
    use colored::Colorize;

    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    std::fs::write(path, config::default_toml())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("{} wrote {}", "✓".bright_green(), path.display());
    Ok(())
}
