//! CLI struct definitions for the `stewardgate` binary.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "stewardgate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Mediates agent-proposed actions: propose, explain, decide, execute, learn."
)]
pub(crate) struct Cli {
    /// Gate configuration (TOML). Defaults apply when omitted.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// Log level when RUST_LOG is unset. Overrides the config file.
    #[clap(long, global = true)]
    pub log_level: Option<String>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run one proposal through the full lifecycle
    Demo(DemoCli),

    /// Inspect how the policy chain judges a proposal
    Policy(PolicyCli),

    /// Read and verify audit logs
    Audit(AuditCli),

    /// Manage the configuration file
    Config(ConfigCli),
}

#[derive(clap::Args, Debug, Clone)]
pub(crate) struct ProposalArgs {
    #[clap(long, default_value = "agent")]
    pub actor: String,
    #[clap(long)]
    pub action: String,
    #[clap(long)]
    pub resource: String,
    #[clap(long)]
    pub domain: String,
    #[clap(long, default_value = "")]
    pub rationale: String,
    /// How to undo the action. Omit for irreversible actions.
    #[clap(long)]
    pub rollback: Option<String>,
    /// single_device, room, whole_home or network_wide
    #[clap(long)]
    pub blast_radius: Option<String>,
    /// Executor output that counts as success.
    #[clap(long)]
    pub expect: Option<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct DemoCli {
    #[clap(flatten)]
    pub proposal: ProposalArgs,
    /// Name recorded as approver for human decisions.
    #[clap(long, default_value = "steward")]
    pub approver: String,
    /// Answer the approval prompt with yes instead of reading stdin.
    #[clap(long, conflicts_with = "deny")]
    pub approve: bool,
    /// Answer the approval prompt with no instead of reading stdin.
    #[clap(long)]
    pub deny: bool,
    /// Make the simulated executor fail with this message.
    #[clap(long)]
    pub fail_with: Option<String>,
    /// Optional observation recorded in the learning stage.
    #[clap(long)]
    pub observe: Option<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct PolicyCli {
    #[clap(subcommand)]
    pub command: PolicyCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PolicyCommand {
    /// Evaluate every policy against a hypothetical proposal
    Eval {
        #[clap(flatten)]
        proposal: ProposalArgs,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct AuditCli {
    #[clap(subcommand)]
    pub command: AuditCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AuditCommand {
    /// Print the records of a JSONL audit log
    Show {
        /// Audit file (defaults to the configured path).
        #[clap(long)]
        path: Option<PathBuf>,
        /// Only records for this trace id.
        #[clap(long)]
        trace: Option<String>,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Recompute the hash chain of a JSONL audit log
    Verify {
        /// Audit file (defaults to the configured path).
        #[clap(long)]
        path: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct ConfigCli {
    #[clap(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ConfigCommand {
    /// Write an annotated starting configuration
    Init {
        #[clap(long, default_value = "stewardgate.toml")]
        path: PathBuf,
        /// Overwrite an existing file.
        #[clap(long)]
        force: bool,
    },
    /// Validate a configuration file and print the effective settings
    Check {
        #[clap(long)]
        path: Option<PathBuf>,
    },
}
