//! CLI struct definitions for the Starmap command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "starmap",
    version = env!("CARGO_PKG_VERSION"),
    about = "Starmap is the daemonless, local-first classification pipeline that scores every repository module against weighted evidence, assigns category stars behind confidence thresholds and promotion ceilings, and regenerates records in bulk through canary-gated, resumable, rollback-capable runs."
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Initialize a .starmap store with the embedded default canon and rules
    Init(InitCli),

    /// Print the version
    Version,

    /// Score and classify a single module without writing anything
    Classify(ClassifyCli),

    /// Regenerate module records end-to-end (ceiling-checked, atomic)
    Generate(GenerateCli),

    /// Validate every persisted record against the schema
    Validate(ValidateCli),

    /// Contract registry checks
    Contracts(ContractsCli),

    /// Canary lifecycle: build, dry-run, approve
    Canary(CanaryCli),

    /// Execute an approved full run
    Run(RunCli),

    /// Restore records from a run's pre-run snapshot
    Rollback(RollbackCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct InitCli {
    /// Directory to initialize (defaults to current working directory).
    #[clap(short, long)]
    pub dir: Option<PathBuf>,
    /// Overwrite an existing canon and rule configuration.
    #[clap(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ClassifyCli {
    /// Repo-relative module path.
    #[clap(long)]
    pub module: String,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct GenerateCli {
    /// Compute and report without writing any record.
    #[clap(long)]
    pub dry_run: bool,
    /// Override the configured autopromote threshold for this run.
    #[clap(long)]
    pub min_autopromote: Option<f64>,
    /// Restrict the run to modules under this path prefix.
    #[clap(long)]
    pub scope: Option<String>,
    /// Rebuild preserved fields from fresh metadata instead of carrying them
    /// forward.
    #[clap(long)]
    pub no_preserve: bool,
    /// Abort on the first per-record validation failure.
    #[clap(long)]
    pub strict: bool,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ValidateCli {
    /// Escalate any validation failure to a fatal error.
    #[clap(long)]
    pub strict: bool,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ContractsCli {
    #[clap(subcommand)]
    pub command: ContractsCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ContractsCommand {
    /// Check every record's contract references against the registry
    Validate {
        /// Escalate any contract issue to a fatal error.
        #[clap(long)]
        strict: bool,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct CanaryCli {
    #[clap(subcommand)]
    pub command: CanaryCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CanaryCommand {
    /// Draw a stratified sample and open a run session
    Build {
        /// Percentage of each top-level stratum to sample.
        #[clap(long, default_value = "10")]
        sample_percent: f64,
    },
    /// Dry-run the canary sample and report what would change
    Run {
        #[clap(long)]
        id: String,
    },
    /// Record an explicit approval for a built canary
    Approve {
        #[clap(long)]
        id: String,
        #[clap(long, default_value = "operator")]
        actor: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct RunCli {
    /// Run session id (from `starmap canary build`).
    #[clap(long)]
    pub id: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RollbackCli {
    /// Run session id whose snapshot should be restored.
    #[clap(long)]
    pub id: String,
}
