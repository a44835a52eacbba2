//! Starmap: a module-classification control plane for large repositories.
//!
//! **Starmap is a local-first batch pipeline for regenerating categorical
//! module labels ("stars") safely, at repository scale.**
//!
//! Every discoverable module is scored against weighted evidence signals,
//! classified behind confidence thresholds, and persisted as a canonical
//! record. Bulk regeneration runs behind safety machinery: stratified canary
//! sampling with explicit human approval, aggregate promotion ceilings
//! checked before any write, atomic record writes with a resumability
//! ledger, and post-run round-trip validation with snapshot rollback.
//!
//! # Core Principles
//!
//! - **Local-first**: all state lives under `.starmap/`, versioned and
//!   auditable; there is no daemon and no network call
//! - **Deterministic**: identical inputs and configuration reproduce
//!   byte-identical records; every record pins the digests of the rules and
//!   canon that produced it
//! - **Fail closed**: a full run without an explicit canary approval is a
//!   rejected run
//! - **No partial mutation**: ceilings and legacy-path gates are enforced
//!   against the whole computed batch before the first write lands
//!
//! # Pipeline
//!
//! Signal Extractor -> Scoring Engine -> Classifier -> Record Builder ->
//! {Schema Validator, Contract Reference Validator} -> Safety-Gated Batch
//! Runner -> Audit Reporter.
//!
//! # Examples
//!
//! ```bash
//! # Initialize a store with the embedded default canon
//! starmap init
//!
//! # Classify one module, no writes
//! starmap classify --module src/core/db
//!
//! # Regenerate everything, dry run first
//! starmap generate --dry-run
//!
//! # Canary-gated full run
//! starmap canary build --sample-percent 10
//! starmap canary run --id <RUN>
//! starmap canary approve --id <RUN>
//! starmap run --id <RUN>
//! ```

pub mod core;

mod cli;

use crate::cli::{
    CanaryCommand, Cli, Command, ContractsCommand, GenerateCli, InitCli, ValidateCli,
};
use crate::core::canary;
use crate::core::canon::{Canon, CanonAssets};
use crate::core::contracts::{ContractRegistry, validate_contract_refs};
use crate::core::digest::DigestManifest;
use crate::core::discover::discover_modules;
use crate::core::error::StarmapError;
use crate::core::ledger::LedgerBroker;
use crate::core::record::{ModuleRecord, build_record};
use crate::core::rules::RuleConfig;
use crate::core::runner::{self, GenerateOptions, PipelineContext};
use crate::core::store::{Store, find_store_root, write_atomic};
use crate::core::validate::validate_store;

use clap::Parser;
use colored::Colorize;
use std::fs;
use std::path::PathBuf;

pub fn run() -> Result<(), StarmapError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Init(args) => init_store(args),
        Command::Classify(args) => {
            let store = open_store()?;
            let ctx = PipelineContext::load(&store)?;
            let modules = discover_modules(&store.repo_root)?;
            let module = modules
                .iter()
                .find(|m| m.path == args.module)
                .ok_or_else(|| StarmapError::NotFound(format!("no module at {}", args.module)))?;

            let options = GenerateOptions::default();
            let (classification, warnings) = runner::classify_one(&ctx, module, &options);
            let record_file = store.record_path(&module.path);
            let previous = if record_file.is_file() {
                Some(ModuleRecord::load(&record_file)?)
            } else {
                None
            };
            let (record, _) = build_record(
                module,
                &classification,
                previous.as_ref(),
                &ctx.rules,
                &ctx.digests,
            );

            if args.format == "json" {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&record)
                        .map_err(|e| StarmapError::ConfigError(e.to_string()))?
                );
            } else {
                println!("{}", record.path.bold());
                println!("  categories: {}", record.categories.join(", ").cyan());
                for (category, confidence) in &record.confidence {
                    println!("  {:<12} {:.2}", category, confidence);
                }
                if !record.suggestions.is_empty() {
                    println!("  suggested: {}", record.suggestions.join(", ").yellow());
                }
                for warning in warnings {
                    println!("  {} {}", "warn:".yellow(), warning);
                }
            }
            Ok(())
        }
        Command::Generate(args) => {
            let store = open_store()?;
            let options = generate_options(&args);
            let report = runner::generate(&store, &options)?;
            emit_report(&report, &args.format)?;
            Ok(())
        }
        Command::Validate(args) => {
            let store = open_store()?;
            run_validate(&store, &args)
        }
        Command::Contracts(args) => {
            let store = open_store()?;
            match args.command {
                ContractsCommand::Validate { strict, format } => {
                    run_contracts_validate(&store, strict, &format)
                }
            }
        }
        Command::Canary(args) => {
            let store = open_store()?;
            let ledger = LedgerBroker::new(&store);
            ledger.init()?;
            match args.command {
                CanaryCommand::Build { sample_percent } => {
                    let rules = RuleConfig::load(&store.rules_path())?;
                    let paths: Vec<String> = discover_modules(&store.repo_root)?
                        .into_iter()
                        .map(|m| m.path)
                        .collect();
                    let set = canary::build_canary(&ledger, &paths, sample_percent, &rules)?;
                    println!("Canary built: {}", set.run_id.bold());
                    println!("  fingerprint: {}", set.fingerprint);
                    println!("  sample ({} module(s)):", set.sample.len());
                    for path in &set.sample {
                        println!("    {}", path);
                    }
                    println!("Next: starmap canary run --id {}", set.run_id);
                    Ok(())
                }
                CanaryCommand::Run { id } => {
                    let report = runner::run_canary(&store, &id)?;
                    print!("{}", report.render_text());
                    println!("Awaiting approval: starmap canary approve --id {}", id);
                    Ok(())
                }
                CanaryCommand::Approve { id, actor } => {
                    let approval_id = canary::approve_canary(&ledger, &id, &actor)?;
                    println!("Canary approved (approval {})", approval_id);
                    println!("Next: starmap run --id {}", id);
                    Ok(())
                }
            }
        }
        Command::Run(args) => {
            let store = open_store()?;
            let report = runner::run_full(&store, &args.id)?;
            print!("{}", report.render_text());
            Ok(())
        }
        Command::Rollback(args) => {
            let store = open_store()?;
            let restored = runner::rollback(&store, &args.id)?;
            println!(
                "Restored {} record file(s) from snapshot {}",
                restored.len(),
                args.id
            );
            for path in restored {
                println!("  {}", path);
            }
            Ok(())
        }
    }
}

fn open_store() -> Result<Store, StarmapError> {
    let cwd = std::env::current_dir().map_err(StarmapError::IoError)?;
    let repo_root = find_store_root(&cwd).ok_or_else(|| {
        StarmapError::NotFound("no .starmap store found here or above (run `starmap init`)".to_string())
    })?;
    Store::open(&repo_root)
}

fn init_store(args: InitCli) -> Result<(), StarmapError> {
    let target = match args.dir {
        Some(d) => d,
        None => std::env::current_dir().map_err(StarmapError::IoError)?,
    };
    let root = target.join(crate::core::store::STORE_DIR);
    fs::create_dir_all(root.join("records")).map_err(StarmapError::IoError)?;
    fs::create_dir_all(root.join("backups")).map_err(StarmapError::IoError)?;
    fs::create_dir_all(root.join("reports")).map_err(StarmapError::IoError)?;

    seed_file(&root.join("categories.toml"), "categories.toml", args.force)?;
    seed_file(&root.join("rules.toml"), "rules.toml", args.force)?;
    let contracts = root.join("contracts.toml");
    if !contracts.exists() {
        write_atomic(&contracts, b"# Starmap contract registry.\n")?;
    }

    let store = Store::open(&target)?;
    // Fail fast on a broken seed before anything else uses it.
    Canon::load(&store.canon_path())?;
    RuleConfig::load(&store.rules_path())?;
    LedgerBroker::new(&store).init()?;
    DigestManifest::compute(&store)?.write(&store)?;

    println!("Starmap store initialized at {}", root.display());
    println!("Next: starmap generate --dry-run");
    Ok(())
}

fn seed_file(target: &PathBuf, asset: &str, force: bool) -> Result<(), StarmapError> {
    if target.exists() && !force {
        return Ok(());
    }
    let file = CanonAssets::get(asset)
        .ok_or_else(|| StarmapError::NotFound(format!("embedded asset {} missing", asset)))?;
    write_atomic(target, &file.data)
}

fn generate_options(args: &GenerateCli) -> GenerateOptions {
    GenerateOptions {
        dry_run: args.dry_run,
        min_autopromote: args.min_autopromote,
        preserve_off: args.no_preserve,
        scope: args.scope.clone(),
        strict: args.strict,
    }
}

fn emit_report(
    report: &crate::core::audit::RunReport,
    format: &str,
) -> Result<(), StarmapError> {
    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(report)
                .map_err(|e| StarmapError::ConfigError(e.to_string()))?
        );
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

fn run_validate(store: &Store, args: &ValidateCli) -> Result<(), StarmapError> {
    let canon = Canon::load(&store.canon_path())?;
    let rules = RuleConfig::load(&store.rules_path())?;

    // Determinism audit: flag configuration drift since the pinned digests.
    if store.digests_path().is_file() {
        let pinned = DigestManifest::load(store)?;
        let current = DigestManifest::compute(store)?;
        if pinned != current {
            eprintln!(
                "{} rule/canon configuration changed since digests were pinned; records may regenerate differently",
                "note:".yellow()
            );
        }
    }

    let report = validate_store(store, &canon, &rules, args.strict)?;

    if args.format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&report)
                .map_err(|e| StarmapError::ConfigError(e.to_string()))?
        );
    } else {
        println!(
            "Schema validation: {} checked, {} passed, {} issue(s)",
            report.checked,
            report.passed,
            report.issues.len()
        );
        for issue in &report.issues {
            println!("  {} {}: {}", "fail:".red(), issue.path, issue.message);
        }
    }

    if report.ok() {
        Ok(())
    } else {
        Err(StarmapError::SchemaValidationError(format!(
            "{} record(s) failed schema validation",
            report.issues.len()
        )))
    }
}

fn run_contracts_validate(store: &Store, strict: bool, format: &str) -> Result<(), StarmapError> {
    let registry = ContractRegistry::load(&store.contracts_path())?;
    let mut records = Vec::new();
    for file in store.list_record_files()? {
        records.push(ModuleRecord::load(&file)?);
    }
    let report = validate_contract_refs(&records, &registry, strict)?;

    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&report)
                .map_err(|e| StarmapError::ConfigError(e.to_string()))?
        );
    } else {
        println!(
            "Contract validation: {} reference(s) checked, {} issue(s)",
            report.checked_refs,
            report.issues.len()
        );
        for issue in &report.issues {
            println!("  {} {}: {}", "fail:".red(), issue.module, issue.message);
        }
    }

    if report.ok() {
        Ok(())
    } else {
        Err(StarmapError::ContractReferenceError(format!(
            "{} contract issue(s) found",
            report.issues.len()
        )))
    }
}
