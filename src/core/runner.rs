//! Safety-gated batch runner.
//!
//! Orchestrates the whole pipeline over a module set: classification for
//! every module is computed first, the aggregate is checked against every
//! ceiling and safety gate, and only then do writes happen — atomically, in
//! parallel chunks, each completion recorded in the resumability ledger the
//! moment its file lands. Post-run validation re-reads everything written and
//! re-verifies the preservation invariants against the pre-run snapshot; a
//! mismatch restores the snapshot wholesale.
//!
//! Run lifecycle:
//! `Draft -> CanaryBuilt -> {CanaryApproved | CanaryRejected} ->
//! FullRunInProgress -> PostRunValidated -> {Committed | RolledBack}`.

use crate::core::audit::{ModuleIssue, RecordDiff, RunReport};
use crate::core::canary;
use crate::core::canon::{Canon, CompiledCategory};
use crate::core::classify::classify_scores;
use crate::core::contracts::{ContractRegistry, validate_contract_refs};
use crate::core::digest::DigestManifest;
use crate::core::discover::{DiscoveredModule, discover_modules};
use crate::core::error::StarmapError;
use crate::core::ledger::{LedgerBroker, RunState};
use crate::core::record::{ModuleRecord, build_record};
use crate::core::rules::RuleConfig;
use crate::core::score::score_module;
use crate::core::signal::extract_signals;
use crate::core::store::{Store, write_atomic};
use crate::core::validate::validate_record;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fs;
use ulid::Ulid;

/// Files handed to one worker at a time. Each chunk is owned exclusively by
/// its worker, so no record file is ever written by two threads.
const CHUNK_SIZE: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Compute and report, write nothing.
    pub dry_run: bool,
    /// Override the configured autopromote threshold for this run.
    pub min_autopromote: Option<f64>,
    /// When false, preserved fields are rebuilt from fresh metadata for every
    /// module (equivalent to a forced override on all paths).
    pub preserve_off: bool,
    /// Restrict the run to modules under this path prefix.
    pub scope: Option<String>,
    /// Escalate per-record validation failures to a fatal error.
    pub strict: bool,
}

/// Everything the pipeline needs, loaded once per run.
pub struct PipelineContext {
    pub canon: Canon,
    pub compiled: Vec<CompiledCategory>,
    pub rules: RuleConfig,
    pub digests: DigestManifest,
}

impl PipelineContext {
    pub fn load(store: &Store) -> Result<PipelineContext, StarmapError> {
        let canon = Canon::load(&store.canon_path())?;
        let compiled = canon.compile()?;
        let rules = RuleConfig::load(&store.rules_path())?;
        let digests = DigestManifest::compute(store)?;
        digests.write(store)?;
        Ok(PipelineContext {
            canon,
            compiled,
            rules,
            digests,
        })
    }
}

/// One intended record write, fully computed before any I/O.
#[derive(Debug, Clone)]
pub struct PlannedWrite {
    pub module_path: String,
    pub record: ModuleRecord,
    pub bytes: String,
    pub previous: Option<ModuleRecord>,
    pub diff: RecordDiff,
    /// False when the on-disk bytes already match: nothing to do.
    pub changed: bool,
}

#[derive(Debug, Default)]
pub struct BatchPlan {
    pub writes: Vec<PlannedWrite>,
    pub warnings: Vec<ModuleIssue>,
    pub override_log: Vec<String>,
    pub suggestions: usize,
    /// Modules whose fresh record failed schema validation and were retained
    /// unchanged (non-strict mode).
    pub retained: usize,
}

/// Pure classification for a single module: signals, scores, thresholds.
pub fn classify_one(
    ctx: &PipelineContext,
    module: &DiscoveredModule,
    options: &GenerateOptions,
) -> (crate::core::classify::Classification, Vec<String>) {
    let (signals, warnings) = extract_signals(module, &ctx.rules);
    let scores = score_module(&signals, &ctx.compiled, &ctx.rules.weights);
    let mut thresholds = ctx.rules.thresholds.clone();
    if let Some(t) = options.min_autopromote {
        thresholds.min_autopromote = t;
    }
    let classification = classify_scores(
        &scores,
        &thresholds,
        &ctx.rules.ceilings,
        &ctx.canon.default_category().id,
    );
    (classification, warnings)
}

/// Compute the full batch: every record built and serialized, nothing
/// written. Per-module schema failures keep the previous record (non-strict)
/// or abort (strict).
pub fn plan_batch(
    store: &Store,
    ctx: &PipelineContext,
    modules: &[DiscoveredModule],
    options: &GenerateOptions,
) -> Result<BatchPlan, StarmapError> {
    let mut rules = ctx.rules.clone();
    if options.preserve_off {
        rules
            .exceptions
            .forced_override
            .extend(modules.iter().map(|m| m.path.clone()));
    }

    let mut plan = BatchPlan::default();

    for module in modules {
        if rules.is_force_excluded(&module.path) {
            continue;
        }
        if let Some(scope) = &options.scope {
            if module.path != *scope && !module.path.starts_with(&format!("{}/", scope)) {
                continue;
            }
        }
        // Run-level gate, not a per-record issue: a legacy path aborts the
        // whole run before anything mutates.
        if let Some(prefix) = rules.rejected_prefix_of(&module.path) {
            return Err(StarmapError::SafetyGateError(format!(
                "rejected legacy path detected: {} (prefix {:?})",
                module.path, prefix
            )));
        }

        let (classification, warnings) = classify_one(ctx, module, options);
        for message in warnings {
            plan.warnings.push(ModuleIssue {
                path: module.path.clone(),
                message,
            });
        }
        plan.suggestions += classification.suggestions.len();

        let record_file = store.record_path(&module.path);
        let previous = if record_file.is_file() {
            match ModuleRecord::load(&record_file) {
                Ok(r) => Some(r),
                Err(e) => {
                    // Unreadable previous record: regenerate from scratch.
                    plan.warnings.push(ModuleIssue {
                        path: module.path.clone(),
                        message: format!("previous record unreadable, rebuilding: {}", e),
                    });
                    None
                }
            }
        } else {
            None
        };

        let (record, override_log) =
            build_record(module, &classification, previous.as_ref(), &rules, &ctx.digests);
        plan.override_log.extend(override_log);

        let issues = validate_record(&record, &ctx.canon, &rules);
        if !issues.is_empty() {
            if options.strict {
                return Err(StarmapError::SchemaValidationError(format!(
                    "{}: {}",
                    module.path, issues[0]
                )));
            }
            for message in issues {
                plan.warnings.push(ModuleIssue {
                    path: module.path.clone(),
                    message: format!("record retained unchanged: {}", message),
                });
            }
            plan.retained += 1;
            continue;
        }

        let bytes = record.to_canonical_json()?;
        let changed = match fs::read_to_string(&record_file) {
            Ok(existing) => existing != bytes,
            Err(_) => true,
        };
        let before: Vec<String> = previous
            .as_ref()
            .map(|p| p.categories.clone())
            .unwrap_or_default();
        let diff = RecordDiff::compute(&module.path, &before, &record.categories);

        plan.writes.push(PlannedWrite {
            module_path: module.path.clone(),
            record,
            bytes,
            previous,
            diff,
            changed,
        });
    }

    Ok(plan)
}

/// Contract reference validation over the planned records. Issues surface as
/// per-module warnings in the final report; strict mode makes them fatal.
fn contract_issues(
    store: &Store,
    plan: &BatchPlan,
    strict: bool,
) -> Result<Vec<ModuleIssue>, StarmapError> {
    let registry = ContractRegistry::load(&store.contracts_path())?;
    let records: Vec<ModuleRecord> = plan.writes.iter().map(|w| w.record.clone()).collect();
    let report = validate_contract_refs(&records, &registry, strict)?;
    Ok(report
        .issues
        .into_iter()
        .map(|i| ModuleIssue {
            path: i.module,
            message: i.message,
        })
        .collect())
}

/// New promotions in the plan: categories added to a module, excluding the
/// default category (falling back is not a promotion).
pub fn planned_promotions<'a>(
    plan: &'a BatchPlan,
    default_category: &str,
) -> Vec<(&'a str, &'a str)> {
    let mut out = Vec::new();
    for write in &plan.writes {
        for added in &write.diff.added {
            if added != default_category {
                out.push((write.module_path.as_str(), added.as_str()));
            }
        }
    }
    out
}

/// The aggregate safety gate, checked before any write is flushed.
///
/// A breach here aborts with no filesystem mutation.
pub fn enforce_gates(
    plan: &BatchPlan,
    rules: &RuleConfig,
    default_category: &str,
) -> Result<(), StarmapError> {
    for write in &plan.writes {
        if let Some(prefix) = rules.rejected_prefix_of(&write.module_path) {
            return Err(StarmapError::SafetyGateError(format!(
                "rejected legacy path detected: {} (prefix {:?})",
                write.module_path, prefix
            )));
        }
    }

    let promotions = planned_promotions(plan, default_category);
    if promotions.len() > rules.ceilings.max_promotions_per_run {
        return Err(StarmapError::CeilingExceededError(format!(
            "{} promotions exceed max_promotions_per_run {}",
            promotions.len(),
            rules.ceilings.max_promotions_per_run
        )));
    }

    let mut per_category: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, category) in &promotions {
        *per_category.entry(category).or_insert(0) += 1;
    }
    for (category, count) in &per_category {
        if *count > rules.ceilings.max_promotions_per_category {
            return Err(StarmapError::CeilingExceededError(format!(
                "{} promotions into {:?} exceed max_promotions_per_category {}",
                count, category, rules.ceilings.max_promotions_per_category
            )));
        }
    }

    if !plan.writes.is_empty() {
        let in_default = plan
            .writes
            .iter()
            .filter(|w| w.record.categories.iter().any(|c| c == default_category))
            .count();
        let share = in_default as f64 / plan.writes.len() as f64;
        if share < rules.ceilings.min_default_category_percentage {
            return Err(StarmapError::CeilingExceededError(format!(
                "default-category share {:.2} below min_default_category_percentage {:.2}",
                share, rules.ceilings.min_default_category_percentage
            )));
        }
    }

    Ok(())
}

struct ChunkOutcome {
    written: usize,
    unchanged: usize,
}

/// Flush the plan to disk: parallel chunk workers, atomic writes, immediate
/// resumability-ledger appends, promotion-ledger rows for every added
/// category. Paths in `skip` were completed by an earlier interrupted run
/// and are not reprocessed.
fn execute_writes(
    store: &Store,
    ledger: &LedgerBroker,
    run_id: &str,
    plan: &BatchPlan,
    skip: &FxHashSet<String>,
    default_category: &str,
) -> Result<(usize, usize), StarmapError> {
    let chunks: Vec<&[PlannedWrite]> = plan.writes.chunks(CHUNK_SIZE).collect();

    let outcomes: Vec<Result<ChunkOutcome, StarmapError>> = chunks
        .into_par_iter()
        .map(|chunk| {
            let mut outcome = ChunkOutcome {
                written: 0,
                unchanged: 0,
            };
            for write in chunk {
                if skip.contains(&write.module_path) {
                    continue;
                }
                if write.changed {
                    write_atomic(&store.record_path(&write.module_path), write.bytes.as_bytes())?;
                    outcome.written += 1;
                } else {
                    outcome.unchanged += 1;
                }
                ledger.mark_completed(run_id, &write.module_path)?;
                for added in &write.diff.added {
                    if added != default_category {
                        ledger.record_promotion(
                            run_id,
                            &write.module_path,
                            added,
                            &write.diff.before,
                            &write.diff.after,
                        )?;
                    }
                }
            }
            Ok(outcome)
        })
        .collect();

    let mut written = 0;
    let mut unchanged = 0;
    for outcome in outcomes {
        let o = outcome?;
        written += o.written;
        unchanged += o.unchanged;
    }
    Ok((written, unchanged))
}

/// Round-trip verification plus preservation re-check against the snapshot.
/// The preservation check is skipped entirely for a run that deliberately
/// rebuilt preserved fields everywhere.
fn post_run_validate(
    store: &Store,
    plan: &BatchPlan,
    rules: &RuleConfig,
    preserve_off: bool,
    backup_run_id: Option<&str>,
) -> Result<(), StarmapError> {
    for write in &plan.writes {
        let on_disk = fs::read_to_string(store.record_path(&write.module_path))
            .map_err(StarmapError::IoError)?;
        if on_disk != write.bytes {
            return Err(StarmapError::RollbackRequiredError(format!(
                "round-trip mismatch for {}",
                write.module_path
            )));
        }
    }

    if preserve_off {
        return Ok(());
    }

    if let Some(run_id) = backup_run_id {
        let snapshot_dir = store.backups_dir().join(run_id);
        for write in &plan.writes {
            if rules.is_forced_override(&write.module_path) {
                continue;
            }
            let snapshot_file = snapshot_dir.join(format!(
                "{}{}",
                write.module_path,
                crate::core::store::RECORD_SUFFIX
            ));
            if !snapshot_file.is_file() {
                continue; // module was new this run
            }
            let before = ModuleRecord::load(&snapshot_file)?;
            let after = &write.record;
            if before.owner != after.owner
                || before.tier != after.tier
                || before.contract_refs != after.contract_refs
            {
                return Err(StarmapError::RollbackRequiredError(format!(
                    "preserved fields drifted for {}",
                    write.module_path
                )));
            }
        }
    }

    Ok(())
}

fn build_report(
    run_id: &str,
    state: &str,
    options: &GenerateOptions,
    plan: &BatchPlan,
    written: usize,
    unchanged: usize,
    default_category: &str,
) -> RunReport {
    let promotions = planned_promotions(plan, default_category);
    let mut per_category: BTreeMap<String, usize> = BTreeMap::new();
    for (_, category) in &promotions {
        *per_category.entry(category.to_string()).or_insert(0) += 1;
    }
    RunReport {
        run_id: run_id.to_string(),
        state: state.to_string(),
        dry_run: options.dry_run,
        processed: plan.writes.len() + plan.retained,
        written,
        unchanged,
        promoted_total: promotions.len(),
        promotions_per_category: per_category,
        diffs: plan.writes.iter().map(|w| w.diff.clone()).collect(),
        suggestions: plan.suggestions,
        warnings: plan.warnings.clone(),
        override_log: plan.override_log.clone(),
    }
}

/// End-to-end generation over the discovered module set (or a scoped
/// subset). Ungated by canary approval but still ceiling-checked, snapshot-
/// backed, and round-trip verified.
pub fn generate(store: &Store, options: &GenerateOptions) -> Result<RunReport, StarmapError> {
    let ctx = PipelineContext::load(store)?;
    let modules = discover_modules(&store.repo_root)?;
    let mut plan = plan_batch(store, &ctx, &modules, options)?;
    let refs = contract_issues(store, &plan, options.strict)?;
    plan.warnings.extend(refs);
    let default_category = ctx.canon.default_category().id.clone();

    enforce_gates(&plan, &ctx.rules, &default_category)?;

    let run_id = Ulid::new().to_string();
    if options.dry_run {
        let report = build_report(&run_id, "dry_run", options, &plan, 0, 0, &default_category);
        return Ok(report);
    }

    let ledger = LedgerBroker::new(store);
    ledger.init()?;
    store.snapshot_records(&run_id)?;

    let (written, unchanged) = execute_writes(
        store,
        &ledger,
        &run_id,
        &plan,
        &FxHashSet::default(),
        &default_category,
    )?;

    if let Err(e) = post_run_validate(store, &plan, &ctx.rules, options.preserve_off, Some(&run_id))
    {
        store.restore_records(&run_id)?;
        return Err(e);
    }

    let report = build_report(
        &run_id,
        "committed",
        options,
        &plan,
        written,
        unchanged,
        &default_category,
    );
    report.persist(store)?;
    Ok(report)
}

/// Dry-run the canary sample and report what the full run would change.
/// The session stays in `CanaryBuilt`, awaiting an explicit approval.
pub fn run_canary(store: &Store, run_id: &str) -> Result<RunReport, StarmapError> {
    let ledger = LedgerBroker::new(store);
    ledger.init()?;
    let session = ledger.load_session(run_id)?;
    if session.state != RunState::CanaryBuilt {
        return Err(StarmapError::SafetyGateError(format!(
            "run {} is in state {}, canary can only run from canary_built",
            run_id,
            session.state.as_str()
        )));
    }

    let ctx = PipelineContext::load(store)?;
    let sample: FxHashSet<&str> = session.sample.iter().map(|s| s.as_str()).collect();
    let modules: Vec<DiscoveredModule> = discover_modules(&store.repo_root)?
        .into_iter()
        .filter(|m| sample.contains(m.path.as_str()))
        .collect();

    let options = GenerateOptions {
        dry_run: true,
        ..GenerateOptions::default()
    };
    let mut plan = plan_batch(store, &ctx, &modules, &options)?;
    let refs = contract_issues(store, &plan, false)?;
    plan.warnings.extend(refs);
    let default_category = ctx.canon.default_category().id.clone();
    enforce_gates(&plan, &ctx.rules, &default_category)?;

    let report = build_report(run_id, "canary_built", &options, &plan, 0, 0, &default_category);
    report.persist(store)?;
    Ok(report)
}

/// The approved full run. Fails closed without a canary approval, resumes
/// from the ledger after a crash, and rolls back on post-run validation
/// failure.
pub fn run_full(store: &Store, run_id: &str) -> Result<RunReport, StarmapError> {
    let ledger = LedgerBroker::new(store);
    ledger.init()?;

    // Fail closed: absence of an approval marker is rejection.
    canary::check_approved(&ledger, run_id)?;
    ledger.transition(run_id, RunState::FullRunInProgress)?;

    let ctx = PipelineContext::load(store)?;
    let modules = discover_modules(&store.repo_root)?;
    let options = GenerateOptions::default();
    let mut plan = plan_batch(store, &ctx, &modules, &options)?;
    let refs = contract_issues(store, &plan, false)?;
    plan.warnings.extend(refs);
    let default_category = ctx.canon.default_category().id.clone();

    if let Err(e) = enforce_gates(&plan, &ctx.rules, &default_category) {
        ledger.transition(run_id, RunState::Aborted)?;
        return Err(e);
    }

    // Snapshot once; a resumed run keeps the original pre-run snapshot.
    let session = ledger.load_session(run_id)?;
    let backup_run_id = match session.backup_ref {
        Some(existing) => existing,
        None => {
            store.snapshot_records(run_id)?;
            ledger.set_backup_ref(run_id, run_id)?;
            run_id.to_string()
        }
    };

    let skip = ledger.completed_paths(run_id)?;
    let (written, unchanged) =
        execute_writes(store, &ledger, run_id, &plan, &skip, &default_category)?;

    ledger.transition(run_id, RunState::PostRunValidated)?;
    if let Err(e) = post_run_validate(store, &plan, &ctx.rules, false, Some(&backup_run_id)) {
        let restored = store.restore_records(&backup_run_id)?;
        ledger.transition(run_id, RunState::RolledBack)?;
        return Err(StarmapError::RollbackRequiredError(format!(
            "{}; restored {} file(s) from snapshot {}",
            e,
            restored.len(),
            backup_run_id
        )));
    }
    ledger.transition(run_id, RunState::Committed)?;

    let report = build_report(
        run_id,
        RunState::Committed.as_str(),
        &options,
        &plan,
        written,
        unchanged,
        &default_category,
    );
    report.persist(store)?;
    Ok(report)
}

/// Restore the record tree from a run's snapshot. Returns restored paths.
pub fn rollback(store: &Store, run_id: &str) -> Result<Vec<String>, StarmapError> {
    let ledger = LedgerBroker::new(store);
    ledger.init()?;
    let session = ledger.load_session(run_id)?;
    let backup_run_id = session
        .backup_ref
        .clone()
        .ok_or_else(|| StarmapError::NotFound(format!("run {} has no backup snapshot", run_id)))?;

    let restored = store.restore_records(&backup_run_id)?;
    match session.state {
        RunState::PostRunValidated => ledger.transition(run_id, RunState::RolledBack)?,
        RunState::FullRunInProgress => ledger.transition(run_id, RunState::Aborted)?,
        _ => {}
    }
    Ok(restored)
}
