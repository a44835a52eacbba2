use starmap::core::record::ModuleRecord;
use starmap::core::runner::{self, GenerateOptions};
use starmap::core::store::Store;
use tempfile::{TempDir, tempdir};

const CATEGORIES: &str = r#"
[[category]]
id = "storage"
label = "Storage"
domain = "durable state"
capabilities = ["persistence"]
path_patterns = ["(^|/)(store|db)(/|$)"]
owner_priors = ["data-team"]
dependency_hints = []

[[category]]
id = "general"
label = "General"
domain = "everything else"
default = true
"#;

const DEFAULT_CEILINGS: &str = "max_promotions_per_run = 25\n\
    max_promotions_per_category = 10\n\
    max_categories_per_module = 2\n\
    min_default_category_percentage = 0.0";

fn rules_toml(ceilings: &str, extra: &str) -> String {
    format!(
        r#"
rejected_prefixes = ["legacy/"]

[weights]
capability_override = 0.60
system_override = 0.75
path_pattern = 0.15
owner_prior = 0.10
dependency_hint = 0.15

[thresholds]
min_suggest = 0.40
min_autopromote = 0.70

[ceilings]
{ceilings}

{extra}
"#
    )
}

fn setup_repo(rules: &str) -> (TempDir, Store) {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join(".starmap");
    std::fs::create_dir_all(root.join("records")).unwrap();
    std::fs::write(root.join("categories.toml"), CATEGORIES).unwrap();
    std::fs::write(root.join("rules.toml"), rules).unwrap();
    let store = Store::open(tmp.path()).unwrap();
    (tmp, store)
}

fn write_module(repo: &std::path::Path, path: &str, manifest: &str) {
    let dir = repo.join(path);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("module.toml"), manifest).unwrap();
}

#[test]
fn test_owner_tier_contracts_preserved_across_regeneration() {
    let (tmp, store) = setup_repo(&rules_toml(DEFAULT_CEILINGS, ""));
    write_module(
        tmp.path(),
        "src/db",
        "name = \"db\"\nowner = \"original-owner\"\ntier = 1\ncapabilities = [\"persistence\"]\ncontracts = [\"CTR-100\"]\n",
    );

    runner::generate(&store, &GenerateOptions::default()).unwrap();
    let first = ModuleRecord::load(&store.record_path("src/db")).unwrap();
    assert_eq!(first.owner, "original-owner");

    // Metadata drifts in the manifest; the record must not follow.
    write_module(
        tmp.path(),
        "src/db",
        "name = \"db\"\nowner = \"someone-else\"\ntier = 3\ncapabilities = [\"persistence\"]\ncontracts = []\n",
    );
    runner::generate(&store, &GenerateOptions::default()).unwrap();

    let second = ModuleRecord::load(&store.record_path("src/db")).unwrap();
    assert_eq!(second.owner, "original-owner");
    assert_eq!(second.tier, 1);
    assert_eq!(second.contract_refs, vec!["CTR-100"]);
}

#[test]
fn test_forced_override_path_takes_fresh_values() {
    let (tmp, store) = setup_repo(&rules_toml(
        DEFAULT_CEILINGS,
        "[exceptions]\nforced_override = [\"src/db\"]\n",
    ));
    write_module(
        tmp.path(),
        "src/db",
        "name = \"db\"\nowner = \"original-owner\"\ntier = 1\ncapabilities = [\"persistence\"]\n",
    );
    runner::generate(&store, &GenerateOptions::default()).unwrap();

    write_module(
        tmp.path(),
        "src/db",
        "name = \"db\"\nowner = \"new-owner\"\ntier = 2\ncapabilities = [\"persistence\"]\n",
    );
    let report = runner::generate(&store, &GenerateOptions::default()).unwrap();

    let record = ModuleRecord::load(&store.record_path("src/db")).unwrap();
    assert_eq!(record.owner, "new-owner");
    assert_eq!(record.tier, 2);
    assert!(!report.override_log.is_empty());
}

#[test]
fn test_promotions_per_run_ceiling_aborts_with_no_writes() {
    let (tmp, store) = setup_repo(&rules_toml(
        "max_promotions_per_run = 2\nmax_promotions_per_category = 10\nmax_categories_per_module = 2\nmin_default_category_percentage = 0.0",
        "",
    ));
    for i in 0..4 {
        write_module(
            tmp.path(),
            &format!("src/m{i}/db"),
            "name = \"db\"\nowner = \"o\"\ntier = 1\ncapabilities = [\"persistence\"]\n",
        );
    }

    let err = runner::generate(&store, &GenerateOptions::default()).unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(store.list_record_files().unwrap().is_empty());
}

#[test]
fn test_per_category_ceiling_aborts() {
    let (tmp, store) = setup_repo(&rules_toml(
        "max_promotions_per_run = 25\nmax_promotions_per_category = 1\nmax_categories_per_module = 2\nmin_default_category_percentage = 0.0",
        "",
    ));
    for i in 0..3 {
        write_module(
            tmp.path(),
            &format!("src/m{i}/db"),
            "name = \"db\"\nowner = \"o\"\ntier = 1\ncapabilities = [\"persistence\"]\n",
        );
    }

    let err = runner::generate(&store, &GenerateOptions::default()).unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(store.list_record_files().unwrap().is_empty());
}

#[test]
fn test_default_share_floor_aborts_runaway_promotion() {
    let (tmp, store) = setup_repo(&rules_toml(
        "max_promotions_per_run = 25\nmax_promotions_per_category = 10\nmax_categories_per_module = 2\nmin_default_category_percentage = 0.5",
        "",
    ));
    for i in 0..3 {
        write_module(
            tmp.path(),
            &format!("src/m{i}/db"),
            "name = \"db\"\nowner = \"o\"\ntier = 1\ncapabilities = [\"persistence\"]\n",
        );
    }

    let err = runner::generate(&store, &GenerateOptions::default()).unwrap_err();
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_rejected_legacy_path_aborts() {
    let (tmp, store) = setup_repo(&rules_toml(DEFAULT_CEILINGS, ""));
    write_module(tmp.path(), "legacy/old", "name = \"old\"\nowner = \"o\"\n");

    let err = runner::generate(&store, &GenerateOptions::default()).unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(store.list_record_files().unwrap().is_empty());
}

#[test]
fn test_threshold_override_option() {
    let (tmp, store) = setup_repo(&rules_toml(DEFAULT_CEILINGS, ""));
    // 0.60 capability evidence only: below the configured 0.70.
    write_module(
        tmp.path(),
        "src/engine",
        "name = \"engine\"\nowner = \"o\"\ntier = 1\ncapabilities = [\"persistence\"]\n",
    );

    runner::generate(&store, &GenerateOptions::default()).unwrap();
    let record = ModuleRecord::load(&store.record_path("src/engine")).unwrap();
    assert_eq!(record.categories, vec!["general"]);

    let options = GenerateOptions {
        min_autopromote: Some(0.55),
        ..GenerateOptions::default()
    };
    runner::generate(&store, &options).unwrap();
    let record = ModuleRecord::load(&store.record_path("src/engine")).unwrap();
    assert_eq!(record.categories, vec!["storage"]);
}
