use starmap::core::contracts::{
    ContractIssueKind, ContractRegistry, validate_contract_refs,
};
use starmap::core::record::ModuleRecord;
use std::collections::BTreeMap;
use tempfile::tempdir;

fn record(path: &str, tier: u8, refs: &[&str]) -> ModuleRecord {
    ModuleRecord {
        path: path.into(),
        name: path.rsplit('/').next().unwrap().into(),
        capabilities: vec![],
        dependencies: vec![],
        owner: "team".into(),
        tier,
        categories: vec!["general".into()],
        confidence: BTreeMap::new(),
        suggestions: vec![],
        contract_refs: refs.iter().map(|s| s.to_string()).collect(),
        schema_version: "1.0.0".into(),
        rule_digest: String::new(),
        canon_digest: String::new(),
    }
}

#[test]
fn test_registry_loads_from_toml() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("contracts.toml");
    std::fs::write(
        &path,
        r#"
[[contract]]
id = "CTR-100"
module = "src/db"
required_for_top_tier = true

[[contract]]
id = "CTR-200"
module = "src/api"
"#,
    )
    .unwrap();

    let registry = ContractRegistry::load(&path).unwrap();
    assert_eq!(registry.contracts.len(), 2);
    assert!(registry.get("CTR-100").unwrap().required_for_top_tier);
    assert!(!registry.get("CTR-200").unwrap().required_for_top_tier);
}

#[test]
fn test_missing_registry_file_is_empty() {
    let tmp = tempdir().unwrap();
    let registry = ContractRegistry::load(&tmp.path().join("contracts.toml")).unwrap();
    assert!(registry.contracts.is_empty());
}

#[test]
fn test_valid_acyclic_fixture_has_zero_errors() {
    let registry = ContractRegistry {
        contracts: vec![
            starmap::core::contracts::ContractRecord {
                id: "CTR-100".into(),
                module: "src/db".into(),
                required_for_top_tier: true,
            },
            starmap::core::contracts::ContractRecord {
                id: "CTR-200".into(),
                module: "src/api".into(),
                required_for_top_tier: false,
            },
        ],
    };
    // api implements CTR-100 (owned by db); db implements its own CTR-100.
    // A chain, not a cycle.
    let records = vec![
        record("src/api", 1, &["CTR-100"]),
        record("src/db", 0, &["CTR-100"]),
        record("src/misc", 2, &[]),
    ];
    let report = validate_contract_refs(&records, &registry, false).unwrap();
    assert!(report.ok(), "unexpected issues: {:?}", report.issues);
}

#[test]
fn test_malformed_id_and_two_node_cycle_all_flagged() {
    let registry = ContractRegistry {
        contracts: vec![
            starmap::core::contracts::ContractRecord {
                id: "CTR-100".into(),
                module: "src/b".into(),
                required_for_top_tier: false,
            },
            starmap::core::contracts::ContractRecord {
                id: "CTR-200".into(),
                module: "src/a".into(),
                required_for_top_tier: false,
            },
        ],
    };
    let records = vec![
        record("src/a", 1, &["bogus id", "CTR-100"]),
        record("src/b", 1, &["CTR-200"]),
    ];

    let report = validate_contract_refs(&records, &registry, false).unwrap();
    let kinds: Vec<ContractIssueKind> = report.issues.iter().map(|i| i.kind).collect();
    assert!(kinds.contains(&ContractIssueKind::Malformed));
    assert!(kinds.contains(&ContractIssueKind::Circular));
    // Both deliberately-broken fixtures flagged, nothing else.
    assert_eq!(report.issues.len(), 2);
}

#[test]
fn test_top_tier_without_contracts_warns_then_fails_strict() {
    let records = vec![record("src/core", 0, &[])];
    let registry = ContractRegistry::default();

    let report = validate_contract_refs(&records, &registry, false).unwrap();
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].kind, ContractIssueKind::TopTierUncovered);

    let err = validate_contract_refs(&records, &registry, true).unwrap_err();
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_unknown_reference_flagged_as_missing() {
    let records = vec![record("src/a", 1, &["CTR-999"])];
    let report =
        validate_contract_refs(&records, &ContractRegistry::default(), false).unwrap();
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].kind, ContractIssueKind::Missing);
}
