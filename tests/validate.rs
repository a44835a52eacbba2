use starmap::core::canon::Canon;
use starmap::core::record::ModuleRecord;
use starmap::core::rules::RuleConfig;
use starmap::core::store::{Store, write_atomic};
use starmap::core::validate::validate_store;
use std::collections::BTreeMap;
use tempfile::{TempDir, tempdir};

fn setup_store() -> (TempDir, Store) {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join(".starmap");
    std::fs::create_dir_all(root.join("records")).unwrap();
    let store = Store::open(tmp.path()).unwrap();
    (tmp, store)
}

fn record(path: &str) -> ModuleRecord {
    ModuleRecord {
        path: path.into(),
        name: path.rsplit('/').next().unwrap().into(),
        capabilities: vec![],
        dependencies: vec![],
        owner: "team".into(),
        tier: 1,
        categories: vec!["general".into()],
        confidence: BTreeMap::from([("general".to_string(), 0.0)]),
        suggestions: vec![],
        contract_refs: vec![],
        schema_version: "1.0.0".into(),
        rule_digest: String::new(),
        canon_digest: String::new(),
    }
}

fn persist(store: &Store, record: &ModuleRecord) {
    write_atomic(
        &store.record_path(&record.path),
        record.to_canonical_json().unwrap().as_bytes(),
    )
    .unwrap();
}

#[test]
fn test_clean_store_validates() {
    let (_tmp, store) = setup_store();
    persist(&store, &record("src/a"));
    persist(&store, &record("src/b"));

    let canon = Canon::embedded_default().unwrap();
    let report = validate_store(&store, &canon, &RuleConfig::default(), false).unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.passed, 2);
    assert!(report.ok());
}

#[test]
fn test_unknown_category_collected_non_strict() {
    let (_tmp, store) = setup_store();
    let mut bad = record("src/a");
    bad.categories = vec!["made-up".into()];
    bad.confidence = BTreeMap::from([("made-up".to_string(), 0.9)]);
    persist(&store, &bad);

    let canon = Canon::embedded_default().unwrap();
    let report = validate_store(&store, &canon, &RuleConfig::default(), false).unwrap();
    assert!(!report.ok());
    assert_eq!(report.passed, 0);
    assert!(report.issues[0].message.contains("unknown category"));
}

#[test]
fn test_strict_mode_escalates_to_error() {
    let (_tmp, store) = setup_store();
    let mut bad = record("src/a");
    bad.confidence.insert("general".to_string(), 7.0);
    persist(&store, &bad);

    let canon = Canon::embedded_default().unwrap();
    let err = validate_store(&store, &canon, &RuleConfig::default(), true).unwrap_err();
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_record_path_must_mirror_file_location() {
    let (_tmp, store) = setup_store();
    let mut liar = record("src/elsewhere");
    liar.path = "src/elsewhere".into();
    // Persisted under a different module path than it claims.
    write_atomic(
        &store.record_path("src/actual"),
        liar.to_canonical_json().unwrap().as_bytes(),
    )
    .unwrap();

    let canon = Canon::embedded_default().unwrap();
    let report = validate_store(&store, &canon, &RuleConfig::default(), false).unwrap();
    assert!(!report.ok());
    assert!(report.issues[0].message.contains("does not mirror"));
}

#[test]
fn test_rejected_prefix_record_flagged() {
    let (_tmp, store) = setup_store();
    persist(&store, &record("legacy/old"));

    let canon = Canon::embedded_default().unwrap();
    let report = validate_store(&store, &canon, &RuleConfig::default(), false).unwrap();
    assert!(
        report
            .issues
            .iter()
            .any(|i| i.message.contains("rejected legacy prefix"))
    );
}

#[test]
fn test_unparseable_record_collected() {
    let (_tmp, store) = setup_store();
    write_atomic(&store.record_path("src/junk"), b"not json at all").unwrap();

    let canon = Canon::embedded_default().unwrap();
    let report = validate_store(&store, &canon, &RuleConfig::default(), false).unwrap();
    assert_eq!(report.checked, 1);
    assert!(report.issues[0].message.contains("unparseable"));
}
