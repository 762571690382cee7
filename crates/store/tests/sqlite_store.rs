use std::path::PathBuf;

use fleetsync_import::config::{IdFormat, ReplaceMode};
use fleetsync_import::loader::{load_canonical_csv, load_import_rows};
use fleetsync_import::model::MatchOutcome;
use fleetsync_import::{CellValue, ImportError, ImportProfile, ImportRow, Importer, StoreStage};
use fleetsync_store::SqliteStore;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../import/tests/fixtures")
}

fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixtures_dir().join(name)).unwrap()
}

fn seeded(path: &std::path::Path) -> (ImportProfile, SqliteStore) {
    let profile = ImportProfile::from_toml(&fixture("fuel-cards.import.toml")).unwrap();
    let canonical = load_canonical_csv(&fixture("assignments.csv"), &profile).unwrap();
    let mut store = SqliteStore::open(path).unwrap();
    store.replace_canonical(&canonical).unwrap();
    (profile, store)
}

#[test]
fn import_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.db");
    let (profile, mut store) = seeded(&path);

    let rows = load_import_rows(&fixture("fuel-cards.csv"), &profile).unwrap();
    let outcome = Importer::new(&profile).import_from_store(rows, &mut store).unwrap();
    assert_eq!(outcome.inserted_count, 3);
    drop(store);

    let store = SqliteStore::open(&path).unwrap();
    let records = store.records().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].foreign_key.as_deref(), Some("a-102"));
    assert_eq!(records[0].field("brand"), Some(&CellValue::from("Renault")));
    assert_eq!(
        records[0].field("request_date"),
        Some(&CellValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()))
    );
    assert_eq!(records[2].outcome, MatchOutcome::Unmatched);
}

#[test]
fn reimport_replaces_previous_records() {
    let dir = tempfile::tempdir().unwrap();
    let (profile, mut store) = seeded(&dir.path().join("fleet.db"));
    let importer = Importer::new(&profile);

    let rows = load_import_rows(&fixture("fuel-cards.csv"), &profile).unwrap();
    importer.import_from_store(rows, &mut store).unwrap();

    let second = vec![ImportRow::new().with("driver", "Giulia Verdi")];
    let outcome = importer.import_from_store(second, &mut store).unwrap();
    assert_eq!(outcome.deleted_count, 3);
    assert_eq!(store.record_count().unwrap(), 1);
}

fn duplicate_id_rows() -> Vec<ImportRow> {
    vec![
        ImportRow::new().with("driver", "Giulia Verdi").with_id("r-1"),
        ImportRow::new().with("driver", "Paolo Neri").with_id("r-2"),
        ImportRow::new().with("driver", "Paolo Neri").with_id("r-1"),
    ]
}

#[test]
fn constraint_violation_reports_failing_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (mut profile, mut store) = seeded(&dir.path().join("fleet.db"));
    profile.id_format = IdFormat::Any;
    profile.batch_size = 2;

    let failure = Importer::new(&profile)
        .import_from_store(duplicate_id_rows(), &mut store)
        .unwrap_err();

    assert_eq!(failure.inserted_count, 2);
    match &failure.error {
        ImportError::Store { stage, batch_index, .. } => {
            assert_eq!(*stage, StoreStage::Insert);
            assert_eq!(*batch_index, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    // First batch stays; nothing from the failed batch does.
    assert_eq!(store.record_count().unwrap(), 2);
}

#[test]
fn transactional_failure_keeps_old_records() {
    let dir = tempfile::tempdir().unwrap();
    let (mut profile, mut store) = seeded(&dir.path().join("fleet.db"));
    let rows = load_import_rows(&fixture("fuel-cards.csv"), &profile).unwrap();
    Importer::new(&profile).import_from_store(rows, &mut store).unwrap();

    profile.id_format = IdFormat::Any;
    profile.batch_size = 1;
    profile.mode = ReplaceMode::Transactional;
    let failure = Importer::new(&profile)
        .import_from_store(duplicate_id_rows(), &mut store)
        .unwrap_err();

    assert_eq!(failure.error.failed_batch(), Some(3));
    assert_eq!(failure.inserted_count, 0);
    let records = store.records().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].foreign_key.as_deref(), Some("a-102"));
}
