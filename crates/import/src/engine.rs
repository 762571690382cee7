use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::ImportProfile;
use crate::error::{ImportError, StoreStage};
use crate::model::{CanonicalEntity, ImportReport, ImportRow, MatchOutcome, ReconciledRow};
use crate::reconcile::Reconciler;
use crate::replace::BulkReplace;
use crate::report::ReportBuilder;
use crate::resolver::resolve;
use crate::store::ImportStore;

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub profile: String,
    pub report: ImportReport,
    pub deleted_count: usize,
    pub inserted_count: usize,
}

/// Terminal failure plus everything known at the time it happened.
#[derive(Debug, Clone)]
pub struct ImportFailure {
    pub error: ImportError,
    pub report: ImportReport,
    /// Previous records removed and not restored.
    pub deleted_count: usize,
    pub inserted_count: usize,
}

impl ImportFailure {
    fn before_reconcile(error: ImportError) -> Self {
        Self {
            error,
            report: ImportReport::default(),
            deleted_count: 0,
            inserted_count: 0,
        }
    }
}

impl fmt::Display for ImportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for ImportFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Runs normalize → resolve → reconcile → replace for one profile.
pub struct Importer<'p> {
    profile: &'p ImportProfile,
    today: Option<NaiveDate>,
}

impl<'p> Importer<'p> {
    pub fn new(profile: &'p ImportProfile) -> Self {
        Self { profile, today: None }
    }

    /// Pin the date used by `today` fallbacks.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Reconcile every row without touching any store.
    pub fn reconcile_all(
        &self,
        rows: Vec<ImportRow>,
        canonical: &[CanonicalEntity],
    ) -> (Vec<ReconciledRow>, ImportReport) {
        let mut reconciler = Reconciler::new(self.profile);
        if let Some(today) = self.today {
            reconciler = reconciler.with_today(today);
        }

        let mut report = ReportBuilder::new();
        let mut out = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let resolution = resolve(&row, canonical, self.profile);
            let reconciled = reconciler.reconcile(row, index, &resolution);
            if reconciled.outcome == MatchOutcome::AmbiguousFallback {
                log::warn!(
                    "row {index}: '{}' is ambiguous, assigned to {}",
                    reconciled.field(&self.profile.name_column).map(|v| v.to_string()).unwrap_or_default(),
                    reconciled.foreign_key.as_deref().unwrap_or("?"),
                );
            }
            report.record(&reconciled);
            out.push(reconciled);
        }

        (out, report.finish())
    }

    /// Replace the store's target collection with `rows` reconciled against
    /// `canonical`.
    pub fn import_replace<S: ImportStore + ?Sized>(
        &self,
        rows: Vec<ImportRow>,
        canonical: &[CanonicalEntity],
        store: &mut S,
    ) -> Result<ImportOutcome, ImportFailure> {
        self.profile.validate().map_err(ImportFailure::before_reconcile)?;

        log::info!(
            "import '{}': {} row(s) against {} canonical entit{}",
            self.profile.name,
            rows.len(),
            canonical.len(),
            if canonical.len() == 1 { "y" } else { "ies" },
        );

        let (reconciled, report) = self.reconcile_all(rows, canonical);

        let mut replace = BulkReplace::new(store)
            .batch_size(self.profile.batch_size)
            .mode(self.profile.mode);
        let result = replace.run(&reconciled);
        let deleted_count = replace.deleted_count();

        match result {
            Ok(summary) => {
                log::info!(
                    "import '{}': {} inserted ({} matched, {} ambiguous, {} unmatched, {} warning(s))",
                    self.profile.name,
                    summary.inserted_count,
                    report.matched_count,
                    report.ambiguous_fallback_count,
                    report.unmatched_count,
                    report.warnings.len(),
                );
                Ok(ImportOutcome {
                    profile: self.profile.name.clone(),
                    report,
                    deleted_count: summary.deleted_count,
                    inserted_count: summary.inserted_count,
                })
            }
            Err(error) => {
                let inserted_count = match &error {
                    ImportError::Store { inserted_count, .. } => *inserted_count,
                    _ => 0,
                };
                Err(ImportFailure { error, report, deleted_count, inserted_count })
            }
        }
    }

    /// Like [`import_replace`](Self::import_replace), loading the canonical
    /// snapshot from the store first.
    pub fn import_from_store<S: ImportStore + ?Sized>(
        &self,
        rows: Vec<ImportRow>,
        store: &mut S,
    ) -> Result<ImportOutcome, ImportFailure> {
        let canonical = store.load_canonical().map_err(|e| {
            ImportFailure::before_reconcile(ImportError::Store {
                stage: StoreStage::Load,
                batch_index: 0,
                inserted_count: 0,
                message: e.to_string(),
            })
        })?;
        self.import_replace(rows, &canonical, store)
    }
}

/// Library entry point: reconcile `rows` and replace the store's collection.
pub fn import_replace<S: ImportStore + ?Sized>(
    rows: Vec<ImportRow>,
    canonical: &[CanonicalEntity],
    store: &mut S,
    profile: &ImportProfile,
) -> Result<ImportOutcome, ImportFailure> {
    Importer::new(profile).import_replace(rows, canonical, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::CellValue;
    use crate::store::MemoryStore;

    fn profile() -> ImportProfile {
        let mut p = ImportProfile::new("orders", "driver");
        p.secondary = vec!["plate".into()];
        p.dependent_facts = vec!["brand".into()];
        p
    }

    fn canonical() -> Vec<CanonicalEntity> {
        vec![
            CanonicalEntity::new("a1", "Mario Rossi").with("plate", "AB123CD").with("brand", "Fiat"),
            CanonicalEntity::new("a2", "Mario Rossi").with("plate", "EF456GH").with("brand", "Lancia"),
        ]
    }

    #[test]
    fn reconcile_all_counts() {
        let p = profile();
        let rows = vec![
            ImportRow::new().with("driver", "Mario Rossi").with("plate", "EF456GH").with("brand", "Fiat"),
            ImportRow::new().with("driver", "Mario Rossi"),
            ImportRow::new().with("driver", "Nessuno"),
        ];
        let (out, report) = Importer::new(&p).reconcile_all(rows, &canonical());
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].foreign_key.as_deref(), Some("a2"));
        assert_eq!(out[0].field("brand"), Some(&CellValue::from("Lancia")));
        assert_eq!(report.matched_count, 1);
        assert_eq!(report.ambiguous_fallback_count, 1);
        assert_eq!(report.unmatched_count, 1);
        assert_eq!(report.corrected_row_count, 1);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn invalid_profile_touches_nothing() {
        let mut p = profile();
        p.batch_size = 0;
        let mut store = MemoryStore::new();
        let failure = import_replace(vec![], &canonical(), &mut store, &p).unwrap_err();
        assert!(matches!(failure.error, ImportError::ProfileValidation(_)));
    }

    struct BrokenCanonical;

    impl ImportStore for BrokenCanonical {
        fn load_canonical(&self) -> Result<Vec<CanonicalEntity>, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
        fn delete_all(&mut self) -> Result<usize, StoreError> {
            panic!("must not delete when the snapshot failed")
        }
        fn insert_batch(&mut self, _rows: &[ReconciledRow]) -> Result<(), StoreError> {
            panic!("must not insert when the snapshot failed")
        }
    }

    #[test]
    fn snapshot_failure_is_load_stage() {
        let p = profile();
        let failure = Importer::new(&p)
            .import_from_store(vec![ImportRow::new().with("driver", "x")], &mut BrokenCanonical)
            .unwrap_err();
        assert!(matches!(
            failure.error,
            ImportError::Store { stage: StoreStage::Load, .. }
        ));
        assert_eq!(failure.report.total_rows, 0);
    }

    #[test]
    fn failure_keeps_accumulated_report() {
        let mut p = profile();
        p.batch_size = 1;
        let mut store = MemoryStore::new().fail_on_batch(2);
        let rows = vec![
            ImportRow::new().with("driver", "Nessuno"),
            ImportRow::new().with("driver", "Nessuno"),
        ];
        let failure = import_replace(rows, &canonical(), &mut store, &p).unwrap_err();
        assert_eq!(failure.deleted_count, 0);
        assert_eq!(failure.inserted_count, 1);
        assert_eq!(failure.report.total_rows, 2);
        assert_eq!(failure.report.unmatched_count, 2);
        assert_eq!(failure.error.failed_batch(), Some(2));
    }
}
