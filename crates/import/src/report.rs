use crate::model::{ImportReport, MatchOutcome, ReconciledRow};

/// Accumulates row outcomes into an [`ImportReport`].
///
/// Counts and the warning list are order-agnostic, so builders filled from
/// disjoint row ranges can be merged.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    report: ImportReport,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, row: &ReconciledRow) {
        let r = &mut self.report;
        r.total_rows += 1;
        match row.outcome {
            MatchOutcome::Matched => r.matched_count += 1,
            MatchOutcome::AmbiguousFallback => r.ambiguous_fallback_count += 1,
            MatchOutcome::Unmatched => r.unmatched_count += 1,
        }
        if row.corrections() > 0 {
            r.corrected_row_count += 1;
        }
        r.warnings.extend(row.warnings.iter().cloned());
    }

    pub fn merge(&mut self, other: ReportBuilder) {
        let r = &mut self.report;
        let o = other.report;
        r.total_rows += o.total_rows;
        r.matched_count += o.matched_count;
        r.ambiguous_fallback_count += o.ambiguous_fallback_count;
        r.unmatched_count += o.unmatched_count;
        r.corrected_row_count += o.corrected_row_count;
        r.warnings.extend(o.warnings);
    }

    pub fn finish(self) -> ImportReport {
        self.report
    }
}

/// Build a report from already reconciled rows.
pub fn summarize(rows: &[ReconciledRow]) -> ImportReport {
    let mut builder = ReportBuilder::new();
    for row in rows {
        builder.record(row);
    }
    builder.finish()
}
