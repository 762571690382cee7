use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::config::{DateFallback, ImportProfile};
use crate::model::{
    CanonicalEntity, CellValue, ImportRow, ReconciledRow, Resolution, WarningEntry, WarningKind,
};
use crate::normalize::normalize_cell;

/// Turns resolved rows into insertable rows.
///
/// Canonical values always win over the spreadsheet copy of a dependent fact.
pub struct Reconciler<'p> {
    profile: &'p ImportProfile,
    today: NaiveDate,
}

impl<'p> Reconciler<'p> {
    pub fn new(profile: &'p ImportProfile) -> Self {
        Self {
            profile,
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Date used by the `today` fallback.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn reconcile(
        &self,
        row: ImportRow,
        row_index: usize,
        resolution: &Resolution<'_>,
    ) -> ReconciledRow {
        let ImportRow { cells, id, .. } = row;

        let name_cell = cells.get(&self.profile.name_column).cloned().unwrap_or_default();
        let mut fields = self.normalize_fields(cells);
        let mut warnings = Vec::new();

        if let Some(entity) = resolution.entity {
            if resolution.ambiguous {
                warnings.push(WarningEntry {
                    row_index,
                    entity_label: entity.name.clone(),
                    field: self.profile.name_column.clone(),
                    original_value: name_cell.to_string(),
                    corrected_value: format!("{} [{}]", entity.name, entity.id),
                    kind: WarningKind::AmbiguousMatch,
                });
            }
            self.apply_facts(entity, &mut fields, row_index, &mut warnings);
        }

        let id = id
            .filter(|id| self.profile.id_format.recognizes(id))
            .map(|id| id.trim().to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        ReconciledRow {
            id,
            foreign_key: resolution.entity.map(|e| e.id.clone()),
            fields,
            outcome: resolution.outcome(),
            warnings,
        }
    }

    fn normalize_fields(&self, cells: BTreeMap<String, CellValue>) -> BTreeMap<String, CellValue> {
        cells
            .into_iter()
            .map(|(column, raw)| {
                let value = self.normalize_value(&column, raw);
                (column, value)
            })
            .collect()
    }

    fn normalize_value(&self, column: &str, raw: CellValue) -> CellValue {
        let Some(kind) = self.profile.field_kind(column) else {
            return raw;
        };
        match normalize_cell(kind, &raw) {
            Some(value) => value,
            None => match self.profile.date_fallback(column) {
                DateFallback::Omit => CellValue::Empty,
                DateFallback::Today => CellValue::Date(self.today),
                DateFallback::Keep => raw,
            },
        }
    }

    fn apply_facts(
        &self,
        entity: &CanonicalEntity,
        fields: &mut BTreeMap<String, CellValue>,
        row_index: usize,
        warnings: &mut Vec<WarningEntry>,
    ) {
        for fact in &self.profile.dependent_facts {
            let Some(canonical) = entity.attribute(fact) else {
                continue;
            };
            let canonical = match self.profile.field_kind(fact) {
                Some(kind) => normalize_cell(kind, canonical).unwrap_or_else(|| canonical.clone()),
                None => canonical.clone(),
            };

            let original = match fields.get(fact).filter(|v| !v.is_empty()) {
                Some(current) if current.loosely_eq(&canonical) => continue,
                Some(current) => current.to_string(),
                None if self.profile.fill_missing_facts => String::new(),
                None => continue,
            };

            log::debug!(
                "row {row_index}: {fact} '{original}' -> '{canonical}' ({})",
                entity.name
            );
            warnings.push(WarningEntry {
                row_index,
                entity_label: entity.name.clone(),
                field: fact.clone(),
                original_value: original,
                corrected_value: canonical.to_string(),
                kind: WarningKind::FieldCorrected,
            });
            fields.insert(fact.clone(), canonical);
        }
    }
}
