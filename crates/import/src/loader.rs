//! CSV adapters producing engine input.
//!
//! The header row names the columns. Cells stay raw text here; typing happens
//! in the reconciler.

use std::collections::BTreeMap;

use crate::config::ImportProfile;
use crate::error::ImportError;
use crate::model::{CanonicalEntity, CellValue, ImportRow};

struct Table {
    headers: Vec<String>,
    records: Vec<csv::StringRecord>,
}

impl Table {
    fn parse(csv_data: &str) -> Result<Self, ImportError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(csv_data.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ImportError::Csv(e.to_string()))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ImportError::Csv(e.to_string()))?;
            // Spreadsheets export trailing rows of empty cells.
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            records.push(record);
        }

        Ok(Self { headers, records })
    }

    fn index(&self, source: &str, column: &str) -> Result<usize, ImportError> {
        self.headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| ImportError::MissingColumn {
                source: source.into(),
                column: column.into(),
            })
    }

    fn optional_index(&self, source: &str, column: Option<&str>) -> Result<Option<usize>, ImportError> {
        column.map(|c| self.index(source, c)).transpose()
    }
}

fn non_blank(record: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse spreadsheet rows. The profile's id and foreign-key columns are lifted
/// out of the cells into their dedicated fields.
pub fn load_import_rows(csv_data: &str, profile: &ImportProfile) -> Result<Vec<ImportRow>, ImportError> {
    let table = Table::parse(csv_data)?;
    table.index("rows", &profile.name_column)?;
    let id_idx = table.optional_index("rows", profile.id_column.as_deref())?;
    let fk_idx = table.optional_index("rows", profile.foreign_key_column.as_deref())?;

    let rows = table
        .records
        .iter()
        .map(|record| {
            let cells = table
                .headers
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != id_idx && Some(*i) != fk_idx)
                .map(|(i, h)| (h.clone(), CellValue::from(record.get(i).unwrap_or(""))))
                .collect();
            ImportRow {
                cells,
                foreign_key: non_blank(record, fk_idx),
                id: non_blank(record, id_idx),
            }
        })
        .collect();

    Ok(rows)
}

/// Parse a canonical export. Entities without an id get a fresh UUID; every
/// column other than id and name becomes an attribute.
pub fn load_canonical_csv(
    csv_data: &str,
    profile: &ImportProfile,
) -> Result<Vec<CanonicalEntity>, ImportError> {
    let table = Table::parse(csv_data)?;
    let name_idx = table.index("canonical", profile.canonical_name_column())?;
    let id_idx = table.headers.iter().position(|h| *h == profile.canonical.id_column);

    let entities = table
        .records
        .iter()
        .map(|record| {
            let attributes: BTreeMap<String, CellValue> = table
                .headers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != name_idx && Some(*i) != id_idx)
                .map(|(i, h)| (h.clone(), CellValue::from(record.get(i).unwrap_or("").trim())))
                .collect();
            CanonicalEntity {
                id: non_blank(record, id_idx).unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                name: record.get(name_idx).unwrap_or("").trim().to_string(),
                attributes,
            }
        })
        .collect();

    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ImportProfile {
        let mut p = ImportProfile::new("orders", "driver");
        p.id_column = Some("id".into());
        p.foreign_key_column = Some("assignment_id".into());
        p
    }

    #[test]
    fn rows_lift_id_and_foreign_key() {
        let csv = "\
id,assignment_id,driver,brand,status
,a1,Mario Rossi,Fiat,open
r-2,,Luca Bianchi,,closed
";
        let rows = load_import_rows(csv, &profile()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].foreign_key.as_deref(), Some("a1"));
        assert_eq!(rows[0].id, None);
        assert_eq!(rows[0].cell("driver"), Some(&CellValue::from("Mario Rossi")));
        assert!(!rows[0].cells.contains_key("id"));
        assert!(!rows[0].cells.contains_key("assignment_id"));
        assert_eq!(rows[1].id.as_deref(), Some("r-2"));
        assert_eq!(rows[1].cells.get("brand"), Some(&CellValue::Empty));
    }

    #[test]
    fn blank_lines_skipped() {
        let csv = "driver,brand\nMario Rossi,Fiat\n,\n , \n";
        let rows = load_import_rows(csv, &ImportProfile::new("orders", "driver")).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn missing_name_column() {
        let csv = "name,brand\nMario Rossi,Fiat\n";
        let err = load_import_rows(csv, &profile()).unwrap_err();
        assert_eq!(
            err,
            ImportError::MissingColumn { source: "rows".into(), column: "driver".into() }
        );
    }

    #[test]
    fn missing_configured_id_column() {
        let csv = "driver,assignment_id\nMario Rossi,a1\n";
        let err = load_import_rows(csv, &profile()).unwrap_err();
        assert!(matches!(err, ImportError::MissingColumn { ref column, .. } if column == "id"));
    }

    #[test]
    fn canonical_entities() {
        let csv = "\
id,driver,plate,brand
a1, Mario Rossi ,AB123CD,Fiat
,Luca Bianchi,ZZ999ZZ,Renault
";
        let set = load_canonical_csv(csv, &profile()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].id, "a1");
        assert_eq!(set[0].name, "Mario Rossi");
        assert_eq!(set[0].attribute("plate"), Some(&CellValue::from("AB123CD")));
        assert!(!set[0].attributes.contains_key("driver"));
        assert!(uuid::Uuid::parse_str(&set[1].id).is_ok());
    }

    #[test]
    fn canonical_without_id_column() {
        let csv = "driver,brand\nMario Rossi,Fiat\n";
        let set = load_canonical_csv(csv, &profile()).unwrap();
        assert_eq!(set.len(), 1);
        assert!(!set[0].id.is_empty());
        assert_eq!(set[0].attribute("brand"), Some(&CellValue::from("Fiat")));
    }

    #[test]
    fn utf8_bom_header() {
        let csv = "\u{feff}driver,brand\nMario Rossi,Fiat\n";
        let rows = load_import_rows(csv, &ImportProfile::new("orders", "driver")).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
