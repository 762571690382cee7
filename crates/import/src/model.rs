use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// A single spreadsheet cell, raw or normalized.
///
/// Serialized untagged: `null`, JSON numbers, ISO date strings, plain strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Integer(i64),
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl CellValue {
    /// True for `Empty` and for text that is blank after trimming.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Case-insensitive, whitespace-trimmed comparison used for matching and
    /// reconciliation. Numbers compare numerically across `Integer`/`Number`.
    pub fn loosely_eq(&self, other: &CellValue) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => (a - b).abs() < 1e-9,
            (Self::Integer(a), Self::Number(b)) | (Self::Number(b), Self::Integer(a)) => {
                (*a as f64 - b).abs() < 1e-9
            }
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => fold(&self.to_string()) == fold(&other.to_string()),
        }
    }
}

/// Comparison key for case-insensitive matching.
pub(crate) fn fold(s: &str) -> String {
    s.trim().to_lowercase()
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Self::Empty
        } else {
            Self::Text(s.to_string())
        }
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        if s.is_empty() {
            Self::Empty
        } else {
            Self::Text(s)
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Authoritative record rows are reconciled against.
///
/// `attributes` carries both the secondary (disambiguation) attributes and the
/// dependent facts; the import profile decides which is which.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, CellValue>,
}

impl CanonicalEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<CellValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Non-empty attribute value.
    pub fn attribute(&self, key: &str) -> Option<&CellValue> {
        self.attributes.get(key).filter(|v| !v.is_empty())
    }
}

/// One parsed spreadsheet line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportRow {
    pub cells: BTreeMap<String, CellValue>,
    pub foreign_key: Option<String>,
    pub id: Option<String>,
}

impl ImportRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<CellValue>) -> Self {
        self.cells.insert(column.to_string(), value.into());
        self
    }

    pub fn with_foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = Some(key.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Non-empty cell value.
    pub fn cell(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(column).filter(|v| !v.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// How the resolver arrived at its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchVia {
    ForeignKey,
    Name,
    /// Narrowed by the full secondary tuple.
    SecondaryTuple,
    /// Narrowed by a single secondary attribute.
    Secondary(String),
    /// No filter narrowed to one; first candidate taken.
    Fallback,
    NoMatch,
}

#[derive(Debug, Clone)]
pub struct Resolution<'a> {
    pub entity: Option<&'a CanonicalEntity>,
    pub ambiguous: bool,
    pub via: MatchVia,
}

impl<'a> Resolution<'a> {
    pub fn unmatched() -> Self {
        Self {
            entity: None,
            ambiguous: false,
            via: MatchVia::NoMatch,
        }
    }

    pub fn exact(entity: &'a CanonicalEntity, via: MatchVia) -> Self {
        Self {
            entity: Some(entity),
            ambiguous: false,
            via,
        }
    }

    pub fn outcome(&self) -> MatchOutcome {
        match (self.entity, self.ambiguous) {
            (None, _) => MatchOutcome::Unmatched,
            (Some(_), true) => MatchOutcome::AmbiguousFallback,
            (Some(_), false) => MatchOutcome::Matched,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched,
    AmbiguousFallback,
    Unmatched,
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matched => write!(f, "matched"),
            Self::AmbiguousFallback => write!(f, "ambiguous_fallback"),
            Self::Unmatched => write!(f, "unmatched"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A dependent fact was overwritten with the canonical value.
    FieldCorrected,
    /// Name collision could not be narrowed; first candidate taken.
    AmbiguousMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarningEntry {
    pub row_index: usize,
    pub entity_label: String,
    pub field: String,
    pub original_value: String,
    pub corrected_value: String,
    pub kind: WarningKind,
}

/// A row ready for insertion into the target collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledRow {
    pub id: String,
    pub foreign_key: Option<String>,
    pub fields: BTreeMap<String, CellValue>,
    pub outcome: MatchOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<WarningEntry>,
}

impl ReconciledRow {
    pub fn field(&self, column: &str) -> Option<&CellValue> {
        self.fields.get(column)
    }

    pub fn corrections(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| w.kind == WarningKind::FieldCorrected)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub total_rows: usize,
    pub matched_count: usize,
    pub ambiguous_fallback_count: usize,
    pub unmatched_count: usize,
    pub corrected_row_count: usize,
    pub warnings: Vec<WarningEntry>,
}
