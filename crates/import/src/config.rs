use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::error::ImportError;

pub const DEFAULT_BATCH_SIZE: usize = 20;

// ---------------------------------------------------------------------------
// Top-level profile
// ---------------------------------------------------------------------------

/// Describes one kind of import: which column names the owner, which
/// attributes disambiguate same-named owners, and which columns are copies of
/// canonical facts.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportProfile {
    pub name: String,
    /// Row column compared against `CanonicalEntity::name`.
    pub name_column: String,
    /// Row column holding an explicit canonical id.
    #[serde(default)]
    pub foreign_key_column: Option<String>,
    /// Row column holding the row's own id.
    #[serde(default)]
    pub id_column: Option<String>,
    #[serde(default)]
    pub id_format: IdFormat,
    /// Disambiguation attributes, in priority order.
    #[serde(default)]
    pub secondary: Vec<String>,
    /// Columns that must agree with the canonical entity.
    #[serde(default)]
    pub dependent_facts: Vec<String>,
    /// Copy facts the row leaves blank from the canonical entity.
    #[serde(default)]
    pub fill_missing_facts: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub mode: ReplaceMode,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
    #[serde(default)]
    pub canonical: CanonicalColumns,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Column layout of a canonical CSV export.
#[derive(Debug, Clone, Deserialize)]
pub struct CanonicalColumns {
    #[serde(default = "default_canonical_id")]
    pub id_column: String,
    /// Defaults to the profile's `name_column`.
    #[serde(default)]
    pub name_column: Option<String>,
}

impl Default for CanonicalColumns {
    fn default() -> Self {
        Self {
            id_column: default_canonical_id(),
            name_column: None,
        }
    }
}

fn default_canonical_id() -> String {
    "id".into()
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Which row ids are kept as-is. Anything else gets a fresh UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdFormat {
    #[default]
    Uuid,
    /// Any non-blank string.
    Any,
}

impl IdFormat {
    pub fn recognizes(&self, id: &str) -> bool {
        let id = id.trim();
        match self {
            Self::Uuid => uuid::Uuid::parse_str(id).is_ok(),
            Self::Any => !id.is_empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Replace mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceMode {
    /// Delete everything, then insert batch by batch. Not atomic.
    #[default]
    DeleteThenInsert,
    /// Same steps inside a store transaction; rolled back on failure.
    Transactional,
}

impl std::fmt::Display for ReplaceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeleteThenInsert => write!(f, "delete_then_insert"),
            Self::Transactional => write!(f, "transactional"),
        }
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub kind: FieldKind,
    #[serde(default)]
    pub on_invalid: Option<DateFallback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Date,
    Currency,
    Integer,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Date => write!(f, "date"),
            Self::Currency => write!(f, "currency"),
            Self::Integer => write!(f, "integer"),
        }
    }
}

/// What a date column holds when its cell cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFallback {
    #[default]
    Omit,
    Today,
    /// Keep the raw cell as text.
    Keep,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ImportProfile {
    /// Minimal profile: match on `name_column`, no secondary attributes or facts.
    pub fn new(name: &str, name_column: &str) -> Self {
        Self {
            name: name.to_string(),
            name_column: name_column.to_string(),
            foreign_key_column: None,
            id_column: None,
            id_format: IdFormat::default(),
            secondary: Vec::new(),
            dependent_facts: Vec::new(),
            fill_missing_facts: false,
            batch_size: DEFAULT_BATCH_SIZE,
            mode: ReplaceMode::default(),
            fields: BTreeMap::new(),
            canonical: CanonicalColumns::default(),
        }
    }

    pub fn from_toml(input: &str) -> Result<Self, ImportError> {
        let profile: ImportProfile =
            toml::from_str(input).map_err(|e| ImportError::ProfileParse(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ImportError> {
        if self.name_column.trim().is_empty() {
            return Err(ImportError::ProfileValidation(
                "name_column must not be empty".into(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ImportError::ProfileValidation(
                "batch_size must be at least 1".into(),
            ));
        }

        check_unique("secondary", &self.secondary)?;
        check_unique("dependent_facts", &self.dependent_facts)?;

        for (column, spec) in &self.fields {
            if spec.on_invalid.is_some() && spec.kind != FieldKind::Date {
                return Err(ImportError::ProfileValidation(format!(
                    "field '{column}': on_invalid is only allowed on date fields, not {}",
                    spec.kind
                )));
            }
        }

        Ok(())
    }

    pub fn field_kind(&self, column: &str) -> Option<FieldKind> {
        self.fields.get(column).map(|spec| spec.kind)
    }

    pub fn canonical_name_column(&self) -> &str {
        self.canonical.name_column.as_deref().unwrap_or(&self.name_column)
    }

    pub fn date_fallback(&self, column: &str) -> DateFallback {
        self.fields
            .get(column)
            .and_then(|spec| spec.on_invalid)
            .unwrap_or_default()
    }
}

fn check_unique(list_name: &str, columns: &[String]) -> Result<(), ImportError> {
    let mut seen = HashSet::new();
    for column in columns {
        if column.trim().is_empty() {
            return Err(ImportError::ProfileValidation(format!(
                "{list_name}: empty column name"
            )));
        }
        if !seen.insert(column.as_str()) {
            return Err(ImportError::ProfileValidation(format!(
                "{list_name}: column '{column}' listed twice"
            )));
        }
    }
    Ok(())
}
