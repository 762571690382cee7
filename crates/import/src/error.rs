use std::fmt;

/// Which store call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreStage {
    /// Loading the canonical snapshot.
    Load,
    Begin,
    Delete,
    Insert,
    Commit,
}

impl fmt::Display for StoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "canonical load"),
            Self::Begin => write!(f, "begin"),
            Self::Delete => write!(f, "delete"),
            Self::Insert => write!(f, "insert"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Error raised by an [`ImportStore`](crate::store::ImportStore) implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backing store rejected the operation.
    Backend(String),
    /// A row could not be encoded or decoded for the backend.
    Serialization(String),
    /// The store does not implement the requested primitive.
    Unsupported(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "store error: {msg}"),
            Self::Serialization(msg) => write!(f, "serialization error: {msg}"),
            Self::Unsupported(what) => write!(f, "unsupported store operation: {what}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportError {
    /// TOML parse / deserialization error.
    ProfileParse(String),
    /// Profile validation error (empty name column, zero batch size, etc.).
    ProfileValidation(String),
    /// A configured column is absent from the CSV header.
    MissingColumn { source: String, column: String },
    /// CSV reader error.
    Csv(String),
    /// Terminal store failure.
    ///
    /// `batch_index` is 1-based and is `0` for failures outside the insert stage.
    Store {
        stage: StoreStage,
        batch_index: usize,
        inserted_count: usize,
        message: String,
    },
    /// Transactional mode requested against a store without transactions.
    TransactionsUnsupported,
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProfileParse(msg) => write!(f, "profile parse error: {msg}"),
            Self::ProfileValidation(msg) => write!(f, "profile validation error: {msg}"),
            Self::MissingColumn { source, column } => {
                write!(f, "{source}: missing column '{column}'")
            }
            Self::Csv(msg) => write!(f, "CSV error: {msg}"),
            Self::Store { stage: StoreStage::Insert, batch_index, inserted_count, message } => {
                write!(
                    f,
                    "insert batch {batch_index} failed after {inserted_count} row(s) inserted: {message}"
                )
            }
            Self::Store { stage, inserted_count, message, .. } => {
                write!(f, "{stage} failed after {inserted_count} row(s) inserted: {message}")
            }
            Self::TransactionsUnsupported => {
                write!(f, "transactional mode requested but the store has no transaction support")
            }
        }
    }
}

impl std::error::Error for ImportError {}

impl ImportError {
    /// 1-based batch index of a failed insert, if this is one.
    pub fn failed_batch(&self) -> Option<usize> {
        match self {
            Self::Store { stage: StoreStage::Insert, batch_index, .. } => Some(*batch_index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_failure_names_batch() {
        let err = ImportError::Store {
            stage: StoreStage::Insert,
            batch_index: 2,
            inserted_count: 20,
            message: "timeout".into(),
        };
        assert_eq!(err.failed_batch(), Some(2));
        assert_eq!(
            err.to_string(),
            "insert batch 2 failed after 20 row(s) inserted: timeout"
        );
    }

    #[test]
    fn delete_failure_has_no_batch() {
        let err = ImportError::Store {
            stage: StoreStage::Delete,
            batch_index: 0,
            inserted_count: 0,
            message: "locked".into(),
        };
        assert_eq!(err.failed_batch(), None);
        assert_eq!(err.to_string(), "delete failed after 0 row(s) inserted: locked");
    }
}
