use crate::error::StoreError;
use crate::model::{CanonicalEntity, ReconciledRow};

/// The canonical store an import runs against.
///
/// Only these primitives are used. Transaction hooks are optional; the
/// default implementations report them as unsupported.
pub trait ImportStore {
    /// Current canonical snapshot.
    fn load_canonical(&self) -> Result<Vec<CanonicalEntity>, StoreError>;

    /// Remove every record of the target collection. Returns how many went.
    fn delete_all(&mut self) -> Result<usize, StoreError>;

    fn insert_batch(&mut self, rows: &[ReconciledRow]) -> Result<(), StoreError>;

    fn supports_transactions(&self) -> bool {
        false
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("begin".into()))
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("commit".into()))
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("rollback".into()))
    }
}

/// In-process store. Supports transactions by snapshotting the records.
#[derive(Debug, Default)]
pub struct MemoryStore {
    canonical: Vec<CanonicalEntity>,
    records: Vec<ReconciledRow>,
    snapshot: Option<Vec<ReconciledRow>>,
    /// Insert batches seen since the last `delete_all`.
    batches_seen: usize,
    fail_on_batch: Option<usize>,
    fail_delete: bool,
    transactional: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            transactional: true,
            ..Self::default()
        }
    }

    pub fn with_canonical(mut self, canonical: Vec<CanonicalEntity>) -> Self {
        self.canonical = canonical;
        self
    }

    pub fn with_records(mut self, records: Vec<ReconciledRow>) -> Self {
        self.records = records;
        self
    }

    /// Make the N-th (1-based) insert batch after a delete fail.
    pub fn fail_on_batch(mut self, batch: usize) -> Self {
        self.fail_on_batch = Some(batch);
        self
    }

    pub fn fail_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    /// Behave like a store with no transaction primitive.
    pub fn without_transactions(mut self) -> Self {
        self.transactional = false;
        self
    }

    pub fn records(&self) -> &[ReconciledRow] {
        &self.records
    }
}

impl ImportStore for MemoryStore {
    fn load_canonical(&self) -> Result<Vec<CanonicalEntity>, StoreError> {
        Ok(self.canonical.clone())
    }

    fn delete_all(&mut self) -> Result<usize, StoreError> {
        if self.fail_delete {
            return Err(StoreError::Backend("delete rejected".into()));
        }
        self.batches_seen = 0;
        let deleted = self.records.len();
        self.records.clear();
        Ok(deleted)
    }

    fn insert_batch(&mut self, rows: &[ReconciledRow]) -> Result<(), StoreError> {
        self.batches_seen += 1;
        if self.fail_on_batch == Some(self.batches_seen) {
            return Err(StoreError::Backend(format!(
                "batch {} rejected",
                self.batches_seen
            )));
        }
        self.records.extend_from_slice(rows);
        Ok(())
    }

    fn supports_transactions(&self) -> bool {
        self.transactional
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if !self.transactional {
            return Err(StoreError::Unsupported("begin".into()));
        }
        if self.snapshot.is_some() {
            return Err(StoreError::Backend("transaction already open".into()));
        }
        self.snapshot = Some(self.records.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::Backend("no open transaction".into()))
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| StoreError::Backend("no open transaction".into()))?;
        self.records = snapshot;
        Ok(())
    }
}
