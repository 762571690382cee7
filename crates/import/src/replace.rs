use crate::config::{ReplaceMode, DEFAULT_BATCH_SIZE};
use crate::error::{ImportError, StoreError, StoreStage};
use crate::model::ReconciledRow;
use crate::store::ImportStore;

/// `Idle -> Deleting -> Inserting -> Done | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceState {
    Idle,
    Deleting,
    /// 1-based batch currently being submitted, out of `of`.
    Inserting { batch: usize, of: usize },
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ReplaceSummary {
    pub deleted_count: usize,
    pub inserted_count: usize,
    pub batches: usize,
}

/// Replace the whole target collection with a new set of rows.
///
/// Delete completes before the first batch; batches go out one at a time.
/// In `DeleteThenInsert` mode a failure after the delete leaves the collection
/// with whatever was inserted so far. Nothing is restored.
pub struct BulkReplace<'s, S: ImportStore + ?Sized> {
    store: &'s mut S,
    batch_size: usize,
    mode: ReplaceMode,
    state: ReplaceState,
    /// Records removed by the last run and not restored.
    deleted: usize,
    progress: Option<Box<dyn FnMut(ReplaceState) + 's>>,
}

impl<'s, S: ImportStore + ?Sized> BulkReplace<'s, S> {
    pub fn new(store: &'s mut S) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            mode: ReplaceMode::default(),
            state: ReplaceState::Idle,
            deleted: 0,
            progress: None,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn mode(mut self, mode: ReplaceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Called on every state transition.
    pub fn on_progress(mut self, callback: impl FnMut(ReplaceState) + 's) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> ReplaceState {
        self.state
    }

    /// Records the last run deleted. Stays set after a failed insert; zero
    /// when a transaction was rolled back.
    pub fn deleted_count(&self) -> usize {
        self.deleted
    }

    pub fn run(&mut self, rows: &[ReconciledRow]) -> Result<ReplaceSummary, ImportError> {
        self.state = ReplaceState::Idle;
        self.deleted = 0;
        let transactional = self.mode == ReplaceMode::Transactional;

        if transactional {
            if !self.store.supports_transactions() {
                self.transition(ReplaceState::Failed);
                return Err(ImportError::TransactionsUnsupported);
            }
            if let Err(e) = self.store.begin() {
                self.transition(ReplaceState::Failed);
                return Err(store_failure(StoreStage::Begin, 0, 0, &e));
            }
        }

        self.transition(ReplaceState::Deleting);
        let deleted_count = match self.store.delete_all() {
            Ok(n) => n,
            Err(e) => return Err(self.abort(StoreStage::Delete, 0, 0, &e)),
        };
        self.deleted = deleted_count;
        log::debug!("deleted {deleted_count} existing record(s)");

        let total = rows.len().div_ceil(self.batch_size);
        let mut inserted_count = 0;
        for (i, batch) in rows.chunks(self.batch_size).enumerate() {
            let index = i + 1;
            self.transition(ReplaceState::Inserting { batch: index, of: total });
            if let Err(e) = self.store.insert_batch(batch) {
                return Err(self.abort(StoreStage::Insert, index, inserted_count, &e));
            }
            inserted_count += batch.len();
            log::debug!("batch {index}/{total}: {} row(s)", batch.len());
        }

        if transactional {
            if let Err(e) = self.store.commit() {
                return Err(self.abort(StoreStage::Commit, 0, inserted_count, &e));
            }
        }

        self.transition(ReplaceState::Done);
        Ok(ReplaceSummary {
            deleted_count,
            inserted_count,
            batches: total,
        })
    }

    fn transition(&mut self, state: ReplaceState) {
        self.state = state;
        if let Some(callback) = self.progress.as_mut() {
            callback(state);
        }
    }

    fn abort(
        &mut self,
        stage: StoreStage,
        batch_index: usize,
        inserted_count: usize,
        cause: &StoreError,
    ) -> ImportError {
        self.transition(ReplaceState::Failed);
        if self.mode != ReplaceMode::Transactional {
            log::error!("{stage} failed with {inserted_count} row(s) inserted, collection not restored: {cause}");
            return store_failure(stage, batch_index, inserted_count, cause);
        }

        match self.store.rollback() {
            Ok(()) => {
                self.deleted = 0;
                log::warn!("{stage} failed, transaction rolled back: {cause}");
                let mut err = store_failure(stage, batch_index, 0, cause);
                if let ImportError::Store { message, .. } = &mut err {
                    message.push_str(" (rolled back)");
                }
                err
            }
            Err(rollback_err) => {
                log::error!("{stage} failed and rollback failed: {cause}; {rollback_err}");
                store_failure(stage, batch_index, inserted_count, cause)
            }
        }
    }
}

fn store_failure(
    stage: StoreStage,
    batch_index: usize,
    inserted_count: usize,
    cause: &StoreError,
) -> ImportError {
    ImportError::Store {
        stage,
        batch_index,
        inserted_count,
        message: cause.to_string(),
    }
}

/// Delete-then-insert with the given batch size.
pub fn replace_all<S: ImportStore + ?Sized>(
    store: &mut S,
    rows: &[ReconciledRow],
    batch_size: usize,
) -> Result<ReplaceSummary, ImportError> {
    BulkReplace::new(store).batch_size(batch_size).run(rows)
}
