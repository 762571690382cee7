//! `fleetsync-import`: bulk-import reconciliation engine.
//!
//! Pure engine crate: receives parsed spreadsheet rows and a canonical
//! snapshot, returns reconciled rows and a report, and replaces the target
//! collection through an injected [`ImportStore`].

pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod model;
pub mod normalize;
pub mod reconcile;
pub mod replace;
pub mod report;
pub mod resolver;
pub mod store;

pub use config::ImportProfile;
pub use engine::{import_replace, ImportFailure, ImportOutcome, Importer};
pub use error::{ImportError, StoreError, StoreStage};
pub use model::{CanonicalEntity, CellValue, ImportReport, ImportRow, ReconciledRow, WarningEntry};
pub use store::{ImportStore, MemoryStore};
