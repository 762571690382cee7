//! CLI Exit Code Registry
//!
//! Single source of truth for `fleetsync` exit codes. Scripts rely on them.
//!
//! | Code | Meaning                                               |
//! |------|-------------------------------------------------------|
//! | 0    | Success                                               |
//! | 1    | General error (unspecified)                           |
//! | 2    | Usage error (bad args, unreadable file)               |
//! | 10   | Invalid import profile                                |
//! | 11   | Input could not be parsed (CSV, missing column, cell) |
//! | 12   | Store failure (load, delete, insert, commit)          |
//! | 13   | Ambiguous fallbacks present with `--fail-on-ambiguous`|

use fleetsync_import::ImportError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing or unreadable input file.
pub const EXIT_USAGE: u8 = 2;

/// Profile TOML did not parse or failed validation.
pub const EXIT_IMPORT_INVALID_PROFILE: u8 = 10;

/// Rows or canonical CSV malformed, or a configured column is missing.
pub const EXIT_IMPORT_PARSE: u8 = 11;

/// The store rejected an operation. The report is still emitted.
pub const EXIT_IMPORT_STORE: u8 = 12;

/// Import written, but at least one row was assigned by ambiguous fallback.
pub const EXIT_IMPORT_AMBIGUOUS: u8 = 13;

pub fn import_exit_code(err: &ImportError) -> u8 {
    match err {
        ImportError::ProfileParse(_) | ImportError::ProfileValidation(_) => {
            EXIT_IMPORT_INVALID_PROFILE
        }
        ImportError::MissingColumn { .. } | ImportError::Csv(_) => EXIT_IMPORT_PARSE,
        ImportError::Store { .. } | ImportError::TransactionsUnsupported => EXIT_IMPORT_STORE,
    }
}
