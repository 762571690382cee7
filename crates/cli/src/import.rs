//! `fleetsync import` and `fleetsync validate`.

use std::path::{Path, PathBuf};

use serde::Serialize;

use fleetsync_import::loader::{load_canonical_csv, load_import_rows};
use fleetsync_import::{ImportError, ImportProfile, ImportReport, Importer, ImportStore};
use fleetsync_store::SqliteStore;

use crate::exit_codes::{
    import_exit_code, EXIT_IMPORT_AMBIGUOUS, EXIT_IMPORT_INVALID_PROFILE, EXIT_IMPORT_STORE,
};
use crate::CliError;

pub struct ImportArgs {
    pub profile: PathBuf,
    pub rows: PathBuf,
    pub canonical: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub json: bool,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
    pub fail_on_ambiguous: bool,
}

/// JSON document written for every import, successful or not.
#[derive(Serialize)]
struct ImportDocument<'a> {
    profile: &'a str,
    dry_run: bool,
    report: &'a ImportReport,
    deleted_count: usize,
    inserted_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDocument>,
}

#[derive(Serialize)]
struct ErrorDocument {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_batch: Option<usize>,
}

fn import_err(err: &ImportError) -> CliError {
    CliError { code: import_exit_code(err), message: err.to_string(), hint: None }
}

fn read_file(path: &Path, what: &str) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|e| {
        CliError::usage(format!("cannot read {what} {}: {e}", path.display()))
    })
}

pub fn load_profile(path: &Path) -> Result<ImportProfile, CliError> {
    let text = read_file(path, "profile")?;
    ImportProfile::from_toml(&text).map_err(|e| import_err(&e))
}

fn open_store(path: &Path) -> Result<SqliteStore, CliError> {
    SqliteStore::open(path).map_err(|e| {
        CliError {
            code: EXIT_IMPORT_STORE,
            message: format!("cannot open store {}: {e}", path.display()),
            hint: None,
        }
    })
}

fn open_read_only(path: &Path) -> Result<SqliteStore, CliError> {
    SqliteStore::open_read_only(path).map_err(|e| CliError {
        code: EXIT_IMPORT_STORE,
        message: format!("cannot open store {}: {e}", path.display()),
        hint: Some("a dry run reads an existing store; run an import with --canonical first".into()),
    })
}

fn emit(doc: &ImportDocument<'_>, json: bool, output: Option<&Path>) -> Result<(), CliError> {
    if !json && output.is_none() {
        return Ok(());
    }
    let text = serde_json::to_string_pretty(doc)
        .map_err(|e| CliError::general(format!("JSON serialization error: {e}")))?;
    if let Some(path) = output {
        std::fs::write(path, &text)
            .map_err(|e| CliError::usage(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }
    if json {
        println!("{text}");
    }
    Ok(())
}

fn summarize(profile: &str, report: &ImportReport, inserted: Option<usize>) {
    let written = match inserted {
        Some(n) => format!("{n} written"),
        None => "dry run".to_string(),
    };
    eprintln!(
        "{profile}: {} rows ({written}) - {} matched, {} ambiguous, {} unmatched, {} corrected",
        report.total_rows,
        report.matched_count,
        report.ambiguous_fallback_count,
        report.unmatched_count,
        report.corrected_row_count,
    );
    for w in report.warnings.iter().take(20) {
        eprintln!(
            "  row {}: {} {} '{}' -> '{}'",
            w.row_index + 1,
            w.entity_label,
            w.field,
            w.original_value,
            w.corrected_value,
        );
    }
    if report.warnings.len() > 20 {
        eprintln!("  ... {} more warning(s)", report.warnings.len() - 20);
    }
}

pub fn cmd_import(args: ImportArgs) -> Result<(), CliError> {
    let profile = load_profile(&args.profile)?;
    let rows_csv = read_file(&args.rows, "rows")?;
    let rows = load_import_rows(&rows_csv, &profile).map_err(|e| import_err(&e))?;

    let canonical = match &args.canonical {
        Some(path) => {
            let text = read_file(path, "canonical")?;
            Some(load_canonical_csv(&text, &profile).map_err(|e| import_err(&e))?)
        }
        None => None,
    };

    let importer = Importer::new(&profile);

    if args.dry_run {
        let canonical = match (canonical, &args.db) {
            (Some(set), _) => set,
            (None, Some(db)) => open_read_only(db)?.load_canonical().map_err(|e| CliError {
                code: EXIT_IMPORT_STORE,
                message: format!("canonical load failed: {e}"),
                hint: None,
            })?,
            (None, None) => {
                return Err(CliError::usage("--dry-run needs --canonical or --db")
                    .with_hint("pass the canonical export with --canonical canon.csv"));
            }
        };
        let (_, report) = importer.reconcile_all(rows, &canonical);
        summarize(&profile.name, &report, None);
        emit(
            &ImportDocument {
                profile: &profile.name,
                dry_run: true,
                report: &report,
                deleted_count: 0,
                inserted_count: 0,
                error: None,
            },
            args.json,
            args.output.as_deref(),
        )?;
        return ambiguity_check(&report, args.fail_on_ambiguous);
    }

    let db = args.db.as_deref().ok_or_else(|| {
        CliError::usage("import needs --db")
            .with_hint("use --dry-run to reconcile without writing")
    })?;
    let mut store = open_store(db)?;

    let result = match &canonical {
        Some(set) => importer.import_replace(rows, set, &mut store),
        None => importer.import_from_store(rows, &mut store),
    };

    match result {
        Ok(outcome) => {
            // The snapshot only changes once the collection matches it.
            if let Some(set) = &canonical {
                let n = store.replace_canonical(set).map_err(|e| CliError {
                    code: EXIT_IMPORT_STORE,
                    message: format!("import written, but the canonical snapshot was not stored: {e}"),
                    hint: None,
                })?;
                log::info!("canonical snapshot replaced with {n} entit{}", if n == 1 { "y" } else { "ies" });
            }
            summarize(&outcome.profile, &outcome.report, Some(outcome.inserted_count));
            emit(
                &ImportDocument {
                    profile: &outcome.profile,
                    dry_run: false,
                    report: &outcome.report,
                    deleted_count: outcome.deleted_count,
                    inserted_count: outcome.inserted_count,
                    error: None,
                },
                args.json,
                args.output.as_deref(),
            )?;
            ambiguity_check(&outcome.report, args.fail_on_ambiguous)
        }
        Err(failure) => {
            summarize(&profile.name, &failure.report, Some(failure.inserted_count));
            emit(
                &ImportDocument {
                    profile: &profile.name,
                    dry_run: false,
                    report: &failure.report,
                    deleted_count: failure.deleted_count,
                    inserted_count: failure.inserted_count,
                    error: Some(ErrorDocument {
                        message: failure.error.to_string(),
                        failed_batch: failure.error.failed_batch(),
                    }),
                },
                args.json,
                args.output.as_deref(),
            )?;
            let mut err = import_err(&failure.error);
            if failure.deleted_count > 0 {
                log::warn!(
                    "{} previous record(s) deleted, {} new record(s) inserted before the failure",
                    failure.deleted_count,
                    failure.inserted_count,
                );
                err = err.with_hint("the collection holds only the rows inserted before the failure");
            }
            Err(err)
        }
    }
}

fn ambiguity_check(report: &ImportReport, fail_on_ambiguous: bool) -> Result<(), CliError> {
    if fail_on_ambiguous && report.ambiguous_fallback_count > 0 {
        return Err(CliError {
            code: EXIT_IMPORT_AMBIGUOUS,
            message: format!(
                "{} row(s) assigned by ambiguous fallback (fail_on_ambiguous)",
                report.ambiguous_fallback_count
            ),
            hint: Some("add a secondary attribute to the profile to tell entities apart".into()),
        });
    }
    Ok(())
}

pub fn cmd_validate(profile_path: PathBuf) -> Result<(), CliError> {
    let profile = load_profile(&profile_path).map_err(|e| {
        if e.code == EXIT_IMPORT_INVALID_PROFILE {
            e.with_hint(format!("check {}", profile_path.display()))
        } else {
            e
        }
    })?;
    eprintln!(
        "{}: valid (name column '{}', {} secondary, {} dependent fact(s), {} typed field(s), batch size {}, {})",
        profile.name,
        profile.name_column,
        profile.secondary.len(),
        profile.dependent_facts.len(),
        profile.fields.len(),
        profile.batch_size,
        profile.mode,
    );
    Ok(())
}
