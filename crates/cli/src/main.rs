// fleetsync CLI - bulk spreadsheet imports reconciled against canonical data

mod exit_codes;
mod import;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use fleetsync_import::config::FieldKind;
use fleetsync_import::normalize::normalize_cell;
use fleetsync_import::CellValue;

use exit_codes::{EXIT_ERROR, EXIT_IMPORT_PARSE, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "fleetsync")]
#[command(about = "Reconcile spreadsheet imports against canonical fleet assignments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a CSV export and replace the stored collection with it
    #[command(after_help = "\
Examples:
  fleetsync import fuel-cards.import.toml --rows cards.csv --canonical assignments.csv --db fleet.db
  fleetsync import fuel-cards.import.toml --rows cards.csv --db fleet.db --json
  fleetsync import fuel-cards.import.toml --rows cards.csv --canonical assignments.csv --dry-run
  RUST_LOG=debug fleetsync import fuel-cards.import.toml --rows cards.csv --db fleet.db")]
    Import {
        /// Path to the .import.toml profile
        profile: PathBuf,

        /// CSV export to import
        #[arg(long)]
        rows: PathBuf,

        /// Canonical CSV export; replaces the stored snapshot when given
        #[arg(long)]
        canonical: Option<PathBuf>,

        /// SQLite store file
        #[arg(long, env = "FLEETSYNC_DB")]
        db: Option<PathBuf>,

        /// Output JSON to stdout instead of a human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Reconcile and report without touching the store
        #[arg(long)]
        dry_run: bool,

        /// Exit non-zero when any row was assigned by ambiguous fallback
        #[arg(long)]
        fail_on_ambiguous: bool,
    },

    /// Validate an import profile without running it
    #[command(after_help = "\
Examples:
  fleetsync validate fuel-cards.import.toml")]
    Validate {
        /// Path to the .import.toml profile
        profile: PathBuf,
    },

    /// Print a single value the way an import would normalize it
    #[command(after_help = "\
Examples:
  fleetsync normalize date 15/01/2024
  fleetsync normalize date 45306
  fleetsync normalize currency '€ 1.500,00'
  fleetsync normalize integer '7001 0001'")]
    Normalize {
        kind: NormalizeKind,

        value: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum NormalizeKind {
    Text,
    Date,
    Currency,
    Integer,
}

impl From<NormalizeKind> for FieldKind {
    fn from(kind: NormalizeKind) -> Self {
        match kind {
            NormalizeKind::Text => FieldKind::Text,
            NormalizeKind::Date => FieldKind::Date,
            NormalizeKind::Currency => FieldKind::Currency,
            NormalizeKind::Integer => FieldKind::Integer,
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Import {
            profile,
            rows,
            canonical,
            db,
            json,
            output,
            dry_run,
            fail_on_ambiguous,
        } => import::cmd_import(import::ImportArgs {
            profile,
            rows,
            canonical,
            db,
            json,
            output,
            dry_run,
            fail_on_ambiguous,
        }),
        Commands::Validate { profile } => import::cmd_validate(profile),
        Commands::Normalize { kind, value } => cmd_normalize(kind, &value),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ============================================================================
// normalize
// ============================================================================

fn cmd_normalize(kind: NormalizeKind, value: &str) -> Result<(), CliError> {
    let kind = FieldKind::from(kind);
    let normalized = match (kind, normalize_cell(kind, &CellValue::from(value))) {
        (_, Some(cell)) => cell,
        (FieldKind::Date, None) => {
            return Err(CliError {
                code: EXIT_IMPORT_PARSE,
                message: format!("'{value}' is not a recognized date"),
                hint: Some("accepted: YYYY-MM-DD, DD/MM/YYYY, DD/MM/YY, spreadsheet serial".into()),
            });
        }
        (other, None) => {
            return Err(CliError {
                code: EXIT_IMPORT_PARSE,
                message: format!("'{value}' cannot be normalized as {other}"),
                hint: None,
            });
        }
    };
    println!("{normalized}");
    Ok(())
}
