use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use gwas_ss_rehab::errors::{MissingFileError, StageError, UsageError};
use gwas_ss_rehab::orchestrator::{self, FixOptions};
use gwas_ss_rehab::sort::SortKey;

#[derive(Parser, Debug)]
#[command(name = "gwas-ss-rehab")]
#[command(author = "GWAS SS Rehab Contributors")]
#[command(version = "0.4.0")]
#[command(about = "Diagnoses and repairs GWAS summary statistics tables", long_about = None)]
struct Cli {
    /// Verbose output: keep every intermediate file and print extra detail
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: suppress info-level logging
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

/// Interprets a path-like flag's raw string, treating the case-insensitive
/// tokens `none`/`na`/`null` (or an empty string) as "not provided",
/// matching the original CLI's optional-path argument convention. Plain
/// `String` fields (rather than `Option<PathBuf>`) keep this conversion
/// explicit instead of relying on clap's automatic `Option<T>` unwrapping.
fn maybe_path(s: &str) -> Option<PathBuf> {
    if matches!(s.to_ascii_lowercase().as_str(), "none" | "na" | "null" | "") {
        None
    } else {
        Some(PathBuf::from(s))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Diagnoses and repairs a GWAS summary statistics table against dbSNP
    /// reference side-tables.
    Fix {
        /// Input GWAS SS file (a sibling `<input>.json` column-mapping config is read if present)
        #[arg(short, long)]
        input: PathBuf,

        /// Output path for the repaired file
        #[arg(short, long)]
        output: PathBuf,

        /// DB1 side-table, sorted by (Chr,BP). Pass "none" to omit.
        #[arg(long, default_value = "none")]
        dbsnp1: String,

        /// DB2 side-table, sorted by rsID. Pass "none" to omit.
        #[arg(long, default_value = "none")]
        dbsnp2: String,

        /// UCSC chain file for liftover to hg38. Pass "none" to omit.
        #[arg(long, default_value = "none")]
        chain_file: String,

        /// Which FREQ sub-database to read EAF from
        #[arg(long, default_value = "dbGaP_PopFreq")]
        freq_db: String,

        /// Resolvers to force on (e.g. "beta")
        #[arg(long, value_delimiter = ',')]
        restore: Vec<String>,

        /// Resolvers to force off, overriding --restore
        #[arg(long = "do-not-restore", value_delimiter = ',')]
        do_not_restore: Vec<String>,
    },

    /// Validates a GWAS summary statistics table and prints a per-field
    /// issue report plus a pval bucket histogram.
    Diagnose {
        /// Input GWAS SS file
        #[arg(short, long)]
        input: PathBuf,

        /// Directory to write invalid_entries.csv into. Pass "none" to omit.
        #[arg(long, default_value = "none")]
        report_dir: String,
    },

    /// Sorts a GWAS summary statistics table by rsID or by (Chr,BP).
    Sort {
        /// Input GWAS SS file
        #[arg(short, long)]
        input: PathBuf,

        /// Output path for the sorted file
        #[arg(short, long)]
        output: PathBuf,

        /// Sort key: "rsID" or "ChrBP"
        #[arg(long, default_value = "ChrBP")]
        by: String,
    },

    /// Builds the DB1/DB2 dbSNP side-tables from a VCF via bcftools and gz-sort.
    PrepareDbSnps {
        /// Source dbSNP VCF
        #[arg(long)]
        dbsnp: PathBuf,

        /// Output path prefix for the generated side-tables
        #[arg(short, long)]
        output: PathBuf,

        /// Path to the gz-sort executable
        #[arg(long, default_value = "gz-sort")]
        gz_sort: PathBuf,

        /// Path to the bcftools executable
        #[arg(long, default_value = "bcftools")]
        bcftools: PathBuf,

        /// Sort buffer size, passed to gz-sort's -S flag
        #[arg(long, default_value = "4G")]
        buffer: String,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        log::LevelFilter::Warn
    } else if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .init();
}

fn require_file(path: &std::path::Path) -> Result<(), MissingFileError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(MissingFileError(path.to_path_buf()))
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Fix {
            input,
            output,
            dbsnp1,
            dbsnp2,
            chain_file,
            freq_db,
            restore,
            do_not_restore,
        } => {
            require_file(&input)?;
            let dbsnp1 = maybe_path(&dbsnp1);
            let dbsnp2 = maybe_path(&dbsnp2);
            let chain_file = maybe_path(&chain_file);
            if let Some(p) = &dbsnp1 {
                require_file(p)?;
            }
            if let Some(p) = &dbsnp2 {
                require_file(p)?;
            }
            if let Some(p) = &chain_file {
                require_file(p)?;
            }
            if dbsnp1.is_none() && dbsnp2.is_none() {
                return Err(UsageError(
                    "at least one of --dbsnp1/--dbsnp2 must be provided".to_string(),
                )
                .into());
            }

            let opts = FixOptions {
                input,
                output,
                dbsnp1,
                dbsnp2,
                chain_file,
                freq_db,
                restore,
                do_not_restore,
                verbose: cli.verbose,
            };
            let result_path = orchestrator::run_fix(&opts).map_err(anyhow::Error::new)?;
            log::info!("done: {}", result_path.display());
        }

        Command::Diagnose { input, report_dir } => {
            require_file(&input)?;
            let report_dir = maybe_path(&report_dir);
            orchestrator::run_diagnose(&input, report_dir.as_deref())?;
        }

        Command::Sort { input, output, by } => {
            require_file(&input)?;
            let key = SortKey::parse(&by)
                .ok_or_else(|| UsageError(format!("unknown sort key \"{by}\" (expected rsID or ChrBP)")))?;
            orchestrator::run_sort(&input, &output, key)?;
        }

        Command::PrepareDbSnps {
            dbsnp,
            output,
            gz_sort,
            bcftools,
            buffer,
        } => {
            require_file(&dbsnp)?;
            orchestrator::run_prepare_dbsnps(&dbsnp, &output, &gz_sort, &bcftools, &buffer)
                .context("preparing dbSNP side-tables")?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(stage) = err.downcast_ref::<StageError>() {
                eprintln!("error: {stage}");
                return ExitCode::from(stage.exit_code() as u8);
            }
            if let Some(usage) = err.downcast_ref::<UsageError>() {
                eprintln!("error: {usage}");
                return ExitCode::from(1);
            }
            if let Some(missing) = err.downcast_ref::<MissingFileError>() {
                eprintln!("error: {missing}");
                return ExitCode::from(2);
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
