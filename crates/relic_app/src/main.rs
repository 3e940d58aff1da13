//! Relic - NTFS artifact extraction and parsing.
//!
//! Locates `$MFT`, `$LogFile`, and `$UsnJrnl:$J` in raw disk images,
//! materializes them, and decodes them into analyst-ready record streams.

mod commands;
mod progress;
mod sink;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::SkipArtifact;
use relic_core::{CancelToken, CoreError, ParseStats};
use sink::OutputFormat;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relic")]
#[command(version)]
#[command(about = "Extract and parse NTFS artifacts ($MFT, $LogFile, $UsnJrnl)", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract $MFT, $LogFile and $UsnJrnl:$J from a disk image
    Extract {
        /// Raw/DD image, E01 container, or block device
        image: PathBuf,

        #[arg(short, long, default_value = "./artifacts")]
        output: PathBuf,

        /// NTFS partition index (default: all NTFS partitions)
        #[arg(short, long)]
        partition: Option<usize>,

        /// Artifacts to skip
        #[arg(long, value_delimiter = ',')]
        skip: Vec<SkipArtifact>,
    },

    /// Parse a pre-extracted $MFT into a record stream
    ParseMft {
        input: PathBuf,

        #[arg(short, long, default_value = "./mft.csv")]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,

        /// Reconstruct full paths (second pass over the MFT)
        #[arg(long)]
        paths: bool,

        /// Emit BAAD/unfixable entries with corrupt=true
        #[arg(long)]
        include_corrupt: bool,

        /// Emit only in-use entries
        #[arg(long)]
        active_only: bool,
    },

    /// Parse a pre-extracted $UsnJrnl:$J into event rows
    ParseUsnjrnl {
        input: PathBuf,

        /// Matching $MFT, used to resolve full paths
        #[arg(short, long)]
        mft: Option<PathBuf>,

        #[arg(short, long, default_value = "./usn.csv")]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },

    /// Walk $LogFile page headers (record semantics are not decoded)
    ParseLogfile {
        input: PathBuf,

        #[arg(short, long, default_value = "./logfile.csv")]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },

    /// Correlate $MFT, $UsnJrnl and $LogFile into one record stream
    Analyze {
        /// Pre-extracted $MFT
        #[arg(long)]
        mft: PathBuf,

        /// Pre-extracted $UsnJrnl:$J
        #[arg(long)]
        usnjrnl: Option<PathBuf>,

        /// Pre-extracted $LogFile
        #[arg(long)]
        logfile: Option<PathBuf>,

        #[arg(short, long, default_value = "./analysis")]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },

    /// Extract artifacts to a temporary directory and analyze them
    ExtractAnalyze {
        image: PathBuf,

        #[arg(short, long, default_value = "./analysis")]
        output: PathBuf,

        #[arg(short, long)]
        partition: Option<usize>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,

        /// Keep the temporary extracted artifacts
        #[arg(long)]
        keep_temp: bool,
    },

    /// Enumerate MBR/GPT partitions and mark NTFS ones
    ListPartitions { image: PathBuf },

    /// Show NTFS boot-sector geometry
    Info {
        image: PathBuf,

        #[arg(short, long)]
        partition: Option<usize>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            tracing::warn!("failed to set Ctrl+C handler: {e}");
        }
    }

    match dispatch(cli.command, &cancel) {
        Ok(stats) if stats.has_corruption() => {
            eprintln!("\n⚠️  completed with recovered corruption");
            ExitCode::from(4)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn dispatch(command: Commands, cancel: &CancelToken) -> Result<ParseStats> {
    match command {
        Commands::Extract {
            image,
            output,
            partition,
            skip,
        } => {
            let (paths, stats) = commands::run_extract(&image, &output, partition, &skip, cancel)?;
            println!("\nArtifacts written:");
            for path in paths {
                println!("  {}", path.display());
            }
            Ok(stats)
        }
        Commands::ParseMft {
            input,
            output,
            format,
            paths,
            include_corrupt,
            active_only,
        } => commands::run_parse_mft(
            &input,
            &output,
            format,
            paths,
            include_corrupt,
            active_only,
            cancel,
        ),
        Commands::ParseUsnjrnl {
            input,
            mft,
            output,
            format,
        } => commands::run_parse_usnjrnl(&input, mft.as_deref(), &output, format, cancel),
        Commands::ParseLogfile {
            input,
            output,
            format,
        } => commands::run_parse_logfile(&input, &output, format, cancel),
        Commands::Analyze {
            mft,
            usnjrnl,
            logfile,
            output,
            format,
        } => commands::run_analyze(
            &mft,
            usnjrnl.as_deref(),
            logfile.as_deref(),
            &output,
            format,
            cancel,
        ),
        Commands::ExtractAnalyze {
            image,
            output,
            partition,
            format,
            keep_temp,
        } => commands::run_extract_analyze(&image, &output, partition, format, keep_temp, cancel),
        Commands::ListPartitions { image } => commands::run_list_partitions(&image),
        Commands::Info { image, partition } => commands::run_info(&image, partition),
    }
}

/// Process exit codes: 2 input error, 3 format error, 4 partial, 5 cancelled.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::Cancelled) => 5,
        Some(CoreError::Io(_)) => 2,
        Some(_) => 3,
        // Filesystem errors outside the core (missing inputs, unwritable
        // outputs) count as input errors.
        None => 2,
    }
}
