use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ncbi_batch_push::app::{App, SubmitOptions};
use ncbi_batch_push::bam::prune_bams;
use ncbi_batch_push::cloud::SystemCloudFetcher;
use ncbi_batch_push::config::{Config, ConfigLoader, Contact};
use ncbi_batch_push::error::PushError;
use ncbi_batch_push::fasta::{DEFAULT_MARKER, REFORMAT_FILE, reformat_fasta};
use ncbi_batch_push::genbank::{
    DEFAULT_BIOPROJECT, PackageRequest, SOURCE_FILE, build_package, write_source_table,
};
use ncbi_batch_push::gisaid::{NCBI_METADATA_FILE, convert_metadata};
use ncbi_batch_push::output::{JsonOutput, LogProgress, OutputMode, print_submit_summary};
use ncbi_batch_push::store::Store;
use ncbi_batch_push::transfer::FtpClient;

#[derive(Parser)]
#[command(name = "ncbi-batch-push")]
#[command(about = "Prepare, validate and upload batched BioSample/SRA/GenBank submissions to NCBI")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON results on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the batched BioSample/SRA submission described by a config file")]
    Submit(SubmitArgs),
    #[command(about = "Write a run config with the lab defaults")]
    WriteConfig(WriteConfigArgs),
    #[command(about = "Delete BAM files whose sample is not in the metadata")]
    PrepBam(PrepBamArgs),
    #[command(about = "Rewrite FASTA headers to bare sample ids")]
    FastaIds(FastaIdsArgs),
    #[command(about = "Convert GISAID upload metadata into the NCBI metadata table")]
    ConvertMeta(ConvertMetaArgs),
    #[command(about = "Write the GenBank source modifier table")]
    GenbankSource(GenbankSourceArgs),
    #[command(about = "Zip a GenBank upload and write its submission.xml")]
    GenbankPackage(GenbankPackageArgs),
}

#[derive(Args)]
struct SubmitArgs {
    config: Utf8PathBuf,

    /// Prepare and validate batches without uploading.
    #[arg(long)]
    no_upload: bool,
}

#[derive(Args)]
struct WriteConfigArgs {
    #[arg(long)]
    metadata: Utf8PathBuf,
    #[arg(long)]
    bam_dir: Utf8PathBuf,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    organization: String,
    /// Google Cloud service account key.
    #[arg(long)]
    credentials: Option<Utf8PathBuf>,
    /// Release date; defaults to today.
    #[arg(long)]
    hold: Option<String>,
    #[arg(long, short, default_value = "job_config.json")]
    output: Utf8PathBuf,
}

#[derive(Args)]
struct PrepBamArgs {
    metadata: Utf8PathBuf,
    bam_dir: Utf8PathBuf,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct FastaIdsArgs {
    fasta: Utf8PathBuf,
    #[arg(long, default_value = DEFAULT_MARKER)]
    marker: String,
    #[arg(long, short, default_value = REFORMAT_FILE)]
    output: Utf8PathBuf,
}

#[derive(Args)]
struct ConvertMetaArgs {
    gisaid_metadata: Utf8PathBuf,
    bioproject: String,
    metadata: Utf8PathBuf,
    /// CSV with `authors_original` and `authors_new` columns.
    #[arg(long)]
    authors: Option<Utf8PathBuf>,
    #[arg(long, short, default_value = NCBI_METADATA_FILE)]
    output: Utf8PathBuf,
}

#[derive(Args)]
struct GenbankSourceArgs {
    #[arg(long, short = 's')]
    sra_meta: Utf8PathBuf,
    #[arg(long, default_value = DEFAULT_BIOPROJECT)]
    bioproject: String,
    #[arg(long, short, default_value = SOURCE_FILE)]
    output: Utf8PathBuf,
}

#[derive(Args)]
struct GenbankPackageArgs {
    /// Run config supplying the contact and hold fields.
    #[arg(long)]
    config: Utf8PathBuf,
    #[arg(long, short = 'o')]
    out_dir: Utf8PathBuf,
    #[arg(long, short = 'f')]
    fasta: Utf8PathBuf,
    #[arg(long, short = 's')]
    sbt_template: Utf8PathBuf,
    #[arg(long, default_value = "New submission, GenBank")]
    comment: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PushError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PushError) -> u8 {
    match error {
        PushError::ConfigRead(_)
        | PushError::ConfigParse(_)
        | PushError::InvalidConfig { .. }
        | PushError::InvalidActionType(_)
        | PushError::InvalidSubmissionType(_)
        | PushError::MetadataRead { .. }
        | PushError::MissingColumn { .. }
        | PushError::Schema { .. }
        | PushError::CredentialsRead(_)
        | PushError::Fasta(_) => 2,
        PushError::Ftp(_)
        | PushError::CloudDownload(_)
        | PushError::CloudStatus { .. }
        | PushError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Submit(args) => run_submit(args, output_mode),
        Commands::WriteConfig(args) => run_write_config(args),
        Commands::PrepBam(args) => {
            let result = prune_bams(&args.metadata, &args.bam_dir, args.dry_run)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_json(&result).into_diagnostic(),
                OutputMode::Human => {
                    let verb = if result.dry_run { "would remove" } else { "removed" };
                    for path in &result.removed {
                        println!("{verb} {path}");
                    }
                    Ok(())
                }
            }
        }
        Commands::FastaIds(args) => {
            let summary = reformat_fasta(&args.fasta, &args.output, &args.marker)?;
            info!("wrote {} records to {}", summary.records, args.output);
            print_result(output_mode, &summary)
        }
        Commands::ConvertMeta(args) => {
            let summary = convert_metadata(
                &args.gisaid_metadata,
                &args.metadata,
                &args.bioproject,
                args.authors.as_deref(),
                &args.output,
            )?;
            print_result(output_mode, &summary)
        }
        Commands::GenbankSource(args) => {
            let rows = write_source_table(&args.sra_meta, &args.output, &args.bioproject)?;
            info!("wrote {rows} rows to {}", args.output);
            Ok(())
        }
        Commands::GenbankPackage(args) => {
            let config = ConfigLoader::load(&args.config)?;
            let package = build_package(&PackageRequest {
                out_dir: &args.out_dir,
                fasta: &args.fasta,
                template: &args.sbt_template,
                info: &config.submission,
                comment: &args.comment,
                date: Local::now().date_naive(),
            })?;
            info!("packaged {} files into {}", package.entries.len(), package.archive);
            print_result(output_mode, &package)
        }
    }
}

fn print_result<T: serde::Serialize>(output_mode: OutputMode, value: &T) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => JsonOutput::print_json(value).into_diagnostic(),
        OutputMode::Human => Ok(()),
    }
}

fn run_submit(args: SubmitArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::load(&args.config)?;
    let store = Store::new(config.output_dir.clone());
    let transfer = config.ftp.clone().map(FtpClient::new);
    let cloud = SystemCloudFetcher::new()?;
    let app = App::new(store, transfer, cloud);
    let options = SubmitOptions {
        run_date: Local::now().date_naive(),
        skip_upload: args.no_upload,
    };

    match output_mode {
        OutputMode::Json => {
            let result = app.submit(&config, &options, &JsonOutput)?;
            JsonOutput::print_submit(&result).into_diagnostic()?;
        }
        OutputMode::Human => {
            let result = app.submit(&config, &options, &LogProgress)?;
            print_submit_summary(&result);
        }
    }
    Ok(())
}

fn run_write_config(args: WriteConfigArgs) -> miette::Result<()> {
    let hold = args
        .hold
        .unwrap_or_else(|| Local::now().date_naive().format("%Y-%m-%d").to_string());
    let config = Config::lab_defaults(
        &args.metadata,
        &args.bam_dir,
        Contact {
            first_name: args.first_name,
            last_name: args.last_name,
            email: args.email,
            organization: args.organization,
        },
        args.credentials.as_deref(),
        &hold,
    );
    config.write(&args.output)?;
    println!("wrote {}", args.output);
    Ok(())
}
