use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use phage_host_prep::app::{
    App, ExtractRequest, FilterRequest, LogSink, MapRequest, ProgressSink, SampleRequest,
    StrainSource,
};
use phage_host_prep::config::{ConfigLoader, SampleOverrides};
use phage_host_prep::contigs::UniverseSource;
use phage_host_prep::error::PrepError;
use phage_host_prep::output::{JsonOutput, OutputMode};
use phage_host_prep::sampler::ExhaustionPolicy;

#[derive(Parser)]
#[command(name = "phprep")]
#[command(about = "Prepare balanced host-phage interaction datasets and strain accession maps")]
#[command(version, author)]
struct Cli {
    /// Print the stage report as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Config file (defaults to ./phprep.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Extract positive host-phage pairs from an annotation table")]
    Extract(ExtractArgs),
    #[command(about = "Keep pairs whose phage contig is present in a contig list or FASTA")]
    Filter(FilterArgs),
    #[command(about = "Build a balanced positive/negative dataset")]
    Sample(SampleArgs),
    #[command(about = "Map strain names to assembly accessions")]
    Map(MapArgs),
}

#[derive(Args)]
struct ExtractArgs {
    #[arg(long)]
    annotations: PathBuf,

    #[arg(long)]
    out_pairs: PathBuf,

    #[arg(long)]
    out_hosts: PathBuf,

    /// Host species to keep, e.g. "Escherichia coli".
    #[arg(long)]
    species: Option<String>,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    pairs: PathBuf,

    #[arg(long, conflicts_with = "fasta", required_unless_present = "fasta")]
    contig_list: Option<PathBuf>,

    #[arg(long)]
    fasta: Option<PathBuf>,

    #[arg(long)]
    out: PathBuf,

    /// Also write the contig universe, one id per line.
    #[arg(long)]
    out_contigs: Option<PathBuf>,
}

#[derive(Args)]
struct SampleArgs {
    #[arg(long)]
    pairs: PathBuf,

    #[arg(long)]
    out_dir: PathBuf,

    #[arg(long)]
    num_hosts: Option<usize>,

    #[arg(long)]
    max_pos_per_host: Option<usize>,

    #[arg(long)]
    neg_per_pos: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    on_exhausted: Option<ExhaustionPolicy>,

    /// Allowed phage universe: contig list or FASTA.
    #[arg(long)]
    universe: Option<PathBuf>,

    /// Write the sampled host accessions here.
    #[arg(long)]
    out_hosts: Option<PathBuf>,
}

#[derive(Args)]
struct MapArgs {
    #[arg(long, conflicts_with = "matrix", required_unless_present = "matrix")]
    strains: Option<PathBuf>,

    /// Interaction matrix whose first column holds strain names.
    #[arg(long)]
    matrix: Option<PathBuf>,

    /// Reference TSV or NCBI Datasets JSON lines.
    #[arg(long)]
    reference: PathBuf,

    #[arg(long)]
    out_map: PathBuf,

    #[arg(long)]
    out_accessions: PathBuf,

    #[arg(long)]
    out_unmatched: Option<PathBuf>,

    /// Also write how each strain matched (kind and reference name).
    #[arg(long)]
    out_details: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PrepError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PrepError) -> u8 {
    match error {
        PrepError::MissingField { .. }
        | PrepError::EmptyInput(_)
        | PrepError::ConfigRead(_)
        | PrepError::ConfigParse(_)
        | PrepError::InvalidConfig(_) => 2,
        PrepError::InsufficientHosts { .. } | PrepError::NegativeSamplingExhausted { .. } => 3,
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
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogSink,
    };

    let app = App::new(ConfigLoader::resolve(cli.config.as_deref())?);

    match cli.command {
        Commands::Extract(args) => run_extract(&app, args, sink, output_mode),
        Commands::Filter(args) => run_filter(&app, args, sink, output_mode),
        Commands::Sample(args) => run_sample(&app, args, sink, output_mode),
        Commands::Map(args) => run_map(&app, args, sink, output_mode),
    }
}

fn run_extract(
    app: &App,
    args: ExtractArgs,
    sink: &dyn ProgressSink,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let result = app.extract(
        ExtractRequest {
            annotations: &args.annotations,
            species: args.species.as_deref(),
            out_pairs: &args.out_pairs,
            out_hosts: &args.out_hosts,
        },
        sink,
    )?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_extract(&result).into_diagnostic(),
        OutputMode::Human => {
            println!(
                "extract: {} pairs, {} hosts ({} rows, {} malformed accessions, {} other species)",
                result.stats.pairs,
                result.stats.hosts,
                result.stats.rows,
                result.stats.malformed_accessions,
                result.stats.species_rejected
            );
            println!("  pairs: {}", result.pairs_path);
            println!("  hosts: {}", result.hosts_path);
            Ok(())
        }
    }
}

fn run_filter(
    app: &App,
    args: FilterArgs,
    sink: &dyn ProgressSink,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let universe = match (&args.contig_list, &args.fasta) {
        (Some(path), _) => UniverseSource::ContigList(path),
        (None, Some(path)) => UniverseSource::Fasta(path),
        (None, None) => {
            return Err(miette::Report::msg(
                "one of --contig-list or --fasta is required",
            ));
        }
    };
    let result = app.filter(
        FilterRequest {
            pairs: &args.pairs,
            universe,
            out: &args.out,
            out_contigs: args.out_contigs.as_deref(),
        },
        sink,
    )?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_filter(&result).into_diagnostic(),
        OutputMode::Human => {
            println!(
                "filter: kept {} of {} pairs ({} removed, {} contigs available)",
                result.stats.pairs_kept,
                result.stats.pairs_in,
                result.stats.pairs_removed,
                result.stats.contigs_available
            );
            println!("  pairs: {}", result.pairs_path);
            Ok(())
        }
    }
}

fn run_sample(
    app: &App,
    args: SampleArgs,
    sink: &dyn ProgressSink,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let overrides = SampleOverrides {
        num_hosts: args.num_hosts,
        max_pos_per_host: args.max_pos_per_host,
        neg_per_pos: args.neg_per_pos,
        seed: args.seed,
        on_exhausted: args.on_exhausted,
    };
    let result = app.sample(
        SampleRequest {
            pairs: &args.pairs,
            out_dir: &args.out_dir,
            overrides,
            universe: args.universe.as_deref(),
            out_hosts: args.out_hosts.as_deref(),
        },
        sink,
    )?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_sample(&result).into_diagnostic(),
        OutputMode::Human => {
            println!(
                "sample: {} hosts, {} positives, {} negatives (seed {})",
                result.stats.sampled_hosts - result.stats.skipped_hosts,
                result.stats.positives,
                result.stats.negatives,
                result.config.seed
            );
            for host in &result.skipped_hosts {
                println!("  skipped (negatives exhausted): {host}");
            }
            println!("  dataset: {}", result.dataset_path);
            Ok(())
        }
    }
}

fn run_map(
    app: &App,
    args: MapArgs,
    sink: &dyn ProgressSink,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let strains = match (&args.strains, &args.matrix) {
        (Some(path), _) => StrainSource::List(path),
        (None, Some(path)) => StrainSource::Matrix(path),
        (None, None) => {
            return Err(miette::Report::msg(
                "one of --strains or --matrix is required",
            ));
        }
    };
    let result = app.map(
        MapRequest {
            strains,
            reference: &args.reference,
            out_map: &args.out_map,
            out_accessions: &args.out_accessions,
            out_unmatched: args.out_unmatched.as_deref(),
            out_details: args.out_details.as_deref(),
        },
        sink,
    )?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_map(&result).into_diagnostic(),
        OutputMode::Human => {
            println!(
                "map: {} of {} strains mapped (exact {}, alias {}, token {})",
                result.stats.matched,
                result.stats.strains,
                result.stats.exact,
                result.stats.alias,
                result.stats.token
            );
            for strain in &result.unmatched {
                println!("  unmatched: {strain}");
            }
            println!("  map: {}", result.map_path);
            println!("  accessions: {}", result.accessions_path);
            Ok(())
        }
    }
}
