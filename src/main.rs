use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use basevar::genomics::{load_alignment_list, ReadSelectionPolicy, DEFAULT_BATCH_WIDTH, DEFAULT_MIN_MAPQ};
use basevar::pipeline::{BaseTypeRunnerConfig, WorkerArgs};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "basevar",
    version,
    about = "Population variant caller for ultra-low-pass sequencing data"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Call variants and write per-position coverage for a cohort.
    Basetype(BaseTypeArgs),
    /// Merge coverage or VCF files into one ordered file.
    Merge(MergeArgs),
    /// Process one share of regions (launched by `basetype`).
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
struct BaseTypeArgs {
    /// Alignment file (BAM/CRAM); repeatable.
    #[arg(short = 'I', long = "input")]
    input: Vec<PathBuf>,
    /// File listing alignment files, one per line.
    #[arg(short = 'L', long = "align-file-list")]
    align_file_list: Option<PathBuf>,
    /// Indexed reference FASTA.
    #[arg(short = 'R', long)]
    reference: PathBuf,
    /// Minimum mapping quality.
    #[arg(short = 'q', long, default_value_t = DEFAULT_MIN_MAPQ)]
    mapq: u8,
    /// Samples per batch file.
    #[arg(short = 'B', long, default_value_t = DEFAULT_BATCH_WIDTH)]
    batch_count: usize,
    /// Worker processes.
    #[arg(long = "nCPU", default_value_t = 1)]
    ncpu: usize,
    /// Minimum allele frequency [default: min(0.001, 100/samples)].
    #[arg(short = 'm', long)]
    min_af: Option<f64>,
    /// Coverage output file.
    #[arg(long)]
    output_cvg: PathBuf,
    /// VCF output file; coverage only when omitted.
    #[arg(long)]
    output_vcf: Option<PathBuf>,
    /// Position file (`chr<TAB>pos` or `chr<TAB>start<TAB>end`).
    #[arg(long)]
    positions: Option<PathBuf>,
    /// Comma-separated regions (`chr`, `chr:start-end`) or a region file.
    #[arg(long)]
    regions: Option<String>,
    /// Population group file (accepted, not used).
    #[arg(long)]
    pop_group: Option<PathBuf>,
    /// Take sample ids from file names instead of `@RG SM`.
    #[arg(long)]
    filename_has_samplename: bool,
    /// Reuse complete batch files from an interrupted run.
    #[arg(long)]
    smart_rerun: bool,
    /// Read selection policy (`first` or `best-quality`).
    #[arg(long, default_value = "first")]
    read_selection: ReadSelectionPolicy,
}

impl From<BaseTypeArgs> for BaseTypeRunnerConfig {
    fn from(args: BaseTypeArgs) -> Self {
        let mut config = BaseTypeRunnerConfig::new(args.reference, args.output_cvg);
        config.alignments = args.input;
        config.alignment_list = args.align_file_list;
        config.positions = args.positions;
        config.regions = args.regions;
        config.pop_group = args.pop_group;
        config.min_mapq = args.mapq;
        config.batch_count = args.batch_count;
        config.workers = args.ncpu;
        config.min_af = args.min_af;
        config.output_vcf = args.output_vcf;
        config.filename_has_samplename = args.filename_has_samplename;
        config.smart_rerun = args.smart_rerun;
        config.read_selection = args.read_selection;
        config
    }
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// File to merge; repeatable.
    #[arg(short = 'I', long = "input")]
    input: Vec<PathBuf>,
    /// File listing files to merge, one per line.
    #[arg(short = 'L', long = "file-list")]
    file_list: Option<PathBuf>,
    /// Merged output file.
    #[arg(short = 'O', long = "output")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Basetype(args) => run_basetype(args)?,
        Commands::Merge(args) => run_merge(args)?,
        Commands::Worker(args) => {
            let _span = tracing::info_span!("worker", worker = args.index).entered();
            let summary = basevar::run_worker(&args)
                .with_context(|| format!("worker {} failed", args.index))?;
            info!(
                regions = summary.regions,
                positions = summary.positions,
                variants = summary.variants,
                encoded = summary.encoded_batches,
                reused = summary.reused_batches,
                "worker done"
            );
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_basetype(args: BaseTypeArgs) -> Result<()> {
    let config = BaseTypeRunnerConfig::from(args);
    let program = std::env::current_exe().context("cannot locate the basevar executable")?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("failed to install the interrupt handler")?;

    let output = config.output_cvg.clone();
    let summary = match basevar::run_basetype(config, program, cancel) {
        Ok(summary) => summary,
        Err(err) if err.is_interrupted() => {
            warn!("run interrupted; batch files are kept for --smart-rerun");
            return Err(err.into());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("basetype run for {} failed", output.display()))
        }
    };
    info!(
        samples = summary.samples,
        regions = summary.regions,
        workers = summary.workers,
        positions = summary.positions,
        variants = summary.variants,
        "done"
    );
    Ok(())
}

fn run_merge(args: MergeArgs) -> Result<()> {
    let sources = load_alignment_list(&args.input, args.file_list.as_deref())
        .context("failed to read the list of files to merge")?;
    anyhow::ensure!(!sources.is_empty(), "no files to merge (use -I and/or -L)");
    let summary = basevar::merge_outputs(&sources, &args.output)
        .with_context(|| format!("failed to merge into {}", args.output.display()))?;
    info!(records = summary.records, strategy = ?summary.strategy, "merged");
    Ok(())
}
