//! One worker process: encode batch files for its regions, then call them.
//!
//! A worker reads its sample list and region list from files the
//! orchestrator wrote into the cache directory, and writes exactly one
//! coverage part file (and one VCF part file when enabled). It never
//! creates or removes the cache directory and installs no signal handling.
//!
//! Alignment files are opened once per sample group. Consecutive regions on
//! the same chromosome form a [`ChromosomeShare`] and are written into one
//! batch file per group, fetching the open readers again for each region.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use clap::Args;
use rust_htslib::bam;
use thiserror::Error;
use tracing::{debug, info};

use crate::genomics::{
    config_digest, inspect_existing, load_position_file, open_indexed, AlignmentError,
    BatchEncoder, BatchEntry, BatchError, BatchHeader, BatchMerger, BatchWriter, CallerParams,
    FastaReference, GenomicRegion, HtsPileupSource, PileupError, PileupSource, ReadSelection,
    ReadSelectionPolicy, ReferenceError, ReferenceWindow, RegionError, RerunStatus, SampleCursor,
    SampleSource, SiteCaller, DEFAULT_BATCH_WIDTH, DEFAULT_MIN_MAPQ,
};
use crate::pipeline::config::{load_sample_file, ConfigError};

/// Errors that end a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Part file could not be created or flushed.
    #[error("worker output {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Coverage or VCF lines could not be written.
    #[error("failed to write calls: {0}")]
    Output(#[source] std::io::Error),

    /// Job files are unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Region list is unusable.
    #[error(transparent)]
    Region(#[from] RegionError),

    /// Reference could not be read.
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Alignment file could not be opened.
    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    /// Pileup or indel inconsistency.
    #[error(transparent)]
    Pileup(#[from] PileupError),

    /// Batch file failure.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Flags of the hidden `worker` subcommand.
///
/// The orchestrator builds the worker command line from this struct through
/// [`WorkerArgs::to_cli_args`], so both sides always agree on flag names.
#[derive(Debug, Clone, PartialEq, Args)]
pub struct WorkerArgs {
    /// Worker index, used in log records and part file names.
    #[arg(long)]
    pub index: usize,
    /// Indexed reference FASTA.
    #[arg(long)]
    pub reference: PathBuf,
    /// `id<TAB>path` sample list.
    #[arg(long)]
    pub samples: PathBuf,
    /// `chr<TAB>start<TAB>end` regions assigned to this worker.
    #[arg(long)]
    pub regions: PathBuf,
    /// Shared cache directory holding batch files.
    #[arg(long)]
    pub cache_dir: PathBuf,
    /// Coverage part file to write.
    #[arg(long)]
    pub output_cvg: PathBuf,
    /// VCF part file to write; coverage only when absent.
    #[arg(long)]
    pub output_vcf: Option<PathBuf>,
    /// Minimum mapping quality.
    #[arg(long, default_value_t = DEFAULT_MIN_MAPQ)]
    pub mapq: u8,
    /// Samples per batch file.
    #[arg(long, default_value_t = DEFAULT_BATCH_WIDTH)]
    pub batch_count: usize,
    /// Minimum allele frequency.
    #[arg(long)]
    pub min_af: f64,
    /// Read selection policy (`first` or `best-quality`).
    #[arg(long, default_value = "first")]
    pub read_selection: ReadSelectionPolicy,
    /// Reuse complete batch files.
    #[arg(long)]
    pub smart_rerun: bool,
}

impl WorkerArgs {
    /// Arguments following the `worker` subcommand.
    pub fn to_cli_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let mut push = |flag: &str, value: OsString| {
            args.push(flag.into());
            args.push(value);
        };
        push("--index", self.index.to_string().into());
        push("--reference", self.reference.clone().into());
        push("--samples", self.samples.clone().into());
        push("--regions", self.regions.clone().into());
        push("--cache-dir", self.cache_dir.clone().into());
        push("--output-cvg", self.output_cvg.clone().into());
        if let Some(vcf) = &self.output_vcf {
            push("--output-vcf", vcf.clone().into());
        }
        push("--mapq", self.mapq.to_string().into());
        push("--batch-count", self.batch_count.to_string().into());
        push("--min-af", self.min_af.to_string().into());
        push("--read-selection", self.read_selection.as_str().into());
        if self.smart_rerun {
            args.push("--smart-rerun".into());
        }
        args
    }
}

/// Counters reported when a worker finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Regions processed.
    pub regions: usize,
    /// Coverage lines written.
    pub positions: usize,
    /// VCF lines written.
    pub variants: usize,
    /// Batch files written by this run.
    pub encoded_batches: usize,
    /// Batch files reused from an earlier run.
    pub reused_batches: usize,
}

/// Settings shared by every region a worker handles.
#[derive(Debug, Clone, Copy)]
pub struct EncodeSettings<'a> {
    /// Read selection policy.
    pub policy: &'a dyn ReadSelection,
    /// Policy name, recorded in batch headers.
    pub policy_name: &'a str,
    /// Minimum mapping quality.
    pub min_mapq: u8,
}

/// Consecutive regions of one chromosome that share their batch files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromosomeShare {
    /// From the first region's start to the last region's end.
    pub span: GenomicRegion,
    /// Regions in position order.
    pub regions: Vec<GenomicRegion>,
}

impl From<GenomicRegion> for ChromosomeShare {
    fn from(region: GenomicRegion) -> Self {
        Self {
            span: region.clone(),
            regions: vec![region],
        }
    }
}

/// Group position-ordered runs of regions by chromosome.
pub fn chromosome_shares(regions: &[GenomicRegion]) -> Vec<ChromosomeShare> {
    let mut shares: Vec<ChromosomeShare> = Vec::new();
    for region in regions {
        match shares.last_mut() {
            Some(share) if share.span.chrom == region.chrom && region.start > share.span.end => {
                share.span.end = region.end;
                share.regions.push(region.clone());
            }
            _ => shares.push(ChromosomeShare::from(region.clone())),
        }
    }
    shares
}

/// Batch file for one chromosome span and sample group.
pub fn batch_path(cache_dir: &Path, span: &GenomicRegion, group: usize) -> PathBuf {
    cache_dir.join(format!(
        "{}_{}_{}.g{group}.batch.txt",
        span.chrom, span.start, span.end
    ))
}

/// Header a batch file for `group` of `samples` over `share` must carry.
pub fn batch_header(
    samples: &[SampleSource],
    group: Range<usize>,
    share: &ChromosomeShare,
    settings: &EncodeSettings<'_>,
) -> BatchHeader {
    let ids: Vec<String> = samples[group.clone()].iter().map(|s| s.id.clone()).collect();
    let digest = config_digest(&ids, &share.regions, settings.min_mapq, settings.policy_name);
    BatchHeader {
        samples: ids,
        sample_range: group,
        region: share.span.clone(),
        digest,
    }
}

/// Walk every position of `region` and write one batch line per position.
///
/// `cursors` holds one entry per sample of the group; `None` marks a sample
/// without an alignment source for this region.
pub fn encode_region<S: PileupSource>(
    cursors: &mut [Option<SampleCursor<S>>],
    region: &GenomicRegion,
    reference: &ReferenceWindow,
    settings: &EncodeSettings<'_>,
    writer: &mut BatchWriter,
) -> Result<usize, WorkerError> {
    let mut entries = Vec::with_capacity(cursors.len());
    let mut lines = 0;
    for position in region.start..=region.end {
        let target = position - 1;
        entries.clear();
        for cursor in cursors.iter_mut() {
            let entry = match cursor {
                Some(cursor) => {
                    let observation =
                        cursor.advance_to(target, reference, settings.policy, settings.min_mapq)?;
                    BatchEntry::from_observation(&observation)
                }
                None => BatchEntry::NoSource,
            };
            entries.push(entry);
        }
        writer.write_record(&region.chrom, position, reference.base_at(target), &entries)?;
        lines += 1;
    }
    Ok(lines)
}

/// Call every position in a set of group batch files and append the
/// coverage (and VCF) lines.
pub fn call_region<C: Write, V: Write>(
    batch_files: &[PathBuf],
    sample_count: usize,
    caller: &SiteCaller,
    cvg: &mut C,
    mut vcf: Option<&mut V>,
) -> Result<(usize, usize), WorkerError> {
    let mut merger = BatchMerger::open(batch_files, sample_count)?;
    let (mut positions, mut variants) = (0, 0);
    while let Some(record) = merger.next_record()? {
        let call = caller.call(&record);
        writeln!(cvg, "{}", call.coverage).map_err(WorkerError::Output)?;
        positions += 1;
        if let (Some(variant), Some(out)) = (&call.variant, vcf.as_mut()) {
            writeln!(out, "{variant}").map_err(WorkerError::Output)?;
            variants += 1;
        }
    }
    Ok((positions, variants))
}

fn open_group(
    samples: &[SampleSource],
    reference: &Path,
) -> Result<Vec<bam::IndexedReader>, WorkerError> {
    samples
        .iter()
        .map(|sample| open_indexed(&sample.path, reference).map_err(WorkerError::from))
        .collect()
}

/// Write one group's batch file for every region of `share`.
fn encode_share(
    readers: &mut [bam::IndexedReader],
    share: &ChromosomeShare,
    reference: &FastaReference,
    header: &BatchHeader,
    settings: &EncodeSettings<'_>,
    path: &Path,
) -> Result<(), WorkerError> {
    let mut writer = BatchWriter::create(path, header)?;
    for region in &share.regions {
        let window = reference.fetch_window(region)?;
        let mut cursors = readers
            .iter_mut()
            .map(|reader| {
                HtsPileupSource::fetch(reader, region).map(|source| source.map(SampleCursor::new))
            })
            .collect::<Result<Vec<_>, _>>()?;
        encode_region(&mut cursors, region, &window, settings, &mut writer)?;
    }
    writer.finish()?;
    Ok(())
}

/// Run a worker to completion.
pub fn run_worker(args: &WorkerArgs) -> Result<WorkerSummary, WorkerError> {
    let samples = load_sample_file(&args.samples)?;
    let regions = load_position_file(&args.regions)?;
    let reference = FastaReference::open(&args.reference)?;
    let policy = args.read_selection.build();
    let settings = EncodeSettings {
        policy: policy.as_ref(),
        policy_name: args.read_selection.as_str(),
        min_mapq: args.mapq,
    };
    let encoder = BatchEncoder::new(args.batch_count);
    let caller = SiteCaller::new(
        CallerParams {
            min_af: args.min_af,
            ..CallerParams::default()
        },
        args.output_vcf.is_some(),
    );
    info!(
        worker = args.index,
        samples = samples.len(),
        regions = regions.len(),
        "worker started"
    );

    let create = |path: &Path| {
        File::create(path)
            .map(BufWriter::new)
            .map_err(|source| WorkerError::Io {
                path: path.to_path_buf(),
                source,
            })
    };
    let mut cvg = create(args.output_cvg.as_path())?;
    let mut vcf = args.output_vcf.as_deref().map(create).transpose()?;

    let shares = chromosome_shares(&regions);
    let groups = encoder.groups(samples.len());
    let mut summary = WorkerSummary {
        regions: regions.len(),
        ..WorkerSummary::default()
    };

    for (idx, group) in groups.iter().enumerate() {
        let mut pending = Vec::new();
        for share in &shares {
            let path = batch_path(&args.cache_dir, &share.span, idx);
            let header = batch_header(&samples, group.clone(), share, &settings);
            if args.smart_rerun && inspect_existing(&path, &header)? == RerunStatus::Complete {
                debug!(worker = args.index, batch = %path.display(), "reusing batch file");
                summary.reused_batches += 1;
                continue;
            }
            pending.push((share, header, path));
        }
        if pending.is_empty() {
            continue;
        }

        let mut readers = open_group(&samples[group.clone()], &args.reference)?;
        for (share, header, path) in pending {
            encode_share(&mut readers, share, &reference, &header, &settings, &path)?;
            summary.encoded_batches += 1;
        }
        debug!(worker = args.index, group = idx, "group encoded");
    }

    for share in &shares {
        let batch_files: Vec<PathBuf> = (0..groups.len())
            .map(|idx| batch_path(&args.cache_dir, &share.span, idx))
            .collect();
        let (positions, variants) =
            call_region(&batch_files, samples.len(), &caller, &mut cvg, vcf.as_mut())?;
        summary.positions += positions;
        summary.variants += variants;
        debug!(worker = args.index, region = %share.span, positions, variants, "share done");
    }

    cvg.flush().map_err(|source| WorkerError::Io {
        path: args.output_cvg.clone(),
        source,
    })?;
    if let (Some(out), Some(path)) = (vcf.as_mut(), &args.output_vcf) {
        out.flush().map_err(|source| WorkerError::Io {
            path: path.clone(),
            source,
        })?;
    }
    info!(
        worker = args.index,
        positions = summary.positions,
        variants = summary.variants,
        "worker finished"
    );
    Ok(summary)
}
