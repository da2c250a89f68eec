//! # BaseVar: population variant calling for ultra-low-pass sequencing
//!
//! Each sample in a low-pass cohort contributes at most one base per
//! position, so individual genotypes are out of reach. BaseVar instead
//! treats the cohort as a whole: at every target position it collects one
//! observation per sample, estimates population allele frequencies by EM and
//! keeps the alleles that a likelihood-ratio test cannot eliminate.
//!
//! ## Data flow
//!
//! 1. **Region scheduling**: target regions are partitioned across worker
//!    processes ([`pipeline::partition_regions`]).
//! 2. **Pileup + batch encoding**: each worker walks its regions with one
//!    cursor per sample and packs the observations into batch files of at
//!    most `batch_count` samples ([`genomics::BatchWriter`]).
//! 3. **Calling**: batch files for a region are zipped back together into
//!    full-width records and scored ([`genomics::SiteCaller`]).
//! 4. **Merging**: per-worker coverage and VCF parts are merged into the
//!    final outputs ([`pipeline::OutputMerger`]).
//!
//! ## Usage Example
//!
//! ```
//! use basevar::genomics::{BaseType, CallerParams, SampleBase};
//!
//! let bases: Vec<SampleBase> = b"AAGG".iter().map(|&b| SampleBase::Nucleotide(b)).collect();
//! let mut model = BaseType::new(b'A', &bases, &[30; 4], CallerParams::with_sample_count(4));
//! assert!(model.lrt());
//! assert_eq!(model.alt_bases(), b"G");
//! println!("ALT={:?} QUAL={}", model.alt_bases(), model.var_qual());
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod genomics; // Pileups, batch files and the BaseType model
pub mod pipeline; // Worker processes, scheduling and merging

pub use genomics::{BaseType, CallerParams, GenomicRegion, SampleBase, SiteCaller};
pub use pipeline::{BaseTypeRunner, BaseTypeRunnerConfig, OutputMerger, RunSummary, WorkerArgs};

use thiserror::Error;

/// Any failure surfaced by the library's entry points.
#[derive(Error, Debug)]
pub enum BaseVarError {
    /// Invalid configuration or unreadable inputs.
    #[error(transparent)]
    Config(#[from] pipeline::ConfigError),

    /// Worker-side failure.
    #[error(transparent)]
    Worker(#[from] pipeline::WorkerError),

    /// Orchestration failure, including interrupts.
    #[error(transparent)]
    Scheduler(#[from] pipeline::SchedulerError),

    /// Output merge failure.
    #[error(transparent)]
    Merge(#[from] pipeline::MergeError),

    /// Batch file failure.
    #[error(transparent)]
    Batch(#[from] genomics::BatchError),
}

impl BaseVarError {
    /// Whether the operator interrupted the run.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            BaseVarError::Scheduler(pipeline::SchedulerError::Interrupted)
        )
    }
}

/// Convenience alias used by the entry points.
pub type Result<T> = std::result::Result<T, BaseVarError>;

/// Run the `basetype` command end to end.
pub fn run_basetype(
    config: BaseTypeRunnerConfig,
    program: std::path::PathBuf,
    cancel: std::sync::Arc<std::sync::atomic::AtomicBool>,
) -> Result<RunSummary> {
    Ok(BaseTypeRunner::new(config, program, cancel).run()?)
}

/// Run one worker job.
pub fn run_worker(args: &WorkerArgs) -> Result<pipeline::WorkerSummary> {
    Ok(pipeline::run_worker(args)?)
}

/// Merge coverage or VCF files with lexicographic chromosome order.
pub fn merge_outputs(
    sources: &[std::path::PathBuf],
    dest: &std::path::Path,
) -> Result<pipeline::MergeSummary> {
    Ok(pipeline::merge_files(sources, dest, false)?)
}
