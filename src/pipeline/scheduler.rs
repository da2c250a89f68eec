//! Region partitioning and worker process orchestration.
//!
//! The orchestrator resolves samples and regions, writes job files into a
//! cache directory, re-invokes its own executable once per region share
//! (`basevar worker ...`), polls the children until they all exit, and only
//! then merges their part files into the final outputs.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::genomics::vcf::{write_coverage_header, write_vcf_header};
use crate::genomics::{
    default_min_af, load_alignment_list, resolve_samples, resolve_target_regions,
    write_region_file, FastaReference, GenomicRegion,
};
use crate::pipeline::config::{write_sample_file, BaseTypeRunnerConfig, ConfigError};
use crate::pipeline::merge::{MergeError, OutputMerger};
use crate::pipeline::worker::WorkerArgs;

/// Interval between liveness checks of worker processes.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Errors raised while orchestrating workers.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The run is misconfigured.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Filesystem failure in the cache directory or outputs.
    #[error("failed to access {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A worker could not be started.
    #[error("failed to launch worker {index}: {source}")]
    Spawn {
        /// Worker index.
        index: usize,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A worker exited unsuccessfully.
    #[error("worker {index} failed ({status})")]
    WorkerFailed {
        /// Worker index.
        index: usize,
        /// Exit status as reported by the OS.
        status: String,
    },

    /// The operator interrupted the run.
    #[error("interrupted; all workers terminated")]
    Interrupted,

    /// Part files could not be merged.
    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// Split `regions` into `workers` position-ordered shares.
///
/// With fewer regions than workers, every region is cut into up to
/// `workers` near-equal pieces and the pieces are dealt out starting where
/// the previous region's pieces stopped. Otherwise whole regions are dealt
/// round-robin. Shares may be empty only when the total span is shorter
/// than `workers`.
pub fn partition_regions(regions: &[GenomicRegion], workers: usize) -> Vec<Vec<GenomicRegion>> {
    let workers = workers.max(1);
    let mut shares = vec![Vec::new(); workers];
    if regions.len() < workers {
        let mut offset = 0;
        for region in regions {
            let pieces = region.split(workers);
            let count = pieces.len();
            for (j, piece) in pieces.into_iter().enumerate() {
                shares[(offset + j) % workers].push(piece);
            }
            offset += count;
        }
    } else {
        for (idx, region) in regions.iter().enumerate() {
            shares[idx % workers].push(region.clone());
        }
    }
    shares
}

/// A set of running worker processes.
#[derive(Debug)]
pub struct WorkerPool {
    children: Vec<(usize, Child)>,
    poll_interval: Duration,
}

impl WorkerPool {
    /// Start one process per `(index, command)`.
    ///
    /// If any spawn fails, the processes already started are killed.
    pub fn spawn(commands: Vec<(usize, Command)>) -> Result<Self, SchedulerError> {
        let mut pool = Self {
            children: Vec::with_capacity(commands.len()),
            poll_interval: POLL_INTERVAL,
        };
        for (index, mut command) in commands {
            match command.spawn() {
                Ok(child) => {
                    debug!(worker = index, pid = child.id(), "worker launched");
                    pool.children.push((index, child));
                }
                Err(source) => {
                    pool.kill_all();
                    return Err(SchedulerError::Spawn { index, source });
                }
            }
        }
        Ok(pool)
    }

    /// Override the liveness polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Number of processes still tracked.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether no process is tracked.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Block until every worker has exited successfully.
    ///
    /// When `cancel` is raised, or any worker exits unsuccessfully, all
    /// remaining workers are killed and the corresponding error returned.
    pub fn wait(mut self, cancel: &AtomicBool) -> Result<(), SchedulerError> {
        while !self.children.is_empty() {
            if cancel.load(Ordering::SeqCst) {
                warn!(live = self.children.len(), "interrupt received, terminating workers");
                self.kill_all();
                return Err(SchedulerError::Interrupted);
            }

            let mut failed: Option<(usize, ExitStatus)> = None;
            let mut idx = 0;
            while idx < self.children.len() {
                let (index, child) = &mut self.children[idx];
                match child.try_wait() {
                    Ok(Some(status)) => {
                        let index = *index;
                        self.children.swap_remove(idx);
                        if status.success() {
                            debug!(worker = index, "worker finished");
                        } else {
                            failed = Some((index, status));
                            break;
                        }
                    }
                    Ok(None) => idx += 1,
                    Err(source) => {
                        let index = *index;
                        self.kill_all();
                        return Err(SchedulerError::Spawn { index, source });
                    }
                }
            }

            if let Some((index, status)) = failed {
                error!(worker = index, %status, "worker failed, terminating the rest");
                self.kill_all();
                return Err(SchedulerError::WorkerFailed {
                    index,
                    status: status.to_string(),
                });
            }
            if !self.children.is_empty() {
                thread::sleep(self.poll_interval);
            }
        }
        Ok(())
    }

    fn kill_all(&mut self) {
        for (index, mut child) in self.children.drain(..) {
            if let Err(err) = child.kill() {
                debug!(worker = index, %err, "kill failed; worker already gone");
            }
            let _ = child.wait();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.kill_all();
    }
}

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Samples called.
    pub samples: usize,
    /// Target regions after merging.
    pub regions: usize,
    /// Worker processes launched.
    pub workers: usize,
    /// Coverage lines in the final output.
    pub positions: usize,
    /// VCF lines in the final output.
    pub variants: usize,
}

/// The `basetype` command: orchestrates workers and merges their output.
#[derive(Debug)]
pub struct BaseTypeRunner {
    config: BaseTypeRunnerConfig,
    program: PathBuf,
    cancel: Arc<AtomicBool>,
}

impl BaseTypeRunner {
    /// Runner that launches `program worker ...` for every share.
    pub fn new(config: BaseTypeRunnerConfig, program: PathBuf, cancel: Arc<AtomicBool>) -> Self {
        Self {
            config,
            program,
            cancel,
        }
    }

    /// Resolve inputs, fan out, fan in, merge.
    pub fn run(&self) -> Result<RunSummary, SchedulerError> {
        let config = &self.config;
        config.validate()?;

        let alignments = load_alignment_list(&config.alignments, config.alignment_list.as_deref())
            .map_err(ConfigError::from)?;
        if alignments.is_empty() {
            return Err(ConfigError::NoAlignments.into());
        }
        let samples = resolve_samples(alignments, config.filename_has_samplename)
            .map_err(ConfigError::from)?;

        let reference = FastaReference::open(&config.reference).map_err(ConfigError::from)?;
        let contigs = reference.contigs().map_err(ConfigError::from)?;
        let regions = resolve_target_regions(
            config.positions.as_deref(),
            config.regions.as_deref(),
            &contigs,
        )
        .map_err(ConfigError::from)?;
        if let Some(pop_group) = &config.pop_group {
            warn!(file = %pop_group.display(), "population groups are accepted but not used");
        }

        let min_af = config.min_af.unwrap_or_else(|| default_min_af(samples.len()));
        info!(
            samples = samples.len(),
            regions = regions.len(),
            workers = config.workers,
            min_af,
            "starting basetype"
        );

        let cache_dir = config.cache_dir();
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| SchedulerError::Io { path, source }
        };
        fs::create_dir_all(&cache_dir).map_err(io_err(cache_dir.as_path()))?;

        let sample_file = cache_dir.join("samples.tsv");
        write_sample_file(&sample_file, &samples)?;
        let sample_ids: Vec<String> = samples.iter().map(|s| s.id.clone()).collect();
        let cvg_header = cache_dir.join("header.cvg.tsv");
        write_header(&cvg_header, |w| write_coverage_header(w))?;
        let vcf_header = cache_dir.join("header.vcf");
        if config.output_vcf.is_some() {
            write_header(&vcf_header, |w| write_vcf_header(w, &contigs, &sample_ids))?;
        }

        let shares = partition_regions(&regions, config.workers);
        let mut commands = Vec::new();
        let mut cvg_parts = vec![cvg_header];
        let mut vcf_parts = vec![vcf_header];
        for (index, share) in shares.iter().enumerate() {
            if share.is_empty() {
                debug!(worker = index, "empty share, worker not launched");
                continue;
            }
            let job_file = cache_dir.join(format!("job_{index}.regions.tsv"));
            write_region_file(&job_file, share).map_err(io_err(job_file.as_path()))?;

            let args = WorkerArgs {
                index,
                reference: config.reference.clone(),
                samples: sample_file.clone(),
                regions: job_file,
                cache_dir: cache_dir.clone(),
                output_cvg: cache_dir.join(format!("part.{index}.cvg.tsv")),
                output_vcf: config
                    .output_vcf
                    .as_ref()
                    .map(|_| cache_dir.join(format!("part.{index}.vcf"))),
                mapq: config.min_mapq,
                batch_count: config.batch_count,
                min_af,
                read_selection: config.read_selection,
                smart_rerun: config.smart_rerun,
            };
            cvg_parts.push(args.output_cvg.clone());
            if let Some(vcf) = &args.output_vcf {
                vcf_parts.push(vcf.clone());
            }

            let mut command = Command::new(&self.program);
            command.arg("worker").args(args.to_cli_args());
            commands.push((index, command));
        }

        let workers = commands.len();
        WorkerPool::spawn(commands)?.wait(&self.cancel)?;
        info!(workers, "all workers finished, merging outputs");

        let merger = OutputMerger::with_contigs(&contigs);
        let positions = merger.merge(&cvg_parts, &config.output_cvg, true)?.records;
        let variants = match &config.output_vcf {
            Some(output_vcf) => merger.merge(&vcf_parts, output_vcf, true)?.records,
            None => 0,
        };

        fs::remove_dir_all(&cache_dir).map_err(io_err(cache_dir.as_path()))?;
        info!(positions, variants, "basetype finished");
        Ok(RunSummary {
            samples: samples.len(),
            regions: regions.len(),
            workers,
            positions,
            variants,
        })
    }
}

fn write_header<F>(path: &Path, write: F) -> Result<(), SchedulerError>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let result = File::create(path).and_then(|file| {
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        std::io::Write::flush(&mut writer)
    });
    result.map_err(|source| SchedulerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(chrom: &str, start: u32, end: u32) -> GenomicRegion {
        GenomicRegion::new(chrom, start, end).unwrap()
    }

    #[test]
    fn single_region_is_split_across_workers() {
        let shares = partition_regions(&[region("chr1", 1, 100)], 4);
        assert_eq!(shares.len(), 4);
        let lens: Vec<u32> = shares.iter().map(|s| s[0].len()).collect();
        assert_eq!(lens, vec![25, 25, 25, 25]);
        assert_eq!(shares[3][0].end, 100);
    }

    #[test]
    fn pieces_rotate_across_regions() {
        let shares = partition_regions(&[region("chr1", 1, 2), region("chr2", 1, 30)], 3);
        // chr1 yields 2 pieces (workers 0, 1), chr2 continues at worker 2
        assert_eq!(shares[0][0], region("chr1", 1, 1));
        assert_eq!(shares[1][0], region("chr1", 2, 2));
        assert_eq!(shares[2][0], region("chr2", 1, 10));
        assert_eq!(shares[0][1], region("chr2", 11, 20));
        assert_eq!(shares[1][1], region("chr2", 21, 30));
    }

    #[test]
    fn many_regions_go_round_robin() {
        let regions: Vec<_> = (1..=5).map(|i| region("chr1", i * 10, i * 10 + 5)).collect();
        let shares = partition_regions(&regions, 2);
        assert_eq!(shares[0], vec![regions[0].clone(), regions[2].clone(), regions[4].clone()]);
        assert_eq!(shares[1], vec![regions[1].clone(), regions[3].clone()]);
    }
}
