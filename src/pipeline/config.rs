//! Run configuration and the files the orchestrator hands to workers.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::genomics::{
    AlignmentError, ReadSelectionPolicy, ReferenceError, RegionError, SampleSource,
    DEFAULT_BATCH_WIDTH, DEFAULT_MIN_MAPQ,
};

/// Problems detected before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reference FASTA missing.
    #[error("reference fasta {0} does not exist")]
    MissingReference(PathBuf),

    /// Neither `-I` nor `-L` produced an alignment file.
    #[error("no alignment files given (use -I and/or -L)")]
    NoAlignments,

    /// A numeric option is out of range.
    #[error("invalid value for {option}: {reason}")]
    InvalidOption {
        /// Option name.
        option: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The coverage output path has no usable file name.
    #[error("output path {0} has no file name")]
    BadOutputPath(PathBuf),

    /// Malformed sample list handed to a worker.
    #[error("sample list {path}, line {line}: expected 'id<TAB>path'")]
    SampleList {
        /// File involved.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
    },

    /// Filesystem failure while preparing the run.
    #[error("failed to access {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Region arguments could not be resolved.
    #[error(transparent)]
    Region(#[from] RegionError),

    /// Alignment list or headers could not be read.
    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    /// Reference could not be opened.
    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

/// Everything the `basetype` command needs.
#[derive(Debug, Clone)]
pub struct BaseTypeRunnerConfig {
    /// Indexed reference FASTA.
    pub reference: PathBuf,
    /// Alignment files given one by one.
    pub alignments: Vec<PathBuf>,
    /// File listing alignment files.
    pub alignment_list: Option<PathBuf>,
    /// `chr pos` / `chr start end` position file.
    pub positions: Option<PathBuf>,
    /// Comma-separated regions or a region file.
    pub regions: Option<String>,
    /// Population group file; accepted but not used by the caller.
    pub pop_group: Option<PathBuf>,
    /// Minimum mapping quality.
    pub min_mapq: u8,
    /// Samples per batch file.
    pub batch_count: usize,
    /// Worker processes.
    pub workers: usize,
    /// Minimum allele frequency; `None` derives it from the sample count.
    pub min_af: Option<f64>,
    /// Coverage output.
    pub output_cvg: PathBuf,
    /// VCF output; `None` runs in coverage-only mode.
    pub output_vcf: Option<PathBuf>,
    /// Take sample ids from file names instead of `@RG SM`.
    pub filename_has_samplename: bool,
    /// Reuse complete batch files from an earlier run.
    pub smart_rerun: bool,
    /// Which read speaks for a sample at a position.
    pub read_selection: ReadSelectionPolicy,
}

impl BaseTypeRunnerConfig {
    /// Configuration with defaults for everything but the required paths.
    pub fn new(reference: impl Into<PathBuf>, output_cvg: impl Into<PathBuf>) -> Self {
        Self {
            reference: reference.into(),
            alignments: Vec::new(),
            alignment_list: None,
            positions: None,
            regions: None,
            pop_group: None,
            min_mapq: DEFAULT_MIN_MAPQ,
            batch_count: DEFAULT_BATCH_WIDTH,
            workers: 1,
            min_af: None,
            output_cvg: output_cvg.into(),
            output_vcf: None,
            filename_has_samplename: false,
            smart_rerun: false,
            read_selection: ReadSelectionPolicy::default(),
        }
    }

    /// Checks that need no I/O beyond existence tests.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.reference.is_file() {
            return Err(ConfigError::MissingReference(self.reference.clone()));
        }
        if self.alignments.is_empty() && self.alignment_list.is_none() {
            return Err(ConfigError::NoAlignments);
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidOption {
                option: "--nCPU",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.batch_count == 0 {
            return Err(ConfigError::InvalidOption {
                option: "--batch-count",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(min_af) = self.min_af {
            if !(0.0..=1.0).contains(&min_af) {
                return Err(ConfigError::InvalidOption {
                    option: "--min-af",
                    reason: format!("{min_af} is not within [0, 1]"),
                });
            }
        }
        if self.output_cvg.file_name().is_none() {
            return Err(ConfigError::BadOutputPath(self.output_cvg.clone()));
        }
        Ok(())
    }

    /// Cache directory next to the coverage output.
    pub fn cache_dir(&self) -> PathBuf {
        cache_dir_for(&self.output_cvg)
    }
}

/// `<parent>/basevar_cache.<coverage file name>`.
///
/// The name depends only on the output path, so a rerun finds the batch
/// files of the previous attempt.
pub fn cache_dir_for(output_cvg: &Path) -> PathBuf {
    let name = output_cvg
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let parent = output_cvg
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parent.join(format!("basevar_cache.{name}"))
}

/// Write `id<TAB>path` rows.
pub fn write_sample_file(path: &Path, samples: &[SampleSource]) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    for sample in samples {
        writeln!(writer, "{}\t{}", sample.id, sample.path.display()).map_err(io_err)?;
    }
    writer.flush().map_err(io_err)
}

/// Read rows written by [`write_sample_file`].
pub fn load_sample_file(path: &Path) -> Result<Vec<SampleSource>, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut samples = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err)?;
        if line.is_empty() {
            continue;
        }
        let (id, sample_path) = line.split_once('\t').ok_or(ConfigError::SampleList {
            path: path.to_path_buf(),
            line: idx + 1,
        })?;
        samples.push(SampleSource {
            id: id.to_string(),
            path: PathBuf::from(sample_path),
        });
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_dir_sits_next_to_the_output() {
        assert_eq!(
            cache_dir_for(Path::new("/data/run/out.cvg.tsv")),
            PathBuf::from("/data/run/basevar_cache.out.cvg.tsv")
        );
        assert_eq!(
            cache_dir_for(Path::new("out.cvg")),
            PathBuf::from("./basevar_cache.out.cvg")
        );
    }

    #[test]
    fn sample_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.tsv");
        let samples = vec![
            SampleSource {
                id: "NA12878".to_string(),
                path: PathBuf::from("/bam/NA12878.bam"),
            },
            SampleSource {
                id: "HG00096".to_string(),
                path: PathBuf::from("/bam/HG00096.cram"),
            },
        ];
        write_sample_file(&path, &samples).unwrap();
        assert_eq!(load_sample_file(&path).unwrap(), samples);
    }

    #[test]
    fn missing_reference_is_a_config_error() {
        let mut config = BaseTypeRunnerConfig::new("/definitely/missing.fa", "out.cvg");
        config.alignments.push(PathBuf::from("a.bam"));
        assert!(matches!(config.validate(), Err(ConfigError::MissingReference(_))));
    }
}
