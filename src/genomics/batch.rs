//! Batch records: the intermediate, sample-wide pileup text format.
//!
//! Every sample contributes a tab-separated `(base, quality_char, strand)`
//! triple per position, where `quality_char = chr(quality + 33)`. A sample
//! with no alignment source for the region is written as `0 * *`, which is
//! distinct from `N ! .` (sequenced, but no informative read).
//!
//! A batch file holds one sample group (at most `width` samples) over the
//! regions a worker handles on one chromosome. `##Region` is their overall
//! span; the digest covers each region:
//!
//! ```text
//! ##fileformat=BaseVarBatchFile_v1.0
//! ##SampleIDs=s1,s2
//! ##SampleRange=0-2
//! ##Region=chr1:100-200
//! ##ConfigDigest=<blake3>
//! #CHROM  POS  REF  s1  s2
//! chr1  100  A  A  ?  +  0  *  *
//! ...
//! ##EOF
//! ```
//!
//! The trailing `##EOF` marks a finished file; smart rerun only reuses
//! finished files whose header matches the current configuration.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::genomics::{GenomicRegion, PileupObservation, SampleBase, Strand};

const FORMAT_LINE: &str = "##fileformat=BaseVarBatchFile_v1.0";
const EOF_MARKER: &str = "##EOF";
const MAX_QUALITY: u8 = 93;

/// Default number of samples per batch file.
pub const DEFAULT_BATCH_WIDTH: usize = 500;

/// Errors raised while writing, reading or merging batch files.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Filesystem failure.
    #[error("batch file {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A line does not follow the batch format.
    #[error("batch file {path}, line {line}: {reason}")]
    Format {
        /// File involved.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        reason: String,
    },

    /// An existing batch file was produced by a different configuration.
    #[error("smart rerun: {path} does not match the current run ({reason}); remove it or rerun without --smart-rerun")]
    RerunMismatch {
        /// File involved.
        path: PathBuf,
        /// Which header field differs.
        reason: String,
    },

    /// Two batch buffers claimed the same sample slot.
    #[error("merge buffer conflict: sample slot {slot} written twice")]
    SlotConflict {
        /// Global sample index.
        slot: usize,
    },

    /// Group files disagree on the position of a line.
    #[error("batch files out of step: {path} has {found}, expected {expected}")]
    Misaligned {
        /// File that disagrees.
        path: PathBuf,
        /// `chrom:pos` the other files are at.
        expected: String,
        /// `chrom:pos` (or `EOF`) found.
        found: String,
    },

    /// File ended without the `##EOF` marker.
    #[error("batch file {0} is incomplete")]
    Incomplete(PathBuf),
}

/// One sample's triple in a batch record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEntry {
    /// The sample has no alignment source for this region (`0 * *`).
    NoSource,
    /// What the sample's pileup showed.
    Observed {
        /// Base, `N` or indel allele.
        base: SampleBase,
        /// Phred base quality.
        quality: u8,
        /// Read strand.
        strand: Strand,
    },
}

impl BatchEntry {
    /// Project a pileup observation to its triple.
    pub fn from_observation(observation: &PileupObservation) -> Self {
        BatchEntry::Observed {
            base: observation.base.clone(),
            quality: observation.quality.min(MAX_QUALITY),
            strand: observation.strand,
        }
    }

    /// Base used for calling; missing sources count as `N`.
    pub fn base(&self) -> SampleBase {
        match self {
            BatchEntry::NoSource => SampleBase::UNKNOWN,
            BatchEntry::Observed { base, .. } => base.clone(),
        }
    }

    /// Phred quality; 0 for missing sources.
    pub fn quality(&self) -> u8 {
        match self {
            BatchEntry::NoSource => 0,
            BatchEntry::Observed { quality, .. } => *quality,
        }
    }

    /// Strand; unknown for missing sources.
    pub fn strand(&self) -> Strand {
        match self {
            BatchEntry::NoSource => Strand::Unknown,
            BatchEntry::Observed { strand, .. } => *strand,
        }
    }

    fn write_to(&self, out: &mut String) {
        match self {
            BatchEntry::NoSource => out.push_str("0\t*\t*"),
            BatchEntry::Observed {
                base,
                quality,
                strand,
            } => {
                out.push_str(&base.to_string());
                out.push('\t');
                out.push(((*quality).min(MAX_QUALITY) + 33) as char);
                out.push('\t');
                out.push(strand.symbol());
            }
        }
    }

    /// Parse one triple.
    pub fn parse(base: &str, quality: &str, strand: &str) -> Option<Self> {
        if base == "0" {
            return Some(BatchEntry::NoSource);
        }
        let base = SampleBase::parse(base)?;
        let quality = match quality.as_bytes() {
            [q] if (33..=33 + MAX_QUALITY).contains(q) => q - 33,
            _ => return None,
        };
        let mut chars = strand.chars();
        let strand = match (chars.next(), chars.next()) {
            (Some(symbol), None) => Strand::from_symbol(symbol)?,
            _ => return None,
        };
        Some(BatchEntry::Observed {
            base,
            quality,
            strand,
        })
    }
}

/// Tab-joined triples for a run of samples.
pub fn encode_entries(entries: &[BatchEntry]) -> String {
    let mut out = String::with_capacity(entries.len() * 6);
    for (idx, entry) in entries.iter().enumerate() {
        if idx > 0 {
            out.push('\t');
        }
        entry.write_to(&mut out);
    }
    out
}

/// Parse tab-separated fields back into triples.
pub fn decode_entries(fields: &[&str]) -> Result<Vec<BatchEntry>, String> {
    if fields.len() % 3 != 0 {
        return Err(format!("{} sample fields is not a multiple of 3", fields.len()));
    }
    fields
        .chunks_exact(3)
        .map(|triple| {
            BatchEntry::parse(triple[0], triple[1], triple[2])
                .ok_or_else(|| format!("malformed sample triple '{}'", triple.join(" ")))
        })
        .collect()
}

/// Splits the sample set into groups of at most `width` samples.
#[derive(Debug, Clone, Copy)]
pub struct BatchEncoder {
    width: usize,
}

impl BatchEncoder {
    /// Encoder with the given group width (at least 1).
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    /// Samples per group.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Global sample index ranges of the `ceil(n / width)` groups.
    pub fn groups(&self, sample_count: usize) -> Vec<Range<usize>> {
        (0..sample_count)
            .step_by(self.width)
            .map(|start| start..(start + self.width).min(sample_count))
            .collect()
    }

    /// One encoded line fragment per sample group.
    pub fn encode(&self, entries: &[BatchEntry]) -> Vec<String> {
        self.groups(entries.len())
            .into_iter()
            .map(|range| encode_entries(&entries[range]))
            .collect()
    }
}

/// Header of a batch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHeader {
    /// Sample ids in column order.
    pub samples: Vec<String>,
    /// Global sample indices covered by this file.
    pub sample_range: Range<usize>,
    /// Span from the first to the last region the file covers.
    pub region: GenomicRegion,
    /// Digest of everything else that shapes the records.
    pub digest: String,
}

impl BatchHeader {
    fn render(&self) -> String {
        format!(
            "{FORMAT_LINE}\n##SampleIDs={}\n##SampleRange={}-{}\n##Region={}\n##ConfigDigest={}\n#CHROM\tPOS\tREF\t{}\n",
            self.samples.join(","),
            self.sample_range.start,
            self.sample_range.end,
            self.region,
            self.digest,
            self.samples.join("\t"),
        )
    }

    /// Compare against the header expected by the current run.
    fn mismatch(&self, expected: &BatchHeader) -> Option<String> {
        if self.samples != expected.samples || self.sample_range != expected.sample_range {
            Some("sample set differs".to_string())
        } else if self.region != expected.region {
            Some(format!("region {} != {}", self.region, expected.region))
        } else if self.digest != expected.digest {
            Some("configuration digest differs".to_string())
        } else {
            None
        }
    }
}

/// Digest of everything that shapes batch contents: the samples, every
/// region the file walks, and the read filters.
pub fn config_digest(
    samples: &[String],
    regions: &[GenomicRegion],
    min_mapq: u8,
    policy: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    for sample in samples {
        hasher.update(sample.as_bytes());
        hasher.update(b"\n");
    }
    for region in regions {
        hasher.update(region.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(&[min_mapq]);
    hasher.update(policy.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Writes one batch file.
#[derive(Debug)]
pub struct BatchWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    line: String,
}

impl BatchWriter {
    /// Create the file and write its header.
    pub fn create(path: &Path, header: &BatchHeader) -> Result<Self, BatchError> {
        let io_err = |source| BatchError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        writer.write_all(header.render().as_bytes()).map_err(io_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            line: String::new(),
        })
    }

    /// Append the record for one position.
    pub fn write_record(
        &mut self,
        chrom: &str,
        position: u32,
        ref_base: u8,
        entries: &[BatchEntry],
    ) -> Result<(), BatchError> {
        self.line.clear();
        self.line.push_str(chrom);
        self.line.push('\t');
        self.line.push_str(&position.to_string());
        self.line.push('\t');
        self.line.push(ref_base as char);
        self.line.push('\t');
        self.line.push_str(&encode_entries(entries));
        self.line.push('\n');
        self.writer
            .write_all(self.line.as_bytes())
            .map_err(|source| BatchError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Write the completion marker and flush.
    pub fn finish(mut self) -> Result<PathBuf, BatchError> {
        let io_err = |source| BatchError::Io {
            path: self.path.clone(),
            source,
        };
        writeln!(self.writer, "{EOF_MARKER}").map_err(io_err)?;
        self.writer.flush().map_err(io_err)?;
        Ok(self.path)
    }
}

/// One decoded batch line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    /// Chromosome.
    pub chrom: String,
    /// 1-based position.
    pub position: u32,
    /// Reference base.
    pub ref_base: u8,
    /// Per-sample triples.
    pub entries: Vec<BatchEntry>,
}

/// Streams records from a finished batch file.
#[derive(Debug)]
pub struct BatchReader {
    path: PathBuf,
    header: BatchHeader,
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
    finished: bool,
}

impl BatchReader {
    /// Open a batch file and parse its header.
    pub fn open(path: &Path) -> Result<Self, BatchError> {
        let file = File::open(path).map_err(|source| BatchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut lines = BufReader::new(file).lines();
        let mut line_no = 0;

        let mut samples = None;
        let mut sample_range = None;
        let mut region = None;
        let mut digest = None;
        loop {
            let Some(line) = lines.next() else {
                return Err(BatchError::Incomplete(path.to_path_buf()));
            };
            line_no += 1;
            let line = line.map_err(|source| BatchError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let format_err = |reason: String| BatchError::Format {
                path: path.to_path_buf(),
                line: line_no,
                reason,
            };

            if line.starts_with("#CHROM") {
                break;
            }
            if line_no == 1 && line != FORMAT_LINE {
                return Err(format_err(format!("unexpected format line '{line}'")));
            }
            if let Some(value) = line.strip_prefix("##SampleIDs=") {
                samples = Some(
                    value
                        .split(',')
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .collect::<Vec<_>>(),
                );
            } else if let Some(value) = line.strip_prefix("##SampleRange=") {
                let range = value
                    .split_once('-')
                    .and_then(|(start, end)| {
                        Some(start.parse::<usize>().ok()?..end.parse::<usize>().ok()?)
                    })
                    .ok_or_else(|| format_err(format!("bad sample range '{value}'")))?;
                sample_range = Some(range);
            } else if let Some(value) = line.strip_prefix("##Region=") {
                region = Some(
                    value
                        .parse::<GenomicRegion>()
                        .map_err(|err| format_err(err.to_string()))?,
                );
            } else if let Some(value) = line.strip_prefix("##ConfigDigest=") {
                digest = Some(value.to_string());
            }
        }

        let missing = |field: &str| BatchError::Format {
            path: path.to_path_buf(),
            line: line_no,
            reason: format!("header lacks {field}"),
        };
        let header = BatchHeader {
            samples: samples.ok_or_else(|| missing("##SampleIDs"))?,
            sample_range: sample_range.ok_or_else(|| missing("##SampleRange"))?,
            region: region.ok_or_else(|| missing("##Region"))?,
            digest: digest.ok_or_else(|| missing("##ConfigDigest"))?,
        };

        Ok(Self {
            path: path.to_path_buf(),
            header,
            lines,
            line_no,
            finished: false,
        })
    }

    /// Parsed header.
    pub fn header(&self) -> &BatchHeader {
        &self.header
    }

    /// File being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next record, `None` at the `##EOF` marker.
    pub fn next_record(&mut self) -> Result<Option<BatchRecord>, BatchError> {
        if self.finished {
            return Ok(None);
        }
        let Some(line) = self.lines.next() else {
            return Err(BatchError::Incomplete(self.path.clone()));
        };
        self.line_no += 1;
        let line = line.map_err(|source| BatchError::Io {
            path: self.path.clone(),
            source,
        })?;
        if line == EOF_MARKER {
            self.finished = true;
            return Ok(None);
        }

        let format_err = |reason: String| BatchError::Format {
            path: self.path.clone(),
            line: self.line_no,
            reason,
        };
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(format_err("fewer than 3 columns".to_string()));
        }
        let position = fields[1]
            .parse()
            .map_err(|_| format_err(format!("bad position '{}'", fields[1])))?;
        let ref_base = match fields[2].as_bytes() {
            [base] => *base,
            _ => return Err(format_err(format!("bad reference base '{}'", fields[2]))),
        };
        let entries = decode_entries(&fields[3..]).map_err(format_err)?;
        if entries.len() != self.header.samples.len() {
            return Err(format_err(format!(
                "{} samples on line, header lists {}",
                entries.len(),
                self.header.samples.len()
            )));
        }
        Ok(Some(BatchRecord {
            chrom: fields[0].to_string(),
            position,
            ref_base,
            entries,
        }))
    }
}

/// State of a batch file left over from an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerunStatus {
    /// No file; it must be generated.
    Missing,
    /// File matches the current run but was not finished.
    Incomplete,
    /// File matches and is finished; reuse it.
    Complete,
}

fn has_eof_marker(path: &Path) -> Result<bool, BatchError> {
    let io_err = |source| BatchError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let tail_len = EOF_MARKER.len() as u64 + 1;
    let len = file.metadata().map_err(io_err)?.len();
    if len < tail_len {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - tail_len)).map_err(io_err)?;
    let mut tail = String::new();
    file.read_to_string(&mut tail).map_err(io_err)?;
    Ok(tail.trim_end_matches('\n') == EOF_MARKER)
}

/// Check an existing batch file against the header the current run expects.
///
/// A file written for other samples, another region or other settings is a
/// fatal [`BatchError::RerunMismatch`], never silently reused.
pub fn inspect_existing(path: &Path, expected: &BatchHeader) -> Result<RerunStatus, BatchError> {
    if !path.exists() {
        return Ok(RerunStatus::Missing);
    }
    let header = match BatchReader::open(path) {
        Ok(reader) => reader.header,
        // header never finished writing
        Err(BatchError::Incomplete(_)) => return Ok(RerunStatus::Incomplete),
        Err(err) => return Err(err),
    };
    if let Some(reason) = header.mismatch(expected) {
        return Err(BatchError::RerunMismatch {
            path: path.to_path_buf(),
            reason,
        });
    }
    if has_eof_marker(path)? {
        Ok(RerunStatus::Complete)
    } else {
        Ok(RerunStatus::Incomplete)
    }
}

/// Per-position buffer with one slot per sample across all groups.
#[derive(Debug, Clone)]
pub struct SampleSlots {
    slots: Vec<Option<BatchEntry>>,
}

impl SampleSlots {
    /// Empty buffer for `sample_count` samples.
    pub fn new(sample_count: usize) -> Self {
        Self {
            slots: vec![None; sample_count],
        }
    }

    /// Clear every slot.
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    /// Place `entries` starting at global index `offset`.
    pub fn fill(&mut self, offset: usize, entries: Vec<BatchEntry>) -> Result<(), BatchError> {
        for (idx, entry) in entries.into_iter().enumerate() {
            let slot_idx = offset + idx;
            let slot = self
                .slots
                .get_mut(slot_idx)
                .ok_or(BatchError::SlotConflict { slot: slot_idx })?;
            if slot.is_some() {
                return Err(BatchError::SlotConflict { slot: slot_idx });
            }
            *slot = Some(entry);
        }
        Ok(())
    }

    /// Take the filled row; unfilled slots become [`BatchEntry::NoSource`].
    pub fn take(&mut self) -> Vec<BatchEntry> {
        self.slots
            .iter_mut()
            .map(|slot| slot.take().unwrap_or(BatchEntry::NoSource))
            .collect()
    }
}

/// Reads a share's group files in lockstep and joins them column-wise.
#[derive(Debug)]
pub struct BatchMerger {
    readers: Vec<BatchReader>,
    slots: SampleSlots,
}

impl BatchMerger {
    /// Open all group files of one chromosome share.
    pub fn open(paths: &[PathBuf], sample_count: usize) -> Result<Self, BatchError> {
        let readers = paths
            .iter()
            .map(|path| BatchReader::open(path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            readers,
            slots: SampleSlots::new(sample_count),
        })
    }

    /// Next sample-wide record, `None` when every file is finished.
    ///
    /// The first file sets the expected position; every other file must be
    /// at the same `chrom:pos` (or finished together with it).
    pub fn next_record(&mut self) -> Result<Option<BatchRecord>, BatchError> {
        self.slots.reset();
        let Some((first, rest)) = self.readers.split_first_mut() else {
            return Ok(None);
        };

        let lead = first.next_record()?;
        let expected = lead
            .as_ref()
            .map(|r| format!("{}:{}", r.chrom, r.position))
            .unwrap_or_else(|| "EOF".to_string());
        if let Some(record) = &lead {
            self.slots
                .fill(first.header.sample_range.start, record.entries.clone())?;
        }

        for reader in rest {
            let record = reader.next_record()?;
            match (&lead, record) {
                (Some(lead), Some(record))
                    if lead.chrom == record.chrom && lead.position == record.position =>
                {
                    self.slots
                        .fill(reader.header.sample_range.start, record.entries)?;
                }
                (None, None) => {}
                (_, record) => {
                    return Err(BatchError::Misaligned {
                        path: reader.path.clone(),
                        expected,
                        found: record
                            .map(|r| format!("{}:{}", r.chrom, r.position))
                            .unwrap_or_else(|| "EOF".to_string()),
                    });
                }
            }
        }

        Ok(lead.map(|lead| BatchRecord {
            chrom: lead.chrom,
            position: lead.position,
            ref_base: lead.ref_base,
            entries: self.slots.take(),
        }))
    }
}
