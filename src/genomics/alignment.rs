//! Alignment sources: anything that can stream pileup columns for one sample.
//!
//! The caller only needs the [`PileupSource`] capability. Production runs
//! read BAM/CRAM through htslib ([`HtsPileupSource`]); tests and small
//! in-memory inputs use [`ReadPileupSource`], which builds the same columns
//! directly from [`AlignedRead`]s.

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rust_htslib::bam::{self, pileup::Indel, record::Cigar, Read};
use thiserror::Error;
use tracing::{debug, info};

use crate::genomics::{AlignedRead, CigarOp, CigarOpKind, GenomicRegion, Strand};

/// Upper bound on reads htslib keeps per pileup column.
pub const MAX_PILEUP_DEPTH: u32 = 100_000;

/// Errors raised while opening or streaming alignment files.
#[derive(Debug, Error)]
pub enum AlignmentError {
    /// Alignment file does not exist.
    #[error("alignment file {0} does not exist")]
    Missing(PathBuf),

    /// Header lacks an `@RG` line with an `SM` tag.
    #[error("{0}: missing @RG/SM in the header")]
    MissingReadGroup(PathBuf),

    /// I/O failure while reading a file list.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Error reported by htslib.
    #[error("htslib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),
}

/// One input alignment file and the sample it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSource {
    /// Sample identifier.
    pub id: String,
    /// BAM/CRAM path.
    pub path: PathBuf,
}

/// Indel following the current base of a read, as reported by the pileup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndelHint {
    /// No indel after this base.
    None,
    /// Insertion of the given length follows.
    Insertion(u32),
    /// Deletion of the given length follows.
    Deletion(u32),
}

/// One read's contribution to a pileup column.
///
/// Only the fields read selection looks at are copied per column. The full
/// read is kept only when an indel follows this base, since spelling out
/// the allele needs its CIGAR and sequence.
#[derive(Debug, Clone)]
pub struct PileupEntry {
    /// Mapping quality of the read.
    pub mapq: u8,
    /// Strand of the read.
    pub strand: Strand,
    /// Query offset of the base aligned to this column, if any.
    pub qpos: Option<usize>,
    /// Query base at `qpos`.
    pub base: Option<u8>,
    /// Base quality at `qpos`.
    pub quality: Option<u8>,
    /// Indel following this base.
    pub indel: IndelHint,
    /// The read has a deletion over this column.
    pub is_del: bool,
    /// The read skips this column (`N` operation).
    pub is_refskip: bool,
    /// The read itself, present when `indel` is not [`IndelHint::None`].
    pub read: Option<Arc<AlignedRead>>,
}

impl PileupEntry {
    /// Entry for `read` at query offset `qpos`.
    pub fn from_read(
        read: &Arc<AlignedRead>,
        qpos: Option<usize>,
        indel: IndelHint,
        is_del: bool,
        is_refskip: bool,
    ) -> Self {
        Self {
            mapq: read.mapq,
            strand: read.strand(),
            qpos,
            base: qpos.and_then(|qpos| read.base_at(qpos)),
            quality: qpos.and_then(|qpos| read.quality_at(qpos)),
            indel,
            is_del,
            is_refskip,
            read: (indel != IndelHint::None).then(|| Arc::clone(read)),
        }
    }
}

/// All reads covering one 0-based reference position, in source order.
#[derive(Debug, Clone)]
pub struct PileupColumn {
    /// 0-based reference coordinate.
    pub pos: u32,
    /// Reads overlapping the position.
    pub entries: Vec<PileupEntry>,
}

/// Streams pileup columns in increasing position order.
pub trait PileupSource {
    /// Next column, or `None` once the source is exhausted.
    fn next_column(&mut self) -> Result<Option<PileupColumn>, AlignmentError>;
}

impl<S: PileupSource + ?Sized> PileupSource for Box<S> {
    fn next_column(&mut self) -> Result<Option<PileupColumn>, AlignmentError> {
        (**self).next_column()
    }
}

/// In-memory pileup built by walking each read's CIGAR.
#[derive(Debug, Clone, Default)]
pub struct ReadPileupSource {
    columns: VecDeque<PileupColumn>,
}

impl ReadPileupSource {
    /// Build columns for the 0-based half-open `window` from `reads`.
    pub fn new(reads: Vec<AlignedRead>, window: Range<u32>) -> Self {
        let mut columns: BTreeMap<u32, Vec<PileupEntry>> = BTreeMap::new();

        for read in reads.into_iter().map(Arc::new) {
            if read.end() <= window.start || read.pos >= window.end {
                continue;
            }
            let mut ref_pos = read.pos;
            let mut query_pos = 0usize;

            for (idx, op) in read.cigar.iter().enumerate() {
                match op.kind {
                    kind if kind.is_aligned_block() => {
                        for k in 0..op.len {
                            let pos = ref_pos + k;
                            if !window.contains(&pos) {
                                continue;
                            }
                            let indel = if k + 1 == op.len {
                                indel_after(&read.cigar, idx)
                            } else {
                                IndelHint::None
                            };
                            columns.entry(pos).or_default().push(PileupEntry::from_read(
                                &read,
                                Some(query_pos + k as usize),
                                indel,
                                false,
                                false,
                            ));
                        }
                        ref_pos += op.len;
                        query_pos += op.len as usize;
                    }
                    CigarOpKind::Deletion | CigarOpKind::RefSkip => {
                        let is_del = op.kind == CigarOpKind::Deletion;
                        for pos in (ref_pos..ref_pos + op.len).filter(|pos| window.contains(pos)) {
                            columns.entry(pos).or_default().push(PileupEntry::from_read(
                                &read,
                                None,
                                IndelHint::None,
                                is_del,
                                !is_del,
                            ));
                        }
                        ref_pos += op.len;
                    }
                    CigarOpKind::Insertion | CigarOpKind::SoftClip => {
                        query_pos += op.len as usize;
                    }
                    _ => {}
                }
            }
        }

        Self {
            columns: columns
                .into_iter()
                .map(|(pos, entries)| PileupColumn { pos, entries })
                .collect(),
        }
    }
}

fn indel_after(cigar: &[CigarOp], idx: usize) -> IndelHint {
    let next = cigar[idx + 1..]
        .iter()
        .find(|op| op.kind != CigarOpKind::Pad);
    match next.map(|op| (op.kind, op.len)) {
        Some((CigarOpKind::Insertion, len)) => IndelHint::Insertion(len),
        Some((CigarOpKind::Deletion, len)) => IndelHint::Deletion(len),
        _ => IndelHint::None,
    }
}

impl PileupSource for ReadPileupSource {
    fn next_column(&mut self) -> Result<Option<PileupColumn>, AlignmentError> {
        Ok(self.columns.pop_front())
    }
}

/// Pileup columns streamed from an indexed BAM/CRAM via htslib.
pub struct HtsPileupSource<'a> {
    pileups: bam::pileup::Pileups<'a, bam::IndexedReader>,
    chrom: Arc<str>,
    tid: u32,
    last_pos: u32,
}

impl std::fmt::Debug for HtsPileupSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtsPileupSource")
            .field("chrom", &self.chrom)
            .field("tid", &self.tid)
            .finish()
    }
}

impl<'a> HtsPileupSource<'a> {
    /// Position `reader` on `region`. Returns `None` when the file has no
    /// such chromosome, i.e. the sample has no alignment source here.
    pub fn fetch(
        reader: &'a mut bam::IndexedReader,
        region: &GenomicRegion,
    ) -> Result<Option<Self>, AlignmentError> {
        let Some(tid) = reader.header().tid(region.chrom.as_bytes()) else {
            return Ok(None);
        };
        reader.fetch((tid, i64::from(region.start) - 1, i64::from(region.end)))?;
        let mut pileups = reader.pileup();
        pileups.set_max_depth(MAX_PILEUP_DEPTH);
        Ok(Some(Self {
            pileups,
            chrom: Arc::from(region.chrom.as_str()),
            tid,
            last_pos: region.end - 1,
        }))
    }
}

impl PileupSource for HtsPileupSource<'_> {
    fn next_column(&mut self) -> Result<Option<PileupColumn>, AlignmentError> {
        let Some(pileup) = self.pileups.next() else {
            return Ok(None);
        };
        let pileup = pileup?;
        if pileup.tid() != self.tid || pileup.pos() > self.last_pos {
            return Ok(None);
        }

        let entries = pileup
            .alignments()
            .map(|alignment| {
                let record = alignment.record();
                let qpos = alignment.qpos();
                let indel = match alignment.indel() {
                    Indel::Ins(len) => IndelHint::Insertion(len),
                    Indel::Del(len) => IndelHint::Deletion(len),
                    Indel::None => IndelHint::None,
                };
                PileupEntry {
                    mapq: record.mapq(),
                    strand: if record.is_reverse() {
                        Strand::Reverse
                    } else {
                        Strand::Forward
                    },
                    qpos,
                    base: qpos
                        .filter(|&qpos| qpos < record.seq_len())
                        .map(|qpos| record.seq()[qpos]),
                    quality: qpos.and_then(|qpos| record.qual().get(qpos).copied()),
                    indel,
                    is_del: alignment.is_del(),
                    is_refskip: alignment.is_refskip(),
                    read: (indel != IndelHint::None)
                        .then(|| Arc::new(convert_record(&record, Arc::clone(&self.chrom)))),
                }
            })
            .collect();

        Ok(Some(PileupColumn {
            pos: pileup.pos(),
            entries,
        }))
    }
}

fn convert_record(record: &bam::Record, chrom: Arc<str>) -> AlignedRead {
    let cigar = record
        .cigar()
        .iter()
        .map(|op| match *op {
            Cigar::Match(len) => CigarOp::new(CigarOpKind::Match, len),
            Cigar::Ins(len) => CigarOp::new(CigarOpKind::Insertion, len),
            Cigar::Del(len) => CigarOp::new(CigarOpKind::Deletion, len),
            Cigar::RefSkip(len) => CigarOp::new(CigarOpKind::RefSkip, len),
            Cigar::SoftClip(len) => CigarOp::new(CigarOpKind::SoftClip, len),
            Cigar::HardClip(len) => CigarOp::new(CigarOpKind::HardClip, len),
            Cigar::Pad(len) => CigarOp::new(CigarOpKind::Pad, len),
            Cigar::Equal(len) => CigarOp::new(CigarOpKind::Equal, len),
            Cigar::Diff(len) => CigarOp::new(CigarOpKind::Diff, len),
        })
        .collect();

    AlignedRead::new(
        chrom,
        record.pos().max(0) as u32,
        record.mapq(),
        cigar,
        record.seq().as_bytes(),
        record.qual().to_vec(),
        record.is_reverse(),
    )
}

/// Open an indexed BAM/CRAM; CRAM decoding uses `reference`.
pub fn open_indexed(path: &Path, reference: &Path) -> Result<bam::IndexedReader, AlignmentError> {
    if !path.is_file() {
        return Err(AlignmentError::Missing(path.to_path_buf()));
    }
    let mut reader = bam::IndexedReader::from_path(path)?;
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("cram")) {
        reader.set_reference(reference)?;
    }
    Ok(reader)
}

/// Collect alignment paths from repeated `-I` values and an optional list file.
pub fn load_alignment_list(
    inputs: &[PathBuf],
    list_file: Option<&Path>,
) -> Result<Vec<PathBuf>, AlignmentError> {
    let mut paths = inputs.to_vec();
    if let Some(list) = list_file {
        let io_err = |source| AlignmentError::Io {
            path: list.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(list).map_err(io_err)?);
        for line in reader.lines() {
            let line = line.map_err(io_err)?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            // the first column is the path, anything after it is ignored
            if let Some(path) = trimmed.split_whitespace().next() {
                paths.push(PathBuf::from(path));
            }
        }
    }
    Ok(paths)
}

/// Sample identifier from the first `.`-separated token of the file name.
pub fn sample_id_from_filename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .and_then(|name| name.split('.').next().map(str::to_string))
        .unwrap_or_default()
}

/// Sample identifier from the `SM` tag of the first `@RG` header line.
pub fn sample_id_from_header(path: &Path) -> Result<String, AlignmentError> {
    if !path.is_file() {
        return Err(AlignmentError::Missing(path.to_path_buf()));
    }
    let reader = bam::Reader::from_path(path)?;
    let header = bam::Header::from_template(reader.header());
    header
        .to_hashmap()
        .get("RG")
        .and_then(|groups| groups.first())
        .and_then(|group| group.get("SM"))
        .cloned()
        .ok_or_else(|| AlignmentError::MissingReadGroup(path.to_path_buf()))
}

/// Pair every alignment path with its sample identifier.
pub fn resolve_samples(
    paths: Vec<PathBuf>,
    filename_has_samplename: bool,
) -> Result<Vec<SampleSource>, AlignmentError> {
    info!(files = paths.len(), "loading sample ids");
    let total = paths.len();
    paths
        .into_iter()
        .enumerate()
        .map(|(idx, path)| {
            if idx % 1000 == 0 {
                debug!("loading {}/{} alignment files", idx + 1, total);
            }
            let id = if filename_has_samplename {
                sample_id_from_filename(&path)
            } else {
                sample_id_from_header(&path)?
            };
            Ok(SampleSource { id, path })
        })
        .collect()
}
