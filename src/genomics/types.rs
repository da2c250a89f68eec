use std::fmt;
use std::sync::Arc;

/// The four canonical nucleotides in the order used for depth columns.
pub const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Index of a canonical base inside [`BASES`].
pub fn base_index(base: u8) -> Option<usize> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOpKind {
    /// Consuming match/mismatch (`M`).
    Match,
    /// Insertion relative to the reference (`I`).
    Insertion,
    /// Deletion relative to the reference (`D`).
    Deletion,
    /// Skipped reference region, e.g. an intron (`N`).
    RefSkip,
    /// Soft clipping (sequence present in read only).
    SoftClip,
    /// Hard clipping (trimmed sequence not present in read).
    HardClip,
    /// Silent padding (`P`).
    Pad,
    /// Sequence match (`=`).
    Equal,
    /// Sequence mismatch (`X`).
    Diff,
}

impl CigarOpKind {
    /// Whether the operation is an aligned block (`M`, `=`, `X`).
    pub fn is_aligned_block(self) -> bool {
        matches!(self, CigarOpKind::Match | CigarOpKind::Equal | CigarOpKind::Diff)
    }

    /// Whether the operation advances along the reference.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Deletion
                | CigarOpKind::RefSkip
                | CigarOpKind::Equal
                | CigarOpKind::Diff
        )
    }
}

/// CIGAR operation with length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    /// Operation kind.
    pub kind: CigarOpKind,
    /// Number of bases affected by the operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct a new CIGAR operation.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

/// Aligned read with sequence and quality information.
#[derive(Debug, Clone)]
pub struct AlignedRead {
    /// Reference contig/chromosome name.
    pub chrom: Arc<str>,
    /// 0-based leftmost reference coordinate.
    pub pos: u32,
    /// Mapping quality (Phred-scaled).
    pub mapq: u8,
    /// CIGAR describing the alignment.
    pub cigar: Vec<CigarOp>,
    /// Read sequence stored as uppercase ASCII.
    pub sequence: Arc<[u8]>,
    /// Per-base quality scores in Phred space.
    pub qualities: Arc<[u8]>,
    /// Whether the read maps to the reverse complement strand.
    pub is_reverse: bool,
}

impl AlignedRead {
    /// Construct a new aligned read wrapper.
    pub fn new(
        chrom: impl Into<Arc<str>>,
        pos: u32,
        mapq: u8,
        cigar: Vec<CigarOp>,
        sequence: impl Into<Arc<[u8]>>,
        qualities: impl Into<Arc<[u8]>>,
        is_reverse: bool,
    ) -> Self {
        Self {
            chrom: chrom.into(),
            pos,
            mapq,
            cigar,
            sequence: sequence.into(),
            qualities: qualities.into(),
            is_reverse,
        }
    }

    /// Read length inferred from the sequence.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the read carries no sequence.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// End position (half-open) on the reference, following the CIGAR.
    pub fn end(&self) -> u32 {
        let span: u32 = self
            .cigar
            .iter()
            .filter(|op| op.kind.consumes_reference())
            .map(|op| op.len)
            .sum();
        self.pos + span
    }

    /// Base at the provided read offset.
    pub fn base_at(&self, offset: usize) -> Option<u8> {
        self.sequence.get(offset).copied()
    }

    /// Quality score at the provided read offset.
    pub fn quality_at(&self, offset: usize) -> Option<u8> {
        self.qualities.get(offset).copied()
    }

    /// Strand the read aligned to.
    pub fn strand(&self) -> Strand {
        if self.is_reverse {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }
}

/// Sequencing strand of the read that produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    /// `+`
    Forward,
    /// `-`
    Reverse,
    /// `.`, no read was observed.
    Unknown,
}

impl Strand {
    /// Single-character symbol used in text outputs.
    pub fn symbol(self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
            Strand::Unknown => '.',
        }
    }

    /// Parse the single-character symbol.
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '+' => Some(Strand::Forward),
            '-' => Some(Strand::Reverse),
            '.' => Some(Strand::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// What a single sample shows at a position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleBase {
    /// Single-base call: `A`, `C`, `G`, `T`, `N` or `*`.
    Nucleotide(u8),
    /// Bases inserted after the position (`+seq`).
    Insertion(Vec<u8>),
    /// Reference bases deleted after the position (`-seq`).
    Deletion(Vec<u8>),
}

impl SampleBase {
    /// The uninformative `N` call.
    pub const UNKNOWN: SampleBase = SampleBase::Nucleotide(b'N');

    /// Parse the textual form (`A`, `+AT`, `-C`).
    pub fn parse(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        match bytes {
            [] | [b'+'] | [b'-'] => None,
            [b'+', rest @ ..] if !rest.is_empty() => Some(SampleBase::Insertion(rest.to_vec())),
            [b'-', rest @ ..] if !rest.is_empty() => Some(SampleBase::Deletion(rest.to_vec())),
            [base] => Some(SampleBase::Nucleotide(base.to_ascii_uppercase())),
            _ => None,
        }
    }

    /// The canonical base, if this is one of `A`, `C`, `G`, `T`.
    pub fn canonical(&self) -> Option<u8> {
        match self {
            SampleBase::Nucleotide(base) if base_index(*base).is_some() => Some(*base),
            _ => None,
        }
    }

    /// Whether this is an insertion or deletion.
    pub fn is_indel(&self) -> bool {
        matches!(self, SampleBase::Insertion(_) | SampleBase::Deletion(_))
    }

    /// Whether this is the `N` call.
    pub fn is_unknown(&self) -> bool {
        matches!(self, SampleBase::Nucleotide(b'N'))
    }
}

impl fmt::Display for SampleBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleBase::Nucleotide(base) => write!(f, "{}", *base as char),
            SampleBase::Insertion(seq) => write!(f, "+{}", String::from_utf8_lossy(seq)),
            SampleBase::Deletion(seq) => write!(f, "-{}", String::from_utf8_lossy(seq)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_end_follows_cigar() {
        let read = AlignedRead::new(
            "chr1",
            100,
            60,
            vec![
                CigarOp::new(CigarOpKind::SoftClip, 3),
                CigarOp::new(CigarOpKind::Match, 5),
                CigarOp::new(CigarOpKind::Insertion, 2),
                CigarOp::new(CigarOpKind::Deletion, 4),
                CigarOp::new(CigarOpKind::Match, 5),
            ],
            b"NNNACGTAGGACGTA".to_vec(),
            vec![30; 15],
            false,
        );
        assert_eq!(read.end(), 114);
    }

    #[test]
    fn sample_base_text_form() {
        assert_eq!(SampleBase::parse("+AT"), Some(SampleBase::Insertion(b"AT".to_vec())));
        assert_eq!(SampleBase::parse("-C"), Some(SampleBase::Deletion(b"C".to_vec())));
        assert_eq!(SampleBase::parse("g"), Some(SampleBase::Nucleotide(b'G')));
        assert_eq!(SampleBase::parse("+"), None);
        assert_eq!(SampleBase::Deletion(b"CA".to_vec()).to_string(), "-CA");
        assert_eq!(SampleBase::UNKNOWN.canonical(), None);
    }
}
