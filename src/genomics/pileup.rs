//! Per-sample pileup cursors.
//!
//! A [`SampleCursor`] wraps one sample's [`PileupSource`] and answers
//! "what does this sample show at position p" for increasing `p`. Which read
//! speaks for the sample is decided by a [`ReadSelection`] policy so the
//! iteration logic never changes when the policy does.

use std::str::FromStr;

use thiserror::Error;

use crate::genomics::{
    extract_indel, AlignmentError, IndelHint, IndelScanError, PileupColumn, PileupEntry,
    PileupSource, ReferenceWindow, SampleBase, Strand,
};

/// Default minimum mapping quality for a read to be considered.
pub const DEFAULT_MIN_MAPQ: u8 = 30;

/// Errors raised while advancing a cursor.
#[derive(Debug, Error)]
pub enum PileupError {
    /// The alignment source failed.
    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    /// An indel could not be reconciled with the read's CIGAR.
    #[error(transparent)]
    Indel(#[from] IndelScanError),
}

/// What one sample shows at one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PileupObservation {
    /// Base, `N`, or an indel allele.
    pub base: SampleBase,
    /// Phred base quality (0 for indels and missing data).
    pub quality: u8,
    /// Strand of the selected read.
    pub strand: Strand,
    /// Mapping quality of the selected read.
    pub mapq: u8,
    /// 1-based offset of the base within the read.
    pub read_position_rank: u32,
}

impl PileupObservation {
    /// The "no data" observation.
    pub fn no_data() -> Self {
        Self {
            base: SampleBase::UNKNOWN,
            quality: 0,
            strand: Strand::Unknown,
            mapq: 0,
            read_position_rank: 0,
        }
    }
}

/// Chooses the read that speaks for a sample at one column.
pub trait ReadSelection: Send + Sync + std::fmt::Debug {
    /// Pick an entry among reads with `mapq >= min_mapq`, or `None`.
    fn select<'c>(&self, column: &'c PileupColumn, min_mapq: u8) -> Option<&'c PileupEntry>;
}

/// Take the first qualifying read in iteration order, indel-bearing or not.
///
/// Deleted or skipped positions carry no base and are passed over.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstQualifyingRead;

impl ReadSelection for FirstQualifyingRead {
    fn select<'c>(&self, column: &'c PileupColumn, min_mapq: u8) -> Option<&'c PileupEntry> {
        column
            .entries
            .iter()
            .filter(|entry| entry.mapq >= min_mapq)
            .find(|entry| entry.indel != IndelHint::None || (!entry.is_del && !entry.is_refskip))
    }
}

/// Take the qualifying read with the highest base quality; ties keep the
/// earlier read. Indel-bearing reads are only used when no base is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestBaseQuality;

impl ReadSelection for HighestBaseQuality {
    fn select<'c>(&self, column: &'c PileupColumn, min_mapq: u8) -> Option<&'c PileupEntry> {
        let qualifying = || {
            column
                .entries
                .iter()
                .filter(move |entry| entry.mapq >= min_mapq)
        };
        let best_base = qualifying()
            .filter(|entry| entry.indel == IndelHint::None && !entry.is_del && !entry.is_refskip)
            .filter_map(|entry| Some((entry.quality?, entry)))
            .fold(None::<(u8, &PileupEntry)>, |best, (qual, entry)| match best {
                Some((best_qual, _)) if best_qual >= qual => best,
                _ => Some((qual, entry)),
            })
            .map(|(_, entry)| entry);
        best_base.or_else(|| qualifying().find(|entry| entry.indel != IndelHint::None))
    }
}

/// Named read-selection policies exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadSelectionPolicy {
    /// [`FirstQualifyingRead`].
    #[default]
    First,
    /// [`HighestBaseQuality`].
    BestQuality,
}

impl ReadSelectionPolicy {
    /// Boxed policy implementation.
    pub fn build(self) -> Box<dyn ReadSelection> {
        match self {
            ReadSelectionPolicy::First => Box::new(FirstQualifyingRead),
            ReadSelectionPolicy::BestQuality => Box::new(HighestBaseQuality),
        }
    }

    /// Command-line spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            ReadSelectionPolicy::First => "first",
            ReadSelectionPolicy::BestQuality => "best-quality",
        }
    }
}

impl FromStr for ReadSelectionPolicy {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "first" => Ok(ReadSelectionPolicy::First),
            "best-quality" => Ok(ReadSelectionPolicy::BestQuality),
            other => Err(format!("unknown read selection policy '{other}'")),
        }
    }
}

/// Turn the selected entry into an observation.
pub fn observe(
    entry: &PileupEntry,
    target: u32,
    reference: &ReferenceWindow,
) -> Result<PileupObservation, IndelScanError> {
    let strand = entry.strand;
    let mapq = entry.mapq;

    if entry.indel != IndelHint::None {
        let read = entry
            .read
            .as_deref()
            .ok_or(IndelScanError::MissingRead { target })?;
        let base = extract_indel(read, entry.qpos, target, reference)?;
        return Ok(PileupObservation {
            base,
            quality: 0,
            strand,
            mapq,
            read_position_rank: 0,
        });
    }

    let Some(qpos) = entry.qpos else {
        return Ok(PileupObservation::no_data());
    };
    let base = entry.base.unwrap_or(b'N').to_ascii_uppercase();
    Ok(PileupObservation {
        base: SampleBase::Nucleotide(base),
        quality: entry.quality.unwrap_or(0),
        strand,
        mapq,
        read_position_rank: qpos as u32 + 1,
    })
}

#[derive(Debug)]
enum CursorState {
    Fresh,
    At(PileupColumn),
    Exhausted,
}

/// Forward-only reader over one sample's pileup columns.
#[derive(Debug)]
pub struct SampleCursor<S> {
    source: S,
    state: CursorState,
}

impl<S: PileupSource> SampleCursor<S> {
    /// Wrap a source; nothing is read until the first [`advance_to`](Self::advance_to).
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: CursorState::Fresh,
        }
    }

    /// 0-based position of the current column, if any.
    pub fn position(&self) -> Option<u32> {
        match &self.state {
            CursorState::At(column) => Some(column.pos),
            _ => None,
        }
    }

    fn pull(&mut self) -> Result<(), AlignmentError> {
        self.state = match self.source.next_column()? {
            Some(column) => CursorState::At(column),
            None => CursorState::Exhausted,
        };
        Ok(())
    }

    /// Observation at the 0-based `target`.
    ///
    /// Targets must be requested in non-decreasing order. Columns behind the
    /// target are consumed; a column past the target is kept for later.
    pub fn advance_to(
        &mut self,
        target: u32,
        reference: &ReferenceWindow,
        policy: &dyn ReadSelection,
        min_mapq: u8,
    ) -> Result<PileupObservation, PileupError> {
        if matches!(self.state, CursorState::Fresh) {
            self.pull()?;
        }
        while matches!(&self.state, CursorState::At(column) if column.pos < target) {
            self.pull()?;
        }

        match &self.state {
            CursorState::At(column) if column.pos == target => {
                match policy.select(column, min_mapq) {
                    Some(entry) => Ok(observe(entry, target, reference)?),
                    None => Ok(PileupObservation::no_data()),
                }
            }
            _ => Ok(PileupObservation::no_data()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{AlignedRead, CigarOp, CigarOpKind, ReadPileupSource};

    fn read(pos: u32, mapq: u8, seq: &[u8], qual: u8, reverse: bool) -> AlignedRead {
        AlignedRead::new(
            "chr1",
            pos,
            mapq,
            vec![CigarOp::new(CigarOpKind::Match, seq.len() as u32)],
            seq.to_vec(),
            vec![qual; seq.len()],
            reverse,
        )
    }

    fn reference() -> ReferenceWindow {
        ReferenceWindow::whole("chr1", b"ACGTACGTACGTACGTACGT".to_vec())
    }

    #[test]
    fn cursor_seeks_forward_and_reports_gaps() {
        let source = ReadPileupSource::new(
            vec![read(2, 60, b"GTA", 35, false), read(10, 60, b"GG", 20, true)],
            0..20,
        );
        let mut cursor = SampleCursor::new(source);
        let policy = FirstQualifyingRead;
        let reference = reference();

        let first = cursor.advance_to(0, &reference, &policy, 30).unwrap();
        assert_eq!(first, PileupObservation::no_data());
        assert_eq!(cursor.position(), Some(2));

        let obs = cursor.advance_to(3, &reference, &policy, 30).unwrap();
        assert_eq!(obs.base, SampleBase::Nucleotide(b'T'));
        assert_eq!(obs.quality, 35);
        assert_eq!(obs.strand, Strand::Forward);
        assert_eq!(obs.read_position_rank, 2);

        // same target again does not advance
        let again = cursor.advance_to(3, &reference, &policy, 30).unwrap();
        assert_eq!(again, obs);

        assert_eq!(cursor.advance_to(7, &reference, &policy, 30).unwrap(), PileupObservation::no_data());
        assert_eq!(cursor.position(), Some(10));

        let rev = cursor.advance_to(11, &reference, &policy, 30).unwrap();
        assert_eq!(rev.strand, Strand::Reverse);

        assert_eq!(cursor.advance_to(15, &reference, &policy, 30).unwrap(), PileupObservation::no_data());
        assert_eq!(cursor.position(), None);
    }

    #[test]
    fn low_mapping_quality_reads_are_ignored() {
        let source = ReadPileupSource::new(
            vec![read(0, 10, b"T", 40, false), read(0, 45, b"A", 25, true)],
            0..1,
        );
        let mut cursor = SampleCursor::new(source);
        let obs = cursor.advance_to(0, &reference(), &FirstQualifyingRead, 30).unwrap();
        assert_eq!(obs.base, SampleBase::Nucleotide(b'A'));
        assert_eq!(obs.mapq, 45);
    }

    #[test]
    fn first_read_wins_even_when_it_carries_an_indel() {
        let indel_read = AlignedRead::new(
            "chr1",
            0,
            60,
            vec![
                CigarOp::new(CigarOpKind::Match, 2),
                CigarOp::new(CigarOpKind::Insertion, 1),
                CigarOp::new(CigarOpKind::Match, 2),
            ],
            b"ACTGT".to_vec(),
            vec![30; 5],
            false,
        );
        let source = ReadPileupSource::new(vec![indel_read, read(0, 60, b"AC", 40, false)], 0..4);
        let mut cursor = SampleCursor::new(source);
        let obs = cursor.advance_to(1, &reference(), &FirstQualifyingRead, 30).unwrap();
        assert_eq!(obs.base, SampleBase::Insertion(b"T".to_vec()));
        assert_eq!(obs.quality, 0);
    }

    #[test]
    fn best_quality_policy_prefers_highest_base_quality() {
        let source = ReadPileupSource::new(
            vec![read(0, 60, b"A", 20, false), read(0, 60, b"C", 38, true)],
            0..1,
        );
        let mut cursor = SampleCursor::new(source);
        let policy = ReadSelectionPolicy::BestQuality.build();
        let obs = cursor.advance_to(0, &reference(), policy.as_ref(), 30).unwrap();
        assert_eq!(obs.base, SampleBase::Nucleotide(b'C'));
        assert_eq!(obs.quality, 38);
    }
}
