use thiserror::Error;

use crate::genomics::{AlignedRead, CigarOpKind, ReferenceWindow, SampleBase};

/// Alignment inconsistencies found while spelling out an indel.
#[derive(Debug, Error)]
pub enum IndelScanError {
    /// No aligned block of the read ends at the target position.
    #[error("read at {chrom}:{read_pos} has no aligned block ending at {target}")]
    NoBlockEnd {
        /// Chromosome of the read.
        chrom: String,
        /// 0-based read start.
        read_pos: u32,
        /// 0-based target position.
        target: u32,
    },

    /// The operation after the block is neither an insertion nor a deletion.
    #[error("cigar/position mismatch for read at {chrom}:{read_pos}: expected I or D after target {target}, found {found:?}")]
    CigarMismatch {
        /// Chromosome of the read.
        chrom: String,
        /// 0-based read start.
        read_pos: u32,
        /// 0-based target position.
        target: u32,
        /// Operation actually found, if any.
        found: Option<CigarOpKind>,
    },

    /// Indel reported for a pileup entry that did not keep its read.
    #[error("indel at {target} reported without the read that carries it")]
    MissingRead {
        /// 0-based target position.
        target: u32,
    },

    /// Insertion reported for a read without a query position.
    #[error("insertion at {target} reported for a read without a query position")]
    MissingQueryPosition {
        /// 0-based target position.
        target: u32,
    },
}

/// Spell out the insertion or deletion that follows `target` in `read`.
///
/// `target` and `qpos` are 0-based. The CIGAR is walked until an aligned
/// block whose 1-based end equals `target + 1`; the operation right after it
/// must be `I` or `D`. Clips, skips and pads never end a block.
pub fn extract_indel(
    read: &AlignedRead,
    qpos: Option<usize>,
    target: u32,
    reference: &ReferenceWindow,
) -> Result<SampleBase, IndelScanError> {
    let mut ref_end = read.pos;
    let mut follow = None;
    for (idx, op) in read.cigar.iter().enumerate() {
        if op.kind.is_aligned_block() {
            ref_end += op.len;
            if ref_end == target + 1 {
                follow = Some(idx + 1);
                break;
            }
        } else if op.kind.consumes_reference() {
            ref_end += op.len;
        }
    }

    let Some(follow) = follow else {
        return Err(IndelScanError::NoBlockEnd {
            chrom: read.chrom.to_string(),
            read_pos: read.pos,
            target,
        });
    };

    let op = read.cigar[follow..]
        .iter()
        .find(|op| op.kind != CigarOpKind::Pad);
    let indel = match op.map(|op| (op.kind, op.len as usize)) {
        Some((CigarOpKind::Insertion, len)) => {
            let qpos = qpos.ok_or(IndelScanError::MissingQueryPosition { target })?;
            let start = (qpos + 1).min(read.sequence.len());
            let end = (start + len).min(read.sequence.len());
            SampleBase::Insertion(read.sequence[start..end].to_ascii_uppercase())
        }
        Some((CigarOpKind::Deletion, len)) => {
            SampleBase::Deletion(reference.slice(target + 1, len).to_vec())
        }
        other => {
            return Err(IndelScanError::CigarMismatch {
                chrom: read.chrom.to_string(),
                read_pos: read.pos,
                target,
                found: other.map(|(kind, _)| kind),
            })
        }
    };

    match &indel {
        SampleBase::Insertion(seq) | SampleBase::Deletion(seq) if seq.is_empty() => {
            Ok(SampleBase::UNKNOWN)
        }
        _ => Ok(indel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::CigarOp;

    fn reference() -> ReferenceWindow {
        ReferenceWindow::whole("chr1", b"AAAAACCCCCGGGGGTTTTT".to_vec())
    }

    #[test]
    fn insertion_reads_query_bases() {
        // 2S3M2I3M starting at 4: block ends at 1-based 7
        let read = AlignedRead::new(
            "chr1",
            4,
            60,
            vec![
                CigarOp::new(CigarOpKind::SoftClip, 2),
                CigarOp::new(CigarOpKind::Match, 3),
                CigarOp::new(CigarOpKind::Insertion, 2),
                CigarOp::new(CigarOpKind::Match, 3),
            ],
            b"NNACCtgCCC".to_vec(),
            vec![30; 10],
            false,
        );
        let indel = extract_indel(&read, Some(4), 6, &reference()).unwrap();
        assert_eq!(indel, SampleBase::Insertion(b"TG".to_vec()));
    }

    #[test]
    fn deletion_reads_reference_bases() {
        let read = AlignedRead::new(
            "chr1",
            2,
            60,
            vec![
                CigarOp::new(CigarOpKind::Match, 5),
                CigarOp::new(CigarOpKind::Deletion, 3),
                CigarOp::new(CigarOpKind::Match, 4),
            ],
            b"AAACCCGGG".to_vec(),
            vec![30; 9],
            true,
        );
        let indel = extract_indel(&read, Some(4), 6, &reference()).unwrap();
        assert_eq!(indel, SampleBase::Deletion(b"CCC".to_vec()));
    }

    #[test]
    fn block_not_followed_by_indel_is_fatal() {
        let read = AlignedRead::new(
            "chr1",
            0,
            60,
            vec![
                CigarOp::new(CigarOpKind::Match, 5),
                CigarOp::new(CigarOpKind::SoftClip, 3),
            ],
            b"AAAAATTT".to_vec(),
            vec![30; 8],
            false,
        );
        let err = extract_indel(&read, Some(4), 4, &reference()).unwrap_err();
        assert!(matches!(
            err,
            IndelScanError::CigarMismatch {
                found: Some(CigarOpKind::SoftClip),
                ..
            }
        ));
        assert!(matches!(
            extract_indel(&read, Some(2), 2, &reference()),
            Err(IndelScanError::NoBlockEnd { .. })
        ));
    }

    #[test]
    fn empty_deletion_falls_back_to_n() {
        let read = AlignedRead::new(
            "chr1",
            15,
            60,
            vec![
                CigarOp::new(CigarOpKind::Match, 5),
                CigarOp::new(CigarOpKind::Deletion, 2),
            ],
            b"TTTTT".to_vec(),
            vec![30; 5],
            false,
        );
        let indel = extract_indel(&read, Some(4), 19, &reference()).unwrap();
        assert_eq!(indel, SampleBase::UNKNOWN);
    }
}
