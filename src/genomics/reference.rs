use std::path::{Path, PathBuf};

use rust_htslib::faidx;
use thiserror::Error;

use crate::genomics::{ContigIndex, GenomicRegion};

/// Extra reference bases fetched past a region end so deletions starting at
/// the last position can still be spelled out.
pub const WINDOW_PADDING: u32 = 1024;

/// Errors raised by the reference sequence source.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// The FASTA file does not exist.
    #[error("reference fasta {0} does not exist")]
    Missing(PathBuf),

    /// Chromosome missing from the FASTA index.
    #[error("chromosome '{0}' not found in reference")]
    UnknownChromosome(String),

    /// Region starts past the end of its chromosome.
    #[error("{region} lies outside {chrom} ({length} bp)")]
    OutOfBounds {
        /// Requested region.
        region: GenomicRegion,
        /// Chromosome.
        chrom: String,
        /// Chromosome length.
        length: u32,
    },

    /// Error reported by htslib.
    #[error("htslib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),
}

/// A slice of one chromosome, addressed by 0-based reference coordinates.
#[derive(Debug, Clone)]
pub struct ReferenceWindow {
    chrom: String,
    offset: u32,
    sequence: Vec<u8>,
}

impl ReferenceWindow {
    /// Window whose first base sits at 0-based coordinate `offset`.
    pub fn new(chrom: impl Into<String>, offset: u32, mut sequence: Vec<u8>) -> Self {
        sequence.make_ascii_uppercase();
        Self {
            chrom: chrom.into(),
            offset,
            sequence,
        }
    }

    /// Window covering a whole chromosome from coordinate 0.
    pub fn whole(chrom: impl Into<String>, sequence: impl Into<Vec<u8>>) -> Self {
        Self::new(chrom, 0, sequence.into())
    }

    /// Chromosome the window belongs to.
    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    /// Reference base at a 0-based coordinate, `N` outside the window.
    pub fn base_at(&self, pos: u32) -> u8 {
        pos.checked_sub(self.offset)
            .and_then(|idx| self.sequence.get(idx as usize))
            .copied()
            .unwrap_or(b'N')
    }

    /// Up to `len` bases starting at a 0-based coordinate, clipped to the window.
    pub fn slice(&self, pos: u32, len: usize) -> &[u8] {
        let Some(start) = pos.checked_sub(self.offset).map(|idx| idx as usize) else {
            return &[];
        };
        if start >= self.sequence.len() {
            return &[];
        }
        let end = (start + len).min(self.sequence.len());
        &self.sequence[start..end]
    }
}

/// Indexed FASTA reference opened read-only through htslib.
pub struct FastaReference {
    path: PathBuf,
    reader: faidx::Reader,
}

impl std::fmt::Debug for FastaReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastaReference").field("path", &self.path).finish()
    }
}

impl FastaReference {
    /// Open an indexed FASTA (`.fai` is built by htslib when absent).
    pub fn open(path: &Path) -> Result<Self, ReferenceError> {
        if !path.is_file() {
            return Err(ReferenceError::Missing(path.to_path_buf()));
        }
        let reader = faidx::Reader::from_path(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
        })
    }

    /// Length of `chrom`; htslib reports unknown names as a negative length.
    fn seq_len(&self, chrom: &str) -> Option<u32> {
        u32::try_from(self.reader.fetch_seq_len(chrom))
            .ok()
            .filter(|&len| len > 0)
    }

    /// Chromosome names and lengths in index order.
    pub fn contigs(&self) -> Result<ContigIndex, ReferenceError> {
        let names = self.reader.seq_names()?;
        let contigs = names
            .into_iter()
            .map(|name| {
                let len = self.seq_len(&name).unwrap_or(0);
                (name, len)
            })
            .collect();
        Ok(ContigIndex::new(contigs))
    }

    /// Fetch the bases of `region` plus [`WINDOW_PADDING`] trailing bases.
    pub fn fetch_window(&self, region: &GenomicRegion) -> Result<ReferenceWindow, ReferenceError> {
        let chrom_len = self
            .seq_len(&region.chrom)
            .ok_or_else(|| ReferenceError::UnknownChromosome(region.chrom.clone()))?;
        if region.start > chrom_len {
            return Err(ReferenceError::OutOfBounds {
                region: region.clone(),
                chrom: region.chrom.clone(),
                length: chrom_len,
            });
        }
        let begin = region.start - 1;
        let end = region
            .end
            .saturating_sub(1)
            .saturating_add(WINDOW_PADDING)
            .min(chrom_len - 1);
        let sequence = self
            .reader
            .fetch_seq_string(&region.chrom, begin as usize, end as usize)?;
        Ok(ReferenceWindow::new(
            region.chrom.clone(),
            begin,
            sequence.into_bytes(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fasta(dir: &Path) -> PathBuf {
        let path = dir.join("ref.fa");
        std::fs::write(&path, ">chr1\nACGTACGTAC\n>chr2\nGGGG\n").unwrap();
        std::fs::write(
            dir.join("ref.fa.fai"),
            "chr1\t10\t6\t10\t11\nchr2\t4\t23\t4\t5\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn windows_stop_at_the_chromosome_end() {
        let dir = tempfile::tempdir().unwrap();
        let reference = FastaReference::open(&write_fasta(dir.path())).unwrap();
        let contigs = reference.contigs().unwrap();
        assert_eq!(contigs.length("chr1"), Some(10));
        assert_eq!(contigs.length("chr2"), Some(4));

        let window = reference
            .fetch_window(&GenomicRegion::new("chr1", 3, 5).unwrap())
            .unwrap();
        assert_eq!(window.base_at(2), b'G');
        assert_eq!(window.slice(2, 100), b"GTACGTAC");
        assert_eq!(window.base_at(10), b'N');
    }

    #[test]
    fn regions_outside_the_reference_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let reference = FastaReference::open(&write_fasta(dir.path())).unwrap();
        assert!(matches!(
            reference.fetch_window(&GenomicRegion::new("chr2", 5, 6).unwrap()),
            Err(ReferenceError::OutOfBounds { length: 4, .. })
        ));
        assert!(matches!(
            reference.fetch_window(&GenomicRegion::new("chrZ", 1, 1).unwrap()),
            Err(ReferenceError::UnknownChromosome(_))
        ));
        assert!(matches!(
            FastaReference::open(&dir.path().join("missing.fa")),
            Err(ReferenceError::Missing(_))
        ));
    }

    #[test]
    fn window_addresses_absolute_coordinates() {
        let window = ReferenceWindow::new("chr1", 100, b"acgtACGT".to_vec());
        assert_eq!(window.base_at(100), b'A');
        assert_eq!(window.base_at(107), b'T');
        assert_eq!(window.base_at(99), b'N');
        assert_eq!(window.base_at(108), b'N');
        assert_eq!(window.slice(102, 3), b"GTA");
        assert_eq!(window.slice(106, 10), b"GT");
        assert!(window.slice(50, 3).is_empty());
    }
}
