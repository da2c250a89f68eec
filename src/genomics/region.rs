//! Genomic intervals and the target-region loading used to drive a run.
//!
//! Regions are 1-based and inclusive on both ends. Users supply them as
//! `chr:start-end` lists, region files, or position files mixing
//! `chr<TAB>pos` and `chr<TAB>start<TAB>end` rows; everything is sorted and
//! merged per chromosome before scheduling.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

/// Errors raised while parsing or loading regions.
#[derive(Debug, Error)]
pub enum RegionError {
    /// Start coordinate after end, or a zero coordinate.
    #[error("invalid region {chrom}:{start}-{end}")]
    InvalidBounds {
        /// Chromosome of the offending region.
        chrom: String,
        /// 1-based start.
        start: u32,
        /// 1-based end.
        end: u32,
    },

    /// Text could not be parsed as a region.
    #[error("cannot parse region '{0}'")]
    Parse(String),

    /// Region references a chromosome missing from the reference.
    #[error("chromosome '{0}' is not present in the reference")]
    UnknownChromosome(String),

    /// Region starts past the end of its chromosome.
    #[error("region {chrom}:{start} starts past the end of {chrom} ({length} bp)")]
    OutOfBounds {
        /// Chromosome of the offending region.
        chrom: String,
        /// 1-based start.
        start: u32,
        /// Chromosome length.
        length: u32,
    },

    /// I/O failure while reading a region/position file.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// A 1-based, inclusive genomic interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenomicRegion {
    /// Chromosome/contig name.
    pub chrom: String,
    /// 1-based start (inclusive).
    pub start: u32,
    /// 1-based end (inclusive).
    pub end: u32,
}

impl GenomicRegion {
    /// Construct a region, validating `1 <= start <= end`.
    pub fn new(chrom: impl Into<String>, start: u32, end: u32) -> Result<Self, RegionError> {
        let chrom = chrom.into();
        if start == 0 || start > end {
            return Err(RegionError::InvalidBounds { chrom, start, end });
        }
        Ok(Self { chrom, start, end })
    }

    /// Number of positions covered.
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Regions always cover at least one position.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether the 1-based position falls inside the region.
    pub fn contains(&self, chrom: &str, position: u32) -> bool {
        self.chrom == chrom && self.start <= position && position <= self.end
    }

    /// Split into `parts` contiguous sub-regions whose lengths differ by at
    /// most one. `parts` is clamped to `1..=len`, so no piece is empty.
    pub fn split(&self, parts: usize) -> Vec<GenomicRegion> {
        let len = self.len() as usize;
        let parts = parts.clamp(1, len);
        let base = len / parts;
        let remainder = len % parts;

        let mut pieces = Vec::with_capacity(parts);
        let mut start = self.start;
        for i in 0..parts {
            let size = (base + usize::from(i < remainder)) as u32;
            let end = start + size - 1;
            pieces.push(GenomicRegion {
                chrom: self.chrom.clone(),
                start,
                end,
            });
            start = end + 1;
        }
        pieces
    }
}

impl fmt::Display for GenomicRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

impl FromStr for GenomicRegion {
    type Err = RegionError;

    /// Parse `chr:start-end` or `chr:pos`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let (chrom, span) = text
            .rsplit_once(':')
            .ok_or_else(|| RegionError::Parse(text.to_string()))?;
        let parse = |value: &str| {
            value
                .trim()
                .replace(',', "")
                .parse::<u32>()
                .map_err(|_| RegionError::Parse(text.to_string()))
        };
        let (start, end) = match span.split_once('-') {
            Some((start, end)) => (parse(start)?, parse(end)?),
            None => {
                let pos = parse(span)?;
                (pos, pos)
            }
        };
        GenomicRegion::new(chrom, start, end)
    }
}

/// Ordered chromosome names and lengths, as listed in the reference index.
#[derive(Debug, Clone, Default)]
pub struct ContigIndex {
    contigs: Vec<(String, u32)>,
    ranks: HashMap<String, usize>,
}

impl ContigIndex {
    /// Build from `(name, length)` pairs in reference order.
    pub fn new(contigs: Vec<(String, u32)>) -> Self {
        let ranks = contigs
            .iter()
            .enumerate()
            .map(|(rank, (name, _))| (name.clone(), rank))
            .collect();
        Self { contigs, ranks }
    }

    /// Position of the chromosome in reference order.
    pub fn rank(&self, chrom: &str) -> Option<usize> {
        self.ranks.get(chrom).copied()
    }

    /// Length of the chromosome.
    pub fn length(&self, chrom: &str) -> Option<u32> {
        self.rank(chrom).map(|rank| self.contigs[rank].1)
    }

    /// Iterate `(name, length)` in reference order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.contigs.iter().map(|(name, len)| (name.as_str(), *len))
    }

    /// Number of contigs.
    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    /// One region per chromosome spanning its full length.
    pub fn whole_genome(&self) -> Vec<GenomicRegion> {
        self.contigs
            .iter()
            .filter(|(_, len)| *len > 0)
            .map(|(name, len)| GenomicRegion {
                chrom: name.clone(),
                start: 1,
                end: *len,
            })
            .collect()
    }
}

/// Parse a single region token, accepting a bare chromosome name.
pub fn parse_region_token(token: &str, contigs: &ContigIndex) -> Result<GenomicRegion, RegionError> {
    let token = token.trim();
    if !token.contains(':') {
        let len = contigs
            .length(token)
            .ok_or_else(|| RegionError::UnknownChromosome(token.to_string()))?;
        return GenomicRegion::new(token, 1, len);
    }
    token.parse()
}

/// Parse a whitespace-separated `chr pos` or `chr start end` row.
pub fn parse_position_row(line: &str) -> Result<GenomicRegion, RegionError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let number = |value: &str| {
        value
            .parse::<u32>()
            .map_err(|_| RegionError::Parse(line.to_string()))
    };
    match fields.as_slice() {
        [chrom, pos] => {
            let pos = number(pos)?;
            GenomicRegion::new(*chrom, pos, pos)
        }
        [chrom, start, end, ..] => GenomicRegion::new(*chrom, number(start)?, number(end)?),
        _ => Err(RegionError::Parse(line.to_string())),
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, RegionError> {
    let io_err = |source| RegionError::Io {
        path: path.display().to_string(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(io_err)?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        lines.push(trimmed.to_string());
    }
    Ok(lines)
}

/// Load a position file (`chr pos` and `chr start end` rows in any mix).
pub fn load_position_file(path: &Path) -> Result<Vec<GenomicRegion>, RegionError> {
    read_lines(path)?
        .iter()
        .map(|line| parse_position_row(line))
        .collect()
}

/// Load `--regions`: either a file of regions or a comma-separated list.
pub fn load_region_argument(arg: &str, contigs: &ContigIndex) -> Result<Vec<GenomicRegion>, RegionError> {
    let path = Path::new(arg);
    if path.is_file() {
        return read_lines(path)?
            .iter()
            .map(|line| {
                if line.split_whitespace().count() >= 2 {
                    parse_position_row(line)
                } else {
                    parse_region_token(line, contigs)
                }
            })
            .collect();
    }
    arg.split(',')
        .filter(|token| !token.trim().is_empty())
        .map(|token| parse_region_token(token, contigs))
        .collect()
}

/// Sort and merge overlapping or adjacent regions per chromosome.
///
/// Chromosomes are ordered by their rank in `contigs`; any chromosome the
/// index does not know is rejected. Ends are clipped to the chromosome
/// length and a region starting past it is an error.
pub fn merge_regions(
    regions: Vec<GenomicRegion>,
    contigs: &ContigIndex,
) -> Result<Vec<GenomicRegion>, RegionError> {
    let mut keyed = Vec::with_capacity(regions.len());
    for mut region in regions {
        let rank = contigs
            .rank(&region.chrom)
            .ok_or_else(|| RegionError::UnknownChromosome(region.chrom.clone()))?;
        let length = contigs.contigs[rank].1;
        if region.start > length {
            return Err(RegionError::OutOfBounds {
                chrom: region.chrom,
                start: region.start,
                length,
            });
        }
        if region.end > length {
            warn!(region = %region, length, "region end clipped to the chromosome length");
            region.end = length;
        }
        keyed.push((rank, region));
    }
    keyed.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then(a.start.cmp(&b.start)).then(a.end.cmp(&b.end)));

    let mut merged: Vec<GenomicRegion> = Vec::with_capacity(keyed.len());
    for (_, region) in keyed {
        if let Some(last) = merged.last_mut() {
            if last.chrom == region.chrom && region.start <= last.end.saturating_add(1) {
                last.end = last.end.max(region.end);
                continue;
            }
        }
        merged.push(region);
    }
    Ok(merged)
}

/// Resolve the final target regions from `--positions` and `--regions`,
/// falling back to the whole genome when neither is given.
pub fn resolve_target_regions(
    positions: Option<&Path>,
    regions: Option<&str>,
    contigs: &ContigIndex,
) -> Result<Vec<GenomicRegion>, RegionError> {
    let mut targets = Vec::new();
    if let Some(path) = positions {
        targets.extend(load_position_file(path)?);
    }
    if let Some(arg) = regions.filter(|arg| !arg.trim().is_empty()) {
        targets.extend(load_region_argument(arg, contigs)?);
    }

    if targets.is_empty() {
        warn!("no positions or regions provided, the whole genome will be scanned");
        return Ok(contigs.whole_genome());
    }
    merge_regions(targets, contigs)
}

/// Write regions as `chr<TAB>start<TAB>end` rows (worker job files).
pub fn write_region_file(path: &Path, regions: &[GenomicRegion]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for region in regions {
        writeln!(writer, "{}\t{}\t{}", region.chrom, region.start, region.end)?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn contigs() -> ContigIndex {
        ContigIndex::new(vec![
            ("chr2".to_string(), 500),
            ("chr1".to_string(), 1000),
            ("chrM".to_string(), 16),
        ])
    }

    #[test_case("chr1:10-20", "chr1", 10, 20 ; "span")]
    #[test_case("chr1:15", "chr1", 15, 15 ; "single position")]
    #[test_case("HLA-A*01:01:1-5", "HLA-A*01:01", 1, 5 ; "colon in contig name")]
    #[test_case("chr1:1,000-1,200", "chr1", 1000, 1200 ; "thousands separators")]
    fn parses_region_text(text: &str, chrom: &str, start: u32, end: u32) {
        let region: GenomicRegion = text.parse().unwrap();
        assert_eq!(region, GenomicRegion::new(chrom, start, end).unwrap());
    }

    #[test]
    fn rejects_inverted_region() {
        assert!(matches!(
            "chr1:20-10".parse::<GenomicRegion>(),
            Err(RegionError::InvalidBounds { .. })
        ));
        assert!(GenomicRegion::new("chr1", 0, 5).is_err());
    }

    #[test]
    fn bare_chromosome_spans_whole_contig() {
        let region = parse_region_token("chrM", &contigs()).unwrap();
        assert_eq!(region, GenomicRegion::new("chrM", 1, 16).unwrap());
        assert!(parse_region_token("chrZ", &contigs()).is_err());
    }

    #[test]
    fn merge_orders_by_reference_and_joins_adjacent() {
        let regions = vec![
            GenomicRegion::new("chr1", 50, 60).unwrap(),
            GenomicRegion::new("chr1", 10, 20).unwrap(),
            GenomicRegion::new("chr2", 5, 5).unwrap(),
            GenomicRegion::new("chr1", 21, 30).unwrap(),
            GenomicRegion::new("chr1", 55, 70).unwrap(),
        ];
        let merged = merge_regions(regions, &contigs()).unwrap();
        assert_eq!(
            merged,
            vec![
                GenomicRegion::new("chr2", 5, 5).unwrap(),
                GenomicRegion::new("chr1", 10, 30).unwrap(),
                GenomicRegion::new("chr1", 50, 70).unwrap(),
            ]
        );
    }

    #[test]
    fn merge_clips_ends_to_the_chromosome_length() {
        let regions = vec![
            GenomicRegion::new("chr1", 900, 2000).unwrap(),
            GenomicRegion::new("chrM", 16, 16).unwrap(),
        ];
        let merged = merge_regions(regions, &contigs()).unwrap();
        assert_eq!(
            merged,
            vec![
                GenomicRegion::new("chr1", 900, 1000).unwrap(),
                GenomicRegion::new("chrM", 16, 16).unwrap(),
            ]
        );
    }

    #[test]
    fn regions_starting_past_the_chromosome_are_rejected() {
        let regions = vec![GenomicRegion::new("chrM", 17, 40).unwrap()];
        assert!(matches!(
            merge_regions(regions, &contigs()),
            Err(RegionError::OutOfBounds { start: 17, length: 16, .. })
        ));

        let err = resolve_target_regions(None, Some("chr1:1001-1005"), &contigs()).unwrap_err();
        assert!(matches!(err, RegionError::OutOfBounds { .. }));
    }

    #[test]
    fn split_never_produces_empty_pieces() {
        let region = GenomicRegion::new("chr1", 1, 10).unwrap();
        let pieces = region.split(3);
        assert_eq!(pieces.iter().map(GenomicRegion::len).collect::<Vec<_>>(), vec![4, 3, 3]);
        assert_eq!(pieces[0].start, 1);
        assert_eq!(pieces[2].end, 10);

        let short = GenomicRegion::new("chr1", 5, 6).unwrap();
        assert_eq!(short.split(8).len(), 2);
    }

    #[test]
    fn position_rows_accept_both_shapes() {
        assert_eq!(
            parse_position_row("chr1\t100").unwrap(),
            GenomicRegion::new("chr1", 100, 100).unwrap()
        );
        assert_eq!(
            parse_position_row("chr1 100 200").unwrap(),
            GenomicRegion::new("chr1", 100, 200).unwrap()
        );
        assert!(parse_position_row("chr1").is_err());
    }

    #[test]
    fn empty_targets_fall_back_to_whole_genome() {
        let regions = resolve_target_regions(None, None, &contigs()).unwrap();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[1], GenomicRegion::new("chr1", 1, 1000).unwrap());
    }
}
