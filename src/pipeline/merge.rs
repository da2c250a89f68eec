//! Merge per-worker coverage/VCF files into one ordered output.
//!
//! Header lines (`#...`) from all sources come first, each distinct line
//! once, in first-seen order. Data lines are concatenated in source order
//! when every file starts at or after the point where the previous one ended;
//! otherwise they are k-way merged by (chromosome, position). Chromosomes
//! are ranked by the reference index when one is given, lexicographically
//! otherwise. The destination is written to a temporary sibling and renamed
//! into place before any source is deleted.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::genomics::ContigIndex;

/// Errors raised while merging output files.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Filesystem failure.
    #[error("merge failed on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A data line lacks a parsable chromosome/position.
    #[error("{path}, line {line}: cannot read chromosome and position")]
    Format {
        /// File involved.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
    },
}

/// How the data lines were combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Files appended in the given order.
    Concatenate,
    /// Lines interleaved by genomic order.
    KWay,
}

/// What a merge produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// Strategy chosen.
    pub strategy: MergeStrategy,
    /// Data lines written.
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    rank: usize,
    chrom: String,
    position: u32,
}

/// Merges line-oriented genomic outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputMerger<'a> {
    contigs: Option<&'a ContigIndex>,
}

impl<'a> OutputMerger<'a> {
    /// Merger ordering chromosomes lexicographically.
    pub fn new() -> Self {
        Self { contigs: None }
    }

    /// Merger ordering chromosomes by reference rank; unknown names sort
    /// after all known ones.
    pub fn with_contigs(contigs: &'a ContigIndex) -> Self {
        Self {
            contigs: Some(contigs),
        }
    }

    fn key(&self, path: &Path, line_no: usize, line: &str) -> Result<SortKey, MergeError> {
        let mut fields = line.split('\t');
        let chrom = fields.next().filter(|chrom| !chrom.is_empty());
        let position = fields.next().and_then(|pos| pos.parse::<u32>().ok());
        let (Some(chrom), Some(position)) = (chrom, position) else {
            return Err(MergeError::Format {
                path: path.to_path_buf(),
                line: line_no,
            });
        };
        Ok(match self.contigs.and_then(|contigs| contigs.rank(chrom)) {
            Some(rank) => SortKey {
                rank,
                chrom: String::new(),
                position,
            },
            None => SortKey {
                rank: usize::MAX,
                chrom: chrom.to_string(),
                position,
            },
        })
    }

    /// Merge `sources` into `dest`, deleting the sources afterwards when
    /// `delete_sources` is set.
    pub fn merge(
        &self,
        sources: &[PathBuf],
        dest: &Path,
        delete_sources: bool,
    ) -> Result<MergeSummary, MergeError> {
        let mut headers = Vec::new();
        let mut seen = HashSet::new();
        let mut bounds = Vec::with_capacity(sources.len());
        for source in sources {
            let scan = self.scan(source)?;
            for header in scan.headers {
                if seen.insert(header.clone()) {
                    headers.push(header);
                }
            }
            bounds.push(scan.bounds);
        }

        let ordered = bounds
            .iter()
            .flatten()
            .collect::<Vec<_>>()
            .windows(2)
            .all(|pair| pair[0].1 <= pair[1].0);
        let strategy = if ordered {
            MergeStrategy::Concatenate
        } else {
            MergeStrategy::KWay
        };
        debug!(sources = sources.len(), ?strategy, dest = %dest.display(), "merging outputs");

        let tmp = tmp_path(dest);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| MergeError::Io { path, source }
        };
        let mut writer = BufWriter::new(File::create(&tmp).map_err(io_err(tmp.as_path()))?);
        for header in &headers {
            writeln!(writer, "{header}").map_err(io_err(tmp.as_path()))?;
        }
        let records = match strategy {
            MergeStrategy::Concatenate => self.concatenate(sources, &mut writer, &tmp)?,
            MergeStrategy::KWay => self.kway(sources, &mut writer, &tmp)?,
        };
        writer.flush().map_err(io_err(tmp.as_path()))?;
        drop(writer);
        fs::rename(&tmp, dest).map_err(io_err(dest))?;

        if delete_sources {
            for source in sources.iter().filter(|source| source.as_path() != dest) {
                fs::remove_file(source).map_err(io_err(source.as_path()))?;
            }
        }
        info!(records, dest = %dest.display(), "merged outputs");
        Ok(MergeSummary { strategy, records })
    }

    fn scan(&self, path: &Path) -> Result<Scan, MergeError> {
        let mut headers = Vec::new();
        let mut first = None;
        let mut last = None;
        for (idx, line) in open_lines(path)?.enumerate() {
            let line = line.map_err(|source| MergeError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.is_empty() {
                continue;
            }
            if line.starts_with('#') {
                if first.is_none() {
                    headers.push(line);
                }
                continue;
            }
            let key = self.key(path, idx + 1, &line)?;
            if first.is_none() {
                first = Some(key.clone());
            }
            last = Some(key);
        }
        Ok(Scan {
            headers,
            bounds: first.zip(last),
        })
    }

    fn concatenate<W: Write>(
        &self,
        sources: &[PathBuf],
        writer: &mut W,
        dest: &Path,
    ) -> Result<usize, MergeError> {
        let mut records = 0;
        for source in sources {
            for line in open_lines(source)? {
                let line = line.map_err(|source_err| MergeError::Io {
                    path: source.clone(),
                    source: source_err,
                })?;
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                writeln!(writer, "{line}").map_err(|source| MergeError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
                records += 1;
            }
        }
        Ok(records)
    }

    fn kway<W: Write>(
        &self,
        sources: &[PathBuf],
        writer: &mut W,
        dest: &Path,
    ) -> Result<usize, MergeError> {
        let mut cursors = sources
            .iter()
            .map(|path| Ok(DataLines::new(path.clone(), open_lines(path)?)))
            .collect::<Result<Vec<_>, MergeError>>()?;

        let mut heap = BinaryHeap::new();
        for (idx, cursor) in cursors.iter_mut().enumerate() {
            if let Some((line_no, line)) = cursor.next_line()? {
                let key = self.key(&cursor.path, line_no, &line)?;
                heap.push(Reverse((key, idx, line)));
            }
        }

        let mut records = 0;
        while let Some(Reverse((_, idx, line))) = heap.pop() {
            writeln!(writer, "{line}").map_err(|source| MergeError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
            records += 1;
            let cursor = &mut cursors[idx];
            if let Some((line_no, next)) = cursor.next_line()? {
                let key = self.key(&cursor.path, line_no, &next)?;
                heap.push(Reverse((key, idx, next)));
            }
        }
        Ok(records)
    }
}

struct Scan {
    headers: Vec<String>,
    bounds: Option<(SortKey, SortKey)>,
}

struct DataLines {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl DataLines {
    fn new(path: PathBuf, lines: Lines<BufReader<File>>) -> Self {
        Self {
            path,
            lines,
            line_no: 0,
        }
    }

    fn next_line(&mut self) -> Result<Option<(usize, String)>, MergeError> {
        for line in self.lines.by_ref() {
            self.line_no += 1;
            let line = line.map_err(|source| MergeError::Io {
                path: self.path.clone(),
                source,
            })?;
            if !line.is_empty() && !line.starts_with('#') {
                return Ok(Some((self.line_no, line)));
            }
        }
        Ok(None)
    }
}

fn open_lines(path: &Path) -> Result<Lines<BufReader<File>>, MergeError> {
    let file = File::open(path).map_err(|source| MergeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file).lines())
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Merge with lexicographic chromosome order (the `merge` subcommand).
pub fn merge_files(
    sources: &[PathBuf],
    dest: &Path,
    delete_sources: bool,
) -> Result<MergeSummary, MergeError> {
    OutputMerger::new().merge(sources, dest, delete_sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn ordered_sources_are_concatenated() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a", "#CHROM\tPOS\nchr1\t1\nchr1\t5\n");
        let b = write(dir.path(), "b", "#CHROM\tPOS\nchr1\t9\nchr2\t1\n");
        let dest = dir.path().join("out");

        let summary = merge_files(&[a.clone(), b.clone()], &dest, true).unwrap();
        assert_eq!(summary.strategy, MergeStrategy::Concatenate);
        assert_eq!(summary.records, 4);
        assert_eq!(
            fs::read_to_string(&dest).unwrap(),
            "#CHROM\tPOS\nchr1\t1\nchr1\t5\nchr1\t9\nchr2\t1\n"
        );
        assert!(!a.exists() && !b.exists());
    }

    #[test]
    fn interleaved_sources_use_reference_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a", "chr2\t3\nchr10\t1\n");
        let b = write(dir.path(), "b", "chr2\t1\nchr2\t7\n");
        let dest = dir.path().join("out");
        let contigs = ContigIndex::new(vec![("chr2".to_string(), 100), ("chr10".to_string(), 100)]);

        let summary = OutputMerger::with_contigs(&contigs)
            .merge(&[a.clone(), b], &dest, false)
            .unwrap();
        assert_eq!(summary.strategy, MergeStrategy::KWay);
        assert_eq!(
            fs::read_to_string(&dest).unwrap(),
            "chr2\t1\nchr2\t3\nchr2\t7\nchr10\t1\n"
        );
        assert!(a.exists());
    }

    #[test]
    fn malformed_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a", "chr1\tnot-a-number\n");
        let err = merge_files(&[a], &dir.path().join("out"), false).unwrap_err();
        assert!(matches!(err, MergeError::Format { line: 1, .. }));
    }
}
