#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use basevar::genomics::{AlignedRead, CigarOp, CigarOpKind, ReadPileupSource, SampleCursor};
use rust_htslib::bam::{
    self,
    header::{Header, HeaderRecord},
    record::{Cigar, CigarString},
};

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("BASEVAR_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set BASEVAR_UPDATE_SNAPSHOTS=1 to regenerate.\nExpected:\n{}\nActual:\n{}",
            path,
            expected,
            actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

/// Ungapped read with a uniform base quality.
pub fn read(pos: u32, seq: &[u8], qual: u8, reverse: bool) -> AlignedRead {
    AlignedRead::new(
        "chr1",
        pos,
        60,
        vec![CigarOp::new(CigarOpKind::Match, seq.len() as u32)],
        seq.to_vec(),
        vec![qual; seq.len()],
        reverse,
    )
}

/// One cursor per sample over in-memory reads.
pub fn cursors(
    samples: Vec<Vec<AlignedRead>>,
    window_len: u32,
) -> Vec<Option<SampleCursor<ReadPileupSource>>> {
    samples
        .into_iter()
        .map(|reads| Some(SampleCursor::new(ReadPileupSource::new(reads, 0..window_len))))
        .collect()
}

/// Reference contigs used by the on-disk fixtures.
pub const FIXTURE_CONTIGS: &[(&str, &[u8])] = &[("chr1", b"ACGTACGTAC"), ("chr2", b"GGGGCCCC")];

/// Write `ref.fa` with one line per contig and its `.fai`.
pub fn write_reference(dir: &Path) -> PathBuf {
    let path = dir.join("ref.fa");
    let mut fasta = String::new();
    let mut fai = String::new();
    for (name, seq) in FIXTURE_CONTIGS {
        fasta.push_str(&format!(">{name}\n"));
        let offset = fasta.len();
        fasta.push_str(std::str::from_utf8(seq).expect("ascii contig"));
        fasta.push('\n');
        fai.push_str(&format!(
            "{name}\t{}\t{offset}\t{}\t{}\n",
            seq.len(),
            seq.len(),
            seq.len() + 1
        ));
    }
    fs::write(&path, fasta).expect("write fasta");
    fs::write(dir.join("ref.fa.fai"), fai).expect("write fai");
    path
}

/// One alignment for [`write_bam`]: contig index, 0-based start, CIGAR,
/// sequence, uniform base quality, reverse strand.
pub struct FixtureRead {
    pub tid: i32,
    pub pos: i64,
    pub cigar: Vec<Cigar>,
    pub seq: &'static [u8],
    pub qual: u8,
    pub reverse: bool,
}

impl FixtureRead {
    /// Ungapped read on chr1.
    pub fn matched(pos: i64, seq: &'static [u8], reverse: bool) -> Self {
        Self {
            tid: 0,
            pos,
            cigar: vec![Cigar::Match(seq.len() as u32)],
            seq,
            qual: 30,
            reverse,
        }
    }
}

/// Write a coordinate-sorted, indexed BAM for `sample` over the fixture contigs.
pub fn write_bam(dir: &Path, sample: &str, reads: &[FixtureRead]) -> PathBuf {
    let path = dir.join(format!("{sample}.bam"));
    let mut header = Header::new();

    let mut hd = HeaderRecord::new(b"HD");
    hd.push_tag(b"VN", &"1.6");
    hd.push_tag(b"SO", &"coordinate");
    header.push_record(&hd);

    for (name, seq) in FIXTURE_CONTIGS {
        let mut sq = HeaderRecord::new(b"SQ");
        sq.push_tag(b"SN", name);
        sq.push_tag(b"LN", &(seq.len() as i64));
        header.push_record(&sq);
    }

    let mut rg = HeaderRecord::new(b"RG");
    rg.push_tag(b"ID", &sample);
    rg.push_tag(b"SM", &sample);
    header.push_record(&rg);

    {
        let mut writer =
            bam::Writer::from_path(&path, &header, bam::Format::Bam).expect("create bam");
        for (idx, read) in reads.iter().enumerate() {
            let mut record = bam::Record::new();
            let qname = format!("{sample}_{idx}");
            let cigar = CigarString(read.cigar.clone());
            let quals = vec![read.qual; read.seq.len()];
            record.set(qname.as_bytes(), Some(&cigar), read.seq, &quals);
            record.set_tid(read.tid);
            record.set_pos(read.pos);
            record.set_mapq(60);
            record.set_mtid(-1);
            record.set_mpos(-1);
            record.set_flags(if read.reverse { 0x10 } else { 0 });
            writer.write(&record).expect("write record");
        }
    }
    bam::index::build(&path, None, bam::index::Type::Bai, 1).expect("index bam");
    path
}
