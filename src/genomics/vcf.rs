//! Coverage and VCF line rendering.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

use crate::genomics::basetype::round_to;
use crate::genomics::{ContigIndex, SampleBase, Strand, StrandBias};

/// Column header of coverage files.
pub const COVERAGE_HEADER: &str = "#CHROM\tPOS\tREF\tDepth\tA\tC\tG\tT\tIndel\tFS\tSB";

/// FORMAT column of VCF records.
pub const VCF_FORMAT: &str = "GT:AB:SO:BP";

const VCF_META: &str = "##fileformat=VCFv4.2
##FILTER=<ID=LowQual,Description=\"Low quality (QUAL <= 60)\">
##INFO=<ID=CM_AC,Number=A,Type=Integer,Description=\"Allele count of each alternate allele\">
##INFO=<ID=CM_AF,Number=A,Type=Float,Description=\"Allele frequency from depth\">
##INFO=<ID=CM_DP,Number=1,Type=Integer,Description=\"Total informative depth\">
##INFO=<ID=CM_EAF,Number=A,Type=Float,Description=\"Allele frequency estimated by EM\">
##INFO=<ID=FS,Number=1,Type=Float,Description=\"Phred-scaled Fisher exact strand bias\">
##INFO=<ID=SB_REF,Number=2,Type=Integer,Description=\"Reference allele forward,reverse counts\">
##INFO=<ID=SB_ALT,Number=2,Type=Integer,Description=\"Alternate alleles forward,reverse counts\">
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
##FORMAT=<ID=AB,Number=1,Type=String,Description=\"Allele base\">
##FORMAT=<ID=SO,Number=1,Type=String,Description=\"Strand of the read\">
##FORMAT=<ID=BP,Number=1,Type=Float,Description=\"Base quality probability\">
";

/// One line of the coverage file.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageRecord {
    /// Chromosome.
    pub chrom: String,
    /// 1-based position.
    pub position: u32,
    /// Reference base.
    pub ref_base: u8,
    /// Depth of `A C G T`.
    pub depth: [u32; 4],
    /// Indel allele counts, ordered by allele text.
    pub indels: BTreeMap<String, u32>,
    /// Strand bias against the most supported non-reference base.
    pub strand_bias: StrandBias,
}

impl CoverageRecord {
    /// Sum of the four base depths.
    pub fn total_depth(&self) -> u32 {
        self.depth.iter().sum()
    }

    fn indel_field(&self) -> String {
        if self.indels.is_empty() {
            return ".".to_string();
        }
        self.indels
            .iter()
            .map(|(allele, count)| format!("{allele}:{count}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for CoverageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.chrom,
            self.position,
            self.ref_base as char,
            self.total_depth()
        )?;
        for depth in self.depth {
            write!(f, "\t{depth}")?;
        }
        write!(
            f,
            "\t{}\t{}\t{}",
            self.indel_field(),
            self.strand_bias.fs,
            self.strand_bias.counts_field()
        )
    }
}

/// One line of the VCF file.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    /// Chromosome.
    pub chrom: String,
    /// 1-based position.
    pub position: u32,
    /// Reference base.
    pub ref_base: u8,
    /// Alternate bases in call order.
    pub alt_bases: Vec<u8>,
    /// Phred-scaled site quality.
    pub var_qual: f64,
    /// Whether the site falls under the quality threshold.
    pub low_qual: bool,
    /// INFO key/value pairs; rendered in key order.
    pub info: BTreeMap<&'static str, String>,
    /// Per-sample FORMAT fields.
    pub samples: Vec<String>,
}

impl fmt::Display for VariantRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alts: Vec<String> = self.alt_bases.iter().map(|&b| (b as char).to_string()).collect();
        let info: Vec<String> = self
            .info
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        write!(
            f,
            "{}\t{}\t.\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chrom,
            self.position,
            self.ref_base as char,
            alts.join(","),
            self.var_qual,
            if self.low_qual { "LowQual" } else { "." },
            info.join(";"),
            VCF_FORMAT,
        )?;
        for sample in &self.samples {
            write!(f, "\t{sample}")?;
        }
        Ok(())
    }
}

/// Per-sample `GT:AB:SO:BP` field.
///
/// The reference base is `0/.`, the k-th alternate `./k`, any other base
/// `./.`; an `N` sample collapses to a bare `./.`.
pub fn sample_field(
    base: &SampleBase,
    strand: Strand,
    quality_pvalue: f64,
    ref_base: u8,
    alt_bases: &[u8],
) -> String {
    if base.is_unknown() {
        return "./.".to_string();
    }
    let genotype = match base {
        SampleBase::Nucleotide(b) if *b == ref_base => "0/.".to_string(),
        SampleBase::Nucleotide(b) => alt_bases
            .iter()
            .position(|alt| alt == b)
            .map(|k| format!("./{}", k + 1))
            .unwrap_or_else(|| "./.".to_string()),
        _ => "./.".to_string(),
    };
    format!(
        "{genotype}:{base}:{}:{}",
        strand.symbol(),
        round_to(quality_pvalue, 6)
    )
}

/// `%f`-style six-decimal frequency.
pub fn format_frequency(value: f64) -> String {
    format!("{:.6}", round_to(value, 6))
}

/// Write the coverage column header.
pub fn write_coverage_header<W: Write>(writer: &mut W) -> io::Result<()> {
    writeln!(writer, "{COVERAGE_HEADER}")
}

/// Write VCF meta lines, contigs and the column header.
pub fn write_vcf_header<W: Write>(
    writer: &mut W,
    contigs: &ContigIndex,
    samples: &[String],
) -> io::Result<()> {
    writer.write_all(VCF_META.as_bytes())?;
    for (name, length) in contigs.iter() {
        writeln!(writer, "##contig=<ID={name},length={length}>")?;
    }
    write!(writer, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT")?;
    for sample in samples {
        write!(writer, "\t{sample}")?;
    }
    writeln!(writer)
}

/// Render a VCF header plus records into a string (tests and snapshots).
pub fn render_vcf(contigs: &ContigIndex, samples: &[String], records: &[VariantRecord]) -> String {
    let mut out = Vec::new();
    // writing into a Vec<u8> cannot fail
    let _ = write_vcf_header(&mut out, contigs, samples);
    let mut text = String::from_utf8_lossy(&out).into_owned();
    for record in records {
        text.push_str(&record.to_string());
        text.push('\n');
    }
    text
}
