use std::collections::BTreeMap;

use crate::genomics::basetype::round_to;
use crate::genomics::vcf::{format_frequency, sample_field};
use crate::genomics::{
    base_index, strand_bias, BaseType, BatchRecord, CallerParams, CoverageRecord, SampleBase,
    Strand, VariantRecord, BASES,
};

/// Output of calling one position.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteCall {
    /// Coverage line, always produced.
    pub coverage: CoverageRecord,
    /// VCF line when VCF output is enabled and an alternate was called.
    pub variant: Option<VariantRecord>,
}

/// Turns sample-wide batch records into coverage and VCF records.
#[derive(Debug, Clone, Copy)]
pub struct SiteCaller {
    params: CallerParams,
    emit_vcf: bool,
}

impl SiteCaller {
    /// Caller with the given thresholds; `emit_vcf = false` skips the model.
    pub fn new(params: CallerParams, emit_vcf: bool) -> Self {
        Self { params, emit_vcf }
    }

    /// Thresholds in use.
    pub fn params(&self) -> &CallerParams {
        &self.params
    }

    /// Call one position.
    pub fn call(&self, record: &BatchRecord) -> SiteCall {
        let ref_base = record.ref_base.to_ascii_uppercase();
        let bases: Vec<SampleBase> = record.entries.iter().map(|entry| entry.base()).collect();
        let strands: Vec<Strand> = record.entries.iter().map(|entry| entry.strand()).collect();

        let coverage = coverage_record(record, ref_base, &bases, &strands);
        let variant = if self.emit_vcf {
            let qualities: Vec<u8> = record.entries.iter().map(|entry| entry.quality()).collect();
            self.variant_record(record, ref_base, &bases, &strands, &qualities)
        } else {
            None
        };

        SiteCall { coverage, variant }
    }

    fn variant_record(
        &self,
        record: &BatchRecord,
        ref_base: u8,
        bases: &[SampleBase],
        strands: &[Strand],
        qualities: &[u8],
    ) -> Option<VariantRecord> {
        let mut model = BaseType::new(ref_base, bases, qualities, self.params);
        if !model.lrt() {
            return None;
        }
        let alts = model.alt_bases().to_vec();

        let samples = bases
            .iter()
            .zip(strands)
            .zip(model.qual_pvalue())
            .map(|((base, &strand), &pvalue)| sample_field(base, strand, pvalue, ref_base, &alts))
            .collect();

        let bias = strand_bias(ref_base, &alts, bases, strands);
        let joined = |values: Vec<String>| values.join(",");
        let mut info = BTreeMap::new();
        info.insert(
            "CM_AC",
            joined(alts.iter().map(|&b| model.depth(b).to_string()).collect()),
        );
        info.insert(
            "CM_AF",
            joined(alts.iter().map(|&b| format_frequency(model.af(b))).collect()),
        );
        info.insert("CM_DP", model.total_depth().to_string());
        info.insert(
            "CM_EAF",
            joined(alts.iter().map(|&b| round_to(model.eaf(b), 6).to_string()).collect()),
        );
        info.insert("FS", bias.fs.to_string());
        info.insert("SB_REF", format!("{},{}", bias.ref_fwd, bias.ref_rev));
        info.insert("SB_ALT", format!("{},{}", bias.alt_fwd, bias.alt_rev));

        let var_qual = model.var_qual();
        Some(VariantRecord {
            chrom: record.chrom.clone(),
            position: record.position,
            ref_base,
            alt_bases: alts,
            var_qual,
            low_qual: var_qual <= self.params.low_qual,
            info,
            samples,
        })
    }
}

fn coverage_record(
    record: &BatchRecord,
    ref_base: u8,
    bases: &[SampleBase],
    strands: &[Strand],
) -> CoverageRecord {
    let mut depth = [0u32; 4];
    let mut indels = BTreeMap::new();
    for base in bases {
        if let Some(idx) = base.canonical().and_then(base_index) {
            depth[idx] += 1;
        } else if base.is_indel() {
            *indels.entry(base.to_string()).or_insert(0) += 1;
        }
    }

    // most supported non-reference base; earlier base wins ties
    let alt = BASES
        .iter()
        .zip(depth)
        .filter(|(base, _)| **base != ref_base)
        .fold(None::<(u8, u32)>, |best, (&base, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((base, count)),
        })
        .map(|(base, _)| base);

    let strand_bias = match alt {
        Some(alt) if !bases.is_empty() => strand_bias(ref_base, &[alt], bases, strands),
        _ => Default::default(),
    };

    CoverageRecord {
        chrom: record.chrom.clone(),
        position: record.position,
        ref_base,
        depth,
        indels,
        strand_bias,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::BatchEntry;

    fn entry(base: &str, quality: u8, strand: Strand) -> BatchEntry {
        BatchEntry::Observed {
            base: SampleBase::parse(base).unwrap(),
            quality,
            strand,
        }
    }

    fn record(ref_base: u8, entries: Vec<BatchEntry>) -> BatchRecord {
        BatchRecord {
            chrom: "chr1".to_string(),
            position: 100,
            ref_base,
            entries,
        }
    }

    #[test]
    fn biallelic_site_produces_vcf_line() {
        let entries = vec![
            entry("A", 30, Strand::Forward),
            entry("A", 30, Strand::Forward),
            entry("G", 30, Strand::Reverse),
            entry("G", 30, Strand::Reverse),
            entry("N", 0, Strand::Unknown),
        ];
        let caller = SiteCaller::new(CallerParams::with_sample_count(5), true);
        let call = caller.call(&record(b'A', entries));

        assert_eq!(call.coverage.depth, [2, 0, 2, 0]);
        assert_eq!(call.coverage.total_depth(), 4);
        let variant = call.variant.expect("variant");
        assert_eq!(variant.alt_bases, b"G");
        assert_eq!(variant.info["CM_AC"], "2");
        assert_eq!(variant.info["CM_AF"], "0.500000");
        assert_eq!(variant.info["CM_DP"], "4");
        assert_eq!(variant.info["SB_REF"], "2,0");
        assert_eq!(variant.info["SB_ALT"], "0,2");
        assert_eq!(variant.samples[0], "0/.:A:+:0.999");
        assert_eq!(variant.samples[2], "./1:G:-:0.999");
        assert_eq!(variant.samples[4], "./.");
    }

    #[test]
    fn missing_sources_produce_zero_coverage_and_no_call() {
        let entries = vec![BatchEntry::NoSource; 4];
        let caller = SiteCaller::new(CallerParams::default(), true);
        let call = caller.call(&record(b'T', entries));
        assert_eq!(call.coverage.total_depth(), 0);
        assert_eq!(call.coverage.to_string(), "chr1\t100\tT\t0\t0\t0\t0\t0\t.\t0\t0,0,0,0");
        assert!(call.variant.is_none());
    }

    #[test]
    fn coverage_only_mode_skips_the_model() {
        let entries = vec![
            entry("C", 30, Strand::Forward),
            entry("T", 30, Strand::Reverse),
            entry("+GA", 0, Strand::Forward),
        ];
        let caller = SiteCaller::new(CallerParams::default(), false);
        let call = caller.call(&record(b'C', entries));
        assert!(call.variant.is_none());
        assert_eq!(call.coverage.indels.get("+GA"), Some(&1));
        assert_eq!(call.coverage.strand_bias.counts_field(), "1,0,0,1");
    }
}
