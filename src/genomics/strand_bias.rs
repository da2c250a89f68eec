//! Strand bias between reference and alternate observations.

use statrs::distribution::{Discrete, Hypergeometric};

use crate::genomics::basetype::{phred_from_pvalue, round_to};
use crate::genomics::{SampleBase, Strand};

/// Relative tolerance when collecting tables as extreme as the observed one.
const FISHER_TOLERANCE: f64 = 1e-7;

/// Forward/reverse counts for reference and alternate alleles, plus the
/// Phred-scaled Fisher statistic.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StrandBias {
    /// `-10 log10(p)` of the two-sided Fisher test, rounded to 3 decimals.
    pub fs: f64,
    /// Reference allele on the forward strand.
    pub ref_fwd: u32,
    /// Reference allele on the reverse strand.
    pub ref_rev: u32,
    /// Alternate alleles on the forward strand.
    pub alt_fwd: u32,
    /// Alternate alleles on the reverse strand.
    pub alt_rev: u32,
}

impl StrandBias {
    /// `ref_fwd,ref_rev,alt_fwd,alt_rev`.
    pub fn counts_field(&self) -> String {
        format!(
            "{},{},{},{}",
            self.ref_fwd, self.ref_rev, self.alt_fwd, self.alt_rev
        )
    }
}

/// Tally strands for `ref_base` and any of `alt_bases`, then run the test.
///
/// Only samples with a nucleotide base and a known strand are counted.
pub fn strand_bias(
    ref_base: u8,
    alt_bases: &[u8],
    bases: &[SampleBase],
    strands: &[Strand],
) -> StrandBias {
    let mut bias = StrandBias::default();
    for (base, strand) in bases.iter().zip(strands) {
        let SampleBase::Nucleotide(base) = base else {
            continue;
        };
        let base = base.to_ascii_uppercase();
        let slot = if base == ref_base {
            match strand {
                Strand::Forward => &mut bias.ref_fwd,
                Strand::Reverse => &mut bias.ref_rev,
                Strand::Unknown => continue,
            }
        } else if alt_bases.contains(&base) {
            match strand {
                Strand::Forward => &mut bias.alt_fwd,
                Strand::Reverse => &mut bias.alt_rev,
                Strand::Unknown => continue,
            }
        } else {
            continue;
        };
        *slot += 1;
    }

    let ref_total = bias.ref_fwd + bias.ref_rev;
    let alt_total = bias.alt_fwd + bias.alt_rev;
    if ref_total > 0 && alt_total > 0 {
        let pvalue = fisher_exact_two_sided(bias.ref_fwd, bias.ref_rev, bias.alt_fwd, bias.alt_rev);
        bias.fs = round_to(phred_from_pvalue(pvalue), 3);
    }
    bias
}

/// Two-sided Fisher exact p-value for the table `[[a, b], [c, d]]`.
///
/// Sums the probability of every table with the observed margins that is no
/// more likely than the observed one.
pub fn fisher_exact_two_sided(a: u32, b: u32, c: u32, d: u32) -> f64 {
    let population = (a + b + c + d) as u64;
    let successes = (a + c) as u64;
    let draws = (a + b) as u64;
    let Ok(dist) = Hypergeometric::new(population, successes, draws) else {
        return 1.0;
    };

    let observed = dist.pmf(a as u64);
    let threshold = observed * (1.0 + FISHER_TOLERANCE);
    let low = draws.saturating_sub(population - successes);
    let high = draws.min(successes);
    let pvalue: f64 = (low..=high)
        .map(|x| dist.pmf(x))
        .filter(|&p| p <= threshold)
        .sum();
    pvalue.min(1.0)
}
