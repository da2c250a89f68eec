//! Population allele-frequency model for one position.
//!
//! Each sample contributes one base and its Phred quality. Allele
//! frequencies are fitted by EM over quality-weighted likelihoods, and a
//! backward likelihood-ratio elimination decides which alleles the
//! population actually carries.

use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::genomics::{base_index, SampleBase, BASES};

/// Probability floor applied before taking logarithms.
pub const PROB_FLOOR: f64 = 1e-300;

/// Cap for Phred scores whose p-value underflows.
pub const MAX_PHRED: f64 = 10_000.0;

/// Thresholds and iteration limits of the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallerParams {
    /// Minimum EM frequency for an allele to enter the candidate set.
    pub min_af: f64,
    /// Sites with `var_qual` at or below this are flagged `LowQual`.
    pub low_qual: f64,
    /// Chi-square statistic needed to keep an allele during elimination.
    pub lrt_threshold: f64,
    /// EM iteration cap.
    pub max_iterations: usize,
    /// EM convergence tolerance on summed absolute frequency change.
    pub tolerance: f64,
}

impl Default for CallerParams {
    fn default() -> Self {
        Self {
            min_af: 0.001,
            low_qual: 60.0,
            lrt_threshold: 24.0,
            max_iterations: 100,
            tolerance: 1e-3,
        }
    }
}

impl CallerParams {
    /// Defaults with `min_af = min(0.001, 100 / sample_count)`.
    pub fn with_sample_count(sample_count: usize) -> Self {
        Self {
            min_af: default_min_af(sample_count),
            ..Self::default()
        }
    }
}

/// `min(0.001, 100 / sample_count)`.
pub fn default_min_af(sample_count: usize) -> f64 {
    if sample_count == 0 {
        return 0.001;
    }
    (100.0 / sample_count as f64).min(0.001)
}

/// Phred quality to error probability.
pub fn phred_to_error(quality: u8) -> f64 {
    10f64.powf(-(quality as f64) / 10.0)
}

/// Survival function of a 1-degree-of-freedom chi-square, scaled to Phred.
pub fn chi2_phred(statistic: f64) -> f64 {
    if statistic.is_nan() || statistic <= 0.0 {
        return 0.0;
    }
    let pvalue = ChiSquared::new(1.0)
        .map(|dist| dist.sf(statistic))
        .unwrap_or(0.0);
    phred_from_pvalue(pvalue)
}

/// `-10 log10(p)`, capped at [`MAX_PHRED`].
pub fn phred_from_pvalue(pvalue: f64) -> f64 {
    if pvalue <= 0.0 {
        return MAX_PHRED;
    }
    if pvalue >= 1.0 {
        return 0.0;
    }
    let score = -10.0 * pvalue.log10();
    if score.is_finite() {
        score.clamp(0.0, MAX_PHRED)
    } else {
        MAX_PHRED
    }
}

/// Round to `digits` decimal places.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

#[derive(Debug, Clone, Copy)]
struct Informative {
    allele: usize,
    error: f64,
}

impl Informative {
    fn likelihood(&self, allele: usize) -> f64 {
        let raw = if allele == self.allele {
            1.0 - self.error
        } else {
            self.error / 3.0
        };
        raw.max(PROB_FLOOR)
    }
}

/// Outcome of one EM fit.
#[derive(Debug, Clone, Copy)]
struct Fit {
    log_likelihood: f64,
    freqs: [f64; 4],
}

/// BaseType model over one position.
#[derive(Debug, Clone)]
pub struct BaseType {
    ref_base: u8,
    informative: Vec<Informative>,
    qual_pvalue: Vec<f64>,
    depth: [u32; 4],
    eaf: [f64; 4],
    alt_bases: Vec<u8>,
    var_qual: f64,
    params: CallerParams,
}

impl BaseType {
    /// Prepare the model; call [`lrt`](Self::lrt) to fit it.
    ///
    /// Only samples whose base is one of `A C G T` are informative; `N`,
    /// missing sources and indel alleles are ignored.
    pub fn new(ref_base: u8, bases: &[SampleBase], qualities: &[u8], params: CallerParams) -> Self {
        let mut depth = [0u32; 4];
        let mut informative = Vec::with_capacity(bases.len());
        for (base, &quality) in bases.iter().zip(qualities) {
            if let Some(allele) = base.canonical().and_then(base_index) {
                depth[allele] += 1;
                informative.push(Informative {
                    allele,
                    error: phred_to_error(quality),
                });
            }
        }
        let qual_pvalue = qualities
            .iter()
            .map(|&quality| 1.0 - phred_to_error(quality))
            .collect();

        Self {
            ref_base: ref_base.to_ascii_uppercase(),
            informative,
            qual_pvalue,
            depth,
            eaf: [0.0; 4],
            alt_bases: Vec::new(),
            var_qual: 0.0,
            params,
        }
    }

    /// Depth of one of `A C G T`; 0 for anything else.
    pub fn depth(&self, base: u8) -> u32 {
        base_index(base).map(|idx| self.depth[idx]).unwrap_or(0)
    }

    /// Number of informative samples.
    pub fn total_depth(&self) -> u32 {
        self.depth.iter().sum()
    }

    /// `depth / total_depth`, 0 at zero depth.
    pub fn af(&self, base: u8) -> f64 {
        let total = self.total_depth();
        if total == 0 {
            return 0.0;
        }
        self.depth(base) as f64 / total as f64
    }

    /// EM-estimated allele frequency from the full four-allele model.
    pub fn eaf(&self, base: u8) -> f64 {
        base_index(base).map(|idx| self.eaf[idx]).unwrap_or(0.0)
    }

    /// Per-sample `1 - 10^(-q/10)`, in sample order.
    pub fn qual_pvalue(&self) -> &[f64] {
        &self.qual_pvalue
    }

    /// Reference base this model was built for.
    pub fn ref_base(&self) -> u8 {
        self.ref_base
    }

    /// Called alternate alleles, by descending depth then base.
    pub fn alt_bases(&self) -> &[u8] {
        &self.alt_bases
    }

    /// Phred-scaled variant quality, 0 when nothing is called.
    pub fn var_qual(&self) -> f64 {
        self.var_qual
    }

    /// Whether any alternate allele was called.
    pub fn is_variant(&self) -> bool {
        !self.alt_bases.is_empty()
    }

    /// Fit frequencies, run the elimination and score the site.
    ///
    /// Returns whether a variant was called. Sites with zero depth or a
    /// non-`ACGT` reference base are never called.
    pub fn lrt(&mut self) -> bool {
        self.alt_bases.clear();
        self.var_qual = 0.0;
        let Some(ref_idx) = base_index(self.ref_base) else {
            return false;
        };
        if self.informative.is_empty() {
            return false;
        }

        let full = self.em(&[0, 1, 2, 3]);
        self.eaf = full.freqs;

        let mut combo: Vec<usize> = (0..4)
            .filter(|&idx| self.depth[idx] > 0 && full.freqs[idx] >= self.params.min_af)
            .collect();
        if combo.is_empty() {
            return false;
        }
        let mut fit = self.em(&combo);

        while combo.len() > 1 {
            let weakest = combo
                .iter()
                .map(|&drop| {
                    let sub: Vec<usize> = combo.iter().copied().filter(|&idx| idx != drop).collect();
                    let sub_fit = self.em(&sub);
                    let chi = 2.0 * (fit.log_likelihood - sub_fit.log_likelihood);
                    (chi, sub, sub_fit)
                })
                .min_by(|a, b| a.0.total_cmp(&b.0));
            match weakest {
                Some((chi, sub, sub_fit)) if chi < self.params.lrt_threshold => {
                    combo = sub;
                    fit = sub_fit;
                }
                _ => break,
            }
        }

        let mut alts: Vec<usize> = combo.into_iter().filter(|&idx| idx != ref_idx).collect();
        if alts.is_empty() {
            return false;
        }
        alts.sort_by(|&a, &b| self.depth[b].cmp(&self.depth[a]).then(a.cmp(&b)));
        self.alt_bases = alts.into_iter().map(|idx| BASES[idx]).collect();

        let ref_only: f64 = self
            .informative
            .iter()
            .map(|sample| sample.likelihood(ref_idx).ln())
            .sum();
        let chi = 2.0 * (fit.log_likelihood - ref_only);
        self.var_qual = round_to(chi2_phred(chi), 2);
        true
    }

    fn log_likelihood(&self, freqs: &[f64; 4], active: &[usize]) -> f64 {
        self.informative
            .iter()
            .map(|sample| {
                let marginal: f64 = active
                    .iter()
                    .map(|&allele| freqs[allele] * sample.likelihood(allele))
                    .sum();
                marginal.max(PROB_FLOOR).ln()
            })
            .sum()
    }

    fn em(&self, active: &[usize]) -> Fit {
        let mut freqs = [0.0; 4];
        let active_depth: u32 = active.iter().map(|&idx| self.depth[idx]).sum();
        for &idx in active {
            freqs[idx] = if active_depth > 0 {
                self.depth[idx] as f64 / active_depth as f64
            } else {
                1.0 / active.len() as f64
            };
        }

        let n = self.informative.len() as f64;
        let mut weights = [0.0; 4];
        for _ in 0..self.params.max_iterations {
            let mut next = [0.0; 4];
            for sample in &self.informative {
                let weights = &mut weights[..active.len()];
                for (weight, &allele) in weights.iter_mut().zip(active) {
                    *weight = freqs[allele] * sample.likelihood(allele);
                }
                let marginal = weights.iter().sum::<f64>().max(PROB_FLOOR);
                for (&allele, weight) in active.iter().zip(weights.iter()) {
                    next[allele] += weight / marginal;
                }
            }
            next.iter_mut().for_each(|freq| *freq /= n);

            let change: f64 = freqs.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
            freqs = next;
            if change < self.params.tolerance {
                break;
            }
        }

        Fit {
            log_likelihood: self.log_likelihood(&freqs, active),
            freqs,
        }
    }
}
