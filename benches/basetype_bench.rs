//! BaseType model and site calling benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use basevar::genomics::{
    BaseType, BatchEntry, BatchRecord, CallerParams, SampleBase, SiteCaller, Strand,
};

fn cohort(samples: usize) -> (Vec<SampleBase>, Vec<u8>, Vec<Strand>) {
    let pattern = b"AAAAAAAGATAAAANAAAAC";
    let bases = (0..samples)
        .map(|i| SampleBase::Nucleotide(pattern[i % pattern.len()]))
        .collect();
    let quals = (0..samples).map(|i| 15 + (i % 25) as u8).collect();
    let strands = (0..samples)
        .map(|i| if i % 2 == 0 { Strand::Forward } else { Strand::Reverse })
        .collect();
    (bases, quals, strands)
}

fn benchmark_basetype(c: &mut Criterion) {
    let mut group = c.benchmark_group("basetype_lrt");
    for samples in [100usize, 1_000, 10_000] {
        let (bases, quals, _) = cohort(samples);
        let params = CallerParams::with_sample_count(samples);
        group.bench_with_input(BenchmarkId::from_parameter(samples), &samples, |b, _| {
            b.iter(|| {
                let mut model = BaseType::new(b'A', black_box(&bases), black_box(&quals), params);
                black_box(model.lrt());
            });
        });
    }
    group.finish();
}

fn benchmark_site_call(c: &mut Criterion) {
    let samples = 2_000;
    let (bases, quals, strands) = cohort(samples);
    let record = BatchRecord {
        chrom: "chr20".to_string(),
        position: 1_000_000,
        ref_base: b'A',
        entries: bases
            .into_iter()
            .zip(quals)
            .zip(strands)
            .map(|((base, quality), strand)| BatchEntry::Observed {
                base,
                quality,
                strand,
            })
            .collect(),
    };
    let caller = SiteCaller::new(CallerParams::with_sample_count(samples), true);

    c.bench_function("site_call_2000_samples", |b| {
        b.iter(|| black_box(caller.call(black_box(&record))));
    });
}

criterion_group!(benches, benchmark_basetype, benchmark_site_call);
criterion_main!(benches);
