use basevar::genomics::GenomicRegion;
use basevar::pipeline::partition_regions;
use proptest::prelude::*;

fn regions_strategy() -> impl Strategy<Value = Vec<GenomicRegion>> {
    prop::collection::vec((1u32..5_000, 1u32..2_000), 1..12).prop_map(|spans| {
        let mut start = 1;
        spans
            .into_iter()
            .map(|(gap, len)| {
                let region = GenomicRegion::new("chr1", start + gap, start + gap + len - 1)
                    .expect("valid bounds");
                start = region.end + 1;
                region
            })
            .collect()
    })
}

fn covered(regions: &[GenomicRegion]) -> Vec<(u32, u32)> {
    let mut spans: Vec<(u32, u32)> = regions.iter().map(|r| (r.start, r.end)).collect();
    spans.sort_unstable();
    // stitch adjacent pieces back together
    let mut merged: Vec<(u32, u32)> = Vec::new();
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if last.1 + 1 == start => last.1 = end,
            _ => merged.push((start, end)),
        }
    }
    merged
}

proptest! {
    #[test]
    fn shares_cover_every_position_exactly_once(
        regions in regions_strategy(),
        workers in 1usize..10,
    ) {
        let shares = partition_regions(&regions, workers);
        prop_assert_eq!(shares.len(), workers);

        let pieces: Vec<GenomicRegion> = shares.iter().flatten().cloned().collect();
        let total: u64 = pieces.iter().map(|r| r.len() as u64).sum();
        let expected: u64 = regions.iter().map(|r| r.len() as u64).sum();
        prop_assert_eq!(total, expected);
        prop_assert_eq!(covered(&pieces), covered(&regions));
    }

    #[test]
    fn each_share_is_position_ordered(
        regions in regions_strategy(),
        workers in 1usize..10,
    ) {
        for share in partition_regions(&regions, workers) {
            for pair in share.windows(2) {
                prop_assert!(pair[0].end < pair[1].start);
            }
        }
    }

    #[test]
    fn no_share_is_empty_once_the_span_reaches_the_worker_count(
        regions in regions_strategy(),
        workers in 1usize..10,
    ) {
        let total: u64 = regions.iter().map(|r| r.len() as u64).sum();
        prop_assume!(total >= workers as u64);
        for share in partition_regions(&regions, workers) {
            prop_assert!(!share.is_empty());
        }
    }
}
