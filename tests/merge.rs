use std::fs;
use std::path::{Path, PathBuf};

use basevar::genomics::{ContigIndex, COVERAGE_HEADER};
use basevar::pipeline::{merge_files, MergeStrategy, OutputMerger};

fn part(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut body = format!("{COVERAGE_HEADER}\n");
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn three_sorted_coverage_files_concatenate_with_one_header() {
    let dir = tempfile::tempdir().unwrap();
    let parts = vec![
        part(dir.path(), "part.0.cvg.tsv", &["chr1\t1\tA\t0\t0\t0\t0\t0\t.\t0\t0,0,0,0"]),
        part(dir.path(), "part.1.cvg.tsv", &["chr1\t2\tC\t0\t0\t0\t0\t0\t.\t0\t0,0,0,0"]),
        part(dir.path(), "part.2.cvg.tsv", &["chr1\t3\tG\t0\t0\t0\t0\t0\t.\t0\t0,0,0,0"]),
    ];
    let dest = dir.path().join("out.cvg.tsv");

    let summary = merge_files(&parts, &dest, true).unwrap();
    assert_eq!(summary.strategy, MergeStrategy::Concatenate);
    assert_eq!(summary.records, 3);

    let merged = fs::read_to_string(&dest).unwrap();
    let lines: Vec<&str> = merged.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], COVERAGE_HEADER);
    let positions: Vec<&str> = lines[1..].iter().map(|l| l.split('\t').nth(1).unwrap()).collect();
    assert_eq!(positions, vec!["1", "2", "3"]);
    assert!(parts.iter().all(|p| !p.exists()));
}

#[test]
fn round_robin_parts_are_interleaved_by_reference_order() {
    let dir = tempfile::tempdir().unwrap();
    // worker 0 got chr1:1-2 and chrX:1-1, worker 1 got chr1:3-4
    let parts = vec![
        part(
            dir.path(),
            "part.0.cvg.tsv",
            &["chr1\t1\tA", "chr1\t2\tC", "chrX\t1\tT"],
        ),
        part(dir.path(), "part.1.cvg.tsv", &["chr1\t3\tG", "chr1\t4\tT"]),
    ];
    let contigs = ContigIndex::new(vec![("chr1".to_string(), 10), ("chrX".to_string(), 10)]);
    let dest = dir.path().join("out.cvg.tsv");

    let summary = OutputMerger::with_contigs(&contigs)
        .merge(&parts, &dest, true)
        .unwrap();
    assert_eq!(summary.strategy, MergeStrategy::KWay);

    let merged = fs::read_to_string(&dest).unwrap();
    assert_eq!(
        merged,
        format!("{COVERAGE_HEADER}\nchr1\t1\tA\nchr1\t2\tC\nchr1\t3\tG\nchr1\t4\tT\nchrX\t1\tT\n")
    );
}

#[test]
fn vcf_meta_lines_are_kept_once_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let header = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n";
    let head = dir.path().join("header.vcf");
    fs::write(&head, header).unwrap();
    let body = dir.path().join("part.0.vcf");
    fs::write(&body, "chr1\t5\t.\tA\tG\t80\t.\tCM_DP=1\tGT:AB:SO:BP\t./1:G:+:0.999\n").unwrap();
    let empty = dir.path().join("part.1.vcf");
    fs::write(&empty, "").unwrap();
    let dest = dir.path().join("out.vcf");

    let summary = merge_files(&[head, body, empty], &dest, false).unwrap();
    assert_eq!(summary.records, 1);
    let merged = fs::read_to_string(&dest).unwrap();
    assert!(merged.starts_with(header));
    assert!(merged.ends_with("./1:G:+:0.999\n"));
}
