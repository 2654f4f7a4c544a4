//! End-to-end tests driving the `kmtricks` binary over small, hand-built
//! fofs and read sets, plus a couple of corruption checks against the
//! library directly.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use kmerust::config::RunLayout;
use kmerust::kmer::Kmer;
use kmerust::merge::{read_matrix_file, MergedRow};

fn kmtricks_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_kmtricks"))
}

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
    path
}

/// Reads every partition's matrix file under `run_dir` and concatenates their
/// rows, for tests that don't care which partition a k-mer landed in.
fn all_matrix_rows(run_dir: &Path, num_partitions: u16) -> Vec<MergedRow> {
    let layout = RunLayout::new(run_dir);
    let mut rows = Vec::new();
    for p in 0..num_partitions {
        let path = layout.matrix_partition_path(p);
        if !path.exists() {
            continue;
        }
        let (partition_rows, _mode) = read_matrix_file(&path).unwrap();
        rows.extend(partition_rows);
    }
    rows
}

fn row_for(rows: &[MergedRow], kmer: &[u8]) -> Option<MergedRow> {
    let target = Kmer::from_ascii(kmer).unwrap();
    rows.iter().find(|r| r.kmer == target).cloned()
}

#[test]
fn cli_help_flag_succeeds() {
    let output = kmtricks_cmd().arg("--help").output().expect("failed to execute");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("kmtricks"));
}

#[test]
fn cli_rejects_missing_input_file() {
    let dir = tempfile::tempdir().unwrap();
    let fof = write_file(dir.path(), "reads.fof", "S1 : does-not-exist.fa\n");
    let run_dir = dir.path().join("run");

    let output = kmtricks_cmd()
        .args(["all", "-f"])
        .arg(&fof)
        .args(["-d"])
        .arg(&run_dir)
        .output()
        .expect("failed to execute");
    assert!(!output.status.success());
}

#[test]
fn cli_single_sample_counts_every_distinct_canonical_kmer() {
    let dir = tempfile::tempdir().unwrap();
    let reads = write_file(dir.path(), "reads.fa", ">r\nACGTACGTA\n");
    let fof = write_file(dir.path(), "reads.fof", &format!("S1 : {}\n", reads.display()));
    let run_dir = dir.path().join("run");

    let status = kmtricks_cmd()
        .args(["all", "-f"])
        .arg(&fof)
        .args(["-d"])
        .arg(&run_dir)
        .args(["-k", "5", "-m", "3", "--nb-partitions", "4", "-a", "1"])
        .status()
        .expect("failed to execute");
    assert!(status.success());

    let rows = all_matrix_rows(&run_dir, 4);
    // ACGTACGTA (len 9, k=5) has 5 overlapping 5-mers: ACGTA, CGTAC, GTACG,
    // TACGT, ACGTA again -> 4 distinct windows, ACGTA appearing twice.
    assert_eq!(rows.len(), 4, "expected 4 distinct canonical 5-mers, got {rows:?}");
    let acgta = row_for(&rows, b"ACGTA").expect("ACGTA row missing");
    assert_eq!(acgta.counts, vec![2]);
}

#[test]
fn cli_canonical_merge_collapses_forward_and_reverse_complement() {
    let dir = tempfile::tempdir().unwrap();
    // "AACGT" and its reverse complement "ACGTT" each contribute one
    // occurrence of the canonical 4-mers AACG and ACGT.
    let reads = write_file(dir.path(), "reads.fa", ">r1\nAACGT\n>r2\nACGTT\n");
    let fof = write_file(dir.path(), "reads.fof", &format!("S1 : {}\n", reads.display()));
    let run_dir = dir.path().join("run");

    let status = kmtricks_cmd()
        .args(["all", "-f"])
        .arg(&fof)
        .args(["-d"])
        .arg(&run_dir)
        .args(["-k", "4", "-m", "3", "--nb-partitions", "4", "-a", "1"])
        .status()
        .expect("failed to execute");
    assert!(status.success());

    let rows = all_matrix_rows(&run_dir, 4);
    let aacg = row_for(&rows, b"AACG").expect("AACG row missing");
    assert_eq!(aacg.counts, vec![2], "forward and rc occurrences should collapse onto the canonical key");
    let acgt = row_for(&rows, b"ACGT").expect("ACGT row missing");
    assert_eq!(acgt.counts, vec![2]);
}

#[test]
fn cli_r_min_filters_rows_present_in_too_few_samples() {
    let dir = tempfile::tempdir().unwrap();
    // S1: AAAAAAA (7 bases) -> 3 occurrences of AAAAA.
    // S2: AAAAA (5 bases) -> 1 occurrence of AAAAA, filtered out by -a 2.
    let s1 = write_file(dir.path(), "s1.fa", ">r\nAAAAAAA\n");
    let s2 = write_file(dir.path(), "s2.fa", ">r\nAAAAA\n");
    let fof = write_file(
        dir.path(),
        "reads.fof",
        &format!("S1 : {}\nS2 : {}\n", s1.display(), s2.display()),
    );

    let run_lenient = dir.path().join("run_r1");
    let status = kmtricks_cmd()
        .args(["all", "-f"])
        .arg(&fof)
        .args(["-d"])
        .arg(&run_lenient)
        .args(["-k", "5", "-m", "3", "--nb-partitions", "4", "-a", "2", "--r-min", "1"])
        .status()
        .expect("failed to execute");
    assert!(status.success());
    let rows = all_matrix_rows(&run_lenient, 4);
    let row = row_for(&rows, b"AAAAA").expect("AAAAA row should survive with r_min=1");
    assert_eq!(row.counts, vec![3, 0], "S2's single occurrence is below its min-count and doesn't count as present");

    let run_strict = dir.path().join("run_r2");
    let status = kmtricks_cmd()
        .args(["all", "-f"])
        .arg(&fof)
        .args(["-d"])
        .arg(&run_strict)
        .args(["-k", "5", "-m", "3", "--nb-partitions", "4", "-a", "2", "--r-min", "2"])
        .status()
        .expect("failed to execute");
    assert!(status.success());
    let rows = all_matrix_rows(&run_strict, 4);
    assert!(row_for(&rows, b"AAAAA").is_none(), "r_min=2 should drop a k-mer present in only one sample");
}

#[test]
fn cli_hash_mode_bloom_stripe_runs_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let reads = write_file(dir.path(), "reads.fa", ">r\nAAAAAAAAA\n");
    let fof = write_file(dir.path(), "reads.fof", &format!("S1 : {}\n", reads.display()));
    let run_dir = dir.path().join("run");

    let status = kmtricks_cmd()
        .args(["all", "-f"])
        .arg(&fof)
        .args(["-d"])
        .arg(&run_dir)
        .args([
            "-k", "5", "-m", "3", "--nb-partitions", "4", "-a", "1",
            "--mode", "hash", "--format", "bloom-stripe",
        ])
        .status()
        .expect("failed to execute");
    assert!(status.success());

    let layout = RunLayout::new(&run_dir);
    let any_matrix_exists = (0..4).any(|p| layout.matrix_partition_path(p).exists());
    assert!(any_matrix_exists, "at least one partition should have produced a hash-keyed matrix file");
}

#[test]
fn cli_stagewise_run_matches_single_all_run() {
    let dir = tempfile::tempdir().unwrap();
    let reads = write_file(dir.path(), "reads.fa", ">r\nACGTACGTACGTACGTACGT\n");
    let fof = write_file(dir.path(), "reads.fof", &format!("S1 : {}\n", reads.display()));

    let run_all = dir.path().join("run_all");
    let common_args = ["-k", "6", "-m", "3", "--nb-partitions", "4", "-a", "1"];

    let status = kmtricks_cmd()
        .args(["all", "-f"])
        .arg(&fof)
        .args(["-d"])
        .arg(&run_all)
        .args(common_args)
        .status()
        .expect("failed to execute");
    assert!(status.success());

    let run_staged = dir.path().join("run_staged");
    for stage in ["superk", "count", "merge"] {
        let status = kmtricks_cmd()
            .args([stage, "-f"])
            .arg(&fof)
            .args(["-d"])
            .arg(&run_staged)
            .args(common_args)
            .status()
            .expect("failed to execute");
        assert!(status.success(), "stage {stage} failed");
    }

    let rows_all = all_matrix_rows(&run_all, 4);
    let rows_staged = all_matrix_rows(&run_staged, 4);
    assert_eq!(rows_all, rows_staged, "running stage-by-stage should match a single `all` run");
}

#[test]
fn cli_resume_skips_completed_superk_step() {
    let dir = tempfile::tempdir().unwrap();
    let s1 = write_file(dir.path(), "s1.fa", ">r\nACGTACGTACGT\n");
    let s2 = write_file(dir.path(), "s2.fa", ">r\nTTGGCCAATTGG\n");
    let fof = write_file(
        dir.path(),
        "reads.fof",
        &format!("S1 : {}\nS2 : {}\n", s1.display(), s2.display()),
    );
    let run_dir = dir.path().join("run");
    let common_args = ["-k", "6", "-m", "3", "--nb-partitions", "4", "-a", "1"];

    // Only build the super-k-mer partitions for both samples first.
    let status = kmtricks_cmd()
        .args(["superk", "-f"])
        .arg(&fof)
        .args(["-d"])
        .arg(&run_dir)
        .args(common_args)
        .status()
        .expect("failed to execute");
    assert!(status.success());

    let layout = RunLayout::new(&run_dir);
    let s1_superk_mtime = |sample: &str| {
        let dir = layout.superkmer_dir(sample);
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.metadata().unwrap().modified().unwrap())
            .max()
    };
    let before = s1_superk_mtime("S1");

    // Re-running `all` should skip the already-done superk step for both
    // samples and carry the pipeline through to a completed merge.
    let status = kmtricks_cmd()
        .args(["all", "-f"])
        .arg(&fof)
        .args(["-d"])
        .arg(&run_dir)
        .args(common_args)
        .status()
        .expect("failed to execute");
    assert!(status.success());

    let after = s1_superk_mtime("S1");
    assert_eq!(before, after, "a completed superk step should not be redone on resume");

    let rows = all_matrix_rows(&run_dir, 4);
    assert!(!rows.is_empty(), "resumed run should still reach a completed merge");
}

#[test]
fn cli_infos_reports_resolved_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let reads = write_file(dir.path(), "reads.fa", ">r\nACGTACGTACGT\n");
    let fof = write_file(dir.path(), "reads.fof", &format!("S1 : {}\n", reads.display()));
    let run_dir = dir.path().join("run");

    let status = kmtricks_cmd()
        .args(["all", "-f"])
        .arg(&fof)
        .args(["-d"])
        .arg(&run_dir)
        .args(["-k", "6", "-m", "3", "--nb-partitions", "4", "-a", "1"])
        .status()
        .expect("failed to execute");
    assert!(status.success());

    let output = kmtricks_cmd()
        .args(["infos", "-d"])
        .arg(&run_dir)
        .output()
        .expect("failed to execute");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("k=6"));
    assert!(stdout.contains("partitions merged"));
}

#[test]
fn read_counted_file_rejects_corrupted_mode_tag() {
    use kmerust::counter::read_counted_file;
    use kmerust::framed::{write_framed, ArtifactKind};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partition_0.kmer");
    // Mode tag 0xFF is not MODE_KMER/MODE_HASH/MODE_BLOOM, so the reader's
    // catch-all arm should reject the frame instead of misreading it.
    let frame = [0xFFu8, 1, 2, 3, 4];
    write_framed(&path, ArtifactKind::Count, std::iter::once(&frame[..]), true).unwrap();

    let err = read_counted_file(&path);
    assert!(err.is_err(), "a corrupted counted file should not silently decode");
}
