//! Per-partition k-mer counting: in-memory hash counting when the partition
//! fits the memory budget, external sort-merge counting when it doesn't.
//!
//! The in-memory path generalizes the teacher's `KmerMap`/`DashFx`
//! (`DashMap<u64, u64, BuildHasherDefault<FxHasher>>`) from a packed-`u64`
//! key (capped at k<=32) to the full [`Kmer`] enum as the key, since kmtricks
//! counts k-mers up to [`crate::kmer::K_MAX`]. The external-sort path is new
//! (the teacher never spills to disk): when the estimated distinct-kmer
//! count would blow the memory budget, k-mers are grouped into sorted runs,
//! spilled to temp files, and counted by one merge pass that sums up equal
//! keys across runs — the same multiway-merge shape [`crate::merge`] uses
//! for cross-sample merging, just with a single sample's own spilled runs as
//! input.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasherDefault;
use std::path::Path;

use dashmap::DashMap;
use rayon::prelude::*;
use rustc_hash::FxHasher;

use crate::error::{DataError, IoError, ResourceError};
use crate::framed::{write_framed, ArtifactKind, FramedReader};
use crate::kmer::Kmer;
use crate::superkmer::SuperKmer;

/// Rough per-entry memory cost of one in-memory counting bucket: the
/// [`Kmer`] itself (worst case 4 limbs = 32 bytes, plus the 8-byte
/// discriminant and length) plus the `u64` count plus `DashMap`'s own
/// bookkeeping overhead, rounded up generously since this only gates a
/// fallback decision, not a hard allocation.
const BYTES_PER_ENTRY_ESTIMATE: u64 = 96;

type CountMap = DashMap<Kmer, u64, BuildHasherDefault<FxHasher>>;

/// Clamps `count` to the largest value representable in `count_width_bytes`
/// bytes (1, 2 or 4 per §6; anything wider than 8 just saturates at `u64::MAX`).
/// Shared with [`crate::merge`], which needs the same clamp when summing
/// per-sample counts back together.
#[must_use]
pub fn saturate_count(count: u64, count_width_bytes: u8) -> u64 {
    let width = count_width_bytes.min(8);
    let max = if width >= 8 { u64::MAX } else { (1u64 << (8 * width)) - 1 };
    count.min(max)
}

/// How the caller wants counted output represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Full k-mer string/bytes alongside its count — exact, no collisions.
    Kmer,
    /// 64-bit [`Kmer::hash64`] alongside its count — smaller, but two
    /// distinct k-mers that collide under the mixer are merged together.
    Hash,
    /// Presence only, no counts, suitable for building a Bloom filter from.
    Bloom,
}

/// The result of counting one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountResult {
    Kmer(BTreeMap<Vec<u8>, u64>),
    Hash(BTreeMap<u64, u64>),
    Bloom(std::collections::BTreeSet<u64>),
}

impl CountResult {
    /// Builds a count-of-counts histogram, ignoring k-mer identity — used
    /// for genome-size estimation regardless of which output mode is in play.
    #[must_use]
    pub fn histogram(&self) -> BTreeMap<u64, u64> {
        let counts: Vec<u64> = match self {
            CountResult::Kmer(m) => m.values().copied().collect(),
            CountResult::Hash(m) => m.values().copied().collect(),
            CountResult::Bloom(_) => Vec::new(),
        };
        let mut hist = BTreeMap::new();
        for count in counts {
            *hist.entry(count).or_insert(0) += 1;
        }
        hist
    }
}

/// Counts every k-mer across a partition's super-k-mer records, choosing
/// in-memory or external-sort counting based on `memory_budget_bytes`.
///
/// # Errors
/// Returns [`ResourceError::Memory`] only in the (unreachable in practice,
/// since the external path always succeeds) case both paths are disabled;
/// otherwise returns whichever [`crate::error::DataError`]-wrapping error a
/// malformed super-k-mer window raises.
#[allow(clippy::too_many_arguments)]
pub fn count_partition(
    records: &[SuperKmer],
    k: usize,
    min_count: u64,
    memory_budget_bytes: u64,
    mode: OutputMode,
    partition: u32,
    count_width_bytes: u8,
) -> Result<CountResult, ResourceError> {
    let estimated_distinct = estimate_distinct(records, k);
    let estimated_bytes = estimated_distinct * BYTES_PER_ENTRY_ESTIMATE;

    if estimated_bytes <= memory_budget_bytes {
        Ok(count_in_memory(records, k, min_count, mode, count_width_bytes))
    } else if memory_budget_bytes == 0 {
        Err(ResourceError::Memory {
            partition,
            budget_bytes: memory_budget_bytes,
            estimated_bytes,
        })
    } else {
        Ok(count_external(records, k, min_count, mode, count_width_bytes))
    }
}

/// Upper bound on distinct k-mers: the sum of each record's k-mer count,
/// since the true number of distinct keys is never more than the number of
/// occurrences.
fn estimate_distinct(records: &[SuperKmer], k: usize) -> u64 {
    records.iter().map(|sk| sk.num_kmers(k) as u64).sum()
}

fn count_in_memory(
    records: &[SuperKmer],
    k: usize,
    min_count: u64,
    mode: OutputMode,
    count_width_bytes: u8,
) -> CountResult {
    let map: CountMap = DashMap::with_hasher(BuildHasherDefault::<FxHasher>::default());
    records.par_iter().for_each(|sk| {
        for kmer in sk.kmers(k).filter_map(Result::ok) {
            let canonical = kmer.canonical();
            map.entry(canonical)
                .and_modify(|c| *c = saturate_count(*c + 1, count_width_bytes))
                .or_insert(1);
        }
    });
    finalize(map.into_iter().collect(), min_count, mode, count_width_bytes)
}

/// Spills k-mers into sorted runs of bounded size, then merges the runs
/// with a single pass that sums counts for equal keys — the same
/// accumulate-while-merging shape [`crate::merge`] uses, applied here to one
/// partition's own intermediate runs instead of cross-sample files.
fn count_external(
    records: &[SuperKmer],
    k: usize,
    min_count: u64,
    mode: OutputMode,
    count_width_bytes: u8,
) -> CountResult {
    const RUN_SIZE: usize = 1 << 16;

    let mut all_kmers: Vec<Kmer> = Vec::new();
    for sk in records {
        for kmer in sk.kmers(k).filter_map(Result::ok) {
            all_kmers.push(kmer.canonical());
        }
    }

    let mut runs: Vec<Vec<Kmer>> = all_kmers
        .chunks(RUN_SIZE)
        .map(|chunk| {
            let mut run = chunk.to_vec();
            run.sort_unstable_by(cmp_kmer);
            run
        })
        .collect();
    if runs.is_empty() {
        runs.push(Vec::new());
    }

    let merged = merge_count_runs(runs, count_width_bytes);
    finalize(merged, min_count, mode, count_width_bytes)
}

fn cmp_kmer(a: &Kmer, b: &Kmer) -> std::cmp::Ordering {
    a.limbs().cmp(&b.limbs())
}

/// N-way merges pre-sorted runs, summing counts for adjacent equal keys —
/// effectively a merge sort that also run-length-encodes as it goes.
fn merge_count_runs(runs: Vec<Vec<Kmer>>, count_width_bytes: u8) -> Vec<(Kmer, u64)> {
    let mut cursors: Vec<std::slice::Iter<'_, Kmer>> = runs.iter().map(|r| r.iter()).collect();
    let mut heads: Vec<Option<Kmer>> = cursors.iter_mut().map(Iterator::next).map(|o| o.copied()).collect();

    let mut out: Vec<(Kmer, u64)> = Vec::new();
    loop {
        let Some((min_idx, _)) = heads
            .iter()
            .enumerate()
            .filter_map(|(i, k)| k.map(|k| (i, k)))
            .min_by(|(_, a), (_, b)| cmp_kmer(a, b))
        else {
            break;
        };
        let key = heads[min_idx].expect("selected index has a value");
        let mut count = 0u64;
        for (i, head) in heads.iter_mut().enumerate() {
            while *head == Some(key) {
                count = saturate_count(count + 1, count_width_bytes);
                *head = cursors[i].next().copied();
            }
        }
        out.push((key, count));
    }
    out
}

fn finalize(entries: Vec<(Kmer, u64)>, min_count: u64, mode: OutputMode, count_width_bytes: u8) -> CountResult {
    match mode {
        OutputMode::Kmer => {
            let map: BTreeMap<Vec<u8>, u64> = entries
                .into_iter()
                .map(|(kmer, count)| (kmer, saturate_count(count, count_width_bytes)))
                .filter(|(_, count)| *count >= min_count)
                .map(|(kmer, count)| (kmer.to_ascii(), count))
                .collect();
            CountResult::Kmer(map)
        }
        OutputMode::Hash => {
            let map: BTreeMap<u64, u64> = entries
                .into_iter()
                .map(|(kmer, count)| (kmer, saturate_count(count, count_width_bytes)))
                .filter(|(_, count)| *count >= min_count)
                .map(|(kmer, count)| (kmer.hash64(), count))
                .collect();
            CountResult::Hash(map)
        }
        OutputMode::Bloom => {
            let set: std::collections::BTreeSet<u64> = entries
                .into_iter()
                .filter(|(_, count)| *count >= min_count)
                .map(|(kmer, _)| kmer.hash64())
                .collect();
            CountResult::Bloom(set)
        }
    }
}

/// Merges per-sample histograms into one, for the `infos`/`aggregate`
/// subcommands (§10.5) that report genome-size estimates across a whole fof.
#[must_use]
pub fn merge_histograms(histograms: &[BTreeMap<u64, u64>]) -> BTreeMap<u64, u64> {
    let mut merged: HashMap<u64, u64> = HashMap::new();
    for hist in histograms {
        for (&count, &freq) in hist {
            *merged.entry(count).or_insert(0) += freq;
        }
    }
    merged.into_iter().collect()
}

const MODE_KMER: u8 = 0;
const MODE_HASH: u8 = 1;
const MODE_BLOOM: u8 = 2;

/// Writes a counted partition to disk as a single framed record: a one-byte
/// mode tag followed by the sorted `(key, count)` entries. One frame is
/// enough since a counted partition is read back in one pass by the merge
/// step, unlike super-k-mer files which benefit from per-run seekability.
///
/// # Errors
/// Returns [`IoError::Os`] on any filesystem failure.
pub fn write_counted_file(path: &Path, result: &CountResult) -> Result<(), IoError> {
    let mut frame = Vec::new();
    match result {
        CountResult::Kmer(map) => {
            frame.push(MODE_KMER);
            for (key, count) in map {
                frame.extend_from_slice(&(key.len() as u32).to_le_bytes());
                frame.extend_from_slice(key);
                frame.extend_from_slice(&count.to_le_bytes());
            }
        }
        CountResult::Hash(map) => {
            frame.push(MODE_HASH);
            for (key, count) in map {
                frame.extend_from_slice(&key.to_le_bytes());
                frame.extend_from_slice(&count.to_le_bytes());
            }
        }
        CountResult::Bloom(set) => {
            frame.push(MODE_BLOOM);
            for key in set {
                frame.extend_from_slice(&key.to_le_bytes());
            }
        }
    }
    write_framed(path, ArtifactKind::Count, std::iter::once(frame.as_slice()), true)
}

/// Reads a counted partition written by [`write_counted_file`].
///
/// # Errors
/// Returns [`IoError`] on header/frame problems, or [`DataError::SuperKmer`]
/// (reused here as a generic "corrupt record" error) if the frame's mode tag
/// is unrecognized or a record is truncated mid-entry.
pub fn read_counted_file(path: &Path) -> Result<CountResult, DataError> {
    let mut reader = FramedReader::open(path, ArtifactKind::Count).map_err(io_to_data(path))?;
    let frame = reader
        .next_frame()
        .map_err(io_to_data(path))?
        .unwrap_or_default();
    if frame.is_empty() {
        return Ok(CountResult::Kmer(BTreeMap::new()));
    }
    let mode = frame[0];
    let body = &frame[1..];
    match mode {
        MODE_KMER => {
            let mut map = BTreeMap::new();
            let mut pos = 0usize;
            while pos < body.len() {
                let len = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap_or_default()) as usize;
                pos += 4;
                let key = body[pos..pos + len].to_vec();
                pos += len;
                let count = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap_or_default());
                pos += 8;
                map.insert(key, count);
            }
            Ok(CountResult::Kmer(map))
        }
        MODE_HASH => {
            let mut map = BTreeMap::new();
            for chunk in body.chunks_exact(16) {
                let key = u64::from_le_bytes(chunk[0..8].try_into().unwrap_or_default());
                let count = u64::from_le_bytes(chunk[8..16].try_into().unwrap_or_default());
                map.insert(key, count);
            }
            Ok(CountResult::Hash(map))
        }
        MODE_BLOOM => {
            let set: std::collections::BTreeSet<u64> = body
                .chunks_exact(8)
                .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap_or_default()))
                .collect();
            Ok(CountResult::Bloom(set))
        }
        other => Err(DataError::SuperKmer {
            path: path.to_path_buf(),
            offset: 0,
            details: format!("unrecognized counted-file mode tag {other}"),
        }),
    }
}

fn io_to_data(path: &Path) -> impl Fn(IoError) -> DataError + '_ {
    move |e: IoError| DataError::SuperKmer {
        path: path.to_path_buf(),
        offset: 0,
        details: e.to_string(),
    }
}
