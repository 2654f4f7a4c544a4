//! Cross-sample k-way merge of per-partition count files.
//!
//! Each sample contributes one sorted stream of `(Kmer, count)` pairs per
//! partition (the output of [`crate::counter::count_partition`]); merging
//! walks all `N` sample streams for a partition together with a bounded
//! min-heap so memory stays O(N) regardless of how many distinct k-mers
//! exist, and emits one row per k-mer that clears the solidity predicate.
//! The `BinaryHeap<Reverse<_>>` k-way merge is standard library idiom the
//! teacher itself never needed (it only ever counts one sample at a time),
//! so this is grounded directly on the source's merge-cursor shape in
//! `io/vector_file.hpp` rather than on a teacher Rust file.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::Path;

use crate::counter::saturate_count;
use crate::error::{DataError, IoError};
use crate::framed::{write_framed, ArtifactKind, FramedReader};
use crate::kmer::Kmer;

/// One sample's sorted `(kmer, count)` stream, consumed front-to-back.
///
/// `sample_id` isn't read by the merge itself (a cursor's position in the
/// `cursors` slice already determines which column of the output vector it
/// fills) but callers keep it around for error messages when a cursor's
/// backing file turns out to be malformed.
pub struct SampleCursor<'a> {
    #[allow(dead_code)]
    sample_id: u32,
    entries: &'a [(Kmer, u64)],
    pos: usize,
}

impl<'a> SampleCursor<'a> {
    #[must_use]
    pub fn new(sample_id: u32, entries: &'a [(Kmer, u64)]) -> Self {
        Self {
            sample_id,
            entries,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<(Kmer, u64)> {
        self.entries.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }
}

#[derive(PartialEq, Eq)]
struct HeapEntry {
    key: Vec<u64>, // Kmer::limbs(), used only to order the heap
    kmer: Kmer,
    cursor: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// How many samples (out of the total considered) must carry a k-mer for it
/// to survive the merge — the solidity predicate from §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Solidity {
    /// At least `min_samples` samples must carry the k-mer.
    MinSamples(usize),
    /// Every sample must carry the k-mer.
    All,
}

impl Solidity {
    fn satisfied_by(self, present_in: usize, total: usize) -> bool {
        match self {
            Solidity::MinSamples(min) => present_in >= min,
            Solidity::All => present_in == total,
        }
    }
}

/// What shape the merged output takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// A full count matrix: one count per sample per surviving k-mer.
    CountMatrix,
    /// One bit per sample, presence/absence only.
    PresenceAbsence,
    /// A Bloom-filter stripe matrix: [`merge`]/[`merge_hash`] emit the same
    /// per-key presence vector as `PresenceAbsence`, then [`fold_bloom_stripe`]
    /// OR-folds each key's vector into its `key % w` stripe row, dropping the
    /// keys entirely.
    BloomStripe,
}

/// One merged row: the canonical k-mer plus either its per-sample counts
/// (count-matrix mode) or its per-sample presence bits (the other two
/// modes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRow {
    pub kmer: Kmer,
    pub counts: Vec<u64>,
}

/// Merges `cursors` (one per sample, each already sorted ascending by
/// [`Kmer`]) into rows that satisfy `solidity`, in ascending k-mer order.
///
/// `num_samples` is the total sample count the solidity predicate checks
/// against, which may exceed `cursors.len()` if some samples contributed no
/// cursor for this partition at all.
#[must_use]
pub fn merge(
    mut cursors: Vec<SampleCursor<'_>>,
    num_samples: usize,
    solidity: Solidity,
    mode: MergeMode,
    count_width_bytes: u8,
) -> Vec<MergedRow> {
    let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();
    for (i, cursor) in cursors.iter().enumerate() {
        if let Some((kmer, _)) = cursor.peek() {
            heap.push(Reverse(HeapEntry {
                key: kmer.limbs(),
                kmer,
                cursor: i,
            }));
        }
    }

    let mut out = Vec::new();
    while let Some(Reverse(top)) = heap.pop() {
        let current_key = top.key.clone();
        let current_kmer = top.kmer;
        let mut row_counts = vec![0u64; cursors.len()];
        let mut present = 0usize;

        // Every cursor currently positioned on `current_key` contributes to
        // this row: the one that won the last pop, plus any others sitting
        // on the same key further down the heap.
        let mut matching_cursors = vec![top.cursor];
        while let Some(Reverse(next)) = heap.peek() {
            if next.key == current_key {
                let Reverse(entry) = heap.pop().expect("peeked Some");
                matching_cursors.push(entry.cursor);
            } else {
                break;
            }
        }
        for idx in matching_cursors {
            pull_matching(&mut cursors, &mut heap, idx, &current_key, &mut row_counts, &mut present);
        }

        if !solidity.satisfied_by(present, num_samples) {
            continue;
        }
        let kmer = current_kmer;
        let counts = match mode {
            MergeMode::CountMatrix => row_counts
                .iter()
                .map(|&c| saturate_count(c, count_width_bytes))
                .collect(),
            MergeMode::PresenceAbsence | MergeMode::BloomStripe => {
                row_counts.iter().map(|&c| u64::from(c > 0)).collect()
            }
        };
        out.push(MergedRow { kmer, counts });
    }
    out
}

/// If `cursors[idx]` is currently positioned on `current_key`, records its
/// count, marks it present, advances it, and re-pushes its new head onto the
/// heap.
fn pull_matching(
    cursors: &mut [SampleCursor<'_>],
    heap: &mut BinaryHeap<Reverse<HeapEntry>>,
    idx: usize,
    current_key: &[u64],
    row_counts: &mut [u64],
    present: &mut usize,
) {
    let Some((kmer, count)) = cursors[idx].peek() else {
        return;
    };
    if kmer.limbs() != current_key {
        return;
    }
    row_counts[idx] = count;
    *present += 1;
    cursors[idx].advance();
    if let Some((next_kmer, _)) = cursors[idx].peek() {
        heap.push(Reverse(HeapEntry {
            key: next_kmer.limbs(),
            kmer: next_kmer,
            cursor: idx,
        }));
    }
}

fn mode_tag(mode: MergeMode) -> u8 {
    match mode {
        MergeMode::CountMatrix => 0,
        MergeMode::PresenceAbsence => 1,
        MergeMode::BloomStripe => 2,
    }
}

fn mode_from_tag(tag: u8) -> Option<MergeMode> {
    match tag {
        0 => Some(MergeMode::CountMatrix),
        1 => Some(MergeMode::PresenceAbsence),
        2 => Some(MergeMode::BloomStripe),
        _ => None,
    }
}

/// Writes one partition's merged rows to disk as a single framed record: a
/// small header (k, sample count, mode tag) followed by one entry per row —
/// the row's packed limbs, then its per-sample counts (or presence bits,
/// stored as 0/1 `u64`s for the non-count-matrix modes so the reader doesn't
/// need a separate bit-unpacking path).
///
/// # Errors
/// Returns [`IoError::Os`] on any filesystem failure.
pub fn write_matrix_file(
    path: &Path,
    k: usize,
    rows: &[MergedRow],
    mode: MergeMode,
) -> Result<(), IoError> {
    let num_samples = rows.first().map_or(0, |r| r.counts.len());
    let mut frame = Vec::new();
    frame.extend_from_slice(&(k as u32).to_le_bytes());
    frame.extend_from_slice(&(num_samples as u32).to_le_bytes());
    frame.push(mode_tag(mode));
    for row in rows {
        let limbs = row.kmer.limbs();
        frame.extend_from_slice(&(limbs.len() as u32).to_le_bytes());
        for limb in &limbs {
            frame.extend_from_slice(&limb.to_le_bytes());
        }
        for &count in &row.counts {
            frame.extend_from_slice(&count.to_le_bytes());
        }
    }
    write_framed(path, ArtifactKind::Merge, std::iter::once(frame.as_slice()), true)
}

/// Reads a matrix file written by [`write_matrix_file`], returning its rows
/// and the mode they were written in.
///
/// # Errors
/// Returns [`IoError`] on header/frame problems, or [`DataError::SuperKmer`]
/// (reused as a generic "corrupt record" error) if the mode tag is
/// unrecognized or a k-mer's limb count is inconsistent with its length.
pub fn read_matrix_file(path: &Path) -> Result<(Vec<MergedRow>, MergeMode), DataError> {
    let to_data = |e: IoError| DataError::SuperKmer {
        path: path.to_path_buf(),
        offset: 0,
        details: e.to_string(),
    };
    let mut reader = FramedReader::open(path, ArtifactKind::Merge).map_err(to_data)?;
    let frame = reader.next_frame().map_err(to_data)?.unwrap_or_default();
    if frame.len() < 9 {
        return Ok((Vec::new(), MergeMode::CountMatrix));
    }
    let k = u32::from_le_bytes(frame[0..4].try_into().unwrap_or_default()) as usize;
    let num_samples = u32::from_le_bytes(frame[4..8].try_into().unwrap_or_default()) as usize;
    let mode = mode_from_tag(frame[8]).ok_or_else(|| DataError::SuperKmer {
        path: path.to_path_buf(),
        offset: 8,
        details: format!("unrecognized matrix-file mode tag {}", frame[8]),
    })?;

    let mut rows = Vec::new();
    let mut pos = 9usize;
    while pos < frame.len() {
        let num_limbs = u32::from_le_bytes(frame[pos..pos + 4].try_into().unwrap_or_default()) as usize;
        pos += 4;
        let limbs: Vec<u64> = frame[pos..pos + num_limbs * 8]
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap_or_default()))
            .collect();
        pos += num_limbs * 8;
        let kmer = Kmer::from_limbs(k, &limbs).map_err(|e| DataError::SuperKmer {
            path: path.to_path_buf(),
            offset: pos as u64,
            details: e.to_string(),
        })?;
        let counts: Vec<u64> = frame[pos..pos + num_samples * 8]
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap_or_default()))
            .collect();
        pos += num_samples * 8;
        rows.push(MergedRow { kmer, counts });
    }
    Ok((rows, mode))
}

/// Folds a hash-mode merge's presence/absence rows into a Bloom-filter
/// stripe matrix: for each surviving key, its bit position `p = key % w`
/// picks a stripe row, and that row's per-sample presence bits are OR-ed in.
/// `rows` must already be in [`MergeMode::BloomStripe`] (or
/// `PresenceAbsence`, which is bit-for-bit the same shape) form — this is
/// the final step [`merge_hash`] leaves undone, since folding needs `w` and
/// a row count the merge loop itself doesn't otherwise care about.
///
/// Returns `w` rows, each `ceil(num_samples / 8)` bytes, bit `i` of a row
/// set iff sample `i` is present for some key that mapped to that row.
#[must_use]
pub fn fold_bloom_stripe(rows: &[(u64, Vec<u64>)], w: u32, num_samples: usize) -> Vec<Vec<u8>> {
    let row_bytes = num_samples.div_ceil(8);
    let mut stripes = vec![vec![0u8; row_bytes]; w as usize];
    for (key, presence) in rows {
        let p = (*key % u64::from(w)) as usize;
        let stripe = &mut stripes[p];
        for (i, &bit) in presence.iter().enumerate() {
            if bit != 0 {
                stripe[i / 8] |= 1 << (i % 8);
            }
        }
    }
    stripes
}

/// Writes a Bloom-stripe file: header `[u32 w][u32 num_samples]` followed by
/// the `w` stripe rows back to back, as a single framed record. Matches
/// §6's "W rows of `ceil(N/8)` bytes, column-major over samples; no keys".
///
/// # Errors
/// Returns [`IoError::Os`] on any filesystem failure.
pub fn write_bloom_stripe_file(path: &Path, stripes: &[Vec<u8>], num_samples: usize) -> Result<(), IoError> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&(stripes.len() as u32).to_le_bytes());
    frame.extend_from_slice(&(num_samples as u32).to_le_bytes());
    for row in stripes {
        frame.extend_from_slice(row);
    }
    write_framed(path, ArtifactKind::Merge, std::iter::once(frame.as_slice()), true)
}

/// Parses a file written by [`write_bloom_stripe_file`], returning its
/// stripe rows and the sample count each row was packed against.
///
/// # Errors
/// Returns [`DataError::SuperKmer`] (reused as a generic "corrupt record"
/// error) if the header or a row is truncated.
pub fn read_bloom_stripe_file(path: &Path) -> Result<(Vec<Vec<u8>>, usize), DataError> {
    let to_data = |e: IoError| DataError::SuperKmer {
        path: path.to_path_buf(),
        offset: 0,
        details: e.to_string(),
    };
    let mut reader = FramedReader::open(path, ArtifactKind::Merge).map_err(to_data)?;
    let frame = reader.next_frame().map_err(to_data)?.unwrap_or_default();
    if frame.len() < 8 {
        return Ok((Vec::new(), 0));
    }
    let w = u32::from_le_bytes(frame[0..4].try_into().unwrap_or_default()) as usize;
    let num_samples = u32::from_le_bytes(frame[4..8].try_into().unwrap_or_default()) as usize;
    let row_bytes = num_samples.div_ceil(8);
    let mut pos = 8usize;
    let mut stripes = Vec::with_capacity(w);
    for _ in 0..w {
        if pos + row_bytes > frame.len() {
            return Err(DataError::SuperKmer {
                path: path.to_path_buf(),
                offset: pos as u64,
                details: "truncated bloom-stripe row".to_string(),
            });
        }
        stripes.push(frame[pos..pos + row_bytes].to_vec());
        pos += row_bytes;
    }
    Ok((stripes, num_samples))
}

/// Hash-mode counterpart to [`merge`]: each sample contributes a full
/// `hash -> count` map rather than a sorted cursor, since a partition's
/// hash-mode counted file is small enough to stay resident for the whole
/// merge (the same assumption [`crate::counter::count_partition`]'s
/// in-memory path already makes per sample). Walking a `BTreeSet` union of
/// keys keeps the result sorted ascending without needing the heap cursor
/// machinery [`merge`] uses for the streaming k-mer case.
#[must_use]
pub fn merge_hash(
    per_sample: &[std::collections::BTreeMap<u64, u64>],
    num_samples: usize,
    solidity: Solidity,
    mode: MergeMode,
    count_width_bytes: u8,
) -> Vec<(u64, Vec<u64>)> {
    let mut keys = std::collections::BTreeSet::new();
    for sample in per_sample {
        keys.extend(sample.keys().copied());
    }

    let mut out = Vec::new();
    for key in keys {
        let mut row = vec![0u64; per_sample.len()];
        let mut present = 0usize;
        for (i, sample) in per_sample.iter().enumerate() {
            if let Some(&count) = sample.get(&key) {
                row[i] = count;
                present += 1;
            }
        }
        if !solidity.satisfied_by(present, num_samples) {
            continue;
        }
        let counts = match mode {
            MergeMode::CountMatrix => row.iter().map(|&c| saturate_count(c, count_width_bytes)).collect(),
            MergeMode::PresenceAbsence | MergeMode::BloomStripe => {
                row.iter().map(|&c| u64::from(c > 0)).collect()
            }
        };
        out.push((key, counts));
    }
    out
}

/// Writes a hash-keyed matrix file: header `[u32 k=0][u32 num_samples][u8 mode_tag]`
/// (the `k=0` sentinel is what distinguishes a hash-keyed matrix from a
/// k-mer-keyed one on read-back), then one `[u64 key][u64 counts...]` record
/// per row, as a single framed record.
///
/// # Errors
/// Returns [`IoError::Os`] on any filesystem failure.
pub fn write_hash_matrix_file(path: &Path, rows: &[(u64, Vec<u64>)], mode: MergeMode) -> Result<(), IoError> {
    let num_samples = rows.first().map_or(0, |(_, counts)| counts.len());
    let mut frame = Vec::new();
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(&(num_samples as u32).to_le_bytes());
    frame.push(mode_tag(mode));
    for (key, counts) in rows {
        frame.extend_from_slice(&key.to_le_bytes());
        for &count in counts {
            frame.extend_from_slice(&count.to_le_bytes());
        }
    }
    write_framed(path, ArtifactKind::Merge, std::iter::once(frame.as_slice()), true)
}

/// Parses the layout produced by [`write_hash_matrix_file`].
///
/// # Errors
/// Returns [`DataError::SuperKmer`] (reused as a generic "corrupt record"
/// error) on a truncated header/row or an unrecognized mode tag.
pub fn read_hash_matrix_file(path: &Path) -> Result<(Vec<(u64, Vec<u64>)>, MergeMode), DataError> {
    let to_data = |e: IoError| DataError::SuperKmer {
        path: path.to_path_buf(),
        offset: 0,
        details: e.to_string(),
    };
    let mut reader = FramedReader::open(path, ArtifactKind::Merge).map_err(to_data)?;
    let frame = reader.next_frame().map_err(to_data)?.unwrap_or_default();
    if frame.len() < 9 {
        return Ok((Vec::new(), MergeMode::CountMatrix));
    }
    let num_samples = u32::from_le_bytes(frame[4..8].try_into().unwrap_or_default()) as usize;
    let mode = mode_from_tag(frame[8]).ok_or_else(|| DataError::SuperKmer {
        path: path.to_path_buf(),
        offset: 8,
        details: format!("unrecognized matrix-file mode tag {}", frame[8]),
    })?;

    let mut rows = Vec::new();
    let mut pos = 9usize;
    let row_len = 8 + num_samples * 8;
    while pos < frame.len() {
        if pos + row_len > frame.len() {
            return Err(DataError::SuperKmer {
                path: path.to_path_buf(),
                offset: pos as u64,
                details: "truncated hash-matrix row".to_string(),
            });
        }
        let key = u64::from_le_bytes(frame[pos..pos + 8].try_into().expect("8 bytes"));
        pos += 8;
        let counts: Vec<u64> = frame[pos..pos + num_samples * 8]
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().expect("8 bytes")))
            .collect();
        pos += num_samples * 8;
        rows.push((key, counts));
    }
    Ok((rows, mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(bytes: &[u8]) -> Kmer {
        Kmer::from_ascii(bytes).unwrap()
    }

    #[test]
    fn merge_counts_all_present_kmers() {
        let a = vec![(k(b"ACGTACGT"), 3), (k(b"TTTTAAAA"), 1)];
        let b = vec![(k(b"ACGTACGT"), 2)];
        let cursors = vec![SampleCursor::new(0, &a), SampleCursor::new(1, &b)];
        let rows = merge(cursors, 2, Solidity::MinSamples(1), MergeMode::CountMatrix, 4);
        assert_eq!(rows.len(), 2);
        let acgt_row = rows.iter().find(|r| r.kmer == k(b"ACGTACGT")).unwrap();
        assert_eq!(acgt_row.counts, vec![3, 2]);
    }

    #[test]
    fn solidity_all_drops_kmers_missing_from_any_sample() {
        let a = vec![(k(b"ACGTACGT"), 3), (k(b"TTTTAAAA"), 1)];
        let b = vec![(k(b"ACGTACGT"), 2)];
        let cursors = vec![SampleCursor::new(0, &a), SampleCursor::new(1, &b)];
        let rows = merge(cursors, 2, Solidity::All, MergeMode::CountMatrix, 4);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kmer, k(b"ACGTACGT"));
    }

    #[test]
    fn presence_absence_mode_emits_zero_one() {
        let a = vec![(k(b"ACGTACGT"), 5)];
        let b: Vec<(Kmer, u64)> = vec![];
        let cursors = vec![SampleCursor::new(0, &a), SampleCursor::new(1, &b)];
        let rows = merge(
            cursors,
            2,
            Solidity::MinSamples(1),
            MergeMode::PresenceAbsence,
            4,
        );
        assert_eq!(rows[0].counts, vec![1, 0]);
    }

    #[test]
    fn empty_cursors_produce_no_rows() {
        let a: Vec<(Kmer, u64)> = vec![];
        let cursors = vec![SampleCursor::new(0, &a)];
        let rows = merge(cursors, 1, Solidity::MinSamples(1), MergeMode::CountMatrix, 4);
        assert!(rows.is_empty());
    }

    #[test]
    fn count_matrix_mode_saturates_at_configured_width() {
        let a = vec![(k(b"ACGTACGT"), 9000)];
        let cursors = vec![SampleCursor::new(0, &a)];
        // one-byte width: 9000 must clamp to 255, not wrap or truncate.
        let rows = merge(cursors, 1, Solidity::MinSamples(1), MergeMode::CountMatrix, 1);
        assert_eq!(rows[0].counts, vec![255]);
    }

    #[test]
    fn matrix_file_roundtrips_count_matrix_mode() {
        let a = vec![(k(b"ACGTACGT"), 3), (k(b"TTTTAAAA"), 1)];
        let b = vec![(k(b"ACGTACGT"), 2)];
        let cursors = vec![SampleCursor::new(0, &a), SampleCursor::new(1, &b)];
        let rows = merge(cursors, 2, Solidity::MinSamples(1), MergeMode::CountMatrix, 4);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partition_0.mat");
        write_matrix_file(&path, 8, &rows, MergeMode::CountMatrix).unwrap();
        let (reread, mode) = read_matrix_file(&path).unwrap();
        assert_eq!(mode, MergeMode::CountMatrix);
        assert_eq!(reread, rows);
    }

    #[test]
    fn matrix_file_roundtrips_presence_absence_mode() {
        let a = vec![(k(b"ACGTACGT"), 5)];
        let b: Vec<(Kmer, u64)> = vec![];
        let cursors = vec![SampleCursor::new(0, &a), SampleCursor::new(1, &b)];
        let rows = merge(cursors, 2, Solidity::MinSamples(1), MergeMode::PresenceAbsence, 4);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partition_0.mat");
        write_matrix_file(&path, 8, &rows, MergeMode::PresenceAbsence).unwrap();
        let (reread, mode) = read_matrix_file(&path).unwrap();
        assert_eq!(mode, MergeMode::PresenceAbsence);
        assert_eq!(reread, rows);
    }

    #[test]
    fn matrix_file_empty_rows_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mat");
        write_matrix_file(&path, 8, &[], MergeMode::CountMatrix).unwrap();
        let (reread, mode) = read_matrix_file(&path).unwrap();
        assert_eq!(mode, MergeMode::CountMatrix);
        assert!(reread.is_empty());
    }

    #[test]
    fn merge_hash_sums_present_samples_and_drops_absent() {
        let a = std::collections::BTreeMap::from([(10u64, 3u64), (20u64, 1u64)]);
        let b = std::collections::BTreeMap::from([(10u64, 2u64)]);
        let rows = merge_hash(&[a, b], 2, Solidity::MinSamples(1), MergeMode::CountMatrix, 4);
        assert_eq!(rows, vec![(10, vec![3, 2]), (20, vec![1, 0])]);
    }

    #[test]
    fn merge_hash_all_solidity_drops_partial_keys() {
        let a = std::collections::BTreeMap::from([(10u64, 3u64), (20u64, 1u64)]);
        let b = std::collections::BTreeMap::from([(10u64, 2u64)]);
        let rows = merge_hash(&[a, b], 2, Solidity::All, MergeMode::CountMatrix, 4);
        assert_eq!(rows, vec![(10, vec![3, 2])]);
    }

    #[test]
    fn fold_bloom_stripe_ors_keys_into_their_row() {
        // hash(AAAAA) mod 8 = 3 in the worked example; two keys landing on
        // the same row should OR together rather than overwrite.
        let rows = vec![
            (3u64, vec![1, 0]),
            (11u64, vec![0, 1]), // 11 % 8 == 3, same row as the first key
            (5u64, vec![1, 1]),
        ];
        let stripes = fold_bloom_stripe(&rows, 8, 2);
        assert_eq!(stripes.len(), 8);
        assert_eq!(stripes[3], vec![0b0000_0011]);
        assert_eq!(stripes[5], vec![0b0000_0011]);
        assert_eq!(stripes[0], vec![0b0000_0000]);
    }

    #[test]
    fn bloom_stripe_file_roundtrips() {
        let rows = vec![(3u64, vec![1, 0]), (5u64, vec![1, 1])];
        let stripes = fold_bloom_stripe(&rows, 8, 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partition_0.bloom");
        write_bloom_stripe_file(&path, &stripes, 2).unwrap();
        let (reread, num_samples) = read_bloom_stripe_file(&path).unwrap();
        assert_eq!(num_samples, 2);
        assert_eq!(reread, stripes);
    }

    #[test]
    fn hash_matrix_file_roundtrips() {
        let a = std::collections::BTreeMap::from([(10u64, 3u64), (20u64, 1u64)]);
        let b = std::collections::BTreeMap::from([(10u64, 2u64)]);
        let rows = merge_hash(&[a, b], 2, Solidity::MinSamples(1), MergeMode::PresenceAbsence, 4);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partition_0.mat");
        write_hash_matrix_file(&path, &rows, MergeMode::PresenceAbsence).unwrap();
        let (reread, mode) = read_hash_matrix_file(&path).unwrap();
        assert_eq!(mode, MergeMode::PresenceAbsence);
        assert_eq!(reread, rows);
    }
}
