//! Splits reads into super-k-mers and routes each to its minimizer's
//! partition.
//!
//! Mirrors the teacher's `KmerMap::process_sequence_with_quality` loop
//! (scan a read, skip past invalid bases, process each valid run) but
//! replaces per-k-mer counting with per-run super-k-mer emission: each
//! maximal valid ACGT run is split at minimizer-boundaries using
//! [`scan_minimizers`]'s O(k)-amortized result, and each resulting maximal
//! same-minimizer stretch becomes one [`SuperKmer`] appended to its target
//! partition's buffer. Per-partition buffers are guarded the way the
//! source's `state.hpp` guards its bitmap updates — a short critical
//! section around an append, not a lock held across I/O.

use std::sync::Mutex;

use rayon::prelude::*;

use crate::error::{IoError, KmtricksError};
use crate::framed::{self, ArtifactKind};
use crate::kmer::Kmer;
use crate::minimizer::scan_minimizers;
use crate::repartition::RepartitionTable;
use crate::superkmer::SuperKmer;

/// Splits `seq` into maximal runs of valid ACGT bases, skipping anything
/// else (Ns, soft-mask gaps, ambiguity codes) — the same "skip past the
/// invalid base" behavior the teacher's counting loop uses, generalized
/// from "skip one base" to "carve out the whole invalid stretch at once"
/// since a run needs to be ACGT end to end before it can be minimized.
pub(crate) fn valid_runs(seq: &[u8]) -> Vec<&[u8]> {
    let mut runs = Vec::new();
    let mut rest = seq;
    loop {
        match Kmer::find_invalid(rest) {
            None => {
                if !rest.is_empty() {
                    runs.push(rest);
                }
                break;
            }
            Some(0) => rest = &rest[1..],
            Some(bad) => {
                runs.push(&rest[..bad]);
                rest = &rest[bad + 1..];
            }
        }
    }
    runs
}

/// Buckets a run's k-mer windows into maximal same-minimizer stretches and
/// packs each stretch as one [`SuperKmer`], tagged with the partition its
/// minimizer resolves to.
fn superkmers_for_run(run: &[u8], k: usize, m: usize, table: &RepartitionTable) -> Vec<(u16, SuperKmer)> {
    if run.len() < k {
        return Vec::new();
    }
    let minimizers = scan_minimizers(run, k, m);
    let mut out = Vec::new();
    let mut start = 0usize; // k-mer index where the current stretch began
    for i in 1..=minimizers.len() {
        let boundary = i == minimizers.len() || minimizers[i].value != minimizers[start].value;
        if boundary {
            let run_start = minimizers[start].position;
            let run_end = minimizers[i - 1].position + k;
            let partition = table.get_partition(minimizers[start].value);
            out.push((partition, SuperKmer::pack(&run[run_start..run_end])));
            start = i;
        }
    }
    out
}

/// Accumulates super-k-mers into one in-memory buffer per partition, to be
/// flushed to framed files once a whole sample (or the whole fof, depending
/// on the scheduler's chunking) has been scanned.
pub struct Partitioner {
    k: usize,
    m: usize,
    table: RepartitionTable,
    buffers: Vec<Mutex<Vec<SuperKmer>>>,
}

impl Partitioner {
    #[must_use]
    pub fn new(k: usize, m: usize, table: RepartitionTable) -> Self {
        let num_partitions = usize::from(table.num_partitions());
        let buffers = (0..num_partitions).map(|_| Mutex::new(Vec::new())).collect();
        Self { k, m, table, buffers }
    }

    /// Processes one read: splits it into valid runs, super-k-mers each run,
    /// and appends every resulting record to its partition's buffer.
    pub fn process_sequence(&self, seq: &[u8]) {
        for run in valid_runs(seq) {
            for (partition, superkmer) in superkmers_for_run(run, self.k, self.m, &self.table) {
                let mut buf = self.buffers[usize::from(partition)]
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                buf.push(superkmer);
            }
        }
    }

    /// Processes a batch of reads in parallel (rayon), the way the teacher's
    /// `KmerMap::build` drains a `rayon::vec::IntoIter` of sequences.
    pub fn process_sequences<I>(&self, sequences: I)
    where
        I: IntoParallelIterator<Item = Vec<u8>>,
    {
        sequences.into_par_iter().for_each(|seq| self.process_sequence(&seq));
    }

    /// Flushes every partition's buffer to `<out_dir>/partition_<p>.superk`,
    /// one framed [`ArtifactKind::SuperKmer`] file per partition.
    ///
    /// # Errors
    /// Returns [`KmtricksError::Io`] if any partition's file can't be
    /// written.
    pub fn flush(&self, out_dir: &std::path::Path) -> Result<(), KmtricksError> {
        for (partition, buffer) in self.buffers.iter().enumerate() {
            let records = buffer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let path = out_dir.join(format!("partition_{partition}.superk"));
            let frames: Vec<Vec<u8>> = records.iter().map(SuperKmer::to_bytes).collect();
            framed::write_framed(&path, ArtifactKind::SuperKmer, frames.iter().map(Vec::as_slice), true)
                .map_err(KmtricksError::from)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    #[must_use]
    pub fn m(&self) -> usize {
        self.m
    }
}

/// Reads back a partition's super-k-mers from its framed file. Each record's
/// k-mer windows are re-expanded later, by whatever `k` the counting step
/// (C6) is running with — this layer just deserializes the raw runs.
///
/// # Errors
/// Returns [`IoError`] variants on header/frame corruption.
pub fn read_partition(path: &std::path::Path) -> Result<Vec<SuperKmer>, IoError> {
    let mut reader = framed::FramedReader::open(path, ArtifactKind::SuperKmer)?;
    let mut out = Vec::new();
    let mut offset = 0u64;
    while let Some(frame) = reader.next_frame()? {
        let sk = SuperKmer::from_bytes(path, offset, &frame)?;
        offset += frame.len() as u64;
        out.push(sk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_for(m: usize, p: u16) -> RepartitionTable {
        RepartitionTable::uniform(m, p)
    }

    #[test]
    fn valid_runs_splits_at_non_acgt() {
        let runs = valid_runs(b"ACGTNNNACGTACGT");
        assert_eq!(runs, vec![b"ACGT".as_slice(), b"ACGTACGT".as_slice()]);
    }

    #[test]
    fn valid_runs_handles_leading_and_trailing_invalid() {
        let runs = valid_runs(b"NACGTACGTN");
        assert_eq!(runs, vec![b"ACGTACGT".as_slice()]);
    }

    #[test]
    fn valid_runs_of_all_invalid_is_empty() {
        assert!(valid_runs(b"NNNN").is_empty());
    }

    #[test]
    fn superkmers_for_run_covers_every_kmer_exactly_once() {
        let run = b"ACGTTGCACGTAGCTAGCATGACGTTGCACGTA";
        let k = 8;
        let m = 4;
        let table = table_for(m, 4);
        let records = superkmers_for_run(run, k, m, &table);

        let total_kmers: usize = records.iter().map(|(_, sk)| sk.num_kmers(k)).sum();
        assert_eq!(total_kmers, run.len() - k + 1);
    }

    #[test]
    fn process_sequence_routes_into_partition_buffers() {
        let table = table_for(4, 4);
        let partitioner = Partitioner::new(8, 4, table);
        partitioner.process_sequence(b"ACGTTGCACGTAGCTAGCATGACGTTGCACGTA");
        let total: usize = partitioner
            .buffers
            .iter()
            .map(|b| b.lock().unwrap().len())
            .sum();
        assert!(total > 0);
    }

    #[test]
    fn flush_and_read_back_roundtrips() {
        let table = table_for(4, 2);
        let partitioner = Partitioner::new(8, 4, table);
        partitioner.process_sequence(b"ACGTTGCACGTAGCTAGCATGACGTTGCACGTA");
        let dir = tempfile::tempdir().expect("tempdir");
        partitioner.flush(dir.path()).expect("flush succeeds");

        let mut total = 0;
        for p in 0..2 {
            let path = dir.path().join(format!("partition_{p}.superk"));
            if path.exists() {
                let records = read_partition(&path).expect("reads back");
                total += records.len();
            }
        }
        assert!(total > 0);
    }
}
