//! Minimizer-to-partition assignment table.
//!
//! Partitioning by raw minimizer value would badly imbalance partitions —
//! some minimizers are far more frequent than others in real genomes — so
//! instead a table is built once per run by sampling minimizer frequencies
//! and greedily bin-packing them across partitions (longest-processing-time
//! first), then persisted so every later pass (superk/count/merge) agrees on
//! the same assignment. Table layout and magic mirror the source's
//! `Repartition` loader.
//!
//! The table is indexed by *canonical* m-mer value (see [`crate::minimizer`]),
//! so partition assignment is automatically reverse-complement symmetric:
//! a k-mer and its reverse complement always share a minimizer, and the
//! minimizer itself is already canonicalized, so no special-casing is needed
//! here.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::convert::TryFrom;

use crate::error::{ConfigError, IoError};

/// Magic identifying a repartition table file, carried over from the
/// original GATB-derived format.
pub const MAGIC: u32 = 0x1234_5678;

/// Current on-disk format version.
pub const VERSION: u32 = 1;

/// Assigns each canonical m-mer value (`0..4^m`) to one of `num_partitions`
/// partitions, built to balance the estimated k-mer volume each partition
/// will receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepartitionTable {
    num_partitions: u16,
    m: usize,
    /// `table[v]` is the partition index for canonical m-mer value `v`.
    table: Vec<u16>,
    has_freq: bool,
}

impl RepartitionTable {
    /// Builds a table from sampled per-minimizer occurrence counts.
    ///
    /// `counts[v]` is the (approximate) number of times canonical m-mer
    /// value `v` was seen as a winning minimizer during sampling; `counts`
    /// must have length `4^m`. Assignment uses greedy longest-processing-time
    /// bin-packing: minimizers are assigned most-frequent-first, each one
    /// always going to the partition currently holding the least load. This
    /// is a well-known `4/3`-approximation to optimal balance and doesn't
    /// need the full NP-hard bin-packing solution.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidPartitionCount`] if `num_partitions` is
    /// zero, and [`ConfigError::IncompatibleOptions`] if `counts.len()` isn't
    /// `4^m`.
    pub fn build(counts: &[u64], m: usize, num_partitions: u16) -> Result<Self, ConfigError> {
        if num_partitions == 0 {
            return Err(ConfigError::InvalidPartitionCount {
                p: 0,
                min: 1,
                max: u32::from(u16::MAX) as usize,
            });
        }
        let expected_len = 4usize.pow(u32::try_from(m).unwrap_or(u32::MAX));
        if counts.len() != expected_len {
            return Err(ConfigError::IncompatibleOptions {
                details: format!(
                    "repartition table expects {expected_len} m-mer counts for m={m}, got {}",
                    counts.len()
                ),
            });
        }

        let mut order: Vec<usize> = (0..counts.len()).collect();
        order.sort_unstable_by_key(|&v| Reverse(counts[v]));

        // Min-heap of (load, partition id); always hand the next, heaviest
        // remaining minimizer to the lightest-loaded partition.
        let mut heap: BinaryHeap<Reverse<(u64, u16)>> = (0..num_partitions)
            .map(|p| Reverse((0u64, p)))
            .collect();
        let mut table = vec![0u16; counts.len()];
        for v in order {
            let Reverse((load, partition)) = heap.pop().expect("num_partitions > 0");
            table[v] = partition;
            heap.push(Reverse((load + counts[v], partition)));
        }

        Ok(Self {
            num_partitions,
            m,
            table,
            has_freq: true,
        })
    }

    /// A trivial table that hashes every minimizer to a partition via modulo,
    /// used when no frequency sample is available (e.g. tiny inputs where
    /// sampling would be meaningless).
    #[must_use]
    pub fn uniform(m: usize, num_partitions: u16) -> Self {
        let size = 4usize.pow(u32::try_from(m).unwrap_or(u32::MAX));
        let table = (0..size)
            .map(|v| (v % usize::from(num_partitions.max(1))) as u16)
            .collect();
        Self {
            num_partitions: num_partitions.max(1),
            m,
            table,
            has_freq: false,
        }
    }

    /// The partition a canonical minimizer value is routed to.
    #[must_use]
    pub fn get_partition(&self, minimizer_value: u64) -> u16 {
        self.table[minimizer_value as usize % self.table.len()]
    }

    #[must_use]
    pub fn num_partitions(&self) -> u16 {
        self.num_partitions
    }

    #[must_use]
    pub fn m(&self) -> usize {
        self.m
    }

    /// Serializes to the on-disk layout:
    /// `[u16 num_partitions][u64 table_len][u16 pass_count=1][u16 * table_len][u8 has_freq][u32 magic]`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + 8 + 2 + self.table.len() * 2 + 1 + 4);
        buf.extend_from_slice(&self.num_partitions.to_le_bytes());
        buf.extend_from_slice(&(self.table.len() as u64).to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // pass_count, always 1 in this design
        for &entry in &self.table {
            buf.extend_from_slice(&entry.to_le_bytes());
        }
        buf.push(u8::from(self.has_freq));
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf
    }

    /// Parses the on-disk layout produced by [`Self::to_bytes`].
    ///
    /// # Errors
    /// Returns [`IoError::WrongKind`] if the trailing magic doesn't match,
    /// and [`IoError::InvalidHeader`] if the buffer is too short for its own
    /// declared table length.
    pub fn from_bytes(path: &std::path::Path, bytes: &[u8], m: usize) -> Result<Self, IoError> {
        const HEADER_LEN: usize = 2 + 8 + 2;
        const TRAILER_LEN: usize = 1 + 4;
        if bytes.len() < HEADER_LEN + TRAILER_LEN {
            return Err(IoError::InvalidHeader {
                path: path.to_path_buf(),
                expected: HEADER_LEN + TRAILER_LEN,
                found: bytes.len(),
            });
        }
        let num_partitions = u16::from_le_bytes([bytes[0], bytes[1]]);
        let table_len = u64::from_le_bytes(bytes[2..10].try_into().expect("8 bytes")) as usize;
        let _pass_count = u16::from_le_bytes([bytes[10], bytes[11]]);

        let table_start = HEADER_LEN;
        let table_end = table_start + table_len * 2;
        if bytes.len() < table_end + TRAILER_LEN {
            return Err(IoError::InvalidHeader {
                path: path.to_path_buf(),
                expected: table_end + TRAILER_LEN,
                found: bytes.len(),
            });
        }

        let has_freq = bytes[table_end] != 0;
        let magic_bytes: [u8; 4] = bytes[table_end + 1..table_end + 5]
            .try_into()
            .expect("4 bytes");
        let found_magic = u32::from_le_bytes(magic_bytes);
        if found_magic != MAGIC {
            let mut expected = [0u8; 8];
            expected[..4].copy_from_slice(&MAGIC.to_le_bytes());
            let mut found = [0u8; 8];
            found[..4].copy_from_slice(&magic_bytes);
            return Err(IoError::WrongKind {
                path: path.to_path_buf(),
                expected,
                found,
            });
        }

        let mut table = Vec::with_capacity(table_len);
        for chunk in bytes[table_start..table_end].chunks_exact(2) {
            table.push(u16::from_le_bytes([chunk[0], chunk[1]]));
        }

        Ok(Self {
            num_partitions,
            m,
            table,
            has_freq,
        })
    }
}
