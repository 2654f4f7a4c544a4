//! Super-k-mer records: a maximal run of consecutive k-mers sharing the same
//! minimizer, packed once as a single bit string instead of once per k-mer.
//!
//! A super-k-mer of `L` bases (`L >= k`) implicitly represents `L - k + 1`
//! overlapping k-mers; packing the whole run instead of each k-mer
//! individually is what gives the partitioning step its compression win —
//! exactly the data reduction §4.4 calls for. The packing itself reuses
//! [`crate::kmer::PackedWord`]'s push/extract bit math, just walked over the
//! whole run's length instead of stopping at one k-mer's worth of bases.

use crate::error::{DataError, IoError};
use crate::kmer::Kmer;

/// A run of `len` consecutive bases (`len >= k`), 2-bit packed MSB-first —
/// the same convention [`crate::kmer::PackedWord`] uses, so slicing out any
/// k-length window and reading it as a `Kmer` needs no repacking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperKmer {
    len: u32,
    /// `ceil(len/4)` bytes, 4 bases per byte, MSB-first within each byte.
    packed: Vec<u8>,
}

fn pack_base(byte: u8) -> u8 {
    match byte {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        _ => 3, // caller has already validated the run is pure ACGT
    }
}

fn unpack_base(code: u8) -> u8 {
    match code {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        _ => b'T',
    }
}

impl SuperKmer {
    /// Packs an already-validated, pure-ACGT run of bases.
    ///
    /// # Panics
    /// Panics if `bases` is empty; callers only ever build a `SuperKmer` from
    /// a non-empty run (the partitioner never emits zero-length runs).
    #[must_use]
    pub fn pack(bases: &[u8]) -> Self {
        assert!(!bases.is_empty(), "a super-k-mer run is never empty");
        let len = bases.len();
        let mut packed = vec![0u8; len.div_ceil(4)];
        for (i, &base) in bases.iter().enumerate() {
            let code = pack_base(base);
            let byte_idx = i / 4;
            let shift = 6 - 2 * (i % 4);
            packed[byte_idx] |= code << shift;
        }
        Self {
            len: len as u32,
            packed,
        }
    }

    /// Number of bases in this run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of k-mer windows this run represents.
    #[must_use]
    pub fn num_kmers(&self, k: usize) -> usize {
        self.len().saturating_sub(k).saturating_add(1)
    }

    fn base_at(&self, i: usize) -> u8 {
        let byte_idx = i / 4;
        let shift = 6 - 2 * (i % 4);
        unpack_base((self.packed[byte_idx] >> shift) & 0b11)
    }

    /// Unpacks the `k`-length window starting at `offset` back into a
    /// [`Kmer`].
    ///
    /// # Errors
    /// Returns [`DataError::SuperKmer`] if `offset + k` runs past the end of
    /// the run, or if the window fails [`Kmer`] validation (length out of
    /// the compiled range).
    pub fn kmer_at(&self, offset: usize, k: usize) -> Result<Kmer, DataError> {
        if offset + k > self.len() {
            return Err(DataError::SuperKmer {
                path: std::path::PathBuf::new(),
                offset: offset as u64,
                details: format!(
                    "window [{offset}, {}) runs past super-k-mer of length {}",
                    offset + k,
                    self.len()
                ),
            });
        }
        let bases: Vec<u8> = (offset..offset + k).map(|i| self.base_at(i)).collect();
        Kmer::from_ascii(&bases).map_err(|e| DataError::SuperKmer {
            path: std::path::PathBuf::new(),
            offset: offset as u64,
            details: e.to_string(),
        })
    }

    /// Iterates every k-mer window this run represents, in order.
    pub fn kmers(&self, k: usize) -> impl Iterator<Item = Result<Kmer, DataError>> + '_ {
        (0..self.num_kmers(k)).map(move |offset| self.kmer_at(offset, k))
    }

    /// Serializes as `[u32 len][packed bytes]`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.packed.len());
        buf.extend_from_slice(&self.len.to_le_bytes());
        buf.extend_from_slice(&self.packed);
        buf
    }

    /// Parses the layout produced by [`Self::to_bytes`].
    ///
    /// # Errors
    /// Returns [`IoError::TruncatedFrame`] if `bytes` is shorter than its own
    /// declared length requires.
    pub fn from_bytes(path: &std::path::Path, offset: u64, bytes: &[u8]) -> Result<Self, IoError> {
        if bytes.len() < 4 {
            return Err(IoError::TruncatedFrame {
                path: path.to_path_buf(),
                offset,
            });
        }
        let len = u32::from_le_bytes(bytes[..4].try_into().expect("4 bytes"));
        let packed_len = (len as usize).div_ceil(4);
        if bytes.len() < 4 + packed_len {
            return Err(IoError::TruncatedFrame {
                path: path.to_path_buf(),
                offset,
            });
        }
        Ok(Self {
            len,
            packed: bytes[4..4 + packed_len].to_vec(),
        })
    }
}
