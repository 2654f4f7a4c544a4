//! Canonical, 2-bit-packed DNA k-mers of length up to [`K_MAX`].
//!
//! A single `u64` can only hold 32 packed bases, which is the ceiling krust's
//! original `Kmer` shipped with (`packed_bits: u64`). kmtricks needs k up to
//! [`K_MAX`], so the packed word is generalized to a small, fixed set of
//! limb-count specializations (`ceil(k/32)` 64-bit limbs each) selected at
//! runtime by [`Kmer::from_ascii`] — the "dispatch table keyed on
//! `ceil(k/32)*32`" called for in the design notes. Each specialization packs,
//! canonicalizes and compares exactly as the original single-limb type did,
//! just walking an array instead of a scalar.

use crate::error::KmerError;

/// Smallest accepted k-mer length.
pub const MIN_K: usize = 8;

/// Bases packed into one 64-bit limb (2 bits/base).
pub const BASES_PER_LIMB: usize = 32;

/// Number of compiled limb-count specializations: k up to `MAX_LIMBS * 32`.
pub const MAX_LIMBS: usize = 4;

/// Largest accepted k-mer length.
pub const K_MAX: usize = MAX_LIMBS * BASES_PER_LIMB;

/// Number of 64-bit limbs needed to pack `k` bases.
#[must_use]
pub const fn limbs_for(k: usize) -> usize {
    (k + BASES_PER_LIMB - 1) / BASES_PER_LIMB
}

fn validate_k(k: usize) -> Result<(), KmerError> {
    if k < MIN_K || k > K_MAX {
        return Err(KmerError::InvalidLength {
            k,
            min: MIN_K,
            max: K_MAX,
        });
    }
    Ok(())
}

/// A 2-bit-per-base packed DNA word stored in `L` 64-bit limbs, most
/// significant limb first. Only the low `2*k` bits across the whole array are
/// ever set; the packing convention is a big-endian multi-word shift
/// register, so `limbs` compared lexicographically (`[u64; L]`'s derived
/// `Ord`) is exactly lexicographic order on the base string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackedWord<const L: usize> {
    limbs: [u64; L],
}

impl<const L: usize> PackedWord<L> {
    const ZERO: Self = PackedWord { limbs: [0u64; L] };

    fn push_base(&mut self, base: u8) {
        let mut carry = u64::from(base);
        for limb in self.limbs.iter_mut().rev() {
            let new_carry = *limb >> 62;
            *limb = (*limb << 2) | carry;
            carry = new_carry;
        }
    }

    /// The `i`-th base (0 = first base read), as a 2-bit value in `0..4`.
    fn base_at(&self, k: usize, i: usize) -> u8 {
        // base i sits at bit offset 2*(k-1-i) from the LSB of the whole array.
        let bit_offset = 2 * (k - 1 - i);
        let limb_idx_from_end = bit_offset / 64;
        let limb_idx = L - 1 - limb_idx_from_end;
        let shift = bit_offset % 64;
        ((self.limbs[limb_idx] >> shift) & 0b11) as u8
    }

    /// Bitwise complement of every packed base (A<->T, C<->G all fall out of
    /// `base XOR 0b11`, so complementing the whole word is just `!limb`).
    fn complement_bits(&self) -> Self {
        let mut out = *self;
        for limb in &mut out.limbs {
            *limb = !*limb;
        }
        out
    }

    fn reverse_complement(&self, k: usize) -> Self {
        let comp = self.complement_bits();
        let mut out = Self::ZERO;
        // digit-reversal: base i of `comp` becomes base (k-1-i) of the result.
        for i in 0..k {
            out.push_base(comp.base_at(k, k - 1 - i));
        }
        out
    }

    fn to_ascii(self, k: usize) -> Vec<u8> {
        (0..k).map(|i| unpack_base(self.base_at(k, i))).collect()
    }
}

fn pack_base(byte: u8) -> Result<u8, u8> {
    match byte {
        b'A' | b'a' => Ok(0),
        b'C' | b'c' => Ok(1),
        b'G' | b'g' => Ok(2),
        b'T' | b't' => Ok(3),
        other => Err(other),
    }
}

fn unpack_base(code: u8) -> u8 {
    match code {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        3 => b'T',
        _ => unreachable!("2-bit code is always in 0..4"),
    }
}

/// A canonical, fixed-length, 2-bit-packed DNA word.
///
/// `Kmer` dispatches to one of four compiled limb-count specializations
/// (`K1`..`K4`, i.e. `ceil(k/32)` in `1..=4`) depending on `k`, rather than
/// templating the whole crate on a compile-time `MAX_K` as the source does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kmer {
    K1 { k: usize, word: PackedWord<1> },
    K2 { k: usize, word: PackedWord<2> },
    K3 { k: usize, word: PackedWord<3> },
    K4 { k: usize, word: PackedWord<4> },
}

macro_rules! dispatch {
    ($self:expr, $binding:ident => $body:expr) => {
        match $self {
            Kmer::K1 { word: $binding, .. } => $body,
            Kmer::K2 { word: $binding, .. } => $body,
            Kmer::K3 { word: $binding, .. } => $body,
            Kmer::K4 { word: $binding, .. } => $body,
        }
    };
}

impl Kmer {
    /// Builds a k-mer from an ASCII DNA string, validating length and bases.
    ///
    /// Lowercase soft-masked bases are accepted and uppercased, matching the
    /// original `Kmer::from_sub` behavior.
    pub fn from_ascii(bytes: &[u8]) -> Result<Self, KmerError> {
        let k = bytes.len();
        validate_k(k)?;
        for (position, &byte) in bytes.iter().enumerate() {
            if pack_base(byte).is_err() {
                return Err(KmerError::InvalidBase(crate::error::InvalidBaseError {
                    base: byte,
                    position,
                }));
            }
        }
        Ok(Self::pack_validated(bytes, k))
    }

    /// Finds the index of the first byte that isn't a valid (upper or lower
    /// case) `A`/`C`/`G`/`T`, if any. Used by the partitioner (§4.5) to split
    /// reads at non-ACGT runs without re-validating byte by byte.
    #[must_use]
    pub fn find_invalid(bytes: &[u8]) -> Option<usize> {
        bytes.iter().position(|&b| pack_base(b).is_err())
    }

    fn pack_validated(bytes: &[u8], k: usize) -> Self {
        macro_rules! build {
            ($variant:ident, $n:literal) => {{
                let mut word = PackedWord::<$n>::ZERO;
                for &byte in bytes {
                    // validated by the caller.
                    let code = pack_base(byte).unwrap_or(0);
                    word.push_base(code);
                }
                Kmer::$variant { k, word }
            }};
        }
        match limbs_for(k) {
            1 => build!(K1, 1),
            2 => build!(K2, 2),
            3 => build!(K3, 3),
            _ => build!(K4, 4),
        }
    }

    /// Length of this k-mer.
    #[must_use]
    pub fn k(&self) -> usize {
        match self {
            Kmer::K1 { k, .. } | Kmer::K2 { k, .. } | Kmer::K3 { k, .. } | Kmer::K4 { k, .. } => *k,
        }
    }

    /// Reverse complement of this k-mer.
    #[must_use]
    pub fn reverse_complement(&self) -> Self {
        match self {
            Kmer::K1 { k, word } => Kmer::K1 {
                k: *k,
                word: word.reverse_complement(*k),
            },
            Kmer::K2 { k, word } => Kmer::K2 {
                k: *k,
                word: word.reverse_complement(*k),
            },
            Kmer::K3 { k, word } => Kmer::K3 {
                k: *k,
                word: word.reverse_complement(*k),
            },
            Kmer::K4 { k, word } => Kmer::K4 {
                k: *k,
                word: word.reverse_complement(*k),
            },
        }
    }

    /// The lexicographically smaller of `self` and its reverse complement.
    #[must_use]
    pub fn canonical(&self) -> Self {
        let rc = self.reverse_complement();
        if self.cmp_packed(&rc) == std::cmp::Ordering::Greater {
            rc
        } else {
            *self
        }
    }

    fn cmp_packed(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Kmer::K1 { word: a, .. }, Kmer::K1 { word: b, .. }) => a.cmp(b),
            (Kmer::K2 { word: a, .. }, Kmer::K2 { word: b, .. }) => a.cmp(b),
            (Kmer::K3 { word: a, .. }, Kmer::K3 { word: b, .. }) => a.cmp(b),
            (Kmer::K4 { word: a, .. }, Kmer::K4 { word: b, .. }) => a.cmp(b),
            _ => unreachable!("k-mers of different lengths are never compared"),
        }
    }

    /// Unpacks back into an uppercase ASCII DNA string.
    #[must_use]
    pub fn to_ascii(&self) -> Vec<u8> {
        match self {
            Kmer::K1 { k, word } => word.to_ascii(*k),
            Kmer::K2 { k, word } => word.to_ascii(*k),
            Kmer::K3 { k, word } => word.to_ascii(*k),
            Kmer::K4 { k, word } => word.to_ascii(*k),
        }
    }

    /// Packed limbs, most significant first, zero-padded at the front.
    /// Used by the framed-file writers (C3/C4) to serialize the k-mer.
    #[must_use]
    pub fn limbs(&self) -> Vec<u64> {
        dispatch!(self, w => w.limbs.to_vec())
    }

    /// Rebuilds a k-mer from the `(k, limbs)` pair produced by [`Self::limbs`],
    /// the inverse used by readers of the merge/count file formats.
    ///
    /// # Errors
    /// Returns [`KmerError::InvalidLength`] if `k` is out of range or
    /// `limbs.len()` doesn't match `limbs_for(k)`.
    pub fn from_limbs(k: usize, limbs: &[u64]) -> Result<Self, KmerError> {
        validate_k(k)?;
        let expected = limbs_for(k);
        if limbs.len() != expected {
            return Err(KmerError::InvalidLength { k, min: MIN_K, max: K_MAX });
        }
        macro_rules! build {
            ($variant:ident, $n:literal) => {{
                let mut word = PackedWord::<$n>::ZERO;
                word.limbs.copy_from_slice(limbs);
                Kmer::$variant { k, word }
            }};
        }
        Ok(match expected {
            1 => build!(K1, 1),
            2 => build!(K2, 2),
            3 => build!(K3, 3),
            _ => build!(K4, 4),
        })
    }

    /// A 64-bit hash of the packed representation, via an invertible mixer
    /// seeded by [`HASH_SEED`] so results are reproducible across runs.
    #[must_use]
    pub fn hash64(&self) -> u64 {
        let limbs = self.limbs();
        let mut acc = HASH_SEED;
        for limb in limbs {
            acc = mix64(acc ^ limb);
        }
        acc
    }
}

/// Reproducible seed for [`mix64`]-based hashing, shared by k-mer and m-mer
/// hashing so the minimizer ordering is stable across runs.
pub const HASH_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Invertible 64-bit finalizer (the `fmix64` mixer), used to derive a
/// reproducible ordering over packed integers without needing a real
/// collision-resistant hash.
#[must_use]
pub fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_ascii_rejects_too_short() {
        let err = Kmer::from_ascii(b"ACG").unwrap_err();
        assert!(matches!(err, KmerError::InvalidLength { k: 3, .. }));
    }

    #[test]
    fn from_ascii_rejects_invalid_base() {
        let mut bytes = vec![b'A'; MIN_K];
        bytes[2] = b'N';
        let err = Kmer::from_ascii(&bytes).unwrap_err();
        assert!(matches!(
            err,
            KmerError::InvalidBase(crate::error::InvalidBaseError {
                base: b'N',
                position: 2
            })
        ));
    }

    #[test]
    fn lowercase_is_accepted_and_uppercased() {
        let upper = Kmer::from_ascii(b"ACGTACGT").unwrap();
        let lower = Kmer::from_ascii(b"acgtacgt").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(lower.to_ascii(), b"ACGTACGT");
    }

    #[test]
    fn roundtrip_pack_unpack_single_limb() {
        let seq = b"ACGTACGTACGTACGTACGTACGTACGTACGT"; // 33 bases -> 2 limbs
        let kmer = Kmer::from_ascii(seq).unwrap();
        assert_eq!(kmer.to_ascii(), seq);
    }

    #[test]
    fn roundtrip_across_all_limb_specializations() {
        for k in [MIN_K, 32, 33, 64, 65, 96, 97, 128] {
            let seq: Vec<u8> = (0..k).map(|i| [b'A', b'C', b'G', b'T'][i % 4]).collect();
            let kmer = Kmer::from_ascii(&seq).unwrap();
            assert_eq!(kmer.to_ascii(), seq, "roundtrip failed for k={k}");
        }
    }

    #[test]
    fn reverse_complement_matches_known_value() {
        let kmer = Kmer::from_ascii(b"ACGTACGT").unwrap();
        let rc = kmer.reverse_complement();
        assert_eq!(rc.to_ascii(), b"ACGTACGT".to_vec()); // palindromic
        let kmer2 = Kmer::from_ascii(b"AAAACCCC").unwrap();
        assert_eq!(kmer2.reverse_complement().to_ascii(), b"GGGGTTTT");
    }

    #[test]
    fn reverse_complement_multi_limb() {
        let seq: Vec<u8> = vec![b'A'; 40].into_iter().chain(vec![b'C'; 40]).collect();
        let kmer = Kmer::from_ascii(&seq).unwrap();
        let rc = kmer.reverse_complement();
        let mut expected = vec![b'G'; 40];
        expected.extend(vec![b'T'; 40]);
        assert_eq!(rc.to_ascii(), expected);
    }

    #[test]
    fn canonical_picks_lexicographically_smaller() {
        let a = Kmer::from_ascii(b"TTTTTTTT").unwrap();
        let rc_of_a = Kmer::from_ascii(b"AAAAAAAA").unwrap();
        assert_eq!(a.canonical(), rc_of_a.canonical());
        assert_eq!(a.canonical().to_ascii(), b"AAAAAAAA");
    }

    #[test]
    fn canonical_is_idempotent() {
        let kmer = Kmer::from_ascii(b"ACGTACGT").unwrap();
        let c1 = kmer.canonical();
        assert_eq!(c1.canonical(), c1);
    }

    #[test]
    fn ordering_matches_lexicographic_ascii_order() {
        let a = Kmer::from_ascii(b"AAAAAAAA").unwrap();
        let c = Kmer::from_ascii(b"CAAAAAAA").unwrap();
        assert_eq!(a.cmp_packed(&c), std::cmp::Ordering::Less);
    }

    #[test]
    fn find_invalid_locates_first_bad_byte() {
        assert_eq!(Kmer::find_invalid(b"ACGTNACGT"), Some(4));
        assert_eq!(Kmer::find_invalid(b"ACGTACGT"), None);
    }

    #[test]
    fn hash_is_reproducible() {
        let a = Kmer::from_ascii(b"ACGTACGT").unwrap();
        let b = Kmer::from_ascii(b"ACGTACGT").unwrap();
        assert_eq!(a.hash64(), b.hash64());
        let c = Kmer::from_ascii(b"TTTTTTTT").unwrap();
        assert_ne!(a.hash64(), c.hash64());
    }

    #[test]
    fn from_limbs_is_the_inverse_of_limbs() {
        for k in [MIN_K, 32, 33, 96, 128] {
            let seq: Vec<u8> = (0..k).map(|i| [b'A', b'C', b'G', b'T'][i % 4]).collect();
            let kmer = Kmer::from_ascii(&seq).unwrap();
            let rebuilt = Kmer::from_limbs(k, &kmer.limbs()).unwrap();
            assert_eq!(rebuilt, kmer);
        }
    }

    #[test]
    fn mix64_is_a_bijection_on_small_sample() {
        let mut seen = std::collections::HashSet::new();
        for x in 0u64..1000 {
            assert!(seen.insert(mix64(x)));
        }
    }
}
