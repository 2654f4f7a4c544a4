//! C8: run configuration and the `<run>/` directory layout.
//!
//! Derives `P` (partition count), `m` (minimizer length) and `W` (Bloom
//! bits per partition) from user-supplied or default parameters, validates
//! them, and lays out the canonical directory tree from §4.8. Also owns the
//! config file's fixed-width binary header from §6.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, IoError};
use crate::kmer::{K_MAX, MIN_K};

/// 8-byte magic for the config file header.
pub const MAGIC: &[u8; 8] = b"KMTRCFG\0";
pub const VERSION: u32 = 1;

/// Smallest accepted minimizer length.
pub const MIN_M: usize = 4;
/// Largest accepted minimizer length (keeps `4^m` tables small).
pub const MAX_M: usize = 15;

/// Lower/upper bound on the auto-derived partition count, independent of
/// any user cap: below the floor there's no point partitioning at all,
/// above the ceiling most systems run out of file descriptors.
pub const MIN_PARTITIONS: u16 = 4;
pub const MAX_PARTITIONS: u16 = 4096;

/// Which key a counted/matrix file is sorted and stored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Full packed k-mer.
    Kmer,
    /// 64-bit hash of the canonical k-mer.
    Hash,
}

impl KeyMode {
    const fn tag(self) -> u32 {
        match self {
            KeyMode::Kmer => 0,
            KeyMode::Hash => 1,
        }
    }

    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(KeyMode::Kmer),
            1 => Some(KeyMode::Hash),
            _ => None,
        }
    }
}

/// What shape the final merged output takes, mirroring
/// [`crate::merge::MergeMode`] but persisted in the config file so a resumed
/// run doesn't need it re-specified on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    CountMatrix,
    PresenceAbsence,
    BloomStripe,
}

impl OutputKind {
    const fn tag(self) -> u32 {
        match self {
            OutputKind::CountMatrix => 0,
            OutputKind::PresenceAbsence => 1,
            OutputKind::BloomStripe => 2,
        }
    }

    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(OutputKind::CountMatrix),
            1 => Some(OutputKind::PresenceAbsence),
            2 => Some(OutputKind::BloomStripe),
            _ => None,
        }
    }
}

/// The full set of parameters derived once at startup and shared by every
/// later pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub k: usize,
    pub m: usize,
    pub partitions: u16,
    /// Bloom bits per partition, rounded up to a multiple of 64.
    pub bloom_bits: u32,
    pub count_width_bytes: u8,
    pub key_mode: KeyMode,
    pub output_kind: OutputKind,
    /// Default per-sample minimum abundance; overridable per sample via fof `!N`.
    pub default_min_count: u64,
    /// Minimum number of samples that must carry a k-mer for its merged row
    /// to survive (§4.7's `r_min`).
    pub r_min: usize,
    /// Total memory budget in bytes, divided across concurrently running
    /// counters by the scheduler.
    pub memory_budget_bytes: u64,
}

impl PipelineConfig {
    /// Validates `k`/`m` and derives `partitions`/`bloom_bits` if not given
    /// explicitly, per §4.8's rule: partitions are proportional to the
    /// estimated distinct-kmer volume divided by the per-partition memory
    /// budget, clamped to `[MIN_PARTITIONS, user_cap.unwrap_or(MAX_PARTITIONS)]`.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidKmerLength`], [`ConfigError::InvalidMinimizerLength`]
    /// or [`ConfigError::IncompatibleOptions`] on out-of-range or inconsistent parameters.
    #[allow(clippy::too_many_arguments)]
    pub fn derive(
        k: usize,
        m: usize,
        estimated_distinct_kmers: u64,
        partitions_cap: Option<u16>,
        memory_budget_bytes: u64,
        count_width_bytes: u8,
        key_mode: KeyMode,
        output_kind: OutputKind,
        default_min_count: u64,
        r_min: usize,
    ) -> Result<Self, ConfigError> {
        if !(MIN_K..=K_MAX).contains(&k) {
            return Err(ConfigError::InvalidKmerLength { k, min: MIN_K, max: K_MAX });
        }
        if m == 0 || m >= k || !(MIN_M..=MAX_M).contains(&m) {
            return Err(ConfigError::InvalidMinimizerLength { m, k });
        }
        if matches!(output_kind, OutputKind::BloomStripe) && matches!(key_mode, KeyMode::Kmer) {
            return Err(ConfigError::IncompatibleOptions {
                details: "Bloom-stripe output requires hash-mode keys".to_string(),
            });
        }

        let cap = partitions_cap.unwrap_or(MAX_PARTITIONS).clamp(MIN_PARTITIONS, MAX_PARTITIONS);
        let per_partition_budget = memory_budget_bytes.max(1) / u64::from(cap).max(1);
        let bytes_per_kmer = 96u64; // matches counter::BYTES_PER_ENTRY_ESTIMATE
        let needed_partitions = (estimated_distinct_kmers * bytes_per_kmer)
            .div_ceil(per_partition_budget.max(1))
            .max(1);
        let partitions = u16::try_from(needed_partitions.clamp(u64::from(MIN_PARTITIONS), u64::from(cap)))
            .unwrap_or(cap);

        let bloom_bits = round_up_to_64(default_bloom_bits(estimated_distinct_kmers, partitions));

        Ok(Self {
            k,
            m,
            partitions,
            bloom_bits,
            count_width_bytes,
            key_mode,
            output_kind,
            default_min_count,
            r_min,
            memory_budget_bytes,
        })
    }

    /// Serializes the fixed-width header described in §6.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.k as u32).to_le_bytes());
        buf.extend_from_slice(&(self.m as u32).to_le_bytes());
        buf.extend_from_slice(&self.partitions.to_le_bytes());
        buf.extend_from_slice(&[0u8; 2]); // padding, keeps the trailing u32s 4-byte aligned
        buf.extend_from_slice(&self.bloom_bits.to_le_bytes());
        buf.push(self.count_width_bytes);
        buf.extend_from_slice(&[0u8; 3]); // padding
        buf.extend_from_slice(&self.key_mode.tag().to_le_bytes());
        buf.extend_from_slice(&self.output_kind.tag().to_le_bytes());
        buf.extend_from_slice(&self.default_min_count.to_le_bytes());
        buf.extend_from_slice(&(self.r_min as u64).to_le_bytes());
        buf.extend_from_slice(&self.memory_budget_bytes.to_le_bytes());
        buf
    }

    /// Parses the layout produced by [`Self::to_bytes`].
    ///
    /// # Errors
    /// Returns [`IoError::InvalidHeader`] if truncated, [`IoError::WrongKind`]
    /// on a magic mismatch, and [`IoError::UnsupportedVersion`] on a newer
    /// version than this build understands.
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self, IoError> {
        const MIN_LEN: usize = 64;
        if bytes.len() < MIN_LEN {
            return Err(IoError::InvalidHeader {
                path: path.to_path_buf(),
                expected: MIN_LEN,
                found: bytes.len(),
            });
        }
        let mut found = [0u8; 8];
        found.copy_from_slice(&bytes[0..8]);
        if &found != MAGIC {
            return Err(IoError::WrongKind {
                path: path.to_path_buf(),
                expected: *MAGIC,
                found,
            });
        }
        let version = u32::from_le_bytes(bytes[8..12].try_into().expect("4 bytes"));
        if version > VERSION {
            return Err(IoError::UnsupportedVersion {
                path: path.to_path_buf(),
                expected: VERSION,
                found: version,
            });
        }
        let k = u32::from_le_bytes(bytes[12..16].try_into().expect("4 bytes")) as usize;
        let m = u32::from_le_bytes(bytes[16..20].try_into().expect("4 bytes")) as usize;
        let partitions = u16::from_le_bytes(bytes[20..22].try_into().expect("2 bytes"));
        let bloom_bits = u32::from_le_bytes(bytes[24..28].try_into().expect("4 bytes"));
        let count_width_bytes = bytes[28];
        let key_mode_tag = u32::from_le_bytes(bytes[32..36].try_into().expect("4 bytes"));
        let output_tag = u32::from_le_bytes(bytes[36..40].try_into().expect("4 bytes"));
        let default_min_count = u64::from_le_bytes(bytes[40..48].try_into().expect("8 bytes"));
        let r_min = u64::from_le_bytes(bytes[48..56].try_into().expect("8 bytes")) as usize;
        let memory_budget_bytes = u64::from_le_bytes(bytes[56..64].try_into().expect("8 bytes"));

        let invalid_header = || IoError::InvalidHeader {
            path: path.to_path_buf(),
            expected: MIN_LEN,
            found: bytes.len(),
        };
        let key_mode = KeyMode::from_tag(key_mode_tag).ok_or_else(invalid_header)?;
        let output_kind = OutputKind::from_tag(output_tag).ok_or_else(invalid_header)?;

        Ok(Self {
            k,
            m,
            partitions,
            bloom_bits,
            count_width_bytes,
            key_mode,
            output_kind,
            default_min_count,
            r_min,
            memory_budget_bytes,
        })
    }
}

fn default_bloom_bits(estimated_distinct_kmers: u64, partitions: u16) -> u32 {
    // ~10 bits/element per partition is the usual Bloom sizing rule of
    // thumb for a single-digit-percent false-positive rate.
    let per_partition = estimated_distinct_kmers.max(1) / u64::from(partitions.max(1));
    u32::try_from((per_partition * 10).max(64)).unwrap_or(u32::MAX)
}

const fn round_up_to_64(bits: u32) -> u32 {
    (bits + 63) / 64 * 64
}

/// The canonical `<run>/` directory tree from §4.8.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config")
    }

    #[must_use]
    pub fn repartition_path(&self) -> PathBuf {
        self.root.join("repartition")
    }

    #[must_use]
    pub fn fof_path(&self) -> PathBuf {
        self.root.join("fof")
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.root.join("state")
    }

    #[must_use]
    pub fn superkmer_dir(&self, sample: &str) -> PathBuf {
        self.root.join("partition_storage").join("superkmer").join(sample)
    }

    #[must_use]
    pub fn superkmer_partition_path(&self, sample: &str, partition: u16) -> PathBuf {
        self.superkmer_dir(sample).join(format!("partition_{partition}.superk"))
    }

    #[must_use]
    pub fn count_dir(&self, sample: &str) -> PathBuf {
        self.root.join("partition_storage").join("kmer_count").join(sample)
    }

    #[must_use]
    pub fn count_partition_path(&self, sample: &str, partition: u16, key_mode: KeyMode) -> PathBuf {
        let ext = match key_mode {
            KeyMode::Kmer => "kmer",
            KeyMode::Hash => "hash",
        };
        self.count_dir(sample).join(format!("partition_{partition}.{ext}"))
    }

    #[must_use]
    pub fn matrix_dir(&self) -> PathBuf {
        self.root.join("matrix_storage").join("matrices")
    }

    #[must_use]
    pub fn matrix_partition_path(&self, partition: u16) -> PathBuf {
        self.matrix_dir().join(format!("partition_{partition}.mat"))
    }

    #[must_use]
    pub fn histogram_dir(&self) -> PathBuf {
        self.root.join("histograms")
    }

    #[must_use]
    pub fn histogram_path(&self, sample: &str) -> PathBuf {
        self.histogram_dir().join(format!("{sample}.hist"))
    }

    /// Creates every directory in the tree that a fresh run will write to,
    /// except the per-sample subdirectories under `superkmer`/`kmer_count`,
    /// which [`Self::ensure_sample_dirs`] creates once the sample list is
    /// known.
    ///
    /// # Errors
    /// Returns [`IoError::Os`] if any directory can't be created.
    pub fn ensure_base_dirs(&self) -> Result<(), IoError> {
        for dir in [
            self.root.join("partition_storage").join("superkmer"),
            self.root.join("partition_storage").join("kmer_count"),
            self.matrix_dir(),
            self.histogram_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| IoError::os(&dir, e))?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`IoError::Os`] if either per-sample directory can't be created.
    pub fn ensure_sample_dirs(&self, sample: &str) -> Result<(), IoError> {
        let sk_dir = self.superkmer_dir(sample);
        fs::create_dir_all(&sk_dir).map_err(|e| IoError::os(&sk_dir, e))?;
        let count_dir = self.count_dir(sample);
        fs::create_dir_all(&count_dir).map_err(|e| IoError::os(&count_dir, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_rejects_k_out_of_range() {
        let err = PipelineConfig::derive(
            4, 3, 1000, None, 1 << 20, 4, KeyMode::Kmer, OutputKind::CountMatrix, 1, 1,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKmerLength { .. }));
    }

    #[test]
    fn derive_rejects_m_not_smaller_than_k() {
        let err = PipelineConfig::derive(
            20, 20, 1000, None, 1 << 20, 4, KeyMode::Kmer, OutputKind::CountMatrix, 1, 1,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMinimizerLength { .. }));
    }

    #[test]
    fn derive_rejects_bloom_stripe_with_kmer_keys() {
        let err = PipelineConfig::derive(
            20, 10, 1000, None, 1 << 20, 4, KeyMode::Kmer, OutputKind::BloomStripe, 1, 1,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::IncompatibleOptions { .. }));
    }

    #[test]
    fn derive_clamps_partitions_within_bounds() {
        let cfg = PipelineConfig::derive(
            20, 10, 10, None, 1 << 30, 4, KeyMode::Kmer, OutputKind::CountMatrix, 1, 1,
        )
        .unwrap();
        assert!((MIN_PARTITIONS..=MAX_PARTITIONS).contains(&cfg.partitions));
    }

    #[test]
    fn derive_respects_partitions_cap() {
        let cfg = PipelineConfig::derive(
            20, 10, 1_000_000_000, Some(8), 1, 4, KeyMode::Kmer, OutputKind::CountMatrix, 1, 1,
        )
        .unwrap();
        assert_eq!(cfg.partitions, 8);
    }

    #[test]
    fn bloom_bits_rounded_up_to_64() {
        let cfg = PipelineConfig::derive(
            20, 10, 1, Some(4), 1 << 20, 4, KeyMode::Hash, OutputKind::BloomStripe, 1, 1,
        )
        .unwrap();
        assert_eq!(cfg.bloom_bits % 64, 0);
    }

    #[test]
    fn roundtrip_through_bytes() {
        let cfg = PipelineConfig::derive(
            31, 10, 5000, Some(16), 1 << 24, 4, KeyMode::Hash, OutputKind::BloomStripe, 2, 1,
        )
        .unwrap();
        let bytes = cfg.to_bytes();
        let parsed = PipelineConfig::from_bytes(Path::new("config"), &bytes).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn from_bytes_rejects_wrong_magic() {
        let cfg = PipelineConfig::derive(
            21, 8, 100, Some(4), 1 << 20, 4, KeyMode::Kmer, OutputKind::CountMatrix, 1, 1,
        )
        .unwrap();
        let mut bytes = cfg.to_bytes();
        bytes[0] ^= 0xFF;
        let err = PipelineConfig::from_bytes(Path::new("config"), &bytes).unwrap_err();
        assert!(matches!(err, IoError::WrongKind { .. }));
    }

    #[test]
    fn layout_paths_are_under_root() {
        let layout = RunLayout::new("/tmp/run1");
        assert_eq!(layout.config_path(), PathBuf::from("/tmp/run1/config"));
        assert_eq!(
            layout.superkmer_partition_path("S1", 3),
            PathBuf::from("/tmp/run1/partition_storage/superkmer/S1/partition_3.superk")
        );
        assert_eq!(
            layout.count_partition_path("S1", 3, KeyMode::Hash),
            PathBuf::from("/tmp/run1/partition_storage/kmer_count/S1/partition_3.hash")
        );
        assert_eq!(
            layout.matrix_partition_path(3),
            PathBuf::from("/tmp/run1/matrix_storage/matrices/partition_3.mat")
        );
        assert_eq!(layout.histogram_path("S1"), PathBuf::from("/tmp/run1/histograms/S1.hist"));
    }
}
