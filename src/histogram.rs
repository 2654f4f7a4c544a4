//! C10: per-sample abundance histogram and trough-detection threshold picker.
//!
//! Built during counting (§4.6: `hist[min(count, U)]`) and consumed by the
//! `infos` subcommand to recommend a `--min-count` per sample.

use std::path::Path;

use crate::error::IoError;
use crate::framed::{write_framed, ArtifactKind, FramedReader};

/// A per-sample count histogram in the §6 on-disk shape: a dense bucket
/// array over `[lower, upper]` plus the two out-of-bound tails, tracked both
/// by distinct-k-mer count (`hist_unique`) and by total occurrences
/// (`hist_total`) since the abundance-threshold picker below only needs the
/// former but the counted-k-mer total is cheap to carry alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountHistogram {
    pub lower: u64,
    pub upper: u64,
    pub hist_unique: Vec<u64>,
    pub hist_total: Vec<u64>,
    pub oob_lo: u64,
    pub oob_hi: u64,
}

impl CountHistogram {
    /// Buckets `counts` (one entry per distinct k-mer) into `[lower, upper]`,
    /// folding anything outside that range into the out-of-bound tallies.
    #[must_use]
    pub fn build(counts: &[u64], lower: u64, upper: u64) -> Self {
        let width = (upper - lower + 1) as usize;
        let mut hist_unique = vec![0u64; width];
        let mut hist_total = vec![0u64; width];
        let mut oob_lo = 0u64;
        let mut oob_hi = 0u64;
        for &count in counts {
            if count < lower {
                oob_lo += 1;
            } else if count > upper {
                oob_hi += 1;
            } else {
                let idx = (count - lower) as usize;
                hist_unique[idx] += 1;
                hist_total[idx] += count;
            }
        }
        Self {
            lower,
            upper,
            hist_unique,
            hist_total,
            oob_lo,
            oob_hi,
        }
    }

    /// Picks a minimum-abundance threshold by trough detection: sequencing
    /// error k-mers form a peak at low counts, genuine k-mers a second peak
    /// at higher counts, and the threshold is the count at the first local
    /// minimum between them (the first bucket whose neighbors are both
    /// larger). Falls back to `lower` (accept everything) if no trough is
    /// found, e.g. a monotonically decreasing histogram.
    #[must_use]
    pub fn pick_threshold(&self) -> u64 {
        for i in 1..self.hist_unique.len().saturating_sub(1) {
            if self.hist_unique[i] < self.hist_unique[i - 1] && self.hist_unique[i] < self.hist_unique[i + 1] {
                return self.lower + i as u64;
            }
        }
        self.lower
    }

    /// Writes this histogram as a single framed record matching §6's layout.
    ///
    /// # Errors
    /// Returns [`IoError::Os`] on any filesystem failure.
    pub fn write(&self, path: &Path) -> Result<(), IoError> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&self.lower.to_le_bytes());
        frame.extend_from_slice(&self.upper.to_le_bytes());
        for &v in &self.hist_unique {
            frame.extend_from_slice(&v.to_le_bytes());
        }
        for &v in &self.hist_total {
            frame.extend_from_slice(&v.to_le_bytes());
        }
        frame.extend_from_slice(&self.oob_lo.to_le_bytes());
        frame.extend_from_slice(&self.oob_hi.to_le_bytes());
        write_framed(path, ArtifactKind::Count, std::iter::once(frame.as_slice()), true)
    }

    /// Reads a histogram written by [`Self::write`].
    ///
    /// # Errors
    /// Returns [`IoError::InvalidHeader`] if the frame is shorter than the
    /// fixed header plus its declared bucket arrays.
    pub fn read(path: &Path) -> Result<Self, IoError> {
        let mut reader = FramedReader::open(path, ArtifactKind::Count)?;
        let frame = reader.next_frame()?.unwrap_or_default();
        if frame.len() < 16 {
            return Err(IoError::InvalidHeader {
                path: path.to_path_buf(),
                expected: 16,
                found: frame.len(),
            });
        }
        let lower = u64::from_le_bytes(frame[0..8].try_into().expect("8 bytes"));
        let upper = u64::from_le_bytes(frame[8..16].try_into().expect("8 bytes"));
        let width = (upper - lower + 1) as usize;
        let expected = 16 + width * 16 + 16;
        if frame.len() != expected {
            return Err(IoError::InvalidHeader {
                path: path.to_path_buf(),
                expected,
                found: frame.len(),
            });
        }
        let mut pos = 16;
        let hist_unique: Vec<u64> = frame[pos..pos + width * 8]
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().expect("8 bytes")))
            .collect();
        pos += width * 8;
        let hist_total: Vec<u64> = frame[pos..pos + width * 8]
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().expect("8 bytes")))
            .collect();
        pos += width * 8;
        let oob_lo = u64::from_le_bytes(frame[pos..pos + 8].try_into().expect("8 bytes"));
        let oob_hi = u64::from_le_bytes(frame[pos + 8..pos + 16].try_into().expect("8 bytes"));
        Ok(Self {
            lower,
            upper,
            hist_unique,
            hist_total,
            oob_lo,
            oob_hi,
        })
    }
}
