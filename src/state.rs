//! C9 (state half): persisted pipeline-step completion bitmap.
//!
//! The resume mechanism from §4.9/§9: every successful task flips one bit
//! here and fsyncs the file before the scheduler enqueues anything that
//! depends on it, so a killed-and-restarted run can tell which steps are
//! already done without re-deriving it from which output files happen to
//! exist on disk (a partially-written file could otherwise look finished).
//! Grounded on `examples/original_source/include/kmtricks/state.hpp`'s
//! bitmap-of-bytes layout, one byte per flag rather than a packed bitset,
//! trading a little size for trivial indexing and no endianness concerns.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::IoError;

/// In-memory mirror of the on-disk state file, guarded by a single lock
/// spanning bitmap update + fsync (§5: "the state-file write takes a full
/// lock spanning the bitmap update and fsync").
pub struct PipelineState {
    path: PathBuf,
    inner: Mutex<Bitmaps>,
}

struct Bitmaps {
    config_done: bool,
    repart_done: bool,
    superk: Vec<bool>,      // len = num_samples
    count: Vec<bool>,       // len = num_samples * num_partitions, row-major by sample
    merge: Vec<bool>,       // len = num_partitions
    num_samples: usize,
    num_partitions: usize,
}

impl PipelineState {
    /// Creates a fresh, all-`false` state for a run with `num_samples`
    /// samples and `num_partitions` partitions.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, num_samples: usize, num_partitions: usize) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(Bitmaps {
                config_done: false,
                repart_done: false,
                superk: vec![false; num_samples],
                count: vec![false; num_samples * num_partitions],
                merge: vec![false; num_partitions],
                num_samples,
                num_partitions,
            }),
        }
    }

    /// Loads existing state from `path` if present (the resume path),
    /// otherwise creates a fresh all-`false` state — mirroring §4.9's "on
    /// startup, completed tasks are skipped" behavior.
    ///
    /// # Errors
    /// Returns [`IoError`] if the file exists but is truncated or corrupt.
    pub fn load_or_create(
        path: impl Into<PathBuf>,
        num_samples: usize,
        num_partitions: usize,
    ) -> Result<Self, IoError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::new(path, num_samples, num_partitions));
        }
        let mut bytes = Vec::new();
        File::open(&path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| IoError::os(&path, e))?;

        let expected_len = 2 + num_samples + num_samples * num_partitions + num_partitions;
        if bytes.len() != expected_len {
            return Err(IoError::InvalidHeader {
                path: path.clone(),
                expected: expected_len,
                found: bytes.len(),
            });
        }

        let mut pos = 0;
        let config_done = bytes[pos] != 0;
        pos += 1;
        let repart_done = bytes[pos] != 0;
        pos += 1;
        let superk: Vec<bool> = bytes[pos..pos + num_samples].iter().map(|&b| b != 0).collect();
        pos += num_samples;
        let count: Vec<bool> = bytes[pos..pos + num_samples * num_partitions]
            .iter()
            .map(|&b| b != 0)
            .collect();
        pos += num_samples * num_partitions;
        let merge: Vec<bool> = bytes[pos..pos + num_partitions].iter().map(|&b| b != 0).collect();

        Ok(Self {
            path,
            inner: Mutex::new(Bitmaps {
                config_done,
                repart_done,
                superk,
                count,
                merge,
                num_samples,
                num_partitions,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bitmaps> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Serializes the current bitmaps to the §6 layout and fsyncs, holding
    /// the lock across both the write and the fsync.
    fn persist(&self, bitmaps: &Bitmaps) -> Result<(), IoError> {
        let mut buf = Vec::with_capacity(2 + bitmaps.superk.len() + bitmaps.count.len() + bitmaps.merge.len());
        buf.push(u8::from(bitmaps.config_done));
        buf.push(u8::from(bitmaps.repart_done));
        buf.extend(bitmaps.superk.iter().map(|&b| u8::from(b)));
        buf.extend(bitmaps.count.iter().map(|&b| u8::from(b)));
        buf.extend(bitmaps.merge.iter().map(|&b| u8::from(b)));

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| IoError::os(&self.path, e))?;
        file.write_all(&buf).map_err(|e| IoError::os(&self.path, e))?;
        file.sync_all().map_err(|e| IoError::os(&self.path, e))?;
        Ok(())
    }

    /// # Errors
    /// Returns [`IoError::Os`] if the file can't be written or fsynced.
    pub fn mark_config_done(&self) -> Result<(), IoError> {
        let mut guard = self.lock();
        guard.config_done = true;
        self.persist(&guard)
    }

    /// # Errors
    /// Returns [`IoError::Os`] if the file can't be written or fsynced.
    pub fn mark_repart_done(&self) -> Result<(), IoError> {
        let mut guard = self.lock();
        guard.repart_done = true;
        self.persist(&guard)
    }

    /// # Errors
    /// Returns [`IoError::Os`] if the file can't be written or fsynced.
    pub fn mark_superk_done(&self, sample_idx: usize) -> Result<(), IoError> {
        let mut guard = self.lock();
        guard.superk[sample_idx] = true;
        self.persist(&guard)
    }

    /// # Errors
    /// Returns [`IoError::Os`] if the file can't be written or fsynced.
    pub fn mark_count_done(&self, sample_idx: usize, partition: usize) -> Result<(), IoError> {
        let mut guard = self.lock();
        let idx = sample_idx * guard.num_partitions + partition;
        guard.count[idx] = true;
        self.persist(&guard)
    }

    /// # Errors
    /// Returns [`IoError::Os`] if the file can't be written or fsynced.
    pub fn mark_merge_done(&self, partition: usize) -> Result<(), IoError> {
        let mut guard = self.lock();
        guard.merge[partition] = true;
        self.persist(&guard)
    }

    #[must_use]
    pub fn is_config_done(&self) -> bool {
        self.lock().config_done
    }

    #[must_use]
    pub fn is_repart_done(&self) -> bool {
        self.lock().repart_done
    }

    #[must_use]
    pub fn is_superk_done(&self, sample_idx: usize) -> bool {
        self.lock().superk[sample_idx]
    }

    #[must_use]
    pub fn is_count_done(&self, sample_idx: usize, partition: usize) -> bool {
        let guard = self.lock();
        guard.count[sample_idx * guard.num_partitions + partition]
    }

    /// All samples have finished super-k-mer partitioning for `partition`
    /// — the CREATED -> SUPERK_DONE transition from §4.9's per-partition
    /// state machine. (Super-k-mer partitioning itself is per-sample, not
    /// per-partition, but this answers "is partition `p`'s input ready for
    /// counting".)
    #[must_use]
    pub fn all_superk_done(&self) -> bool {
        self.lock().superk.iter().all(|&done| done)
    }

    /// Every sample has finished counting `partition` — SUPERK_DONE ->
    /// COUNT_DONE.
    #[must_use]
    pub fn partition_count_done(&self, partition: usize) -> bool {
        let guard = self.lock();
        (0..guard.num_samples).all(|s| guard.count[s * guard.num_partitions + partition])
    }

    #[must_use]
    pub fn is_merge_done(&self, partition: usize) -> bool {
        self.lock().merge[partition]
    }

    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.lock().num_samples
    }

    #[must_use]
    pub fn num_partitions(&self) -> usize {
        self.lock().num_partitions
    }
}

/// One partition's lifecycle stage, per §4.9: `CREATED -> SUPERK_DONE ->
/// COUNT_DONE -> MERGED`. Terminal states only ever write their own direct
/// artifact; they never mutate an upstream one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStage {
    Created,
    SuperkDone,
    CountDone,
    Merged,
}

#[must_use]
pub fn partition_stage(state: &PipelineState, partition: usize) -> PartitionStage {
    if state.is_merge_done(partition) {
        PartitionStage::Merged
    } else if state.partition_count_done(partition) {
        PartitionStage::CountDone
    } else if state.all_superk_done() {
        PartitionStage::SuperkDone
    } else {
        PartitionStage::Created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_all_false() {
        let dir = tempfile::tempdir().unwrap();
        let state = PipelineState::new(dir.path().join("state"), 3, 2);
        assert!(!state.is_config_done());
        assert!(!state.is_superk_done(0));
        assert!(!state.is_count_done(1, 1));
    }

    #[test]
    fn marking_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        let state = PipelineState::new(&path, 2, 2);
        state.mark_config_done().unwrap();
        state.mark_repart_done().unwrap();
        state.mark_superk_done(0).unwrap();
        state.mark_count_done(0, 1).unwrap();
        state.mark_merge_done(1).unwrap();

        let reloaded = PipelineState::load_or_create(&path, 2, 2).unwrap();
        assert!(reloaded.is_config_done());
        assert!(reloaded.is_repart_done());
        assert!(reloaded.is_superk_done(0));
        assert!(!reloaded.is_superk_done(1));
        assert!(reloaded.is_count_done(0, 1));
        assert!(!reloaded.is_count_done(0, 0));
        assert!(reloaded.is_merge_done(1));
        assert!(!reloaded.is_merge_done(0));
    }

    #[test]
    fn missing_file_loads_as_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let state = PipelineState::load_or_create(dir.path().join("nope"), 2, 2).unwrap();
        assert!(!state.is_config_done());
    }

    #[test]
    fn truncated_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        std::fs::write(&path, [0u8; 2]).unwrap();
        let err = PipelineState::load_or_create(&path, 2, 2).unwrap_err();
        assert!(matches!(err, IoError::InvalidHeader { .. }));
    }

    #[test]
    fn partition_stage_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let state = PipelineState::new(dir.path().join("state"), 2, 1);
        assert_eq!(partition_stage(&state, 0), PartitionStage::Created);
        state.mark_superk_done(0).unwrap();
        state.mark_superk_done(1).unwrap();
        assert_eq!(partition_stage(&state, 0), PartitionStage::SuperkDone);
        state.mark_count_done(0, 0).unwrap();
        state.mark_count_done(1, 0).unwrap();
        assert_eq!(partition_stage(&state, 0), PartitionStage::CountDone);
        state.mark_merge_done(0).unwrap();
        assert_eq!(partition_stage(&state, 0), PartitionStage::Merged);
    }
}
