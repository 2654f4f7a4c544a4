//! C9 (scheduler half): priority-queue worker pool driving the superk/count/merge
//! pipeline, plus the repartition-table sampling pass that runs once before it.
//!
//! Mirrors §4.9/§5's shape directly rather than reusing rayon's work-stealing
//! pool for the *outer* pipeline: "one shared priority queue protected by a
//! mutex + condition variable" is a specific scheduling policy (priority
//! order, cooperative cancellation, completion callbacks that enqueue
//! dependents), which rayon's pool doesn't expose. Parallelism *within* a
//! task still goes through rayon exactly as [`crate::partition::Partitioner`]
//! and [`crate::counter::count_partition`] already do it — "within a task,
//! computation is single-threaded; parallelism is per-task" describes the
//! scheduler's view of a task, not what the task is allowed to do internally.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{KeyMode, OutputKind, PipelineConfig, RunLayout};
use crate::counter::{self, CountResult, OutputMode};
use crate::error::{DataError, KmtricksError};
use crate::fof::Sample;
use crate::histogram::CountHistogram;
use crate::kmer::Kmer;
use crate::merge::{self, MergeMode, SampleCursor, Solidity};
use crate::minimizer::scan_minimizers;
use crate::partition::{self, Partitioner};
use crate::repartition::RepartitionTable;
use crate::state::PipelineState;

/// One unit of pipeline work. Priority order (highest first) is
/// superk > count > merge, so a worker always drains upstream work before
/// downstream work becomes the only thing left in the queue — a tie-breaker,
/// not a correctness requirement, since real dependency gating happens via
/// [`PipelineState`] and the completion callbacks below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    Superk { sample: usize },
    Count { sample: usize, partition: usize },
    Merge { partition: usize },
}

impl Task {
    const fn rank(self) -> u8 {
        match self {
            Task::Superk { .. } => 2,
            Task::Count { .. } => 1,
            Task::Merge { .. } => 0,
        }
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// How far the pipeline should advance, for the `superk`/`count`/`merge`
/// CLI subcommands (§1: the CLI front-end is an external collaborator, but
/// it still needs a knob to stop the shared scheduler early rather than
/// duplicating the DAG-walking logic per subcommand).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Superk,
    Count,
    Merge,
}

/// Shared queue of pending tasks, guarded by a mutex + condition variable per
/// §5's scheduling model. `closed` is the cooperative-cancellation flag: once
/// set, `pop` stops blocking and returns `None` even if tasks remain, which is
/// how a SIGINT/SIGTERM "drains the queue by refusing new dequeues" while
/// letting already-dequeued tasks run to completion.
struct TaskQueue {
    heap: Mutex<BinaryHeap<Task>>,
    cond: Condvar,
    closed: AtomicBool,
    /// Number of tasks pushed but not yet fully drained (executed *and* had
    /// their dependents enqueued). Reaching zero means there is, transitively,
    /// no more work coming, so the queue closes itself instead of leaving
    /// idle workers parked on the condition variable forever.
    outstanding: AtomicUsize,
}

impl TaskQueue {
    fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            cond: Condvar::new(),
            closed: AtomicBool::new(false),
            outstanding: AtomicUsize::new(0),
        }
    }

    fn push(&self, task: Task) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let mut heap = self.heap.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        heap.push(task);
        self.cond.notify_one();
    }

    /// Marks one previously-popped task as fully drained (its dependents, if
    /// any, have already been enqueued). Closes the queue once nothing is
    /// outstanding.
    fn task_done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.close();
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }

    /// Blocks until a task is available, the queue is closed, or (on an
    /// empty, closed queue) there is nothing left to do.
    fn pop(&self) -> Option<Task> {
        let mut heap = self.heap.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if let Some(task) = heap.pop() {
                return Some(task);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            heap = self.cond.wait(heap).unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

/// Drives one run of the pipeline: repartition-table construction (if not
/// already sampled), then superk -> count -> merge for every sample and
/// partition, skipping whatever [`PipelineState`] already marks done.
pub struct Scheduler {
    config: PipelineConfig,
    layout: RunLayout,
    samples: Vec<Sample>,
    table: Arc<RepartitionTable>,
    state: Arc<PipelineState>,
    num_workers: usize,
    stop: Arc<AtomicBool>,
    until: Stage,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        layout: RunLayout,
        samples: Vec<Sample>,
        table: RepartitionTable,
        state: PipelineState,
        num_workers: usize,
    ) -> Self {
        let num_workers = num_workers.clamp(1, num_cpus());
        Self {
            config,
            layout,
            samples,
            table: Arc::new(table),
            state: Arc::new(state),
            num_workers,
            stop: Arc::new(AtomicBool::new(false)),
            until: Stage::Merge,
        }
    }

    /// Restricts this run to stop after `stage` instead of running the whole
    /// superk -> count -> merge DAG, for the `superk`/`count`/`merge` CLI
    /// subcommands. `all` leaves the default (`Stage::Merge`).
    #[must_use]
    pub const fn until(mut self, stage: Stage) -> Self {
        self.until = stage;
        self
    }

    /// Installs the SIGINT/SIGTERM handler for cooperative cancellation. Must
    /// be called at most once per process; `main` does this once at startup.
    ///
    /// # Errors
    /// Returns [`KmtricksError::Plugin`] (reused: `ctrlc` failures are an
    /// environment-setup problem, the closest existing variant) if a handler
    /// is already installed.
    pub fn install_signal_handler(&self) -> Result<(), KmtricksError> {
        let stop = Arc::clone(&self.stop);
        ctrlc::set_handler(move || {
            warn!("received interrupt, draining in-flight tasks and persisting state");
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|e| {
            KmtricksError::Plugin(crate::error::PluginError::LoadFailed {
                path: "ctrlc".into(),
                details: e.to_string(),
            })
        })
    }

    /// Runs every remaining stage to completion (or until cancelled).
    ///
    /// # Errors
    /// Returns [`KmtricksError`] if any task fails; tasks already completed in
    /// a prior run (per [`PipelineState`]) are skipped.
    pub fn run(&self) -> Result<(), KmtricksError> {
        self.layout.ensure_base_dirs().map_err(KmtricksError::from)?;
        for sample in &self.samples {
            self.layout.ensure_sample_dirs(&sample.id).map_err(KmtricksError::from)?;
        }

        let queue = Arc::new(TaskQueue::new());
        let enqueued_count: Arc<Vec<AtomicBool>> =
            Arc::new((0..self.samples.len() * usize::from(self.table.num_partitions())).map(|_| AtomicBool::new(false)).collect());
        let enqueued_merge: Arc<Vec<AtomicBool>> =
            Arc::new((0..usize::from(self.table.num_partitions())).map(|_| AtomicBool::new(false)).collect());

        for (idx, _) in self.samples.iter().enumerate() {
            if !self.state.is_superk_done(idx) {
                queue.push(Task::Superk { sample: idx });
            } else if self.until >= Stage::Count {
                self.enqueue_counts_for_sample(&queue, &enqueued_count, idx);
            }
        }
        if self.until >= Stage::Merge {
            for partition in 0..usize::from(self.table.num_partitions()) {
                if self.state.partition_count_done(partition) && !self.state.is_merge_done(partition) {
                    queue.push(Task::Merge { partition });
                    enqueued_merge[partition].store(true, Ordering::SeqCst);
                }
            }
        }
        // A fully-resumed run (everything already marked done) seeds no
        // tasks at all; nothing will ever call `task_done` to notice the
        // queue is empty, so close it up front instead of parking workers
        // forever on the condition variable.
        if queue.outstanding.load(Ordering::SeqCst) == 0 {
            queue.close();
        }

        std::thread::scope(|scope| -> Result<(), KmtricksError> {
            let mut handles = Vec::new();
            for worker_id in 0..self.num_workers {
                let queue = Arc::clone(&queue);
                let enqueued_count = Arc::clone(&enqueued_count);
                let enqueued_merge = Arc::clone(&enqueued_merge);
                handles.push(scope.spawn(move || self.worker_loop(worker_id, &queue, &enqueued_count, &enqueued_merge)));
            }
            let mut first_error = None;
            for handle in handles {
                if let Err(err) = handle.join().unwrap_or_else(|_| {
                    Ok(warn!("worker thread panicked"))
                }) {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn worker_loop(
        &self,
        worker_id: usize,
        queue: &TaskQueue,
        enqueued_count: &[AtomicBool],
        enqueued_merge: &[AtomicBool],
    ) -> Result<(), KmtricksError> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                // Cooperative cancellation: stop pulling new work even if the
                // queue isn't empty, and wake any sibling workers parked on
                // the condition variable so they see the same thing.
                queue.close();
                return Ok(());
            }
            let Some(task) = queue.pop() else { return Ok(()) };
            debug!(worker = worker_id, ?task, "executing task");
            let started = std::time::Instant::now();
            self.execute(task)?;
            debug!(worker = worker_id, ?task, elapsed_ms = started.elapsed().as_millis(), "task finished");
            self.enqueue_dependents(queue, task, enqueued_count, enqueued_merge);
            queue.task_done();
        }
    }

    fn enqueue_counts_for_sample(&self, queue: &TaskQueue, enqueued_count: &[AtomicBool], sample: usize) {
        let num_partitions = usize::from(self.table.num_partitions());
        for partition in 0..num_partitions {
            let idx = sample * num_partitions + partition;
            if !self.state.is_count_done(sample, partition) && !enqueued_count[idx].swap(true, Ordering::SeqCst) {
                queue.push(Task::Count { sample, partition });
            }
        }
    }

    fn enqueue_dependents(
        &self,
        queue: &TaskQueue,
        completed: Task,
        enqueued_count: &[AtomicBool],
        enqueued_merge: &[AtomicBool],
    ) {
        match completed {
            Task::Superk { sample } if self.until >= Stage::Count => {
                self.enqueue_counts_for_sample(queue, enqueued_count, sample);
            }
            Task::Count { partition, .. } if self.until >= Stage::Merge => {
                if self.state.partition_count_done(partition) && !enqueued_merge[partition].swap(true, Ordering::SeqCst) {
                    queue.push(Task::Merge { partition });
                }
            }
            Task::Superk { .. } | Task::Count { .. } | Task::Merge { .. } => {}
        }
    }

    fn execute(&self, task: Task) -> Result<(), KmtricksError> {
        match task {
            Task::Superk { sample } => self.run_superk(sample),
            Task::Count { sample, partition } => self.run_count(sample, partition),
            Task::Merge { partition } => self.run_merge(partition),
        }
    }

    fn run_superk(&self, sample_idx: usize) -> Result<(), KmtricksError> {
        let sample = &self.samples[sample_idx];
        let partitioner = Partitioner::new(self.config.k, self.config.m, (*self.table).clone());

        let mut sequences = Vec::new();
        for path in &sample.paths {
            let records =
                crate::reads::read_sequences(path, crate::format::SequenceFormat::Auto).map_err(KmtricksError::from)?;
            sequences.extend(records);
        }
        partitioner.process_sequences(sequences);
        partitioner.flush(&self.layout.superkmer_dir(&sample.id))?;

        self.state.mark_superk_done(sample_idx).map_err(KmtricksError::from)?;
        info!(sample = %sample.id, "super-k-mer partitioning done");
        Ok(())
    }

    fn run_count(&self, sample_idx: usize, partition: usize) -> Result<(), KmtricksError> {
        let sample = &self.samples[sample_idx];
        let path = self.layout.superkmer_partition_path(&sample.id, partition as u16);
        let records = if path.exists() {
            partition::read_partition(&path).map_err(KmtricksError::from)?
        } else {
            Vec::new()
        };

        let mode = output_mode_for(&self.config);
        let min_count = sample.min_count_override.unwrap_or(self.config.default_min_count);
        let per_counter_budget = self.config.memory_budget_bytes / self.num_workers.max(1) as u64;
        let result = counter::count_partition(
            &records,
            self.config.k,
            min_count,
            per_counter_budget,
            mode,
            partition as u32,
            self.config.count_width_bytes,
        )
        .map_err(KmtricksError::from)?;

        let out_path = self.layout.count_partition_path(&sample.id, partition as u16, self.config.key_mode);
        counter::write_counted_file(&out_path, &result).map_err(KmtricksError::from)?;

        self.state.mark_count_done(sample_idx, partition).map_err(KmtricksError::from)?;
        debug!(sample = %sample.id, partition, "partition counted");
        Ok(())
    }

    fn run_merge(&self, partition: usize) -> Result<(), KmtricksError> {
        let mut results = Vec::with_capacity(self.samples.len());
        for sample in &self.samples {
            let path = self.layout.count_partition_path(&sample.id, partition as u16, self.config.key_mode);
            let result = if path.exists() {
                counter::read_counted_file(&path).map_err(KmtricksError::from)?
            } else {
                empty_result_for(self.config.key_mode, self.config.output_kind)
            };
            results.push(result);
        }

        let solidity = if self.config.r_min <= 1 {
            Solidity::MinSamples(1)
        } else if self.config.r_min >= self.samples.len() {
            Solidity::All
        } else {
            Solidity::MinSamples(self.config.r_min)
        };
        let mode = merge_mode_for(self.config.output_kind);
        let out_path = self.layout.matrix_partition_path(partition as u16);

        match self.config.key_mode {
            KeyMode::Kmer => {
                let mut per_sample_entries: Vec<Vec<(Kmer, u64)>> = Vec::with_capacity(results.len());
                for (sample, r) in self.samples.iter().zip(&results) {
                    let CountResult::Kmer(map) = r else {
                        per_sample_entries.push(Vec::new());
                        continue;
                    };
                    let mut entries = Vec::with_capacity(map.len());
                    for (bytes, &count) in map {
                        let kmer = Kmer::from_ascii(bytes).map_err(|e| {
                            KmtricksError::Data(DataError::SuperKmer {
                                path: self.layout.count_partition_path(&sample.id, partition as u16, self.config.key_mode),
                                offset: 0,
                                details: e.to_string(),
                            })
                        })?;
                        entries.push((kmer, count));
                    }
                    per_sample_entries.push(entries);
                }
                let cursors: Vec<SampleCursor<'_>> = per_sample_entries
                    .iter()
                    .enumerate()
                    .map(|(i, entries)| SampleCursor::new(i as u32, entries))
                    .collect();
                let rows = merge::merge(cursors, self.samples.len(), solidity, mode, self.config.count_width_bytes);
                merge::write_matrix_file(&out_path, self.config.k, &rows, mode).map_err(KmtricksError::from)?;
            }
            KeyMode::Hash => {
                let per_sample_maps: Vec<BTreeMap<u64, u64>> = results
                    .iter()
                    .map(|r| match r {
                        CountResult::Hash(map) => map.clone(),
                        CountResult::Bloom(set) => set.iter().map(|&h| (h, 1u64)).collect(),
                        CountResult::Kmer(_) => BTreeMap::new(),
                    })
                    .collect();
                let rows = merge::merge_hash(&per_sample_maps, self.samples.len(), solidity, mode, self.config.count_width_bytes);
                if mode == MergeMode::BloomStripe {
                    let stripes = merge::fold_bloom_stripe(&rows, self.config.bloom_bits, self.samples.len());
                    merge::write_bloom_stripe_file(&out_path, &stripes, self.samples.len()).map_err(KmtricksError::from)?;
                } else {
                    merge::write_hash_matrix_file(&out_path, &rows, mode).map_err(KmtricksError::from)?;
                }
            }
        }

        self.state.mark_merge_done(partition).map_err(KmtricksError::from)?;
        info!(partition, "partition merged");
        Ok(())
    }
}

fn output_mode_for(config: &PipelineConfig) -> OutputMode {
    match (config.key_mode, config.output_kind) {
        (_, OutputKind::BloomStripe) => OutputMode::Bloom,
        (KeyMode::Hash, _) => OutputMode::Hash,
        (KeyMode::Kmer, _) => OutputMode::Kmer,
    }
}

fn merge_mode_for(output_kind: OutputKind) -> MergeMode {
    match output_kind {
        OutputKind::CountMatrix => MergeMode::CountMatrix,
        OutputKind::PresenceAbsence => MergeMode::PresenceAbsence,
        OutputKind::BloomStripe => MergeMode::BloomStripe,
    }
}

fn empty_result_for(key_mode: KeyMode, output_kind: OutputKind) -> CountResult {
    match (key_mode, output_kind) {
        (_, OutputKind::BloomStripe) => CountResult::Bloom(std::collections::BTreeSet::new()),
        (KeyMode::Hash, _) => CountResult::Hash(BTreeMap::new()),
        (KeyMode::Kmer, _) => CountResult::Kmer(BTreeMap::new()),
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1)
}

/// Builds a repartition table by sampling a fraction of each sample's reads,
/// accumulating canonical-minimizer frequency counts, and bin-packing them
/// via [`RepartitionTable::build`]. Falls back to [`RepartitionTable::uniform`]
/// if every sampled read turns out too short to yield a minimizer (tiny test
/// fixtures, mostly) rather than failing the run over an empty sample.
///
/// # Errors
/// Returns [`KmtricksError`] if a sample's input can't be read, or if
/// [`RepartitionTable::build`] rejects the derived parameters.
pub fn build_repartition_table(
    samples: &[Sample],
    k: usize,
    m: usize,
    num_partitions: u16,
    sample_fraction: f64,
) -> Result<RepartitionTable, KmtricksError> {
    let table_len = 4usize.pow(u32::try_from(m).unwrap_or(u32::MAX));
    let counts: Vec<std::sync::atomic::AtomicU64> = (0..table_len).map(|_| std::sync::atomic::AtomicU64::new(0)).collect();

    let every_nth = (1.0 / sample_fraction.clamp(f64::MIN_POSITIVE, 1.0)).round().max(1.0) as usize;

    samples.par_iter().try_for_each(|sample| -> Result<(), KmtricksError> {
        for path in &sample.paths {
            let sequences =
                crate::reads::read_sequences(path, crate::format::SequenceFormat::Auto).map_err(KmtricksError::from)?;
            for (i, seq) in sequences.iter().enumerate() {
                if i % every_nth != 0 {
                    continue;
                }
                for run in partition::valid_runs(seq) {
                    if run.len() < k {
                        continue;
                    }
                    for minimizer in scan_minimizers(run, k, m) {
                        let value = minimizer.value as usize % table_len;
                        counts[value].fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        Ok(())
    })?;

    let counts: Vec<u64> = counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();
    if counts.iter().all(|&c| c == 0) {
        return Ok(RepartitionTable::uniform(m, num_partitions));
    }
    RepartitionTable::build(&counts, m, num_partitions).map_err(KmtricksError::from)
}

/// Builds and persists a per-sample abundance histogram from a fully counted
/// sample (all of its partitions' counted files), and returns the picked
/// solidity threshold — the "recommended --min-count" the `infos` subcommand
/// (§10.5) surfaces to users who didn't set one explicitly.
///
/// # Errors
/// Returns [`KmtricksError`] if a counted file can't be read or the
/// histogram can't be written.
pub fn build_sample_histogram(
    layout: &RunLayout,
    config: &PipelineConfig,
    sample: &Sample,
    num_partitions: u16,
) -> Result<u64, KmtricksError> {
    let mut histograms = Vec::new();
    for partition in 0..num_partitions {
        let path = layout.count_partition_path(&sample.id, partition, config.key_mode);
        if !path.exists() {
            continue;
        }
        let result = counter::read_counted_file(&path).map_err(KmtricksError::from)?;
        histograms.push(result.histogram());
    }
    let merged = counter::merge_histograms(&histograms);
    let max_count = merged.keys().copied().max().unwrap_or(1);

    let mut counts = Vec::new();
    for (&count, &freq) in &merged {
        counts.extend(std::iter::repeat(count).take(freq as usize));
    }
    let histogram = CountHistogram::build(&counts, 1, max_count.max(1));
    let threshold = histogram.pick_threshold();
    histogram.write(&layout.histogram_path(&sample.id)).map_err(KmtricksError::from)?;
    Ok(threshold)
}
