//! kmtricks CLI front-end: option parsing, run-directory bootstrap, and
//! dispatch into [`kmerust::scheduler::Scheduler`]. Also hosts the
//! read-only `dump`/`aggregate` introspection commands, thin consumers of
//! the counted/matrix/histogram readers that carry no invariants of their
//! own.
//!
//! This file is the glue between argument handling and library calls,
//! matching the teacher's `main.rs` split.

use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use kmerust::cli::{Cli, CommonArgs, Command, DumpArgs, InfosArgs};
use kmerust::config::{KeyMode, OutputKind, PipelineConfig, RunLayout};
use kmerust::counter::{self, CountResult};
use kmerust::error::KmtricksError;
use kmerust::fof::{self, Sample};
use kmerust::histogram::CountHistogram;
use kmerust::merge;
use kmerust::repartition::RepartitionTable;
use kmerust::scheduler::{self, Scheduler, Stage};
use kmerust::state::PipelineState;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::All(args) => run_pipeline(&args.common, Stage::Merge),
        Command::Repart(args) => run_repart(&args.common),
        Command::Superk(args) => run_pipeline(&args.common, Stage::Superk),
        Command::Count(args) => run_pipeline(&args.common, Stage::Count),
        Command::Merge(args) => run_pipeline(&args.common, Stage::Merge),
        Command::Infos(args) => run_infos(&args),
        Command::Dump(args) => run_dump(&args),
        Command::Aggregate(args) => run_aggregate(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

/// Rough proxy for the input's distinct-kmer volume used to derive `P` and
/// `W` (§4.8): total input bytes, halved as a crude stand-in for the
/// fraction of a FASTA/FASTQ file that's actual sequence rather than
/// headers/quality lines. Only ever feeds the auto-derivation of partition
/// count and Bloom width, both of which degrade gracefully if this over- or
/// under-estimates.
fn estimate_distinct_kmers(samples: &[Sample]) -> u64 {
    samples
        .iter()
        .flat_map(|s| &s.paths)
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len() / 2)
        .sum()
}

/// Loads (or derives and persists) the config, fof, repartition table and
/// state for `common`'s run directory — the bootstrap every subcommand
/// needs before it can hand off to the scheduler.
fn bootstrap(
    common: &CommonArgs,
) -> Result<(PipelineConfig, RunLayout, Vec<Sample>, RepartitionTable, PipelineState), KmtricksError> {
    let layout = RunLayout::new(&common.run_dir);
    layout.ensure_base_dirs()?;

    let samples = fof::parse(&common.fof)?;
    fof::validate_paths_exist(&samples)?;
    std::fs::copy(&common.fof, layout.fof_path()).map_err(|e| {
        KmtricksError::from(kmerust::error::IoError::os(&layout.fof_path(), e))
    })?;

    let config_path = layout.config_path();
    let config = if config_path.exists() {
        let bytes = std::fs::read(&config_path)
            .map_err(|e| KmtricksError::from(kmerust::error::IoError::os(&config_path, e)))?;
        PipelineConfig::from_bytes(&config_path, &bytes)?
    } else {
        let estimated = estimate_distinct_kmers(&samples);
        let partitions_cap = (common.nb_partitions > 0).then_some(common.nb_partitions);
        let config = PipelineConfig::derive(
            common.kmer_size,
            common.minimizer_size,
            estimated,
            partitions_cap,
            common.memory_budget_bytes,
            common.count_width,
            common.mode.into(),
            common.format.into(),
            common.abundance_min,
            common.r_min,
        )?;
        std::fs::write(&config_path, config.to_bytes())
            .map_err(|e| KmtricksError::from(kmerust::error::IoError::os(&config_path, e)))?;
        config
    };

    let repart_path = layout.repartition_path();
    let table = if repart_path.exists() {
        let bytes = std::fs::read(&repart_path)
            .map_err(|e| KmtricksError::from(kmerust::error::IoError::os(&repart_path, e)))?;
        RepartitionTable::from_bytes(&repart_path, &bytes, config.m)?
    } else {
        let table = scheduler::build_repartition_table(
            &samples,
            config.k,
            config.m,
            config.partitions,
            common.sample_fraction,
        )?;
        std::fs::write(&repart_path, table.to_bytes())
            .map_err(|e| KmtricksError::from(kmerust::error::IoError::os(&repart_path, e)))?;
        table
    };

    let state = PipelineState::load_or_create(layout.state_path(), samples.len(), usize::from(config.partitions))?;

    Ok((config, layout, samples, table, state))
}

fn run_pipeline(common: &CommonArgs, until: Stage) -> Result<(), KmtricksError> {
    let (config, layout, samples, table, state) = bootstrap(common)?;
    let num_workers = if common.threads == 0 { num_cpus() } else { common.threads };

    info!(k = config.k, m = config.m, partitions = config.partitions, samples = samples.len(), "starting pipeline");
    let scheduler = Scheduler::new(config, layout, samples, table, state, num_workers).until(until);
    scheduler.install_signal_handler()?;
    scheduler.run()
}

fn run_repart(common: &CommonArgs) -> Result<(), KmtricksError> {
    let (_, _, samples, table, _) = bootstrap(common)?;
    info!(partitions = table.num_partitions(), samples = samples.len(), "repartition table ready");
    Ok(())
}

fn run_infos(args: &InfosArgs) -> Result<(), KmtricksError> {
    let layout = RunLayout::new(&args.run_dir);
    let config_path = layout.config_path();
    let bytes = std::fs::read(&config_path)
        .map_err(|e| KmtricksError::from(kmerust::error::IoError::os(&config_path, e)))?;
    let config = PipelineConfig::from_bytes(&config_path, &bytes)?;

    let state_path = layout.state_path();
    let fof_path = layout.fof_path();
    let samples = fof::parse(&fof_path)?;
    let state = PipelineState::load_or_create(state_path, samples.len(), usize::from(config.partitions))?;

    println!("k={} m={} partitions={} samples={}", config.k, config.m, config.partitions, samples.len());
    println!("repartition table built: {}", state.is_repart_done());
    for (idx, sample) in samples.iter().enumerate() {
        let superk_done = state.is_superk_done(idx);
        let count_done = (0..usize::from(config.partitions)).all(|p| state.is_count_done(idx, p));
        print!("  {}: superk={superk_done} count={count_done}", sample.id);
        if count_done {
            match scheduler::build_sample_histogram(&layout, &config, sample, config.partitions) {
                Ok(threshold) => println!(" recommended-min-count={threshold}"),
                Err(err) => println!(" (histogram unavailable: {err})"),
            }
        } else {
            println!();
        }
    }
    let merged = (0..usize::from(config.partitions)).filter(|&p| state.is_merge_done(p)).count();
    println!("partitions merged: {merged}/{}", config.partitions);
    Ok(())
}

/// Decodes a finished counted or matrix file to a human-readable table.
fn run_dump(args: &DumpArgs) -> Result<(), KmtricksError> {
    let layout = RunLayout::new(&args.run_dir);
    let config_path = layout.config_path();
    let bytes = std::fs::read(&config_path)
        .map_err(|e| KmtricksError::from(kmerust::error::IoError::os(&config_path, e)))?;
    let config = PipelineConfig::from_bytes(&config_path, &bytes)?;

    if let Some(sample_id) = &args.sample {
        let path = layout.count_partition_path(sample_id, args.partition, config.key_mode);
        match counter::read_counted_file(&path)? {
            CountResult::Kmer(map) => {
                for (bytes, count) in &map {
                    println!("{}\t{count}", String::from_utf8_lossy(bytes));
                }
            }
            CountResult::Hash(map) => {
                for (hash, count) in &map {
                    println!("{hash:016x}\t{count}");
                }
            }
            CountResult::Bloom(set) => {
                for hash in &set {
                    println!("{hash:016x}");
                }
            }
        }
        return Ok(());
    }

    let path = layout.matrix_partition_path(args.partition);
    match config.output_kind {
        OutputKind::BloomStripe => {
            let (stripes, num_samples) = merge::read_bloom_stripe_file(&path)?;
            println!("# bloom stripe: {} rows x {num_samples} samples", stripes.len());
            for (row, bits) in stripes.iter().enumerate() {
                let rendered: String = (0..num_samples)
                    .map(|i| if bits[i / 8] & (1 << (i % 8)) != 0 { '1' } else { '0' })
                    .collect();
                println!("{row}\t{rendered}");
            }
        }
        _ if config.key_mode == KeyMode::Hash => {
            let (rows, _) = merge::read_hash_matrix_file(&path)?;
            for (key, counts) in &rows {
                let counts_str = counts.iter().map(u64::to_string).collect::<Vec<_>>().join("\t");
                println!("{key:016x}\t{counts_str}");
            }
        }
        _ => {
            let (rows, _) = merge::read_matrix_file(&path)?;
            for row in &rows {
                let ascii = row.kmer.to_ascii();
                let counts_str = row.counts.iter().map(u64::to_string).collect::<Vec<_>>().join("\t");
                println!("{}\t{counts_str}", String::from_utf8_lossy(&ascii));
            }
        }
    }
    Ok(())
}

/// Prints per-sample histogram summaries across a whole run.
fn run_aggregate(args: &InfosArgs) -> Result<(), KmtricksError> {
    let layout = RunLayout::new(&args.run_dir);
    let fof_path = layout.fof_path();
    let samples = fof::parse(&fof_path)?;

    for sample in &samples {
        let path = layout.histogram_path(&sample.id);
        match CountHistogram::read(&path) {
            Ok(hist) => {
                let total_unique: u64 = hist.hist_unique.iter().sum::<u64>() + hist.oob_lo + hist.oob_hi;
                println!(
                    "{}: distinct-kmers={total_unique} recommended-min-count={}",
                    sample.id,
                    hist.pick_threshold()
                );
            }
            Err(err) => println!("{}: histogram unavailable ({err})", sample.id),
        }
    }
    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1)
}
