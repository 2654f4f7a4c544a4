//! Command-line interface definition.
//!
//! Mirrors the source's `repart`/`superk`/`count`/`merge`/`all`/`infos`
//! subcommand split (`examples/original_source/include/kmtricks/cli.hpp`):
//! the four partitioned-counting stages, the `all` pipeline driver, an
//! `infos` introspection command, and the read-only `dump`/`aggregate`
//! convenience commands over a finished run directory. Index construction,
//! plugin loading and the SOCKS interface remain external collaborators per
//! §1 and aren't modeled here.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{KeyMode, OutputKind};

/// A partitioned k-mer counting and merging engine for DNA sequencing reads.
#[derive(Parser, Debug)]
#[command(name = "kmtricks")]
#[command(version, author, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full pipeline: repartition, superk, count and merge.
    All(PipelineArgs),
    /// Build the repartition table only.
    Repart(RepartArgs),
    /// Partition every sample's reads into super-k-mer files.
    Superk(StageArgs),
    /// Count each sample's super-k-mer partitions.
    Count(StageArgs),
    /// Merge per-sample counted partitions into the joint matrix.
    Merge(StageArgs),
    /// Print recommended abundance thresholds and run-directory status.
    Infos(InfosArgs),
    /// Decode a finished counted or matrix file to a human-readable table.
    Dump(DumpArgs),
    /// Print per-sample histogram summaries across a whole run.
    Aggregate(InfosArgs),
}

/// Options shared by every subcommand that runs against an existing or
/// fresh run directory.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Input file-of-files (fof): one sample per line.
    #[arg(short = 'f', long = "file")]
    pub fof: PathBuf,

    /// Run directory; holds the config, repartition table, state file and
    /// every per-partition artifact (§4.8).
    #[arg(short = 'd', long = "run-dir")]
    pub run_dir: PathBuf,

    /// K-mer length.
    #[arg(short = 'k', long = "kmer-size", default_value_t = 31)]
    pub kmer_size: usize,

    /// Minimizer length.
    #[arg(short = 'm', long = "minimizer-size", default_value_t = crate::minimizer::DEFAULT_M)]
    pub minimizer_size: usize,

    /// Number of partitions (0 = derive automatically from the memory budget).
    #[arg(long = "nb-partitions", default_value_t = 0)]
    pub nb_partitions: u16,

    /// Default minimum abundance for a k-mer to be considered solid,
    /// overridable per sample via the fof's `!N` suffix.
    #[arg(short = 'a', long = "abundance-min", default_value_t = 2)]
    pub abundance_min: u64,

    /// Minimum number of samples a k-mer must be solid in to survive the
    /// merge (§4.7's `r_min`).
    #[arg(long = "r-min", default_value_t = 1)]
    pub r_min: usize,

    /// Key each counted/matrix file on the full k-mer or on a 64-bit hash.
    #[arg(long = "mode", value_enum, default_value_t = CliKeyMode::Kmer)]
    pub mode: CliKeyMode,

    /// Output shape of the merged matrix.
    #[arg(long = "format", value_enum, default_value_t = CliOutputKind::CountMatrix)]
    pub format: CliOutputKind,

    /// Count width in bytes (1, 2 or 4), saturating on overflow.
    #[arg(long = "count-width", default_value_t = 4)]
    pub count_width: u8,

    /// Total memory budget across all concurrently-running counters.
    #[arg(long = "memory", default_value_t = 1 << 30)]
    pub memory_budget_bytes: u64,

    /// Number of worker threads (default: all available cores).
    #[arg(short = 't', long = "threads", default_value_t = 0)]
    pub threads: usize,

    /// Fraction of reads sampled when training the repartition table.
    #[arg(long = "sample-fraction", default_value_t = 0.1)]
    pub sample_fraction: f64,
}

#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RepartArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StageArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct InfosArgs {
    /// Run directory to inspect.
    #[arg(short = 'd', long = "run-dir")]
    pub run_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct DumpArgs {
    /// Run directory to read from.
    #[arg(short = 'd', long = "run-dir")]
    pub run_dir: PathBuf,

    /// Partition to dump.
    #[arg(short = 'p', long = "partition")]
    pub partition: u16,

    /// Dump one sample's counted file instead of the merged matrix.
    #[arg(long = "sample")]
    pub sample: Option<String>,
}

/// `clap`-friendly mirror of [`KeyMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliKeyMode {
    Kmer,
    Hash,
}

impl From<CliKeyMode> for KeyMode {
    fn from(mode: CliKeyMode) -> Self {
        match mode {
            CliKeyMode::Kmer => KeyMode::Kmer,
            CliKeyMode::Hash => KeyMode::Hash,
        }
    }
}

/// `clap`-friendly mirror of [`OutputKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliOutputKind {
    CountMatrix,
    PresenceAbsence,
    BloomStripe,
}

impl From<CliOutputKind> for OutputKind {
    fn from(kind: CliOutputKind) -> Self {
        match kind {
            CliOutputKind::CountMatrix => OutputKind::CountMatrix,
            CliOutputKind::PresenceAbsence => OutputKind::PresenceAbsence,
            CliOutputKind::BloomStripe => OutputKind::BloomStripe,
        }
    }
}
