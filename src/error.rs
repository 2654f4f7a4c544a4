//! Error types for kmtricks.
//!
//! One `thiserror` enum per concern, matching the shape of the taxonomy: input,
//! configuration, I/O, data, resource and plugin errors. Each converts into the
//! top-level [`KmtricksError`] via `#[from]`, which the scheduler and `main` use
//! to decide whether a run failed and which exit code to return.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error rolling up every concern-specific error in the crate.
///
/// Library code returns `Result<T, KmtricksError>` (or a narrower per-module
/// error that converts into it); `main` matches on [`KmtricksError::exit_code`]
/// to pick the process exit status.
#[derive(Debug, Error)]
pub enum KmtricksError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl KmtricksError {
    /// Exit code per the §6 table: 0 success, 1 domain error, 2 I/O error.
    /// SIGINT/SIGTERM are handled cooperatively by the scheduler's signal
    /// handler (drain and persist, then exit 0) and never construct a
    /// `KmtricksError`. A crash on SIGSEGV/SIGABRT exits 128+signo via the
    /// default OS/runtime behavior; this crate installs no handler for those.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            KmtricksError::Io(_) => 2,
            _ => 1,
        }
    }
}

/// Malformed fof, missing input file, duplicate sample id. Fatal at startup.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("fof {path}:{line}: {details}")]
    MalformedFof {
        path: PathBuf,
        line: usize,
        details: String,
    },

    #[error("fof {path}:{line}: duplicate sample id '{id}'")]
    DuplicateSampleId {
        path: PathBuf,
        line: usize,
        id: String,
    },

    #[error("sample '{id}' references missing input file '{file}'")]
    MissingInputFile { id: String, file: PathBuf },

    #[error("fof {path}:{line}: empty sample identifier")]
    EmptyIdentifier { path: PathBuf, line: usize },

    #[error("fof {path}:{line}: invalid character '{ch}' in '{details}'")]
    InvalidCharacter {
        path: PathBuf,
        line: usize,
        ch: char,
        details: String,
    },
}

/// k out of compiled range, inconsistent options. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("k-mer length {k} is out of range: must be between {min} and {max}")]
    InvalidKmerLength { k: usize, min: usize, max: usize },

    #[error("minimizer length {m} must be smaller than k-mer length {k}")]
    InvalidMinimizerLength { m: usize, k: usize },

    #[error("partition count {p} is out of range: must be between {min} and {max}")]
    InvalidPartitionCount { p: usize, min: usize, max: usize },

    #[error("incompatible options: {details}")]
    IncompatibleOptions { details: String },

    #[error("failed to read config file '{path}': {source}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("failed to parse config file '{path}': {details}")]
    Parse { path: PathBuf, details: String },
}

/// Header magic/version mismatch, truncated file, permission denied, disk full.
/// Fatal per task; propagated to the scheduler which aborts the run.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("{path}: truncated header, expected at least {expected} bytes, got {found}")]
    InvalidHeader {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("{path}: wrong artifact kind, expected magic {expected:?}, found {found:?}")]
    WrongKind {
        path: PathBuf,
        expected: [u8; 8],
        found: [u8; 8],
    },

    #[error("{path}: unsupported format version {found}, expected {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("{path}: truncated frame at offset {offset}")]
    TruncatedFrame { path: PathBuf, offset: u64 },

    #[error("{path}: {source}")]
    Os {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl IoError {
    pub fn os(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IoError::Os {
            source,
            path: path.into(),
        }
    }
}

/// Corrupt super-k-mer record, non-monotonic sequence in a counted file.
/// Fatal per task.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("{path}: corrupt super-k-mer record at offset {offset}: {details}")]
    SuperKmer {
        path: PathBuf,
        offset: u64,
        details: String,
    },

    #[error("{path}: non-monotonic key at offset {offset}: {previous} >= {found}")]
    NonMonotonicKey {
        path: PathBuf,
        offset: u64,
        previous: u64,
        found: u64,
    },

    #[error("{path}: duplicate key {key} at offset {offset}")]
    DuplicateKey {
        path: PathBuf,
        offset: u64,
        key: u64,
    },
}

/// Memory cap exceeded, file-descriptor limit reached. Fatal per task.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error(
        "partition {partition} exceeded its memory budget of {budget_bytes} bytes \
         (estimated {estimated_bytes} bytes); increase --memory or the partition count"
    )]
    Memory {
        partition: u32,
        budget_bytes: u64,
        estimated_bytes: u64,
    },

    #[error("file descriptor limit reached while opening '{path}'")]
    FileDescriptorLimit { path: PathBuf },
}

/// Optional plugin failed to load or returned an invalid result. Fatal at startup.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to load plugin '{path}': {details}")]
    LoadFailed { path: PathBuf, details: String },

    #[error("plugin '{name}' returned an invalid result: {details}")]
    InvalidResult { name: String, details: String },
}

/// k-mer length outside [`MIN_K`](crate::kmer::MIN_K)..=[`K_MAX`](crate::kmer::K_MAX),
/// or an invalid base encountered while parsing one. Raised by [`crate::kmer`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KmerError {
    #[error("k-mer length {k} is out of range: must be between {min} and {max}")]
    InvalidLength { k: usize, min: usize, max: usize },

    #[error("{0}")]
    InvalidBase(#[from] InvalidBaseError),
}

impl From<KmerError> for ConfigError {
    fn from(err: KmerError) -> Self {
        match err {
            KmerError::InvalidLength { k, min, max } => {
                ConfigError::InvalidKmerLength { k, min, max }
            }
            KmerError::InvalidBase(e) => ConfigError::IncompatibleOptions {
                details: e.to_string(),
            },
        }
    }
}

/// Error for an invalid DNA base encountered at a given position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidBaseError {
    pub base: u8,
    pub position: usize,
}

impl std::fmt::Display for InvalidBaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.base.is_ascii_graphic() || self.base == b' ' {
            write!(
                f,
                "invalid base '{}' (0x{:02x}) at position {}",
                self.base as char, self.base, self.position
            )
        } else {
            write!(
                f,
                "invalid base 0x{:02x} at position {}",
                self.base, self.position
            )
        }
    }
}

impl std::error::Error for InvalidBaseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_base_error_display() {
        let err = InvalidBaseError {
            base: b'N',
            position: 5,
        };
        assert_eq!(err.to_string(), "invalid base 'N' (0x4e) at position 5");
    }

    #[test]
    fn exit_code_io_is_two() {
        let err: KmtricksError = IoError::os("x", std::io::Error::other("boom")).into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn exit_code_domain_is_one() {
        let err: KmtricksError = ConfigError::InvalidKmerLength {
            k: 0,
            min: 8,
            max: 128,
        }
        .into();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn kmer_error_converts_to_config_error() {
        let err = KmerError::InvalidLength {
            k: 200,
            min: 8,
            max: 128,
        };
        let config_err: ConfigError = err.into();
        assert!(matches!(
            config_err,
            ConfigError::InvalidKmerLength { k: 200, .. }
        ));
    }
}
