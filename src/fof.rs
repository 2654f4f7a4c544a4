//! Parser for the input "file of files" (fof), kmtricks' primary input index.
//!
//! Each non-empty line names one sample: an identifier, one or more read
//! files, and an optional per-sample minimum-abundance override. Grounded on
//! `examples/original_source/include/kmtricks/io/fof.hpp`'s line grammar;
//! the identifier/path validation rules come straight from §6.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::InputError;

/// One sample parsed from a line of the fof: an identifier, its read files,
/// and an optional minimum-abundance override (`!N` in the fof syntax).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub id: String,
    pub paths: Vec<PathBuf>,
    pub min_count_override: Option<u64>,
}

const FORBIDDEN_CHARS: [char; 7] = ['<', '>', '{', '}', '[', ']', ','];

fn valid_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Parses the fof at `path` into an ordered list of [`Sample`]s.
///
/// Each non-empty, non-comment line must match
/// `IDENTIFIER : PATH1 ; PATH2 ; … [ ! MINCOUNT ]`. Lines starting with `#`
/// are treated as comments and skipped, mirroring the source's fof reader.
///
/// # Errors
/// Returns [`InputError::EmptyIdentifier`], [`InputError::InvalidCharacter`],
/// [`InputError::DuplicateSampleId`] or [`InputError::MalformedFof`] citing
/// the offending line number. Does not check that referenced paths exist;
/// callers that need that should use [`Sample::paths`] with
/// [`validate_paths_exist`].
pub fn parse(path: &Path) -> Result<Vec<Sample>, InputError> {
    let text = std::fs::read_to_string(path).map_err(|source| InputError::MalformedFof {
        path: path.to_path_buf(),
        line: 0,
        details: source.to_string(),
    })?;
    parse_str(path, &text)
}

/// Parses fof content already read into memory; split out of [`parse`] so
/// tests don't need a real file on disk.
///
/// # Errors
/// See [`parse`].
pub fn parse_str(path: &Path, text: &str) -> Result<Vec<Sample>, InputError> {
    let mut samples = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for (line_no, raw_line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (id_part, rest) = line.split_once(':').ok_or_else(|| InputError::MalformedFof {
            path: path.to_path_buf(),
            line: line_no,
            details: "expected 'IDENTIFIER : PATH1 ; PATH2 ; ...'".to_string(),
        })?;

        let id = id_part.trim().to_string();
        if id.is_empty() {
            return Err(InputError::EmptyIdentifier {
                path: path.to_path_buf(),
                line: line_no,
            });
        }
        if let Some(ch) = id.chars().find(|&c| !valid_identifier_char(c)) {
            return Err(InputError::InvalidCharacter {
                path: path.to_path_buf(),
                line: line_no,
                ch,
                details: id.clone(),
            });
        }
        if !seen_ids.insert(id.clone()) {
            return Err(InputError::DuplicateSampleId {
                path: path.to_path_buf(),
                line: line_no,
                id,
            });
        }

        // Split off an optional trailing `! MINCOUNT` override.
        let (paths_part, min_count_override) = match rest.rsplit_once('!') {
            Some((paths_part, mincount_str)) => {
                let mincount_str = mincount_str.trim();
                let mincount = mincount_str.parse::<u64>().map_err(|_| InputError::MalformedFof {
                    path: path.to_path_buf(),
                    line: line_no,
                    details: format!("invalid !MINCOUNT override '{mincount_str}'"),
                })?;
                (paths_part, Some(mincount))
            }
            None => (rest, None),
        };

        let mut paths = Vec::new();
        for raw_path in paths_part.split(';') {
            let raw_path = raw_path.trim();
            if raw_path.is_empty() {
                continue;
            }
            if let Some(ch) = raw_path.chars().find(|&c| FORBIDDEN_CHARS.contains(&c)) {
                return Err(InputError::InvalidCharacter {
                    path: path.to_path_buf(),
                    line: line_no,
                    ch,
                    details: raw_path.to_string(),
                });
            }
            paths.push(PathBuf::from(raw_path));
        }
        if paths.is_empty() {
            return Err(InputError::MalformedFof {
                path: path.to_path_buf(),
                line: line_no,
                details: "sample lists no input files".to_string(),
            });
        }

        samples.push(Sample {
            id,
            paths,
            min_count_override,
        });
    }

    Ok(samples)
}

/// Checks that every path every sample references exists on disk, failing
/// on the first one that doesn't.
///
/// # Errors
/// Returns [`InputError::MissingInputFile`] naming the owning sample and the
/// missing path.
pub fn validate_paths_exist(samples: &[Sample]) -> Result<(), InputError> {
    for sample in samples {
        for path in &sample.paths {
            if !path.exists() {
                return Err(InputError::MissingInputFile {
                    id: sample.id.clone(),
                    file: path.clone(),
                });
            }
        }
    }
    Ok(())
}
