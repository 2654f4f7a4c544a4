//! Generic framed binary file format shared by every artifact kmtricks writes
//! to disk (super-k-mer files, per-partition count files, merge output).
//!
//! Every file starts with a fixed header (magic/version/compression flag) so
//! a reader can validate what it opened before parsing the kind-specific
//! body, mirroring `index.rs`'s `KMIX` magic+version+CRC32 header generalized
//! from one fixed layout into a reusable envelope. The body is a sequence of
//! independently-decodable frames: each frame can be decompressed and parsed
//! on its own, which lets the merge step (C7) seek to a frame without
//! inflating everything before it.
//!
//! Writers build the whole file in a `.tmp` sibling and rename it into place
//! on success, so a crash mid-write never leaves a partially-written
//! artifact for the scheduler to mistake for a finished one (the state
//! machine in [`crate::state`] is the source of truth for "done", but a
//! corrupt-but-present file would otherwise fool a naive existence check).

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::IoError;

const HEADER_LEN: usize = 8 + 4 + 1;

/// Which artifact kind a framed file holds; each gets a distinct magic so a
/// reader opening the wrong file at the wrong stage fails fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    SuperKmer,
    Count,
    Merge,
    Repartition,
}

impl ArtifactKind {
    const fn magic(self) -> &'static [u8; 8] {
        match self {
            ArtifactKind::SuperKmer => b"KMTRSUPK",
            ArtifactKind::Count => b"KMTRCNT\0",
            ArtifactKind::Merge => b"KMTRMRG\0",
            ArtifactKind::Repartition => b"KMTRREPA",
        }
    }
}

/// On-disk format version. Bumped whenever the frame encoding changes in a
/// way old readers can't tolerate.
pub const VERSION: u32 = 1;

/// Writes a sequence of frames to `path` as one framed file, independently
/// gzip-compressing each frame with `flate2` when `compressed` is set (so
/// frames stay individually decodable) or storing them verbatim otherwise.
/// The file is assembled at `path.tmp` and renamed into place only once
/// every frame has been written successfully.
///
/// # Errors
/// Returns [`IoError::Os`] on any filesystem failure.
pub fn write_framed<'a>(
    path: &Path,
    kind: ArtifactKind,
    frames: impl Iterator<Item = &'a [u8]>,
    compressed: bool,
) -> Result<(), IoError> {
    let tmp_path = tmp_sibling(path);
    {
        let file = File::create(&tmp_path).map_err(|e| IoError::os(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(kind.magic())
            .map_err(|e| IoError::os(path, e))?;
        writer
            .write_all(&VERSION.to_le_bytes())
            .map_err(|e| IoError::os(path, e))?;
        writer
            .write_all(&[u8::from(compressed)])
            .map_err(|e| IoError::os(path, e))?;

        for frame in frames {
            let body = if compressed {
                compress_frame(frame).map_err(|e| IoError::os(path, e))?
            } else {
                frame.to_vec()
            };
            writer
                .write_all(&(body.len() as u64).to_le_bytes())
                .map_err(|e| IoError::os(path, e))?;
            writer
                .write_all(&body)
                .map_err(|e| IoError::os(path, e))?;
        }
        writer.flush().map_err(|e| IoError::os(path, e))?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| IoError::os(path, e))?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn compress_frame(frame: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(frame)?;
    encoder.finish()
}

fn decompress_frame(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// A framed file opened for reading: the header has already been validated,
/// and frames are decoded one at a time via [`FramedReader::next_frame`].
pub struct FramedReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    compressed: bool,
}

impl FramedReader {
    /// Opens `path`, validating that its header matches `kind` and that the
    /// format version is one this build understands.
    ///
    /// # Errors
    /// Returns [`IoError::InvalidHeader`] if the file is shorter than a
    /// header, [`IoError::WrongKind`] if the magic doesn't match `kind`, and
    /// [`IoError::UnsupportedVersion`] if the version is newer than
    /// [`VERSION`].
    pub fn open(path: impl Into<PathBuf>, kind: ArtifactKind) -> Result<Self, IoError> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| IoError::os(&path, e))?;
        let mut reader = BufReader::new(file);
        let mut header = [0u8; HEADER_LEN];
        let read = read_fully(&mut reader, &mut header).map_err(|e| IoError::os(&path, e))?;
        if read < HEADER_LEN {
            return Err(IoError::InvalidHeader {
                path: path.clone(),
                expected: HEADER_LEN,
                found: read,
            });
        }
        let mut found = [0u8; 8];
        found.copy_from_slice(&header[..8]);
        if &found != kind.magic() {
            return Err(IoError::WrongKind {
                path: path.clone(),
                expected: *kind.magic(),
                found,
            });
        }
        let version = u32::from_le_bytes(header[8..12].try_into().expect("4 bytes"));
        if version > VERSION {
            return Err(IoError::UnsupportedVersion {
                path: path.clone(),
                expected: VERSION,
                found: version,
            });
        }
        let compressed = header[12] != 0;
        Ok(Self {
            path,
            reader,
            offset: HEADER_LEN as u64,
            compressed,
        })
    }

    /// Reads and decompresses the next frame, or `None` at end of file.
    ///
    /// # Errors
    /// Returns [`IoError::TruncatedFrame`] if a frame's declared length runs
    /// past the end of the file.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, IoError> {
        let mut len_bytes = [0u8; 8];
        let read =
            read_fully(&mut self.reader, &mut len_bytes).map_err(|e| IoError::os(&self.path, e))?;
        if read == 0 {
            return Ok(None);
        }
        if read < 8 {
            return Err(IoError::TruncatedFrame {
                path: self.path.clone(),
                offset: self.offset,
            });
        }
        let frame_len = u64::from_le_bytes(len_bytes) as usize;
        let mut body = vec![0u8; frame_len];
        let read = read_fully(&mut self.reader, &mut body).map_err(|e| IoError::os(&self.path, e))?;
        if read < frame_len {
            return Err(IoError::TruncatedFrame {
                path: self.path.clone(),
                offset: self.offset,
            });
        }
        self.offset += 8 + frame_len as u64;
        let frame = if self.compressed {
            decompress_frame(&body).map_err(|e| IoError::os(&self.path, e))?
        } else {
            body
        };
        Ok(Some(frame))
    }
}

fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_multiple_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.kmc");
        let frames: Vec<Vec<u8>> = vec![b"frame one".to_vec(), b"frame two, longer".to_vec()];
        write_framed(&path, ArtifactKind::Count, frames.iter().map(Vec::as_slice), true)
            .expect("write succeeds");

        let mut reader = FramedReader::open(&path, ArtifactKind::Count).expect("opens");
        let mut collected = Vec::new();
        while let Some(frame) = reader.next_frame().expect("frame reads") {
            collected.push(frame);
        }
        assert_eq!(collected, frames);
    }

    #[test]
    fn roundtrip_multiple_frames_uncompressed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test_plain.kmc");
        let frames: Vec<Vec<u8>> = vec![b"frame one".to_vec(), b"frame two, longer".to_vec()];
        write_framed(&path, ArtifactKind::Count, frames.iter().map(Vec::as_slice), false)
            .expect("write succeeds");

        let mut reader = FramedReader::open(&path, ArtifactKind::Count).expect("opens");
        assert!(!reader.compressed);
        let mut collected = Vec::new();
        while let Some(frame) = reader.next_frame().expect("frame reads") {
            collected.push(frame);
        }
        assert_eq!(collected, frames);
    }

    #[test]
    fn opening_with_wrong_kind_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.kmc");
        write_framed(&path, ArtifactKind::Count, std::iter::empty(), true).expect("write succeeds");
        let err = FramedReader::open(&path, ArtifactKind::Merge).unwrap_err();
        assert!(matches!(err, IoError::WrongKind { .. }));
    }

    #[test]
    fn empty_file_is_an_invalid_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.kmc");
        File::create(&path).expect("create");
        let err = FramedReader::open(&path, ArtifactKind::Count).unwrap_err();
        assert!(matches!(err, IoError::InvalidHeader { .. }));
    }

    #[test]
    fn truncated_frame_is_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("truncated.kmc");
        write_framed(&path, ArtifactKind::Count, std::iter::once(b"hello" as &[u8]), true)
            .expect("write succeeds");
        let mut bytes = std::fs::read(&path).expect("read back");
        bytes.truncate(bytes.len() - 2); // cut into the compressed payload
        std::fs::write(&path, &bytes).expect("rewrite");

        let mut reader = FramedReader::open(&path, ArtifactKind::Count).expect("header still valid");
        let err = reader.next_frame().unwrap_err();
        assert!(matches!(err, IoError::TruncatedFrame { .. }));
    }

    #[test]
    fn no_frames_round_trips_to_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty_frames.kmc");
        write_framed(&path, ArtifactKind::SuperKmer, std::iter::empty(), true).expect("write succeeds");
        let mut reader = FramedReader::open(&path, ArtifactKind::SuperKmer).expect("opens");
        assert!(reader.next_frame().expect("read ok").is_none());
    }
}
