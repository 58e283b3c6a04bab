//! Binary encoding of the fingerprint cache file.
//!
//! # Layout
//!
//! All multi-byte integers are big-endian.
//!
//! ```text
//! u8      dimension N          fingerprint length = N * N / 8 bytes
//! u32     entry count
//! repeated entry count times:
//!   bytes path, NUL-terminated
//!   u32   modification time (low 32 bits of Unix seconds)
//!   bytes fingerprint
//! ```
//!
//! Loading is all-or-nothing: any short read fails the whole load and no
//! partial cache is returned. Saving goes through a temporary sibling file
//! that is renamed over the target once fully written.

use std::borrow::Cow;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::entry::{CacheFile, FingerprintDimension, HashEntry, ModTime};

/// Well-known name of the cache file.
pub const DEFAULT_CACHE_FILE: &str = "imgSort.cache";

/// Longest path accepted in a record, in bytes (`PATH_MAX` less the NUL).
pub const MAX_PATH_LEN: usize = 4095;

/// Upper bound on entries reserved up front from the header count.
const PREALLOC_ENTRIES: usize = 4096;

/// Errors that can occur while reading or writing the cache file.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying I/O failure while streaming records.
    #[error("Cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// Opening, creating or replacing the cache file failed.
    #[error("Cache file {}: {source}", path.display())]
    File {
        /// Path being accessed.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: io::Error,
    },

    /// The stream ended in the middle of a record.
    #[error("Cache file truncated while reading {field} of record {record}")]
    Truncated {
        /// Field being read.
        field: &'static str,
        /// Zero-based record number (0 for header fields).
        record: u32,
    },

    /// A stored path is longer than the configured bound.
    #[error("Path in record {record} exceeds {limit} bytes")]
    PathTooLong {
        /// Zero-based record number.
        record: u32,
        /// Configured maximum path length.
        limit: usize,
    },

    /// A path cannot be represented in the cache file.
    #[error("Invalid cache path {path:?}: {reason}")]
    InvalidPath {
        /// Lossy rendering of the offending path.
        path: String,
        /// Why the path was rejected.
        reason: &'static str,
    },

    /// The header dimension does not describe a whole number of bytes.
    #[error("Invalid fingerprint dimension {0}")]
    InvalidDimension(u8),

    /// An entry's fingerprint does not match the cache dimension.
    #[error("Fingerprint for {} is {actual} bytes, expected {expected}", path.display())]
    FingerprintLength {
        /// Path of the entry.
        path: PathBuf,
        /// Length required by the dimension.
        expected: usize,
        /// Actual fingerprint length.
        actual: usize,
    },

    /// More entries than the 32-bit count can describe.
    #[error("Too many cache entries to encode: {0}")]
    TooManyEntries(usize),

    /// Memory for cache data could not be allocated.
    #[error("Failed to allocate {bytes} bytes for {what}")]
    Allocation {
        /// What was being allocated.
        what: &'static str,
        /// Requested size in bytes.
        bytes: usize,
    },
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Reads and writes [`CacheFile`]s in the binary layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCodec {
    max_path_len: usize,
}

impl Default for CacheCodec {
    fn default() -> Self {
        Self {
            max_path_len: MAX_PATH_LEN,
        }
    }
}

impl CacheCodec {
    /// Create a codec with the default path bound.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the longest accepted path, in bytes.
    #[must_use]
    pub fn with_max_path_len(mut self, max_path_len: usize) -> Self {
        self.max_path_len = max_path_len;
        self
    }

    /// Longest accepted path, in bytes.
    #[must_use]
    pub fn max_path_len(&self) -> usize {
        self.max_path_len
    }

    /// Load a cache file from disk.
    pub fn load(&self, path: &Path) -> CacheResult<CacheFile> {
        let file = File::open(path).map_err(|source| CacheError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let cache = self.read_from(file)?;
        log::debug!(
            "Loaded {} cache entries (dimension {}) from {}",
            cache.len(),
            cache.dimension,
            path.display()
        );
        Ok(cache)
    }

    /// Decode a cache from any byte stream.
    pub fn read_from<R: Read>(&self, reader: R) -> CacheResult<CacheFile> {
        let mut reader = BufReader::new(reader);

        let mut header = [0u8; 1];
        read_field(&mut reader, &mut header, "dimension", 0)?;
        let dimension = FingerprintDimension::new(header[0])?;
        let fingerprint_len = dimension.fingerprint_len();

        let mut word = [0u8; 4];
        read_field(&mut reader, &mut word, "entry count", 0)?;
        let count = u32::from_be_bytes(word);

        let mut entries: Vec<HashEntry> = Vec::new();
        let initial = (count as usize).min(PREALLOC_ENTRIES);
        entries
            .try_reserve(initial)
            .map_err(|_| CacheError::Allocation {
                what: "cache entries",
                bytes: initial.saturating_mul(std::mem::size_of::<HashEntry>()),
            })?;

        // One growable buffer reused for every path
        let mut path_buf: Vec<u8> = Vec::new();
        for record in 0..count {
            self.read_path(&mut reader, &mut path_buf, record)?;
            let path = path_from_bytes(&path_buf)?;

            read_field(&mut reader, &mut word, "modification time", record)?;
            let mod_time = ModTime::from_raw(u32::from_be_bytes(word));

            let mut fingerprint = Vec::new();
            fingerprint
                .try_reserve_exact(fingerprint_len)
                .map_err(|_| CacheError::Allocation {
                    what: "fingerprint",
                    bytes: fingerprint_len,
                })?;
            fingerprint.resize(fingerprint_len, 0);
            read_field(&mut reader, &mut fingerprint, "fingerprint", record)?;

            entries.try_reserve(1).map_err(|_| CacheError::Allocation {
                what: "cache entries",
                bytes: std::mem::size_of::<HashEntry>(),
            })?;
            entries.push(HashEntry {
                path,
                mod_time,
                fingerprint,
            });
        }

        if !reader.fill_buf()?.is_empty() {
            log::warn!(
                "Ignoring trailing data after {} cache entries",
                entries.len()
            );
        }

        Ok(CacheFile { dimension, entries })
    }

    /// Read one NUL-terminated path into `buf`, without the terminator.
    fn read_path<R: BufRead>(
        &self,
        reader: &mut R,
        buf: &mut Vec<u8>,
        record: u32,
    ) -> CacheResult<()> {
        buf.clear();
        let limit = self.max_path_len as u64 + 1;
        let read = reader.by_ref().take(limit).read_until(0, buf)?;
        if buf.last() == Some(&0) {
            buf.pop();
            return Ok(());
        }
        if read as u64 >= limit {
            Err(CacheError::PathTooLong {
                record,
                limit: self.max_path_len,
            })
        } else {
            Err(CacheError::Truncated {
                field: "path",
                record,
            })
        }
    }

    /// Write a cache file, replacing `path` atomically.
    ///
    /// Every entry is checked before anything touches the disk. The data is
    /// written to `<path>.tmp`, synced, and renamed over `path`.
    pub fn save(&self, path: &Path, cache: &CacheFile) -> CacheResult<()> {
        self.check(cache)?;

        let tmp_path = temp_path(path);
        if let Err(err) = self.write_temp(&tmp_path, cache) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }

        fs::rename(&tmp_path, path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            CacheError::File {
                path: path.to_path_buf(),
                source,
            }
        })?;

        log::debug!(
            "Wrote {} cache entries to {}",
            cache.len(),
            path.display()
        );
        Ok(())
    }

    fn write_temp(&self, tmp_path: &Path, cache: &CacheFile) -> CacheResult<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(tmp_path).map_err(|source| CacheError::File {
            path: tmp_path.to_path_buf(),
            source,
        })?;

        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer, cache)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    /// Encode a cache to any byte sink.
    pub fn write_to<W: Write>(&self, mut writer: W, cache: &CacheFile) -> CacheResult<()> {
        self.check(cache)?;
        let count =
            u32::try_from(cache.len()).map_err(|_| CacheError::TooManyEntries(cache.len()))?;

        writer.write_all(&[cache.dimension.get()])?;
        writer.write_all(&count.to_be_bytes())?;
        for entry in &cache.entries {
            writer.write_all(&path_to_bytes(&entry.path)?)?;
            writer.write_all(&[0])?;
            writer.write_all(&entry.mod_time.raw().to_be_bytes())?;
            writer.write_all(&entry.fingerprint)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reject anything that would not load back identically.
    fn check(&self, cache: &CacheFile) -> CacheResult<()> {
        if u32::try_from(cache.len()).is_err() {
            return Err(CacheError::TooManyEntries(cache.len()));
        }
        for entry in &cache.entries {
            cache.check_fingerprint(entry)?;
            let bytes = path_to_bytes(&entry.path)?;
            if bytes.contains(&0) {
                return Err(CacheError::InvalidPath {
                    path: entry.path.to_string_lossy().into_owned(),
                    reason: "contains a NUL byte",
                });
            }
            if bytes.len() > self.max_path_len {
                return Err(CacheError::InvalidPath {
                    path: entry.path.to_string_lossy().into_owned(),
                    reason: "exceeds the maximum path length",
                });
            }
        }
        Ok(())
    }
}

/// Sibling path used while rewriting the cache.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn read_field<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    field: &'static str,
    record: u32,
) -> CacheResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CacheError::Truncated { field, record }
        } else {
            CacheError::Io(e)
        }
    })
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> CacheResult<PathBuf> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    Ok(PathBuf::from(OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> CacheResult<PathBuf> {
    std::str::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|_| CacheError::InvalidPath {
            path: String::from_utf8_lossy(bytes).into_owned(),
            reason: "not valid UTF-8",
        })
}

#[cfg(unix)]
fn path_to_bytes(path: &Path) -> CacheResult<Cow<'_, [u8]>> {
    use std::os::unix::ffi::OsStrExt;
    Ok(Cow::Borrowed(path.as_os_str().as_bytes()))
}

#[cfg(not(unix))]
fn path_to_bytes(path: &Path) -> CacheResult<Cow<'_, [u8]>> {
    path.to_str()
        .map(|s| Cow::Borrowed(s.as_bytes()))
        .ok_or_else(|| CacheError::InvalidPath {
            path: path.to_string_lossy().into_owned(),
            reason: "not valid UTF-8",
        })
}
