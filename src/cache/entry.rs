//! Cache entry definitions.

use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use super::CacheError;

/// Side length `N` of a fingerprint; the fingerprint holds `N * N` bits.
///
/// Only dimensions whose square is a whole number of bytes are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FingerprintDimension(u8);

impl FingerprintDimension {
    /// Validate a dimension read from a cache header.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidDimension`] for `0` or any value whose
    /// square is not divisible by 8.
    pub fn new(n: u8) -> Result<Self, CacheError> {
        let bits = u16::from(n) * u16::from(n);
        if n == 0 || bits % 8 != 0 {
            return Err(CacheError::InvalidDimension(n));
        }
        Ok(Self(n))
    }

    /// The raw dimension byte as stored in the header.
    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }

    /// Number of bytes in a fingerprint of this dimension (`N * N / 8`).
    #[must_use]
    pub fn fingerprint_len(self) -> usize {
        usize::from(self.0) * usize::from(self.0) / 8
    }
}

impl fmt::Display for FingerprintDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Modification time as stored on disk: the low 32 bits of Unix seconds.
///
/// Writing keeps the low 32 bits of the signed 64-bit timestamp. Reading
/// zero-extends those bits, so stored values are always in `0..=u32::MAX`
/// when compared against live timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModTime(u32);

impl ModTime {
    /// Wrap the raw 32-bit value read from a cache file.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Truncate signed Unix seconds to the stored representation.
    #[must_use]
    pub const fn from_unix(secs: i64) -> Self {
        Self(secs as u32)
    }

    /// Truncate a `SystemTime` to the stored representation.
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        Self::from_unix(unix_seconds(time))
    }

    /// The raw value written to disk.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The stored value widened to Unix seconds (zero-extended).
    #[must_use]
    pub const fn as_unix(self) -> i64 {
        self.0 as i64
    }
}

/// Whole Unix seconds for `time`, rounded toward negative infinity like
/// `st_mtime`.
#[must_use]
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        Err(before) => {
            let before = before.duration();
            let whole = before.as_secs() as i64;
            if before.subsec_nanos() > 0 {
                -whole - 1
            } else {
                -whole
            }
        }
    }
}

/// A single cached fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEntry {
    /// Path of the fingerprinted file.
    pub path: PathBuf,
    /// Modification time of the file when the fingerprint was taken.
    pub mod_time: ModTime,
    /// Fingerprint bytes, `dimension.fingerprint_len()` long.
    pub fingerprint: Vec<u8>,
}

impl HashEntry {
    /// Create a new entry.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, mod_time: ModTime, fingerprint: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            mod_time,
            fingerprint,
        }
    }
}

/// In-memory image of a cache file. Entry order is preserved on rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFile {
    /// Fingerprint dimension shared by every entry.
    pub dimension: FingerprintDimension,
    /// Entries in file order.
    pub entries: Vec<HashEntry>,
}

impl CacheFile {
    /// Create an empty cache for the given dimension.
    #[must_use]
    pub fn new(dimension: FingerprintDimension) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
        }
    }

    /// Append an entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::FingerprintLength`] if the fingerprint length
    /// does not match the cache dimension.
    pub fn push(&mut self, entry: HashEntry) -> Result<(), CacheError> {
        self.check_fingerprint(&entry)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn check_fingerprint(&self, entry: &HashEntry) -> Result<(), CacheError> {
        let expected = self.dimension.fingerprint_len();
        if entry.fingerprint.len() != expected {
            return Err(CacheError::FingerprintLength {
                path: entry.path.clone(),
                expected,
                actual: entry.fingerprint.len(),
            });
        }
        Ok(())
    }
}
