//! Persistent fingerprint cache.
//!
//! The cache maps file paths to the perceptual fingerprint computed for them,
//! together with the file's modification time at hashing time. This module
//! loads and saves the cache file and prunes entries that no longer match the
//! filesystem.
//!
//! # Architecture
//!
//! * [`entry`]: In-memory model of the cache file and its entries.
//! * [`codec`]: The big-endian binary file format, with atomic rewrites.
//! * [`validator`]: Staleness checks against live file metadata.
//!
//! # Cache Invalidation
//!
//! An entry is dropped when its file is gone or its modification time moved.
//! A stored time exactly one hour ahead of the live time is still accepted
//! so that daylight-saving shifts on some filesystems do not flush the whole
//! cache. When nothing is dropped the file on disk is not rewritten.

pub mod codec;
pub mod entry;
pub mod validator;

pub use codec::{CacheCodec, CacheError, CacheResult, DEFAULT_CACHE_FILE, MAX_PATH_LEN};
pub use entry::{unix_seconds, CacheFile, FingerprintDimension, HashEntry, ModTime};
pub use validator::{
    CacheValidator, EntryStatus, FsMetadata, MetadataSource, StatWarning, ValidationReport,
    ValidatorConfig, DEFAULT_GRACE_SECONDS,
};
