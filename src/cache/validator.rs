//! Staleness checks for cached fingerprints.
//!
//! Each entry is checked once against the live filesystem and either kept
//! or dropped:
//!
//! | Live state                              | Outcome                 |
//! |-----------------------------------------|-------------------------|
//! | file missing                            | dropped, path reported  |
//! | metadata lookup failed for other reason | kept, warning recorded  |
//! | mtime equals stored mtime               | kept                    |
//! | `live + grace == stored`                | kept                    |
//! | anything else                           | dropped, path reported  |
//!
//! Survivors stay in their original relative order. The caller rewrites the
//! cache only when [`ValidationReport::needs_rewrite`] is true.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::codec::{CacheCodec, CacheResult};
use super::entry::{unix_seconds, CacheFile, HashEntry};

/// Stored times this many seconds ahead of the live time are still valid.
pub const DEFAULT_GRACE_SECONDS: i64 = 3600;

/// Source of live modification times.
pub trait MetadataSource {
    /// Modification time of `path` in whole Unix seconds, following symlinks.
    fn modified(&self, path: &Path) -> io::Result<i64>;
}

/// Reads modification times from the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsMetadata;

impl MetadataSource for FsMetadata {
    fn modified(&self, path: &Path) -> io::Result<i64> {
        let metadata = fs::metadata(path)?;
        Ok(unix_seconds(metadata.modified()?))
    }
}

/// Validation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorConfig {
    /// Accepted offset of stored ahead of live modification time.
    pub grace_seconds: i64,
    /// Rewrite `\` separators in stored paths to `/`.
    pub normalize_separators: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            grace_seconds: DEFAULT_GRACE_SECONDS,
            normalize_separators: cfg!(windows),
        }
    }
}

/// Outcome of checking a single entry.
#[derive(Debug)]
pub enum EntryStatus {
    /// The modification time matches.
    Kept,
    /// The stored time is exactly one grace window ahead of the live time.
    KeptInGrace,
    /// The file no longer exists.
    Missing,
    /// The file changed since it was fingerprinted.
    Stale {
        /// Live modification time.
        live: i64,
        /// Stored modification time (zero-extended).
        stored: i64,
    },
    /// Metadata could not be read; the entry is kept.
    StatFailed(io::Error),
}

impl EntryStatus {
    /// Whether the entry survives validation.
    #[must_use]
    pub fn is_kept(&self) -> bool {
        matches!(self, Self::Kept | Self::KeptInGrace | Self::StatFailed(_))
    }
}

/// A metadata lookup that failed for a reason other than "not found".
#[derive(Debug)]
pub struct StatWarning {
    /// Path of the affected entry.
    pub path: PathBuf,
    /// The lookup error.
    pub error: io::Error,
}

impl fmt::Display for StatWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Could not read metadata for {}: {}",
            self.path.display(),
            self.error
        )
    }
}

/// Result of a validation pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Paths of dropped entries, in cache order.
    pub removed: Vec<PathBuf>,
    /// Entries kept despite a failed metadata lookup.
    pub warnings: Vec<StatWarning>,
    /// Number of paths whose separators were rewritten.
    pub normalized: usize,
    /// Number of surviving entries.
    pub kept: usize,
}

impl ValidationReport {
    /// Whether the cache on disk must be rewritten.
    #[must_use]
    pub fn needs_rewrite(&self) -> bool {
        !self.removed.is_empty() || self.normalized > 0
    }
}

/// Checks cache entries against live file metadata.
#[derive(Debug, Clone, Default)]
pub struct CacheValidator<M = FsMetadata> {
    config: ValidatorConfig,
    source: M,
}

impl CacheValidator<FsMetadata> {
    /// Create a validator backed by the real filesystem.
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        Self::with_source(config, FsMetadata)
    }
}

impl<M: MetadataSource> CacheValidator<M> {
    /// Create a validator with a custom metadata source.
    pub fn with_source(config: ValidatorConfig, source: M) -> Self {
        Self { config, source }
    }

    /// The active configuration.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Decide whether a single entry is still valid.
    pub fn check(&self, entry: &HashEntry) -> EntryStatus {
        let live = match self.source.modified(&entry.path) {
            Ok(live) => live,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return EntryStatus::Missing,
            Err(e) => return EntryStatus::StatFailed(e),
        };

        let stored = entry.mod_time.as_unix();
        if live == stored {
            EntryStatus::Kept
        } else if live.checked_add(self.config.grace_seconds) == Some(stored) {
            EntryStatus::KeptInGrace
        } else {
            EntryStatus::Stale { live, stored }
        }
    }

    /// Drop stale entries from `cache` in place.
    ///
    /// Never fails: per-entry metadata errors become warnings.
    pub fn validate(&self, cache: &mut CacheFile) -> ValidationReport {
        let mut report = ValidationReport::default();

        cache.entries.retain_mut(|entry| {
            if self.config.normalize_separators {
                if let Some(normalized) = normalize_separators(&entry.path) {
                    log::debug!(
                        "Normalized {} -> {}",
                        entry.path.display(),
                        normalized.display()
                    );
                    entry.path = normalized;
                    report.normalized += 1;
                }
            }

            match self.check(entry) {
                EntryStatus::Kept => {
                    log::trace!("Keeping {}", entry.path.display());
                    true
                }
                EntryStatus::KeptInGrace => {
                    log::debug!("Keeping {} (within grace window)", entry.path.display());
                    true
                }
                EntryStatus::Missing => {
                    log::debug!("Dropping {}: file not found", entry.path.display());
                    report.removed.push(entry.path.clone());
                    false
                }
                EntryStatus::Stale { live, stored } => {
                    log::debug!(
                        "Dropping {}: modified at {} but cached at {}",
                        entry.path.display(),
                        live,
                        stored
                    );
                    report.removed.push(entry.path.clone());
                    false
                }
                EntryStatus::StatFailed(error) => {
                    let warning = StatWarning {
                        path: entry.path.clone(),
                        error,
                    };
                    log::warn!("{}; keeping cached entry", warning);
                    report.warnings.push(warning);
                    true
                }
            }
        });

        report.kept = cache.len();
        report
    }

    /// Load the cache at `path`, validate it, and rewrite it if anything
    /// changed.
    ///
    /// Load errors abort before anything is written. When nothing was
    /// dropped or normalized the file is left untouched.
    pub fn prune(
        &self,
        codec: &CacheCodec,
        path: &Path,
    ) -> CacheResult<(CacheFile, ValidationReport)> {
        let mut cache = codec.load(path)?;
        let report = self.validate(&mut cache);
        if report.needs_rewrite() {
            codec.save(path, &cache)?;
            log::info!(
                "Rewrote {} with {} entries ({} removed)",
                path.display(),
                report.kept,
                report.removed.len()
            );
        }
        Ok((cache, report))
    }
}

/// Replace `\` with `/`, or `None` if the path has no backslash.
fn normalize_separators(path: &Path) -> Option<PathBuf> {
    let s = path.to_str()?;
    s.contains('\\').then(|| PathBuf::from(s.replace('\\', "/")))
}
