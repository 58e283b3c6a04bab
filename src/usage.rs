//! Per-folder space usage of a cache file.
//!
//! Every byte of the encoded cache is attributed either to the folder of the
//! entry it belongs to or to a "(padding)" bucket:
//!
//! - the 5 header bytes (dimension and entry count) are padding;
//! - a record's path bytes, modification time and fingerprint count toward
//!   the folder containing the path;
//! - the path's NUL terminator is padding unless `count_terminator` is set,
//!   in which case it counts toward the folder.
//!
//! The bucket totals therefore always sum to the encoded cache size.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::cache::CacheFile;

/// Label printed for bytes that belong to no folder.
pub const PADDING_LABEL: &str = "(padding)";

/// Bytes taken by the dimension and entry count fields.
const HEADER_BYTES: u64 = 5;

/// Bytes taken by a record's modification time.
const MOD_TIME_BYTES: u64 = 4;

/// Width of the label column in plain output.
const LABEL_WIDTH: usize = 24;

/// Order of the report rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UsageSort {
    /// By byte count, then by label.
    #[default]
    Size,
    /// By label.
    Name,
}

/// How the usage report is computed and printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageOptions {
    /// Row order.
    pub sort: UsageSort,
    /// Reverse the row order.
    pub descending: bool,
    /// Include the padding row in the output.
    pub include_padding: bool,
    /// Count path terminators toward their folder instead of padding.
    pub count_terminator: bool,
    /// Print `label,value` lines.
    pub csv: bool,
    /// Print each row as a percentage of the cache size.
    pub percent: bool,
}

/// One row of the report. `folder` is `None` for the padding row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderUsage {
    /// Folder the bytes are attributed to.
    pub folder: Option<PathBuf>,
    /// Attributed bytes.
    pub bytes: u64,
}

impl FolderUsage {
    /// Label printed for this row.
    pub fn label(&self) -> &OsStr {
        match &self.folder {
            Some(folder) => folder.as_os_str(),
            None => OsStr::new(PADDING_LABEL),
        }
    }
}

/// Space usage of a cache file, grouped by folder.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageReport {
    /// Rows in output order.
    pub rows: Vec<FolderUsage>,
    /// Encoded size of the whole cache, padding included.
    pub total_bytes: u64,
    options: UsageOptions,
}

impl UsageReport {
    /// Attribute the encoded size of `cache` to folders.
    pub fn from_cache(cache: &CacheFile, options: UsageOptions) -> Self {
        let record_tail = MOD_TIME_BYTES + cache.dimension.fingerprint_len() as u64;
        let mut folders: HashMap<PathBuf, u64> = HashMap::new();
        let mut padding = HEADER_BYTES;

        for entry in &cache.entries {
            let mut bytes = path_len(&entry.path) + record_tail;
            if options.count_terminator {
                bytes += 1;
            } else {
                padding += 1;
            }
            *folders.entry(folder_of(&entry.path)).or_default() += bytes;
        }

        let total_bytes = padding + folders.values().sum::<u64>();
        let mut rows: Vec<FolderUsage> = folders
            .into_iter()
            .map(|(folder, bytes)| FolderUsage {
                folder: Some(folder),
                bytes,
            })
            .collect();
        if options.include_padding {
            rows.push(FolderUsage {
                folder: None,
                bytes: padding,
            });
        }

        rows.sort_by(|a, b| {
            let order = match options.sort {
                UsageSort::Size => a.bytes.cmp(&b.bytes).then_with(|| by_label(a, b)),
                UsageSort::Name => by_label(a, b),
            };
            if options.descending {
                order.reverse()
            } else {
                order
            }
        });

        log::debug!(
            "Attributed {} cache bytes to {} rows",
            total_bytes,
            rows.len()
        );
        Self {
            rows,
            total_bytes,
            options,
        }
    }

    /// Share of the cache taken by `bytes`, in percent.
    pub fn percent_of_total(&self, bytes: u64) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            bytes as f64 / self.total_bytes as f64 * 100.0
        }
    }

    /// Print one line per row.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for row in &self.rows {
            let label = row.label();
            crate::write_raw_path(out, Path::new(label))?;
            if self.options.csv {
                out.write_all(b",")?;
            } else {
                let width = label.to_string_lossy().chars().count();
                write!(out, "{:1$}", "", LABEL_WIDTH.saturating_sub(width))?;
            }
            if self.options.percent {
                writeln!(out, "{:.2}%", self.percent_of_total(row.bytes))?;
            } else {
                writeln!(out, "{}", row.bytes)?;
            }
        }
        Ok(())
    }
}

fn by_label(a: &FolderUsage, b: &FolderUsage) -> Ordering {
    a.label().cmp(b.label())
}

/// Folder of a stored path; bare file names live in `.`.
fn folder_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
        Some(parent) => parent.to_path_buf(),
        None => path.to_path_buf(),
    }
}

fn path_len(path: &Path) -> u64 {
    path_bytes(path).len() as u64
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    match path.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}
