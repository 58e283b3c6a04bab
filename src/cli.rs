//! Command-line interface definitions for fpcache.
//!
//! With no arguments the tool validates `imgSort.cache` in the current
//! directory, prints every dropped path on its own line, and rewrites the
//! cache if anything was dropped.
//!
//! # Example
//!
//! ```bash
//! # Validate the cache in the current directory
//! fpcache
//!
//! # Validate another cache without rewriting it
//! fpcache --cache ~/pictures/imgSort.cache --dry-run
//!
//! # Also list near-duplicate pairs among the surviving entries
//! fpcache --similar --threshold 32
//!
//! # Show how many cache bytes each folder takes, largest first
//! fpcache usage --reverse --percent
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::usage::{UsageOptions, UsageSort};

/// Validate and compact a perceptual fingerprint cache.
///
/// Entries whose file is missing or was modified since it was fingerprinted
/// are dropped; their paths are printed to stdout.
#[derive(Debug, Parser)]
#[command(name = "fpcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Cache file to operate on (default: imgSort.cache)
    #[arg(
        short,
        long,
        value_name = "PATH",
        env = "FPCACHE_CACHE_FILE",
        global = true
    )]
    pub cache: Option<PathBuf>,

    /// Report stale entries without rewriting the cache
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Print near-duplicate pairs among surviving entries (tab-separated)
    #[arg(long)]
    pub similar: bool,

    /// Maximum differing bits for two fingerprints to be near-duplicates
    #[arg(long, value_name = "BITS")]
    pub threshold: Option<u32>,

    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all log output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Report fatal errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to run instead of validating
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands for fpcache.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Report how many cache bytes each folder takes, without validating
    Usage(UsageArgs),
}

/// Arguments for the usage subcommand.
#[derive(Debug, Default, Args)]
pub struct UsageArgs {
    /// Print `folder,value` lines
    #[arg(long)]
    pub csv: bool,

    /// Sort by folder name instead of size
    #[arg(short, long)]
    pub alphabetical: bool,

    /// Sort descending instead of ascending
    #[arg(short, long)]
    pub reverse: bool,

    /// Include a "(padding)" row for header bytes and path terminators
    #[arg(short = 'x', long)]
    pub padding: bool,

    /// Show each folder as a percentage of the cache size
    #[arg(short, long)]
    pub percent: bool,

    /// Count path terminators toward their folder instead of padding
    #[arg(long)]
    pub count_terminator: bool,
}

impl From<&UsageArgs> for UsageOptions {
    fn from(args: &UsageArgs) -> Self {
        Self {
            sort: if args.alphabetical {
                UsageSort::Name
            } else {
                UsageSort::Size
            },
            descending: args.reverse,
            include_padding: args.padding,
            count_terminator: args.count_terminator,
            csv: args.csv,
            percent: args.percent,
        }
    }
}
