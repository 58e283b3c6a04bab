//! fpcache - Perceptual Fingerprint Cache Maintenance
//!
//! Keeps a persistent cache of per-file perceptual fingerprints consistent
//! with the filesystem, and compares fingerprints to find near-duplicates.
//!
//! The usual flow is [`cache::CacheCodec::load`], then
//! [`cache::CacheValidator::validate`], then [`cache::CacheCodec::save`] if
//! any entry was dropped. [`usage::UsageReport`] breaks a cache's size
//! down by folder without validating it.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod similarity;
pub mod usage;

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::cache::{CacheCodec, CacheFile, CacheValidator};
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::error::ExitCode;
use crate::similarity::SimilarityIndex;
use crate::usage::{UsageOptions, UsageReport};

/// Run the application with parsed arguments, writing results to stdout.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    let config = Config::load();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_with(&cli, config, &mut out)
}

/// Run the application against an explicit configuration and output sink.
///
/// CLI flags override the matching configuration values.
pub fn run_with<W: Write>(cli: &Cli, mut config: Config, out: &mut W) -> Result<ExitCode> {
    if let Some(cache) = &cli.cache {
        config.cache_file = cache.clone();
    }
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    log::debug!("Effective configuration: {:?}", config);

    let path = config.cache_file.as_path();
    let codec = CacheCodec::new().with_max_path_len(config.max_path_len);

    if let Some(Commands::Usage(args)) = &cli.command {
        let cache = codec
            .load(path)
            .with_context(|| format!("Failed to load cache {}", path.display()))?;
        UsageReport::from_cache(&cache, UsageOptions::from(args)).write_to(out)?;
        out.flush()?;
        return Ok(ExitCode::Success);
    }

    let validator = CacheValidator::new(config.validator_config());

    let (cache, report) = if cli.dry_run {
        let mut cache = codec
            .load(path)
            .with_context(|| format!("Failed to load cache {}", path.display()))?;
        let report = validator.validate(&mut cache);
        if report.needs_rewrite() {
            log::info!(
                "Dry run: {} would be rewritten with {} entries",
                path.display(),
                report.kept
            );
        }
        (cache, report)
    } else {
        validator
            .prune(&codec, path)
            .with_context(|| format!("Failed to validate cache {}", path.display()))?
    };

    for removed in &report.removed {
        write_path(out, removed)?;
    }

    if !report.warnings.is_empty() {
        log::warn!(
            "{} entries could not be checked and were kept",
            report.warnings.len()
        );
    }
    if !report.needs_rewrite() {
        log::info!("All {} cache entries are current", report.kept);
    }

    if cli.similar {
        write_similar_pairs(out, &cache, config.threshold)?;
    }

    out.flush()?;
    Ok(ExitCode::Success)
}

/// Write a path followed by a newline.
fn write_path<W: Write>(out: &mut W, path: &Path) -> io::Result<()> {
    write_raw_path(out, path)?;
    out.write_all(b"\n")
}

/// Write a path exactly as stored, byte for byte on Unix.
#[cfg(unix)]
pub(crate) fn write_raw_path<W: Write>(out: &mut W, path: &Path) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;
    out.write_all(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
pub(crate) fn write_raw_path<W: Write>(out: &mut W, path: &Path) -> io::Result<()> {
    write!(out, "{}", path.display())
}

fn write_similar_pairs<W: Write>(out: &mut W, cache: &CacheFile, threshold: u32) -> io::Result<()> {
    let index = SimilarityIndex::from_cache(cache);
    let pairs = index.similar_pairs(threshold);
    log::info!(
        "Found {} near-duplicate pairs among {} entries (threshold {} bits)",
        pairs.len(),
        index.len(),
        threshold
    );
    for (i, j) in pairs {
        write_raw_path(out, &cache.entries[i].path)?;
        out.write_all(b"\t")?;
        write_path(out, &cache.entries[j].path)?;
    }
    Ok(())
}
