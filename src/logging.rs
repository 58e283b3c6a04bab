//! Logging setup for the fpcache binary.
//!
//! Diagnostics go through the `log` facade to an `env_logger` backend on
//! stderr; stdout is reserved for report lines (dropped paths, similar
//! pairs, usage rows). The CLI flags set the level for fpcache's own
//! modules only: dependencies stay at `warn` unless `--quiet` lowers
//! everything to `error`. `RUST_LOG`, when set, replaces both.
//!
//! # Example
//!
//! ```rust,no_run
//! use fpcache::logging::init_logging;
//!
//! init_logging(1, false);
//! log::debug!("Debug info here");
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

const CRATE_MODULE: &str = "fpcache";

/// Initialize logging from the CLI verbosity flags.
///
/// # Panics
///
/// Panics if called more than once, as `env_logger` can only be
/// initialized once per process.
pub fn init_logging(verbose: u8, quiet: bool) {
    let mut builder = Builder::new();

    if env::var_os("RUST_LOG").is_some() {
        builder.parse_default_env();
    } else {
        let (own, dependencies) = level_filters(verbose, quiet);
        builder
            .filter_level(dependencies)
            .filter_module(CRATE_MODULE, own);
    }

    // Module paths only help once per-entry decisions are being logged
    let show_module = verbose >= 1;
    builder.format(move |buf, record| {
        let level = record.level();
        let style = buf.default_level_style(level);
        if show_module {
            writeln!(
                buf,
                "{style}{:<5}{style:#} [{}] {}",
                level,
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        } else {
            writeln!(buf, "{style}{:<5}{style:#} {}", level, record.args())
        }
    });
    builder.init();

    log::debug!("Logging initialized at level: {}", log::max_level());
}

/// Levels for fpcache's own modules and for everything else.
fn level_filters(verbose: u8, quiet: bool) -> (LevelFilter, LevelFilter) {
    let own = determine_level(verbose, quiet);
    (own, own.min(LevelFilter::Warn))
}

/// Map CLI flags to a level: quiet wins, then 0=info, 1=debug, 2+=trace.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
