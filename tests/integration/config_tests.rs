use clap::Parser;
use filetime::{set_file_mtime, FileTime};
use figment::providers::{Format, Serialized, Toml};
use figment::{Figment, Jail};
use fpcache::cache::{CacheCodec, CacheFile, FingerprintDimension, HashEntry, ModTime};
use fpcache::cli::Cli;
use fpcache::config::Config;
use fpcache::run_with;
use std::fs::File;
use std::path::Path;
use tempfile::tempdir;

const LIVE: i64 = 1_500_000_000;

/// Cache with one entry whose stored time is one hour ahead of the file.
fn grace_cache(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let file = dir.join("shifted.png");
    File::create(&file).unwrap();
    set_file_mtime(&file, FileTime::from_unix_time(LIVE, 0)).unwrap();

    let cache_path = dir.join("imgSort.cache");
    let mut cache = CacheFile::new(FingerprintDimension::new(8).unwrap());
    cache
        .push(HashEntry::new(&file, ModTime::from_unix(LIVE + 3600), vec![0; 8]))
        .unwrap();
    CacheCodec::new().save(&cache_path, &cache).unwrap();
    (cache_path, file)
}

fn run(cache_path: &Path, config: Config) -> String {
    let cli = Cli::try_parse_from(["fpcache", "--cache", cache_path.to_str().unwrap()]).unwrap();
    let mut out = Vec::new();
    run_with(&cli, config, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_default_grace_keeps_shifted_entry() {
    let dir = tempdir().unwrap();
    let (cache_path, _) = grace_cache(dir.path());

    assert!(run(&cache_path, Config::default()).is_empty());
    assert_eq!(CacheCodec::new().load(&cache_path).unwrap().len(), 1);
}

#[test]
fn test_zero_grace_from_config_file_drops_entry() {
    let dir = tempdir().unwrap();
    let (cache_path, file) = grace_cache(dir.path());

    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::string("grace_seconds = 0"));
    let config = Config::from_figment(figment).unwrap();

    assert_eq!(run(&cache_path, config), format!("{}\n", file.display()));
    assert!(CacheCodec::new().load(&cache_path).unwrap().is_empty());
}

#[test]
fn test_environment_sets_cache_file() {
    Jail::expect_with(|jail| {
        jail.set_env("FPCACHE_CACHE_FILE", "from-env.cache");
        jail.set_env("FPCACHE_THRESHOLD", "12");

        let config = Config::from_figment(Config::figment()).map_err(|e| e.to_string())?;
        assert_eq!(config.cache_file, Path::new("from-env.cache"));
        assert_eq!(config.threshold, 12);
        Ok(())
    });
}

#[test]
fn test_cli_cache_overrides_config() {
    let dir = tempdir().unwrap();
    let (cache_path, _) = grace_cache(dir.path());

    let config = Config {
        cache_file: dir.path().join("does-not-exist.cache"),
        ..Config::default()
    };
    // --cache wins, so the existing cache is validated
    assert!(run(&cache_path, config).is_empty());
}
