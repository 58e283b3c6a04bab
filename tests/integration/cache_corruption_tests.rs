use clap::Parser;
use fpcache::cache::{
    CacheCodec, CacheError, CacheFile, FingerprintDimension, HashEntry, ModTime,
};
use fpcache::cli::Cli;
use fpcache::config::Config;
use fpcache::error::{ExitCode, StructuredError};
use fpcache::run_with;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn cli_for(cache_path: &Path) -> Cli {
    Cli::try_parse_from(["fpcache", "--cache", cache_path.to_str().unwrap()]).unwrap()
}

fn valid_bytes(missing: &Path) -> Vec<u8> {
    let mut cache = CacheFile::new(FingerprintDimension::new(8).unwrap());
    cache
        .push(HashEntry::new(missing, ModTime::from_raw(1), vec![0; 8]))
        .unwrap();
    let mut bytes = Vec::new();
    CacheCodec::new().write_to(&mut bytes, &cache).unwrap();
    bytes
}

#[test]
fn test_missing_cache_file_fails() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("imgSort.cache");

    let mut out = Vec::new();
    let err = run_with(&cli_for(&cache_path), Config::default(), &mut out).unwrap_err();

    assert!(err.to_string().contains("Failed to validate cache"));
    assert!(out.is_empty());
    assert!(!cache_path.exists());
}

#[test]
fn test_truncated_cache_is_not_rewritten() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("imgSort.cache");

    // The only entry points at a missing file, so a successful load would
    // drop it and rewrite the cache
    let mut bytes = valid_bytes(&dir.path().join("missing.png"));
    bytes.truncate(bytes.len() - 3);
    fs::write(&cache_path, &bytes).unwrap();

    let mut out = Vec::new();
    let err = run_with(&cli_for(&cache_path), Config::default(), &mut out).unwrap_err();

    let cache_err = err.downcast_ref::<CacheError>().unwrap();
    assert!(matches!(
        cache_err,
        CacheError::Truncated {
            field: "fingerprint",
            record: 0
        }
    ));
    assert!(out.is_empty());
    assert_eq!(fs::read(&cache_path).unwrap(), bytes);
}

#[test]
fn test_missing_terminator_fails_load() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("imgSort.cache");
    fs::write(&cache_path, [8u8, 0, 0, 0, 1, b'/', b't', b'm', b'p']).unwrap();

    let err = CacheCodec::new().load(&cache_path).unwrap_err();
    assert!(matches!(err, CacheError::Truncated { field: "path", .. }));
}

#[test]
fn test_overlong_path_fails_load() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("imgSort.cache");
    let long_path = format!("{}/{}file.png", dir.path().display(), "m/".repeat(100));

    let mut bytes = vec![8u8, 0, 0, 0, 1];
    bytes.extend_from_slice(long_path.as_bytes());
    bytes.push(0);
    bytes.extend_from_slice(&[0; 12]);
    fs::write(&cache_path, &bytes).unwrap();

    let err = CacheCodec::new()
        .with_max_path_len(64)
        .load(&cache_path)
        .unwrap_err();
    assert!(matches!(
        err,
        CacheError::PathTooLong {
            record: 0,
            limit: 64
        }
    ));

    let strict = Config {
        max_path_len: 64,
        ..Config::default()
    };
    let mut out = Vec::new();
    assert!(run_with(&cli_for(&cache_path), strict, &mut out).is_err());
    assert_eq!(fs::read(&cache_path).unwrap(), bytes);

    // Within the default bound the record loads and is dropped as missing
    run_with(&cli_for(&cache_path), Config::default(), &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), format!("{}\n", long_path));
}

#[test]
fn test_garbage_header_fails() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("imgSort.cache");
    fs::write(&cache_path, b"not a cache").unwrap();

    let err = CacheCodec::new().load(&cache_path).unwrap_err();
    // 'n' = 110, whose square is not a whole number of bytes
    assert!(matches!(err, CacheError::InvalidDimension(110)));
}

#[test]
fn test_structured_error_for_load_failure() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("imgSort.cache");
    fs::write(&cache_path, [8u8, 0]).unwrap();

    let mut out = Vec::new();
    let err = run_with(&cli_for(&cache_path), Config::default(), &mut out).unwrap_err();
    let structured = StructuredError::new(&err, ExitCode::GeneralError);

    assert_eq!(structured.code, "FC001");
    assert_eq!(structured.exit_code, 1);
    assert!(structured
        .causes
        .iter()
        .any(|c| c.contains("entry count")));
}

#[test]
fn test_failed_rewrite_keeps_original() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("imgSort.cache");
    let bytes = valid_bytes(&dir.path().join("missing.png"));
    fs::write(&cache_path, &bytes).unwrap();

    // The entry is stale, so validation must rewrite, but the temp path is taken
    let blocker = dir.path().join("imgSort.cache.tmp");
    fs::create_dir(&blocker).unwrap();

    let mut out = Vec::new();
    let err = run_with(&cli_for(&cache_path), Config::default(), &mut out).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<CacheError>(),
        Some(CacheError::File { .. })
    ));
    assert!(out.is_empty());
    assert_eq!(fs::read(&cache_path).unwrap(), bytes);
    assert!(blocker.is_dir());
}
