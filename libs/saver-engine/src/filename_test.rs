use super::*;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use chrono::TimeZone;
use tempfile::TempDir;

fn fixed_ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap() + TimeDelta::nanoseconds(123_456_700)
}

#[test]
fn test_file_name_format() {
    assert_eq!(file_name(&fixed_ts()), "20240301-101530-1234567.data");
}

#[test]
fn test_file_names_sort_chronologically() {
    let a = file_name(&fixed_ts());
    let b = file_name(&(fixed_ts() + TimeDelta::nanoseconds(100)));
    let c = file_name(&(fixed_ts() + TimeDelta::seconds(1)));
    assert!(a < b);
    assert!(b < c);
}

#[test]
fn test_create_exclusive_advances_on_collision() {
    let dir = TempDir::new().unwrap();
    let first = create_exclusive(dir.path(), fixed_ts()).unwrap();
    let second = create_exclusive(dir.path(), fixed_ts()).unwrap();

    assert_ne!(first.path, second.path);
    assert_eq!(
        second.path.file_name().unwrap().to_str().unwrap(),
        "20240301-101530-1234568.data"
    );
}

#[test]
fn test_create_exclusive_never_overwrites() {
    let dir = TempDir::new().unwrap();
    let mut first = create_exclusive(dir.path(), fixed_ts()).unwrap();
    first.file.write_all(b"original").unwrap();
    drop(first.file);

    let _second = create_exclusive(dir.path(), fixed_ts()).unwrap();
    let content = std::fs::read(&first.path).unwrap();
    assert_eq!(content, b"original");
}

#[test]
fn test_create_exclusive_missing_dir_is_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope");
    let err = create_exclusive(&missing, fixed_ts()).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}

#[test]
fn test_concurrent_same_timestamp_never_collides() {
    let dir = Arc::new(TempDir::new().unwrap());
    let ts = fixed_ts();

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let dir = dir.clone();
            std::thread::spawn(move || {
                let mut allocated = create_exclusive(dir.path(), ts).unwrap();
                allocated.file.write_all(format!("payload-{i}").as_bytes()).unwrap();
                allocated.path
            })
        })
        .collect();

    let paths: HashSet<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(paths.len(), 100);

    let mut contents: Vec<String> = paths
        .iter()
        .map(|p| std::fs::read_to_string(p).unwrap())
        .collect();
    contents.sort();
    let mut expected: Vec<String> = (0..100).map(|i| format!("payload-{i}")).collect();
    expected.sort();
    assert_eq!(contents, expected);
}
