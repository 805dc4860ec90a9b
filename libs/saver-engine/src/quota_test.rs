use super::*;
use std::fs::File;
use std::time::Duration;

use tempfile::TempDir;

/// Sparse file of `len` bytes with an explicit mtime, so sizes in GiB cost no disk.
fn sparse(dir: &Path, name: &str, len: u64, age_secs: u64) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).unwrap();
    file.set_len(len).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(age_secs)).unwrap();
    path
}

fn remaining(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = collect_files(dir).into_iter().map(|f| f.path).collect();
    files.sort();
    files
}

#[test]
fn test_disabled_sweep_is_noop() {
    let dir = TempDir::new().unwrap();
    sparse(dir.path(), "a.data", 5 * GIB, 10);

    let sweep = QuotaSweep::new(dir.path(), 0, 0);
    assert!(sweep.is_disabled());
    assert_eq!(sweep.sweep(), SweepReport::default());
    assert_eq!(remaining(dir.path()).len(), 1);
}

#[test]
fn test_under_thresholds_does_nothing() {
    let dir = TempDir::new().unwrap();
    sparse(dir.path(), "a.data", GIB / 2, 10);

    let report = QuotaSweep::new(dir.path(), 1, 2).sweep();
    assert_eq!(report.usage_gib, 0);
    assert!(!report.warned);
    assert_eq!(report.deleted_files, 0);
}

#[test]
fn test_warning_between_thresholds_deletes_nothing() {
    let dir = TempDir::new().unwrap();
    for i in 0..3 {
        sparse(dir.path(), &format!("{i}.data"), GIB, 100 - i);
    }

    let report = QuotaSweep::new(dir.path(), 2, 5).sweep();
    assert_eq!(report.usage_gib, 3);
    assert!(report.warned);
    assert_eq!(report.deleted_files, 0);
    assert_eq!(remaining(dir.path()).len(), 3);
}

#[test]
fn test_five_gib_with_three_gib_ceiling_deletes_two_oldest() {
    let dir = TempDir::new().unwrap();
    // f0 is the oldest
    for i in 0..5u64 {
        sparse(dir.path(), &format!("f{i}.data"), GIB, 500 - i * 10);
    }

    let report = QuotaSweep::new(dir.path(), 0, 3).sweep();
    assert_eq!(report.total_bytes, 5 * GIB);
    assert_eq!(report.deleted_files, 2);
    assert_eq!(report.freed_bytes, 2 * GIB);

    let left = remaining(dir.path());
    assert_eq!(
        left,
        vec![
            dir.path().join("f2.data"),
            dir.path().join("f3.data"),
            dir.path().join("f4.data"),
        ]
    );
}

#[test]
fn test_stops_as_soon_as_under_budget() {
    let dir = TempDir::new().unwrap();
    // 1.5 GiB oldest, then three 1 GiB files: 4.5 GiB total, ceiling 3 GiB
    sparse(dir.path(), "a.data", GIB + GIB / 2, 400);
    sparse(dir.path(), "b.data", GIB, 300);
    sparse(dir.path(), "c.data", GIB, 200);
    sparse(dir.path(), "d.data", GIB, 100);

    let report = QuotaSweep::new(dir.path(), 0, 3).sweep();
    // Deleting "a" alone frees exactly the excess.
    assert_eq!(report.deleted_files, 1);
    assert!(report.total_bytes - report.freed_bytes <= 3 * GIB);
    assert!(!dir.path().join("a.data").exists());
}

#[test]
fn test_exhausts_files_when_needed() {
    let dir = TempDir::new().unwrap();
    sparse(dir.path(), "big.data", 4 * GIB, 10);

    // Ceiling of 1 GiB: deleting the only file is the best possible outcome.
    let report = QuotaSweep::new(dir.path(), 0, 1).sweep();
    assert_eq!(report.deleted_files, 1);
    assert!(remaining(dir.path()).is_empty());
}

#[test]
fn test_sweep_recurses_into_partitions() {
    let dir = TempDir::new().unwrap();
    let old_dir = dir.path().join("EURUSD-buy").join("2024-03-01-10");
    let new_dir = dir.path().join("EURUSD-sell").join("2024-03-01-11");
    std::fs::create_dir_all(&old_dir).unwrap();
    std::fs::create_dir_all(&new_dir).unwrap();
    sparse(&old_dir, "old.data", 2 * GIB, 1000);
    sparse(&new_dir, "new.data", 2 * GIB, 10);

    let report = QuotaSweep::new(dir.path(), 0, 3).sweep();
    assert_eq!(report.usage_gib, 4);
    assert_eq!(report.deleted_files, 1);
    assert!(!old_dir.join("old.data").exists());
    assert!(new_dir.join("new.data").exists());
    // The emptied bucket and asset directories are pruned; the root stays.
    assert!(!old_dir.exists());
    assert!(!dir.path().join("EURUSD-buy").exists());
    assert!(new_dir.is_dir());
    assert!(dir.path().is_dir());
}

#[test]
fn test_pruning_keeps_directories_with_remaining_files() {
    let dir = TempDir::new().unwrap();
    let bucket = dir.path().join("feed").join("2024-03-01");
    std::fs::create_dir_all(&bucket).unwrap();
    sparse(&bucket, "a.data", GIB, 300);
    sparse(&bucket, "b.data", GIB, 200);
    sparse(dir.path(), "c.data", GIB, 100);

    let report = QuotaSweep::new(dir.path(), 0, 2).sweep();
    assert_eq!(report.deleted_files, 1);
    assert!(!bucket.join("a.data").exists());
    assert!(bucket.join("b.data").exists());
}

#[test]
fn test_undeletable_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    let now = SystemTime::now();
    // Listed by the walk, gone before deletion.
    let vanished = FileEntry {
        path: dir.path().join("vanished.data"),
        len: GIB,
        modified: now - Duration::from_secs(1000),
    };
    let mut files = vec![vanished];
    for (i, age) in [(0u64, 300u64), (1, 200), (2, 100)] {
        let path = sparse(dir.path(), &format!("f{i}.data"), GIB, age);
        files.push(FileEntry { path, len: GIB, modified: now - Duration::from_secs(age) });
    }

    let sweep = QuotaSweep::new(dir.path(), 0, 2);
    let mut report = SweepReport {
        total_bytes: 4 * GIB,
        usage_gib: 4,
        ..SweepReport::default()
    };
    sweep.delete_oldest(files, 2 * GIB, &mut report);

    // Only real removals count; the next oldest files are deleted instead.
    assert_eq!(report.deleted_files, 2);
    assert_eq!(report.freed_bytes, 2 * GIB);
    assert!(report.total_bytes - report.freed_bytes <= 2 * GIB);
    assert_eq!(remaining(dir.path()), vec![dir.path().join("f2.data")]);
}

#[test]
fn test_missing_root_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    let report = QuotaSweep::new(dir.path().join("missing"), 1, 2).sweep();
    assert_eq!(report.total_bytes, 0);
    assert_eq!(report.deleted_files, 0);
}

#[tokio::test]
async fn test_sweep_blocking_runs_on_pool() {
    let dir = TempDir::new().unwrap();
    for i in 0..4u64 {
        sparse(dir.path(), &format!("{i}.data"), GIB, 100 - i);
    }
    let sweep = Arc::new(QuotaSweep::new(dir.path(), 0, 2));
    let report = sweep.sweep_blocking().await;
    assert_eq!(report.deleted_files, 2);
}

#[tokio::test]
async fn test_worker_stops() {
    let dir = TempDir::new().unwrap();
    let worker = QuotaWorker::start(QuotaSweep::new(dir.path(), 1, 2), Duration::from_secs(3600));
    assert_eq!(worker.name(), "quota");
    worker.stop().await.unwrap();
}
