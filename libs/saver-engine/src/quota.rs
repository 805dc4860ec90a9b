//! Disk quota enforcement.
//!
//! Each sweep sums the sizes of every file under the root (recursively),
//! warns above `warning_size_gb` and, above `max_size_gb`, deletes files
//! oldest-first until usage is back under the ceiling. Thresholds are whole
//! GiB compared against integer-divided usage; 0 disables a threshold.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use saver_api::{SaverError, Stoppable};

use crate::periodic::PeriodicTask;

pub const GIB: u64 = 1 << 30;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub total_bytes: u64,
    pub usage_gib: u64,
    pub warned: bool,
    pub deleted_files: usize,
    pub freed_bytes: u64,
}

#[derive(Debug, Clone)]
struct FileEntry {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

#[derive(Debug, Clone)]
pub struct QuotaSweep {
    root: PathBuf,
    warning_size_gb: u64,
    max_size_gb: u64,
}

impl QuotaSweep {
    pub fn new(root: impl Into<PathBuf>, warning_size_gb: u64, max_size_gb: u64) -> Self {
        Self {
            root: root.into(),
            warning_size_gb,
            max_size_gb,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Both thresholds off: sweeping would only cost an enumeration.
    pub fn is_disabled(&self) -> bool {
        self.warning_size_gb == 0 && self.max_size_gb == 0
    }

    /// Run one sweep. Blocks on filesystem I/O.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        if self.is_disabled() {
            return report;
        }

        let files = collect_files(&self.root);
        report.total_bytes = files.iter().map(|f| f.len).sum();
        report.usage_gib = report.total_bytes / GIB;

        if self.warning_size_gb > 0 && report.usage_gib >= self.warning_size_gb {
            report.warned = true;
            tracing::warn!(
                dir = %self.root.display(),
                usage_gb = report.usage_gib,
                threshold_gb = self.warning_size_gb,
                "disk usage above warning threshold"
            );
        }

        if self.max_size_gb == 0 || report.usage_gib < self.max_size_gb {
            return report;
        }

        let ceiling = self.max_size_gb.saturating_mul(GIB);
        self.delete_oldest(files, ceiling, &mut report);

        if report.deleted_files > 0 {
            tracing::warn!(
                dir = %self.root.display(),
                deleted = report.deleted_files,
                freed_bytes = report.freed_bytes,
                "deleted files to stay under quota"
            );
        }
        report
    }

    /// Delete `files` oldest-first until `report.total_bytes` minus what was
    /// freed is at most `ceiling`. Files that can't be removed are logged and
    /// skipped. Directories emptied by a deletion are pruned, up to the root.
    fn delete_oldest(&self, mut files: Vec<FileEntry>, ceiling: u64, report: &mut SweepReport) {
        // Oldest first; names are timestamps so the path breaks mtime ties chronologically.
        files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        for file in &files {
            if report.total_bytes - report.freed_bytes <= ceiling {
                break;
            }
            match std::fs::remove_file(&file.path) {
                Ok(()) => {
                    report.deleted_files += 1;
                    report.freed_bytes += file.len;
                    self.prune_empty_dirs(&file.path);
                }
                Err(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "couldn't delete file");
                }
            }
        }
    }

    /// Remove the now-empty ancestors of `deleted`, stopping at the root or
    /// at the first directory that still has entries.
    fn prune_empty_dirs(&self, deleted: &Path) {
        let mut dir = deleted.parent();
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            if std::fs::remove_dir(d).is_err() {
                break;
            }
            tracing::debug!(dir = %d.display(), "removed empty directory");
            dir = d.parent();
        }
    }

    /// Run one sweep on the blocking pool.
    pub async fn sweep_blocking(self: &Arc<Self>) -> SweepReport {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.sweep()).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(dir = %self.root.display(), error = %e, "quota sweep task failed");
                SweepReport::default()
            }
        }
    }
}

/// Every regular file under `root`. Unreadable directories and entries that
/// vanish while walking are skipped. Symlinks are not followed.
fn collect_files(root: &Path) -> Vec<FileEntry> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "couldn't list directory");
                continue;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                let meta = match entry.metadata() {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                files.push(FileEntry {
                    path: entry.path(),
                    len: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        }
    }
    files
}

/// Owns the sweep timer.
pub struct QuotaWorker {
    sweep: Arc<QuotaSweep>,
    task: PeriodicTask,
}

impl std::fmt::Debug for QuotaWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaWorker").field("sweep", &self.sweep).finish()
    }
}

impl QuotaWorker {
    pub fn start(sweep: QuotaSweep, period: Duration) -> Arc<Self> {
        let sweep = Arc::new(sweep);
        let tick_sweep = sweep.clone();
        let task = PeriodicTask::spawn("quota", period, None, move || {
            let sweep = tick_sweep.clone();
            async move {
                sweep.sweep_blocking().await;
            }
        });
        tracing::info!(
            dir = %sweep.root().display(),
            warning_gb = sweep.warning_size_gb,
            max_gb = sweep.max_size_gb,
            period_secs = period.as_secs(),
            "quota worker started"
        );
        Arc::new(Self { sweep, task })
    }

    pub fn sweep(&self) -> &Arc<QuotaSweep> {
        &self.sweep
    }
}

impl Stoppable for QuotaWorker {
    fn name(&self) -> &str {
        self.task.name()
    }

    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<(), SaverError>> + Send + '_>> {
        Box::pin(async move {
            self.task.stop().await;
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "quota_test.rs"]
mod quota_test;
