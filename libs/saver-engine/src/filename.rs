//! Collision-free, timestamp-named file allocation.
//!
//! Names follow `yyyyMMdd-HHmmss-fffffff.data` (UTC, 100 ns ticks), which sorts
//! lexicographically in creation order. Files are opened with `create_new`, so
//! an existing file is never overwritten: on `AlreadyExists` the timestamp is
//! advanced by one tick and the open retried.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};

pub const FILE_EXTENSION: &str = "data";

/// Nanoseconds per name tick.
const TICK_NANOS: i64 = 100;

/// A freshly created, empty file.
#[derive(Debug)]
pub struct AllocatedFile {
    pub path: PathBuf,
    pub file: File,
}

/// File name for a timestamp.
pub fn file_name(ts: &DateTime<Utc>) -> String {
    // Leap seconds report >= 1e9 nanos.
    let ticks = (ts.timestamp_subsec_nanos() / TICK_NANOS as u32).min(9_999_999);
    format!("{}-{ticks:07}.{FILE_EXTENSION}", ts.format("%Y%m%d-%H%M%S"))
}

/// Create a new file in `dir` named after `start`, advancing one tick per collision.
///
/// The directory must exist. Any error other than `AlreadyExists` is returned.
pub fn create_exclusive(dir: &Path, start: DateTime<Utc>) -> io::Result<AllocatedFile> {
    let mut ts = start;
    loop {
        let path = dir.join(file_name(&ts));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok(AllocatedFile { path, file }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                ts = ts + TimeDelta::nanoseconds(TICK_NANOS);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "filename_test.rs"]
mod filename_test;
